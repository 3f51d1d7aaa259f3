//! Decoding of newline-delimited JSON response bodies.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// A stream of decoded items from a streaming endpoint.
pub type ItemStream<T> = BoxStream<'static, Result<T, ClientError>>;

struct LineReader {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    buf: Vec<u8>,
    eof: bool,
    endpoint: String,
}

impl LineReader {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    fn decode<T: DeserializeOwned>(&self, line: &[u8]) -> Result<T, ClientError> {
        serde_json::from_slice(line).map_err(|e| ClientError::Decode {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })
    }

    async fn next<T: DeserializeOwned>(mut self) -> Option<(Result<T, ClientError>, Self)> {
        loop {
            if let Some(line) = self.take_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let item = self.decode(&line);
                return Some((item, self));
            }
            if self.eof {
                let rest = std::mem::take(&mut self.buf);
                if rest.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                let item = self.decode(&rest);
                return Some((item, self));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(source)) => {
                    self.eof = true;
                    self.buf.clear();
                    let err = ClientError::Http {
                        endpoint: self.endpoint.clone(),
                        source,
                    };
                    return Some((Err(err), self));
                }
                None => self.eof = true,
            }
        }
    }
}

/// Decode `resp` as one JSON value per line.
pub(crate) fn ndjson<T>(endpoint: String, resp: reqwest::Response) -> ItemStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let reader = LineReader {
        body: resp.bytes_stream().boxed(),
        buf: Vec::new(),
        eof: false,
        endpoint,
    };
    stream::unfold(reader, LineReader::next::<T>).boxed()
}
