//! Newline-delimited JSON response streams.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use serde::Serialize;

pub const NDJSON: &str = "application/x-ndjson";

/// One value as a JSON line. Values that fail to encode are skipped.
pub fn line<T: Serialize>(value: &T) -> Option<Bytes> {
    match serde_json::to_vec(value) {
        Ok(mut buf) => {
            buf.push(b'\n');
            Some(Bytes::from(buf))
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to encode stream item");
            None
        }
    }
}

/// Stream `items` as an `application/x-ndjson` response body.
pub fn ndjson<S, T>(items: S) -> Response
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let body = items.filter_map(|item| async move { line(&item).map(Ok::<_, Infallible>) });
    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(body)).into_response()
}
