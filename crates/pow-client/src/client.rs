//! Transport core of [`PowClient`]: URL building, auth headers, retries
//! and error decoding. The per-area methods live in [`crate::api`].

use std::fmt;
use std::time::Duration;

use pow_core::rpc::ErrorBody;
use pow_core::ErrorKind;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::ClientError;
use crate::retry::{retry_send, RetryPolicy};
use crate::stream::{ndjson, ItemStream};

/// Default address of a local `powd`.
pub const DEFAULT_SERVER_ADDRESS: &str = "http://127.0.0.1:6002";

pub const USER_TOKEN_HEADER: &str = "x-ffs-token";
pub const ADMIN_TOKEN_HEADER: &str = "x-ffs-admin-token";
pub const IPFS_AUTH_HEADER: &str = "x-ipfs-ffs-auth";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which credential a route expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Auth {
    None,
    User,
    Admin,
    Ipfs,
}

/// Client for a Powergate server.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct PowClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    admin_token: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for PowClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowClient")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("retry", &self.retry)
            .finish()
    }
}

impl PowClient {
    /// Build a client for `server_address`, e.g. `http://127.0.0.1:6002`.
    pub fn new(server_address: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(server_address)
            .map_err(|_| ClientError::InvalidUrl(server_address.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(server_address.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;
        Ok(Self {
            http,
            base,
            token: None,
            admin_token: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Use `token` for user-scoped calls.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use `token` for admin calls.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Replace the default [`RetryPolicy`].
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    // -- Request plumbing -----------------------------------------------------

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|_| ClientError::InvalidUrl(format!("{}{path}", self.base)))
    }

    fn request(&self, method: Method, url: &Url, auth: Auth) -> RequestBuilder {
        let req = self.http.request(method, url.clone());
        let credential = match auth {
            Auth::None => None,
            Auth::User => self.token.as_deref().map(|t| (USER_TOKEN_HEADER, t)),
            Auth::Admin => self
                .admin_token
                .as_deref()
                .map(|t| (ADMIN_TOKEN_HEADER, t)),
            Auth::Ipfs => self.token.as_deref().map(|t| (IPFS_AUTH_HEADER, t)),
        };
        match credential {
            Some((name, value)) => req.header(name, value),
            None => req,
        }
    }

    /// Send `method path` with retries. `prepare` adds the query and body
    /// and runs once per attempt. Non-2xx answers become
    /// [`ClientError::Api`].
    pub(crate) async fn call<F>(
        &self,
        method: Method,
        path: &str,
        auth: Auth,
        prepare: F,
    ) -> Result<(String, Response), ClientError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path)?;
        let endpoint = format!("{method} /{path}");
        tracing::debug!(endpoint = %endpoint, "powergate request");
        let resp = retry_send(&self.retry, &method, &endpoint, || {
            prepare(self.request(method.clone(), &url, auth)).send()
        })
        .await
            .map_err(|source| ClientError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;
        if resp.status().is_success() {
            return Ok((endpoint, resp));
        }
        Err(api_error(endpoint, resp).await)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        auth: Auth,
    ) -> Result<T, ClientError> {
        let (endpoint, resp) = self.call(Method::GET, path, auth, |r| r).await?;
        decode(endpoint, resp).await
    }

    pub(crate) async fn get_query<Q, T>(
        &self,
        path: &str,
        query: &Q,
        auth: Auth,
    ) -> Result<T, ClientError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (endpoint, resp) = self
            .call(Method::GET, path, auth, |r| r.query(query))
            .await?;
        decode(endpoint, resp).await
    }

    pub(crate) async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        auth: Auth,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (endpoint, resp) = self.call(method, path, auth, |r| r.json(body)).await?;
        decode(endpoint, resp).await
    }

    /// Like [`Self::send_json`] for routes that answer `204 No Content`.
    pub(crate) async fn send_unit<B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        auth: Auth,
    ) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        self.call(method, path, auth, |r| r.json(body)).await?;
        Ok(())
    }

    /// Open a newline-delimited JSON stream.
    pub(crate) async fn stream<Q, T>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<ItemStream<T>, ClientError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let (endpoint, resp) = self
            .call(Method::GET, path, Auth::User, |r| r.query(query))
            .await?;
        Ok(ndjson(endpoint, resp))
    }
}

async fn decode<T: DeserializeOwned>(endpoint: String, resp: Response) -> Result<T, ClientError> {
    resp.json::<T>()
        .await
        .map_err(|source| ClientError::Deserialization { endpoint, source })
}

async fn api_error(endpoint: String, resp: Response) -> ClientError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let (kind, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => (
            ErrorKind::from_code(&parsed.error.code).unwrap_or(ErrorKind::Internal),
            parsed.error.message,
        ),
        Err(_) => (fallback_kind(status), body),
    };
    ClientError::Api {
        endpoint,
        status,
        kind,
        message,
    }
}

/// Kind for error answers that carry no structured body.
fn fallback_kind(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::InvalidArgument,
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::AlreadyExists,
        502..=504 => ErrorKind::Infrastructure,
        _ => ErrorKind::Internal,
    }
}
