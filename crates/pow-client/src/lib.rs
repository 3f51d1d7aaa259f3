//! # pow-client — Typed client for the Powergate RPC surface
//!
//! [`PowClient`] wraps every HTTP route of `powd` with typed requests and
//! responses from [`pow_core::rpc`]. Streaming routes (job watch, cid logs)
//! come back as [`ItemStream`]s decoded from newline-delimited JSON.
//!
//! The [`pipeline`] module builds on the client to move a folder of local
//! items through stage → apply → watch under a staging byte budget, with a
//! results file that makes runs resumable.
//!
//! ## Transport
//!
//! | Concern | Behavior |
//! |---|---|
//! | Auth | `x-ffs-token` on user routes, `x-ffs-admin-token` on admin routes, `x-ipfs-ffs-auth` on `/ipfs/add` |
//! | Retries | [`RetryPolicy`]: refused connections always; timeouts and `502`/`503`/`504` for idempotent methods. 3 retries from 200ms |
//! | Errors | Non-2xx bodies decode into [`ClientError::Api`] with the server's [`pow_core::ErrorKind`] |

pub mod api;
pub mod client;
pub mod error;
pub mod folder;
pub mod pipeline;
pub mod retry;
pub mod stream;

pub use api::data::LogsOptions;
pub use api::storage::ApplyOptions;
pub use client::{PowClient, DEFAULT_SERVER_ADDRESS};
pub use error::ClientError;
pub use retry::RetryPolicy;
pub use stream::ItemStream;
