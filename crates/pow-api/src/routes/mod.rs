//! # Route Modules
//!
//! | Prefix | Module | Service |
//! |---|---|---|
//! | `/v1/data/*` | [`data`] | staging, retrieval, cid logs |
//! | `/v1/storage-config/*` | [`storage_config`] | apply, remove, profile default |
//! | `/v1/storage-jobs/*` | [`jobs`] | job queries, watch, cancel |
//! | `/v1/storage-info/*` | [`info`] | cid storage state |
//! | `/v1/deals/*` | [`deals`] | storage and retrieval records |
//! | `/v1/wallet/*` | [`wallet`] | addresses, balances, signatures |
//! | `/v1/admin/*` | [`admin`] | profiles, fleet addresses, listings |
//! | `/ipfs/add` | [`ipfs`] | staging proxy for folder uploads |

pub mod admin;
pub mod data;
pub mod deals;
pub mod info;
pub mod ipfs;
pub mod jobs;
pub mod storage_config;
pub mod wallet;

use axum::http::StatusCode;

/// Reply for operations with no result body.
pub(crate) const NO_CONTENT: StatusCode = StatusCode::NO_CONTENT;
