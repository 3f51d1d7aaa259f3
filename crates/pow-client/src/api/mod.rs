//! Typed methods for each route group, as `impl PowClient` blocks.
//!
//! | Module | Routes |
//! |---|---|
//! | [`data`] | `/v1/data/*`, `/ipfs/add` |
//! | [`storage`] | `/v1/storage-config/*`, `/v1/storage-jobs/*`, `/v1/storage-info/*` |
//! | [`wallet`] | `/v1/wallet/*`, `/v1/deals/*` |
//! | [`admin`] | `/v1/admin/*` |

pub mod admin;
pub mod data;
pub mod storage;
pub mod wallet;

/// Comma-joined list for `?cids=` style parameters. Empty lists are sent
/// as no parameter at all.
pub(crate) fn list_param<T: ToString>(name: &'static str, items: &[T]) -> Vec<(&'static str, String)> {
    if items.is_empty() {
        return Vec::new();
    }
    let joined = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    vec![(name, joined)]
}
