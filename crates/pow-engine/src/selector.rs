//! # Miner Selectors
//!
//! Two [`MinerSelector`] variants:
//!
//! - [`FixedMinerSelector`] walks a configured miner list in order.
//! - [`ScoredMinerSelector`] ranks an ask index by score, descending, with
//!   the miner address as a stable tie-break. The index is refreshed from
//!   outside; while it has never been loaded, selection fails instead of
//!   waiting.
//!
//! In both, a non-empty trusted list wins outright: only trusted miners
//! are returned, in the trusted list's order, and price and country
//! filters do not apply to them. Excluded miners are never returned.

use std::cmp::Ordering;

use async_trait::async_trait;
use parking_lot::RwLock;
use pow_core::{ChainEpoch, MinerProposal};
use serde::{Deserialize, Serialize};

use crate::capability::{MinerSelector, SelectConstraints};
use crate::error::CapabilityError;

/// A miner's storage ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerAsk {
    pub miner: String,
    /// Price per epoch.
    pub price: u64,
    pub min_piece_size: u64,
    pub max_piece_size: u64,
    /// ISO 3166 alpha-2 country code.
    pub country: String,
    /// Reputation score; higher is better.
    pub score: f64,
    pub expiry: ChainEpoch,
}

impl MinerAsk {
    fn proposal(&self) -> MinerProposal {
        MinerProposal {
            miner_addr: self.miner.clone(),
            epoch_price: self.price,
            ask_expiry: self.expiry,
        }
    }

    fn admits(&self, c: &SelectConstraints) -> bool {
        (c.max_price == 0 || self.price <= c.max_price)
            && (c.country_codes.is_empty() || c.country_codes.contains(&self.country))
            && (c.piece_size == 0
                || (self.min_piece_size <= c.piece_size && c.piece_size <= self.max_piece_size))
    }
}

fn trusted_pick(asks: &[MinerAsk], c: &SelectConstraints, n: usize) -> Vec<MinerProposal> {
    c.trusted
        .iter()
        .filter(|m| !c.excluded.contains(m))
        .filter_map(|m| asks.iter().find(|a| &a.miner == m))
        .take(n)
        .map(MinerAsk::proposal)
        .collect()
}

// ─── Fixed ───────────────────────────────────────────────────────────

/// Selector over a fixed, ordered miner list.
#[derive(Debug, Clone)]
pub struct FixedMinerSelector {
    miners: Vec<MinerAsk>,
}

impl FixedMinerSelector {
    pub fn new(miners: Vec<MinerAsk>) -> Self {
        Self { miners }
    }
}

#[async_trait]
impl MinerSelector for FixedMinerSelector {
    async fn select(
        &self,
        constraints: &SelectConstraints,
        n: usize,
    ) -> Result<Vec<MinerProposal>, CapabilityError> {
        if !constraints.trusted.is_empty() {
            return Ok(trusted_pick(&self.miners, constraints, n));
        }
        Ok(self
            .miners
            .iter()
            .filter(|a| !constraints.excluded.contains(&a.miner) && a.admits(constraints))
            .take(n)
            .map(MinerAsk::proposal)
            .collect())
    }
}

// ─── Scored ──────────────────────────────────────────────────────────

/// Selector ranking a refreshable ask index by score.
#[derive(Debug, Default)]
pub struct ScoredMinerSelector {
    index: RwLock<Option<Vec<MinerAsk>>>,
}

impl ScoredMinerSelector {
    /// A selector whose index has not been loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asks(asks: Vec<MinerAsk>) -> Self {
        Self {
            index: RwLock::new(Some(asks)),
        }
    }

    /// Replace the ask index.
    pub fn refresh(&self, asks: Vec<MinerAsk>) {
        tracing::debug!(asks = asks.len(), "refreshed miner ask index");
        *self.index.write() = Some(asks);
    }

    /// Drop the index; selection fails until the next refresh.
    pub fn invalidate(&self) {
        *self.index.write() = None;
    }
}

#[async_trait]
impl MinerSelector for ScoredMinerSelector {
    async fn select(
        &self,
        constraints: &SelectConstraints,
        n: usize,
    ) -> Result<Vec<MinerProposal>, CapabilityError> {
        let guard = self.index.read();
        let Some(asks) = guard.as_ref() else {
            return Err(CapabilityError::Infrastructure(
                "miner ask index unavailable".into(),
            ));
        };
        if !constraints.trusted.is_empty() {
            return Ok(trusted_pick(asks, constraints, n));
        }
        let mut candidates: Vec<&MinerAsk> = asks
            .iter()
            .filter(|a| !constraints.excluded.contains(&a.miner) && a.admits(constraints))
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.miner.cmp(&b.miner))
        });
        Ok(candidates
            .into_iter()
            .take(n)
            .map(MinerAsk::proposal)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(miner: &str, price: u64, country: &str, score: f64) -> MinerAsk {
        MinerAsk {
            miner: miner.into(),
            price,
            min_piece_size: 256,
            max_piece_size: 1 << 30,
            country: country.into(),
            score,
            expiry: 1_000_000,
        }
    }

    fn miners(props: &[MinerProposal]) -> Vec<&str> {
        props.iter().map(|p| p.miner_addr.as_str()).collect()
    }

    #[tokio::test]
    async fn scored_orders_by_score_then_miner() {
        let s = ScoredMinerSelector::with_asks(vec![
            ask("f03", 1, "US", 5.0),
            ask("f01", 1, "US", 9.0),
            ask("f02", 1, "US", 5.0),
        ]);
        let out = s.select(&SelectConstraints::default(), 3).await.unwrap();
        assert_eq!(miners(&out), vec!["f01", "f02", "f03"]);
    }

    #[tokio::test]
    async fn scored_applies_filters() {
        let s = ScoredMinerSelector::with_asks(vec![
            ask("f01", 100, "US", 9.0),
            ask("f02", 5, "CN", 8.0),
            ask("f03", 5, "US", 7.0),
            ask("f04", 5, "US", 6.0),
        ]);
        let c = SelectConstraints {
            excluded: vec!["f04".into()],
            max_price: 10,
            country_codes: vec!["US".into()],
            ..SelectConstraints::default()
        };
        let out = s.select(&c, 5).await.unwrap();
        assert_eq!(miners(&out), vec!["f03"]);
    }

    #[tokio::test]
    async fn scored_respects_piece_size_bounds() {
        let mut small = ask("f01", 1, "US", 1.0);
        small.max_piece_size = 512;
        let s = ScoredMinerSelector::with_asks(vec![small, ask("f02", 1, "US", 0.5)]);
        let c = SelectConstraints {
            piece_size: 1024,
            ..SelectConstraints::default()
        };
        assert_eq!(miners(&s.select(&c, 2).await.unwrap()), vec!["f02"]);
    }

    #[tokio::test]
    async fn trusted_list_wins_outright() {
        let s = ScoredMinerSelector::with_asks(vec![
            ask("f01", 1, "US", 9.0),
            ask("f02", 999, "CN", 1.0),
            ask("f03", 1, "US", 2.0),
        ]);
        let c = SelectConstraints {
            trusted: vec!["f03".into(), "f02".into(), "f09".into()],
            max_price: 10,
            country_codes: vec!["US".into()],
            ..SelectConstraints::default()
        };
        let out = s.select(&c, 5).await.unwrap();
        assert_eq!(miners(&out), vec!["f03", "f02"]);

        let c = SelectConstraints {
            excluded: vec!["f03".into()],
            ..c
        };
        assert_eq!(miners(&s.select(&c, 5).await.unwrap()), vec!["f02"]);
    }

    #[tokio::test]
    async fn unloaded_index_is_an_error() {
        let s = ScoredMinerSelector::new();
        let err = s.select(&SelectConstraints::default(), 1).await.unwrap_err();
        assert!(err.is_retriable());
        s.refresh(vec![ask("f01", 1, "US", 1.0)]);
        assert_eq!(s.select(&SelectConstraints::default(), 1).await.unwrap().len(), 1);
        s.invalidate();
        assert!(s.select(&SelectConstraints::default(), 1).await.is_err());
    }

    #[tokio::test]
    async fn fixed_keeps_list_order() {
        let s = FixedMinerSelector::new(vec![
            ask("f09", 1, "US", 0.0),
            ask("f01", 1, "US", 0.0),
            ask("f05", 1, "US", 0.0),
        ]);
        let c = SelectConstraints {
            excluded: vec!["f01".into()],
            ..SelectConstraints::default()
        };
        assert_eq!(miners(&s.select(&c, 2).await.unwrap()), vec!["f09", "f05"]);
    }
}
