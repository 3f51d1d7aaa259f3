//! # Memory Hot Tier
//!
//! A blockstore with pins. Staged blocks are kept for `staged_ttl` after
//! their last stage call; [`MemoryHot::gc`] drops expired staged blocks that
//! nothing pins. Pinning a cid whose block is absent waits for the block to
//! arrive until the pin timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use pow_core::{Cid, Codec};
use pow_engine::{CapabilityError, HotStorage};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default retention of staged, unpinned blocks.
pub const DEFAULT_STAGED_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub struct MemoryHot {
    blocks: DashMap<Cid, Bytes>,
    pins: DashSet<Cid>,
    staged: DashMap<Cid, Instant>,
    staged_ttl: Duration,
    arrived: Notify,
    online: AtomicBool,
}

impl Default for MemoryHot {
    fn default() -> Self {
        Self::new(DEFAULT_STAGED_TTL)
    }
}

impl MemoryHot {
    pub fn new(staged_ttl: Duration) -> Self {
        Self {
            blocks: DashMap::new(),
            pins: DashSet::new(),
            staged: DashMap::new(),
            staged_ttl,
            arrived: Notify::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Block bytes, if present.
    pub fn block(&self, cid: &Cid) -> Option<Bytes> {
        self.blocks.get(cid).map(|b| b.value().clone())
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop a block and its pin, as if the node lost it.
    pub fn evict(&self, cid: &Cid) {
        self.blocks.remove(cid);
        self.pins.remove(cid);
        self.staged.remove(cid);
    }

    /// While offline every call fails with `Infrastructure`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), CapabilityError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CapabilityError::Infrastructure("hot node offline".into()))
        }
    }

    fn insert(&self, cid: Cid, data: Bytes) {
        self.blocks.insert(cid, data);
        self.arrived.notify_waiters();
    }

    /// Remove staged blocks past their retention that nothing pins.
    /// Returns the number removed.
    pub fn gc(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Cid> = self
            .staged
            .iter()
            .filter(|e| now.duration_since(*e.value()) >= self.staged_ttl)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for cid in expired {
            self.staged.remove(&cid);
            if !self.pins.contains(&cid) && self.blocks.remove(&cid).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "collected expired staged blocks");
        }
        removed
    }

    /// Run [`gc`](Self::gc) every `interval` for as long as the store lives.
    pub fn spawn_gc(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(hot) => {
                        hot.gc();
                    }
                    None => break,
                }
            }
        })
    }
}

#[async_trait]
impl HotStorage for MemoryHot {
    async fn stage(&self, data: Bytes, codec: Codec) -> Result<Cid, CapabilityError> {
        self.check_online()?;
        let cid = Cid::for_content(codec, &data);
        self.staged.insert(cid.clone(), Instant::now());
        self.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn stage_cid(&self, cid: &Cid) -> Result<(), CapabilityError> {
        self.check_online()?;
        if !self.blocks.contains_key(cid) {
            return Err(CapabilityError::NotFound(cid.to_string()));
        }
        self.staged.insert(cid.clone(), Instant::now());
        Ok(())
    }

    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<(), CapabilityError> {
        self.check_online()?;
        self.insert(cid.clone(), data);
        Ok(())
    }

    async fn pin(&self, cid: &Cid, timeout: Duration) -> Result<u64, CapabilityError> {
        self.check_online()?;
        let deadline = Instant::now() + timeout;
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();
            if let Some(size) = self.blocks.get(cid).map(|b| b.len() as u64) {
                self.pins.insert(cid.clone());
                return Ok(size);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Err(CapabilityError::Timeout(timeout));
            }
        }
    }

    async fn unpin(&self, cid: &Cid) -> Result<(), CapabilityError> {
        self.check_online()?;
        self.pins.remove(cid);
        Ok(())
    }

    async fn is_pinned(&self, cid: &Cid) -> Result<bool, CapabilityError> {
        self.check_online()?;
        Ok(self.pins.contains(cid))
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes, CapabilityError> {
        self.check_online()?;
        self.block(cid)
            .ok_or_else(|| CapabilityError::NotFound(cid.to_string()))
    }

    async fn size(&self, cid: &Cid) -> Result<u64, CapabilityError> {
        self.get(cid).await.map(|b| b.len() as u64)
    }
}
