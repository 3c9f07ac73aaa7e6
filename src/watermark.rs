// src/watermark.rs
//! Per-source delivery cursor.
//!
//! A [`Watermark`] splits the timeline for one source:
//! - everything strictly before `position` has been delivered;
//! - items exactly at `position` are delivered iff their id is in `boundary_ids`;
//! - `ahead` lists ids confirmed delivered past `position` (a sibling at an
//!   earlier timestamp failed, so the position could not move over them yet).
//!
//! The position only moves forward. Stores are pluggable; the tracker is the
//! only writer and is only driven by the cycle that owns the source.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ingest::types::{CollectionWindow, NormalizedRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub position: Option<DateTime<Utc>>,
    #[serde(default)]
    pub boundary_ids: BTreeSet<String>,
    #[serde(default)]
    pub ahead: BTreeMap<String, DateTime<Utc>>,
}

impl Watermark {
    pub fn is_delivered(&self, external_id: &str, occurred_at: DateTime<Utc>) -> bool {
        if self.ahead.contains_key(external_id) {
            return true;
        }
        match self.position {
            None => false,
            Some(pos) if occurred_at < pos => true,
            Some(pos) if occurred_at == pos => self.boundary_ids.contains(external_id),
            Some(_) => false,
        }
    }

    /// Move to `up_to` (never backwards) and record `confirmed` deliveries.
    pub fn advance(&mut self, up_to: DateTime<Utc>, confirmed: &[(String, DateTime<Utc>)]) {
        if self.position.map_or(true, |pos| up_to > pos) {
            self.position = Some(up_to);
            self.boundary_ids.clear();
        }
        let Some(pos) = self.position else { return };

        for (id, at) in confirmed {
            if *at == pos {
                self.boundary_ids.insert(id.clone());
            } else if *at > pos {
                self.ahead.insert(id.clone(), *at);
            }
        }

        // fold ahead entries the position has caught up with
        let caught_up: Vec<String> = self
            .ahead
            .iter()
            .filter(|(_, at)| **at <= pos)
            .map(|(id, _)| id.clone())
            .collect();
        for id in caught_up {
            if let Some(at) = self.ahead.remove(&id) {
                if at == pos {
                    self.boundary_ids.insert(id);
                }
            }
        }
    }
}

/// Durable home of watermarks. Contract: `load` returns the last `save`.
#[async_trait::async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, source: &str) -> Result<Option<Watermark>>;
    async fn save(&self, source: &str, wm: &Watermark) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    inner: Mutex<HashMap<String, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, source: &str) -> Result<Option<Watermark>> {
        Ok(self.inner.lock().await.get(source).cloned())
    }

    async fn save(&self, source: &str, wm: &Watermark) -> Result<()> {
        self.inner.lock().await.insert(source.to_string(), wm.clone());
        Ok(())
    }
}

/// All sources in one JSON document, replaced atomically (write temp, rename).
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Watermark>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing watermarks from {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

#[async_trait::async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self, source: &str) -> Result<Option<Watermark>> {
        let _g = self.lock.lock().await;
        Ok(self.read_all().await?.remove(source))
    }

    async fn save(&self, source: &str, wm: &Watermark) -> Result<()> {
        let _g = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(source.to_string(), wm.clone());

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&all)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Read/advance interface over a [`WatermarkStore`].
pub struct WatermarkTracker<S: ?Sized> {
    store: std::sync::Arc<S>,
}

impl<S: WatermarkStore + ?Sized> WatermarkTracker<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }

    pub async fn current(&self, source: &str) -> Result<Watermark> {
        Ok(self.store.load(source).await?.unwrap_or_default())
    }

    /// `[position, now)` once a watermark exists, `[now - lookback, now)` before that.
    pub async fn window_for(
        &self,
        source: &str,
        now: DateTime<Utc>,
        lookback_days: u32,
    ) -> Result<CollectionWindow> {
        let wm = self.current(source).await?;
        Ok(match wm.position {
            Some(pos) => CollectionWindow::new(pos.min(now), now),
            None => CollectionWindow::lookback(now, lookback_days),
        })
    }

    /// Records not yet delivered, deduplicated by id, ordered by `(occurred_at, external_id)`.
    pub async fn filter_new(
        &self,
        source: &str,
        records: Vec<NormalizedRecord>,
    ) -> Result<Vec<NormalizedRecord>> {
        let wm = self.current(source).await?;
        let mut out: Vec<NormalizedRecord> = records
            .into_iter()
            .filter(|r| !wm.is_delivered(&r.external_id, r.occurred_at))
            .collect();
        out.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        let mut seen = HashSet::new();
        out.retain(|r| seen.insert(r.external_id.clone()));
        Ok(out)
    }

    /// Persist progress after a confirmed delivery. A no-op for the position when
    /// `up_to` is behind it.
    pub async fn advance(
        &self,
        source: &str,
        up_to: DateTime<Utc>,
        confirmed: &[(String, DateTime<Utc>)],
    ) -> Result<Watermark> {
        let mut wm = self.current(source).await?;
        let before = wm.clone();
        wm.advance(up_to, confirmed);
        if wm != before {
            self.store.save(source, &wm).await?;
        }
        Ok(wm)
    }
}
