//! Per-wallet dedup cursors.
//!
//! The registry hands out exactly one [`Watermark`] per address; the monitor
//! that claims it is the only writer. An optional [`WatermarkStore`] mirrors
//! advances to a JSON file so a restart does not replay the last batch.

use anyhow::{Context, Result};
use log::warn;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
pub struct Watermark {
    address: String,
    last: Option<u64>,
    store: Option<Arc<WatermarkStore>>,
}

impl Watermark {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            last: None,
            store: None,
        }
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// True when `slot` has not been processed yet.
    pub fn is_new(&self, slot: u64) -> bool {
        self.last.is_none_or(|w| slot > w)
    }

    /// Move the cursor forward. Lower or equal slots are ignored, so the
    /// watermark never decreases. Returns whether it moved.
    pub fn advance(&mut self, slot: u64) -> bool {
        if !self.is_new(slot) {
            return false;
        }
        self.last = Some(slot);

        if let Some(store) = &self.store {
            if let Err(e) = store.record(&self.address, slot) {
                warn!("watermark persist failed address={} slot={slot}: {e:?}", self.address);
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct WatermarkRegistry {
    seeds: HashMap<String, u64>,
    claimed: HashSet<String>,
    store: Option<Arc<WatermarkStore>>,
}

impl WatermarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<WatermarkStore>) -> Self {
        Self {
            seeds: store.snapshot().into_iter().collect(),
            claimed: HashSet::new(),
            store: Some(store),
        }
    }

    /// Hand out the entry for `address`. A second claim for the same address
    /// returns `None`.
    pub fn claim(&mut self, address: &str) -> Option<Watermark> {
        if !self.claimed.insert(address.to_string()) {
            return None;
        }

        let mut watermark = Watermark::new(address);
        watermark.last = self.seeds.get(address).copied();
        watermark.store = self.store.clone();
        Some(watermark)
    }
}

/// JSON file of `{address: slot}`, rewritten through a temp file on each advance.
///
/// The write runs inline, under the lock, on the calling worker. It is one
/// small file written at most once per wallet per poll cycle, and holding the
/// lock across the rename keeps an older snapshot from landing after a newer one.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    slots: Mutex<BTreeMap<String, u64>>,
}

impl WatermarkStore {
    pub fn open(path: &Path) -> Result<Self> {
        let slots = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading watermark file {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing watermark file {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            slots: Mutex::new(slots),
        })
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, address: &str, slot: u64) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = slots.entry(address.to_string()).or_insert(slot);
        *entry = (*entry).max(slot);

        let json = serde_json::to_string_pretty(&*slots)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// `<file name>.tmp` next to the target, never the target itself.
    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}
