//! Append-only, time-indexed storage of traffic samples.
//!
//! Samples are keyed by `(route_id, timestamp)` and immutable once accepted.
//! Readers copy the slice they need out under a short read lock and compute
//! lock-free afterwards, so every query sees one consistent snapshot and a
//! bulk batch is either fully visible or not at all.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{CongestionLevel, classify};
use crate::config::ClassifierThresholds;
use crate::error::{Error, Result};
use crate::registry::RouteRegistry;

/// A single accepted traffic measurement for a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficSample {
    pub route_id: String,
    pub timestamp: DateTime<Utc>,
    pub avg_speed: f64,
    pub vehicle_count: u64,
    pub congestion_index: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weather_condition: Option<String>,
    pub temperature: Option<f64>,
}

impl TrafficSample {
    /// The discrete congestion level, recomputed from the index on every
    /// read so it can never go stale.
    pub fn level(&self, thresholds: &ClassifierThresholds) -> CongestionLevel {
        classify(self.congestion_index, thresholds)
    }

    /// Serializable projection of the sample with its derived level.
    pub fn view(&self, thresholds: &ClassifierThresholds) -> SampleView {
        SampleView {
            sample: self.clone(),
            congestion_level: self.level(thresholds),
        }
    }
}

/// Sample plus its derived congestion level, the shape handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SampleView {
    #[serde(flatten)]
    pub sample: TrafficSample,
    pub congestion_level: CongestionLevel,
}

/// Ingestion input. Required fields are optional here so that "missing" is
/// expressible when decoding CSV or JSON; validation promotes a draft to a
/// [`TrafficSample`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SampleDraft {
    pub route_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub avg_speed: Option<f64>,
    pub vehicle_count: Option<u64>,
    pub congestion_index: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weather_condition: Option<String>,
    pub temperature: Option<f64>,
}

impl SampleDraft {
    /// Checks required fields and range invariants.
    fn validate(self) -> Result<TrafficSample> {
        let route_id = match self.route_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(Error::Validation("route_id is required".into())),
        };
        let timestamp = self
            .timestamp
            .ok_or_else(|| Error::Validation("timestamp is required".into()))?;
        let avg_speed = self
            .avg_speed
            .ok_or_else(|| Error::Validation("avg_speed is required".into()))?;
        let vehicle_count = self
            .vehicle_count
            .ok_or_else(|| Error::Validation("vehicle_count is required".into()))?;
        let congestion_index = self
            .congestion_index
            .ok_or_else(|| Error::Validation("congestion_index is required".into()))?;

        if !avg_speed.is_finite() || avg_speed < 0.0 {
            return Err(Error::Validation(format!(
                "avg_speed must be a non-negative number, got {avg_speed}"
            )));
        }
        if !congestion_index.is_finite() || !(0.0..=100.0).contains(&congestion_index) {
            return Err(Error::Validation(format!(
                "congestion_index must be within [0,100], got {congestion_index}"
            )));
        }

        Ok(TrafficSample {
            route_id,
            timestamp,
            avg_speed,
            vehicle_count,
            congestion_index,
            latitude: self.latitude,
            longitude: self.longitude,
            weather_condition: self.weather_condition,
            temperature: self.temperature,
        })
    }
}

/// Result of a committed bulk batch.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub attempted: usize,
    pub inserted: usize,
}

/// One page of samples in timestamp order. `page` is 1-based.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

type SampleKey = (String, DateTime<Utc>);

struct StoredSample {
    sample: Arc<TrafficSample>,
    seq: u64,
}

#[derive(Default)]
struct StoreInner {
    samples: BTreeMap<SampleKey, StoredSample>,
    seq: u64,
}

/// The append-only sample store. Route existence is resolved through the
/// injected registry; no process-wide state.
pub struct SampleStore {
    registry: Arc<dyn RouteRegistry>,
    inner: RwLock<StoreInner>,
}

impl SampleStore {
    pub fn new(registry: Arc<dyn RouteRegistry>) -> Self {
        Self {
            registry,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Validates and appends a single sample, returning the stored record.
    pub async fn ingest(&self, draft: SampleDraft) -> Result<Arc<TrafficSample>> {
        let sample = draft.validate()?;
        self.check_route(&sample.route_id).await?;

        let mut inner = self.inner.write().expect("sample store lock poisoned");
        let key = (sample.route_id.clone(), sample.timestamp);
        if inner.samples.contains_key(&key) {
            warn!(
                route_id = %sample.route_id,
                timestamp = %sample.timestamp,
                "Rejecting duplicate sample"
            );
            return Err(Error::Conflict {
                route_id: sample.route_id,
                timestamp: sample.timestamp,
            });
        }

        let stored = Arc::new(sample);
        inner.seq += 1;
        let seq = inner.seq;
        inner.samples.insert(
            key,
            StoredSample {
                sample: stored.clone(),
                seq,
            },
        );
        debug!(route_id = %stored.route_id, seq, "Sample appended");
        Ok(stored)
    }

    /// Validates an entire batch before committing any of it.
    ///
    /// All-or-nothing: the first failing record aborts the batch and nothing
    /// is persisted. The error reports the attempted count, how many records
    /// would have succeeded, and the zero-based index plus reason of the
    /// first failure. The commit happens under a single write lock, so
    /// readers never observe a partially-applied batch.
    pub async fn bulk_ingest(&self, drafts: Vec<SampleDraft>) -> Result<BulkOutcome> {
        let attempted = drafts.len();

        // Field validation and registry checks happen before the lock.
        let mut samples: Vec<Option<TrafficSample>> = Vec::with_capacity(attempted);
        let mut failures: Vec<(usize, Error)> = Vec::new();
        for (idx, draft) in drafts.into_iter().enumerate() {
            match draft.validate() {
                Ok(sample) => match self.check_route(&sample.route_id).await {
                    Ok(()) => samples.push(Some(sample)),
                    Err(e) => {
                        failures.push((idx, e));
                        samples.push(None);
                    }
                },
                Err(e) => {
                    failures.push((idx, e));
                    samples.push(None);
                }
            }
        }

        let mut inner = self.inner.write().expect("sample store lock poisoned");

        // Conflict checks against the store and within the batch itself.
        let mut batch_keys: HashSet<SampleKey> = HashSet::new();
        for (idx, slot) in samples.iter().enumerate() {
            if let Some(sample) = slot {
                let key = (sample.route_id.clone(), sample.timestamp);
                if inner.samples.contains_key(&key) || !batch_keys.insert(key) {
                    failures.push((idx, Error::Conflict {
                        route_id: sample.route_id.clone(),
                        timestamp: sample.timestamp,
                    }));
                }
            }
        }

        if !failures.is_empty() {
            // Each index fails at most once: a record either fails
            // validation/registry resolution or reaches the conflict check.
            let valid = attempted - failures.len();
            failures.sort_by_key(|(idx, _)| *idx);
            let (index, reason) = failures.remove(0);
            warn!(attempted, valid, index, reason = %reason, "Bulk batch rejected");
            return Err(Error::BulkRejected {
                attempted,
                valid,
                index,
                reason: Box::new(reason),
            });
        }

        for sample in samples.into_iter().flatten() {
            let key = (sample.route_id.clone(), sample.timestamp);
            inner.seq += 1;
            let seq = inner.seq;
            inner.samples.insert(
                key,
                StoredSample {
                    sample: Arc::new(sample),
                    seq,
                },
            );
        }

        debug!(attempted, "Bulk batch committed");
        Ok(BulkOutcome {
            attempted,
            inserted: attempted,
        })
    }

    /// Samples with `start <= timestamp < end`, optionally restricted to one
    /// route, ordered by timestamp ascending. Half-open bounds keep adjacent
    /// windows from double-counting boundary samples.
    pub fn query_range(
        &self,
        route_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Arc<TrafficSample>> {
        let inner = self.inner.read().expect("sample store lock poisoned");

        let mut hits: Vec<&StoredSample> = Vec::new();
        match route_id {
            Some(rid) => {
                let lo = (rid.to_string(), start);
                let hi = (rid.to_string(), end);
                hits.extend(inner.samples.range(lo..hi).map(|(_, stored)| stored));
            }
            None => {
                hits.extend(inner.samples.values().filter(|stored| {
                    let ts = stored.sample.timestamp;
                    ts >= start && ts < end
                }));
            }
        }

        hits.sort_by_key(|s| (s.sample.timestamp, s.seq));
        hits.into_iter().map(|s| s.sample.clone()).collect()
    }

    /// Samples with `timestamp >= start`, the trailing-window read.
    pub fn query_since(&self, route_id: Option<&str>, start: DateTime<Utc>) -> Vec<Arc<TrafficSample>> {
        self.query_range(route_id, start, DateTime::<Utc>::MAX_UTC)
    }

    /// Samples from the trailing `hours` window relative to `now`.
    pub fn window(
        &self,
        route_id: Option<&str>,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Vec<Arc<TrafficSample>> {
        self.query_since(route_id, now - TimeDelta::hours(hours))
    }

    /// For every route with at least one sample, its most recent sample.
    /// Timestamp ties resolve to the most recently appended record; rows are
    /// ordered by `route_id` ascending.
    pub fn latest_per_route(&self) -> Vec<Arc<TrafficSample>> {
        let inner = self.inner.read().expect("sample store lock poisoned");

        let mut best: BTreeMap<&str, &StoredSample> = BTreeMap::new();
        for ((route_id, _), stored) in inner.samples.iter() {
            best.entry(route_id.as_str())
                .and_modify(|b| {
                    if (stored.sample.timestamp, stored.seq) > (b.sample.timestamp, b.seq) {
                        *b = stored;
                    }
                })
                .or_insert(stored);
        }
        best.into_values().map(|s| s.sample.clone()).collect()
    }

    /// One page of samples, timestamp ascending, optionally per route.
    /// `page` is 1-based.
    pub fn paginate(
        &self,
        route_id: Option<&str>,
        page: usize,
        limit: usize,
    ) -> Page<Arc<TrafficSample>> {
        let all = self.query_range(
            route_id,
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
        );
        let total = all.len();
        let limit = limit.max(1);
        let page = page.max(1);
        let total_pages = total.div_ceil(limit);
        let data = all
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();

        Page {
            data,
            page,
            limit,
            total,
            total_pages,
        }
    }

    /// Every sample currently retained, timestamp ascending.
    pub fn all(&self) -> Vec<Arc<TrafficSample>> {
        self.query_range(None, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("sample store lock poisoned")
            .samples
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic insertion counter; advances on every accepted sample, so it
    /// doubles as a cheap change detector for caches.
    pub fn version(&self) -> u64 {
        self.inner.read().expect("sample store lock poisoned").seq
    }

    async fn check_route(&self, route_id: &str) -> Result<()> {
        match self.registry.get(route_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(route_id.to_string())),
        }
    }
}
