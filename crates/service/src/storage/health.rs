use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    /// Used for reads and writes.
    Healthy,
    /// Failure threshold reached: reads skip the tier, writes still try it.
    Degraded,
    /// Missed a write that a lower tier accepted: its copy is behind, so
    /// reads skip it until it accepts a write again.
    Stale,
    /// Refused a write for size: skipped for reads and writes until reset.
    Unavailable,
}

#[derive(Debug, Clone)]
struct TierState {
    status: TierStatus,
    consecutive_failures: u32,
    total_failures: u64,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
}

impl Default for TierState {
    fn default() -> Self {
        Self {
            status: TierStatus::Healthy,
            consecutive_failures: 0,
            total_failures: 0,
            last_failure: None,
            last_success: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierHealthSnapshot {
    pub tier: Tier,
    pub status: TierStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Per-tier failure counting shared by all requests of one process.
///
/// Injected into the facade instead of living in module-level statics, so
/// tests get an isolated instance. Nothing is persisted across restarts.
#[derive(Debug)]
pub struct TierHealth {
    inner: Mutex<BTreeMap<Tier, TierState>>,
    failure_threshold: u32,
}

impl TierHealth {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub async fn status(&self, tier: Tier) -> TierStatus {
        let inner = self.inner.lock().await;
        inner.get(&tier).map(|s| s.status).unwrap_or(TierStatus::Healthy)
    }

    pub async fn should_read(&self, tier: Tier) -> bool {
        self.status(tier).await == TierStatus::Healthy
    }

    pub async fn should_write(&self, tier: Tier) -> bool {
        self.status(tier).await != TierStatus::Unavailable
    }

    pub async fn consecutive_failures(&self, tier: Tier) -> u32 {
        let inner = self.inner.lock().await;
        inner.get(&tier).map(|s| s.consecutive_failures).unwrap_or(0)
    }

    /// Any success resets the counter and brings a degraded tier back.
    /// A stale tier stays stale; only [`TierHealth::record_write_success`] clears it.
    pub async fn record_success(&self, tier: Tier) {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(tier).or_default();
        if state.status == TierStatus::Degraded {
            info!(%tier, "storage tier recovered");
            state.status = TierStatus::Healthy;
        }
        state.consecutive_failures = 0;
        state.last_success = Some(Utc::now());
        debug!(%tier, status = ?state.status, "storage tier recorded success");
    }

    /// The tier now holds the latest collection.
    pub async fn record_write_success(&self, tier: Tier) {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(tier).or_default();
        if matches!(state.status, TierStatus::Degraded | TierStatus::Stale) {
            info!(%tier, was = ?state.status, "storage tier caught up");
            state.status = TierStatus::Healthy;
        }
        state.consecutive_failures = 0;
        state.last_success = Some(Utc::now());
    }

    /// A lower tier holds newer data than `tier`.
    pub async fn mark_stale(&self, tier: Tier) {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(tier).or_default();
        match state.status {
            TierStatus::Unavailable | TierStatus::Stale => {}
            _ => {
                warn!(%tier, "storage tier missed a write; reads will bypass it");
                state.status = TierStatus::Stale;
            }
        }
    }

    pub async fn record_failure(&self, tier: Tier) {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(tier).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.total_failures += 1;
        state.last_failure = Some(Utc::now());
        if state.status == TierStatus::Healthy && state.consecutive_failures >= self.failure_threshold {
            warn!(%tier, failures = state.consecutive_failures, "storage tier degraded; reads will bypass it");
            state.status = TierStatus::Degraded;
        }
        debug!(%tier, status = ?state.status, count = state.consecutive_failures, "storage tier recorded failure");
    }

    /// Size-limit refusal: the tier stays out until [`TierHealth::reset`].
    pub async fn mark_unavailable(&self, tier: Tier) {
        let mut inner = self.inner.lock().await;
        let state = inner.entry(tier).or_default();
        if state.status != TierStatus::Unavailable {
            warn!(%tier, "storage tier marked unavailable");
        }
        state.status = TierStatus::Unavailable;
        state.total_failures += 1;
        state.last_failure = Some(Utc::now());
    }

    /// Clears counters and the degraded/unavailable flags. A stale tier keeps
    /// its flag: its data is still behind until a write reaches it.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        for (tier, state) in inner.iter_mut() {
            if state.status != TierStatus::Healthy || state.consecutive_failures > 0 {
                info!(%tier, "storage tier health reset");
            }
            if state.status != TierStatus::Stale {
                state.status = TierStatus::Healthy;
            }
            state.consecutive_failures = 0;
        }
    }

    pub async fn snapshot(&self, tiers: &[Tier]) -> Vec<TierHealthSnapshot> {
        let inner = self.inner.lock().await;
        tiers
            .iter()
            .map(|tier| {
                let state = inner.get(tier).cloned().unwrap_or_default();
                TierHealthSnapshot {
                    tier: *tier,
                    status: state.status,
                    consecutive_failures: state.consecutive_failures,
                    total_failures: state.total_failures,
                    last_failure: state.last_failure,
                    last_success: state.last_success,
                }
            })
            .collect()
    }
}
