use std::sync::Arc;

use models::Registration;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::health::{TierHealth, TierHealthSnapshot};
use super::{RegistrationBackend, Tier};
use crate::observability::{record_read, record_write, REGISTRATIONS_STORED};

/// Result of a facade read.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub success: bool,
    pub data: Vec<Registration>,
    pub message: String,
    /// Tier that answered, if any.
    pub source: Option<Tier>,
}

/// Result of a facade write.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub message: String,
    pub accepted: Vec<Tier>,
}

/// Single entry point for reading and writing the registration collection.
///
/// Backends are kept in read-priority order (Edge Config, Blob, Local).
/// Reads walk that order; writes walk it backwards so the cheap local copy
/// is always written first. The last backend is the tier of last resort and
/// is never skipped. A tier that fails a write another tier accepted is
/// marked stale and left out of reads until a later write reaches it.
pub struct StorageFacade {
    backends: Vec<Arc<dyn RegistrationBackend>>,
    health: Arc<TierHealth>,
}

impl StorageFacade {
    pub fn new(mut backends: Vec<Arc<dyn RegistrationBackend>>, health: Arc<TierHealth>) -> Self {
        backends.sort_by_key(|b| b.tier());
        Self { backends, health }
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.backends.iter().map(|b| b.tier()).collect()
    }

    pub fn health(&self) -> &Arc<TierHealth> {
        &self.health
    }

    fn is_last(&self, index: usize) -> bool {
        index + 1 == self.backends.len()
    }

    pub async fn get_registrations(&self) -> LoadOutcome {
        let mut errors: Vec<String> = Vec::new();
        let mut empty_tier: Option<Tier> = None;

        for (i, backend) in self.backends.iter().enumerate() {
            let tier = backend.tier();
            if !self.is_last(i) && !self.health.should_read(tier).await {
                debug!(%tier, "skipping unhealthy tier for read");
                continue;
            }
            match backend.load().await {
                Ok(Some(data)) => {
                    self.health.record_success(tier).await;
                    record_read(tier.as_str(), true);
                    debug!(%tier, count = data.len(), "registrations loaded");
                    return LoadOutcome {
                        success: true,
                        message: format!("loaded {} registrations from {}", data.len(), tier),
                        data,
                        source: Some(tier),
                    };
                }
                Ok(None) => {
                    // not found is an empty collection at this tier, not a failure
                    self.health.record_success(tier).await;
                    record_read(tier.as_str(), true);
                    empty_tier.get_or_insert(tier);
                }
                Err(e) => {
                    record_read(tier.as_str(), false);
                    if e.is_size_limit() {
                        self.health.mark_unavailable(tier).await;
                    } else {
                        self.health.record_failure(tier).await;
                    }
                    warn!(%tier, error = %e, "registration read failed; falling back");
                    errors.push(format!("{tier}: {e}"));
                }
            }
        }

        match empty_tier {
            Some(tier) => LoadOutcome {
                success: true,
                data: Vec::new(),
                message: "no registrations stored yet".into(),
                source: Some(tier),
            },
            None => LoadOutcome {
                success: false,
                data: Vec::new(),
                message: format!("all storage tiers failed: {}", errors.join("; ")),
                source: None,
            },
        }
    }

    pub async fn save_registrations(&self, registrations: &[Registration]) -> SaveOutcome {
        let mut accepted = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut size_limited: Option<Tier> = None;
        let mut missed: Vec<Tier> = Vec::new();

        for backend in self.backends.iter().rev() {
            let tier = backend.tier();
            if !self.health.should_write(tier).await {
                debug!(%tier, "skipping unavailable tier for write");
                continue;
            }
            match backend.store(registrations).await {
                Ok(()) => {
                    self.health.record_write_success(tier).await;
                    record_write(tier.as_str(), true);
                    accepted.push(tier);
                }
                Err(e) if e.is_size_limit() => {
                    record_write(tier.as_str(), false);
                    warn!(%tier, error = %e, count = registrations.len(), "tier refused collection size; disabling it");
                    self.health.mark_unavailable(tier).await;
                    size_limited = Some(tier);
                }
                Err(e) => {
                    record_write(tier.as_str(), false);
                    self.health.record_failure(tier).await;
                    warn!(%tier, error = %e, "registration write failed");
                    errors.push(format!("{tier}: {e}"));
                    missed.push(tier);
                }
            }
        }

        if accepted.is_empty() {
            return SaveOutcome {
                success: false,
                message: format!("no storage tier accepted the write: {}", errors.join("; ")),
                accepted,
            };
        }

        // tiers that missed this write must not serve reads until they catch up
        for tier in missed {
            self.health.mark_stale(tier).await;
        }

        REGISTRATIONS_STORED.set(registrations.len() as i64);
        let tiers = accepted.iter().map(Tier::as_str).collect::<Vec<_>>().join(", ");
        let message = match size_limited {
            Some(tier) => format!("saved to {tiers}; {tier} size limit reached and disabled"),
            None => format!("saved to {tiers}"),
        };
        info!(count = registrations.len(), accepted = %tiers, "registrations saved");
        SaveOutcome { success: true, message, accepted }
    }

    pub async fn reset_health(&self) {
        self.health.reset().await;
    }

    pub async fn health_snapshot(&self) -> Vec<TierHealthSnapshot> {
        self.health.snapshot(&self.tiers()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::health::TierStatus;
    use crate::test_support::{registration, MemoryBackend};

    fn facade(
        threshold: u32,
        backends: Vec<Arc<MemoryBackend>>,
    ) -> StorageFacade {
        let dyns: Vec<Arc<dyn RegistrationBackend>> =
            backends.into_iter().map(|b| b as Arc<dyn RegistrationBackend>).collect();
        StorageFacade::new(dyns, Arc::new(TierHealth::new(threshold)))
    }

    fn ids(regs: &[Registration]) -> Vec<String> {
        let mut v: Vec<_> = regs.iter().map(|r| r.registration_id.clone()).collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn save_then_load_round_trips_ids() {
        let edge = MemoryBackend::new(Tier::EdgeConfig);
        let local = MemoryBackend::new(Tier::Local);
        let f = facade(3, vec![local.clone(), edge.clone()]);

        let regs = vec![registration("a"), registration("b")];
        let saved = f.save_registrations(&regs).await;
        assert!(saved.success);
        assert_eq!(saved.accepted, vec![Tier::Local, Tier::EdgeConfig]);

        let loaded = f.get_registrations().await;
        assert!(loaded.success);
        assert_eq!(loaded.source, Some(Tier::EdgeConfig));
        assert_eq!(ids(&loaded.data), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn edge_failure_falls_back_and_bypasses_after_threshold() {
        let edge = MemoryBackend::new(Tier::EdgeConfig);
        let blob = MemoryBackend::new(Tier::Blob);
        let local = MemoryBackend::with_data(Tier::Local, vec![registration("l1")]);
        edge.fail_reads(true);
        let f = facade(2, vec![edge.clone(), blob.clone(), local.clone()]);

        // blob empty, local has data
        let first = f.get_registrations().await;
        assert!(first.success);
        assert_eq!(first.source, Some(Tier::Local));
        assert_eq!(edge.read_count(), 1);

        f.get_registrations().await;
        assert_eq!(edge.read_count(), 2);
        assert_eq!(f.health().status(Tier::EdgeConfig).await, TierStatus::Degraded);

        // threshold reached: edge no longer consulted for reads
        f.get_registrations().await;
        assert_eq!(edge.read_count(), 2);

        // a successful write through edge resets the counter
        edge.fail_reads(false);
        assert!(f.save_registrations(&[registration("n")]).await.success);
        assert_eq!(f.health().consecutive_failures(Tier::EdgeConfig).await, 0);
        let again = f.get_registrations().await;
        assert_eq!(again.source, Some(Tier::EdgeConfig));
        assert_eq!(edge.read_count(), 3);
    }

    #[tokio::test]
    async fn size_limit_write_counts_as_success_and_disables_edge() {
        let edge = MemoryBackend::new(Tier::EdgeConfig);
        let local = MemoryBackend::new(Tier::Local);
        edge.size_limit(true);
        let f = facade(3, vec![edge.clone(), local.clone()]);

        let out = f.save_registrations(&[registration("big")]).await;
        assert!(out.success);
        assert_eq!(out.accepted, vec![Tier::Local]);
        assert!(out.message.contains("size limit"));
        assert_eq!(f.health().status(Tier::EdgeConfig).await, TierStatus::Unavailable);

        // subsequent writes and reads leave edge alone
        f.save_registrations(&[registration("big")]).await;
        assert_eq!(edge.write_count(), 1);
        let loaded = f.get_registrations().await;
        assert_eq!(loaded.source, Some(Tier::Local));
        assert_eq!(edge.read_count(), 0);

        f.reset_health().await;
        assert_eq!(f.health().status(Tier::EdgeConfig).await, TierStatus::Healthy);
    }

    #[tokio::test]
    async fn write_succeeds_if_any_tier_accepts() {
        let edge = MemoryBackend::new(Tier::EdgeConfig);
        let local = MemoryBackend::new(Tier::Local);
        local.fail_writes(true);
        let f = facade(3, vec![edge.clone(), local.clone()]);
        let out = f.save_registrations(&[registration("a")]).await;
        assert!(out.success);
        assert_eq!(out.accepted, vec![Tier::EdgeConfig]);

        edge.fail_writes(true);
        let out = f.save_registrations(&[registration("a")]).await;
        assert!(!out.success);
        assert!(out.accepted.is_empty());
    }

    #[tokio::test]
    async fn tier_that_missed_a_write_is_not_read_until_it_catches_up() {
        let edge = MemoryBackend::with_data(Tier::EdgeConfig, vec![registration("existing")]);
        let local = MemoryBackend::new(Tier::Local);
        edge.fail_writes(true);
        let f = facade(3, vec![edge.clone(), local.clone()]);

        let first = f.get_registrations().await;
        assert_eq!(first.source, Some(Tier::EdgeConfig));
        let mut regs = first.data;
        regs.push(registration("a"));
        let out = f.save_registrations(&regs).await;
        assert!(out.success);
        assert_eq!(out.accepted, vec![Tier::Local]);
        assert_eq!(f.health().status(Tier::EdgeConfig).await, TierStatus::Stale);

        // the stale edge copy is skipped; local has the write
        let reads_before = edge.read_count();
        let loaded = f.get_registrations().await;
        assert_eq!(loaded.source, Some(Tier::Local));
        assert_eq!(ids(&loaded.data), vec!["a", "existing"]);
        assert_eq!(edge.read_count(), reads_before);

        // once edge accepts a write it serves reads again
        edge.fail_writes(false);
        regs.push(registration("b"));
        assert_eq!(f.save_registrations(&regs).await.accepted, vec![Tier::Local, Tier::EdgeConfig]);
        let loaded = f.get_registrations().await;
        assert_eq!(loaded.source, Some(Tier::EdgeConfig));
        assert_eq!(ids(&loaded.data), vec!["a", "b", "existing"]);
    }

    #[tokio::test]
    async fn not_found_everywhere_is_empty_success() {
        let f = facade(3, vec![MemoryBackend::new(Tier::EdgeConfig), MemoryBackend::new(Tier::Local)]);
        let loaded = f.get_registrations().await;
        assert!(loaded.success);
        assert!(loaded.data.is_empty());
        assert_eq!(loaded.source, Some(Tier::EdgeConfig));
    }

    #[tokio::test]
    async fn all_tiers_failing_reports_failure() {
        let edge = MemoryBackend::new(Tier::EdgeConfig);
        let local = MemoryBackend::new(Tier::Local);
        edge.fail_reads(true);
        local.fail_reads(true);
        let f = facade(3, vec![edge, local]);
        let loaded = f.get_registrations().await;
        assert!(!loaded.success);
        assert!(loaded.message.contains("edge_config"));
        assert!(loaded.message.contains("local"));
    }

    #[tokio::test]
    async fn local_tier_is_read_even_when_degraded() {
        let local = MemoryBackend::with_data(Tier::Local, vec![registration("a")]);
        let f = facade(1, vec![local.clone()]);
        local.fail_reads(true);
        assert!(!f.get_registrations().await.success);
        local.fail_reads(false);
        let loaded = f.get_registrations().await;
        assert!(loaded.success);
        assert_eq!(local.read_count(), 2);
    }
}
