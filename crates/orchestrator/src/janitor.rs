//! Stuck-claim / stuck-queued reaper (spec §4.4, §5).
//!
//! Generalizes the teacher's `ScheduleRunner::tick` (`runtime/schedule_runner.rs`:
//! one async method invoked "every tick (30s)", spawned as its own task)
//! from "fire scheduled runs" to "reclaim issues a crashed worker left
//! mid-turn" — same shape, different sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use relay_domain::config::OrchestratorConfig;
use relay_domain::trace::TraceEvent;
use relay_domain::Result;
use relay_stores::IssueStore;

pub struct Janitor<S> {
    stores: Arc<S>,
    config: OrchestratorConfig,
}

impl<S> Janitor<S>
where
    S: IssueStore + Send + Sync + 'static,
{
    pub fn new(stores: Arc<S>, config: OrchestratorConfig) -> Self {
        Self { stores, config }
    }

    /// One sweep: resets any `claimed` row whose claim has outlived
    /// `stuck_duration_secs`, and any `queued` row that was never
    /// claimed within `queued_stuck_duration_secs`, back to `idle`
    /// (spec §4.4: "the janitor only ever resets to idle — it never
    /// re-enqueues; a subsequent claim attempt self-heals the
    /// `queued`/`claimed` transition").
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let mut reclaimed = 0;

        let stuck_claimed_cutoff =
            now - chrono::Duration::seconds(self.config.stuck_duration_secs);
        for issue in self.stores.list_stuck_claimed(stuck_claimed_cutoff).await? {
            let claimed_for_ms = issue
                .claimed_at
                .map(|t| (now - t).num_milliseconds())
                .unwrap_or(0);
            self.stores.reset_to_idle(issue.id).await?;
            TraceEvent::StuckClaimReclaimed {
                issue_id: issue.id,
                claimed_for_ms,
            }
            .emit();
            reclaimed += 1;
        }

        let stuck_queued_cutoff =
            now - chrono::Duration::seconds(self.config.queued_stuck_duration_secs);
        for issue in self.stores.list_stuck_queued(stuck_queued_cutoff).await? {
            self.stores.reset_to_idle(issue.id).await?;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Spawns the sweep loop at `janitor_interval_secs`, logging (never
    /// propagating) a failed sweep so one bad tick doesn't kill the loop.
    pub fn spawn_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.janitor_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "janitor sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use relay_domain::issue::{Issue, ProcessingStatus, SpecStatus};
    use relay_stores::mem::MemStores;

    fn issue(id: i64, status: ProcessingStatus) -> Issue {
        let now = Utc::now();
        Issue {
            id,
            integration_id: 1,
            external_issue_id: format!("{id}"),
            external_project_id: "1".to_string(),
            provider: "gitlab".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            labels: vec![],
            assignees: vec![],
            reporter: "alice".to_string(),
            external_url: "https://example.com".to_string(),
            keywords: vec![],
            code_findings: vec![],
            processing_status: status,
            claimed_at: if status == ProcessingStatus::Claimed {
                Some(now - ChronoDuration::seconds(600))
            } else {
                None
            },
            queued_at: if status == ProcessingStatus::Queued {
                Some(now - ChronoDuration::seconds(3600))
            } else {
                None
            },
            spec: None,
            spec_status: SpecStatus::None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reclaims_a_stuck_claimed_issue() {
        let stores = Arc::new(MemStores::new());
        stores.seed_issue(issue(1, ProcessingStatus::Claimed)).await;
        let janitor = Janitor::new(stores.clone(), OrchestratorConfig::default());

        let reclaimed = janitor.tick().await.unwrap();
        assert_eq!(reclaimed, 1);

        let after = stores.get(1).await.unwrap().unwrap();
        assert_eq!(after.processing_status, ProcessingStatus::Idle);
        assert!(after.claimed_at.is_none());
    }

    #[tokio::test]
    async fn reclaims_a_stuck_queued_issue() {
        let stores = Arc::new(MemStores::new());
        stores.seed_issue(issue(2, ProcessingStatus::Queued)).await;
        let janitor = Janitor::new(stores.clone(), OrchestratorConfig::default());

        let reclaimed = janitor.tick().await.unwrap();
        assert_eq!(reclaimed, 1);

        let after = stores.get(2).await.unwrap().unwrap();
        assert_eq!(after.processing_status, ProcessingStatus::Idle);
    }

    #[tokio::test]
    async fn leaves_a_freshly_claimed_issue_alone() {
        let stores = Arc::new(MemStores::new());
        let mut fresh = issue(3, ProcessingStatus::Claimed);
        fresh.claimed_at = Some(Utc::now());
        stores.seed_issue(fresh).await;
        let janitor = Janitor::new(stores.clone(), OrchestratorConfig::default());

        let reclaimed = janitor.tick().await.unwrap();
        assert_eq!(reclaimed, 0);

        let after = stores.get(3).await.unwrap().unwrap();
        assert_eq!(after.processing_status, ProcessingStatus::Claimed);
    }
}
