//! Cascade Delete.

use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::lifecycle::release_dependents;
use crate::store::{DeletionCounts, DeletionMetrics, DurableStore};

/// Options for [`delete_timer`].
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub reason: Option<String>,
    pub cascade: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            reason: None,
            cascade: true,
        }
    }
}

/// Result of a `DeleteTimer` call.
#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub deleted: bool,
    pub counts: DeletionCounts,
    pub team_id: Option<String>,
}

/// `DeleteTimer`: releases dependents first so blockers don't leak — a
/// dependent waiting on this timer sees it terminated — then removes the
/// timer and, if `cascade`, every record that references it.
pub async fn delete_timer(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    timer_id: &str,
    options: DeleteOptions,
) -> Result<DeleteResult> {
    let Some(timer) = store.get_timer(timer_id).await? else {
        return Ok(DeleteResult {
            deleted: false,
            counts: DeletionCounts::default(),
            team_id: None,
        });
    };

    release_dependents(store, clock, timer_id).await?;

    store.delete_timer(timer_id).await?;
    store.delete_expiration(timer_id).await?;

    let mut counts = DeletionCounts::default();
    if options.cascade {
        counts.logs = store.delete_events(timer_id).await?;
        counts.metrics = store.delete_metrics(timer_id).await?;
        counts.replay_entries = store.delete_replay_entries_for_timer(timer_id).await?;
    }

    store
.append_deletion_metrics(DeletionMetrics {
            id: 0,
            timer_id: timer_id.to_string(),
            team_id: timer.team_id.clone(),
            counts: counts.clone(),
            reason: options.reason.clone(),
            triggered_at_ms: clock.now_ms(),
        })
.await?;

    info!(timer_id, cascade = options.cascade, "timer deleted");

    Ok(DeleteResult {
        deleted: true,
        counts,
        team_id: timer.team_id,
    })
}
