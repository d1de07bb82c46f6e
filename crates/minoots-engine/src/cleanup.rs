//! Expired-timer cleanup. Removes only
//! the `Timer` record for a terminal, aged-out expiration; logs, team
//! metrics, and replay rows are untouched, matching [`crate::cascade`]'s
//! non-cascaded delete and keeping the audit trail intact after the timer
//! itself is gone.

use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::DurableStore;

/// One tick of the cleanup task: deletes every `expired` timer whose
/// `end_time_ms` is older than `max_age_ms`.
pub async fn cleanup_expired_timers(
    store: &dyn DurableStore,
    clock: &dyn Clock,
    max_age_ms: i64,
) -> Result<usize> {
    let older_than_ms = clock.now_ms() - max_age_ms;
    let ids = store.purgeable_expired_timers(older_than_ms).await?;
    for id in &ids {
        store.delete_timer(id).await?;
    }
    if !ids.is_empty() {
        info!(count = ids.len(), "purged expired timers past retention");
    }
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::lifecycle::create_timer;
    use crate::store::InMemoryStore;
    use crate::timer::{TimerConfig, TimerStatus};
    use serde_json::json;

    #[tokio::test]
    async fn only_aged_out_expired_timers_are_purged() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);

        let still_running = create_timer(
            &store,
            &clock,
            5,
            TimerConfig {
                duration: Some(json!("10ms")),
..Default::default()
            },
        )
.await
.unwrap();

        let mut fresh_expired = store.get_timer(&still_running.id).await.unwrap().unwrap();
        fresh_expired.status = TimerStatus::Expired;
        fresh_expired.end_time_ms = Some(0);
        fresh_expired.id = "fresh-expired".to_string();
        store.put_timer(fresh_expired).await.unwrap();

        let mut old_expired = store.get_timer(&still_running.id).await.unwrap().unwrap();
        old_expired.status = TimerStatus::Expired;
        old_expired.end_time_ms = Some(-100_000);
        old_expired.id = "old-expired".to_string();
        store.put_timer(old_expired).await.unwrap();

        clock.set(24 * 60 * 60 * 1000);
        let purged = cleanup_expired_timers(&store, &clock, 24 * 60 * 60 * 1000).await.unwrap();

        assert_eq!(purged, 1);
        assert!(store.get_timer("old-expired").await.unwrap().is_none());
        assert!(store.get_timer("fresh-expired").await.unwrap().is_some());
        assert!(store.get_timer(&still_running.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_does_not_touch_logs_or_metrics() {
        let store = InMemoryStore::new();
        let clock = TestClock::new(0);

        let timer = create_timer(
            &store,
            &clock,
            5,
            TimerConfig {
                duration: Some(json!("10ms")),
..Default::default()
            },
        )
.await
.unwrap();

        store
.append_event(crate::store::TimerEventLogEntry {
                id: 0,
                timer_id: timer.id.clone(),
                event: crate::store::TimerEventKind::Activated,
                team_id: None,
                attempt: None,
                delay_ms: None,
                failure_reason: None,
                timestamp_ms: 0,
            })
.await
.unwrap();

        let mut expired = store.get_timer(&timer.id).await.unwrap().unwrap();
        expired.status = TimerStatus::Expired;
        expired.end_time_ms = Some(-100_000);
        store.put_timer(expired).await.unwrap();

        clock.set(24 * 60 * 60 * 1000);
        cleanup_expired_timers(&store, &clock, 24 * 60 * 60 * 1000).await.unwrap();

        assert!(store.get_timer(&timer.id).await.unwrap().is_none());
        assert_eq!(store.list_events(&timer.id).await.unwrap().len(), 1);
    }
}
