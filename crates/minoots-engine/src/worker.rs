//! Deterministic worker-slot assignment.
//!
//! Hashes `team_id || ":" || timer_id` modulo the configured worker count to
//! produce a stable `worker-k` label. The engine treats the slot as an
//! opaque label only — no component filters sweeps by it, though it's
//! available as a partition label for deployments that want to shard
//! sweep work across processes.

use std::hash::{Hash, Hasher};

use std::collections::hash_map::DefaultHasher;

/// Default worker shard count when not configured.
pub const DEFAULT_WORKER_COUNT: i64 = 5;

/// Computes the deterministic worker slot for a timer.
///
/// `worker_count <= 0` collapses to a single slot, `worker-0`.
pub fn assign_worker(team_id: Option<&str>, timer_id: &str, worker_count: i64) -> String {
    if worker_count <= 0 {
        return "worker-0".to_string();
    }

    let key = format!("{}:{}", team_id.unwrap_or(""), timer_id);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let slot = (hasher.finish() % worker_count as u64) as i64;
    format!("worker-{slot}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let a = assign_worker(Some("team-A"), "t1", 5);
        let b = assign_worker(Some("team-A"), "t1", 5);
        assert_eq!(a, b);
    }

    #[test]
    fn collapses_to_single_slot_for_non_positive_count() {
        assert_eq!(assign_worker(Some("team-A"), "t1", 0), "worker-0");
        assert_eq!(assign_worker(Some("team-A"), "t1", -3), "worker-0");
    }

    #[test]
    fn slot_is_within_range() {
        for i in 0..50 {
            let id = format!("t{i}");
            let slot = assign_worker(Some("team-A"), &id, 5);
            let k: i64 = slot.strip_prefix("worker-").unwrap().parse().unwrap();
            assert!((0..5).contains(&k));
        }
    }
}
