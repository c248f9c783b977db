//! Matchmaking service - owns the queue and runs the periodic pairing pass

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::queue::{MatchmakingQueue, PairedMatch, QueueEntry, QueueStatus};
use super::LiveMatches;

/// How long a pair may sit in `Ready` before it is discarded
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Matchmaking service
pub struct MatchmakingService {
    queue: Arc<Mutex<MatchmakingQueue>>,
    pairing_interval: Duration,
}

impl MatchmakingService {
    pub fn new(pairing_interval: Duration) -> Self {
        Self {
            queue: Arc::new(Mutex::new(MatchmakingQueue::new(
                pairing_interval,
                READY_TIMEOUT,
            ))),
            pairing_interval,
        }
    }

    /// Join matchmaking queue
    pub async fn join(
        &self,
        identity: &str,
        display_name: &str,
        live: &dyn LiveMatches,
    ) -> CoreResult<QueueStatus> {
        if live.is_in_live_match(identity) {
            return Err(CoreError::conflict("Already in a game"));
        }

        let mut queue = self.queue.lock().await;
        queue.enqueue(QueueEntry::new(identity, display_name))?;

        info!(identity = %identity, queue_size = queue.len(), "Player joined matchmaking queue");

        // Pairing happens on the next pass of run()
        Ok(queue.status(identity))
    }

    /// Leave matchmaking queue
    pub async fn leave(&self, identity: &str) -> bool {
        let removed = self.queue.lock().await.dequeue(identity).is_some();
        if removed {
            info!(identity = %identity, "Player left matchmaking queue");
        }
        removed
    }

    pub async fn status(&self, identity: &str) -> QueueStatus {
        self.queue.lock().await.status(identity)
    }

    pub async fn get_match_for(&self, identity: &str) -> Option<PairedMatch> {
        self.queue.lock().await.match_for(identity).cloned()
    }

    pub async fn get_match(&self, id: Uuid) -> Option<PairedMatch> {
        self.queue.lock().await.get_match(id).cloned()
    }

    /// The hub created the simulation for this pair
    pub async fn mark_playing(&self, id: Uuid) -> bool {
        self.queue.lock().await.mark_playing(id)
    }

    pub async fn remove_match(&self, id: Uuid) -> Option<PairedMatch> {
        let removed = self.queue.lock().await.remove_match(id);
        if removed.is_some() {
            debug!(game_id = %id, "Paired match removed");
        }
        removed
    }

    /// One pairing pass: expire stale pairs, then pair everyone who is free
    pub async fn pairing_pass(&self, live: &dyn LiveMatches) -> Vec<PairedMatch> {
        let mut queue = self.queue.lock().await;

        for stale in queue.expire_stale() {
            info!(
                game_id = %stale.id,
                left = %stale.left.identity,
                right = %stale.right.identity,
                "Paired match expired before anyone connected"
            );
        }

        let paired = queue.pair_waiting(|identity| live.is_in_live_match(identity));
        for m in &paired {
            info!(
                game_id = %m.id,
                left = %m.left.identity,
                right = %m.right.identity,
                waited_ms = m.left.wait_time().as_millis() as u64,
                "Paired players"
            );
        }
        paired
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self, live: Arc<dyn LiveMatches>) {
        let mut interval = tokio::time::interval(self.pairing_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.pairing_pass(live.as_ref()).await;
        }
    }

    pub async fn paired_count(&self) -> usize {
        self.queue.lock().await.paired_count()
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    struct Busy(HashSet<String>);

    impl LiveMatches for Busy {
        fn is_in_live_match(&self, identity: &str) -> bool {
            self.0.contains(identity)
        }
    }

    fn nobody() -> Busy {
        Busy(HashSet::new())
    }

    #[tokio::test]
    async fn test_join_rejects_player_in_live_match() {
        let service = MatchmakingService::new(Duration::from_secs(5));
        let live = Busy(["alice".to_string()].into_iter().collect());

        let err = assert_err!(service.join("alice", "Alice", &live).await);
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(service.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_join_then_leave() {
        let service = MatchmakingService::new(Duration::from_secs(5));

        let status = assert_ok!(service.join("alice", "Alice", &nobody()).await);
        assert!(status.in_queue);
        assert_eq!(status.position, Some(1));
        assert_err!(service.join("alice", "Alice", &nobody()).await);

        assert!(service.leave("alice").await);
        assert!(!service.leave("alice").await);
        assert!(!service.status("alice").await.in_queue);
    }

    #[tokio::test]
    async fn test_pairing_pass_pairs_two_players() {
        let service = MatchmakingService::new(Duration::from_secs(5));
        assert_ok!(service.join("alice", "Alice", &nobody()).await);
        assert_ok!(service.join("bob", "Bob", &nobody()).await);

        let paired = service.pairing_pass(&nobody()).await;
        assert_eq!(paired.len(), 1);

        let m = service.get_match_for("bob").await.unwrap();
        assert_eq!(m.id, paired[0].id);
        assert_eq!(service.status("alice").await.game_id, Some(m.id));
        assert_eq!(service.queue_size().await, 0);

        assert!(service.remove_match(m.id).await.is_some());
        assert!(service.get_match_for("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_pairing_pass_skips_live_players() {
        let service = MatchmakingService::new(Duration::from_secs(5));
        assert_ok!(service.join("alice", "Alice", &nobody()).await);
        assert_ok!(service.join("bob", "Bob", &nobody()).await);

        // Bob got bound to a live game through another route meanwhile
        let live = Busy(["bob".to_string()].into_iter().collect());
        assert!(service.pairing_pass(&live).await.is_empty());
        assert_eq!(service.queue_size().await, 2);
    }
}
