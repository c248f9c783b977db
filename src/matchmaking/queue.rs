//! Matchmaking queue implementation

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::game::Identity;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub identity: Identity,
    pub display_name: String,
    pub joined_at: Instant,
}

impl QueueEntry {
    pub fn new(identity: impl Into<Identity>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            joined_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.joined_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairedStatus {
    Waiting,
    Ready,
    Playing,
}

/// Two queued players handed a game id to connect to
#[derive(Debug, Clone)]
pub struct PairedMatch {
    pub id: Uuid,
    pub left: QueueEntry,
    pub right: QueueEntry,
    pub status: PairedStatus,
    pub created_at: Instant,
}

impl PairedMatch {
    pub fn involves(&self, identity: &str) -> bool {
        self.left.identity == identity || self.right.identity == identity
    }
}

/// Where an identity stands in matchmaking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub in_queue: bool,
    /// 1-based position
    pub position: Option<usize>,
    pub estimated_wait_secs: Option<u64>,
    pub game_id: Option<Uuid>,
}

/// The matchmaking queue plus the pairs it has produced
pub struct MatchmakingQueue {
    queue: VecDeque<QueueEntry>,
    matches: HashMap<Uuid, PairedMatch>,
    player_matches: HashMap<Identity, Uuid>,
    pairing_interval: Duration,
    /// Ready pairs nobody connected to are dropped after this long
    ready_timeout: Duration,
    last_pairing: Instant,
}

impl MatchmakingQueue {
    pub fn new(pairing_interval: Duration, ready_timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            matches: HashMap::new(),
            player_matches: HashMap::new(),
            pairing_interval,
            ready_timeout,
            last_pairing: Instant::now(),
        }
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, entry: QueueEntry) -> CoreResult<()> {
        if self.contains(&entry.identity) {
            return Err(CoreError::conflict("Already in queue"));
        }
        if self.player_matches.contains_key(&entry.identity) {
            return Err(CoreError::conflict("Already matched with an opponent"));
        }
        self.queue.push_back(entry);
        Ok(())
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, identity: &str) -> Option<QueueEntry> {
        let pos = self.queue.iter().position(|e| e.identity == identity)?;
        self.queue.remove(pos)
    }

    /// Check if a player is in the queue
    pub fn contains(&self, identity: &str) -> bool {
        self.queue.iter().any(|e| e.identity == identity)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn status(&self, identity: &str) -> QueueStatus {
        let game_id = self.player_matches.get(identity).copied();
        let Some(index) = self.queue.iter().position(|e| e.identity == identity) else {
            return QueueStatus {
                in_queue: false,
                position: None,
                estimated_wait_secs: None,
                game_id,
            };
        };

        // Everyone in a complete pair gets paired on the next pass
        let pairable = self.queue.len() - self.queue.len() % 2;
        let estimated_wait_secs = (index < pairable).then(|| {
            let elapsed = self.last_pairing.elapsed();
            self.pairing_interval
                .saturating_sub(elapsed)
                .as_secs_f32()
                .ceil() as u64
        });

        QueueStatus {
            in_queue: true,
            position: Some(index + 1),
            estimated_wait_secs,
            game_id,
        }
    }

    /// Pair waiting players two at a time in FIFO order.
    ///
    /// Players for whom `is_busy` returns true stay queued in place and are
    /// skipped. New pairs come back in `Ready` status.
    pub fn pair_waiting<F>(&mut self, is_busy: F) -> Vec<PairedMatch>
    where
        F: Fn(&str) -> bool,
    {
        self.last_pairing = Instant::now();

        let eligible: Vec<usize> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, e)| !is_busy(&e.identity))
            .map(|(i, _)| i)
            .collect();
        let take = eligible.len() - eligible.len() % 2;
        if take == 0 {
            return Vec::new();
        }

        // Pull from the back so earlier indices stay valid
        let mut picked: Vec<QueueEntry> = eligible[..take]
            .iter()
            .rev()
            .filter_map(|&i| self.queue.remove(i))
            .collect();
        picked.reverse();

        let mut paired = Vec::with_capacity(take / 2);
        let mut entries = picked.into_iter();
        while let (Some(left), Some(right)) = (entries.next(), entries.next()) {
            let paired_match = PairedMatch {
                id: Uuid::new_v4(),
                left,
                right,
                status: PairedStatus::Ready,
                created_at: Instant::now(),
            };
            self.player_matches
                .insert(paired_match.left.identity.clone(), paired_match.id);
            self.player_matches
                .insert(paired_match.right.identity.clone(), paired_match.id);
            self.matches.insert(paired_match.id, paired_match.clone());
            paired.push(paired_match);
        }
        paired
    }

    /// Drop ready pairs that nobody connected to in time
    pub fn expire_stale(&mut self) -> Vec<PairedMatch> {
        let stale: Vec<Uuid> = self
            .matches
            .values()
            .filter(|m| m.status == PairedStatus::Ready && m.created_at.elapsed() >= self.ready_timeout)
            .map(|m| m.id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.remove_match(id))
            .collect()
    }

    pub fn match_for(&self, identity: &str) -> Option<&PairedMatch> {
        let id = self.player_matches.get(identity)?;
        self.matches.get(id)
    }

    pub fn get_match(&self, id: Uuid) -> Option<&PairedMatch> {
        self.matches.get(&id)
    }

    pub fn mark_playing(&mut self, id: Uuid) -> bool {
        match self.matches.get_mut(&id) {
            Some(m) => {
                m.status = PairedStatus::Playing;
                true
            }
            None => false,
        }
    }

    pub fn remove_match(&mut self, id: Uuid) -> Option<PairedMatch> {
        let removed = self.matches.remove(&id)?;
        self.player_matches.remove(&removed.left.identity);
        self.player_matches.remove(&removed.right.identity);
        Some(removed)
    }

    pub fn paired_count(&self) -> usize {
        self.matches.len()
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn queue_with(ids: &[&str]) -> MatchmakingQueue {
        let mut queue = MatchmakingQueue::default();
        for id in ids {
            queue.enqueue(QueueEntry::new(*id, *id)).unwrap();
        }
        queue
    }

    #[test]
    fn test_duplicate_join_rejected() {
        let mut queue = queue_with(&["a"]);
        let err = queue.enqueue(QueueEntry::new("a", "a")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pairs_in_fifo_order() {
        let mut queue = queue_with(&["a", "b", "c", "d", "e"]);
        let paired = queue.pair_waiting(|_| false);

        assert_eq!(paired.len(), 2);
        assert_eq!(paired[0].left.identity, "a");
        assert_eq!(paired[0].right.identity, "b");
        assert_eq!(paired[1].left.identity, "c");
        assert_eq!(paired[1].right.identity, "d");
        assert!(paired.iter().all(|m| m.status == PairedStatus::Ready));

        // Odd one out keeps waiting
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("e"));
    }

    #[test]
    fn test_never_paired_with_self() {
        let mut queue = queue_with(&["a", "b", "c", "d"]);
        queue.dequeue("b");
        let _ = queue.enqueue(QueueEntry::new("a", "a"));
        queue.enqueue(QueueEntry::new("b", "b")).unwrap();

        for m in queue.pair_waiting(|_| false) {
            assert_ne!(m.left.identity, m.right.identity);
        }
    }

    #[test]
    fn test_busy_players_are_skipped_but_kept() {
        let busy: HashSet<&str> = ["b"].into_iter().collect();
        let mut queue = queue_with(&["a", "b", "c"]);

        let paired = queue.pair_waiting(|id| busy.contains(id));
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].left.identity, "a");
        assert_eq!(paired[0].right.identity, "c");
        assert!(queue.contains("b"));
        assert_eq!(queue.status("b").position, Some(1));
    }

    #[test]
    fn test_paired_player_cannot_requeue_until_removed() {
        let mut queue = queue_with(&["a", "b"]);
        let paired = queue.pair_waiting(|_| false);
        let id = paired[0].id;

        assert!(queue.enqueue(QueueEntry::new("a", "a")).is_err());
        assert_eq!(queue.status("a").game_id, Some(id));
        assert!(!queue.status("a").in_queue);

        queue.remove_match(id);
        assert!(queue.match_for("a").is_none());
        assert!(queue.enqueue(QueueEntry::new("a", "a")).is_ok());
    }

    #[test]
    fn test_status_position_and_estimate() {
        let queue = queue_with(&["a", "b", "c"]);
        let first = queue.status("a");
        assert!(first.in_queue);
        assert_eq!(first.position, Some(1));
        assert!(first.estimated_wait_secs.is_some());

        // Third player has no partner yet
        assert_eq!(queue.status("c").estimated_wait_secs, None);
        assert_eq!(queue.status("zed").position, None);
    }

    #[test]
    fn test_stale_ready_pairs_expire() {
        let mut queue = MatchmakingQueue::new(Duration::from_secs(5), Duration::ZERO);
        queue.enqueue(QueueEntry::new("a", "a")).unwrap();
        queue.enqueue(QueueEntry::new("b", "b")).unwrap();
        let paired = queue.pair_waiting(|_| false);
        queue.mark_playing(paired[0].id);
        assert!(queue.expire_stale().is_empty());

        queue.enqueue(QueueEntry::new("c", "c")).unwrap();
        queue.enqueue(QueueEntry::new("d", "d")).unwrap();
        queue.pair_waiting(|_| false);
        let expired = queue.expire_stale();
        assert_eq!(expired.len(), 1);
        assert!(expired[0].involves("c"));
        assert_eq!(queue.paired_count(), 1);
    }
}
