//! Players waiting for an opponent, keyed by challenge.

use std::collections::HashMap;

use duel_core::challenge::Challenge;
use duel_core::ids::{ChallengeId, ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct WaitingEntry {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub challenge: Challenge,
    /// Only pair with this user, when set.
    pub requested_opponent: Option<UserId>,
    pub since: Instant,
}

impl WaitingEntry {
    fn accepts(&self, other: &WaitingEntry) -> bool {
        self.user_id != other.user_id
            && self
                .requested_opponent
                .as_ref()
                .map_or(true, |wanted| wanted == &other.user_id)
    }
}

#[derive(Debug)]
pub enum Pairing {
    /// `first` waited longer and becomes player A.
    Paired {
        first: WaitingEntry,
        second: WaitingEntry,
    },
    Parked,
}

#[derive(Default)]
pub struct Lobby {
    waiting: Mutex<HashMap<ChallengeId, Vec<WaitingEntry>>>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair with the longest-waiting compatible entry for the same
    /// challenge, or park. A user waits for at most one challenge, so any
    /// previous entry of theirs is dropped first.
    pub fn pair_or_park(&self, entry: WaitingEntry) -> Pairing {
        let mut waiting = self.waiting.lock();
        remove_where(&mut waiting, |w| w.user_id == entry.user_id);

        let queue = waiting.entry(entry.challenge.id.clone()).or_default();
        match queue
            .iter()
            .position(|w| w.accepts(&entry) && entry.accepts(w))
        {
            Some(pos) => {
                let first = queue.remove(pos);
                if queue.is_empty() {
                    waiting.remove(&entry.challenge.id);
                }
                Pairing::Paired {
                    first,
                    second: entry,
                }
            }
            None => {
                queue.push(entry);
                Pairing::Parked
            }
        }
    }

    /// Drop every entry of this connection. Returns whether one existed.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> bool {
        remove_where(&mut self.waiting.lock(), |w| &w.connection_id == connection_id) > 0
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_where(
    waiting: &mut HashMap<ChallengeId, Vec<WaitingEntry>>,
    pred: impl Fn(&WaitingEntry) -> bool,
) -> usize {
    let mut removed = 0;
    waiting.retain(|_, queue| {
        let before = queue.len();
        queue.retain(|w| !pred(w));
        removed += before - queue.len();
        !queue.is_empty()
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_core::challenge::{Difficulty, TestCase};

    fn challenge(id: &str) -> Challenge {
        Challenge {
            id: ChallengeId::from_raw(id),
            title: id.into(),
            description: String::new(),
            difficulty: Difficulty::Easy,
            category: String::new(),
            initial_code: String::new(),
            test_cases: vec![TestCase::visible("1", "1")],
            time_limit_secs: 60,
            points: 100,
        }
    }

    fn entry(user: &str, challenge_id: &str, wants: Option<&str>) -> WaitingEntry {
        WaitingEntry {
            connection_id: ConnectionId::new(),
            user_id: UserId::from_raw(user),
            challenge: challenge(challenge_id),
            requested_opponent: wants.map(UserId::from_raw),
            since: Instant::now(),
        }
    }

    #[test]
    fn second_player_pairs_with_first() {
        let lobby = Lobby::new();
        assert!(matches!(lobby.pair_or_park(entry("alice", "c1", None)), Pairing::Parked));
        assert_eq!(lobby.len(), 1);

        match lobby.pair_or_park(entry("bob", "c1", None)) {
            Pairing::Paired { first, second } => {
                assert_eq!(first.user_id.as_str(), "alice");
                assert_eq!(second.user_id.as_str(), "bob");
            }
            Pairing::Parked => panic!("expected a pairing"),
        }
        assert!(lobby.is_empty());
    }

    #[test]
    fn different_challenges_do_not_pair() {
        let lobby = Lobby::new();
        lobby.pair_or_park(entry("alice", "c1", None));
        assert!(matches!(lobby.pair_or_park(entry("bob", "c2", None)), Pairing::Parked));
        assert_eq!(lobby.len(), 2);
    }

    #[test]
    fn same_user_never_pairs_with_self() {
        let lobby = Lobby::new();
        lobby.pair_or_park(entry("alice", "c1", None));
        assert!(matches!(lobby.pair_or_park(entry("alice", "c1", None)), Pairing::Parked));
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn rejoining_moves_user_to_new_challenge() {
        let lobby = Lobby::new();
        lobby.pair_or_park(entry("alice", "c1", None));
        lobby.pair_or_park(entry("alice", "c2", None));
        assert_eq!(lobby.len(), 1);
        assert!(matches!(lobby.pair_or_park(entry("bob", "c1", None)), Pairing::Parked));
    }

    #[test]
    fn requested_opponent_must_match_both_ways() {
        let lobby = Lobby::new();
        lobby.pair_or_park(entry("alice", "c1", Some("o1")));

        assert!(matches!(lobby.pair_or_park(entry("bob", "c1", None)), Pairing::Parked));
        assert!(matches!(
            lobby.pair_or_park(entry("o1", "c1", None)),
            Pairing::Paired { .. }
        ));
        // bob is still waiting
        assert_eq!(lobby.len(), 1);

        assert!(matches!(
            lobby.pair_or_park(entry("carol", "c1", Some("dave"))),
            Pairing::Parked
        ));
        assert_eq!(lobby.len(), 2);
    }

    #[test]
    fn remove_connection_clears_entry() {
        let lobby = Lobby::new();
        let e = entry("alice", "c1", None);
        let conn = e.connection_id.clone();
        lobby.pair_or_park(e);

        assert!(lobby.remove_connection(&conn));
        assert!(!lobby.remove_connection(&conn));
        assert!(lobby.is_empty());
    }
}
