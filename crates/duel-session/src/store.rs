//! In-memory session store.
//!
//! Each session sits behind its own `parking_lot::Mutex`; that mutex is the
//! serialization point for every mutation of the session. Sessions never
//! share a lock, and no lock is ever held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use duel_core::challenge::TestCase;
use duel_core::ids::{ChallengeId, SessionId, UserId};
use duel_core::outcome::{Outcome, OutcomeReason};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::session::{Session, Submission, SubmissionTicket};

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    by_user: DashMap<UserId, SessionId>,
    transitions: AtomicU64,
    rejected_transitions: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))
    }

    /// Allocate a new open session; the deadline starts counting now.
    pub fn create(
        &self,
        challenge_id: ChallengeId,
        test_cases: Vec<TestCase>,
        user_a: UserId,
        user_b: UserId,
        duel_duration: Duration,
    ) -> Result<Session, SessionError> {
        let session = Session::new(
            challenge_id,
            test_cases,
            user_a,
            user_b,
            duel_duration,
            Instant::now(),
        )?;

        for player in &session.players {
            self.by_user.insert(player.clone(), session.id.clone());
        }
        self.sessions
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));

        info!(
            session_id = %session.id,
            challenge_id = %session.challenge_id,
            player_a = %session.players[0],
            player_b = %session.players[1],
            duration_secs = duel_duration.as_secs(),
            "session created"
        );
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        Ok(self.handle(id)?.lock().clone())
    }

    pub fn begin_submission(
        &self,
        id: &SessionId,
        user_id: &UserId,
        now: Instant,
    ) -> Result<SubmissionTicket, SessionError> {
        self.handle(id)?.lock().begin_submission(user_id, now)
    }

    pub fn record_submission(
        &self,
        id: &SessionId,
        submission: Submission,
    ) -> Result<Session, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock();
        session.record_submission(submission)?;
        Ok(session.clone())
    }

    /// The single terminal transition. Fails with `SessionTerminal` when an
    /// outcome is already set.
    pub fn set_outcome(
        &self,
        id: &SessionId,
        outcome: Outcome,
        reason: OutcomeReason,
    ) -> Result<Session, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock();
        self.transition(&mut session, outcome, reason)?;
        Ok(session.clone())
    }

    /// Apply whatever outcome is due (a settled win, or a timeout draw) under
    /// the session lock. Returns the terminal session when this call made
    /// the transition.
    pub fn settle(&self, id: &SessionId, now: Instant) -> Result<Option<Session>, SessionError> {
        let handle = self.handle(id)?;
        let mut session = handle.lock();
        match session.due_outcome(now) {
            Some((outcome, reason)) => {
                self.transition(&mut session, outcome, reason)?;
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    fn transition(
        &self,
        session: &mut Session,
        outcome: Outcome,
        reason: OutcomeReason,
    ) -> Result<(), SessionError> {
        match session.set_outcome(outcome, reason) {
            Ok(()) => {
                self.transitions.fetch_add(1, Ordering::Relaxed);
                info!(
                    session_id = %session.id,
                    outcome = outcome.as_str(),
                    reason = ?reason,
                    "session ended"
                );
                Ok(())
            }
            Err(e) => {
                self.rejected_transitions.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %session.id, attempted = outcome.as_str(), "late transition discarded");
                Err(e)
            }
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let (_, handle) = self.sessions.remove(id)?;
        let session = handle.lock().clone();
        for player in &session.players {
            self.by_user.remove_if(player, |_, sid| sid == id);
        }
        Some(session)
    }

    /// The open session a user is playing in, if any.
    pub fn active_session_for(&self, user_id: &UserId) -> Option<SessionId> {
        let id = self.by_user.get(user_id)?.value().clone();
        let open = self
            .handle(&id)
            .map(|h| !h.lock().is_terminal())
            .unwrap_or(false);
        open.then_some(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of successful outcome transitions across all sessions.
    pub fn outcome_transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Number of transition attempts that lost a race.
    pub fn rejected_transitions(&self) -> u64 {
        self.rejected_transitions.load(Ordering::Relaxed)
    }
}
