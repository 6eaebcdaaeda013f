//! Per-duel state and its `Open -> Terminal` state machine.
//!
//! `Session` methods are plain `&mut self` mutations; the store wraps each
//! session in its own mutex so every method here runs under the session's
//! single-writer lock.
//!
//! Winner resolution: every fully correct submission registers a *claim*
//! `(at_ms, seq)` for its participant, where `at_ms` is the receipt time in
//! milliseconds since the session started and `seq` the order in which the
//! coordinator accepted the submission. The smallest claim wins, so equal
//! milliseconds fall back to processing order. A claim is not final while
//! the opponent still has an earlier submission being judged; the session
//! settles as soon as nothing earlier is pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duel_core::challenge::TestCase;
use duel_core::ids::{ChallengeId, SessionId, UserId};
use duel_core::judge::Verdict;
use duel_core::outcome::{Outcome, OutcomeReason};
use tokio::time::Instant;

use crate::error::SessionError;

/// Which side of the duel a participant occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Seat {
    A,
    B,
}

impl Seat {
    fn index(self) -> usize {
        match self {
            Seat::A => 0,
            Seat::B => 1,
        }
    }

    fn from_index(i: usize) -> Self {
        if i == 0 {
            Seat::A
        } else {
            Seat::B
        }
    }

    pub fn other(self) -> Self {
        match self {
            Seat::A => Seat::B,
            Seat::B => Seat::A,
        }
    }

    pub fn win(self) -> Outcome {
        match self {
            Seat::A => Outcome::PlayerAWin,
            Seat::B => Outcome::PlayerBWin,
        }
    }
}

/// An immutable judged submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub user_id: UserId,
    pub code: String,
    /// Milliseconds since the session started.
    pub at_ms: u64,
    /// Processing order assigned when the submission was accepted.
    pub seq: u64,
    pub verdict: Verdict,
}

/// Handed out when a submission is accepted for judging. Carries what the
/// judge call needs so the session lock is not held while it runs.
#[derive(Clone, Debug)]
pub struct SubmissionTicket {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub at_ms: u64,
    pub seq: u64,
    pub test_cases: Arc<[TestCase]>,
}

impl SubmissionTicket {
    pub fn into_submission(self, code: String, verdict: Verdict) -> Submission {
        Submission {
            user_id: self.user_id,
            code,
            at_ms: self.at_ms,
            seq: self.seq,
            verdict,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Claim {
    at_ms: u64,
    seq: u64,
}

#[derive(Clone, Debug)]
struct Pending {
    seat: Seat,
    claim: Claim,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub challenge_id: ChallengeId,
    pub test_cases: Arc<[TestCase]>,
    pub players: [UserId; 2],
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
    duration: Duration,
    latest: [Option<Submission>; 2],
    attempts: [u32; 2],
    claims: [Option<Claim>; 2],
    pending: Vec<Pending>,
    history: Vec<Submission>,
    next_seq: u64,
    outcome: Option<(Outcome, OutcomeReason)>,
    ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        challenge_id: ChallengeId,
        test_cases: Vec<TestCase>,
        user_a: UserId,
        user_b: UserId,
        duration: Duration,
        now: Instant,
    ) -> Result<Self, SessionError> {
        if test_cases.is_empty() {
            return Err(SessionError::InvalidChallenge(format!(
                "challenge {challenge_id} has no test cases"
            )));
        }
        if user_a == user_b {
            return Err(SessionError::InvalidChallenge(format!(
                "{user_a} cannot duel themselves"
            )));
        }

        let out_of_range = || {
            SessionError::InvalidChallenge(format!(
                "duel duration of {}s for {challenge_id} is out of range",
                duration.as_secs()
            ))
        };
        let deadline = now.checked_add(duration).ok_or_else(out_of_range)?;
        let created_at = Utc::now();
        let deadline_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| created_at.checked_add_signed(d))
            .ok_or_else(out_of_range)?;

        Ok(Self {
            id: SessionId::new(),
            challenge_id,
            test_cases: test_cases.into(),
            players: [user_a, user_b],
            created_at,
            deadline_at,
            started: now,
            deadline,
            duration,
            latest: [None, None],
            attempts: [0, 0],
            claims: [None, None],
            pending: Vec::new(),
            history: Vec::new(),
            next_seq: 0,
            outcome: None,
            ended_at: None,
        })
    }

    pub fn seat_of(&self, user_id: &UserId) -> Option<Seat> {
        self.players.iter().position(|p| p == user_id).map(Seat::from_index)
    }

    pub fn player(&self, seat: Seat) -> &UserId {
        &self.players[seat.index()]
    }

    pub fn opponent_of(&self, user_id: &UserId) -> Option<&UserId> {
        self.seat_of(user_id).map(|seat| self.player(seat.other()))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started).as_millis() as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.map(|(o, _)| o)
    }

    pub fn reason(&self) -> Option<OutcomeReason> {
        self.outcome.map(|(_, r)| r)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn winner(&self) -> Option<&UserId> {
        match self.outcome()? {
            Outcome::PlayerAWin => Some(self.player(Seat::A)),
            Outcome::PlayerBWin => Some(self.player(Seat::B)),
            Outcome::DrawTimeout | Outcome::Abandoned => None,
        }
    }

    pub fn latest_submission(&self, user_id: &UserId) -> Option<&Submission> {
        self.seat_of(user_id).and_then(|seat| self.latest[seat.index()].as_ref())
    }

    pub fn attempts(&self, user_id: &UserId) -> u32 {
        self.seat_of(user_id).map_or(0, |seat| self.attempts[seat.index()])
    }

    pub fn history(&self) -> &[Submission] {
        &self.history
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn participant(&self, user_id: &UserId) -> Result<Seat, SessionError> {
        self.seat_of(user_id).ok_or_else(|| SessionError::UnknownParticipant {
            session_id: self.id.clone(),
            user_id: user_id.clone(),
        })
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_terminal() {
            Err(SessionError::SessionTerminal(self.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Accept a submission for judging: stamps it and marks it pending.
    pub fn begin_submission(
        &mut self,
        user_id: &UserId,
        now: Instant,
    ) -> Result<SubmissionTicket, SessionError> {
        self.ensure_open()?;
        let seat = self.participant(user_id)?;
        if now >= self.deadline {
            return Err(SessionError::DeadlinePassed(self.id.clone()));
        }

        let claim = Claim {
            at_ms: self.elapsed_ms(now),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.push(Pending { seat, claim });

        Ok(SubmissionTicket {
            session_id: self.id.clone(),
            user_id: user_id.clone(),
            at_ms: claim.at_ms,
            seq: claim.seq,
            test_cases: Arc::clone(&self.test_cases),
        })
    }

    /// Store a judged submission. The latest submission per participant is
    /// what `latest_submission` reports; every submission lands in history.
    pub fn record_submission(&mut self, submission: Submission) -> Result<(), SessionError> {
        self.ensure_open()?;
        let seat = self.participant(&submission.user_id)?;
        let claim = Claim {
            at_ms: submission.at_ms,
            seq: submission.seq,
        };

        self.pending.retain(|p| !(p.seat == seat && p.claim == claim));
        self.attempts[seat.index()] += 1;

        let within_deadline = u128::from(submission.at_ms) < self.duration.as_millis();
        if submission.verdict.is_fully_correct() && within_deadline {
            let slot = &mut self.claims[seat.index()];
            *slot = Some(slot.map_or(claim, |existing| existing.min(claim)));
        }

        self.history.push(submission.clone());
        self.latest[seat.index()] = Some(submission);
        Ok(())
    }

    /// Atomic check-and-set of the terminal outcome.
    pub fn set_outcome(
        &mut self,
        outcome: Outcome,
        reason: OutcomeReason,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.outcome = Some((outcome, reason));
        self.ended_at = Some(Utc::now());
        self.pending.clear();
        Ok(())
    }

    /// The outcome that is due right now, if any.
    pub fn due_outcome(&self, now: Instant) -> Option<(Outcome, OutcomeReason)> {
        if self.is_terminal() {
            return None;
        }

        let best = self
            .claims
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|c| (c, Seat::from_index(i))))
            .min_by_key(|(c, _)| *c);

        match best {
            Some((claim, seat)) => {
                let opponent_earlier = self
                    .pending
                    .iter()
                    .any(|p| p.seat != seat && p.claim < claim);
                if opponent_earlier {
                    None
                } else {
                    Some((seat.win(), OutcomeReason::Solved))
                }
            }
            None if now >= self.deadline && self.pending.is_empty() => {
                Some((Outcome::DrawTimeout, OutcomeReason::Timeout))
            }
            None => None,
        }
    }
}
