//! Session coordinator: turns client requests and timer events into session
//! state transitions and notifications.
//!
//! Every outcome goes through [`SessionStore`], whose per-session mutex makes
//! the transition a check-and-set. Only the caller whose transition
//! succeeded runs [`SessionCoordinator::finish`], so `session_ended` is sent
//! once per session no matter how many events race for it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use duel_core::challenge::{ChallengeLibrary, PublicChallenge};
use duel_core::errors::{JudgeError, LibraryError};
use duel_core::ids::{ChallengeId, ConnectionId, SessionId, UserId};
use duel_core::judge::{JudgeGateway, Verdict};
use duel_core::messages::{ClientMessage, ErrorCode, ServerMessage};
use duel_core::outcome::{Outcome, OutcomeReason};
use duel_session::{Session, SessionError, SessionStore};
use duel_telemetry::MetricsRecorder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lobby::{Lobby, Pairing, WaitingEntry};
use crate::notify::Notifier;
use crate::registry::{ConnectionInfo, ConnectionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("challenge not found: {0}")]
    ChallengeNotFound(ChallengeId),

    #[error("challenge library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("{user_id} is already playing in {session_id}")]
    AlreadyInSession {
        user_id: UserId,
        session_id: SessionId,
    },

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Session(e) => match e {
                SessionError::InvalidChallenge(_) => ErrorCode::InvalidChallenge,
                SessionError::UnknownParticipant { .. } => ErrorCode::UnknownParticipant,
                SessionError::SessionNotFound(_) => ErrorCode::SessionNotFound,
                SessionError::DeadlinePassed(_) => ErrorCode::DeadlinePassed,
                // Reported as a re-sent `session_ended`, never as an error frame.
                SessionError::SessionTerminal(_) => ErrorCode::Internal,
            },
            Self::Judge(_) => ErrorCode::JudgeUnavailable,
            Self::ChallengeNotFound(_) => ErrorCode::ChallengeNotFound,
            Self::LibraryUnavailable(_) => ErrorCode::Internal,
            Self::AlreadyInSession { .. } => ErrorCode::AlreadyInSession,
            Self::UnknownConnection(_) => ErrorCode::Internal,
            Self::MalformedMessage(_) => ErrorCode::MalformedMessage,
        }
    }
}

impl From<LibraryError> for CoordinatorError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::NotFound(id) => Self::ChallengeNotFound(ChallengeId::from_raw(id)),
            LibraryError::Unavailable(msg) => Self::LibraryUnavailable(msg),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Duel length for challenges without their own limit.
    pub default_duel: Duration,
    /// How long a terminal session stays in the store.
    pub terminal_retention: Duration,
    /// Upper bound on one judgment, retries included.
    pub judge_budget: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_duel: Duration::from_secs(60),
            terminal_retention: Duration::from_secs(30),
            judge_budget: Duration::from_secs(30),
        }
    }
}

pub struct SessionCoordinator {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    notifier: Notifier,
    lobby: Lobby,
    library: Arc<dyn ChallengeLibrary>,
    judge: Arc<dyn JudgeGateway>,
    metrics: Arc<MetricsRecorder>,
    timers: DashMap<SessionId, CancellationToken>,
    config: CoordinatorConfig,
    this: Weak<SessionCoordinator>,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ConnectionRegistry>,
        library: Arc<dyn ChallengeLibrary>,
        judge: Arc<dyn JudgeGateway>,
        metrics: Arc<MetricsRecorder>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            notifier: Notifier::new(Arc::clone(&registry)),
            store,
            registry,
            lobby: Lobby::new(),
            library,
            judge,
            metrics,
            timers: DashMap::new(),
            config,
            this: this.clone(),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn waiting_count(&self) -> usize {
        self.lobby.len()
    }

    /// Parse and dispatch one inbound frame. Failures are reported to the
    /// originating connection only.
    pub async fn handle_frame(&self, connection_id: &ConnectionId, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "malformed frame");
                self.report(
                    connection_id,
                    CoordinatorError::MalformedMessage(e.to_string()),
                );
                return;
            }
        };

        let kind = message.kind();
        let result = match message {
            ClientMessage::JoinGame {
                challenge_id,
                opponent_id,
            } => self.join(connection_id, challenge_id, opponent_id).await,
            ClientMessage::SubmitSolution { session_id, code } => {
                self.submit(connection_id, session_id, code).await
            }
            ClientMessage::LeaveGame { session_id } => self.leave(connection_id, session_id),
            ClientMessage::Ping => {
                self.notifier.send(connection_id, &ServerMessage::Pong);
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(connection_id = %connection_id, kind, error = %e, "request failed");
            self.report(connection_id, e);
        }
    }

    fn report(&self, connection_id: &ConnectionId, error: CoordinatorError) {
        if let CoordinatorError::Session(SessionError::SessionTerminal(session_id)) = &error {
            // The caller lost a race with the end of the session; tell them
            // how it ended instead.
            if let Ok(session) = self.store.get(session_id) {
                if let Some(msg) = ended_message(&session) {
                    self.notifier.send(connection_id, &msg);
                }
            }
            return;
        }
        self.notifier
            .send(connection_id, &ServerMessage::error(error.code(), error.to_string()));
    }

    fn connection(&self, connection_id: &ConnectionId) -> Result<ConnectionInfo, CoordinatorError> {
        self.registry
            .lookup(connection_id)
            .ok_or_else(|| CoordinatorError::UnknownConnection(connection_id.clone()))
    }

    /// Pair the caller with a waiting player for the same challenge, or park
    /// them in the lobby.
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        challenge_id: ChallengeId,
        opponent_id: Option<UserId>,
    ) -> Result<(), CoordinatorError> {
        let conn = self.connection(connection_id)?;
        self.ensure_not_playing(&conn.user_id)?;

        let challenge = self.library.get_challenge(&challenge_id).await?;
        if challenge.test_cases.is_empty() {
            return Err(SessionError::InvalidChallenge(format!(
                "challenge {challenge_id} has no test cases"
            ))
            .into());
        }
        // The library call may have raced a pairing elsewhere.
        self.ensure_not_playing(&conn.user_id)?;

        let mut entry = WaitingEntry {
            connection_id: conn.id,
            user_id: conn.user_id,
            challenge,
            requested_opponent: opponent_id,
            since: Instant::now(),
        };

        loop {
            match self.lobby.pair_or_park(entry) {
                Pairing::Parked => {
                    info!(connection_id = %connection_id, challenge_id = %challenge_id, "waiting for opponent");
                    self.notifier
                        .send(connection_id, &ServerMessage::Waiting { challenge_id });
                    return Ok(());
                }
                Pairing::Paired { first, second } => {
                    if self.registry.lookup(&first.connection_id).is_none() {
                        debug!(user_id = %first.user_id, "waiting player is gone, retrying pairing");
                        entry = second;
                        continue;
                    }
                    let waiting = first.connection_id.clone();
                    return self.start_session(first, second).inspect_err(|e| {
                        // The caller gets the error as its reply; the player
                        // taken out of the lobby has to hear it too.
                        self.notifier
                            .send(&waiting, &ServerMessage::error(e.code(), e.to_string()));
                    });
                }
            }
        }
    }

    fn ensure_not_playing(&self, user_id: &UserId) -> Result<(), CoordinatorError> {
        match self.store.active_session_for(user_id) {
            Some(session_id) => Err(CoordinatorError::AlreadyInSession {
                user_id: user_id.clone(),
                session_id,
            }),
            None => Ok(()),
        }
    }

    fn start_session(&self, first: WaitingEntry, second: WaitingEntry) -> Result<(), CoordinatorError> {
        let challenge = &second.challenge;
        let duration = if challenge.time_limit_secs > 0 {
            Duration::from_secs(challenge.time_limit_secs)
        } else {
            self.config.default_duel
        };

        let session = self.store.create(
            challenge.id.clone(),
            challenge.test_cases.clone(),
            first.user_id.clone(),
            second.user_id.clone(),
            duration,
        )?;

        // Every open tab of either player follows the session, not just the
        // ones that sent `join`.
        for player in &session.players {
            for conn in self.registry.connections_for_user(player) {
                self.registry.bind_session(&conn.id, session.id.clone());
            }
        }
        self.arm_deadline(&session);
        info!(
            session_id = %session.id,
            waited_ms = first.since.elapsed().as_millis() as u64,
            "players paired"
        );
        self.metrics.counter_inc("sessions_started", &[], 1);

        let public = challenge.public_view();
        for (player, opponent) in [
            (&first.user_id, &second.user_id),
            (&second.user_id, &first.user_id),
        ] {
            self.notifier.send_to_participant(
                &session.id,
                player,
                &started_message(&session, &public, opponent, false),
            );
        }
        Ok(())
    }

    fn arm_deadline(&self, session: &Session) {
        let token = CancellationToken::new();
        self.timers.insert(session.id.clone(), token.clone());

        let this = self.this.clone();
        let session_id = session.id.clone();
        let deadline = session.deadline();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(coordinator) = this.upgrade() {
                        coordinator.on_deadline(&session_id);
                    }
                }
            }
        });
    }

    /// Judge a submission and apply whatever outcome it settles.
    pub async fn submit(
        &self,
        connection_id: &ConnectionId,
        session_id: SessionId,
        code: String,
    ) -> Result<(), CoordinatorError> {
        let conn = self.connection(connection_id)?;
        let ticket = self
            .store
            .begin_submission(&session_id, &conn.user_id, Instant::now())?;
        self.metrics.counter_inc("submissions", &[], 1);

        debug!(
            session_id = %session_id,
            user_id = %conn.user_id,
            at_ms = ticket.at_ms,
            seq = ticket.seq,
            "submission accepted"
        );

        // No lock is held while the judge runs.
        let started = Instant::now();
        let judged = match tokio::time::timeout(
            self.config.judge_budget,
            self.judge.evaluate(&code, &ticket.test_cases),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(JudgeError::Timeout(self.config.judge_budget)),
        };
        self.metrics.histogram_observe(
            "judge_latency_ms",
            &[],
            started.elapsed().as_millis() as f64,
        );

        let (verdict, judge_error) = match judged {
            Ok(verdict) => (verdict, None),
            Err(e) => {
                warn!(session_id = %session_id, user_id = %conn.user_id, error = %e, "judge failed");
                self.metrics
                    .counter_inc("judge_errors", &[("kind", e.error_kind())], 1);
                (Verdict::unavailable(e.to_string()), Some(e))
            }
        };

        let user_id = ticket.user_id.clone();
        let verdict_msg = |attempt: u32| ServerMessage::Verdict {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            passed: verdict.is_fully_correct(),
            details: verdict.results.clone(),
            attempt,
        };

        match self
            .store
            .record_submission(&session_id, ticket.into_submission(code, verdict.clone()))
        {
            Ok(session) => {
                let attempts = session.attempts(&user_id);
                self.notifier.broadcast(&session_id, &verdict_msg(attempts));
                self.notifier.broadcast(
                    &session_id,
                    &ServerMessage::OpponentProgress {
                        session_id: session_id.clone(),
                        user_id: user_id.clone(),
                        attempts,
                    },
                );
            }
            Err(e) if e.is_terminal_race() => {
                debug!(session_id = %session_id, user_id = %user_id, "verdict arrived after session ended");
                let attempt = self
                    .store
                    .get(&session_id)
                    .map_or(0, |s| s.attempts(&user_id) + 1);
                self.notifier.send(connection_id, &verdict_msg(attempt));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(e) = judge_error {
            self.report(connection_id, e.into());
        }

        match self.store.settle(&session_id, Instant::now()) {
            Ok(Some(session)) => self.finish(session),
            Ok(None) => {}
            Err(e) => debug!(session_id = %session_id, error = %e, "settle after verdict skipped"),
        }
        Ok(())
    }

    /// Leave a session (the opponent wins) or, without a session, the lobby.
    pub fn leave(
        &self,
        connection_id: &ConnectionId,
        session_id: Option<SessionId>,
    ) -> Result<(), CoordinatorError> {
        let conn = self.connection(connection_id)?;

        let Some(session_id) = session_id.or_else(|| conn.session_id.clone()) else {
            if self.lobby.remove_connection(connection_id) {
                info!(connection_id = %connection_id, user_id = %conn.user_id, "left lobby");
            }
            return Ok(());
        };

        let session = self.store.get(&session_id)?;
        let seat = session
            .seat_of(&conn.user_id)
            .ok_or_else(|| SessionError::UnknownParticipant {
                session_id: session_id.clone(),
                user_id: conn.user_id.clone(),
            })?;

        info!(session_id = %session_id, user_id = %conn.user_id, "player left");
        let ended = self
            .store
            .set_outcome(&session_id, seat.other().win(), OutcomeReason::OpponentLeft)?;
        // The leaver hears the result even if they had not bound this connection.
        if conn.session_id.as_ref() != Some(&session_id) {
            if let Some(msg) = ended_message(&ended) {
                self.notifier.send(connection_id, &msg);
            }
        }
        self.finish(ended);
        Ok(())
    }

    /// A connection was admitted. Resume the user's open session, if any.
    pub async fn on_connect(&self, connection_id: &ConnectionId) {
        let Some(conn) = self.registry.lookup(connection_id) else {
            return;
        };
        self.metrics.gauge_inc("connections_active", &[], 1.0);
        info!(connection_id = %connection_id, user_id = %conn.user_id, "connection admitted");

        let Some(session_id) = self.store.active_session_for(&conn.user_id) else {
            return;
        };
        let Ok(session) = self.store.get(&session_id) else {
            return;
        };
        let challenge = match self.library.get_challenge(&session.challenge_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "cannot resume session");
                return;
            }
        };
        let Some(opponent) = session.opponent_of(&conn.user_id).cloned() else {
            return;
        };
        // The session may have ended while the challenge was loading.
        if self.store.active_session_for(&conn.user_id).as_ref() != Some(&session_id) {
            debug!(session_id = %session_id, "session ended before resume");
            return;
        }

        // Another tab already held the seat, so the opponent never saw this
        // user leave.
        let returning = !self
            .registry
            .connections_for_session(&session_id)
            .iter()
            .any(|c| c.user_id == conn.user_id && &c.id != connection_id);

        self.registry.bind_session(connection_id, session_id.clone());
        info!(session_id = %session_id, user_id = %conn.user_id, returning, "session resumed");

        self.notifier.send(
            connection_id,
            &started_message(&session, &challenge.public_view(), &opponent, true),
        );
        if !returning {
            return;
        }
        self.notifier.send_to_participant(
            &session_id,
            &opponent,
            &ServerMessage::OpponentStatus {
                session_id: session_id.clone(),
                user_id: conn.user_id.clone(),
                connected: true,
            },
        );
    }

    /// A connection went away (closed, errored, or timed out). Idempotent.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) {
        let Some(conn) = self.registry.remove(connection_id) else {
            return;
        };
        self.metrics.gauge_inc("connections_active", &[], -1.0);
        self.lobby.remove_connection(connection_id);
        info!(connection_id = %connection_id, user_id = %conn.user_id, "connection closed");

        let Some(session_id) = conn.session_id else {
            return;
        };
        let Ok(session) = self.store.get(&session_id) else {
            return;
        };
        // Participants are users; any live tab keeps a user present.
        let present = |user: &UserId| !self.registry.connections_for_user(user).is_empty();

        if !session.players.iter().any(present) {
            match self.store.set_outcome(
                &session_id,
                Outcome::Abandoned,
                OutcomeReason::AllDisconnected,
            ) {
                Ok(session) => self.finish(session),
                Err(e) => debug!(session_id = %session_id, error = %e, "abandon skipped"),
            }
            return;
        }

        if present(&conn.user_id) {
            return;
        }
        self.notifier.broadcast(
            &session_id,
            &ServerMessage::OpponentStatus {
                session_id: session_id.clone(),
                user_id: conn.user_id,
                connected: false,
            },
        );
    }

    /// Deadline timer fired. A no-op unless the session is still open.
    pub fn on_deadline(&self, session_id: &SessionId) {
        match self.store.settle(session_id, Instant::now()) {
            Ok(Some(session)) => self.finish(session),
            Ok(None) => {
                debug!(session_id = %session_id, "deadline reached, waiting on pending verdicts")
            }
            Err(e) => debug!(session_id = %session_id, error = %e, "deadline ignored"),
        }
    }

    /// Post-transition work, run only by the caller that made the transition.
    fn finish(&self, session: Session) {
        if let Some((_, token)) = self.timers.remove(&session.id) {
            token.cancel();
        }

        if let Some(outcome) = session.outcome() {
            self.metrics
                .counter_inc("sessions_ended", &[("outcome", outcome.as_str())], 1);
        }

        if let Some(msg) = ended_message(&session) {
            self.notifier.broadcast(&session.id, &msg);
        }
        for conn in self.registry.connections_for_session(&session.id) {
            self.registry.unbind_session(&conn.id);
        }

        let store = Arc::clone(&self.store);
        let retention = self.config.terminal_retention;
        let session_id = session.id;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if store.remove(&session_id).is_some() {
                debug!(session_id = %session_id, "terminal session removed");
            }
        });
    }

    /// Cancel every deadline timer.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().cancel();
        }
        self.timers.clear();
    }
}

fn started_message(
    session: &Session,
    challenge: &PublicChallenge,
    opponent: &UserId,
    resumed: bool,
) -> ServerMessage {
    ServerMessage::SessionStarted {
        session_id: session.id.clone(),
        challenge: challenge.clone(),
        deadline: session.deadline_at,
        opponent_id: opponent.clone(),
        resumed,
    }
}

fn ended_message(session: &Session) -> Option<ServerMessage> {
    Some(ServerMessage::SessionEnded {
        session_id: session.id.clone(),
        outcome: session.outcome()?,
        winner_id: session.winner().cloned(),
        reason: session.reason()?,
    })
}
