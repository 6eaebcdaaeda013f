use duel_core::ids::{SessionId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("{user_id} is not a participant of {session_id}")]
    UnknownParticipant {
        session_id: SessionId,
        user_id: UserId,
    },

    /// A transition was attempted on a session that already has an outcome.
    /// Expected under races; callers resolve it quietly.
    #[error("session {0} already ended")]
    SessionTerminal(SessionId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("deadline passed for session {0}")]
    DeadlinePassed(SessionId),
}

impl SessionError {
    pub fn is_terminal_race(&self) -> bool {
        matches!(self, Self::SessionTerminal(_))
    }
}
