//! Wire messages exchanged over a duel WebSocket.
//!
//! Both directions are closed enums, internally tagged on `type` with
//! snake_case tags and camelCase fields:
//!
//! ```json
//! {"type": "submit_solution", "sessionId": "duel_...", "code": "..."}
//! ```
//!
//! A frame that does not parse into [`ClientMessage`] is answered with an
//! `error` frame carrying [`ErrorCode::MalformedMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::PublicChallenge;
use crate::ids::{ChallengeId, SessionId, UserId};
use crate::judge::TestResult;
use crate::outcome::{Outcome, OutcomeReason};

/// Requests sent by a client.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum ClientMessage {
    JoinGame {
        challenge_id: ChallengeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opponent_id: Option<UserId>,
    },
    SubmitSolution {
        session_id: SessionId,
        code: String,
    },
    /// Without a session id, leaves the waiting lobby.
    LeaveGame {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinGame { .. } => "join_game",
            Self::SubmitSolution { .. } => "submit_solution",
            Self::LeaveGame { .. } => "leave_game",
            Self::Ping => "ping",
        }
    }
}

/// Stable error codes reported to the originating connection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MalformedMessage,
    InvalidChallenge,
    ChallengeNotFound,
    UnknownParticipant,
    SessionNotFound,
    DeadlinePassed,
    AlreadyInSession,
    JudgeUnavailable,
    Internal,
}

/// State pushes sent by the server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SessionStarted {
        session_id: SessionId,
        challenge: PublicChallenge,
        deadline: DateTime<Utc>,
        opponent_id: UserId,
        resumed: bool,
    },
    Verdict {
        session_id: SessionId,
        user_id: UserId,
        passed: bool,
        details: Vec<TestResult>,
        attempt: u32,
    },
    SessionEnded {
        session_id: SessionId,
        outcome: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner_id: Option<UserId>,
        reason: OutcomeReason,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Waiting {
        challenge_id: ChallengeId,
    },
    OpponentStatus {
        session_id: SessionId,
        user_id: UserId,
        connected: bool,
    },
    /// Derived progress: how many judged attempts a participant has made.
    OpponentProgress {
        session_id: SessionId,
        user_id: UserId,
        attempts: u32,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::Difficulty;

    #[test]
    fn parse_join_game() {
        let msg = ClientMessage::parse(r#"{"type":"join_game","challengeId":"c1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinGame {
                challenge_id: ChallengeId::from_raw("c1"),
                opponent_id: None,
            }
        );
    }

    #[test]
    fn parse_join_game_with_opponent() {
        let msg = ClientMessage::parse(
            r#"{"type":"join_game","challengeId":"c1","opponentId":"o1"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::JoinGame { opponent_id, .. } => {
                assert_eq!(opponent_id, Some(UserId::from_raw("o1")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_submit_solution() {
        let msg = ClientMessage::parse(
            r#"{"type":"submit_solution","sessionId":"duel_1","code":"return [0,1]"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), "submit_solution");
    }

    #[test]
    fn leave_game_session_is_optional() {
        let msg = ClientMessage::parse(r#"{"type":"leave_game"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveGame { session_id: None });
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(ClientMessage::parse(
            r#"{"type":"submit_solution","sessionId":"duel_1","code":"x","score":100}"#
        )
        .is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"submit_solution","sessionId":"duel_1"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"challengeId":"c1"}"#).is_err());
    }

    #[test]
    fn session_ended_wire_shape() {
        let msg = ServerMessage::SessionEnded {
            session_id: SessionId::from_raw("duel_1"),
            outcome: Outcome::PlayerAWin,
            winner_id: Some(UserId::from_raw("alice")),
            reason: OutcomeReason::Solved,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "session_ended");
        assert_eq!(json["sessionId"], "duel_1");
        assert_eq!(json["outcome"], "player_a_win");
        assert_eq!(json["winnerId"], "alice");
        assert_eq!(json["reason"], "solved");
    }

    #[test]
    fn draw_omits_winner() {
        let msg = ServerMessage::SessionEnded {
            session_id: SessionId::from_raw("duel_1"),
            outcome: Outcome::DrawTimeout,
            winner_id: None,
            reason: OutcomeReason::Timeout,
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("winnerId"));
    }

    #[test]
    fn error_code_is_screaming_snake() {
        let json = ServerMessage::error(ErrorCode::JudgeUnavailable, "judge down")
            .to_json()
            .unwrap();
        assert!(json.contains("\"code\":\"JUDGE_UNAVAILABLE\""));
        assert!(json.contains("\"type\":\"error\""));
    }

    #[test]
    fn session_started_carries_public_challenge() {
        let msg = ServerMessage::SessionStarted {
            session_id: SessionId::from_raw("duel_1"),
            challenge: PublicChallenge {
                id: ChallengeId::from_raw("c1"),
                title: "Two Sum".into(),
                description: String::new(),
                difficulty: Difficulty::Easy,
                initial_code: String::new(),
                examples: vec![],
                time_limit_secs: 60,
                points: 100,
            },
            deadline: Utc::now(),
            opponent_id: UserId::from_raw("bob"),
            resumed: false,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["challenge"]["title"], "Two Sum");
        assert_eq!(json["opponentId"], "bob");
        assert!(json["deadline"].is_string());
    }
}
