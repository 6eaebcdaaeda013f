use serde::{Deserialize, Serialize};

/// Terminal result of a duel. Once set it never changes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    PlayerAWin,
    PlayerBWin,
    DrawTimeout,
    Abandoned,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerAWin => "player_a_win",
            Self::PlayerBWin => "player_b_win",
            Self::DrawTimeout => "draw_timeout",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(self, Self::PlayerAWin | Self::PlayerBWin)
    }
}

/// Why the session ended. Two reasons can lead to the same outcome
/// (a win by solving vs. a win because the opponent left).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    Solved,
    OpponentLeft,
    Timeout,
    AllDisconnected,
}
