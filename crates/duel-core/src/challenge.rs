use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LibraryError;
use crate::ids::ChallengeId;

/// Longest duel a challenge may ask for (one day).
pub const MAX_TIME_LIMIT_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One input/expected-output pair. Hidden cases are judged but never shown
/// to participants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

impl TestCase {
    pub fn visible(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            is_hidden: false,
        }
    }

    pub fn hidden(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            is_hidden: true,
            ..Self::visible(input, expected_output)
        }
    }
}

/// A challenge as stored in the library, including hidden test cases.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: ChallengeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub initial_code: String,
    pub test_cases: Vec<TestCase>,
    /// Duel duration in seconds. Zero means "use the server default".
    #[serde(default)]
    pub time_limit_secs: u64,
    #[serde(default)]
    pub points: u32,
}

impl Challenge {
    /// The view sent to participants: hidden test cases are stripped.
    pub fn public_view(&self) -> PublicChallenge {
        PublicChallenge {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty,
            initial_code: self.initial_code.clone(),
            examples: self
                .test_cases
                .iter()
                .filter(|tc| !tc.is_hidden)
                .cloned()
                .collect(),
            time_limit_secs: self.time_limit_secs,
            points: self.points,
        }
    }
}

/// Participant-facing challenge description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicChallenge {
    pub id: ChallengeId,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub initial_code: String,
    pub examples: Vec<TestCase>,
    pub time_limit_secs: u64,
    pub points: u32,
}

/// Source of challenge content. The library owns problem text and test
/// cases; the server only ever references challenges by id.
#[async_trait]
pub trait ChallengeLibrary: Send + Sync {
    async fn get_challenge(&self, id: &ChallengeId) -> Result<Challenge, LibraryError>;
}
