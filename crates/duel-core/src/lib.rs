//! Shared vocabulary for the duel server: identifiers, the challenge and
//! verdict model, the collaborator traits (judge, challenge library) and the
//! closed set of wire messages exchanged with clients.

pub mod challenge;
pub mod errors;
pub mod ids;
pub mod judge;
pub mod messages;
pub mod outcome;

pub use challenge::{
    Challenge, ChallengeLibrary, Difficulty, PublicChallenge, TestCase, MAX_TIME_LIMIT_SECS,
};
pub use errors::{JudgeError, LibraryError};
pub use ids::{ChallengeId, ConnectionId, SessionId, UserId};
pub use judge::{JudgeGateway, TestResult, Verdict};
pub use messages::{ClientMessage, ErrorCode, ServerMessage};
pub use outcome::{Outcome, OutcomeReason};
