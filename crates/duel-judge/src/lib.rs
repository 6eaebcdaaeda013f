//! Collaborator implementations: the judge client (HTTP, retry wrapper,
//! scripted mock) and the challenge library.

pub mod http;
pub mod library;
pub mod mock;
pub mod reliable;

pub use http::{HttpJudge, UnconfiguredJudge};
pub use library::InMemoryLibrary;
pub use mock::{MockJudge, MockResponse};
pub use reliable::{ReliableConfig, ReliableJudge};
