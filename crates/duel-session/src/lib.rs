pub mod error;
pub mod session;
pub mod store;

pub use error::SessionError;
pub use session::{Seat, Session, Submission, SubmissionTicket};
pub use store::SessionStore;
