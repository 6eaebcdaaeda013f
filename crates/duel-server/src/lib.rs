pub mod coordinator;
pub mod lobby;
pub mod notify;
pub mod registry;
pub mod server;

pub use coordinator::{CoordinatorConfig, CoordinatorError, SessionCoordinator};
pub use server::{build_router, start, AppState, HealthResponse, ServerConfig, ServerHandle};
