pub mod auth;
pub mod errors;
pub mod rate_limit;
pub mod routes;
pub mod startup;
pub mod state;
pub mod sync_sessions;

pub use startup::{app, run};
pub use state::AppState;
