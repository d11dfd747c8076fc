//! Operational HTTP API for the server role
//!
//! - GET /health - Health check
//! - GET /sessions - Accumulator state of every known session
//! - GET /sessions/:id - One session
//! - POST /sessions/:id/cancel - Abandon the turn in progress

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
