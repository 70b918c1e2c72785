//! Library surface of vigil-server: the router and app state, reused by
//! the binary and the integration tests.

pub mod routes;

pub use routes::{create_router, AppState};
