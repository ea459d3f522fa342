//! Web interface: the real-time websocket channel at `/ws` and the HTTP endpoints
//! for files, ports, health and stats, all behind access-token authentication
//! except `/health`.

pub mod auth;
pub mod routes;
pub mod types;
pub mod web_server;

pub use auth::TokenVerifier;
pub use web_server::WebServer;
