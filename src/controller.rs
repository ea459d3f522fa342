//! Service wiring: builds every subsystem from the configuration and runs them.

pub mod controller_handler;

pub use controller_handler::Controller;
