pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod error_handling;
pub mod file_management;
pub mod port_management;
pub mod session_management;
pub mod storage;
pub mod terminal_management;
pub mod web_interface;
