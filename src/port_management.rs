//! Port Range Allocator.
//!
//! Every user owns a fixed-size block of host ports published by their container.
//! A per-connection poll reads the container's listener table ([`PortDetector`]) and
//! maps what it finds into that block ([`PortAllocator::map_ports`]).

pub mod port_allocator;
pub mod port_detector;
pub mod types;

pub use port_allocator::PortAllocator;
pub use port_detector::PortDetector;
pub use types::{PortInfo, ServiceEndpoint};
