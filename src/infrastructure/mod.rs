//! In-process adapters for the domain ports.

pub mod in_memory;
pub mod scripted_gateway;
