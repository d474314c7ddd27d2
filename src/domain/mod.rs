//! Domain types and the ports through which the core reaches its external
//! dependencies.

pub mod classification;
pub mod payment;
pub mod ports;
