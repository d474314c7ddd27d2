//! Input and output adapters for the command-line batch runner.

pub mod csv;
pub mod json;
