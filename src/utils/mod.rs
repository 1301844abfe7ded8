//! The `utils` module holds definitions shared by the broker and transport
//! layers: error types and logging setup.

pub mod error;
pub mod logging;
