//! End-to-end test support: an in-process stand-in for the payments backend, plus JSON helpers for assertions.
pub mod helpers;
pub mod mock_backend;

pub use mock_backend::{MockBackend, MockServer};
