//! Shared container fixtures for integration tests.
//!
//! One PostgreSQL and one Redis container per test process, started lazily.
//! Every accessor returns `None` when Docker is unavailable so callers can
//! skip instead of fail. Tests share the containers and isolate themselves
//! through [`unique_app_id`].

mod fixtures;

pub use fixtures::*;
