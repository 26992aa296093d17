//! Test utilities for s3-janitor.
//!
//! Provides a scriptable in-memory storage client so the reaper can be
//! exercised hermetically: seeded uploads, forced pagination, and per-call
//! fault injection (transient failures, not-found races, access denial).
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or
//! during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod fake_client;

pub use fake_client::{FakeClientFactory, FakeStorageClient};
