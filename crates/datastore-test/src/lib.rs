//! Datastore Test - Shared test utilities for the scoped data store.
//!
//! This crate provides test doubles and fixtures that integration tests of
//! the storage crates use as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! datastore-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use datastore_test::{RecordingNotifier, test_service};
//!
//! #[tokio::test]
//! async fn test_set_emits_event() {
//!     let (service, events, _store) = test_service();
//!     service.set("k", 1, None).await.unwrap();
//!     assert_eq!(events.event_types(), vec!["set"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
