//! Context Fixture: lifecycle and synchronization harness for persistence contexts
//!
//! Provisions an interactive, a background and a search context over a shared
//! store, runs their work on serialized lanes, and lets tests wait deterministically
//! for all of it to finish before asserting.

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod fixture;
pub mod keychain;
pub mod logging;
pub mod store;
pub mod types;

pub use concurrency::DispatchGroup;
pub use context::ManagedContext;
pub use error::HarnessError;
pub use fixture::ContextGroup;
pub use types::ContextRole;
