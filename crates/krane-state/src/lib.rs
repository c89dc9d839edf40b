//! krane-state: embedded key-value store for Krane.
//!
//! Backed by [redb](https://docs.rs/redb). Data is organized into named
//! collections (one redb table each) holding `&str` keys and opaque byte
//! values. Keys are ordered lexicographically, so range scans over
//! RFC 3339 timestamps come back in chronological order.
//!
//! # Lifecycle
//!
//! Exactly one `StateStore` is opened per process and handed to every
//! component that needs it. The handle is `Clone` + `Send` + `Sync`
//! (backed by `Arc<Database>`); clones share the same database.
//!
//! Collections must exist before they are written to. The well-known
//! collections listed in [`collections`] are created on open; per-deployment
//! collections are created and dropped explicitly by their owners.

pub mod collections;
pub mod error;
pub mod store;

pub use error::{StateError, StateResult};
pub use store::StateStore;
