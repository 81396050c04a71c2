//! Persistent environment cache
//!
//! Content-addressed store of provisioned environments keyed by a
//! fingerprint of the inputs that define them.
//!
//! # Layout
//!
//! ```text
//! <cache root>/
//!   .locks/<fingerprint>.lock    advisory lock per environment
//!   <fingerprint>/               provisioned environment
//!     activate.ts                last activation time
//! ```
//!
//! # Entry States
//!
//! | State | On disk | Lookup |
//! |-------|---------|--------|
//! | Miss | no directory | provision |
//! | Incomplete | directory, no valid marker | deleted, provision |
//! | Cached | directory + marker | reuse |

pub mod eviction;
pub mod fingerprint;
pub mod lock;
pub mod store;

pub use eviction::{enforce_bound, EvictionReport, DEFAULT_MAX_ENTRIES};
pub use fingerprint::{fingerprint, fingerprint_bytes, Fingerprint};
pub use lock::EntryLock;
pub use store::{CacheEntry, Clock, EnvStore};
