//! Content-addressed build cache
//!
//! Artifacts and check results are keyed by fingerprints derived from
//! their inputs. Entries are immutable once written.
//!
//! # Layout
//!
//! | Namespace | Key | Payload |
//! |-----------|-----|---------|
//! | `deps` | dependency fingerprint | dependency build receipt |
//! | `project` | full fingerprint | project build receipt |
//! | `checks` | check key | recorded check result |
//!
//! Concurrent requests for one key are coalesced onto a single execution
//! by [`Flight`].

pub mod fingerprint;
pub mod flight;
pub mod store;

pub use fingerprint::{check_key, fingerprint_deps, fingerprint_project, DependencyInputs, Fingerprint};
pub use flight::Flight;
pub use store::{ArtifactStore, EntryInfo, Namespace, StoredEntry};
