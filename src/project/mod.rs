//! Project inputs: manifest, lockfile, registry, resolution and sources
//!
//! Everything here reads or derives the declared state of a project; none
//! of it invokes the toolchain.

pub mod lockfile;
pub mod manifest;
pub mod registry;
pub mod resolve;
pub mod snapshot;

pub use lockfile::{LockedPackage, Lockfile, LOCKFILE};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use registry::{Registry, RegistryEntry};
pub use resolve::{resolve, Resolution};
pub use snapshot::{ExclusionRules, SnapshotEntry, SourceSnapshot};
