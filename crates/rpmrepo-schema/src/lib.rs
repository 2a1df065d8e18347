//! Shared types for rpmrepo: digests, catalog kinds, and the RPM header model.

pub mod catalog;
pub mod descriptor;
pub mod digest;
pub mod header;

// Re-exports
pub use catalog::{COUNT_ATTR, CatalogKind};
pub use descriptor::PackageDescriptor;
pub use digest::{Checksum, Digest};
pub use header::{
    ChangelogEntry, Dependency, DependencyFlags, Entry, Header, HeaderTag, HeaderTags, TagValue,
};
