//! The package view consumed by the record emitters.

use crate::digest::Checksum;
use crate::header::{Header, HeaderTags};

/// Read-only view of one package, as consumed by the record emitters.
///
/// Produced once per uploaded file by the header decoder; the merge engine
/// never mutates it.
pub trait PackageDescriptor: Send + Sync {
    /// Content checksum, the record identity.
    fn checksum(&self) -> &Checksum;

    /// Package file size in bytes.
    fn size(&self) -> u64;

    /// Repository-relative location (`<location href>`).
    fn location(&self) -> &str;

    /// Decoded header for named-tag lookups.
    fn header(&self) -> &Header;

    /// Byte span of the main header inside the package file.
    fn header_range(&self) -> (u64, u64) {
        (0, 0)
    }

    /// Typed accessors over [`PackageDescriptor::header`].
    fn tags(&self) -> HeaderTags<'_> {
        HeaderTags::new(self.header())
    }
}

impl<T: PackageDescriptor + ?Sized> PackageDescriptor for std::sync::Arc<T> {
    fn checksum(&self) -> &Checksum {
        (**self).checksum()
    }
    fn size(&self) -> u64 {
        (**self).size()
    }
    fn location(&self) -> &str {
        (**self).location()
    }
    fn header(&self) -> &Header {
        (**self).header()
    }
    fn header_range(&self) -> (u64, u64) {
        (**self).header_range()
    }
}
