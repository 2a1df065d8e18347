//! Catalog kinds and their document shapes.

use serde::{Deserialize, Serialize};

/// Name of the document-level record count attribute, shared by all catalogs.
pub const COUNT_ATTR: &str = "packages";

/// The three repodata catalogs kept in lock-step by the merge engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    /// `primary.xml`: the authoritative catalog, identity carried by `<checksum>`.
    Primary,
    /// `other.xml`: changelogs, identity carried by the `pkgid` attribute.
    Other,
    /// `filelists.xml`: complete file lists, identity carried by the `pkgid` attribute.
    Filelists,
}

impl CatalogKind {
    /// Every kind, primary first.
    pub const ALL: [CatalogKind; 3] = [Self::Primary, Self::Other, Self::Filelists];

    /// Root element name of the catalog document.
    pub fn root_tag(self) -> &'static str {
        match self {
            Self::Primary => "metadata",
            Self::Other => "otherdata",
            Self::Filelists => "filelists",
        }
    }

    /// Namespace attributes written on a freshly created root element.
    pub fn namespaces(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Primary => &[
                ("xmlns", "http://linux.duke.edu/metadata/common"),
                ("xmlns:rpm", "http://linux.duke.edu/metadata/rpm"),
            ],
            Self::Other => &[("xmlns", "http://linux.duke.edu/metadata/other")],
            Self::Filelists => &[("xmlns", "http://linux.duke.edu/metadata/filelists")],
        }
    }

    /// Lowercase name, also the repomd `<data type>` value and file stem.
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Other => "other",
            Self::Filelists => "filelists",
        }
    }

    /// Suffix of the published, gzip-compressed catalog file.
    pub fn file_suffix(self) -> String {
        format!("{}.xml.gz", self.name())
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
