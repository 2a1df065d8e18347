//! In-memory model of a decoded RPM header.
//!
//! The binary decoder lives in `rpmrepo-core`; this module only describes the
//! values it produces and the typed lookups the record emitters need.

use std::collections::BTreeMap;

/// Header tags consumed by the catalog emitters (RPM tag numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum HeaderTag {
    Name = 1000,
    Version = 1001,
    Release = 1002,
    Epoch = 1003,
    Summary = 1004,
    Description = 1005,
    BuildTime = 1006,
    BuildHost = 1007,
    Size = 1009,
    Vendor = 1011,
    License = 1014,
    Packager = 1015,
    Group = 1016,
    Url = 1020,
    Arch = 1022,
    SourceRpm = 1044,
    ArchiveSize = 1046,
    ProvideName = 1047,
    RequireFlags = 1048,
    RequireName = 1049,
    RequireVersion = 1050,
    ChangelogTime = 1080,
    ChangelogName = 1081,
    ChangelogText = 1082,
    ProvideFlags = 1112,
    ProvideVersion = 1113,
    DirIndexes = 1116,
    BaseNames = 1117,
    DirNames = 1118,
}

impl HeaderTag {
    /// Numeric tag as stored in the header index.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Decoded value of one header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// Any of the integer entry types, widened.
    Int(Vec<i64>),
    /// A single `STRING` entry.
    Str(String),
    /// `STRING_ARRAY` or `I18NSTRING` entries.
    StrArray(Vec<String>),
    /// Opaque `BIN` payload.
    Bin(Vec<u8>),
}

/// Tag-number keyed header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: BTreeMap<u32, TagValue>,
}

impl Header {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value stored under a raw tag number.
    pub fn insert_raw(&mut self, tag: u32, value: TagValue) {
        self.entries.insert(tag, value);
    }

    /// Insert or replace the value stored under `tag`.
    pub fn insert(&mut self, tag: HeaderTag, value: TagValue) {
        self.insert_raw(tag.code(), value);
    }

    /// Builder-style [`Header::insert`].
    pub fn with(mut self, tag: HeaderTag, value: TagValue) -> Self {
        self.insert(tag, value);
        self
    }

    /// Named lookup; absent tags yield an empty entry whose accessors fall back to defaults.
    pub fn entry(&self, tag: HeaderTag) -> Entry<'_> {
        Entry(self.entries.get(&tag.code()))
    }

    /// Entries in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &TagValue)> {
        self.entries.iter().map(|(tag, value)| (*tag, value))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Borrowed view over an optional header value.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a>(Option<&'a TagValue>);

impl Entry<'_> {
    /// Whether the tag was present in the header.
    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// First string value, or `default`.
    pub fn as_str(&self, default: &str) -> String {
        match self.0 {
            Some(TagValue::Str(s)) => s.clone(),
            Some(TagValue::StrArray(v)) => v.first().cloned().unwrap_or_else(|| default.to_string()),
            _ => default.to_string(),
        }
    }

    /// First integer value, or `default`.
    pub fn as_int(&self, default: i64) -> i64 {
        match self.0 {
            Some(TagValue::Int(v)) => v.first().copied().unwrap_or(default),
            _ => default,
        }
    }

    /// All string values (empty when absent).
    pub fn as_strings(&self) -> Vec<String> {
        match self.0 {
            Some(TagValue::Str(s)) => vec![s.clone()],
            Some(TagValue::StrArray(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    /// All integer values (empty when absent).
    pub fn as_ints(&self) -> Vec<i64> {
        match self.0 {
            Some(TagValue::Int(v)) => v.clone(),
            _ => Vec::new(),
        }
    }
}

/// One `%changelog` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    /// Unix timestamp of the entry.
    pub date: i64,
    /// Author line, usually `Name <mail> - version`.
    pub author: String,
    /// Free-text body.
    pub content: String,
}

/// Comparison flags of a dependency (`RPMSENSE_*` bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyFlags(pub i64);

impl DependencyFlags {
    const LESS: i64 = 0x02;
    const GREATER: i64 = 0x04;
    const EQUAL: i64 = 0x08;

    /// Repodata spelling of the comparison, if any.
    pub fn as_repodata(self) -> Option<&'static str> {
        let cmp = self.0 & (Self::LESS | Self::GREATER | Self::EQUAL);
        match cmp {
            x if x == Self::EQUAL => Some("EQ"),
            x if x == Self::LESS => Some("LT"),
            x if x == Self::GREATER => Some("GT"),
            x if x == Self::LESS | Self::EQUAL => Some("LE"),
            x if x == Self::GREATER | Self::EQUAL => Some("GE"),
            _ => None,
        }
    }
}

/// A provides/requires entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Capability name.
    pub name: String,
    /// Comparison flags.
    pub flags: DependencyFlags,
    /// Raw `[epoch:]version[-release]` string, empty when unversioned.
    pub version: String,
}

impl Dependency {
    /// Split the version into `(epoch, ver, rel)`; missing parts are `None`.
    pub fn evr(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        if self.version.is_empty() {
            return (None, None, None);
        }
        let (epoch, rest) = match self.version.split_once(':') {
            Some((e, rest)) => (Some(e), rest),
            None => (None, self.version.as_str()),
        };
        match rest.rsplit_once('-') {
            Some((ver, rel)) => (epoch, Some(ver), Some(rel)),
            None => (epoch, Some(rest), None),
        }
    }
}

/// Typed accessors over a [`Header`].
#[derive(Debug, Clone, Copy)]
pub struct HeaderTags<'a> {
    header: &'a Header,
}

#[allow(missing_docs)]
impl<'a> HeaderTags<'a> {
    /// Wrap a header.
    pub fn new(header: &'a Header) -> Self {
        Self { header }
    }

    fn string(&self, tag: HeaderTag) -> String {
        self.header.entry(tag).as_str("")
    }

    pub fn name(&self) -> String {
        self.string(HeaderTag::Name)
    }

    pub fn arch(&self) -> String {
        self.string(HeaderTag::Arch)
    }

    pub fn epoch(&self) -> i64 {
        self.header.entry(HeaderTag::Epoch).as_int(0)
    }

    pub fn version(&self) -> String {
        self.string(HeaderTag::Version)
    }

    pub fn release(&self) -> String {
        self.string(HeaderTag::Release)
    }

    pub fn summary(&self) -> String {
        self.string(HeaderTag::Summary)
    }

    pub fn description(&self) -> String {
        self.string(HeaderTag::Description)
    }

    pub fn packager(&self) -> String {
        self.string(HeaderTag::Packager)
    }

    pub fn url(&self) -> String {
        self.string(HeaderTag::Url)
    }

    pub fn vendor(&self) -> String {
        self.string(HeaderTag::Vendor)
    }

    pub fn license(&self) -> String {
        self.string(HeaderTag::License)
    }

    pub fn group(&self) -> String {
        self.string(HeaderTag::Group)
    }

    pub fn build_host(&self) -> String {
        self.string(HeaderTag::BuildHost)
    }

    pub fn source_rpm(&self) -> String {
        self.string(HeaderTag::SourceRpm)
    }

    pub fn build_time(&self) -> i64 {
        self.header.entry(HeaderTag::BuildTime).as_int(0)
    }

    pub fn installed_size(&self) -> i64 {
        self.header.entry(HeaderTag::Size).as_int(0)
    }

    pub fn archive_size(&self) -> i64 {
        self.header.entry(HeaderTag::ArchiveSize).as_int(0)
    }

    pub fn base_names(&self) -> Vec<String> {
        self.header.entry(HeaderTag::BaseNames).as_strings()
    }

    pub fn dir_names(&self) -> Vec<String> {
        self.header.entry(HeaderTag::DirNames).as_strings()
    }

    pub fn dir_indexes(&self) -> Vec<i64> {
        self.header.entry(HeaderTag::DirIndexes).as_ints()
    }

    /// Changelog entries, zipped from the time/name/text arrays.
    pub fn changelog(&self) -> Vec<ChangelogEntry> {
        let dates = self.header.entry(HeaderTag::ChangelogTime).as_ints();
        let authors = self.header.entry(HeaderTag::ChangelogName).as_strings();
        let texts = self.header.entry(HeaderTag::ChangelogText).as_strings();
        dates
            .into_iter()
            .zip(authors)
            .zip(texts)
            .map(|((date, author), content)| ChangelogEntry {
                date,
                author,
                content,
            })
            .collect()
    }

    pub fn provides(&self) -> Vec<Dependency> {
        self.dependencies(
            HeaderTag::ProvideName,
            HeaderTag::ProvideFlags,
            HeaderTag::ProvideVersion,
        )
    }

    pub fn requires(&self) -> Vec<Dependency> {
        self.dependencies(
            HeaderTag::RequireName,
            HeaderTag::RequireFlags,
            HeaderTag::RequireVersion,
        )
    }

    fn dependencies(&self, names: HeaderTag, flags: HeaderTag, versions: HeaderTag) -> Vec<Dependency> {
        let flags = self.header.entry(flags).as_ints();
        let versions = self.header.entry(versions).as_strings();
        self.header
            .entry(names)
            .as_strings()
            .into_iter()
            .enumerate()
            .map(|(idx, name)| Dependency {
                name,
                flags: DependencyFlags(flags.get(idx).copied().unwrap_or(0)),
                version: versions.get(idx).cloned().unwrap_or_default(),
            })
            .collect()
    }
}
