//! Record emitters: one `<package>` subtree per descriptor, per catalog kind.

use regex::RegexSet;
use rpmrepo_schema::{CatalogKind, Dependency, HeaderTags, PackageDescriptor};
use std::collections::HashSet;
use std::io::Write;

use crate::error::Result;
use crate::xml::XmlWriter;

/// Paths matching any pattern are left out of file listings.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Option<RegexSet>,
}

impl PathFilter {
    /// A filter that suppresses nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a filter from regular expressions.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for the first invalid pattern.
    pub fn new<I, S>(patterns: I) -> std::result::Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSet::new(patterns)?;
        Ok(Self {
            patterns: (!set.is_empty()).then_some(set),
        })
    }

    pub fn excludes(&self, path: &str) -> bool {
        self.patterns.as_ref().is_some_and(|set| set.is_match(path))
    }
}

/// Kind-keyed emitter table entry.
#[derive(Debug, Clone)]
pub enum RecordEmitter {
    Primary,
    Other,
    Filelists(PathFilter),
}

impl RecordEmitter {
    pub fn for_kind(kind: CatalogKind, filter: &PathFilter) -> Self {
        match kind {
            CatalogKind::Primary => Self::Primary,
            CatalogKind::Other => Self::Other,
            CatalogKind::Filelists => Self::Filelists(filter.clone()),
        }
    }

    pub fn kind(&self) -> CatalogKind {
        match self {
            Self::Primary => CatalogKind::Primary,
            Self::Other => CatalogKind::Other,
            Self::Filelists(_) => CatalogKind::Filelists,
        }
    }

    /// Write the complete `<package>` subtree for `pkg`.
    pub fn emit<W, P>(&self, out: &mut XmlWriter<W>, pkg: &P) -> Result<()>
    where
        W: Write,
        P: PackageDescriptor + ?Sized,
    {
        match self {
            Self::Primary => primary(out, pkg),
            Self::Other => {
                package_and_version(out, pkg)?;
                for entry in pkg.tags().changelog() {
                    let date = entry.date.to_string();
                    out.element(
                        "changelog",
                        &[("author", entry.author.as_str()), ("date", date.as_str())],
                        &entry.content,
                    )?;
                }
                out.end("package")
            }
            Self::Filelists(filter) => {
                package_and_version(out, pkg)?;
                for (path, is_dir) in file_entries(&pkg.tags()) {
                    if filter.excludes(&path) {
                        continue;
                    }
                    file_element(out, &path, is_dir)?;
                }
                out.end("package")
            }
        }
    }
}

/// Opening `<package pkgid name arch>` plus `<version/>`; the caller closes `<package>`.
fn package_and_version<W: Write, P: PackageDescriptor + ?Sized>(
    out: &mut XmlWriter<W>,
    pkg: &P,
) -> Result<()> {
    let tags = pkg.tags();
    let (name, arch) = (tags.name(), tags.arch());
    out.start(
        "package",
        &[
            ("pkgid", pkg.checksum().hex()),
            ("name", name.as_str()),
            ("arch", arch.as_str()),
        ],
    )?;
    version(out, &tags)
}

fn version<W: Write>(out: &mut XmlWriter<W>, tags: &HeaderTags<'_>) -> Result<()> {
    let (epoch, ver, rel) = (tags.epoch().to_string(), tags.version(), tags.release());
    out.empty(
        "version",
        &[
            ("epoch", epoch.as_str()),
            ("ver", ver.as_str()),
            ("rel", rel.as_str()),
        ],
    )
}

fn file_element<W: Write>(out: &mut XmlWriter<W>, path: &str, is_dir: bool) -> Result<()> {
    if is_dir {
        out.element("file", &[("type", "dir")], path)
    } else {
        out.element("file", &[], path)
    }
}

/// Visible file paths with their directory flag.
///
/// Entries whose base name is empty or dot-prefixed are excluded, as are
/// entries pointing at a directory index the header does not carry.
fn file_entries(tags: &HeaderTags<'_>) -> Vec<(String, bool)> {
    let dirs = tags.dir_names();
    let dirset: HashSet<&str> = dirs.iter().map(String::as_str).collect();
    let indexes = tags.dir_indexes();
    tags.base_names()
        .into_iter()
        .zip(indexes)
        .filter(|(base, _)| !base.is_empty() && !base.starts_with('.'))
        .filter_map(|(base, idx)| {
            let dir = dirs.get(usize::try_from(idx).ok()?)?;
            let path = format!("{dir}{base}");
            let is_dir = dirset.contains(format!("{path}/").as_str());
            Some((path, is_dir))
        })
        .collect()
}

/// Files worth listing in primary, following createrepo's selection.
fn is_primary_file(path: &str) -> bool {
    path.starts_with("/etc/") || path.contains("bin/") || path == "/usr/lib/sendmail"
}

fn primary<W: Write, P: PackageDescriptor + ?Sized>(out: &mut XmlWriter<W>, pkg: &P) -> Result<()> {
    let tags = pkg.tags();
    let sum = pkg.checksum();
    let build = tags.build_time().to_string();
    let (start, end) = pkg.header_range();

    out.start("package", &[("type", "rpm")])?;
    out.element("name", &[], &tags.name())?;
    out.element("arch", &[], &tags.arch())?;
    version(out, &tags)?;
    out.element(
        "checksum",
        &[("type", sum.digest().name()), ("pkgid", "YES")],
        sum.hex(),
    )?;
    out.element("summary", &[], &tags.summary())?;
    out.element("description", &[], &tags.description())?;
    out.element("packager", &[], &tags.packager())?;
    out.element("url", &[], &tags.url())?;
    out.empty("time", &[("file", build.as_str()), ("build", build.as_str())])?;
    let size = pkg.size().to_string();
    let installed = tags.installed_size().to_string();
    let archive = tags.archive_size().to_string();
    out.empty(
        "size",
        &[
            ("package", size.as_str()),
            ("installed", installed.as_str()),
            ("archive", archive.as_str()),
        ],
    )?;
    out.empty("location", &[("href", pkg.location())])?;

    out.start("format", &[])?;
    out.element("rpm:license", &[], &tags.license())?;
    out.element("rpm:vendor", &[], &tags.vendor())?;
    out.element("rpm:group", &[], &tags.group())?;
    out.element("rpm:buildhost", &[], &tags.build_host())?;
    out.element("rpm:sourcerpm", &[], &tags.source_rpm())?;
    let (start, end) = (start.to_string(), end.to_string());
    out.empty(
        "rpm:header-range",
        &[("start", start.as_str()), ("end", end.as_str())],
    )?;
    dependencies(out, "rpm:provides", &tags.provides())?;
    let requires: Vec<Dependency> = tags
        .requires()
        .into_iter()
        .filter(|dep| !dep.name.starts_with("rpmlib("))
        .collect();
    dependencies(out, "rpm:requires", &requires)?;
    for (path, is_dir) in file_entries(&tags) {
        if is_primary_file(&path) {
            file_element(out, &path, is_dir)?;
        }
    }
    out.end("format")?;
    out.end("package")
}

fn dependencies<W: Write>(out: &mut XmlWriter<W>, tag: &str, deps: &[Dependency]) -> Result<()> {
    if deps.is_empty() {
        return Ok(());
    }
    out.start(tag, &[])?;
    for dep in deps {
        let mut attrs: Vec<(&str, &str)> = vec![("name", dep.name.as_str())];
        if let Some(flags) = dep.flags.as_repodata() {
            attrs.push(("flags", flags));
        }
        let (epoch, ver, rel) = dep.evr();
        if let Some(ver) = ver {
            attrs.push(("epoch", epoch.unwrap_or("0")));
            attrs.push(("ver", ver));
        }
        if let Some(rel) = rel {
            attrs.push(("rel", rel));
        }
        out.empty("rpm:entry", &attrs)?;
    }
    out.end(tag)
}
