// src/package/mod.rs

//! Package records and package references
//!
//! A [`Package`] is an immutable record parsed from a repository index. It
//! is identified solely by its [`PackageRef`], a key derived from the
//! architecture, name, version and a digest of the file list:
//!
//! ```text
//! Pamd64 nginx 1.18.0-6 5c6e12a4f9d0b3e7
//! ```
//!
//! Keys sharing a Name+Architecture are adjacent in byte order, which the
//! reference list algebra relies on.

mod dependency;

pub use dependency::{
    format_dependency_field, parse_dependency, parse_dependency_field,
    parse_dependency_variants, Dependency, DependencyOptions, DependencyVariants,
    ARCHITECTURE_ANY,
};

use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use crate::version::{DebVersion, VersionRelation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, EnumString};
use xxhash_rust::xxh3::Xxh3;

/// Architecture of packages installable everywhere
pub const ARCHITECTURE_ALL: &str = "all";

/// Pseudo architecture of source packages
pub const ARCHITECTURE_SOURCE: &str = "source";

/// Kind of package record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    Deb,
    Udeb,
    Source,
}

/// Content key of a package
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(String);

impl PackageRef {
    /// Wrap an existing key, checking its shape
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let valid = key.starts_with('P') && key[1..].split(' ').count() == 4;
        if !valid {
            return Err(Error::ParseError(format!("malformed package key '{}'", key)));
        }
        Ok(Self(key))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn part(&self, index: usize) -> &str {
        self.0[1..].split(' ').nth(index).unwrap_or("")
    }

    pub fn architecture(&self) -> &str {
        self.part(0)
    }

    pub fn name(&self) -> &str {
        self.part(1)
    }

    pub fn version(&self) -> &str {
        self.part(2)
    }

    pub fn files_hash(&self) -> &str {
        self.part(3)
    }

    /// Whether both keys name the same package on the same architecture
    pub fn same_name_and_architecture(&self, other: &PackageRef) -> bool {
        self.architecture() == other.architecture() && self.name() == other.name()
    }

    /// Same Name+Architecture+Version with a different file list
    pub fn conflicts_with(&self, other: &PackageRef) -> bool {
        self != other
            && self.same_name_and_architecture(other)
            && self.version() == other.version()
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A file belonging to a package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageFile {
    /// Base name, e.g. `nginx_1.18.0-6_amd64.deb`
    pub filename: String,
    /// Directory relative to the archive root, e.g. `pool/main/n/nginx`
    pub download_path: String,
    pub checksums: ChecksumInfo,
}

impl PackageFile {
    pub fn new(filename: impl Into<String>, download_path: impl Into<String>, checksums: ChecksumInfo) -> Self {
        Self {
            filename: filename.into(),
            download_path: download_path.into(),
            checksums,
        }
    }

    /// Path relative to the archive root
    pub fn download_url_path(&self) -> String {
        let dir = self.download_path.trim_matches('/');
        if dir.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", dir, self.filename)
        }
    }
}

/// An immutable package record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    name: String,
    version: DebVersion,
    architecture: String,
    #[serde(default)]
    package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    provides: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pre_depends: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recommends: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    suggests: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    build_depends: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    build_depends_indep: Vec<DependencyVariants>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<PackageFile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extra: BTreeMap<String, String>,
}

impl Package {
    /// Create a package from its identifying fields
    ///
    /// Architecture `source` yields a source package record.
    pub fn new(name: impl Into<String>, version: &str, architecture: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let architecture = architecture.into();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::ParseError(format!("invalid package name '{}'", name)));
        }
        if architecture.is_empty() || architecture.contains(char::is_whitespace) {
            return Err(Error::ParseError(format!(
                "invalid architecture '{}' for package {}",
                architecture, name
            )));
        }
        let package_type = if architecture == ARCHITECTURE_SOURCE {
            PackageType::Source
        } else {
            PackageType::Deb
        };

        Ok(Self {
            name,
            version: DebVersion::parse(version)?,
            architecture,
            package_type,
            source: None,
            provides: Vec::new(),
            depends: Vec::new(),
            pre_depends: Vec::new(),
            recommends: Vec::new(),
            suggests: Vec::new(),
            build_depends: Vec::new(),
            build_depends_indep: Vec::new(),
            files: Vec::new(),
            extra: BTreeMap::new(),
        })
    }

    /// Mark a binary package as an installer udeb
    pub fn as_udeb(mut self) -> Self {
        if self.package_type == PackageType::Deb {
            self.package_type = PackageType::Udeb;
        }
        self
    }

    /// Set the `Source` field (`name` or `name (version)`)
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set `Provides`; versioned entries must use `=`
    pub fn with_provides(mut self, field: &str) -> Result<Self> {
        let mut provides = Vec::new();
        for variants in parse_dependency_field(field)? {
            for provide in variants {
                if !matches!(provide.relation, VersionRelation::DontCare | VersionRelation::Equal) {
                    return Err(Error::ParseError(format!(
                        "Provides entry '{}' of {} must use '='",
                        provide, self.name
                    )));
                }
                provides.push(provide);
            }
        }
        self.provides = provides;
        Ok(self)
    }

    pub fn with_depends(mut self, field: &str) -> Result<Self> {
        self.depends = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_pre_depends(mut self, field: &str) -> Result<Self> {
        self.pre_depends = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_recommends(mut self, field: &str) -> Result<Self> {
        self.recommends = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_suggests(mut self, field: &str) -> Result<Self> {
        self.suggests = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_build_depends(mut self, field: &str) -> Result<Self> {
        self.build_depends = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_build_depends_indep(mut self, field: &str) -> Result<Self> {
        self.build_depends_indep = parse_dependency_field(field)?;
        Ok(self)
    }

    pub fn with_file(mut self, file: PackageFile) -> Self {
        self.files.push(file);
        self
    }

    /// Attach an arbitrary control field (Priority, Section, ...)
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &DebVersion {
        &self.version
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    pub fn is_source(&self) -> bool {
        self.package_type == PackageType::Source
    }

    pub fn provides(&self) -> &[Dependency] {
        &self.provides
    }

    pub fn depends(&self) -> &[DependencyVariants] {
        &self.depends
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.files
    }

    /// Name of the source package this package was built from
    pub fn source_name(&self) -> &str {
        match self.source.as_deref() {
            Some(source) => source.split_whitespace().next().unwrap_or(&self.name),
            None => &self.name,
        }
    }

    /// Version of the source package, from `Source: name (version)` or the
    /// package's own version
    pub fn source_version(&self) -> String {
        self.source
            .as_deref()
            .and_then(|s| {
                let open = s.find('(')?;
                let close = s.rfind(')')?;
                (close > open).then(|| s[open + 1..close].trim().to_string())
            })
            .unwrap_or_else(|| self.version.to_string())
    }

    /// Digest of the file list, part of the key
    pub fn files_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for file in &self.files {
            hasher.update(file.filename.as_bytes());
            hasher.update(&[0]);
            hasher.update(&file.checksums.size.to_le_bytes());
            let digest = file
                .checksums
                .sha256
                .as_deref()
                .or(file.checksums.md5.as_deref())
                .unwrap_or("");
            hasher.update(digest.as_bytes());
            hasher.update(&[0]);
        }
        hasher.digest()
    }

    /// Content key of this package
    pub fn key(&self) -> PackageRef {
        PackageRef(format!(
            "P{} {} {} {:016x}",
            self.architecture,
            self.name,
            self.version,
            self.files_hash()
        ))
    }

    /// Whether the package is installable on `arch`
    ///
    /// `all` packages match every architecture except `source`.
    pub fn matches_architecture(&self, arch: &str) -> bool {
        if self.architecture == ARCHITECTURE_ALL && arch != ARCHITECTURE_SOURCE {
            return true;
        }
        self.architecture == arch
    }

    fn matches_dependency_architecture(&self, dep: &Dependency) -> bool {
        match dep.architecture.as_deref() {
            None => true,
            Some(ARCHITECTURE_ANY) => !self.is_source(),
            Some(arch) => self.matches_architecture(arch),
        }
    }

    /// Whether this package satisfies `dep` by its own name and version
    pub fn matches_dependency(&self, dep: &Dependency) -> bool {
        self.name == dep.name
            && self.matches_dependency_architecture(dep)
            && dep.version_satisfied_by(&self.version)
    }

    /// Whether one of this package's Provides satisfies `dep`
    ///
    /// An unversioned Provides only satisfies an unversioned dependency.
    pub fn provides_dependency(&self, dep: &Dependency) -> bool {
        if !self.matches_dependency_architecture(dep) {
            return false;
        }
        self.provides.iter().any(|provide| {
            provide.name == dep.name
                && match (&dep.relation, &provide.version) {
                    (VersionRelation::DontCare, _) => true,
                    (_, Some(provided)) => dep.version_satisfied_by(provided),
                    (_, None) => false,
                }
        })
    }

    /// Whether `dep` is satisfied by name or by Provides
    pub fn satisfies(&self, dep: &Dependency) -> bool {
        self.matches_dependency(dep) || self.provides_dependency(dep)
    }

    /// Dependency groups selected by `options`
    pub fn dependencies(&self, options: &DependencyOptions) -> Vec<DependencyVariants> {
        let mut groups: Vec<DependencyVariants> = Vec::new();
        groups.extend(self.pre_depends.iter().cloned());
        groups.extend(self.depends.iter().cloned());
        if options.follow_recommends {
            groups.extend(self.recommends.iter().cloned());
        }
        if options.follow_suggests {
            groups.extend(self.suggests.iter().cloned());
        }
        if options.follow_build && self.is_source() {
            groups.extend(self.build_depends.iter().cloned());
            groups.extend(self.build_depends_indep.iter().cloned());
        }
        if options.follow_source && !self.is_source() {
            if let Ok(version) = DebVersion::parse(&self.source_version()) {
                groups.push(vec![
                    Dependency::versioned(self.source_name(), VersionRelation::Equal, version)
                        .with_architecture(ARCHITECTURE_SOURCE),
                ]);
            }
        }
        groups
    }

    /// Value of a control field or `$`-prefixed special field
    pub fn field(&self, name: &str) -> Option<String> {
        let deps = |groups: &[DependencyVariants]| {
            (!groups.is_empty()).then(|| format_dependency_field(groups))
        };
        match name {
            "Name" | "Package" => Some(self.name.clone()),
            "Version" | "$Version" => Some(self.version.to_string()),
            "Architecture" | "$Architecture" => Some(self.architecture.clone()),
            "$Source" => Some(self.source_name().to_string()),
            "$SourceVersion" => Some(self.source_version()),
            "$PackageType" => Some(self.package_type.to_string()),
            "Source" => self.source.clone(),
            "Provides" => (!self.provides.is_empty()).then(|| {
                self.provides
                    .iter()
                    .map(Dependency::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            }),
            "Depends" => deps(&self.depends),
            "Pre-Depends" => deps(&self.pre_depends),
            "Recommends" => deps(&self.recommends),
            "Suggests" => deps(&self.suggests),
            "Build-Depends" => deps(&self.build_depends),
            "Build-Depends-Indep" => deps(&self.build_depends_indep),
            _ if name.starts_with('$') => None,
            _ => self.extra.get(name).cloned(),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nginx() -> Package {
        Package::new("nginx", "1.18.0-6", "amd64")
            .unwrap()
            .with_depends("libc6 (>= 2.17), libssl3 | libssl1.1")
            .unwrap()
            .with_recommends("nginx-doc")
            .unwrap()
            .with_source("nginx-src (1.18.0-6)")
            .with_field("Priority", "optional")
    }

    #[test]
    fn test_key_layout() {
        let pkg = nginx();
        let key = pkg.key();
        assert!(key.as_str().starts_with("Pamd64 nginx 1.18.0-6 "));
        assert_eq!(key.architecture(), "amd64");
        assert_eq!(key.name(), "nginx");
        assert_eq!(key.version(), "1.18.0-6");
        assert_eq!(key.files_hash().len(), 16);
        assert_eq!(PackageRef::parse(key.as_str()).unwrap(), key);
    }

    #[test]
    fn test_key_depends_on_files() {
        let plain = nginx();
        let with_file = nginx().with_file(PackageFile::new(
            "nginx_1.18.0-6_amd64.deb",
            "pool/main/n/nginx",
            ChecksumInfo::with_sha256(10, "ab".repeat(32)),
        ));
        assert_ne!(plain.key(), with_file.key());
        assert!(plain.key().conflicts_with(&with_file.key()));
    }

    #[test]
    fn test_malformed_key() {
        assert!(PackageRef::parse("Xamd64 nginx 1.0 00").is_err());
        assert!(PackageRef::parse("Pamd64 nginx").is_err());
    }

    #[test]
    fn test_matches_architecture() {
        let all = Package::new("tzdata", "2024a", "all").unwrap();
        assert!(all.matches_architecture("amd64"));
        assert!(!all.matches_architecture("source"));

        let src = Package::new("nginx", "1.0", "source").unwrap();
        assert!(src.is_source());
        assert!(src.matches_architecture("source"));
        assert!(!src.matches_architecture("amd64"));
    }

    #[test]
    fn test_provides_versioning() {
        let pkg = Package::new("mawk", "1.3.4", "amd64")
            .unwrap()
            .with_provides("awk, awk-impl (= 2.0)")
            .unwrap();
        assert!(pkg.satisfies(&parse_dependency("awk").unwrap()));
        assert!(!pkg.satisfies(&parse_dependency("awk (>= 1.0)").unwrap()));
        assert!(pkg.satisfies(&parse_dependency("awk-impl (>= 1.0)").unwrap()));
        assert!(!pkg.satisfies(&parse_dependency("awk-impl (>> 2.0)").unwrap()));
        assert!(Package::new("x", "1", "amd64")
            .unwrap()
            .with_provides("y (>= 1)")
            .is_err());
    }

    #[test]
    fn test_dependency_architecture_qualifiers() {
        let pkg = Package::new("perl", "5.36", "amd64").unwrap();
        assert!(pkg.matches_dependency(&parse_dependency("perl:any").unwrap()));
        assert!(pkg.matches_dependency(&parse_dependency("perl {amd64}").unwrap()));
        assert!(!pkg.matches_dependency(&parse_dependency("perl {i386}").unwrap()));
    }

    #[test]
    fn test_dependencies_respect_options() {
        let pkg = nginx();
        assert_eq!(pkg.dependencies(&DependencyOptions::default()).len(), 2);

        let options = DependencyOptions {
            follow_recommends: true,
            follow_source: true,
            ..Default::default()
        };
        let groups = pkg.dependencies(&options);
        assert_eq!(groups.len(), 4);
        let source_dep = &groups[3][0];
        assert_eq!(source_dep.name, "nginx-src");
        assert_eq!(source_dep.architecture.as_deref(), Some(ARCHITECTURE_SOURCE));
        assert_eq!(source_dep.to_string(), "nginx-src (= 1.18.0-6) {source}");
    }

    #[test]
    fn test_fields() {
        let pkg = nginx();
        assert_eq!(pkg.field("Name").as_deref(), Some("nginx"));
        assert_eq!(pkg.field("$Source").as_deref(), Some("nginx-src"));
        assert_eq!(pkg.field("$SourceVersion").as_deref(), Some("1.18.0-6"));
        assert_eq!(pkg.field("$PackageType").as_deref(), Some("deb"));
        assert_eq!(pkg.field("Priority").as_deref(), Some("optional"));
        assert_eq!(
            pkg.field("Depends").as_deref(),
            Some("libc6 (>= 2.17), libssl3 | libssl1.1")
        );
        assert_eq!(pkg.field("Section"), None);
        assert_eq!(pkg.field("$Unknown"), None);
    }

    #[test]
    fn test_serde_roundtrip_preserves_key() {
        let pkg = nginx();
        let json = serde_json::to_string(&pkg).unwrap();
        let back: Package = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key(), pkg.key());
        assert_eq!(back, pkg);
    }

    #[test]
    fn test_display() {
        assert_eq!(nginx().to_string(), "nginx_1.18.0-6_amd64");
    }
}
