// src/package/dependency.rs

//! Dependency relations between packages
//!
//! A dependency names a package (or virtual package), an optional version
//! relation and an optional architecture qualifier. Control fields hold
//! comma-separated groups of `|`-separated alternatives:
//!
//! ```text
//! libc6 (>= 2.17), libssl3 | libssl1.1, perl:any
//! ```

use crate::error::{Error, Result};
use crate::version::{DebVersion, VersionRelation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Architecture qualifier matching every requested architecture
pub const ARCHITECTURE_ANY: &str = "any";

/// A single dependency on a package or virtual package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub relation: VersionRelation,
    /// Constraint version, present exactly when `relation` is not `DontCare`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<DebVersion>,
    /// Explicit architecture, `None` means the dependent's own architecture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

/// One comma-separated group of alternatives (`a | b`)
pub type DependencyVariants = Vec<Dependency>;

impl Dependency {
    /// An unversioned dependency on `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: VersionRelation::DontCare,
            version: None,
            architecture: None,
        }
    }

    /// A versioned dependency on `name`
    pub fn versioned(name: impl Into<String>, relation: VersionRelation, version: DebVersion) -> Self {
        Self {
            name: name.into(),
            relation,
            version: Some(version),
            architecture: None,
        }
    }

    /// Same dependency pinned to an architecture
    pub fn with_architecture(mut self, arch: impl Into<String>) -> Self {
        self.architecture = Some(arch.into());
        self
    }

    /// Whether the qualifier accepts every architecture
    pub fn is_any_architecture(&self) -> bool {
        self.architecture.as_deref() == Some(ARCHITECTURE_ANY)
    }

    /// Whether `version` satisfies the relation
    pub fn version_satisfied_by(&self, version: &DebVersion) -> bool {
        match (&self.relation, &self.version) {
            (VersionRelation::DontCare, _) | (_, None) => true,
            (relation, Some(constraint)) => relation.accepts(version.compare(constraint)),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.relation != VersionRelation::DontCare {
            if let Some(ref version) = self.version {
                write!(f, " ({} {})", self.relation, version)?;
            }
        }
        if let Some(ref arch) = self.architecture {
            write!(f, " {{{}}}", arch)?;
        }
        Ok(())
    }
}

/// Switches selecting which dependency edges are followed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyOptions {
    pub follow_recommends: bool,
    pub follow_suggests: bool,
    /// Follow binary packages to their source package
    pub follow_source: bool,
    /// Follow Build-Depends of source packages
    pub follow_build: bool,
    /// Add every alternative of `a | b`, not just the first resolvable one
    pub follow_all_variants: bool,
}

/// Parse one dependency: `name[:arch] [(op version)] [{arch}]`
///
/// Build restrictions (`[amd64 !i386]`) and build profiles (`<!nocheck>`)
/// are accepted and ignored.
pub fn parse_dependency(input: &str) -> Result<Dependency> {
    let mut rest = strip_restrictions(input.trim());

    let mut architecture = None;
    if rest.ends_with('}') {
        let open = rest.rfind('{').ok_or_else(|| {
            Error::ParseError(format!("unbalanced '}}' in dependency '{}'", input))
        })?;
        let arch = rest[open + 1..rest.len() - 1].trim();
        if arch.is_empty() {
            return Err(Error::ParseError(format!(
                "empty architecture in dependency '{}'",
                input
            )));
        }
        architecture = Some(arch.to_string());
        rest = rest[..open].trim_end();
    }

    let (name_part, relation, version) = match rest.find('(') {
        Some(open) => {
            let close = rest.rfind(')').filter(|&c| c > open).ok_or_else(|| {
                Error::ParseError(format!("missing ')' in dependency '{}'", input))
            })?;
            if !rest[close + 1..].trim().is_empty() {
                return Err(Error::ParseError(format!(
                    "unexpected text after ')' in dependency '{}'",
                    input
                )));
            }
            let constraint = rest[open + 1..close].trim();
            let op_len = constraint
                .find(|c: char| !matches!(c, '<' | '>' | '='))
                .unwrap_or(constraint.len());
            if op_len == 0 {
                return Err(Error::ParseError(format!(
                    "missing version relation in dependency '{}'",
                    input
                )));
            }
            let relation = VersionRelation::parse(&constraint[..op_len])?;
            let version = DebVersion::parse(&constraint[op_len..])?;
            (rest[..open].trim(), relation, Some(version))
        }
        None => (rest, VersionRelation::DontCare, None),
    };

    let (name, qualifier) = match name_part.split_once(':') {
        Some((n, q)) => (n, Some(q)),
        None => (name_part, None),
    };
    validate_name(name, input)?;

    if let Some(q) = qualifier {
        if architecture.is_some() {
            return Err(Error::ParseError(format!(
                "architecture given twice in dependency '{}'",
                input
            )));
        }
        // ':native' is the dependent's own architecture
        if q != "native" {
            architecture = Some(q.to_string());
        }
    }

    Ok(Dependency {
        name: name.to_string(),
        relation,
        version,
        architecture,
    })
}

/// Parse `a | b | c` into its alternatives
pub fn parse_dependency_variants(input: &str) -> Result<DependencyVariants> {
    input.split('|').map(parse_dependency).collect()
}

/// Parse a whole control field: comma-separated groups of alternatives
pub fn parse_dependency_field(input: &str) -> Result<Vec<DependencyVariants>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_dependency_variants)
        .collect()
}

/// Render a field back into control syntax
pub fn format_dependency_field(groups: &[DependencyVariants]) -> String {
    groups
        .iter()
        .map(|variants| {
            variants
                .iter()
                .map(Dependency::to_string)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn strip_restrictions(input: &str) -> &str {
    let mut end = input.len();
    for (open, close) in [('<', '>'), ('[', ']')] {
        let trimmed = input[..end].trim_end();
        if trimmed.ends_with(close) {
            if let Some(pos) = trimmed.rfind(open) {
                end = pos;
            }
        }
    }
    input[..end].trim_end()
}

fn validate_name(name: &str, input: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ParseError(format!(
            "missing package name in dependency '{}'",
            input
        )));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | ',' | '|' | '{' | '}'))
    {
        return Err(Error::ParseError(format!(
            "invalid package name '{}' in dependency '{}'",
            name, input
        )));
    }
    Ok(())
}
