// src/query/mod.rs

//! Package queries
//!
//! A query is a predicate over package fields. The text form combines
//! conditions with `,` (and), `|` (or) and `!` (not):
//!
//! ```text
//! Priority (required), !$Architecture (source)
//! nginx (>= 1.18) {amd64} | Name (% libssl*)
//! $Source (~ "^linux-(signed|image)")
//! ```
//!
//! Capitalised words and `$`-prefixed words are fields; lowercase words
//! are dependency conditions matched by name or Provides; `name_version_arch`
//! selects one exact package. `Version`, `$Version` and `$SourceVersion`
//! compare with dpkg ordering, every other field compares as a string.
//!
//! Queries are pure predicates and hold no mutable state, so one query can
//! be evaluated against many lists from different threads.

mod lexer;
mod parser;

use crate::error::Result;
use crate::package::{Dependency, Package, PackageRef};
use crate::packagelist::PackageList;
use crate::version::{compare_versions, VersionRelation};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Fields compared with dpkg version ordering
const VERSION_FIELDS: &[&str] = &["Version", "$Version", "$SourceVersion"];

/// How a field condition tests the value
#[derive(Debug, Clone)]
pub enum FieldMatch {
    /// Field is present
    Exists,
    Compare(VersionRelation, String),
    /// Shell-style glob (`%`)
    Pattern(glob::Pattern),
    /// Regular expression (`~`), unanchored
    Regexp(regex::Regex),
}

/// Condition on one package field
#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub matcher: FieldMatch,
}

impl FieldCondition {
    pub fn matches(&self, package: &Package) -> bool {
        let Some(value) = package.field(&self.field) else {
            return false;
        };
        match &self.matcher {
            FieldMatch::Exists => true,
            FieldMatch::Compare(relation, expected) => {
                let ordering = if VERSION_FIELDS.contains(&self.field.as_str()) {
                    compare_versions(&value, expected)
                } else {
                    value.as_str().cmp(expected.as_str())
                };
                relation.accepts(ordering)
            }
            FieldMatch::Pattern(pattern) => pattern.matches(&value),
            FieldMatch::Regexp(re) => re.is_match(&value),
        }
    }
}

/// Parsed query
#[derive(Debug, Clone)]
pub enum Query {
    /// Selects every package
    MatchAll,
    Or(Box<Query>, Box<Query>),
    And(Box<Query>, Box<Query>),
    Not(Box<Query>),
    Field(FieldCondition),
    /// Package satisfying a dependency by name or Provides
    Dependency(Dependency),
    /// Exact `name_version_arch` reference
    Package {
        name: String,
        version: String,
        architecture: String,
    },
}

/// Parse query text, reporting the byte offset of the offending token
pub fn parse(input: &str) -> Result<Query> {
    parser::Parser::new(input)?.parse()
}

impl FromStr for Query {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

impl Query {
    /// Whether `package` satisfies the query
    pub fn matches(&self, package: &Package) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Or(left, right) => left.matches(package) || right.matches(package),
            Query::And(left, right) => left.matches(package) && right.matches(package),
            Query::Not(inner) => !inner.matches(package),
            Query::Field(condition) => condition.matches(package),
            Query::Dependency(dep) => package.satisfies(dep),
            Query::Package {
                name,
                version,
                architecture,
            } => {
                package.name() == name
                    && package.architecture() == architecture
                    && compare_versions(&package.version().to_string(), version) == Ordering::Equal
            }
        }
    }

    /// Packages of `list` satisfying the query, in key order
    ///
    /// Dependency conditions and package references use the list's
    /// indexes when it has them.
    pub fn select(&self, list: &PackageList) -> Vec<Arc<Package>> {
        let mut selected: BTreeMap<_, Arc<Package>> = BTreeMap::new();
        self.gather(list, &mut selected);
        selected.into_values().collect()
    }

    fn gather(&self, list: &PackageList, out: &mut BTreeMap<PackageRef, Arc<Package>>) {
        match self {
            Query::Or(left, right) => {
                left.gather(list, out);
                right.gather(list, out);
            }
            Query::And(left, right) => {
                let mut candidates = BTreeMap::new();
                left.gather(list, &mut candidates);
                for (key, package) in candidates {
                    if right.matches(&package) {
                        out.insert(key, package);
                    }
                }
            }
            Query::Dependency(dep) if list.is_indexed() => {
                for package in list.search(dep, true, true) {
                    out.insert(package.key(), package);
                }
            }
            Query::Package { name, .. } => {
                for package in list.by_name(name) {
                    if self.matches(&package) {
                        out.insert(package.key(), package);
                    }
                }
            }
            _ => {
                for package in list.packages() {
                    if self.matches(package) {
                        out.insert(package.key(), Arc::clone(package));
                    }
                }
            }
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("\"")
}

/// Canonical, fully parenthesised form that parses back to the same query
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::MatchAll => Ok(()),
            Query::Or(left, right) => write!(f, "({} | {})", left, right),
            Query::And(left, right) => write!(f, "({}, {})", left, right),
            Query::Not(inner) => write!(f, "!{}", inner),
            Query::Field(condition) => {
                f.write_str(&condition.field)?;
                match &condition.matcher {
                    FieldMatch::Exists => Ok(()),
                    FieldMatch::Compare(relation, value) => {
                        write!(f, " ({} ", relation.as_str())?;
                        write_quoted(f, value)?;
                        f.write_str(")")
                    }
                    FieldMatch::Pattern(pattern) => {
                        f.write_str(" (% ")?;
                        write_quoted(f, pattern.as_str())?;
                        f.write_str(")")
                    }
                    FieldMatch::Regexp(re) => {
                        f.write_str(" (~ ")?;
                        write_quoted(f, re.as_str())?;
                        f.write_str(")")
                    }
                }
            }
            Query::Dependency(dep) => write!(f, "{}", dep),
            Query::Package {
                name,
                version,
                architecture,
            } => write!(f, "{}_{}_{}", name, version, architecture),
        }
    }
}
