// src/version/mod.rs

//! Debian version handling and relation matching
//!
//! Versions follow dpkg's `[epoch:]upstream[-revision]` format and compare
//! with dpkg's segment algorithm: non-digit runs compare character by
//! character (tilde sorts before everything, even the end of the string,
//! letters sort before other symbols), digit runs compare numerically.
//!
//! The comparator is isolated in [`compare_versions`] so the filter engine
//! only ever sees an `Ordering`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed Debian version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DebVersion {
    /// Explicit epoch, `None` when the string had no `epoch:` prefix
    pub epoch: Option<u64>,
    pub upstream: String,
    pub revision: Option<String>,
}

impl DebVersion {
    /// Parse a Debian version string
    ///
    /// Format: [epoch:]upstream[-revision]
    /// Examples:
    /// - "1.2.3" → epoch=None, upstream="1.2.3", revision=None
    /// - "2:1.2.3" → epoch=2, upstream="1.2.3", revision=None
    /// - "1.2.3-4ubuntu1" → upstream="1.2.3", revision="4ubuntu1"
    /// - "1:2.3-rc1-2" → epoch=1, upstream="2.3-rc1", revision="2"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("empty version string".to_string()));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(Error::ParseError(format!(
                "version '{}' contains whitespace",
                s
            )));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => {
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::ParseError(format!("invalid epoch in version '{}': {}", s, err))
                })?;
                (Some(epoch), r)
            }
            None => (None, s),
        };

        // The revision is everything after the last hyphen
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if upstream.is_empty() {
            return Err(Error::ParseError(format!(
                "empty upstream version in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            upstream,
            revision,
        })
    }

    /// Epoch with the implicit default applied
    #[inline]
    pub fn epoch_or_default(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Compare two versions with dpkg semantics
    pub fn compare(&self, other: &DebVersion) -> Ordering {
        match self.epoch_or_default().cmp(&other.epoch_or_default()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match verrevcmp(self.upstream.as_bytes(), other.upstream.as_bytes()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        verrevcmp(
            self.revision.as_deref().unwrap_or("").as_bytes(),
            other.revision.as_deref().unwrap_or("").as_bytes(),
        )
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(ref revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl FromStr for DebVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DebVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DebVersion> for String {
    fn from(v: DebVersion) -> Self {
        v.to_string()
    }
}

impl PartialEq for DebVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for DebVersion {}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two raw version strings with dpkg semantics
///
/// Strings that do not parse as Debian versions are compared segment-wise
/// as a whole, so the function is total.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (DebVersion::parse(a), DebVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.compare(&vb),
        _ => verrevcmp(a.as_bytes(), b.as_bytes()),
    }
}

/// Sort weight of a non-digit character
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(b'~') => -1,
        Some(c) => i32::from(c) + 256,
    }
}

/// dpkg's segment comparison of an upstream version or revision
fn verrevcmp(a: &[u8], b: &[u8]) -> Ordering {
    let (mut i, mut j) = (0usize, 0usize);
    let is_digit = |s: &[u8], k: usize| s.get(k).is_some_and(u8::is_ascii_digit);

    while i < a.len() || j < b.len() {
        // Non-digit prefix
        while (i < a.len() && !is_digit(a, i)) || (j < b.len() && !is_digit(b, j)) {
            let ac = order(a.get(i).copied());
            let bc = order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        // Digit run, leading zeros are insignificant
        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while is_digit(a, i) && is_digit(b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if is_digit(a, i) {
            return Ordering::Greater;
        }
        if is_digit(b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

/// Version relation of a dependency
///
/// `<` and `>` are read as the strict `<<` and `>>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VersionRelation {
    /// No version constraint
    #[default]
    DontCare,
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl VersionRelation {
    /// Parse a relation operator
    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "=" => Ok(Self::Equal),
            "<<" | "<" => Ok(Self::Less),
            "<=" => Ok(Self::LessOrEqual),
            ">>" | ">" => Ok(Self::Greater),
            ">=" => Ok(Self::GreaterOrEqual),
            _ => Err(Error::ParseError(format!("unknown version relation '{}'", op))),
        }
    }

    /// Operator in canonical Debian spelling
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DontCare => "",
            Self::Equal => "=",
            Self::Less => "<<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">>",
            Self::GreaterOrEqual => ">=",
        }
    }

    /// Check whether an ordering of `candidate` against the constraint
    /// version satisfies this relation
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::DontCare => true,
            Self::Equal => ordering == Ordering::Equal,
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Greater => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for VersionRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test whether `candidate` satisfies `relation constraint`
pub fn version_matches(candidate: &DebVersion, relation: VersionRelation, constraint: &DebVersion) -> bool {
    relation.accepts(candidate.compare(constraint))
}
