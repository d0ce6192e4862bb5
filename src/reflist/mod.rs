// src/reflist/mod.rs

//! Package reference lists
//!
//! A [`PackageRefList`] is the membership of a local repository, mirror or
//! snapshot: a sorted, duplicate-free sequence of package keys. All set
//! operations are pure and return a new list; results are always ordered by
//! key so two lists holding the same keys compare equal regardless of how
//! they were built.
//!
//! Because keys start with `P<arch> <name> `, every key of one
//! Name+Architecture pair is adjacent in the sorted order. Merge and
//! latest-version filtering exploit that to work group by group.

mod merge;

pub use merge::{merge_sources, MergeStrategy};

use crate::collection::PackageCollection;
use crate::error::{Error, Result};
use crate::package::{Package, PackageRef};
use crate::packagelist::PackageList;
use crate::version::compare_versions;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Sorted, deduplicated list of package keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PackageRefList {
    refs: Vec<PackageRef>,
}

/// Result of [`PackageRefList::diff`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefListDiff {
    /// Keys only in the other list
    pub added: PackageRefList,
    /// Keys only in the receiver
    pub removed: PackageRefList,
    /// Keys in both
    pub unchanged: PackageRefList,
}

impl RefListDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One changed package between two lists
///
/// `left` only: removed. `right` only: added. Both: replaced by another
/// version of the same Name+Architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDiff {
    pub left: Option<Package>,
    pub right: Option<Package>,
}

impl PackageRefList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from keys in any order, sorting and dropping duplicates
    pub fn from_refs(refs: impl IntoIterator<Item = PackageRef>) -> Self {
        let mut refs: Vec<PackageRef> = refs.into_iter().collect();
        refs.sort_unstable();
        refs.dedup();
        Self { refs }
    }

    /// Snapshot the keys of a package list
    pub fn from_package_list(list: &PackageList) -> Self {
        Self::from_refs(list.keys().cloned())
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn has(&self, key: &PackageRef) -> bool {
        self.refs.binary_search(key).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PackageRef> {
        self.refs.iter()
    }

    /// Keys as strings, in order
    pub fn strings(&self) -> Vec<String> {
        self.refs.iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Visit every key in order, stopping at the first error
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&PackageRef) -> Result<()>,
    {
        for key in &self.refs {
            f(key)?;
        }
        Ok(())
    }

    /// Union with `other`
    ///
    /// With `override_matching`, an entry of `other` replaces every entry
    /// of `self` with the same Name+Architecture. Without it, both versions
    /// survive. Entries with equal Name+Architecture+Version but different
    /// keys conflict: `ignore_conflicting` keeps both, otherwise `other`
    /// wins under override and `self` wins without it.
    pub fn merge(&self, other: &PackageRefList, override_matching: bool, ignore_conflicting: bool) -> PackageRefList {
        let mut result: Vec<PackageRef> = Vec::with_capacity(self.len() + other.len());

        if override_matching {
            let mut right_names: HashMap<(&str, &str), Vec<&PackageRef>> = HashMap::new();
            for r in &other.refs {
                right_names.entry((r.architecture(), r.name())).or_default().push(r);
            }
            for l in &self.refs {
                let keep = match right_names.get(&(l.architecture(), l.name())) {
                    None => true,
                    Some(rights) => {
                        ignore_conflicting && rights.iter().any(|r| r.conflicts_with(l))
                    }
                };
                if keep {
                    result.push(l.clone());
                }
            }
            result.extend(other.refs.iter().cloned());
        } else {
            let left_versions: HashSet<(&str, &str, &str)> = self
                .refs
                .iter()
                .map(|l| (l.architecture(), l.name(), l.version()))
                .collect();
            result.extend(self.refs.iter().cloned());
            for r in &other.refs {
                let conflicting = !self.has(r)
                    && left_versions.contains(&(r.architecture(), r.name(), r.version()));
                if ignore_conflicting || !conflicting {
                    result.push(r.clone());
                }
            }
        }

        let merged = PackageRefList::from_refs(result);
        debug!(
            "merged {} + {} refs into {} (override={}, ignore_conflicting={})",
            self.len(),
            other.len(),
            merged.len(),
            override_matching,
            ignore_conflicting
        );
        merged
    }

    /// Keys of `self` absent from `other`
    pub fn subtract(&self, other: &PackageRefList) -> PackageRefList {
        let refs = self
            .refs
            .iter()
            .filter(|key| !other.has(key))
            .cloned()
            .collect();
        PackageRefList { refs }
    }

    /// Compare `self` (old) against `other` (new)
    pub fn diff(&self, other: &PackageRefList) -> RefListDiff {
        let mut diff = RefListDiff::default();
        let (mut i, mut j) = (0, 0);

        while i < self.refs.len() || j < other.refs.len() {
            let ordering = match (self.refs.get(i), other.refs.get(j)) {
                (Some(l), Some(r)) => l.cmp(r),
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };
            match ordering {
                Ordering::Less => {
                    diff.removed.refs.push(self.refs[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    diff.added.refs.push(other.refs[j].clone());
                    j += 1;
                }
                Ordering::Equal => {
                    diff.unchanged.refs.push(self.refs[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }

        debug!(
            "diff: {} added, {} removed, {} unchanged",
            diff.added.len(),
            diff.removed.len(),
            diff.unchanged.len()
        );
        diff
    }

    /// Keep only the highest version per Name+Architecture
    ///
    /// Equal versions (conflicting keys) keep the lowest key.
    pub fn filter_latest_refs(&self) -> PackageRefList {
        let mut refs: Vec<PackageRef> = Vec::new();
        let mut group_start = 0;

        for (i, key) in self.refs.iter().enumerate() {
            if i > group_start && !key.same_name_and_architecture(&self.refs[group_start]) {
                refs.push(Self::latest_of(&self.refs[group_start..i]).clone());
                group_start = i;
            }
        }
        if group_start < self.refs.len() {
            refs.push(Self::latest_of(&self.refs[group_start..]).clone());
        }

        PackageRefList { refs }
    }

    fn latest_of(group: &[PackageRef]) -> &PackageRef {
        let mut best = &group[0];
        for key in &group[1..] {
            if compare_versions(key.version(), best.version()) == Ordering::Greater {
                best = key;
            }
        }
        best
    }

    /// Resolve a diff into package pairs for reporting
    ///
    /// A removed and an added key with the same Name+Architecture are
    /// reported together as one replaced package.
    pub fn diff_packages(&self, other: &PackageRefList, collection: &dyn PackageCollection) -> Result<Vec<PackageDiff>> {
        let diff = self.diff(other);

        let mut added: Vec<Option<Package>> = Vec::with_capacity(diff.added.len());
        let mut added_by_name: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for key in diff.added.iter() {
            added_by_name
                .entry((key.architecture().to_string(), key.name().to_string()))
                .or_default()
                .push(added.len());
            added.push(Some(load(collection, key)?));
        }

        let mut result = Vec::new();
        for key in diff.removed.iter() {
            let left = load(collection, key)?;
            let paired = added_by_name
                .get_mut(&(key.architecture().to_string(), key.name().to_string()))
                .and_then(|slots| {
                    if slots.is_empty() {
                        None
                    } else {
                        Some(slots.remove(0))
                    }
                })
                .and_then(|slot| added[slot].take());
            result.push(PackageDiff {
                left: Some(left),
                right: paired,
            });
        }
        result.extend(added.into_iter().flatten().map(|right| PackageDiff {
            left: None,
            right: Some(right),
        }));

        Ok(result)
    }

    /// Serialise for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.refs, &mut buf)
            .map_err(|e| Error::Serialization(format!("failed to encode ref list: {}", e)))?;
        Ok(buf)
    }

    /// Deserialise a stored list, restoring the sort invariant
    pub fn decode(data: &[u8]) -> Result<Self> {
        let keys: Vec<String> = ciborium::from_reader(data)
            .map_err(|e| Error::Serialization(format!("failed to decode ref list: {}", e)))?;
        let refs = keys
            .into_iter()
            .map(PackageRef::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_refs(refs))
    }
}

fn load(collection: &dyn PackageCollection, key: &PackageRef) -> Result<Package> {
    collection.get(key).map_err(|e| Error::LoadError {
        key: key.to_string(),
        source: Box::new(e),
    })
}

impl FromIterator<PackageRef> for PackageRefList {
    fn from_iter<I: IntoIterator<Item = PackageRef>>(iter: I) -> Self {
        Self::from_refs(iter)
    }
}

impl<'a> IntoIterator for &'a PackageRefList {
    type Item = &'a PackageRef;
    type IntoIter = std::slice::Iter<'a, PackageRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(arch: &str, name: &str, version: &str, files: &str) -> PackageRef {
        PackageRef::parse(format!("P{} {} {} {}", arch, name, version, files)).unwrap()
    }

    fn list(keys: &[PackageRef]) -> PackageRefList {
        keys.iter().cloned().collect()
    }

    #[test]
    fn test_from_refs_sorts_and_dedups() {
        let a = key("amd64", "b", "1.0", "00");
        let b = key("amd64", "a", "1.0", "00");
        let reflist = list(&[a.clone(), b.clone(), a.clone()]);
        assert_eq!(reflist.len(), 2);
        assert_eq!(reflist.iter().collect::<Vec<_>>(), vec![&b, &a]);
        assert!(reflist.has(&a));
    }

    #[test]
    fn test_name_groups_are_adjacent() {
        let reflist = list(&[
            key("amd64", "foo-bar", "1", "00"),
            key("amd64", "foo", "2", "00"),
            key("amd64", "foo", "1", "00"),
        ]);
        let names: Vec<&str> = reflist.iter().map(PackageRef::name).collect();
        assert_eq!(names, vec!["foo", "foo", "foo-bar"]);
    }

    #[test]
    fn test_merge_override_replaces_other_versions() {
        let left = list(&[key("amd64", "pkg", "1.0", "aa"), key("amd64", "lib", "1", "aa")]);
        let right = list(&[key("amd64", "pkg", "2.0", "bb")]);

        let merged = left.merge(&right, true, false);
        assert_eq!(
            merged,
            list(&[key("amd64", "lib", "1", "aa"), key("amd64", "pkg", "2.0", "bb")])
        );
    }

    #[test]
    fn test_merge_without_override_keeps_versions() {
        let left = list(&[key("amd64", "pkg", "1.0", "aa")]);
        let right = list(&[key("amd64", "pkg", "2.0", "bb")]);
        assert_eq!(left.merge(&right, false, false).len(), 2);
    }

    #[test]
    fn test_merge_conflicts() {
        let left = list(&[key("amd64", "pkg", "1.0", "aa")]);
        let right = list(&[key("amd64", "pkg", "1.0", "bb")]);

        assert_eq!(left.merge(&right, false, false), left);
        assert_eq!(left.merge(&right, true, false), right);
        assert_eq!(left.merge(&right, false, true).len(), 2);
        assert_eq!(left.merge(&right, true, true).len(), 2);
    }

    #[test]
    fn test_merge_idempotent() {
        let a = list(&[key("amd64", "pkg", "1.0", "aa"), key("i386", "pkg", "1.0", "aa")]);
        assert_eq!(a.merge(&a, false, false), a);
        assert_eq!(a.merge(&a, true, false), a);
    }

    #[test]
    fn test_subtract() {
        let a = list(&[key("amd64", "a", "1", "00"), key("amd64", "b", "1", "00")]);
        let b = list(&[key("amd64", "b", "1", "00")]);
        assert_eq!(a.subtract(&PackageRefList::new()), a);
        assert!(a.subtract(&a).is_empty());
        assert_eq!(a.subtract(&b), list(&[key("amd64", "a", "1", "00")]));
    }

    #[test]
    fn test_diff() {
        let old = list(&[key("amd64", "a", "1", "00"), key("amd64", "b", "1", "00")]);
        let new = list(&[key("amd64", "b", "1", "00"), key("amd64", "c", "1", "00")]);
        let diff = old.diff(&new);
        assert_eq!(diff.added, list(&[key("amd64", "c", "1", "00")]));
        assert_eq!(diff.removed, list(&[key("amd64", "a", "1", "00")]));
        assert_eq!(diff.unchanged, list(&[key("amd64", "b", "1", "00")]));

        let same = old.diff(&old);
        assert!(same.is_empty());
        assert_eq!(same.unchanged, old);
    }

    #[test]
    fn test_filter_latest_refs() {
        let reflist = list(&[
            key("amd64", "pkg", "1.0", "00"),
            key("amd64", "pkg", "1.10", "00"),
            key("amd64", "pkg", "1.9", "00"),
            key("i386", "pkg", "1.0", "00"),
            key("amd64", "pkg", "1.10", "ff"),
        ]);
        let latest = reflist.filter_latest_refs();
        assert_eq!(
            latest,
            list(&[key("amd64", "pkg", "1.10", "00"), key("i386", "pkg", "1.0", "00")])
        );
        assert_eq!(latest.filter_latest_refs(), latest);
    }

    #[test]
    fn test_filter_latest_tilde() {
        let reflist = list(&[key("amd64", "pkg", "1.0~rc1", "00"), key("amd64", "pkg", "1.0", "00")]);
        assert_eq!(reflist.filter_latest_refs(), list(&[key("amd64", "pkg", "1.0", "00")]));
    }

    #[test]
    fn test_for_each_stops_on_error() {
        let reflist = list(&[key("amd64", "a", "1", "00"), key("amd64", "b", "1", "00")]);
        let mut seen = 0;
        let result = reflist.for_each(|_| {
            seen += 1;
            Err(Error::NotFoundError("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_encode_decode() {
        let reflist = list(&[key("amd64", "a", "1:1.0-1", "0011"), key("all", "b", "2", "22")]);
        let decoded = PackageRefList::decode(&reflist.encode().unwrap()).unwrap();
        assert_eq!(decoded, reflist);
        assert!(PackageRefList::decode(b"garbage").is_err());
    }
}
