// src/packagelist/mod.rs

//! In-memory package lists
//!
//! A [`PackageList`] materialises the packages behind a reference list so
//! they can be queried and resolved. Lookups by name and by provided
//! virtual name go through secondary indexes built by
//! [`PackageList::prepare_index`]; once indexed, [`PackageList::add`] and
//! [`PackageList::remove`] keep the indexes current.
//!
//! Virtual packages are a lookup table from provided name to the keys that
//! provide it, never edges between packages, so circular Provides cannot
//! form reference cycles.

mod filter;

pub use filter::FilterOptions;

use crate::collection::PackageCollection;
use crate::error::{Error, Result};
use crate::package::{Dependency, Package, PackageRef, ARCHITECTURE_ALL, ARCHITECTURE_SOURCE};
use crate::progress::{ProgressTracker, ProgressUnit};
use crate::reflist::PackageRefList;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Packages keyed by [`PackageRef`] with name, provides and architecture
/// indexes
#[derive(Debug, Clone, Default)]
pub struct PackageList {
    packages: BTreeMap<PackageRef, Arc<Package>>,
    indexed: bool,
    /// Name to packages, highest version first
    by_name: HashMap<String, Vec<Candidate>>,
    /// Provided virtual name to packages, highest version first
    by_provides: HashMap<String, Vec<Candidate>>,
    /// Architecture to number of packages
    by_architecture: BTreeMap<String, usize>,
}

/// Index entry: a package with its key computed once
type Candidate = (PackageRef, Arc<Package>);

/// Highest version first, then key order
fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.1.version().compare(a.1.version()).then_with(|| a.0.cmp(&b.0))
}

fn insert_sorted(slot: &mut Vec<Candidate>, key: &PackageRef, package: &Arc<Package>) {
    let entry = (key.clone(), Arc::clone(package));
    let pos = slot
        .binary_search_by(|existing| candidate_order(existing, &entry))
        .unwrap_or_else(|pos| pos);
    slot.insert(pos, entry);
}

fn remove_from(index: &mut HashMap<String, Vec<Candidate>>, name: &str, key: &PackageRef) {
    if let Some(slot) = index.get_mut(name) {
        slot.retain(|(candidate, _)| candidate != key);
        if slot.is_empty() {
            index.remove(name);
        }
    }
}

impl PackageList {
    /// Empty, unindexed list
    pub fn new() -> Self {
        Self::default()
    }

    /// Unindexed list holding `packages`
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Self {
        let mut list = Self::new();
        for package in packages {
            list.add(package);
        }
        list
    }

    /// Load every package referenced by `reflist`
    ///
    /// Fails with [`Error::LoadError`] naming the first key the collection
    /// cannot resolve.
    pub fn new_from_ref_list(
        reflist: &PackageRefList,
        collection: &dyn PackageCollection,
        progress: Option<&dyn ProgressTracker>,
    ) -> Result<Self> {
        if let Some(progress) = progress {
            progress.start("Loading packages", reflist.len() as u64, ProgressUnit::Items);
        }

        let mut list = Self::new();
        reflist.for_each(|key| {
            let package = collection.get(key).map_err(|e| Error::LoadError {
                key: key.to_string(),
                source: Box::new(e),
            })?;
            list.packages.insert(key.clone(), Arc::new(package));
            if let Some(progress) = progress {
                progress.increment(1);
            }
            Ok(())
        })?;

        if let Some(progress) = progress {
            progress.finish("Packages loaded");
        }
        debug!("Loaded {} packages from ref list", list.len());
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn has(&self, key: &PackageRef) -> bool {
        self.packages.contains_key(key)
    }

    pub fn get(&self, key: &PackageRef) -> Option<&Arc<Package>> {
        self.packages.get(key)
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &PackageRef> {
        self.packages.keys()
    }

    /// Packages in key order
    pub fn packages(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.packages.values()
    }

    /// Reference list of the loaded keys
    pub fn to_ref_list(&self) -> PackageRefList {
        PackageRefList::from_package_list(self)
    }

    /// Insert a package, returning false when its key was already present
    pub fn add(&mut self, package: Package) -> bool {
        self.add_shared(Arc::new(package))
    }

    pub(crate) fn add_shared(&mut self, package: Arc<Package>) -> bool {
        let key = package.key();
        if self.packages.contains_key(&key) {
            return false;
        }
        if self.indexed {
            self.index_package(&key, &package);
        }
        self.packages.insert(key, package);
        true
    }

    /// Remove a package by key
    pub fn remove(&mut self, key: &PackageRef) -> Option<Arc<Package>> {
        let package = self.packages.remove(key)?;
        if self.indexed {
            remove_from(&mut self.by_name, package.name(), key);
            for provide in package.provides() {
                remove_from(&mut self.by_provides, &provide.name, key);
            }
            if let Some(count) = self.by_architecture.get_mut(package.architecture()) {
                *count -= 1;
                if *count == 0 {
                    self.by_architecture.remove(package.architecture());
                }
            }
        }
        Some(package)
    }

    /// Add every package of `other`
    pub fn append(&mut self, other: &PackageList) {
        for package in other.packages() {
            self.add_shared(Arc::clone(package));
        }
    }

    /// Build the lookup indexes
    ///
    /// Required before [`PackageList::search`], [`PackageList::filter`]
    /// and [`PackageList::verify_dependencies`].
    pub fn prepare_index(&mut self) {
        self.by_name.clear();
        self.by_provides.clear();
        self.by_architecture.clear();
        let entries: Vec<Candidate> = self
            .packages
            .iter()
            .map(|(key, package)| (key.clone(), Arc::clone(package)))
            .collect();
        for (key, package) in &entries {
            self.index_package(key, package);
        }
        self.indexed = true;
    }

    fn index_package(&mut self, key: &PackageRef, package: &Arc<Package>) {
        insert_sorted(
            self.by_name.entry(package.name().to_string()).or_default(),
            key,
            package,
        );
        for provide in package.provides() {
            let slot = self.by_provides.entry(provide.name.clone()).or_default();
            if !slot.iter().any(|(candidate, _)| candidate == key) {
                insert_sorted(slot, key, package);
            }
        }
        *self
            .by_architecture
            .entry(package.architecture().to_string())
            .or_default() += 1;
    }

    /// Sorted distinct architectures, `all` excluded
    ///
    /// `source` is only included when `include_source` is set.
    pub fn architectures(&self, include_source: bool) -> Vec<String> {
        let archs: BTreeSet<&str> = if self.indexed {
            self.by_architecture.keys().map(String::as_str).collect()
        } else {
            self.packages.values().map(|p| p.architecture()).collect()
        };
        archs
            .into_iter()
            .filter(|arch| *arch != ARCHITECTURE_ALL)
            .filter(|arch| include_source || *arch != ARCHITECTURE_SOURCE)
            .map(str::to_string)
            .collect()
    }

    /// Explicit architectures, or the ones present in the list
    pub(crate) fn effective_architectures(&self, requested: &[String]) -> Result<Vec<String>> {
        let archs = if requested.is_empty() {
            self.architectures(false)
        } else {
            requested.to_vec()
        };
        if archs.is_empty() {
            return Err(Error::ConfigurationError(
                "cannot determine architectures, specify explicitly".to_string(),
            ));
        }
        Ok(archs)
    }

    /// Packages satisfying `dep`, highest version first
    ///
    /// Only the best candidate is returned unless `all_matches` is set;
    /// `search_provided` extends the search to Provides.
    ///
    /// # Panics
    ///
    /// Panics if the list has not been indexed with
    /// [`PackageList::prepare_index`].
    pub fn search(&self, dep: &Dependency, all_matches: bool, search_provided: bool) -> Vec<Arc<Package>> {
        assert!(self.indexed, "package list must be indexed before searching");

        let mut found: Vec<&Candidate> = Vec::new();
        if let Some(slot) = self.by_name.get(&dep.name) {
            found.extend(slot.iter().filter(|(_, p)| p.matches_dependency(dep)));
        }
        if search_provided {
            if let Some(slot) = self.by_provides.get(&dep.name) {
                for entry in slot.iter().filter(|(_, p)| p.provides_dependency(dep)) {
                    if !found.iter().any(|(key, _)| *key == entry.0) {
                        found.push(entry);
                    }
                }
            }
        }

        found.sort_by(|a, b| candidate_order(a, b));
        if !all_matches {
            found.truncate(1);
        }
        found.into_iter().map(|(_, p)| Arc::clone(p)).collect()
    }

    /// Packages named `name`, highest version first
    pub fn by_name(&self, name: &str) -> Vec<Arc<Package>> {
        if self.indexed {
            return self
                .by_name
                .get(name)
                .map(|slot| slot.iter().map(|(_, p)| Arc::clone(p)).collect())
                .unwrap_or_default();
        }
        let mut found: Vec<Candidate> = self
            .packages
            .iter()
            .filter(|(_, p)| p.name() == name)
            .map(|(key, p)| (key.clone(), Arc::clone(p)))
            .collect();
        found.sort_by(candidate_order);
        found.into_iter().map(|(_, p)| p).collect()
    }
}
