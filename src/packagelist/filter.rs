// src/packagelist/filter.rs

//! Query filtering and dependency closure
//!
//! [`PackageList::filter`] selects the packages matching any of a set of
//! queries and, on request, pulls in their dependencies until a fixed point
//! is reached. Resolution is best effort: a dependency nothing satisfies is
//! skipped. [`PackageList::verify_dependencies`] runs the same matching
//! rules but reports what could not be satisfied.
//!
//! Matching rules for one dependency on requested architecture `arch`:
//!
//! | Qualifier | Matches |
//! |-----------|---------|
//! | none | packages for `arch` (including `all`) |
//! | `any` | packages for any requested architecture (including `all`) |
//! | `{x}` | packages for `x` (including `all` unless `x` is `source`) |

use super::PackageList;
use crate::error::Result;
use crate::package::{
    ARCHITECTURE_ANY, Dependency, DependencyOptions, DependencyVariants, Package, PackageRef,
};
use crate::progress::{ProgressTracker, ProgressUnit};
use crate::query::Query;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Parameters of one filter run
#[derive(Default)]
pub struct FilterOptions<'a> {
    /// Seed queries, OR'ed together
    pub queries: Vec<Query>,
    /// Follow dependencies of the selected packages
    pub with_dependencies: bool,
    /// Packages already available at the destination; dependencies they
    /// satisfy are not pulled in again
    pub source: Option<&'a PackageList>,
    pub dependency_options: DependencyOptions,
    /// Architectures to resolve for; empty derives them from the list
    pub architectures: Vec<String>,
    pub progress: Option<&'a dyn ProgressTracker>,
}

impl<'a> FilterOptions<'a> {
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            queries,
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, options: DependencyOptions) -> Self {
        self.with_dependencies = true;
        self.dependency_options = options;
        self
    }

    pub fn with_architectures<S: Into<String>>(mut self, architectures: impl IntoIterator<Item = S>) -> Self {
        self.architectures = architectures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: &'a PackageList) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Pin dependencies to the architectures being resolved
///
/// An unqualified dependency is pinned to `arch`. An `any` dependency
/// becomes one alternative per requested architecture, `arch` first.
fn for_architecture(
    variants: &DependencyVariants,
    arch: &str,
    architectures: &[String],
) -> DependencyVariants {
    let mut pinned = DependencyVariants::new();
    for dep in variants.iter() {
        match dep.architecture.as_deref() {
            None => pinned.push(dep.clone().with_architecture(arch)),
            Some(ARCHITECTURE_ANY) => {
                pinned.push(dep.clone().with_architecture(arch));
                for other in architectures.iter().filter(|other| *other != arch) {
                    pinned.push(dep.clone().with_architecture(other));
                }
            }
            Some(_) => pinned.push(dep.clone()),
        }
    }
    pinned
}

/// Whether `package` has edges to follow when resolving for `arch`
fn resolves_on(package: &Package, arch: &str) -> bool {
    package.is_source() || package.matches_architecture(arch)
}

impl PackageList {
    /// Select packages by query, optionally closing over dependencies
    ///
    /// # Panics
    ///
    /// Panics if the list has not been indexed with
    /// [`PackageList::prepare_index`].
    pub fn filter(&self, options: &FilterOptions<'_>) -> Result<PackageList> {
        assert!(self.indexed, "package list must be indexed before filtering");

        let mut result = PackageList::new();
        for query in &options.queries {
            for package in query.select(self) {
                result.add_shared(package);
            }
        }
        debug!("Queries selected {} packages", result.len());

        if !options.with_dependencies {
            return Ok(result);
        }

        let architectures = self.effective_architectures(&options.architectures)?;
        let deps = &options.dependency_options;
        result.prepare_index();

        let mut available = PackageList::new();
        if let Some(source) = options.source {
            available.append(source);
        }
        available.append(&result);
        available.prepare_index();

        let mut queue: VecDeque<Arc<Package>> = result.packages().cloned().collect();
        let mut visited: HashSet<PackageRef> = HashSet::new();

        if let Some(progress) = options.progress {
            progress.start("Resolving dependencies", queue.len() as u64, ProgressUnit::Items);
        }

        while let Some(package) = queue.pop_front() {
            if !visited.insert(package.key()) {
                continue;
            }
            if let Some(progress) = options.progress {
                progress.increment(1);
            }

            for arch in &architectures {
                if !resolves_on(&package, arch) {
                    continue;
                }
                for variants in package.dependencies(deps) {
                    let variants = for_architecture(&variants, arch, &architectures);
                    let mut added: Vec<Arc<Package>> = Vec::new();

                    if deps.follow_all_variants {
                        for dep in &variants {
                            if available.search(dep, false, true).is_empty() {
                                added.extend(self.search(dep, false, true));
                            }
                        }
                    } else if !variants
                        .iter()
                        .any(|dep| !available.search(dep, false, true).is_empty())
                    {
                        if let Some(best) = variants
                            .iter()
                            .find_map(|dep| self.search(dep, false, true).into_iter().next())
                        {
                            added.push(best);
                        }
                    }

                    for found in added {
                        if result.add_shared(Arc::clone(&found)) {
                            debug!("{} pulls in {}", package, found);
                            available.add_shared(Arc::clone(&found));
                            queue.push_back(found);
                            if let Some(progress) = options.progress {
                                progress.set_length((visited.len() + queue.len()) as u64);
                            }
                        }
                    }
                }
            }
        }

        if let Some(progress) = options.progress {
            progress.finish("Dependencies resolved");
        }
        debug!(
            "Dependency closure over {:?} produced {} packages",
            architectures,
            result.len()
        );
        Ok(result)
    }

    /// Dependencies of this list that `sources` cannot satisfy
    ///
    /// Every package matching one of `architectures` (derived from the
    /// list when empty) is checked; for an unsatisfied group the first
    /// alternative is reported. The result is sorted and free of
    /// duplicates.
    ///
    /// # Panics
    ///
    /// Panics if `sources` has not been indexed.
    pub fn verify_dependencies(
        &self,
        options: &DependencyOptions,
        architectures: &[String],
        sources: &PackageList,
        progress: Option<&dyn ProgressTracker>,
    ) -> Result<Vec<Dependency>> {
        let architectures = self.effective_architectures(architectures)?;
        let mut missing: Vec<Dependency> = Vec::new();

        if let Some(progress) = progress {
            progress.start("Verifying dependencies", self.len() as u64, ProgressUnit::Items);
        }

        for arch in &architectures {
            let mut cache: HashMap<String, bool> = HashMap::new();
            for package in self.packages() {
                if !resolves_on(package, arch) {
                    continue;
                }
                for variants in package.dependencies(options) {
                    let variants = for_architecture(&variants, arch, &architectures);
                    let satisfied = variants.iter().any(|dep| {
                        *cache
                            .entry(dep.to_string())
                            .or_insert_with(|| !sources.search(dep, false, true).is_empty())
                    });
                    if !satisfied {
                        missing.push(variants[0].clone());
                    }
                }
            }
        }

        if let Some(progress) = progress {
            progress.increment(self.len() as u64);
            progress.finish("Dependencies verified");
        }

        let mut seen = HashSet::new();
        missing.retain(|dep| seen.insert(dep.to_string()));
        missing.sort_by_key(|dep| dep.to_string());
        debug!("{} unsatisfied dependencies", missing.len());
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::query::parse;

    fn pkg(name: &str, version: &str, arch: &str) -> Package {
        Package::new(name, version, arch).unwrap()
    }

    fn indexed(packages: Vec<Package>) -> PackageList {
        let mut list = PackageList::from_packages(packages);
        list.prepare_index();
        list
    }

    fn names(list: &PackageList) -> Vec<String> {
        let mut names: Vec<String> = list.packages().map(|p| p.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_filter_without_dependencies() {
        let list = indexed(vec![
            pkg("nginx", "1.18", "amd64").with_depends("libc6").unwrap(),
            pkg("libc6", "2.36", "amd64"),
        ]);
        let result = list
            .filter(&FilterOptions::new(vec![parse("nginx").unwrap()]))
            .unwrap();
        assert_eq!(names(&result), vec!["nginx_1.18_amd64"]);
    }

    #[test]
    fn test_queries_are_ored() {
        let list = indexed(vec![
            pkg("a", "1", "amd64"),
            pkg("b", "1", "amd64"),
            pkg("c", "1", "amd64"),
        ]);
        let options = FilterOptions::new(vec![parse("a").unwrap(), parse("c").unwrap()]);
        assert_eq!(names(&list.filter(&options).unwrap()), vec!["a_1_amd64", "c_1_amd64"]);
    }

    #[test]
    fn test_closure_picks_first_resolvable_variant() {
        let list = indexed(vec![
            pkg("app", "1", "amd64")
                .with_depends("missing | libssl1.1 | libssl3")
                .unwrap(),
            pkg("libssl1.1", "1.1.1", "amd64"),
            pkg("libssl3", "3.0", "amd64"),
        ]);
        let options = FilterOptions::new(vec![parse("app").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64"]);
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["app_1_amd64", "libssl1.1_1.1.1_amd64"]
        );

        let all_variants = DependencyOptions {
            follow_all_variants: true,
            ..Default::default()
        };
        let options = FilterOptions::new(vec![parse("app").unwrap()])
            .with_dependencies(all_variants)
            .with_architectures(["amd64"]);
        assert_eq!(list.filter(&options).unwrap().len(), 3);
    }

    #[test]
    fn test_closure_is_transitive_and_terminates_on_cycles() {
        let list = indexed(vec![
            pkg("a", "1", "amd64").with_depends("b").unwrap(),
            pkg("b", "1", "amd64").with_depends("c").unwrap(),
            pkg("c", "1", "amd64").with_depends("a").unwrap(),
            pkg("d", "1", "amd64"),
        ]);
        let options = FilterOptions::new(vec![parse("a").unwrap()])
            .with_dependencies(DependencyOptions::default());
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["a_1_amd64", "b_1_amd64", "c_1_amd64"]
        );
    }

    #[test]
    fn test_closure_respects_architecture() {
        let list = indexed(vec![
            pkg("app", "1", "i386").with_depends("libfoo").unwrap(),
            pkg("libfoo", "1", "amd64"),
            pkg("libfoo", "1", "i386"),
            pkg("tool", "1", "amd64").with_depends("perl:any, tzdata").unwrap(),
            pkg("perl", "5", "i386"),
            pkg("tzdata", "2024a", "all"),
        ]);
        let options = FilterOptions::new(vec![parse("app").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64", "i386"]);
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["app_1_i386", "libfoo_1_i386"]
        );

        let options = FilterOptions::new(vec![parse("tool").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64"]);
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["tool_1_amd64", "tzdata_2024a_all"]
        );

        let options = FilterOptions::new(vec![parse("tool").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64", "i386"]);
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["perl_5_i386", "tool_1_amd64", "tzdata_2024a_all"]
        );
    }

    #[test]
    fn test_any_dependency_stays_within_architectures() {
        let list = indexed(vec![
            pkg("tool", "1", "amd64").with_depends("perl:any").unwrap(),
            pkg("perl", "5", "i386"),
        ]);
        let missing = list
            .verify_dependencies(&DependencyOptions::default(), &["amd64".to_string()], &list, None)
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "perl");
        assert_eq!(missing[0].architecture.as_deref(), Some("amd64"));

        let with_perl = indexed(vec![
            pkg("tool", "1", "amd64").with_depends("perl:any").unwrap(),
            pkg("perl", "5", "all"),
        ]);
        let missing = with_perl
            .verify_dependencies(&DependencyOptions::default(), &["amd64".to_string()], &with_perl, None)
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_closure_uses_provides() {
        let list = indexed(vec![
            pkg("script", "1", "all").with_depends("awk").unwrap(),
            pkg("mawk", "1.3", "amd64").with_provides("awk").unwrap(),
        ]);
        let options = FilterOptions::new(vec![parse("script").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64"]);
        assert_eq!(list.filter(&options).unwrap().len(), 2);
    }

    #[test]
    fn test_source_list_satisfies_dependencies() {
        let list = indexed(vec![
            pkg("app", "1", "amd64").with_depends("libc6").unwrap(),
            pkg("libc6", "2.36", "amd64"),
        ]);
        let destination = indexed(vec![pkg("libc6", "2.31", "amd64")]);
        let options = FilterOptions::new(vec![parse("app").unwrap()])
            .with_dependencies(DependencyOptions::default())
            .with_architectures(["amd64"])
            .with_source(&destination);
        assert_eq!(names(&list.filter(&options).unwrap()), vec!["app_1_amd64"]);
    }

    #[test]
    fn test_gated_edges() {
        let list = indexed(vec![
            pkg("app", "1", "amd64")
                .with_recommends("doc")
                .unwrap()
                .with_suggests("extra")
                .unwrap()
                .with_source("app-src"),
            pkg("doc", "1", "all"),
            pkg("extra", "1", "amd64"),
            pkg("app-src", "1", "source"),
        ]);
        let query = || vec![parse("app").unwrap()];

        let none = FilterOptions::new(query()).with_dependencies(DependencyOptions::default());
        assert_eq!(list.filter(&none).unwrap().len(), 1);

        let everything = DependencyOptions {
            follow_recommends: true,
            follow_suggests: true,
            follow_source: true,
            ..Default::default()
        };
        let options = FilterOptions::new(query()).with_dependencies(everything);
        assert_eq!(list.filter(&options).unwrap().len(), 4);
    }

    #[test]
    fn test_build_dependencies() {
        let list = indexed(vec![
            pkg("hello", "2.10", "source")
                .with_build_depends("debhelper (>= 13)")
                .unwrap(),
            pkg("debhelper", "13.11", "all"),
            pkg("libc6", "2.36", "amd64"),
        ]);
        let follow_build = DependencyOptions {
            follow_build: true,
            ..Default::default()
        };
        let options = FilterOptions::new(vec![parse("$PackageType (source)").unwrap()])
            .with_dependencies(follow_build);
        assert_eq!(
            names(&list.filter(&options).unwrap()),
            vec!["debhelper_13.11_all", "hello_2.10_source"]
        );
    }

    #[test]
    fn test_missing_architectures_is_configuration_error() {
        let list = indexed(vec![pkg("tzdata", "2024a", "all")]);
        let options = FilterOptions::new(vec![Query::MatchAll])
            .with_dependencies(DependencyOptions::default());
        assert!(matches!(
            list.filter(&options),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_verify_dependencies() {
        let list = indexed(vec![
            pkg("nginx", "1.18", "amd64")
                .with_depends("libc6 (>= 2.17), libssl3 | libssl1.1")
                .unwrap(),
            pkg("libc6", "2.13", "amd64"),
            pkg("libssl1.1", "1.1.1", "amd64"),
        ]);
        let missing = list
            .verify_dependencies(&DependencyOptions::default(), &[], &list, None)
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].to_string(), "libc6 (>= 2.17) {amd64}");
    }

    #[test]
    #[should_panic(expected = "must be indexed")]
    fn test_filter_requires_index() {
        let list = PackageList::from_packages([pkg("a", "1", "amd64")]);
        let _ = list.filter(&FilterOptions::new(vec![Query::MatchAll]));
    }
}
