// src/reflist/merge.rs

//! Snapshot merge over several sources

use super::PackageRefList;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// How [`merge_sources`] combines lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Left to right, later sources replace Name+Architecture matches
    #[default]
    Override,
    /// Union, then keep only the highest version per Name+Architecture
    Latest,
    /// Plain union; several versions of one package may remain
    NoRemove,
}

/// Merge `sources` left to right
pub fn merge_sources(sources: &[PackageRefList], strategy: MergeStrategy) -> PackageRefList {
    let override_matching = strategy == MergeStrategy::Override;

    let mut result = PackageRefList::new();
    for source in sources {
        result = result.merge(source, override_matching, false);
    }
    if strategy == MergeStrategy::Latest {
        result = result.filter_latest_refs();
    }

    debug!(
        "merged {} sources with {} strategy into {} refs",
        sources.len(),
        strategy,
        result.len()
    );
    result
}
