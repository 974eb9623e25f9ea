//! The canonical order table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::InputMapping;

/// Downloads and compresses sequencing runs.
pub const SRR_DATA_MANAGER: &str = "SRRDataManager";
/// Aligns reads against a reference genome.
pub const BWA_ALIGNER: &str = "BWAAligner";
/// Calls circular RNAs from alignments.
pub const CIRI2_PROCESSOR: &str = "CIRI2Processor";
/// Builds protein databases and runs similarity searches.
pub const UNIPROT_DATA_PREPARER: &str = "UniProtDataPreparer";
/// Fetches GO annotations for matched proteins.
pub const GO_ANNOTATION_FETCHER: &str = "GOAnnotationFetcher";

/// A fixed sequence of step names plus the default input mapping of each.
///
/// Pure data. Build it once at process start and share it by reference; every
/// process taking part in dispatch must use an identical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    names: Vec<String>,
    #[serde(default)]
    default_mappings: HashMap<String, InputMapping>,
}

impl CanonicalOrder {
    /// Creates a table from an ordered list of names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            default_mappings: HashMap::new(),
        }
    }

    /// Declares that `step` reads `key` from `upstream` by default.
    #[must_use]
    pub fn with_default_mapping(
        mut self,
        step: impl Into<String>,
        key: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        self.default_mappings
            .entry(step.into())
            .or_default()
            .insert(key.into(), upstream.into());
        self
    }

    /// The five-step circRNA analysis chain.
    #[must_use]
    pub fn circ_rna() -> Self {
        Self::new([
            SRR_DATA_MANAGER,
            BWA_ALIGNER,
            CIRI2_PROCESSOR,
            UNIPROT_DATA_PREPARER,
            GO_ANNOTATION_FETCHER,
        ])
        .with_default_mapping(BWA_ALIGNER, "compact_directory", SRR_DATA_MANAGER)
        .with_default_mapping(CIRI2_PROCESSOR, "sam_directory", BWA_ALIGNER)
    }

    /// Returns the index of `name`, if known.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Returns true if `name` is part of the table.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Returns the names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the default input mapping for `name` (empty if none).
    #[must_use]
    pub fn default_mapping(&self, name: &str) -> InputMapping {
        self.default_mappings.get(name).cloned().unwrap_or_default()
    }

    /// Returns true if `upstream` runs strictly before `step`.
    #[must_use]
    pub fn precedes(&self, upstream: &str, step: &str) -> bool {
        match (self.index_of(upstream), self.index_of(step)) {
            (Some(u), Some(s)) => u < s,
            _ => false,
        }
    }
}

impl Default for CanonicalOrder {
    fn default() -> Self {
        Self::circ_rna()
    }
}
