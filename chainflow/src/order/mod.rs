//! Canonical step order.
//!
//! This module provides:
//! - The canonical order table (`CanonicalOrder`)
//! - The step order policy (`validate_and_order`)

mod policy;
mod table;

pub use policy::{validate_and_order, validate_names};
pub use table::{
    CanonicalOrder, BWA_ALIGNER, CIRI2_PROCESSOR, GO_ANNOTATION_FETCHER, SRR_DATA_MANAGER,
    UNIPROT_DATA_PREPARER,
};
