//! Dependency resolution.
//!
//! Inputs are always re-read from the store at dispatch time, never forwarded
//! in memory from the producing step.

use tracing::debug;

use crate::core::{InputMap, Step};
use crate::store::{StateStore, StoreResult};

/// Builds the input map of `step`.
///
/// The first step of a chain starts from its declared input files. Each
/// `(key, upstream)` mapping entry then copies `key` from the recorded
/// results of `upstream`; a missing output or key is omitted.
///
/// # Errors
///
/// Propagates store errors.
pub async fn resolve_inputs(step: &Step, store: &dyn StateStore) -> StoreResult<InputMap> {
    let mut input = step.input_files.clone();

    for (key, upstream) in &step.input_mapping {
        let output = store
            .get_step_output_by_name(step.pipeline_id, upstream)
            .await?;
        match output.and_then(|mut results| results.remove(key)) {
            Some(value) => {
                input.insert(key.clone(), value);
            }
            None => debug!(
                step_name = %step.name,
                key = %key,
                upstream = %upstream,
                "Upstream output does not provide mapped key"
            ),
        }
    }

    Ok(input)
}
