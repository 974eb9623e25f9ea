//! The step order policy.
//!
//! A pipeline's steps must map to one contiguous range of canonical indices.
//! The check is pure and idempotent; it runs at registration and again before
//! every dispatch.

use std::collections::BTreeSet;

use super::CanonicalOrder;
use crate::core::Step;
use crate::errors::OrderError;

/// Validates that `steps` form a contiguous run of `order` and returns them
/// sorted by canonical index.
///
/// # Errors
///
/// Returns [`OrderError::UnknownStep`] for a name missing from the table,
/// [`OrderError::NonContiguous`] for gaps or duplicates, and
/// [`OrderError::Empty`] when `steps` is empty.
pub fn validate_and_order(order: &CanonicalOrder, steps: &[Step]) -> Result<Vec<Step>, OrderError> {
    let indices = indexed(order, steps.iter().map(|s| s.name.as_str()))?;
    let mut sorted: Vec<(usize, &Step)> = indices.into_iter().zip(steps).collect();
    sorted.sort_by_key(|(idx, _)| *idx);
    Ok(sorted.into_iter().map(|(_, step)| step.clone()).collect())
}

/// Validates bare names and returns them sorted by canonical index.
///
/// # Errors
///
/// Same as [`validate_and_order`].
pub fn validate_names<'a, I>(order: &CanonicalOrder, names: I) -> Result<Vec<String>, OrderError>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    let indices = indexed(order, names.iter().copied())?;
    let mut sorted: Vec<(usize, &str)> = indices.into_iter().zip(names).collect();
    sorted.sort_by_key(|(idx, _)| *idx);
    Ok(sorted.into_iter().map(|(_, n)| n.to_string()).collect())
}

/// Maps names to indices and checks contiguity.
fn indexed<'a, I>(order: &CanonicalOrder, names: I) -> Result<Vec<usize>, OrderError>
where
    I: IntoIterator<Item = &'a str>,
{
    let indices = names
        .into_iter()
        .map(|name| order.index_of(name).ok_or_else(|| OrderError::unknown_step(name)))
        .collect::<Result<Vec<_>, _>>()?;

    let (Some(&min), Some(&max)) = (indices.iter().min(), indices.iter().max()) else {
        return Err(OrderError::Empty);
    };

    let actual: BTreeSet<usize> = indices.iter().copied().collect();
    let contiguous = actual.len() == indices.len() && actual.len() == max - min + 1;
    if !contiguous {
        let names = order.names();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        return Err(OrderError::NonContiguous {
            expected: names[min..=max].to_vec(),
            actual: sorted.into_iter().map(|i| names[i].clone()).collect(),
        });
    }

    Ok(indices)
}
