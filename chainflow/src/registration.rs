//! Pipeline registration.
//!
//! Turns an already validated definition into pending `Pipeline` and `Step`
//! records. This is the first of the two order checks; the dispatcher
//! repeats it before every dispatch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::catalog::StepCatalog;
use crate::core::{InputMapping, Payload, Pipeline, Step};
use crate::errors::RegistrationError;
use crate::order::validate_names;

/// A user submitted pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Selected steps in any order.
    pub steps: Vec<StepDefinition>,
}

/// One selected step of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Canonical step name.
    pub step_name: String,
    /// Tool parameter overrides.
    #[serde(default)]
    pub parameters: Payload,
    /// Whether the step needs user supplied input files.
    #[serde(default)]
    pub requires_input_file: bool,
    /// User supplied inputs.
    #[serde(default)]
    pub input_files: Payload,
    /// Explicit input mapping; the catalog default applies when absent.
    #[serde(default)]
    pub input_mapping: Option<InputMapping>,
}

impl StepDefinition {
    /// Creates a definition with no parameters or inputs.
    #[must_use]
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            parameters: Payload::new(),
            requires_input_file: false,
            input_files: Payload::new(),
            input_mapping: None,
        }
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Payload) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the input files and marks them as required.
    #[must_use]
    pub fn with_input_files(mut self, input_files: Payload) -> Self {
        self.input_files = input_files;
        self.requires_input_file = true;
        self
    }

    /// Sets an explicit input mapping.
    #[must_use]
    pub fn with_input_mapping(mut self, mapping: InputMapping) -> Self {
        self.input_mapping = Some(mapping);
        self
    }
}

impl PipelineDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            notes: None,
            steps,
        }
    }
}

/// Builds the records of `definition`.
///
/// Returns the pending pipeline and its steps sorted by position.
///
/// # Errors
///
/// Returns [`RegistrationError::Order`] for unknown or non-contiguous steps,
/// [`RegistrationError::MissingInitialInput`] when the first step needs input
/// files and has none, and [`RegistrationError::ForwardDependency`] when a
/// mapping references a step that does not run earlier.
pub fn register(
    definition: PipelineDefinition,
    catalog: &StepCatalog,
) -> Result<(Pipeline, Vec<Step>), RegistrationError> {
    let order = catalog.order();
    let ordered = validate_names(order, definition.steps.iter().map(|s| s.step_name.as_str()))?;

    let mut pipeline = Pipeline::new(definition.name);
    pipeline.notes = definition.notes;

    let mut by_name: HashMap<String, StepDefinition> = definition
        .steps
        .into_iter()
        .map(|s| (s.step_name.clone(), s))
        .collect();

    let mut steps = Vec::with_capacity(ordered.len());
    for (chain_index, name) in ordered.iter().enumerate() {
        let Some(def) = by_name.remove(name) else {
            continue;
        };
        let position = order.index_of(name).unwrap_or_default();
        let first = chain_index == 0;

        if first && def.requires_input_file && def.input_files.is_empty() {
            return Err(RegistrationError::MissingInitialInput { step: name.clone() });
        }

        let input_files = if first {
            def.input_files
        } else {
            if !def.input_files.is_empty() {
                warn!(step_name = %name, "Dropping input files declared on a non-first step");
            }
            Payload::new()
        };

        let input_mapping = if first {
            if def.input_mapping.as_ref().is_some_and(|m| !m.is_empty()) {
                warn!(step_name = %name, "Dropping input mapping declared on the first step");
            }
            InputMapping::new()
        } else {
            def.input_mapping
                .unwrap_or_else(|| catalog.default_mapping(name))
        };
        if let Some((key, upstream)) = input_mapping
            .iter()
            .find(|(_, upstream)| !order.precedes(upstream, name))
        {
            return Err(RegistrationError::ForwardDependency {
                step: name.clone(),
                key: key.clone(),
                upstream: upstream.clone(),
            });
        }

        let mut step = Step::new(pipeline.id, name.clone(), position)
            .with_parameters(def.parameters)
            .with_input_files(input_files);
        step.requires_input_file = first && def.requires_input_file;
        step.input_mapping = input_mapping;
        steps.push(step);
    }

    info!(
        pipeline_id = %pipeline.id,
        name = %pipeline.name,
        steps = ?ordered,
        "Pipeline registered"
    );
    Ok((pipeline, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineStatus, StepStatus};
    use crate::errors::OrderError;
    use crate::order::{BWA_ALIGNER, CIRI2_PROCESSOR, SRR_DATA_MANAGER, UNIPROT_DATA_PREPARER};
    use crate::testing::scripted_catalog;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn files(value: serde_json::Value) -> Payload {
        crate::adapters::config::object(value)
    }

    #[test]
    fn test_register_sorts_and_assigns_positions() {
        let catalog = scripted_catalog(&["A", "B", "C"]);
        let definition = PipelineDefinition::new(
            "letters",
            vec![StepDefinition::new("C"), StepDefinition::new("B")],
        );

        let (pipeline, steps) = register(definition, &catalog).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Pending);
        let names: Vec<_> = steps.iter().map(|s| (s.name.as_str(), s.position)).collect();
        assert_eq!(names, vec![("B", 1), ("C", 2)]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(steps.iter().all(|s| s.pipeline_id == pipeline.id));
    }

    #[test]
    fn test_register_rejects_gap() {
        let catalog = scripted_catalog(&["A", "B", "C"]);
        let definition = PipelineDefinition::new(
            "gap",
            vec![StepDefinition::new("A"), StepDefinition::new("C")],
        );
        let err = register(definition, &catalog).unwrap_err();
        assert!(matches!(err, RegistrationError::Order(OrderError::NonContiguous { .. })));
    }

    #[test]
    fn test_input_files_only_kept_on_first_step() {
        let catalog = scripted_catalog(&["A", "B"]);
        let definition = PipelineDefinition::new(
            "files",
            vec![
                StepDefinition::new("B").with_input_files(files(json!({"x": "/b"}))),
                StepDefinition::new("A").with_input_files(files(json!({"x": "/a"}))),
            ],
        );

        let (_, steps) = register(definition, &catalog).unwrap();
        assert_eq!(steps[0].input_files, files(json!({"x": "/a"})));
        assert!(steps[1].input_files.is_empty());
        assert!(!steps[1].requires_input_file);
    }

    #[test]
    fn test_first_step_requires_input() {
        let catalog = scripted_catalog(&["A", "B"]);
        let mut first = StepDefinition::new("A");
        first.requires_input_file = true;
        let definition = PipelineDefinition::new("empty", vec![first, StepDefinition::new("B")]);

        let err = register(definition, &catalog).unwrap_err();
        assert_eq!(err, RegistrationError::MissingInitialInput { step: "A".into() });
    }

    #[test]
    fn test_first_step_has_no_mapping() {
        let catalog = StepCatalog::new(crate::order::CanonicalOrder::circ_rna());
        let definition = PipelineDefinition::new(
            "from-bwa",
            vec![StepDefinition::new(BWA_ALIGNER), StepDefinition::new(CIRI2_PROCESSOR)],
        );
        let (_, steps) = register(definition, &catalog).unwrap();
        assert!(steps[0].input_mapping.is_empty());
        assert_eq!(steps[1].input_mapping.len(), 1);
    }

    #[test]
    fn test_default_mapping_and_forward_dependency() {
        let catalog = StepCatalog::new(crate::order::CanonicalOrder::circ_rna());
        let definition = PipelineDefinition::new(
            "circ",
            vec![
                StepDefinition::new(SRR_DATA_MANAGER),
                StepDefinition::new(BWA_ALIGNER),
                StepDefinition::new(CIRI2_PROCESSOR),
            ],
        );
        let (_, steps) = register(definition, &catalog).unwrap();
        assert_eq!(
            steps[1].input_mapping.get("compact_directory").map(String::as_str),
            Some(SRR_DATA_MANAGER)
        );
        assert!(steps[0].input_mapping.is_empty());

        let forward = PipelineDefinition::new(
            "forward",
            vec![
                StepDefinition::new(BWA_ALIGNER),
                StepDefinition::new(CIRI2_PROCESSOR).with_input_mapping(InputMapping::from([(
                    "query_file".to_string(),
                    UNIPROT_DATA_PREPARER.to_string(),
                )])),
            ],
        );
        let err = register(forward, &catalog).unwrap_err();
        assert!(matches!(err, RegistrationError::ForwardDependency { ref upstream, .. } if upstream == UNIPROT_DATA_PREPARER));
    }
}
