//! circRNA detection with CIRI2.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::config::object;
use super::env::ProjectFiles;
use super::samples::project_files_in;
use super::{mandatory_path, path_value, tool_command, StepAdapter, StepEnv, ToolConfigSource};
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::StepError;
use crate::order::CIRI2_PROCESSOR;
use crate::runner::{artifact_is_valid, run_with_retry, skip_if_valid};

/// Runs `CIRI2.pl` over every SAM file of every project.
#[derive(Debug, Clone)]
pub struct Ciri2Processor {
    source: Arc<ToolConfigSource>,
}

impl Ciri2Processor {
    /// Creates the adapter.
    #[must_use]
    pub fn new(source: Arc<ToolConfigSource>) -> Self {
        Self { source }
    }

    /// Built-in configuration.
    #[must_use]
    pub fn defaults() -> Payload {
        object(json!({
            "ciri_output_directory": "CIRI2_OUTPUT",
            "threads": 16,
            "max_retries": 5,
            "retry_wait_time": 10,
            "perl_path": "perl",
            "ciri2_path": "CIRI2.pl",
            "force_run": false
        }))
    }

    fn sam_files(env: &StepEnv<'_>) -> Result<ProjectFiles, StepError> {
        if let Some(files) = env.project_files("bioproject_sam_files")? {
            return Ok(files);
        }
        let Some(sam_directory) = env.optional_path("sam_directory")? else {
            return Err(StepError::missing_input(CIRI2_PROCESSOR, "bioproject_sam_files"));
        };
        Ok(project_files_in(&sam_directory, ".sam")?)
    }
}

fn sample_name(sam: &Path) -> String {
    sam.file_stem()
        .map_or_else(|| "sample".to_string(), |s| s.to_string_lossy().into_owned())
}

#[async_trait]
impl StepAdapter for Ciri2Processor {
    fn name(&self) -> &str {
        CIRI2_PROCESSOR
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        let env = StepEnv::new(CIRI2_PROCESSOR, input);
        let config = self.source.resolve(CIRI2_PROCESSOR, Self::defaults(), parameters);
        let genome = mandatory_path(&env, &config, "genome_file")?;
        let projects = Self::sam_files(&env)?;
        let output_root = config.dir("ciri_output_directory", env.run_directory())?;
        let threads = config.threads("threads")?.to_string();
        let perl = config.string("perl_path")?;
        let script = config.string("ciri2_path")?;
        let policy = config.retry_policy()?;
        let force_run = config.force_run()?;

        let mut ciri_output = serde_json::Map::new();
        for (project, sams) in &projects {
            let project_dir = output_root.join(project);
            tokio::fs::create_dir_all(&project_dir).await?;
            info!(project, sam_files = sams.len(), "Running CIRI2 for project");

            let mut outputs = serde_json::Map::new();
            for sam in sams {
                let sample = sample_name(sam);
                let out = project_dir.join(format!("{sample}.ciri"));
                let label = format!("CIRI2 {project}/{sample}");
                if !skip_if_valid(&label, force_run, || artifact_is_valid(&out)) {
                    let command = tool_command(&config, &env, perl, &format!("ciri2-{sample}.log"))?
                        .arg(script)
                        .arg("-I")
                        .path_arg(sam)
                        .args(["-T", threads.as_str(), "-F"])
                        .path_arg(&genome)
                        .arg("-O")
                        .path_arg(&out);
                    run_with_retry(&label, &policy, || command.run(), |()| artifact_is_valid(&out))
                        .await?;
                }
                outputs.insert(sample, path_value(&out));
            }
            ciri_output.insert(project.clone(), Value::Object(outputs));
        }

        Ok(object(json!({
            "ciri_output_directory": path_value(&output_root),
            "ciri_output": ciri_output,
        })))
    }
}
