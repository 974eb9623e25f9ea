//! Read alignment with BWA.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::config::{available_threads, object};
use super::env::ProjectFiles;
use super::samples::{group_fastq, project_files_in, retain_complete_pairs, Samples, FASTQ_GZ};
use super::{mandatory_path, path_value, tool_command, StepAdapter, StepEnv, ToolConfig, ToolConfigSource};
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::StepError;
use crate::order::BWA_ALIGNER;
use crate::runner::{artifact_is_valid, artifacts_are_valid, run_with_retry, skip_if_valid};

const INDEX_EXTENSIONS: [&str; 5] = ["bwt", "pac", "ann", "amb", "sa"];

/// Aligns each sample against a reference genome with `bwa mem`.
#[derive(Debug, Clone)]
pub struct BwaAligner {
    source: Arc<ToolConfigSource>,
}

impl BwaAligner {
    /// Creates the adapter.
    #[must_use]
    pub fn new(source: Arc<ToolConfigSource>) -> Self {
        Self { source }
    }

    /// Built-in configuration.
    #[must_use]
    pub fn defaults() -> Payload {
        object(json!({
            "sam_directory": "BWA_MEM_OUTPUT",
            "num_threads": available_threads(),
            "max_retries": 5,
            "retry_wait_time": 10,
            "index_algorithm": "bwtsw",
            "bwa_path": "bwa",
            "force_run": false
        }))
    }

    /// Index files `bwa index` produces next to the genome.
    #[must_use]
    pub fn index_files(genome: &Path) -> Vec<PathBuf> {
        INDEX_EXTENSIONS
            .iter()
            .map(|ext| {
                let mut name = genome.as_os_str().to_os_string();
                name.push(format!(".{ext}"));
                PathBuf::from(name)
            })
            .collect()
    }

    async fn ensure_index(
        &self,
        config: &ToolConfig,
        env: &StepEnv<'_>,
        genome: &Path,
    ) -> Result<(), StepError> {
        let index = Self::index_files(genome);
        let valid = || artifacts_are_valid(index.iter().map(PathBuf::as_path));
        if skip_if_valid("bwa index", config.force_run()?, valid) {
            return Ok(());
        }

        let command = tool_command(config, env, config.string("bwa_path")?, "bwa-index.log")?
            .args(["index", "-a", config.string("index_algorithm")?])
            .path_arg(genome);
        run_with_retry(
            "bwa index",
            &config.retry_policy()?,
            || command.run(),
            |()| valid(),
        )
        .await
    }

    fn samples(env: &StepEnv<'_>) -> Result<ProjectSamples, StepError> {
        if let Some(files) = env.project_files("bioproject_files")? {
            return Ok(group_projects(files, false));
        }

        let Some(compact) = env.optional_path("compact_directory")? else {
            return Err(StepError::missing_input(BWA_ALIGNER, "bioproject_files"));
        };
        let files = project_files_in(&compact, FASTQ_GZ)?;
        Ok(group_projects(files, true))
    }
}

/// Project id to its samples.
type ProjectSamples = BTreeMap<String, Samples>;

fn group_projects(files: ProjectFiles, complete_pairs_only: bool) -> ProjectSamples {
    files
        .into_iter()
        .map(|(project, paths)| {
            let mut samples = group_fastq(&paths);
            if complete_pairs_only {
                retain_complete_pairs(&mut samples);
            }
            (project, samples)
        })
        .filter(|(_, samples)| !samples.is_empty())
        .collect()
}

#[async_trait]
impl StepAdapter for BwaAligner {
    fn name(&self) -> &str {
        BWA_ALIGNER
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        let env = StepEnv::new(BWA_ALIGNER, input);
        let config = self.source.resolve(BWA_ALIGNER, Self::defaults(), parameters);
        let genome = mandatory_path(&env, &config, "genome_file")?;
        let projects = Self::samples(&env)?;
        let sam_root = config.dir("sam_directory", env.run_directory())?;
        let threads = config.threads("num_threads")?;
        let policy = config.retry_policy()?;
        let force_run = config.force_run()?;

        self.ensure_index(&config, &env, &genome).await?;

        let mut sam_output = serde_json::Map::new();
        for (project, samples) in &projects {
            let project_dir = sam_root.join(project);
            tokio::fs::create_dir_all(&project_dir).await?;
            info!(project, samples = samples.len(), "Aligning project");

            let mut outputs = serde_json::Map::new();
            for (sample, files) in samples {
                let sam = project_dir.join(format!("{sample}.sam"));
                let label = format!("bwa mem {project}/{sample}");
                if !skip_if_valid(&label, force_run, || artifact_is_valid(&sam)) {
                    let mode = if files.len() > 1 { "pe" } else { "se" };
                    let log = format!("aln-{mode}-{sample}.log");
                    let command = tool_command(&config, &env, config.string("bwa_path")?, &log)?
                        .args(["mem", "-t", &threads.to_string()])
                        .path_arg(&genome)
                        .args(files.iter().map(|f| f.to_string_lossy().into_owned()))
                        .stdout_to(&sam);
                    run_with_retry(&label, &policy, || command.run(), |()| artifact_is_valid(&sam))
                        .await?;
                }
                outputs.insert(sample.clone(), path_value(&sam));
            }
            sam_output.insert(project.clone(), Value::Object(outputs));
        }

        Ok(object(json!({
            "sam_directory": path_value(&sam_root),
            "sam_output": sam_output,
        })))
    }
}
