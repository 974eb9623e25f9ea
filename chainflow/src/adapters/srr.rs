//! Sequencing run download and compression.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::config::object;
use super::samples::FASTQ_GZ;
use super::{path_value, tool_command, StepAdapter, StepEnv, ToolConfig, ToolConfigSource};
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::{StepError, ToolError};
use crate::order::SRR_DATA_MANAGER;
use crate::runner::{
    artifact_is_valid, artifacts_are_valid, files_with_suffix, run_with_retry, skip_if_valid,
    RetryPolicy,
};

/// Downloads SRA accessions with `fasterq-dump` and compresses them with `pigz`.
#[derive(Debug, Clone)]
pub struct SrrDataManager {
    source: Arc<ToolConfigSource>,
}

/// Settings shared by every accession of one execution.
struct Plan<'a> {
    config: &'a ToolConfig,
    env: &'a StepEnv<'a>,
    policy: RetryPolicy,
    force_run: bool,
    fasterq_dump: &'a str,
    pigz: &'a str,
    dump_threads: String,
    compression_threads: Option<u64>,
    keep_uncompressed: bool,
}

impl SrrDataManager {
    /// Creates the adapter.
    #[must_use]
    pub fn new(source: Arc<ToolConfigSource>) -> Self {
        Self { source }
    }

    /// Built-in configuration.
    #[must_use]
    pub fn defaults() -> Payload {
        object(json!({
            "sra_directory": "SRA",
            "fasterq_dump_threads": 4,
            "compression_threads": null,
            "max_retries": 5,
            "retry_wait_time": 10,
            "temp_directory": "temp",
            "compact_directory": "COMPACT",
            "keep_uncompressed": false,
            "fasterq_dump_path": "fasterq-dump",
            "pigz_path": "pigz",
            "force_run": false
        }))
    }

    /// Returns the compressed files already present for `accession`.
    #[must_use]
    pub fn compressed_files(compact: &Path, accession: &str) -> Option<Vec<PathBuf>> {
        let single = compact.join(format!("{accession}{FASTQ_GZ}"));
        if artifact_is_valid(&single).is_ok() {
            return Some(vec![single]);
        }
        let pair = vec![
            compact.join(format!("{accession}_1{FASTQ_GZ}")),
            compact.join(format!("{accession}_2{FASTQ_GZ}")),
        ];
        artifacts_are_valid(pair.iter().map(PathBuf::as_path))
            .is_ok()
            .then_some(pair)
    }

    fn projects(env: &StepEnv<'_>) -> Result<BTreeMap<String, Vec<String>>, StepError> {
        let malformed =
            || StepError::configuration(SRR_DATA_MANAGER, "'bioprojects_input' must map projects to {\"srr_ids\": [...]}");
        let projects = env
            .get("bioprojects_input")
            .ok_or_else(|| StepError::missing_input(SRR_DATA_MANAGER, "bioprojects_input"))?
            .as_object()
            .ok_or_else(malformed)?;

        projects
            .iter()
            .map(|(project, entry)| -> Result<(String, Vec<String>), StepError> {
                let ids = entry
                    .get("srr_ids")
                    .and_then(Value::as_array)
                    .ok_or_else(malformed)?
                    .iter()
                    .map(|id| id.as_str().map(str::to_string).ok_or_else(malformed))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((project.clone(), ids))
            })
            .collect()
    }

    async fn fetch(
        plan: &Plan<'_>,
        accession: &str,
        temp: &Path,
        compact: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        if !plan.force_run {
            if let Some(existing) = Self::compressed_files(compact, accession) {
                info!(accession, "Compressed files already present, skipping download");
                return Ok(existing);
            }
        }

        let downloaded = || dumped_files(temp, accession);
        let label = format!("fasterq-dump {accession}");
        if !skip_if_valid(&label, plan.force_run, || downloaded().map(|_| ())) {
            let command = tool_command(plan.config, plan.env, plan.fasterq_dump, &format!("fasterq-dump-{accession}.log"))?
                .arg(accession)
                .arg("--outdir")
                .path_arg(temp)
                .args(["--threads", plan.dump_threads.as_str()]);
            run_with_retry(&label, &plan.policy, || command.run(), |()| downloaded().map(|_| ())).await?;
        }

        let mut compressed = Vec::new();
        for fastq in downloaded().map_err(|e| StepError::Adapter(e.to_string()))? {
            let Some(name) = fastq.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let target = compact.join(format!("{name}.gz"));
            let label = format!("pigz {name}");
            let mut command = tool_command(plan.config, plan.env, plan.pigz, &format!("pigz-{accession}.log"))?
                .arg("-c");
            if let Some(threads) = plan.compression_threads {
                command = command.arg(format!("-p{threads}"));
            }
            let command = command.path_arg(&fastq).stdout_to(&target);
            run_with_retry(&label, &plan.policy, || command.run(), |()| artifact_is_valid(&target)).await?;

            if !plan.keep_uncompressed {
                if let Err(e) = tokio::fs::remove_file(&fastq).await {
                    warn!(path = %fastq.display(), error = %e, "Failed to remove uncompressed file");
                }
            }
            compressed.push(target);
        }
        Ok(compressed)
    }
}

/// FASTQ files `fasterq-dump` produced for `accession`.
fn dumped_files(temp: &Path, accession: &str) -> Result<Vec<PathBuf>, ToolError> {
    let single = format!("{accession}.fastq");
    let mate_prefix = format!("{accession}_");
    let files: Vec<PathBuf> = files_with_suffix(temp, ".fastq")
        .map_err(|e| ToolError::invalid_output(format!("{}: {e}", temp.display())))?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n == single || n.starts_with(&mate_prefix))
        })
        .collect();
    artifacts_are_valid(files.iter().map(PathBuf::as_path))?;
    Ok(files)
}

#[async_trait]
impl StepAdapter for SrrDataManager {
    fn name(&self) -> &str {
        SRR_DATA_MANAGER
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        let env = StepEnv::new(SRR_DATA_MANAGER, input);
        let config = self.source.resolve(SRR_DATA_MANAGER, Self::defaults(), parameters);
        let projects = Self::projects(&env)?;
        let sra_root = config.dir("sra_directory", env.run_directory())?;
        let compact_root = config.dir("compact_directory", &sra_root)?;
        let temp_root = config.dir("temp_directory", &sra_root)?;

        let plan = Plan {
            config: &config,
            env: &env,
            policy: config.retry_policy()?,
            force_run: config.force_run()?,
            fasterq_dump: config.string("fasterq_dump_path")?,
            pigz: config.string("pigz_path")?,
            dump_threads: config.threads("fasterq_dump_threads")?.to_string(),
            compression_threads: config.optional_uint("compression_threads")?,
            keep_uncompressed: config.flag("keep_uncompressed")?,
        };

        let mut srr_paths = serde_json::Map::new();
        for (project, accessions) in &projects {
            let compact = compact_root.join(project);
            let temp = temp_root.join(project);
            tokio::fs::create_dir_all(&compact).await?;
            tokio::fs::create_dir_all(&temp).await?;
            info!(project, accessions = accessions.len(), "Fetching sequencing runs");

            let mut paths = serde_json::Map::new();
            for accession in accessions {
                let files = Self::fetch(&plan, accession, &temp, &compact).await?;
                paths.insert(
                    accession.clone(),
                    Value::Array(files.iter().map(|f| path_value(f)).collect()),
                );
            }
            srr_paths.insert(project.clone(), Value::Object(paths));
        }

        Ok(object(json!({
            "compact_directory": path_value(&compact_root),
            "srr_paths": srr_paths,
        })))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::fake_tool;
    use pretty_assertions::assert_eq;
    use std::fs;

    // Writes paired FASTQ files named after the accession into --outdir.
    const FAKE_DUMP: &str = r#"
acc="$1"; out="$3"
printf '@r\nACGT\n+\nIIII\n' > "$out/${acc}_1.fastq"
printf '@r\nACGT\n+\nIIII\n' > "$out/${acc}_2.fastq"
"#;

    const FAKE_PIGZ: &str = r#"
for last; do :; done
cat "$last"
"#;

    #[tokio::test]
    async fn test_downloads_and_compresses() {
        let dir = tempfile::tempdir().unwrap();
        let dump = fake_tool(dir.path(), "fasterq-dump", FAKE_DUMP);
        let pigz = fake_tool(dir.path(), "pigz", FAKE_PIGZ);

        let input = object(json!({
            "run_directory": dir.path().to_str().unwrap(),
            "bioprojects_input": {"PRJ1": {"srr_ids": ["SRR100"]}}
        }));
        let parameters = object(json!({
            "fasterq_dump_path": dump.to_str().unwrap(),
            "pigz_path": pigz.to_str().unwrap(),
            "compression_threads": 2
        }));

        let adapter = SrrDataManager::new(Arc::new(ToolConfigSource::empty()));
        let output = adapter.execute(&parameters, &input).await.unwrap();

        let compact = dir.path().join("SRA/COMPACT");
        assert_eq!(output["compact_directory"], path_value(&compact));
        let files = output["srr_paths"]["PRJ1"]["SRR100"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(compact.join("PRJ1/SRR100_1.fastq.gz").is_file());
        // Uncompressed intermediates are removed by default.
        assert!(!dir.path().join("SRA/temp/PRJ1/SRR100_1.fastq").exists());
    }

    #[tokio::test]
    async fn test_existing_compressed_files_skip_download() {
        let dir = tempfile::tempdir().unwrap();
        let dump = fake_tool(dir.path(), "fasterq-dump", "exit 1");
        let compact = dir.path().join("SRA/COMPACT/PRJ1");
        fs::create_dir_all(&compact).unwrap();
        fs::write(compact.join("SRR7.fastq.gz"), b"gz").unwrap();

        let input = object(json!({
            "run_directory": dir.path().to_str().unwrap(),
            "bioprojects_input": {"PRJ1": {"srr_ids": ["SRR7"]}}
        }));
        let parameters = object(json!({"fasterq_dump_path": dump.to_str().unwrap()}));

        let adapter = SrrDataManager::new(Arc::new(ToolConfigSource::empty()));
        let output = adapter.execute(&parameters, &input).await.unwrap();
        assert_eq!(
            output["srr_paths"]["PRJ1"]["SRR7"],
            json!([path_value(&compact.join("SRR7.fastq.gz"))])
        );
    }

    #[tokio::test]
    async fn test_missing_and_malformed_input() {
        let adapter = SrrDataManager::new(Arc::new(ToolConfigSource::empty()));
        let err = adapter.execute(&Payload::new(), &Payload::new()).await.unwrap_err();
        assert!(matches!(err, StepError::MissingInput { .. }));

        let input = object(json!({"bioprojects_input": {"PRJ1": ["SRR1"]}}));
        let err = adapter.execute(&Payload::new(), &input).await.unwrap_err();
        assert!(matches!(err, StepError::Configuration { .. }));
    }
}
