//! UniProt reference database preparation and protein similarity search.
//!
//! The step downloads the Swiss-Prot FASTA, builds BLAST and DIAMOND
//! databases from it and searches the query proteins against both. Each of
//! these is a separate unit of work with its own skip check.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::config::object;
use super::{mandatory_path, path_value, tool_command, StepAdapter, StepEnv, ToolConfig, ToolConfigSource};
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::{StepError, ToolError};
use crate::order::UNIPROT_DATA_PREPARER;
use crate::runner::{artifact_is_valid, run_with_retry, skip_if_valid, RetryPolicy};

const SPROT_URL: &str =
    "https://ftp.uniprot.org/pub/databases/uniprot/current_release/knowledgebase/complete/uniprot_sprot.fasta.gz";

/// Builds the protein databases and runs `blastp` and `diamond blastp`.
#[derive(Debug, Clone)]
pub struct UniProtDataPreparer {
    source: Arc<ToolConfigSource>,
}

impl UniProtDataPreparer {
    /// Creates the adapter.
    #[must_use]
    pub fn new(source: Arc<ToolConfigSource>) -> Self {
        Self { source }
    }

    /// Built-in configuration.
    #[must_use]
    pub fn defaults() -> Payload {
        object(json!({
            "uniprot_url": SPROT_URL,
            "num_threads": null,
            "database_directory": "UNIPROT_DB",
            "output_directory": "UNIPROT_OUTPUT",
            "blast_output_file": "blast_results.tsv",
            "diamond_output_file": "diamond_results.tsv",
            "diamond_max_target_seqs": 5,
            "diamond_evalue": 1e-5,
            "download_timeout_seconds": 3600,
            "max_retries": 5,
            "retry_wait_time": 5,
            "gunzip_path": "gunzip",
            "makeblastdb_path": "makeblastdb",
            "blastp_path": "blastp",
            "diamond_path": "diamond",
            "force_run": false
        }))
    }
}

/// Where every file of one execution lives.
#[derive(Debug)]
struct Layout {
    archive: PathBuf,
    fasta: PathBuf,
    blast_db: PathBuf,
    diamond_db: PathBuf,
    blast_out: PathBuf,
    diamond_out: PathBuf,
}

impl Layout {
    fn new(config: &ToolConfig, run_directory: &Path) -> Result<Self, StepError> {
        let db_dir = config.dir("database_directory", run_directory)?;
        let out_dir = config.dir("output_directory", run_directory)?;
        let archive_name = config
            .string("uniprot_url")?
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("uniprot_sprot.fasta.gz")
            .to_string();
        let fasta_name = archive_name
            .strip_suffix(".gz")
            .unwrap_or(&archive_name)
            .to_string();
        let stem = fasta_name
            .strip_suffix(".fasta")
            .unwrap_or(&fasta_name)
            .to_string();

        Ok(Self {
            archive: db_dir.join(&archive_name),
            fasta: db_dir.join(&fasta_name),
            blast_db: db_dir.join(&stem),
            diamond_db: db_dir.join(format!("{stem}.dmnd")),
            blast_out: out_dir.join(config.string("blast_output_file")?),
            diamond_out: out_dir.join(config.string("diamond_output_file")?),
        })
    }

    fn blast_index(&self) -> PathBuf {
        let mut name = self.blast_db.clone().into_os_string();
        name.push(".pin");
        PathBuf::from(name)
    }

    fn results_are_valid(&self) -> Result<(), ToolError> {
        artifact_is_valid(&self.blast_out)?;
        artifact_is_valid(&self.diamond_out)
    }
}

/// Streams `url` into `target`.
async fn download(client: &reqwest::Client, url: &str, target: &Path) -> Result<(), ToolError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| ToolError::http(url, e.to_string()))?;

    let write_error = |e: std::io::Error| ToolError::invalid_output(format!("{}: {e}", target.display()));
    let mut file = tokio::fs::File::create(target).await.map_err(write_error)?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ToolError::http(url, e.to_string()))?
    {
        file.write_all(&chunk).await.map_err(write_error)?;
    }
    file.flush().await.map_err(write_error)
}

impl UniProtDataPreparer {
    async fn fetch_fasta(
        config: &ToolConfig,
        env: &StepEnv<'_>,
        layout: &Layout,
        policy: &RetryPolicy,
        force_run: bool,
    ) -> Result<(), StepError> {
        if skip_if_valid("UniProt FASTA", force_run, || artifact_is_valid(&layout.fasta)) {
            return Ok(());
        }

        if force_run || artifact_is_valid(&layout.archive).is_err() {
            let url = config.string("uniprot_url")?;
            let timeout = Duration::from_secs(config.uint("download_timeout_seconds")?);
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| StepError::configuration(UNIPROT_DATA_PREPARER, e.to_string()))?;
            info!(url, target = %layout.archive.display(), "Downloading UniProt database");
            run_with_retry(
                "UniProt download",
                policy,
                || download(&client, url, &layout.archive),
                |()| artifact_is_valid(&layout.archive),
            )
            .await?;
        }

        let gunzip = tool_command(config, env, config.string("gunzip_path")?, "gunzip.log")?
            .arg("-kf")
            .path_arg(&layout.archive);
        run_with_retry("UniProt gunzip", policy, || gunzip.run(), |()| {
            artifact_is_valid(&layout.fasta)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StepAdapter for UniProtDataPreparer {
    fn name(&self) -> &str {
        UNIPROT_DATA_PREPARER
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        let env = StepEnv::new(UNIPROT_DATA_PREPARER, input);
        let config = self.source.resolve(UNIPROT_DATA_PREPARER, Self::defaults(), parameters);
        let query = mandatory_path(&env, &config, "query_file")?;
        let layout = Layout::new(&config, env.run_directory())?;
        let policy = config.retry_policy()?;
        let force_run = config.force_run()?;
        let threads = config.threads("num_threads")?.to_string();

        let output = object(json!({
            "blast_output_file": path_value(&layout.blast_out),
            "diamond_output_file": path_value(&layout.diamond_out),
        }));
        if skip_if_valid("UniProt searches", force_run, || layout.results_are_valid()) {
            return Ok(output);
        }

        for dir in [layout.fasta.parent(), layout.blast_out.parent(), layout.diamond_out.parent()]
            .into_iter()
            .flatten()
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        Self::fetch_fasta(&config, &env, &layout, &policy, force_run).await?;

        let blast_index = layout.blast_index();
        if !skip_if_valid("BLAST database", force_run, || artifact_is_valid(&blast_index)) {
            let makeblastdb = tool_command(&config, &env, config.string("makeblastdb_path")?, "makeblastdb.log")?
                .arg("-in")
                .path_arg(&layout.fasta)
                .args(["-dbtype", "prot", "-out"])
                .path_arg(&layout.blast_db);
            run_with_retry("BLAST database", &policy, || makeblastdb.run(), |()| {
                artifact_is_valid(&blast_index)
            })
            .await?;
        }

        let diamond = config.string("diamond_path")?;
        if !skip_if_valid("DIAMOND database", force_run, || artifact_is_valid(&layout.diamond_db)) {
            let makedb = tool_command(&config, &env, diamond, "diamond-makedb.log")?
                .args(["makedb", "--in"])
                .path_arg(&layout.fasta)
                .arg("-d")
                .path_arg(&layout.diamond_db);
            run_with_retry("DIAMOND database", &policy, || makedb.run(), |()| {
                artifact_is_valid(&layout.diamond_db)
            })
            .await?;
        }

        if !skip_if_valid("blastp", force_run, || artifact_is_valid(&layout.blast_out)) {
            info!(query = %query.display(), "Running blastp");
            let blastp = tool_command(&config, &env, config.string("blastp_path")?, "blastp.log")?
                .arg("-query")
                .path_arg(&query)
                .arg("-db")
                .path_arg(&layout.blast_db)
                .arg("-out")
                .path_arg(&layout.blast_out)
                .args(["-outfmt", "6", "-num_threads", threads.as_str()]);
            run_with_retry("blastp", &policy, || blastp.run(), |()| {
                artifact_is_valid(&layout.blast_out)
            })
            .await?;
        }

        if !skip_if_valid("diamond blastp", force_run, || artifact_is_valid(&layout.diamond_out)) {
            info!(query = %query.display(), "Running diamond blastp");
            let max_targets = config.uint("diamond_max_target_seqs")?.to_string();
            let evalue = config.number("diamond_evalue")?.to_string();
            let search = tool_command(&config, &env, diamond, "diamond-blastp.log")?
                .args(["blastp", "-q"])
                .path_arg(&query)
                .arg("-d")
                .path_arg(&layout.diamond_db)
                .arg("-o")
                .path_arg(&layout.diamond_out)
                .args(["--outfmt", "6", "--max-target-seqs", max_targets.as_str()])
                .args(["--evalue", evalue.as_str(), "--threads", threads.as_str()]);
            run_with_retry("diamond blastp", &policy, || search.run(), |()| {
                artifact_is_valid(&layout.diamond_out)
            })
            .await?;
        }

        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::fake_tool;
    use std::fs;

    // Writes a non-empty file to the path following the given flag.
    fn writer_for(flag: &str) -> String {
        format!(
            r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "{flag}" ]; then out="$2"; fi
  shift
done
echo "hit" > "$out"
"#
        )
    }

    // `diamond makedb -d db` and `diamond blastp -o out` differ in the flag.
    const FAKE_DIAMOND: &str = r#"
mode="$1"
out=""
while [ $# -gt 0 ]; do
  if [ "$mode" = "makedb" ] && [ "$1" = "-d" ]; then out="$2"; fi
  if [ "$mode" = "blastp" ] && [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "hit" > "$out"
"#;

    fn setup(dir: &Path) -> (InputMap, Payload) {
        let db_dir = dir.join("UNIPROT_DB");
        fs::create_dir_all(&db_dir).unwrap();
        fs::write(db_dir.join("uniprot_sprot.fasta"), b">sp|P1|X\nMK\n").unwrap();
        fs::write(dir.join("query.fa"), b">q1\nMK\n").unwrap();

        let makeblastdb = fake_tool(
            dir,
            "makeblastdb",
            r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-out" ]; then out="$2"; fi
  shift
done
echo "idx" > "$out.pin"
"#,
        );
        let blastp = fake_tool(dir, "blastp", &writer_for("-out"));
        let diamond = fake_tool(dir, "diamond", FAKE_DIAMOND);

        let input = object(json!({
            "run_directory": dir.to_str().unwrap(),
            "query_file": dir.join("query.fa").to_str().unwrap()
        }));
        let parameters = object(json!({
            "num_threads": 2,
            "makeblastdb_path": makeblastdb.to_str().unwrap(),
            "blastp_path": blastp.to_str().unwrap(),
            "diamond_path": diamond.to_str().unwrap()
        }));
        (input, parameters)
    }

    #[tokio::test]
    async fn test_builds_databases_and_runs_searches() {
        let dir = tempfile::tempdir().unwrap();
        let (input, parameters) = setup(dir.path());

        let adapter = UniProtDataPreparer::new(Arc::new(ToolConfigSource::empty()));
        let output = adapter.execute(&parameters, &input).await.unwrap();

        let blast = dir.path().join("UNIPROT_OUTPUT/blast_results.tsv");
        let diamond = dir.path().join("UNIPROT_OUTPUT/diamond_results.tsv");
        assert_eq!(output["blast_output_file"], path_value(&blast));
        assert_eq!(output["diamond_output_file"], path_value(&diamond));
        assert!(artifact_is_valid(&blast).is_ok());
        assert!(artifact_is_valid(&diamond).is_ok());
        assert!(dir.path().join("UNIPROT_DB/uniprot_sprot.pin").exists());
        assert!(dir.path().join("UNIPROT_DB/uniprot_sprot.dmnd").exists());
    }

    #[tokio::test]
    async fn test_skipped_when_both_results_exist() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("UNIPROT_OUTPUT");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("blast_results.tsv"), b"q1\tsp|P1|X\n").unwrap();
        fs::write(out_dir.join("diamond_results.tsv"), b"q1\tsp|P1|X\n").unwrap();

        let failing = fake_tool(dir.path(), "blastp", "exit 1");
        let input = object(json!({
            "run_directory": dir.path().to_str().unwrap(),
            "query_file": "/data/query.fa"
        }));
        let parameters = object(json!({"blastp_path": failing.to_str().unwrap()}));

        let adapter = UniProtDataPreparer::new(Arc::new(ToolConfigSource::empty()));
        assert!(adapter.execute(&parameters, &input).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_file_is_mandatory() {
        let adapter = UniProtDataPreparer::new(Arc::new(ToolConfigSource::empty()));
        let err = adapter
            .execute(&Payload::new(), &InputMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::MissingInput { ref key, .. } if key == "query_file"));
    }
}
