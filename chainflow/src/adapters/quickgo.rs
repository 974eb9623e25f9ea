//! GO annotation lookup through the QuickGO REST API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::config::object;
use super::{path_value, StepAdapter, StepEnv, ToolConfig, ToolConfigSource};
use crate::core::{InputMap, OutputMap, Payload};
use crate::errors::{StepError, ToolError};
use crate::order::GO_ANNOTATION_FETCHER;
use crate::runner::run_with_retry;

const QUICKGO_SEARCH_URL: &str = "https://www.ebi.ac.uk/QuickGO/services/annotation/search";

/// Looks up annotations for a batch of UniProt accessions.
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    /// Returns the raw annotation records for `ids`.
    async fn search(&self, ids: &[String]) -> Result<Vec<Value>, ToolError>;
}

/// [`AnnotationClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct QuickGoClient {
    http: reqwest::Client,
    url: String,
    query: Vec<(String, String)>,
}

impl QuickGoClient {
    /// Builds a client from the step configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed keys or if the HTTP
    /// client cannot be built.
    pub fn from_config(config: &ToolConfig) -> Result<Self, StepError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.uint("request_timeout_seconds")?))
            .build()
            .map_err(|e| StepError::configuration(GO_ANNOTATION_FETCHER, e.to_string()))?;

        let mut query = vec![
            ("geneProductType".to_string(), config.string("gene_product_type")?.to_string()),
            ("limit".to_string(), config.uint("limit")?.to_string()),
        ];
        query.extend(config.strings("aspect")?.into_iter().map(|a| ("aspect".to_string(), a)));
        query.extend(
            config
                .strings("include_fields")?
                .into_iter()
                .map(|f| ("includeFields".to_string(), f)),
        );

        Ok(Self {
            http,
            url: config.string("quickgo_url")?.to_string(),
            query,
        })
    }
}

#[async_trait]
impl AnnotationClient for QuickGoClient {
    async fn search(&self, ids: &[String]) -> Result<Vec<Value>, ToolError> {
        let response = self
            .http
            .post(&self.url)
            .query(&self.query)
            .query(&[("geneProductId", ids.join(","))])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::http(&self.url, e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::http(&self.url, e.to_string()))?;
        match body.get("results") {
            Some(Value::Array(results)) => Ok(results.clone()),
            _ => Err(ToolError::invalid_output("QuickGO response has no 'results' list")),
        }
    }
}

/// One similarity hit kept for annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// UniProt accession of the subject.
    pub uniprot_id: String,
    /// Expectation value of the hit.
    pub evalue: f64,
}

/// Fetches GO annotations for every UniProt hit below the e-value threshold.
#[derive(Clone)]
pub struct GoAnnotationFetcher {
    source: Arc<ToolConfigSource>,
    client: Option<Arc<dyn AnnotationClient>>,
}

impl std::fmt::Debug for GoAnnotationFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoAnnotationFetcher")
            .field("source", &self.source)
            .field("custom_client", &self.client.is_some())
            .finish()
    }
}

impl GoAnnotationFetcher {
    /// Creates the adapter talking to QuickGO.
    #[must_use]
    pub fn new(source: Arc<ToolConfigSource>) -> Self {
        Self { source, client: None }
    }

    /// Creates the adapter with a fixed annotation client.
    #[must_use]
    pub fn with_client(source: Arc<ToolConfigSource>, client: Arc<dyn AnnotationClient>) -> Self {
        Self {
            source,
            client: Some(client),
        }
    }

    /// Built-in configuration.
    #[must_use]
    pub fn defaults() -> Payload {
        object(json!({
            "quickgo_url": QUICKGO_SEARCH_URL,
            "gene_product_type": "protein",
            "aspect": ["biological_process", "molecular_function", "cellular_component"],
            "include_fields": ["goName", "taxonName", "name", "synonyms"],
            "limit": 200,
            "evalue_threshold": 1e-10,
            "batch_size": 3,
            "sleep_time": 1,
            "request_timeout_seconds": 60,
            "output_directory": "GO_ANNOTATIONS",
            "output_file": "go_annotations.jsonl",
            "no_annotations_file": "no_annotations_uniprot_ids.json",
            "max_retries": 10,
            "retry_wait_time": 5,
            "force_run": false
        }))
    }

    fn client(&self, config: &ToolConfig) -> Result<Arc<dyn AnnotationClient>, StepError> {
        match &self.client {
            Some(client) => Ok(Arc::clone(client)),
            None => Ok(Arc::new(QuickGoClient::from_config(config)?)),
        }
    }

    fn result_file(env: &StepEnv<'_>, config: &ToolConfig) -> Result<PathBuf, StepError> {
        for key in ["result_file", "diamond_output_file"] {
            if let Some(path) = env.optional_path(key)? {
                return Ok(path);
            }
        }
        match config.get("result_file") {
            Some(Value::String(s)) if !s.is_empty() => Ok(PathBuf::from(s)),
            _ => Err(StepError::missing_input(GO_ANNOTATION_FETCHER, "result_file")),
        }
    }
}

/// Reads a tabular (outfmt 6) search result into gene -> hits below the
/// threshold, in file order.
///
/// Subjects of the form `sp|P12345|NAME` are reduced to the accession. Lines
/// with fewer than 11 columns or an unparsable e-value are skipped.
pub async fn parse_tabular(
    path: &Path,
    evalue_threshold: f64,
) -> std::io::Result<BTreeMap<String, Vec<Hit>>> {
    let text = fs::read_to_string(path).await?;
    let mut hits = BTreeMap::new();
    for line in text.lines() {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 11 {
            if !line.trim().is_empty() {
                debug!(line, "Skipping malformed result line");
            }
            continue;
        }
        let Ok(evalue) = columns[10].trim().parse::<f64>() else {
            debug!(line, "Skipping result line with unparsable e-value");
            continue;
        };
        if evalue >= evalue_threshold {
            continue;
        }
        let subject = columns[1];
        let uniprot_id = subject.split('|').nth(1).unwrap_or(subject).to_string();
        hits.entry(columns[0].to_string())
            .or_insert_with(Vec::new)
            .push(Hit { uniprot_id, evalue });
    }
    Ok(hits)
}

/// Accessions recorded as having no annotations by an earlier run.
async fn listed_unannotated(path: &Path) -> BTreeSet<String> {
    let Ok(raw) = fs::read(path).await else {
        return BTreeSet::new();
    };
    match serde_json::from_slice::<Vec<String>>(&raw) {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable no-annotations list");
            BTreeSet::new()
        }
    }
}

/// Accessions already present in a JSON-lines annotation file.
async fn saved_ids(path: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e),
    };
    for line in text.lines() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(id) = record.get("geneProductId").and_then(Value::as_str) {
            ids.insert(id.rsplit(':').next().unwrap_or(id).to_string());
        }
    }
    Ok(ids)
}

async fn write_unannotated(path: &Path, ids: &BTreeSet<String>) -> Result<(), StepError> {
    let body = serde_json::to_vec_pretty(ids).map_err(|e| StepError::Adapter(e.to_string()))?;
    fs::write(path, body).await?;
    Ok(())
}

#[async_trait]
impl StepAdapter for GoAnnotationFetcher {
    fn name(&self) -> &str {
        GO_ANNOTATION_FETCHER
    }

    async fn execute(&self, parameters: &Payload, input: &InputMap) -> Result<OutputMap, StepError> {
        let env = StepEnv::new(GO_ANNOTATION_FETCHER, input);
        let config = self.source.resolve(GO_ANNOTATION_FETCHER, Self::defaults(), parameters);
        let result_file = Self::result_file(&env, &config)?;
        let threshold = config.number("evalue_threshold")?;
        let batch_size = usize::try_from(config.uint("batch_size")?.max(1)).unwrap_or(1);
        let pause = Duration::from_secs(config.uint("sleep_time")?);
        let policy = config.retry_policy()?;
        let force_run = config.force_run()?;

        let output_dir = config.dir("output_directory", env.run_directory())?;
        let output_file = output_dir.join(config.string("output_file")?);
        let no_annotations_file = output_dir.join(config.string("no_annotations_file")?);
        let output = object(json!({
            "output_file": path_value(&output_file),
            "no_annotations_file": path_value(&no_annotations_file),
        }));

        let hits = parse_tabular(&result_file, threshold).await?;
        let expected: BTreeSet<String> = hits
            .into_values()
            .flatten()
            .map(|hit| hit.uniprot_id)
            .collect();
        if expected.is_empty() {
            return Err(StepError::Adapter(format!(
                "no hits below e-value {threshold} in {}",
                result_file.display()
            )));
        }

        fs::create_dir_all(&output_dir).await?;
        if force_run {
            for path in [&output_file, &no_annotations_file] {
                match fs::remove_file(path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
        }
        let mut unannotated: BTreeSet<String> = listed_unannotated(&no_annotations_file)
            .await
            .intersection(&expected)
            .cloned()
            .collect();
        let mut done = saved_ids(&output_file).await?;
        done.extend(unannotated.iter().cloned());
        let remaining: Vec<String> = expected.difference(&done).cloned().collect();
        if remaining.is_empty() {
            info!(ids = expected.len(), "All annotations already fetched, skipping");
            return Ok(output);
        }
        info!(
            total = expected.len(),
            remaining = remaining.len(),
            batch_size,
            "Fetching GO annotations"
        );

        let client = self.client(&config)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&output_file)
            .await?;

        let batches: Vec<&[String]> = remaining.chunks(batch_size).collect();
        for (index, batch) in batches.iter().enumerate() {
            let label = format!("QuickGO batch {}/{}", index + 1, batches.len());
            let annotations =
                run_with_retry(&label, &policy, || client.search(batch), |_| Ok(())).await?;

            let mut annotated = BTreeSet::new();
            for annotation in &annotations {
                if let Some(id) = annotation.get("geneProductId").and_then(Value::as_str) {
                    annotated.insert(id.rsplit(':').next().unwrap_or(id).to_string());
                }
                file.write_all(format!("{annotation}\n").as_bytes()).await?;
            }
            file.flush().await?;
            unannotated.extend(batch.iter().filter(|id| !annotated.contains(*id)).cloned());
            // Persisted per batch; a resumed run skips these ids.
            write_unannotated(&no_annotations_file, &unannotated).await?;

            if index + 1 < batches.len() && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        if !unannotated.is_empty() {
            warn!(count = unannotated.len(), "Accessions without GO annotations");
        }
        write_unannotated(&no_annotations_file, &unannotated).await?;

        Ok(output)
    }
}
