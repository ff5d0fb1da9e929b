//! Argument handling and orchestration for the `entisync` binary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use entisync_sync::central::{cache_path, config_path, CentralClient, CentralConfig, TokenCache};
use entisync_sync::{
    AppliedChanges, EntityRemote, MergeActions, MergeEngine, MergeRequest, PhaseCounts,
};
use entisync_types::SourceRow;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(name = "entisync")]
#[command(about = "Merge tabular rows into an ODK Central entity list", version)]
pub struct Args {
    /// JSON file holding an array of row objects; `-` or omitted reads stdin
    pub input: Option<PathBuf>,

    /// Target entity list name
    #[arg(short, long)]
    pub list: String,

    /// Project id; defaults to `default_project_id` from the config file
    #[arg(short, long)]
    pub project: Option<u32>,

    /// Field used to match rows; repeat for a composite key
    #[arg(short = 'k', long = "match-key")]
    pub match_keys: Vec<String>,

    /// Do not register source fields missing from the entity list
    #[arg(long)]
    pub no_add_properties: bool,

    /// Do not update matched rows
    #[arg(long)]
    pub no_update: bool,

    /// Delete remote rows that have no source counterpart
    #[arg(long)]
    pub delete: bool,

    /// Source field holding the entity label
    #[arg(long, default_value = "label")]
    pub label_key: String,

    /// Only process these source fields; repeat for each field
    #[arg(long = "source-key")]
    pub source_keys: Vec<String>,

    /// Name recorded as the origin of created rows
    #[arg(long)]
    pub create_source: Option<String>,

    /// Size of the source recorded with created rows
    #[arg(long)]
    pub source_size: Option<String>,

    /// Compute the plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Config file path (default: ~/.entisync/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Token cache path (default: ~/.entisync/cache.toml)
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn to_request(&self) -> MergeRequest {
        let mut request = MergeRequest::new(self.list.clone())
            .add_new_properties(!self.no_add_properties)
            .update_matched(!self.no_update)
            .delete_not_matched(self.delete)
            .source_label_key(self.label_key.clone());
        request.project_id = self.project;
        if !self.match_keys.is_empty() {
            request = request.match_keys(self.match_keys.iter().cloned());
        }
        if !self.source_keys.is_empty() {
            request = request.source_keys(self.source_keys.iter().cloned());
        }
        request.create_source = self.create_source.clone();
        request.source_size = self.source_size.clone();
        request
    }

    fn reads_stdin(&self) -> bool {
        self.input.as_ref().is_none_or(|p| p.as_os_str() == "-")
    }
}

/// Parses a JSON array of objects into source rows.
pub fn read_rows(reader: impl Read) -> Result<Vec<SourceRow>> {
    let rows: Vec<SourceRow> =
        serde_json::from_reader(reader).context("input must be a JSON array of objects")?;
    Ok(rows)
}

fn load_input(args: &Args) -> Result<Vec<SourceRow>> {
    if args.reads_stdin() {
        return read_rows(std::io::stdin().lock());
    }
    let Some(path) = &args.input else {
        bail!("no input given");
    };
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    read_rows(std::io::BufReader::new(file))
}

/// What the binary prints on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub list: String,
    pub dry_run: bool,
    pub planned: PhaseCounts,
    /// Properties the merge registers, or would register on a dry run.
    pub new_properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<AppliedChanges>,
}

impl Summary {
    fn new(list: &str, actions: &MergeActions, applied: Option<AppliedChanges>) -> Self {
        Self {
            list: list.to_string(),
            dry_run: applied.is_none(),
            planned: PhaseCounts::from(actions),
            new_properties: actions
                .final_keys
                .difference(&actions.target_keys)
                .cloned()
                .collect(),
            applied,
        }
    }
}

/// Runs one merge against an already built remote.
pub async fn run_with_remote(
    args: &Args,
    rows: &[SourceRow],
    remote: Arc<dyn EntityRemote>,
    default_project_id: Option<u32>,
) -> Result<Summary> {
    let engine = MergeEngine::new(remote).with_default_project(default_project_id);
    let request = args.to_request();

    if args.dry_run {
        let actions = engine.plan(rows, &request).await?;
        return Ok(Summary::new(&args.list, &actions, None));
    }
    let report = engine.merge(rows, &request).await?;
    Ok(Summary::new(&args.list, &report.actions, Some(report.applied)))
}

/// Loads config and input, connects to Central and runs the merge.
pub async fn run(args: &Args) -> Result<Summary> {
    let path = config_path(args.config.as_deref());
    let config = CentralConfig::load(&path)
        .with_context(|| format!("failed to load config from {path:?}"))?;
    let cache = TokenCache::new(cache_path(args.cache.as_deref()));
    let client = CentralClient::new(&config, Some(cache)).context("failed to build Central client")?;

    let rows = load_input(args)?;
    run_with_remote(args, &rows, Arc::new(client), config.default_project_id).await
}
