//! # refine
//!
//! Command-line driver for the subsection refinement engine: loads a plan,
//! wires the collaborators together and steps the engine to the end.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use refine_core::collaborators::DocumentFetcher;
use refine_core::ids::SessionId;
use refine_core::plan::Plan;
use refine_core::survey::ContentTree;
use refine_engine::{drive, Engine, EngineDeps, RefinementProgress};
use refine_llm::{AnthropicProvider, ReliableConfig, ReliableProvider};
use refine_retrieval::{
    embedding_service, ContextBuilder, DocumentCache, HttpDocumentFetcher, LocalDirectoryFetcher,
    RetryPolicy,
};
use refine_settings::{load_settings, load_settings_from_path, RefineSettings};
use refine_store::{Database, SubsectionRepo, VectorRepo};
use refine_telemetry::{init_telemetry, TelemetryConfig};

/// Turn a content plan into reviewed, citation-grounded subsections.
#[derive(Parser, Debug)]
#[command(name = "refine", about = "Subsection refinement engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline over a plan.
    Run {
        /// Plan JSON file.
        #[arg(long)]
        plan: PathBuf,

        /// Directory of document texts (`{id}.txt` or `{id}.md`). Without
        /// it documents are fetched from their locators.
        #[arg(long)]
        documents: Option<PathBuf>,

        /// Session id (generated if omitted).
        #[arg(long)]
        session: Option<String>,

        /// Settings file (defaults to `~/.refine/settings.json`).
        #[arg(long)]
        settings: Option<PathBuf>,

        /// `SQLite` database path (overrides settings).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Stop after this many steps.
        #[arg(long)]
        max_steps: Option<u64>,

        /// Checkpoint file. Resumed from when it exists; rewritten when the
        /// run stops.
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Print the progress record a plan starts from.
    PlanInfo {
        #[arg(long)]
        plan: PathBuf,
    },
}

/// Progress and content saved between runs.
#[derive(Serialize, Deserialize)]
struct Checkpoint {
    session_id: SessionId,
    progress: RefinementProgress,
    tree: ContentTree,
}

fn load_plan(path: &Path) -> Result<Plan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan: {}", path.display()))?;
    let plan: Plan = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse plan: {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("Invalid plan: {}", path.display()))?;
    Ok(plan)
}

fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
    let checkpoint = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
    Ok(Some(checkpoint))
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(path, raw)
        .with_context(|| format!("Failed to write checkpoint: {}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn api_key(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn init_logging(settings: &RefineSettings) -> Result<refine_telemetry::TelemetryGuard> {
    let logging = &settings.logging;
    let config = TelemetryConfig::from_strings(
        &logging.level,
        logging
            .module_levels
            .iter()
            .map(|(m, l)| (m.as_str(), l.as_str())),
        logging.json,
    );
    Ok(init_telemetry(config)?)
}

async fn run(
    plan_path: &Path,
    documents: Option<PathBuf>,
    session: Option<String>,
    settings_path: Option<PathBuf>,
    db: Option<PathBuf>,
    max_steps: Option<u64>,
    state: Option<PathBuf>,
) -> Result<()> {
    let mut settings = match settings_path {
        Some(path) => load_settings_from_path(&path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(db) = db {
        settings.store.database_path = db;
    }
    let _telemetry = init_logging(&settings)?;

    let plan = Arc::new(load_plan(plan_path)?);
    let checkpoint = match &state {
        Some(path) => load_checkpoint(path)?,
        None => None,
    };
    let session_id = match (&checkpoint, session) {
        (Some(cp), Some(requested)) if cp.session_id.as_str() != requested => {
            bail!(
                "checkpoint belongs to session {}, not {requested}",
                cp.session_id.as_str()
            );
        }
        (Some(cp), _) => cp.session_id.clone(),
        (None, Some(requested)) => SessionId::from_raw(requested),
        (None, None) => SessionId::new(),
    };

    ensure_parent_dir(&settings.store.database_path)?;
    let db = Database::open(&settings.store.database_path).with_context(|| {
        format!("Failed to open database: {}", settings.store.database_path.display())
    })?;

    let fetcher: Arc<dyn DocumentFetcher> = match documents {
        Some(dir) => Arc::new(LocalDirectoryFetcher::new(dir)),
        None => Arc::new(HttpDocumentFetcher::new(Duration::from_secs(
            settings.retrieval.fetch_timeout_secs,
        ))?),
    };
    let embedder = embedding_service(&settings.retrieval, api_key("OPENAI_API_KEY"))
        .context("Set OPENAI_API_KEY, or select the hashed embedder with REFINE_EMBEDDING=hashed")?;
    let context = ContextBuilder::new(
        &settings.retrieval,
        fetcher,
        embedder,
        Arc::new(VectorRepo::new(db.clone())),
        Arc::new(DocumentCache::new()),
    )?
    .with_retry(RetryPolicy::from(&settings.retry));

    let Some(key) = api_key("ANTHROPIC_API_KEY") else {
        bail!("ANTHROPIC_API_KEY is not set");
    };
    let mut anthropic = AnthropicProvider::new(key, settings.llm.model.clone())?;
    if let Some(url) = &settings.llm.api_url {
        anthropic = anthropic.with_api_url(url.clone());
    }
    let provider = ReliableProvider::new(anthropic, ReliableConfig::from(&settings.retry));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let engine = Engine::new(
        session_id.clone(),
        Arc::clone(&plan),
        EngineDeps {
            provider: Arc::new(provider),
            context: Arc::new(context),
            store: Arc::new(SubsectionRepo::new(db)),
        },
        &settings,
        cancel,
    );

    let (progress, tree) = match checkpoint {
        Some(cp) => {
            info!(session_id = %session_id, position = %cp.progress.position(), "resuming from checkpoint");
            (cp.progress, cp.tree)
        }
        None => (engine.initial_progress(), ContentTree::new()),
    };
    info!(
        session_id = %session_id,
        sections = progress.total_sections,
        subsections = progress.total_subsections(),
        "starting run"
    );

    match drive(&engine, progress, tree, max_steps).await {
        Ok(report) => {
            if let Some(path) = &state {
                save_checkpoint(
                    path,
                    &Checkpoint {
                        session_id,
                        progress: report.progress,
                        tree: report.tree,
                    },
                )?;
            }
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
            Ok(())
        }
        Err(failure) => {
            error!(
                section = failure.section + 1,
                subsection = failure.subsection + 1,
                revision_count = failure.revision_count,
                revision_limit_exhausted = failure.revision_limit_exhausted,
                "run stopped"
            );
            let message = failure.to_string();
            if let Some(path) = &state {
                let failure = *failure;
                save_checkpoint(
                    path,
                    &Checkpoint {
                        session_id,
                        progress: failure.progress,
                        tree: failure.tree,
                    },
                )?;
                info!(path = %path.display(), "checkpoint written");
            }
            bail!(message)
        }
    }
}

fn plan_info(path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    let progress = RefinementProgress::initialise(&plan);
    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            plan,
            documents,
            session,
            settings,
            db,
            max_steps,
            state,
        } => run(&plan, documents, session, settings, db, max_steps, state).await,
        Command::PlanInfo { plan } => plan_info(&plan),
    }
}
