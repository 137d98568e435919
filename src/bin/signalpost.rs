#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use signalpost::agents::{LlmEditor, LlmReviewer, PerplexitySearch, RapidApiTwitter};
use signalpost::gateway::{ChatGateway, Endpoint, ProviderGateway, UsageSink, UsageTally};
use signalpost::store::SessionSummary;
use signalpost::{
    Pipeline, PipelineAgents, RunConfig, SearchProvider, SocialProvider, SqliteStore,
};

#[derive(Parser)]
#[command(name = "signalpost", version, about = "Cached research-to-posts pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run search, review and edit for a topic
    Run {
        /// JSON run config; every field is optional
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        social_query: Option<String>,
        #[arg(long)]
        app_name: Option<String>,
        #[arg(long)]
        app_description: Option<String>,
        /// File with feature notes for the app
        #[arg(long)]
        features: Option<PathBuf>,
        /// Name for a newly created session
        #[arg(long)]
        session_name: Option<String>,
        /// Reuse the most recent session so cached stages are skipped
        #[arg(long)]
        reuse_latest: bool,
        /// Always start a new session (wins over --reuse-latest)
        #[arg(long)]
        force_new: bool,
        #[arg(long)]
        skip_search: bool,
        #[arg(long)]
        skip_social: bool,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Hold an exclusive lock on the store for the whole run
        #[arg(long)]
        lock_store: bool,
        /// Echo every provider call as a JSON line on stderr
        #[arg(long)]
        log_usage: bool,
        /// Write the run outcome as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List sessions with per-stage row counts, newest first
    Sessions {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Export one session and all of its rows as JSON
    Export {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Session id (default: latest)
        #[arg(long)]
        session: Option<i64>,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Drop and recreate every table
    Reset {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            topic,
            social_query,
            app_name,
            app_description,
            features,
            session_name,
            reuse_latest,
            force_new,
            skip_search,
            skip_social,
            db,
            lock_store,
            log_usage,
            out,
        } => {
            let mut cfg = match config {
                Some(path) => RunConfig::from_path(&path)?,
                None => RunConfig::default(),
            };
            if let Some(topic) = topic {
                cfg.topic = topic;
            }
            if social_query.is_some() {
                cfg.social_query = social_query;
            }
            if let Some(name) = app_name {
                cfg.app_name = name;
            }
            if let Some(description) = app_description {
                cfg.app_description = description;
            }
            if features.is_some() {
                cfg.app_features = None;
                cfg.app_features_path = features;
            }
            if session_name.is_some() {
                cfg.session_description = session_name;
            }
            if reuse_latest || force_new {
                cfg.session.reuse_latest = reuse_latest;
                cfg.session.force_new = force_new;
            }
            cfg.run_search &= !skip_search;
            cfg.run_social &= !skip_social;

            let store = SqliteStore::new(db.unwrap_or_else(SqliteStore::default_path))?;
            let _lock = if lock_store {
                Some(store.lock_exclusive()?)
            } else {
                None
            };

            let usage = Arc::new(UsageTally::new(log_usage));
            let pipeline = Pipeline::new(store, build_agents(&cfg, usage.clone())?);
            let result = pipeline.run(&cfg.pipeline_input()).await;
            eprintln!("[pipeline] {}", usage.totals());
            let outcome = result?;

            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for (i, post) in outcome.posts().iter().enumerate() {
                writeln!(handle, "--- Post {} | {}", i + 1, post.topic)?;
                writeln!(handle, "{}\n", post.post.trim())?;
            }

            if let Some(out) = out {
                write_json(&out, &outcome)?;
                eprintln!("[pipeline] wrote {}", out.display());
            }
        }
        Commands::Sessions { db, json } => {
            let store = SqliteStore::new(db.unwrap_or_else(SqliteStore::default_path))?;
            let summaries = store.session_summaries().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("no sessions");
            } else {
                for summary in &summaries {
                    println!("{}", format_summary(summary));
                }
            }
        }
        Commands::Export { db, session, out } => {
            let store = SqliteStore::new(db.unwrap_or_else(SqliteStore::default_path))?;
            let session_id = match session {
                Some(id) => id,
                None => store
                    .latest_session()
                    .await?
                    .map(|s| s.id)
                    .ok_or("store has no sessions")?,
            };
            let export = store.export_session(session_id).await?;
            match out {
                Some(out) => {
                    write_json(&out, &export)?;
                    eprintln!("exported session {session_id} to {}", out.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&export)?),
            }
        }
        Commands::Reset { db, yes } => {
            if !yes {
                return Err("reset drops every session and result; pass --yes to confirm".into());
            }
            let store = SqliteStore::new(db.unwrap_or_else(SqliteStore::default_path))?;
            let _lock = store.lock_exclusive()?;
            store.reset().await?;
            println!("reset {}", store.path().display());
        }
    }

    Ok(())
}

fn build_agents(
    cfg: &RunConfig,
    usage: Arc<dyn UsageSink>,
) -> Result<PipelineAgents, Box<dyn std::error::Error>> {
    let openrouter: Arc<dyn ChatGateway> = Arc::new(ProviderGateway::from_endpoint(
        Endpoint::openrouter_from_env()?,
        usage.clone(),
    )?);

    let search: Option<Arc<dyn SearchProvider>> = if cfg.run_search {
        let perplexity: Arc<dyn ChatGateway> = Arc::new(ProviderGateway::from_endpoint(
            Endpoint::perplexity_from_env()?,
            usage.clone(),
        )?);
        Some(Arc::new(PerplexitySearch::with_model(perplexity, &cfg.search_model)))
    } else {
        None
    };

    let social: Option<Arc<dyn SocialProvider>> = if cfg.run_social {
        Some(Arc::new(RapidApiTwitter::from_env()?.with_usage_sink(usage)))
    } else {
        None
    };

    Ok(PipelineAgents {
        search,
        social,
        reviewer: Arc::new(LlmReviewer::with_model(openrouter.clone(), &cfg.reviewer_model)),
        editor: Arc::new(LlmEditor::with_model(openrouter, &cfg.editor_model)),
    })
}

fn format_summary(summary: &SessionSummary) -> String {
    let created = chrono::DateTime::from_timestamp(summary.session.created_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| summary.session.created_at.to_string());
    format!(
        "{:>4}  {}  {}  search={} social={} reviewer={} editor={}",
        summary.session.id,
        created,
        summary.session.name,
        summary.search_results,
        summary.social_results,
        summary.reviewer_outputs,
        summary.editor_outputs,
    )
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
