use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cache;
mod claims;
mod collaborators;
mod config;
mod db;
mod error;
mod guidance;
mod http_clients;
mod models;
mod orchestrator;
mod planner;
mod report;
mod retry;
mod router;
mod server;
mod trend;

use crate::claims::ClaimVerifier;
use crate::collaborators::{
    ContentFetcher, HistoricalDataSource, LanguageClassifier, MemorySource, Unavailable,
};
use crate::config::Config;
use crate::http_clients::{HttpClassifier, HttpContentFetcher, HttpGeoService};
use crate::models::OrchestrationRequest;
use crate::orchestrator::{Orchestrator, Specialists};
use crate::planner::ResourcePlanner;

#[derive(Parser)]
#[command(name = "outbreak-risk")]
#[command(about = "Outbreak risk scoring and question answering for regional case data", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SettingsArgs {
    /// TOML file with engine settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,
    #[arg(long, global = true)]
    task_timeout_secs: Option<u64>,
    #[arg(long, global = true)]
    global_deadline_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load six weeks of sample case counts
    Seed,
    /// Import case counts from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute the trend snapshot for a region
    Snapshot {
        #[arg(long)]
        region: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Read case counts from CSV instead of Postgres
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Use built-in sample data instead of Postgres
        #[arg(long, conflicts_with = "csv")]
        demo: bool,
    },
    /// Ask a question and print the synthesized answer
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Use built-in sample data instead of Postgres
        #[arg(long, conflicts_with = "csv")]
        demo: bool,
        /// Write a Markdown briefing here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Use built-in sample data instead of Postgres
        #[arg(long, conflicts_with = "csv")]
        demo: bool,
    },
}

fn load_config(args: &SettingsArgs) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(value) = args.max_in_flight {
        config.max_in_flight = value;
    }
    if let Some(value) = args.task_timeout_secs {
        config.task_timeout_secs = value;
    }
    if let Some(value) = args.global_deadline_secs {
        config.global_deadline_secs = value;
    }
    config.validate()?;
    Ok(config)
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance (or pass --csv)")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn data_source(csv: Option<&Path>, demo: bool) -> anyhow::Result<Arc<dyn HistoricalDataSource>> {
    if demo {
        let source = MemorySource::new().with_series(db::seed_series(trend::today()));
        info!(regions = source.regions(), "using built-in sample data");
        return Ok(Arc::new(source));
    }
    match csv {
        Some(path) => {
            let source = MemorySource::from_csv(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            info!(regions = source.regions(), path = %path.display(), "loaded case counts from CSV");
            Ok(Arc::new(source))
        }
        None => Ok(Arc::new(db::PgSource::new(connect().await?))),
    }
}

fn build_orchestrator(
    config: Config,
    data: Arc<dyn HistoricalDataSource>,
) -> anyhow::Result<Orchestrator> {
    let endpoints = config.endpoints.clone();

    let classifier: Arc<dyn LanguageClassifier> = match endpoints.classifier.as_deref() {
        Some(url) => Arc::new(HttpClassifier::new(url)?),
        None => Arc::new(Unavailable),
    };
    let fetcher: Arc<dyn ContentFetcher> = match endpoints.content_search.as_deref() {
        Some(url) => Arc::new(HttpContentFetcher::new(url)?),
        None => Arc::new(Unavailable),
    };
    let mut planner = ResourcePlanner::new(config.unit_costs.clone(), config.forecast_days);
    if let Some(url) = endpoints.geo.as_deref() {
        planner = planner.with_geo(Arc::new(HttpGeoService::new(url)?));
    }

    let specialists = Specialists {
        data,
        classifier,
        claims: Arc::new(ClaimVerifier::new(fetcher, config.claims.clone())?),
        planner: Arc::new(planner),
    };
    Ok(Orchestrator::new(config, specialists)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.settings)?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new rows).");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} case counts from {}.", csv.display());
        }
        Commands::Snapshot {
            region,
            as_of,
            csv,
            demo,
        } => {
            let orchestrator = build_orchestrator(config, data_source(csv.as_deref(), demo).await?)?;
            let as_of = as_of.unwrap_or_else(trend::today);
            let snapshot = orchestrator
                .snapshot(&region, as_of)
                .await
                .with_context(|| format!("no snapshot for {region} as of {as_of}"))?;

            println!("Region: {}", snapshot.region_key);
            println!("As of: {}", snapshot.as_of_date);
            println!(
                "7-day average: {:.1} (prior {:.1})",
                snapshot.seven_day_avg, snapshot.prior_seven_day_avg
            );
            println!("Growth rate: {:+.1}%", snapshot.growth_rate * 100.0);
            println!("Classification: {}", snapshot.classification);
            println!("Outbreak probability: {}%", snapshot.outbreak_probability);
        }
        Commands::Ask {
            question,
            region,
            as_of,
            csv,
            demo,
            out,
            json,
        } => {
            let orchestrator = build_orchestrator(config, data_source(csv.as_deref(), demo).await?)?;
            let mut request = OrchestrationRequest::new(question.clone(), region);
            if let Some(as_of) = as_of {
                request = request.with_as_of(as_of);
            }
            let result = orchestrator.handle(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.synthesized_summary);
            }
            if let Some(out) = out {
                std::fs::write(&out, report::render_briefing(&question, &result))?;
                println!("Briefing written to {}.", out.display());
            }
        }
        Commands::Serve { addr, csv, demo } => {
            let orchestrator = build_orchestrator(config, data_source(csv.as_deref(), demo).await?)?;
            info!(
                max_in_flight = orchestrator.config().max_in_flight,
                task_timeout_secs = orchestrator.config().task_timeout_secs,
                "orchestrator ready"
            );
            server::serve(addr, server::AppState::new(Arc::new(orchestrator))).await?;
        }
    }

    Ok(())
}
