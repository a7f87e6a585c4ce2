use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oppsync_core::Stage;
use oppsync_pipeline::config::db_settings_from_env;
use oppsync_pipeline::{PipelineConfig, RunSummary, Runner};
use oppsync_storage::PgOpportunityStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "oppsync")]
#[command(about = "Scrape opportunity listings, extract bilingual records, embed them for search")]
#[command(version)]
struct Cli {
    /// Run a single stage; without one, scrape, extract and embed run in order.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch listing pages and save unseen postings as Markdown
    Scrape,
    /// Turn new Markdown artifacts into database rows and the JSON snapshot
    Extract,
    /// Embed the snapshot and upsert it into the vector collection
    Embed,
    /// Create or update the opportunities table
    Migrate,
}

impl Commands {
    fn stage(&self) -> Option<Stage> {
        match self {
            Commands::Scrape => Some(Stage::Scrape),
            Commands::Extract => Some(Stage::Extract),
            Commands::Embed => Some(Stage::Embed),
            Commands::Migrate => None,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "oppsync failed");
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let stages = match &cli.command {
        Some(Commands::Migrate) => return migrate().await,
        Some(command) => command.stage().into_iter().collect::<Vec<_>>(),
        None => Stage::ALL.to_vec(),
    };
    let config = PipelineConfig::from_env().context("reading configuration")?;

    let summary = Runner::from_config(config).run(&stages).await?;
    print_summary(&summary);
    Ok(())
}

async fn migrate() -> Result<()> {
    let settings = db_settings_from_env()?;
    let store = PgOpportunityStore::connect(&settings)
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("applying migrations")?;
    tracing::info!("migrations applied");
    println!("migrations applied");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.reports {
        println!(
            "{}: {:?} (considered={} skipped={} failed={})",
            report.stage, report.outcome, report.considered, report.skipped, report.failed
        );
    }
    if let Some(stage) = summary.stopped_after {
        println!("stopped after {stage}: no new data");
    }
    println!("finished in {:.1}s", summary.elapsed.as_secs_f64());
}
