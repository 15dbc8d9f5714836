use adwatch_core::Platform;
use adwatch_storage::{AdFilter, PgStore};
use adwatch_sync::{maybe_build_scheduler, AdwatchService, SyncConfig};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "adwatch-cli")]
#[command(about = "Competitor ad monitoring: fetch, inspect and serve estimates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one fetch job for a competitor.
    Fetch {
        competitor: Uuid,
        /// Print the metrics bundle after the job finishes.
        #[arg(long)]
        metrics: bool,
    },
    /// Fetch every competitor in the directory, one after another.
    FetchAll,
    /// Print the estimated metrics bundle for a competitor.
    Metrics { competitor: Uuid },
    /// List stored ads, newest first.
    Ads {
        competitor: Uuid,
        #[arg(long)]
        platform: Option<Platform>,
        /// Only active (`true`) or only inactive (`false`) ads.
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show recent fetch jobs for a competitor.
    Jobs {
        competitor: Uuid,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Close fetch jobs left running past the staleness threshold.
    Recover,
    /// Apply database migrations.
    Migrate,
    /// Serve the JSON API, with the fetch scheduler when enabled.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let json = std::env::var("ADWATCH_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command {
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL is not set; the in-memory store needs no migrations");
            };
            let store = PgStore::connect(url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Fetch {
            competitor,
            metrics,
        } => {
            let service = AdwatchService::bootstrap(&config).await?;
            let job = service.run_fetch(competitor).await?;
            eprintln!("{}", job.summary());
            print_json(&job)?;
            if metrics {
                print_json(&service.get_metrics(competitor).await?)?;
            }
        }
        Commands::FetchAll => {
            let service = AdwatchService::bootstrap(&config).await?;
            let mut failed = 0usize;
            for (competitor_id, result) in service.run_fetch_all().await {
                match result {
                    Ok(job) => println!("{competitor_id} {}", job.summary()),
                    Err(err) => {
                        failed += 1;
                        println!("{competitor_id} error: {err}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} competitor fetch(es) failed");
            }
        }
        Commands::Metrics { competitor } => {
            let service = AdwatchService::bootstrap(&config).await?;
            print_json(&service.get_metrics(competitor).await?)?;
        }
        Commands::Ads {
            competitor,
            platform,
            active,
            search,
            limit,
        } => {
            let service = AdwatchService::bootstrap(&config).await?;
            let filter = AdFilter {
                platform,
                is_active: active,
                search,
                limit,
            };
            print_json(&service.list_ads(competitor, &filter).await?)?;
        }
        Commands::Jobs { competitor, limit } => {
            let service = AdwatchService::bootstrap(&config).await?;
            for job in service.fetch_jobs(competitor, limit).await? {
                println!("{} {} {}", job.id, job.started_at.to_rfc3339(), job.summary());
            }
        }
        Commands::Recover => {
            let service = AdwatchService::from_config(&config).await?;
            let recovered = service.recover_stale_jobs().await?;
            println!("recovered {} stale job(s)", recovered.len());
        }
        Commands::Serve { port } => {
            let service = AdwatchService::bootstrap(&config).await?;
            let scheduler = maybe_build_scheduler(&config, service.clone()).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %config.fetch_cron, "scheduler started");
            }
            adwatch_web::serve(service, port.unwrap_or(config.web_port)).await?;
        }
    }

    Ok(())
}
