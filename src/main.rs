use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use media_transcode_kit::config::{self, Config};
use media_transcode_kit::logging;
use media_transcode_kit::routes::create_routes;
use media_transcode_kit::services::cleanup::CleanupService;
use media_transcode_kit::services::encoder::FfmpegEncoder;
use media_transcode_kit::services::poller::{poll_until_settled, HttpStatusSource, PollOptions, PollOutcome};
use media_transcode_kit::state::{open_blob_store, AppState};

#[derive(Parser)]
#[command(name = "media-transcode-kit", version, about = "Chunked video upload and transcode service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Follow a transcode job on a running server until it settles
    Watch {
        hash: String,
        #[arg(long, default_value = "http://localhost:3000")]
        server: String,
        #[arg(long, default_value_t = 1500)]
        interval_ms: u64,
        /// Give up after this many seconds; waits indefinitely if unset
        #[arg(long)]
        max_wait_secs: Option<u64>,
    },
}

async fn connect(config: &Config) -> anyhow::Result<DatabaseConnection> {
    if let Some(path) = config
        .database_url
        .strip_prefix("sqlite://")
        .and_then(|rest| rest.split('?').next())
        .and_then(|file| std::path::Path::new(file).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(path).await?;
    }

    let mut options = ConnectOptions::new(config.database_url.clone());
    options.sqlx_logging(false);
    let db = Database::connect(options)
        .await
        .with_context(|| "failed to connect to the database")?;
    Migrator::up(&db, None).await.context("failed to run migrations")?;
    Ok(db)
}

async fn serve(config: &'static Config) -> anyhow::Result<()> {
    let db = connect(config).await?;
    let blobs = open_blob_store(config).await?;
    let encoder = Arc::new(FfmpegEncoder::new(&config.ffmpeg_bin, &config.ffprobe_bin));

    let state = AppState::new(Arc::new(config.clone()), db, encoder, blobs).await?;
    state.recover().await?;

    let cleanup = CleanupService::new(
        state.uploads.clone(),
        state.registry.clone(),
        config.cleanup_interval,
    );
    tokio::spawn(cleanup.run_scheduler());

    let app = create_routes(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn watch(hash: &str, server: &str, interval_ms: u64, max_wait_secs: Option<u64>) -> anyhow::Result<()> {
    let source = HttpStatusSource::new(server)?;
    let options = PollOptions {
        interval: Duration::from_millis(interval_ms),
        max_wait: max_wait_secs.map(Duration::from_secs),
        ..PollOptions::default()
    };

    let outcome = poll_until_settled(&source, hash, &options, |snapshot| {
        let qualities: Vec<String> = snapshot
            .qualities
            .iter()
            .map(|(label, q)| format!("{}={:?}/{}%", label, q.status, q.progress))
            .collect();
        println!("{:?} | {}", snapshot.overall, qualities.join(" "));
    })
    .await?;

    match outcome {
        PollOutcome::Finished(s) => println!("job finished: {:?}", s.overall),
        PollOutcome::Stopped(_) => println!("job is stopped; resume it with PUT /videos/{}/resume", hash),
        PollOutcome::GaveUp(_) => println!("gave up waiting for {}", hash),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = config::init_config(Config::from_env()?);
            serve(config).await
        }
        Command::Migrate => {
            let config = config::init_config(Config::from_env()?);
            connect(config).await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Watch {
            hash,
            server,
            interval_ms,
            max_wait_secs,
        } => watch(&hash, &server, interval_ms, max_wait_secs).await,
    }
}
