use anyhow::Context;
use clap::Parser;
use finpersona_core::ingest::{FileRecordSource, HttpJsonRecordSource, RecordSource};
use finpersona_core::pipeline::PipelineOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod batch;

use batch::{BatchOptions, WindowSelection};

#[derive(Debug, Parser)]
#[command(name = "finpersona_worker")]
struct Args {
    /// Reference date (YYYY-MM-DD). Defaults to the previous UTC day.
    #[arg(long)]
    reference_date: Option<String>,

    /// 30d, 180d or both.
    #[arg(long, default_value = "both")]
    window: WindowSelection,

    /// JSON array of user record bundles. Without it, records come from the configured provider.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Only evaluate these users (repeatable).
    #[arg(long = "user")]
    users: Vec<String>,

    /// Write JSON lines here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Overrides WORKER_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Load and validate the catalog and records, evaluate nothing.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finpersona_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(args, settings).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args, settings: finpersona_core::config::Settings) -> anyhow::Result<()> {
    let reference_date = finpersona_core::time::resolve_reference_date(
        args.reference_date.as_deref(),
        chrono::Utc::now(),
    )?;

    let catalog = Arc::new(finpersona_core::catalog::load_from_settings(&settings)?);

    let source: Arc<dyn RecordSource> = match &args.records {
        Some(path) => Arc::new(FileRecordSource::open(path).await?),
        None => Arc::new(HttpJsonRecordSource::from_settings(&settings)?),
    };

    let users = if args.users.is_empty() {
        source
            .list_users()
            .await
            .with_context(|| format!("failed to list users from {}", source.source_name()))?
    } else {
        args.users.clone()
    };

    let opts = BatchOptions {
        reference_date,
        windows: args.window.windows(),
        concurrency: args
            .concurrency
            .unwrap_or_else(BatchOptions::concurrency_from_env),
        pipeline: PipelineOptions::from_settings(&settings),
    };

    if args.dry_run {
        for user_id in &users {
            source.fetch_user_records(user_id).await?;
        }
        tracing::info!(
            %reference_date,
            dry_run = true,
            catalog_version = %catalog.version,
            personas = catalog.personas.len(),
            users = users.len(),
            "catalog and records validated; nothing evaluated"
        );
        return Ok(());
    }

    tracing::info!(
        %reference_date,
        catalog_version = %catalog.version,
        users = users.len(),
        windows = opts.windows.len(),
        concurrency = opts.concurrency,
        "batch started"
    );

    let report = batch::run_batch(source, catalog, users, opts).await?;

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for line in &report.lines {
        serde_json::to_writer(&mut out, &line.to_json()).context("failed to write output line")?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    tracing::info!(
        %reference_date,
        evaluated = report.evaluated,
        failed = report.failed,
        unclassified = report.unclassified,
        candidates = report.guardrails.candidates,
        surfaced = report.guardrails.surfaced,
        withheld = report.guardrails.withheld(),
        guardrails = %serde_json::to_string(&report.guardrails.by_check)?,
        failure_reasons = %serde_json::to_string(&report.guardrails.failure_reasons)?,
        "batch finished"
    );

    Ok(())
}

fn init_sentry(settings: &finpersona_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
