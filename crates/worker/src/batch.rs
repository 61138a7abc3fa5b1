use anyhow::Context;
use chrono::NaiveDate;
use finpersona_core::audit::GuardrailStats;
use finpersona_core::catalog::Catalog;
use finpersona_core::ingest::RecordSource;
use finpersona_core::pipeline::{evaluate_user, PipelineOptions, PipelineOutput};
use finpersona_core::time::TimeWindow;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSelection {
    One(TimeWindow),
    Both,
}

impl WindowSelection {
    pub fn windows(self) -> Vec<TimeWindow> {
        match self {
            WindowSelection::One(w) => vec![w],
            WindowSelection::Both => TimeWindow::ALL.to_vec(),
        }
    }
}

impl FromStr for WindowSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("both") {
            return Ok(WindowSelection::Both);
        }
        Ok(WindowSelection::One(s.parse()?))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub reference_date: NaiveDate,
    pub windows: Vec<TimeWindow>,
    /// Maximum evaluations in flight.
    pub concurrency: usize,
    pub pipeline: PipelineOptions,
}

impl BatchOptions {
    pub fn concurrency_from_env() -> usize {
        std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY)
    }
}

/// One line of worker output.
#[derive(Debug)]
pub struct EvaluationLine {
    pub user_id: String,
    pub window: Option<TimeWindow>,
    pub result: anyhow::Result<PipelineOutput>,
}

impl EvaluationLine {
    pub fn to_json(&self) -> serde_json::Value {
        match &self.result {
            Ok(output) => json!({
                "user_id": self.user_id,
                "window": self.window,
                "status": "ok",
                "output": output,
            }),
            Err(err) => json!({
                "user_id": self.user_id,
                "window": self.window,
                "status": "error",
                "error": format!("{err:#}"),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub lines: Vec<EvaluationLine>,
    pub evaluated: usize,
    pub failed: usize,
    pub unclassified: usize,
    pub guardrails: GuardrailStats,
}

impl BatchReport {
    fn from_lines(mut lines: Vec<EvaluationLine>) -> Self {
        lines.sort_by(|a, b| (&a.user_id, a.window).cmp(&(&b.user_id, b.window)));

        let mut report = BatchReport::default();
        for line in &lines {
            match &line.result {
                Ok(output) => {
                    report.evaluated += 1;
                    if output.assignment.is_unclassified() {
                        report.unclassified += 1;
                    }
                    report.guardrails.merge(&output.guardrail_stats());
                }
                Err(_) => report.failed += 1,
            }
        }
        report.lines = lines;
        report
    }
}

/// Fetch each user's records and evaluate every requested window. A failed fetch or evaluation
/// becomes an error line; the rest of the batch continues.
pub async fn run_batch(
    source: Arc<dyn RecordSource>,
    catalog: Arc<Catalog>,
    users: Vec<String>,
    opts: BatchOptions,
) -> anyhow::Result<BatchReport> {
    anyhow::ensure!(!opts.windows.is_empty(), "at least one window is required");
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for user_id in users {
        let source = source.clone();
        let catalog = catalog.clone();
        let semaphore = semaphore.clone();
        let opts = opts.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;
            Ok::<_, anyhow::Error>(evaluate_one_user(source, catalog, user_id, opts).await)
        });
    }

    let mut lines = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        lines.extend(joined.context("worker task panicked")??);
    }

    Ok(BatchReport::from_lines(lines))
}

async fn evaluate_one_user(
    source: Arc<dyn RecordSource>,
    catalog: Arc<Catalog>,
    user_id: String,
    opts: BatchOptions,
) -> Vec<EvaluationLine> {
    let records = match source.fetch_user_records(&user_id).await {
        Ok(records) => Arc::new(records),
        Err(err) => {
            tracing::error!(%user_id, source = source.source_name(), error = %format!("{err:#}"), "record fetch failed");
            sentry_anyhow::capture_anyhow(&err);
            return vec![EvaluationLine {
                user_id,
                window: None,
                result: Err(err),
            }];
        }
    };

    let mut lines = Vec::with_capacity(opts.windows.len());
    for window in opts.windows.iter().copied() {
        let records = records.clone();
        let catalog = catalog.clone();
        let pipeline = opts.pipeline;
        let reference_date = opts.reference_date;

        let result = tokio::task::spawn_blocking(move || {
            evaluate_user(&records, window, reference_date, &catalog, &pipeline)
        })
        .await
        .context("evaluation task panicked")
        .and_then(|r| r);

        if let Err(err) = &result {
            tracing::error!(%user_id, %window, error = %format!("{err:#}"), "user evaluation failed");
            sentry_anyhow::capture_anyhow(err);
        }
        lines.push(EvaluationLine {
            user_id: user_id.clone(),
            window: Some(window),
            result,
        });
    }
    lines
}
