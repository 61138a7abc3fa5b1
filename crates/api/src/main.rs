use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finpersona_core::catalog::Catalog;
use finpersona_core::domain::records::UserRecords;
use finpersona_core::error::InvariantViolation;
use finpersona_core::pipeline::{evaluate_user, PipelineOptions, PipelineOutput};
use finpersona_core::time::{resolve_reference_date, TimeWindow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = finpersona_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let catalog = match finpersona_core::catalog::load_from_settings(&settings) {
        Ok(catalog) => Some(Arc::new(catalog)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "catalog load failed; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        catalog,
        pipeline: PipelineOptions::from_settings(&settings),
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/personas", get(list_personas))
        .route("/v1/evaluate", post(evaluate))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    catalog: Option<Arc<Catalog>>,
    pipeline: PipelineOptions,
}

impl AppState {
    fn catalog(&self) -> Result<Arc<Catalog>, ApiError> {
        self.catalog.clone().ok_or_else(|| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "catalog_unavailable".to_string(),
            detail: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: String,
    detail: Option<String>,
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.error,
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(violation) = err.downcast_ref::<InvariantViolation>() {
            return ApiError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                error: violation.kind.as_str().to_string(),
                detail: Some(violation.detail.clone()),
            };
        }
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "request failed");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "internal_error".to_string(),
            detail: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct PersonaSummary {
    persona_id: String,
    display_name: String,
    description: String,
    priority_rank: u32,
    conditions: Vec<String>,
    content_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PersonaList {
    catalog_version: String,
    personas: Vec<PersonaSummary>,
}

async fn list_personas(State(state): State<AppState>) -> Result<Json<PersonaList>, ApiError> {
    let catalog = state.catalog()?;
    let personas = catalog
        .personas
        .iter()
        .map(|p| PersonaSummary {
            persona_id: p.persona_id.clone(),
            display_name: p.display_name.clone(),
            description: p.description.clone(),
            priority_rank: p.priority_rank,
            conditions: p.conditions.iter().map(ToString::to_string).collect(),
            content_ids: catalog
                .content_for_persona(&p.persona_id)
                .into_iter()
                .map(|c| c.content_id.clone())
                .collect(),
        })
        .collect();

    Ok(Json(PersonaList {
        catalog_version: catalog.version.clone(),
        personas,
    }))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    records: UserRecords,
    window: TimeWindow,
    reference_date: Option<NaiveDate>,
}

async fn evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<PipelineOutput>, ApiError> {
    let catalog = state.catalog()?;
    let reference_date = match req.reference_date {
        Some(d) => d,
        None => resolve_reference_date(None, Utc::now())?,
    };
    let options = state.pipeline;

    let output = tokio::task::spawn_blocking(move || {
        evaluate_user(&req.records, req.window, reference_date, &catalog, &options)
    })
    .await
    .map_err(anyhow::Error::new)??;

    Ok(Json(output))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
