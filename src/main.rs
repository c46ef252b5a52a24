// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

mod compute;
mod credentials;
mod dns;
mod encryption;
mod errors;
mod orchestrator;
mod remote;
mod status;
mod store;
mod types;

use credentials::PlatformAccount;
use errors::DeployError;
use orchestrator::{Orchestrator, OrchestratorConfig};
use store::{DeploymentStore, PgDeploymentStore};
use types::ProvisionRequest;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn DeploymentStore>,
    orchestrator: Arc<Orchestrator>,
}

async fn provision_handler(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, DeployError> {
    state.orchestrator.clone().begin_provision(project_id, req)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    ))
}

async fn redeploy_handler(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, DeployError> {
    state.orchestrator.redeploy(project_id).await?;

    let response = status::project_status(state.store.as_ref(), project_id).await?;
    Ok(Json(response))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, DeployError> {
    let response = status::project_status(state.store.as_ref(), project_id).await?;
    Ok(Json(response))
}

async fn status_stream_handler(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> impl IntoResponse {
    status::status_stream(state.store.clone(), project_id)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    let platform_domain = std::env::var("SLIPWAY_PLATFORM_DOMAIN")
        .unwrap_or_else(|_| "slipway.app".to_string());

    let ssh_user = std::env::var("SLIPWAY_SSH_USER")
        .unwrap_or_else(|_| "ubuntu".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Connected to database");

    let encryptor = Arc::new(encryption::Encryptor::from_env()?);

    let platform_account = PlatformAccount::from_env();
    if platform_account.is_some() {
        info!("Managed platform account configured");
    } else {
        tracing::warn!("SLIPWAY_AWS_* not set - managed-account provisioning disabled");
    }

    let store: Arc<dyn DeploymentStore> = Arc::new(PgDeploymentStore::new(pool));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(compute::LightsailFactory),
        Arc::new(remote::SshRunner),
        Arc::new(dns::CloudflareDns::new()),
        encryptor,
        OrchestratorConfig {
            platform_domain,
            ssh_user,
            platform_account,
        },
    ));

    let state = AppState { store, orchestrator };

    let app = Router::new()
        .route("/projects/{id}/provision", post(provision_handler))
        .route("/projects/{id}/redeploy", post(redeploy_handler))
        .route("/projects/{id}/status", get(status_handler))
        .route("/projects/{id}/status/stream", get(status_stream_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;

    info!("Deployment service listening on 0.0.0.0:8080");

    axum::serve(listener, app).await?;

    Ok(())
}
