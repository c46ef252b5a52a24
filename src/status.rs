// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::DeployError;
use crate::store::{DeploymentRecord, DeploymentStore};
use crate::types::{ClientStatus, DeploymentStatus, LastLogs};

const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// User-safe projection of a deployment record. Built by hand rather than
/// serializing the record so a new secret column can never leak by default.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentView {
    pub instance_name: String,
    pub public_ip: String,
    pub dns_name: String,
    pub region: String,
    pub last_logs: Option<LastLogs>,
    pub last_deployed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: ClientStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentView>,
}

/// Maps the persisted state machine onto the client vocabulary. Absence of a
/// record and a NULL status both read as `setup_pending`.
fn client_status(record: Option<&DeploymentRecord>) -> ClientStatus {
    let Some(record) = record else {
        return ClientStatus::SetupPending;
    };

    match record.status.as_deref().and_then(DeploymentStatus::from_str) {
        Some(DeploymentStatus::Deploying) => ClientStatus::InProgress,
        Some(DeploymentStatus::Failed) => ClientStatus::Failed,
        Some(DeploymentStatus::Success) => ClientStatus::Success,
        None => ClientStatus::SetupPending,
    }
}

fn view(record: &DeploymentRecord) -> DeploymentView {
    DeploymentView {
        instance_name: record.instance_name.clone(),
        public_ip: record.public_ip.clone(),
        dns_name: record.dns_name.clone(),
        region: record.region.clone(),
        last_logs: record.last_logs(),
        last_deployed_at: record.last_deployed_at,
    }
}

pub async fn project_status(
    store: &dyn DeploymentStore,
    project_id: Uuid,
) -> Result<StatusResponse, DeployError> {
    let record = store.get(project_id).await?;

    Ok(StatusResponse {
        status: client_status(record.as_ref()),
        deployment: record.as_ref().map(view),
    })
}

/// Re-reads the store on every tick and yields each snapshot. Never stops on
/// a terminal status: the orchestrator mutates the record out-of-band (a
/// redeploy flips `success` back to `deploying`), so a connected client must
/// keep seeing transitions. Only a store read failure ends the stream.
fn status_snapshots(
    store: Arc<dyn DeploymentStore>,
    project_id: Uuid,
) -> impl Stream<Item = StatusResponse> {
    futures::stream::unfold(Some((store, true)), move |state| async move {
        let (store, first) = state?;

        if !first {
            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }

        let response = match project_status(store.as_ref(), project_id).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("Status stream read failed for project {}: {}", project_id, err);
                return None;
            }
        };

        Some((response, Some((store, false))))
    })
}

/// Server-sent status updates. Every snapshot is emitted; the client is
/// expected to dedupe.
pub fn status_stream(
    store: Arc<dyn DeploymentStore>,
    project_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = status_snapshots(store, project_id).map(|response| {
        let event = match Event::default().event("status").json_data(&response) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!("Status stream serialization failed: {}", err);
                Event::default().comment("serialization failed")
            }
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
