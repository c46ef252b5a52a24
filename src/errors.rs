// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use std::error::Error;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Error kinds the deployment workflows can surface. Resolution errors abort
/// before any side effect; provider, DNS, remote and timeout errors are fatal
/// for the current run.
#[derive(Debug)]
pub enum DeployError {
    NotFound {
        what: &'static str,
    },
    AlreadyRunning {
        project_id: Uuid,
    },
    AlreadyProvisioned {
        project_id: Uuid,
    },
    Credential(String),
    Provider(String),
    Dns(String),
    Remote(String),
    Timeout {
        attempts: u32,
    },
    Internal(String),
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "{} not found", what),
            Self::AlreadyRunning { project_id } => {
                write!(f, "a deployment is already running for project {}", project_id)
            }
            Self::AlreadyProvisioned { project_id } => {
                write!(f, "a deployment already exists for project {}", project_id)
            }
            Self::Credential(msg) => write!(f, "credential error: {}", msg),
            Self::Provider(msg) => write!(f, "cloud provider error: {}", msg),
            Self::Dns(msg) => write!(f, "DNS provider error: {}", msg),
            Self::Remote(msg) => write!(f, "remote execution error: {}", msg),
            Self::Timeout { attempts } => {
                write!(f, "instance did not reach running state after {} checks", attempts)
            }
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl Error for DeployError {}

impl DeployError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyRunning { .. } => "already_running",
            Self::AlreadyProvisioned { .. } => "already_provisioned",
            Self::Credential(_) => "credential_invalid",
            Self::Provider(_) => "provider_error",
            Self::Dns(_) => "dns_error",
            Self::Remote(_) => "remote_error",
            Self::Timeout { .. } => "provision_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyRunning { .. } | Self::AlreadyProvisioned { .. } => StatusCode::CONFLICT,
            Self::Credential(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) | Self::Dns(_) | Self::Remote(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for DeployError {
    fn from(err: sqlx::Error) -> Self {
        DeployError::Internal(format!("database error: {}", err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DeployError::NotFound { what: "project" }.code(), "not_found");
        assert_eq!(DeployError::Timeout { attempts: 24 }.code(), "provision_timeout");
        assert_eq!(
            DeployError::AlreadyRunning { project_id: Uuid::new_v4() }.code(),
            "already_running"
        );
        assert_eq!(
            DeployError::AlreadyProvisioned { project_id: Uuid::new_v4() }.code(),
            "already_provisioned"
        );
    }

    #[test]
    fn test_display_messages() {
        let err = DeployError::NotFound { what: "deployment" };
        assert_eq!(err.to_string(), "deployment not found");

        let err = DeployError::Timeout { attempts: 24 };
        assert!(err.to_string().contains("24"));
    }
}
