// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status persisted on the deployment record. A NULL status in the database
/// (or the absence of a record) is projected as `setup_pending` on the read
/// side; it is never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Deploying,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deploying" => Some(DeploymentStatus::Deploying),
            "success" => Some(DeploymentStatus::Success),
            "failed" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }
}

/// Client-facing status labels served by the projection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    SetupPending,
    InProgress,
    Failed,
    Success,
}

/// Which cloud account a provisioning request runs under. "og" is the legacy
/// wire name for the platform-managed account and is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[serde(alias = "og")]
    Managed,
    Customer,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Managed => "managed",
            AccountType::Customer => "customer",
        }
    }
}

/// Snapshot of the most recently executed remote command. Overwritten on
/// every run; this is deliberately not a history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastLogs {
    pub command: String,
    pub output: String,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    pub account_type: AccountType,
    pub bundle_id: String,
    pub blueprint_id: String,
    pub dns_zone_id: String,
    pub dns_api_token: String,

    pub aws_access_key: Option<String>,
    pub aws_secret_key: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
    pub ssh_private_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DeploymentStatus::Deploying,
            DeploymentStatus::Success,
            DeploymentStatus::Failed,
        ] {
            assert_eq!(DeploymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(DeploymentStatus::from_str("setup_pending"), None);
    }

    #[test]
    fn test_account_type_accepts_legacy_alias() {
        let managed: AccountType = serde_json::from_str("\"managed\"").unwrap();
        assert_eq!(managed, AccountType::Managed);

        let legacy: AccountType = serde_json::from_str("\"og\"").unwrap();
        assert_eq!(legacy, AccountType::Managed);

        let customer: AccountType = serde_json::from_str("\"customer\"").unwrap();
        assert_eq!(customer, AccountType::Customer);
    }
}
