// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::DeployError;
use crate::types::{DeploymentStatus, LastLogs};

/// One deployment row, as persisted. Secret columns hold ciphertext only;
/// nothing here is safe to return to a browser without going through the
/// status projection first.
#[derive(Debug, Clone, FromRow)]
pub struct DeploymentRecord {
    pub id: Uuid,
    pub project_id: Uuid,

    pub account_type: String,
    pub region: String,
    pub availability_zone: String,
    pub bundle_id: String,
    pub blueprint_id: String,

    pub aws_access_key_enc: Vec<u8>,
    pub aws_secret_key_enc: Vec<u8>,
    pub ssh_key_enc: Vec<u8>,
    pub dns_zone_id_enc: Vec<u8>,
    pub dns_token_enc: Vec<u8>,

    pub instance_name: String,
    pub public_ip: String,
    pub dns_name: String,

    pub status: Option<String>,

    pub last_command: Option<String>,
    pub last_output: Option<String>,
    pub last_logged_at: Option<DateTime<Utc>>,
    pub last_deployed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn last_logs(&self) -> Option<LastLogs> {
        match (&self.last_command, &self.last_output, self.last_logged_at) {
            (Some(command), Some(output), Some(logged_at)) => Some(LastLogs {
                command: command.clone(),
                output: output.clone(),
                logged_at,
            }),
            _ => None,
        }
    }
}

/// Project and linked repository, resolved together. The lookup joins the
/// owning user so a project with a dangling owner reads as missing. The
/// orchestrator reads these; it never writes them.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project_id: Uuid,
    pub repo_url: String,
    pub repo_token_enc: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: Uuid,
    pub account_type: String,
    pub region: String,
    pub availability_zone: String,
    pub bundle_id: String,
    pub blueprint_id: String,
    pub aws_access_key_enc: Vec<u8>,
    pub aws_secret_key_enc: Vec<u8>,
    pub ssh_key_enc: Vec<u8>,
    pub dns_zone_id_enc: Vec<u8>,
    pub dns_token_enc: Vec<u8>,
}

/// Persistence seam for the orchestrator and the status projection. The
/// orchestrator is the sole writer of `status` and the runtime fields.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn project_context(&self, project_id: Uuid) -> Result<Option<ProjectContext>, DeployError>;

    async fn create(&self, new: NewDeployment) -> Result<DeploymentRecord, DeployError>;

    async fn get(&self, project_id: Uuid) -> Result<Option<DeploymentRecord>, DeployError>;

    async fn set_status(&self, project_id: Uuid, status: DeploymentStatus) -> Result<(), DeployError>;

    async fn mark_succeeded(
        &self,
        project_id: Uuid,
        instance_name: &str,
        public_ip: &str,
        dns_name: &str,
        logs: &LastLogs,
    ) -> Result<(), DeployError>;

    async fn mark_redeployed(&self, project_id: Uuid, logs: &LastLogs) -> Result<(), DeployError>;

    async fn mark_failed(&self, project_id: Uuid, logs: &LastLogs) -> Result<(), DeployError>;

    async fn delete(&self, project_id: Uuid) -> Result<(), DeployError>;
}

const RECORD_COLUMNS: &str = "id, project_id, account_type, region, availability_zone, \
     bundle_id, blueprint_id, aws_access_key_enc, aws_secret_key_enc, ssh_key_enc, \
     dns_zone_id_enc, dns_token_enc, instance_name, public_ip, dns_name, status, \
     last_command, last_output, last_logged_at, last_deployed_at, created_at, updated_at";

pub struct PgDeploymentStore {
    pool: PgPool,
}

impl PgDeploymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentStore for PgDeploymentStore {
    async fn project_context(&self, project_id: Uuid) -> Result<Option<ProjectContext>, DeployError> {
        let row: Option<(Uuid, String, Option<Vec<u8>>)> = sqlx::query_as(
            "SELECT p.id, r.url, r.access_token_enc
             FROM projects p
             JOIN users u ON u.id = p.owner_id
             JOIN repositories r ON r.project_id = p.id
             WHERE p.id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, url, token)| ProjectContext {
            project_id: id,
            repo_url: url,
            repo_token_enc: token,
        }))
    }

    async fn create(&self, new: NewDeployment) -> Result<DeploymentRecord, DeployError> {
        let record = sqlx::query_as::<_, DeploymentRecord>(&format!(
            "INSERT INTO deployments
             (project_id, account_type, region, availability_zone, bundle_id, blueprint_id,
              aws_access_key_enc, aws_secret_key_enc, ssh_key_enc, dns_zone_id_enc, dns_token_enc,
              status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(new.project_id)
        .bind(&new.account_type)
        .bind(&new.region)
        .bind(&new.availability_zone)
        .bind(&new.bundle_id)
        .bind(&new.blueprint_id)
        .bind(&new.aws_access_key_enc)
        .bind(&new.aws_secret_key_enc)
        .bind(&new.ssh_key_enc)
        .bind(&new.dns_zone_id_enc)
        .bind(&new.dns_token_enc)
        .bind(DeploymentStatus::Deploying.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(&self, project_id: Uuid) -> Result<Option<DeploymentRecord>, DeployError> {
        let record = sqlx::query_as::<_, DeploymentRecord>(&format!(
            "SELECT {} FROM deployments WHERE project_id = $1",
            RECORD_COLUMNS
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn set_status(&self, project_id: Uuid, status: DeploymentStatus) -> Result<(), DeployError> {
        sqlx::query("UPDATE deployments SET status = $1, updated_at = NOW() WHERE project_id = $2")
            .bind(status.as_str())
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_succeeded(
        &self,
        project_id: Uuid,
        instance_name: &str,
        public_ip: &str,
        dns_name: &str,
        logs: &LastLogs,
    ) -> Result<(), DeployError> {
        sqlx::query(
            "UPDATE deployments
             SET status = $1, instance_name = $2, public_ip = $3, dns_name = $4,
                 last_command = $5, last_output = $6, last_logged_at = $7, updated_at = NOW()
             WHERE project_id = $8",
        )
        .bind(DeploymentStatus::Success.as_str())
        .bind(instance_name)
        .bind(public_ip)
        .bind(dns_name)
        .bind(&logs.command)
        .bind(&logs.output)
        .bind(logs.logged_at)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_redeployed(&self, project_id: Uuid, logs: &LastLogs) -> Result<(), DeployError> {
        sqlx::query(
            "UPDATE deployments
             SET status = $1, last_command = $2, last_output = $3, last_logged_at = $4,
                 last_deployed_at = NOW(), updated_at = NOW()
             WHERE project_id = $5",
        )
        .bind(DeploymentStatus::Success.as_str())
        .bind(&logs.command)
        .bind(&logs.output)
        .bind(logs.logged_at)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, project_id: Uuid, logs: &LastLogs) -> Result<(), DeployError> {
        sqlx::query(
            "UPDATE deployments
             SET status = $1, last_command = $2, last_output = $3, last_logged_at = $4,
                 updated_at = NOW()
             WHERE project_id = $5",
        )
        .bind(DeploymentStatus::Failed.as_str())
        .bind(&logs.command)
        .bind(&logs.output)
        .bind(logs.logged_at)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, project_id: Uuid) -> Result<(), DeployError> {
        sqlx::query("DELETE FROM deployments WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
