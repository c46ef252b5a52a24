// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::DeployError;

const DNS_TTL_SECS: u32 = 300;
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com";

/// Creates the A record for a freshly provisioned instance and returns the
/// fully-qualified name the provider assigned. The provider's returned name
/// is stored verbatim; it is the source of truth for the final FQDN.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn create_a_record(
        &self,
        label: &str,
        ip: &str,
        zone_id: &str,
        api_token: &str,
    ) -> Result<String, DeployError>;
}

pub struct CloudflareDns {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CfResponse {
    success: bool,
    #[serde(default)]
    result: Option<CfRecord>,
    #[serde(default)]
    errors: Vec<CfError>,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CfError {
    code: i64,
    message: String,
}

impl CloudflareDns {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: CLOUDFLARE_API_BASE.to_string(),
        }
    }
}

impl Default for CloudflareDns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn create_a_record(
        &self,
        label: &str,
        ip: &str,
        zone_id: &str,
        api_token: &str,
    ) -> Result<String, DeployError> {
        let url = format!("{}/client/v4/zones/{}/dns_records", self.base_url, zone_id);

        tracing::info!("Creating A record {} -> {}", label, ip);

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_token)
            .json(&serde_json::json!({
                "type": "A",
                "name": label,
                "content": ip,
                "ttl": DNS_TTL_SECS,
                "proxied": false,
            }))
            .send()
            .await
            .map_err(|e| DeployError::Dns(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: CfResponse = response
            .json()
            .await
            .map_err(|e| DeployError::Dns(format!("invalid response ({}): {}", status, e)))?;

        if !body.success {
            let detail = body
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DeployError::Dns(format!(
                "record creation rejected ({}): {}",
                status, detail
            )));
        }

        let record = body
            .result
            .ok_or_else(|| DeployError::Dns("response missing record".to_string()))?;

        tracing::info!("A record created: {}", record.name);

        Ok(record.name)
    }
}
