// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use crate::errors::DeployError;
use crate::types::{AccountType, ProvisionRequest};

/// Platform-owned cloud account used for `managed` provisioning requests.
/// Loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct PlatformAccount {
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub region: String,
    pub availability_zone: String,
    pub ssh_private_key: String,
}

impl PlatformAccount {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            aws_access_key: std::env::var("SLIPWAY_AWS_ACCESS_KEY").ok()?,
            aws_secret_key: std::env::var("SLIPWAY_AWS_SECRET_KEY").ok()?,
            region: std::env::var("SLIPWAY_AWS_REGION").ok()?,
            availability_zone: std::env::var("SLIPWAY_AWS_AZ").ok()?,
            ssh_private_key: std::env::var("SLIPWAY_SSH_KEY").ok()?,
        })
    }
}

/// Fully-resolved secret bundle for one provisioning run. Lives only in local
/// variables for the duration of the workflow; never persisted in plaintext
/// and never logged.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub region: String,
    pub availability_zone: String,
    pub ssh_private_key: String,
    pub dns_zone_id: String,
    pub dns_api_token: String,
}

// Deliberately no Debug derive: a {:?} of the workflow state must not be able
// to spill key material into a log line.
impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("region", &self.region)
            .field("availability_zone", &self.availability_zone)
            .finish_non_exhaustive()
    }
}

/// Resolves the account selector plus request payload into a complete
/// credential bundle. Managed requests take every cloud value from the
/// platform account; customer requests must carry every field themselves.
/// The DNS zone and token always come from the request.
pub fn resolve(
    req: &ProvisionRequest,
    platform: Option<&PlatformAccount>,
) -> Result<ResolvedCredentials, DeployError> {
    let dns_zone_id = require_present(&req.dns_zone_id, "dns_zone_id")?;
    let dns_api_token = require_present(&req.dns_api_token, "dns_api_token")?;

    match req.account_type {
        AccountType::Managed => {
            let platform = platform.ok_or_else(|| {
                DeployError::Credential("managed platform account is not configured".to_string())
            })?;
            Ok(ResolvedCredentials {
                aws_access_key: platform.aws_access_key.clone(),
                aws_secret_key: platform.aws_secret_key.clone(),
                region: platform.region.clone(),
                availability_zone: platform.availability_zone.clone(),
                ssh_private_key: platform.ssh_private_key.clone(),
                dns_zone_id,
                dns_api_token,
            })
        }
        AccountType::Customer => Ok(ResolvedCredentials {
            aws_access_key: require(&req.aws_access_key, "aws_access_key")?,
            aws_secret_key: require(&req.aws_secret_key, "aws_secret_key")?,
            region: require(&req.region, "region")?,
            availability_zone: require(&req.availability_zone, "availability_zone")?,
            ssh_private_key: require(&req.ssh_private_key, "ssh_private_key")?,
            dns_zone_id,
            dns_api_token,
        }),
    }
}

fn require(value: &Option<String>, field: &str) -> Result<String, DeployError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(DeployError::Credential(format!("missing required field: {}", field))),
    }
}

fn require_present(value: &str, field: &str) -> Result<String, DeployError> {
    if value.is_empty() {
        return Err(DeployError::Credential(format!("missing required field: {}", field)));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountType;

    fn request(account_type: AccountType) -> ProvisionRequest {
        ProvisionRequest {
            account_type,
            bundle_id: "nano_2_0".to_string(),
            blueprint_id: "ubuntu_22_04".to_string(),
            dns_zone_id: "zone-1".to_string(),
            dns_api_token: "cf-token".to_string(),
            aws_access_key: Some("AKIA123".to_string()),
            aws_secret_key: Some("secret".to_string()),
            region: Some("us-east-1".to_string()),
            availability_zone: Some("us-east-1a".to_string()),
            ssh_private_key: Some("PRIVATE KEY".to_string()),
        }
    }

    fn platform() -> PlatformAccount {
        PlatformAccount {
            aws_access_key: "PLATFORM_KEY".to_string(),
            aws_secret_key: "PLATFORM_SECRET".to_string(),
            region: "eu-west-1".to_string(),
            availability_zone: "eu-west-1b".to_string(),
            ssh_private_key: "PLATFORM SSH KEY".to_string(),
        }
    }

    #[test]
    fn test_managed_uses_platform_account() {
        let creds = resolve(&request(AccountType::Managed), Some(&platform())).unwrap();
        assert_eq!(creds.aws_access_key, "PLATFORM_KEY");
        assert_eq!(creds.region, "eu-west-1");
        // zone and token still come from the request
        assert_eq!(creds.dns_zone_id, "zone-1");
        assert_eq!(creds.dns_api_token, "cf-token");
    }

    #[test]
    fn test_managed_without_platform_account_fails() {
        let err = resolve(&request(AccountType::Managed), None).unwrap_err();
        assert_eq!(err.code(), "credential_invalid");
    }

    #[test]
    fn test_customer_uses_request_fields() {
        let creds = resolve(&request(AccountType::Customer), Some(&platform())).unwrap();
        assert_eq!(creds.aws_access_key, "AKIA123");
        assert_eq!(creds.availability_zone, "us-east-1a");
    }

    #[test]
    fn test_customer_missing_field_fails() {
        let mut req = request(AccountType::Customer);
        req.ssh_private_key = None;
        let err = resolve(&req, None).unwrap_err();
        assert!(err.to_string().contains("ssh_private_key"));

        let mut req = request(AccountType::Customer);
        req.region = Some(String::new());
        assert!(resolve(&req, None).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let creds = resolve(&request(AccountType::Customer), None).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("AKIA123"));
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("cf-token"));
    }
}
