// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_lightsail::config::{BehaviorVersion, Region};
use aws_sdk_lightsail::error::DisplayErrorContext;
use aws_sdk_lightsail::types::{NetworkProtocol, PortInfo};

use crate::credentials::ResolvedCredentials;
use crate::errors::DeployError;

/// The subset of instance state the orchestrator cares about.
#[derive(Debug, Clone)]
pub struct InstanceView {
    pub state: String,
    pub public_ip: Option<String>,
}

/// Thin wrapper around the compute provider's create/describe/open-ports
/// calls. No retries here; retry policy belongs to the orchestrator.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn create_instance(
        &self,
        name: &str,
        zone: &str,
        blueprint_id: &str,
        bundle_id: &str,
    ) -> Result<(), DeployError>;

    async fn describe_instance(&self, name: &str) -> Result<InstanceView, DeployError>;

    async fn open_all_ports(&self, name: &str) -> Result<(), DeployError>;
}

/// Builds a provider client scoped to one run's resolved credentials.
pub trait ComputeFactory: Send + Sync {
    fn for_credentials(&self, creds: &ResolvedCredentials) -> std::sync::Arc<dyn ComputeProvider>;
}

pub struct LightsailCompute {
    client: aws_sdk_lightsail::Client,
}

impl LightsailCompute {
    pub fn new(access_key: &str, secret_key: &str, region: &str) -> Self {
        let config = aws_sdk_lightsail::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key.to_string(),
                secret_key.to_string(),
                None,
                None,
                "slipway",
            ))
            .build();

        Self {
            client: aws_sdk_lightsail::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ComputeProvider for LightsailCompute {
    async fn create_instance(
        &self,
        name: &str,
        zone: &str,
        blueprint_id: &str,
        bundle_id: &str,
    ) -> Result<(), DeployError> {
        tracing::info!("Creating instance {} in zone {}", name, zone);

        self.client
            .create_instances()
            .instance_names(name)
            .availability_zone(zone)
            .blueprint_id(blueprint_id)
            .bundle_id(bundle_id)
            .send()
            .await
            .map_err(|e| {
                DeployError::Provider(format!("create_instances failed: {}", DisplayErrorContext(&e)))
            })?;

        Ok(())
    }

    async fn describe_instance(&self, name: &str) -> Result<InstanceView, DeployError> {
        let out = self
            .client
            .get_instance()
            .instance_name(name)
            .send()
            .await
            .map_err(|e| {
                DeployError::Provider(format!("get_instance failed: {}", DisplayErrorContext(&e)))
            })?;

        let instance = out
            .instance()
            .ok_or_else(|| DeployError::Provider(format!("instance {} missing from response", name)))?;

        Ok(InstanceView {
            state: instance
                .state()
                .and_then(|s| s.name())
                .unwrap_or("unknown")
                .to_string(),
            public_ip: instance.public_ip_address().map(|s| s.to_string()),
        })
    }

    async fn open_all_ports(&self, name: &str) -> Result<(), DeployError> {
        // Full TCP/UDP range, by product decision: the workload's exposed
        // ports are not known at provisioning time. Tightening this needs
        // product sign-off.
        let all_ports = PortInfo::builder()
            .from_port(0)
            .to_port(65535)
            .protocol(NetworkProtocol::All)
            .build();

        tracing::info!("Opening all ports on instance {}", name);

        self.client
            .put_instance_public_ports()
            .instance_name(name)
            .port_infos(all_ports)
            .send()
            .await
            .map_err(|e| {
                DeployError::Provider(format!(
                    "put_instance_public_ports failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }
}

pub struct LightsailFactory;

impl ComputeFactory for LightsailFactory {
    fn for_credentials(&self, creds: &ResolvedCredentials) -> std::sync::Arc<dyn ComputeProvider> {
        std::sync::Arc::new(LightsailCompute::new(
            &creds.aws_access_key,
            &creds.aws_secret_key,
            &creds.region,
        ))
    }
}
