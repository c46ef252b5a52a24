// SPDX-FileCopyrightText: 2025 Caution SEZC
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Commercial

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::compute::{ComputeFactory, ComputeProvider};
use crate::credentials::{self, PlatformAccount, ResolvedCredentials};
use crate::encryption::Encryptor;
use crate::errors::DeployError;
use crate::remote::{CommandLog, CommandRunner, SshTarget};
use crate::store::{DeploymentStore, NewDeployment, ProjectContext};
use crate::types::{DeploymentStatus, LastLogs, ProvisionRequest};
use crate::dns::DnsProvider;

const RUNNING_STATE: &str = "running";
const WORKLOAD_PORT: u16 = 3000;

/// Poll/wait knobs. Production uses the defaults; tests shrink the sleeps.
#[derive(Debug, Clone)]
pub struct Timing {
    pub ready_poll_attempts: u32,
    pub ready_poll_interval: Duration,
    pub port_warmup: Duration,
    pub boot_warmup: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ready_poll_attempts: 24,
            ready_poll_interval: Duration::from_secs(5),
            // Two fixed back-to-back delays to let the guest OS finish
            // booting before SSH is attempted. Not adaptive.
            port_warmup: Duration::from_secs(5),
            boot_warmup: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Apex domain under which instance subdomains are registered.
    pub platform_domain: String,
    /// Admin user baked into the OS image.
    pub ssh_user: String,
    pub platform_account: Option<PlatformAccount>,
}

/// In-process single-flight guard keyed by project. The state machine assumes
/// at most one in-flight run per project; this enforces it instead of hoping.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

pub struct ProjectLockGuard {
    project_id: Uuid,
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl ProjectLocks {
    pub fn try_acquire(&self, project_id: Uuid) -> Result<ProjectLockGuard, DeployError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(project_id) {
            return Err(DeployError::AlreadyRunning { project_id });
        }
        Ok(ProjectLockGuard {
            project_id,
            held: self.held.clone(),
        })
    }
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.project_id);
    }
}

/// Drives the end-to-end deployment workflows. Sole writer of the deployment
/// record's status and runtime fields.
pub struct Orchestrator {
    store: Arc<dyn DeploymentStore>,
    compute: Arc<dyn ComputeFactory>,
    runner: Arc<dyn CommandRunner>,
    dns: Arc<dyn DnsProvider>,
    encryptor: Arc<Encryptor>,
    config: OrchestratorConfig,
    timing: Timing,
    locks: ProjectLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        compute: Arc<dyn ComputeFactory>,
        runner: Arc<dyn CommandRunner>,
        dns: Arc<dyn DnsProvider>,
        encryptor: Arc<Encryptor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            compute,
            runner,
            dns,
            encryptor,
            config,
            timing: Timing::default(),
            locks: ProjectLocks::default(),
        }
    }

    #[cfg(test)]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Accepts a provisioning request and runs the workflow in a spawned
    /// task. Only the single-flight check is reported synchronously; the
    /// workflow itself is fire-and-forget and observable via the status
    /// projection.
    pub fn begin_provision(
        self: Arc<Self>,
        project_id: Uuid,
        req: ProvisionRequest,
    ) -> Result<(), DeployError> {
        let guard = self.locks.try_acquire(project_id)?;
        let this = self;

        tokio::spawn(async move {
            let _guard = guard;
            this.provision(project_id, req).await;
        });

        Ok(())
    }

    /// Initial provisioning. Failures are logged and resolved by deleting the
    /// record this run created; the attempt looks like it never happened. A
    /// pre-existing record is never touched. Errors are not re-raised (the
    /// trigger already returned "accepted").
    pub async fn provision(&self, project_id: Uuid, req: ProvisionRequest) {
        tracing::info!("Starting provisioning for project {}", project_id);

        match self.run_provision(project_id, &req).await {
            Ok(()) => {
                tracing::info!("Provisioning succeeded for project {}", project_id);
            }
            Err(err) => {
                tracing::error!("Provisioning failed for project {}: {}", project_id, err);
            }
        }
    }

    async fn run_provision(&self, project_id: Uuid, req: &ProvisionRequest) -> Result<(), DeployError> {
        let ctx = self
            .store
            .project_context(project_id)
            .await?
            .ok_or(DeployError::NotFound { what: "project" })?;

        // An already-provisioned project keeps its record, IP, DNS name and
        // stored secrets; provisioning it again is an error, not a retry.
        if self.store.get(project_id).await?.is_some() {
            return Err(DeployError::AlreadyProvisioned { project_id });
        }

        let creds = credentials::resolve(req, self.config.platform_account.as_ref())?;

        // Fail closed: a stored token that cannot be decrypted aborts the
        // whole workflow rather than cloning with a blank secret.
        let repo_token = match &ctx.repo_token_enc {
            Some(enc) => Some(self.encryptor.decrypt_str(enc).map_err(|e| {
                DeployError::Credential(format!("failed to decrypt repository token: {}", e))
            })?),
            None => None,
        };

        self.store.create(self.encrypt_record(project_id, req, &creds)?).await?;

        let instance_name = instance_name_from_repo(&ctx.repo_url);

        if let Err(err) = self
            .machine_setup(&ctx, req, &creds, repo_token.as_deref(), &instance_name, project_id)
            .await
        {
            tracing::error!(
                "Machine setup failed for project {} (instance {}): {}",
                project_id,
                instance_name,
                err
            );

            // Roll back the record this run created. The instance itself, if
            // one was created, is NOT torn down and must be reaped manually.
            match self.store.delete(project_id).await {
                Ok(()) => tracing::error!(
                    "Rolled back deployment record for project {}; check the provider console for an orphaned instance",
                    project_id
                ),
                Err(e) => tracing::error!(
                    "Failed to roll back deployment record for project {}: {}",
                    project_id,
                    e
                ),
            }

            return Err(err);
        }

        Ok(())
    }

    fn encrypt_record(
        &self,
        project_id: Uuid,
        req: &ProvisionRequest,
        creds: &ResolvedCredentials,
    ) -> Result<NewDeployment, DeployError> {
        let enc = |plaintext: &str| {
            self.encryptor
                .encrypt_str(plaintext)
                .map_err(DeployError::Internal)
        };

        Ok(NewDeployment {
            project_id,
            account_type: req.account_type.as_str().to_string(),
            region: creds.region.clone(),
            availability_zone: creds.availability_zone.clone(),
            bundle_id: req.bundle_id.clone(),
            blueprint_id: req.blueprint_id.clone(),
            aws_access_key_enc: enc(&creds.aws_access_key)?,
            aws_secret_key_enc: enc(&creds.aws_secret_key)?,
            ssh_key_enc: enc(&creds.ssh_private_key)?,
            dns_zone_id_enc: enc(&creds.dns_zone_id)?,
            dns_token_enc: enc(&creds.dns_api_token)?,
        })
    }

    async fn machine_setup(
        &self,
        ctx: &ProjectContext,
        req: &ProvisionRequest,
        creds: &ResolvedCredentials,
        repo_token: Option<&str>,
        instance_name: &str,
        project_id: Uuid,
    ) -> Result<(), DeployError> {
        let compute = self.compute.for_credentials(creds);

        compute
            .create_instance(instance_name, &creds.availability_zone, &req.blueprint_id, &req.bundle_id)
            .await?;

        let public_ip = self.wait_until_running(compute.as_ref(), instance_name).await?;

        compute.open_all_ports(instance_name).await?;

        tokio::time::sleep(self.timing.port_warmup).await;
        tokio::time::sleep(self.timing.boot_warmup).await;

        let commands = bootstrap_commands(
            &ctx.repo_url,
            repo_token,
            instance_name,
            &self.config.platform_domain,
        );

        let target = SshTarget {
            host: public_ip.clone(),
            username: self.config.ssh_user.clone(),
            private_key: creds.ssh_private_key.clone(),
        };

        let logs = self.runner.run(&target, &commands).await.map_err(|e| e.error)?;

        let dns_name = self
            .dns
            .create_a_record(instance_name, &public_ip, &creds.dns_zone_id, &creds.dns_api_token)
            .await?;

        let last = last_snapshot(&logs);
        self.store
            .mark_succeeded(project_id, instance_name, &public_ip, &dns_name, &last)
            .await?;

        tracing::info!(
            "Project {} provisioned: instance={} ip={} dns={}",
            project_id,
            instance_name,
            public_ip,
            dns_name
        );

        Ok(())
    }

    async fn wait_until_running(
        &self,
        compute: &dyn ComputeProvider,
        name: &str,
    ) -> Result<String, DeployError> {
        for attempt in 1..=self.timing.ready_poll_attempts {
            let view = compute.describe_instance(name).await?;

            if view.state == RUNNING_STATE {
                return view.public_ip.ok_or_else(|| {
                    DeployError::Provider(format!("instance {} is running but has no public IP", name))
                });
            }

            tracing::debug!(
                "Instance {} not ready (state={}, attempt {}/{})",
                name,
                view.state,
                attempt,
                self.timing.ready_poll_attempts
            );

            tokio::time::sleep(self.timing.ready_poll_interval).await;
        }

        Err(DeployError::Timeout {
            attempts: self.timing.ready_poll_attempts,
        })
    }

    /// Redeploys against the already-provisioned host: pull and rebuild, no
    /// re-provisioning. Unlike initial provisioning, a failure is persisted
    /// as `failed` and re-raised to the caller.
    pub async fn redeploy(&self, project_id: Uuid) -> Result<(), DeployError> {
        let _guard = self.locks.try_acquire(project_id)?;

        let record = self
            .store
            .get(project_id)
            .await?
            .ok_or(DeployError::NotFound { what: "deployment" })?;

        tracing::info!(
            "Starting redeploy for project {} (instance {})",
            project_id,
            record.instance_name
        );

        // Visible to concurrent status readers before any network call.
        self.store.set_status(project_id, DeploymentStatus::Deploying).await?;

        let commands = redeploy_commands(&record.instance_name);

        let ssh_key = match self.encryptor.decrypt_str(&record.ssh_key_enc) {
            Ok(key) => key,
            Err(e) => {
                let err = DeployError::Credential(format!("failed to decrypt SSH key: {}", e));
                let last = self.failure_snapshot(&record.public_ip, &err);
                return self.fail_redeploy(project_id, err, last).await;
            }
        };

        let target = SshTarget {
            host: record.public_ip.clone(),
            username: self.config.ssh_user.clone(),
            private_key: ssh_key,
        };

        match self.runner.run(&target, &commands).await {
            Ok(logs) => {
                let last = last_snapshot(&logs);
                self.store.mark_redeployed(project_id, &last).await?;
                tracing::info!("Redeploy succeeded for project {}", project_id);
                Ok(())
            }
            Err(seq) => {
                // Persist what actually ran before the transport died; the
                // synthetic connect line is only for failures with no logs.
                let last = if seq.completed.is_empty() {
                    self.failure_snapshot(&record.public_ip, &seq.error)
                } else {
                    let mut last = last_snapshot(&seq.completed);
                    if last.output.is_empty() {
                        last.output = seq.error.to_string();
                    }
                    last
                };
                self.fail_redeploy(project_id, seq.error, last).await
            }
        }
    }

    fn failure_snapshot(&self, host: &str, err: &DeployError) -> LastLogs {
        LastLogs {
            command: format!("ssh {}@{}", self.config.ssh_user, host),
            output: err.to_string(),
            logged_at: Utc::now(),
        }
    }

    async fn fail_redeploy(
        &self,
        project_id: Uuid,
        err: DeployError,
        last: LastLogs,
    ) -> Result<(), DeployError> {
        tracing::error!("Redeploy failed for project {}: {}", project_id, err);

        if let Err(e) = self.store.mark_failed(project_id, &last).await {
            tracing::error!("Failed to persist failed status for project {}: {}", project_id, e);
        }

        Err(err)
    }
}

/// Instance names derive from the repository basename, `.git` stripped.
pub fn instance_name_from_repo(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.trim_end_matches(".git").to_string()
}

fn authenticated_clone_url(url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => match url.strip_prefix("https://") {
            Some(rest) => format!("https://x-access-token:{}@{}", token, rest),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// The fixed bootstrap sequence: container runtime + reverse proxy install,
/// token-authenticated clone, proxy config for the instance subdomain, then
/// bring the workload up.
fn bootstrap_commands(
    repo_url: &str,
    repo_token: Option<&str>,
    instance_name: &str,
    platform_domain: &str,
) -> Vec<String> {
    let site = format!("{}.{}", instance_name, platform_domain);
    let caddyfile = format!("{} {{\n    reverse_proxy localhost:{}\n}}", site, WORKLOAD_PORT);

    vec![
        "sudo apt-get update -y && sudo apt-get install -y docker.io docker-compose-v2 caddy"
            .to_string(),
        format!(
            "git clone {} {}",
            authenticated_clone_url(repo_url, repo_token),
            instance_name
        ),
        format!(
            "printf '%s\\n' '{}' | sudo tee /etc/caddy/Caddyfile >/dev/null && sudo systemctl reload caddy",
            caddyfile
        ),
        format!("cd {} && sudo docker compose up -d --build", instance_name),
    ]
}

fn redeploy_commands(instance_name: &str) -> Vec<String> {
    vec![
        format!("cd {} && git pull", instance_name),
        format!("cd {} && sudo docker compose down", instance_name),
        format!("cd {} && sudo docker compose up -d --build", instance_name),
    ]
}

fn last_snapshot(logs: &[CommandLog]) -> LastLogs {
    match logs.last() {
        Some(log) => {
            let output = if log.stderr.is_empty() {
                log.stdout.clone()
            } else {
                format!("{}{}", log.stdout, log.stderr)
            };
            LastLogs {
                command: log.command.clone(),
                output,
                logged_at: log.timestamp,
            }
        }
        None => LastLogs {
            command: String::new(),
            output: String::new(),
            logged_at: Utc::now(),
        },
    }
}
