//! End-to-end stack orchestration.
//!
//! Ties the security group manager, the database provisioner, the
//! deployment publisher and the decommissioner into the two operations
//! the binary exposes: setup and teardown. Steps run strictly in
//! sequence; each depends on the output of the previous one.

use std::sync::Arc;

use tracing::info;

use crate::config::StackConfig;
use crate::error::ProvisionResult;
use crate::provision::{DatabaseDecommissioner, DatabaseProvisioner};
use crate::publish::DeploymentPublisher;
use crate::security_group::SecurityGroupManager;
use crate::types::{DeployTarget, DeploymentManifest, Endpoints};

/// Result of a completed setup run.
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    /// Endpoint host of the provisioned database instance.
    pub database_host: String,
    /// Endpoints of the deployed application.
    pub endpoints: Endpoints,
}

/// Runs setup and teardown over the full stack.
pub struct StackOrchestrator {
    security_groups: SecurityGroupManager,
    provisioner: DatabaseProvisioner,
    publisher: DeploymentPublisher,
    decommissioner: Arc<DatabaseDecommissioner>,
    config: StackConfig,
}

impl StackOrchestrator {
    /// Assemble an orchestrator from its components.
    pub fn new(
        security_groups: SecurityGroupManager,
        provisioner: DatabaseProvisioner,
        publisher: DeploymentPublisher,
        decommissioner: Arc<DatabaseDecommissioner>,
        config: StackConfig,
    ) -> Self {
        Self {
            security_groups,
            provisioner,
            publisher,
            decommissioner,
            config,
        }
    }

    /// Bring the stack up: network perimeter, database, deployment.
    pub async fn setup(
        &self,
        target: &DeployTarget,
        manifest: &DeploymentManifest,
        clean_up: bool,
    ) -> ProvisionResult<SetupOutcome> {
        info!(namespace = %self.config.namespace, "starting stack setup");

        let group_id = self.security_groups.ensure().await?;
        let database_host = self.provisioner.ensure_available(&group_id).await?;

        let location = self.config.database_location(&database_host);
        let endpoints = self
            .publisher
            .publish(target, manifest, &location, clean_up)
            .await?;

        info!(
            namespace = %self.config.namespace,
            database_host = %database_host,
            html_url = %endpoints.html_url,
            "stack setup complete"
        );
        Ok(SetupOutcome {
            database_host,
            endpoints,
        })
    }

    /// Tear the stack down: database, network perimeter, provisioning role.
    pub async fn teardown(&self) -> ProvisionResult<()> {
        info!(namespace = %self.config.namespace, "starting stack teardown");

        self.decommissioner
            .decommission(&self.config.instance_identifier())
            .await?;
        self.security_groups.remove().await?;
        self.decommissioner
            .remove_role(
                &self.config.teardown.role_name,
                &self.config.teardown.policy_arns,
            )
            .await?;

        info!(namespace = %self.config.namespace, "stack teardown complete");
        Ok(())
    }
}
