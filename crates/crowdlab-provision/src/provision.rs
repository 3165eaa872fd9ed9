//! Database instance lifecycle: the provisioning reconciliation loop and
//! the decommissioner.
//!
//! The provisioner drives the instance from any observed state to
//! "available with a healthy schema". Recovery is destructive by policy:
//! a class mismatch or an unrecoverable schema forces deletion and
//! recreation rather than in-place repair. The loop is re-entrant; running
//! it against an already-provisioned stack converges without erroring.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StackConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{DatabaseProvider, InstanceSpec, RoleDeletion, RoleProvider};
use crate::schema::{DatabaseLocation, SchemaInspector};
use crate::types::InstanceStatus;

/// Outcome of one pass through the reconciliation loop.
enum Attempt {
    /// The instance is available with an acceptable schema.
    Ready(String),
    /// The instance must be deleted before trying again.
    Recreate(&'static str),
    /// Try again from the top without deleting anything.
    Restart(&'static str),
}

/// Drives the database instance to the available state.
pub struct DatabaseProvisioner {
    database: Arc<dyn DatabaseProvider>,
    inspector: Arc<dyn SchemaInspector>,
    decommissioner: Arc<DatabaseDecommissioner>,
    config: StackConfig,
    cancel: CancellationToken,
}

impl DatabaseProvisioner {
    /// Create a new provisioner.
    pub fn new(
        database: Arc<dyn DatabaseProvider>,
        inspector: Arc<dyn SchemaInspector>,
        decommissioner: Arc<DatabaseDecommissioner>,
        config: StackConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            database,
            inspector,
            decommissioner,
            config,
            cancel,
        }
    }

    fn instance_spec(&self, security_group_id: &str) -> InstanceSpec {
        InstanceSpec {
            identifier: self.config.instance_identifier(),
            instance_class: self.config.database.instance_class.clone(),
            database_name: self.config.database_name(),
            credentials: self.config.database.credentials.clone(),
            allocated_storage_gb: self.config.database.allocated_storage_gb,
            security_group_id: security_group_id.to_owned(),
        }
    }

    /// Bring the instance to the available state and return its endpoint
    /// host.
    ///
    /// Reconciles until the instance is available with an acceptable
    /// schema, recreating it when recovery policy demands. Bounded by the
    /// configured deadline and by the cancellation token, both checked
    /// between iterations and on every poll tick.
    pub async fn ensure_available(&self, security_group_id: &str) -> ProvisionResult<String> {
        let spec = self.instance_spec(security_group_id);
        let started = Instant::now();

        info!(
            identifier = %spec.identifier,
            class = %spec.instance_class,
            "ensuring database instance is available"
        );

        loop {
            self.checkpoint(&spec.identifier, started)?;

            match self.attempt(&spec, started).await? {
                Attempt::Ready(host) => {
                    info!(identifier = %spec.identifier, host = %host, "database instance ready");
                    return Ok(host);
                }
                Attempt::Recreate(reason) => {
                    // Deliberate data loss: the instance cannot be fixed in place.
                    warn!(
                        identifier = %spec.identifier,
                        reason,
                        "recreating database instance; existing data will be lost"
                    );
                    self.decommissioner.decommission(&spec.identifier).await?;
                }
                Attempt::Restart(reason) => {
                    debug!(identifier = %spec.identifier, reason, "restarting reconciliation");
                }
            }
        }
    }

    async fn attempt(&self, spec: &InstanceSpec, started: Instant) -> ProvisionResult<Attempt> {
        // An already-existing instance is not an error; reconcile it.
        self.database.create_instance(spec).await?;

        let Some(mut description) = self.database.describe_instance(&spec.identifier).await? else {
            return Ok(Attempt::Restart("instance absent after creation request"));
        };

        if description.instance_class != spec.instance_class {
            return Ok(Attempt::Recreate("instance class mismatch"));
        }

        if description.status == InstanceStatus::Deleting {
            info!(
                identifier = %spec.identifier,
                "waiting for a previous delete operation to complete"
            );
            return self.wait_out_deletion(&spec.identifier, started).await;
        }

        while description.status.is_transient() {
            debug!(
                identifier = %spec.identifier,
                status = %description.status,
                "waiting for instance to become available"
            );
            self.pause(&spec.identifier, started).await?;
            match self.database.describe_instance(&spec.identifier).await? {
                Some(current) => description = current,
                None => return Ok(Attempt::Restart("instance disappeared while waiting")),
            }
        }

        match description.status {
            InstanceStatus::Available => {
                let host = description.endpoint.ok_or_else(|| {
                    ProvisionError::provider(
                        &spec.identifier,
                        "describe_db_instances",
                        "available instance reported no endpoint",
                    )
                })?;
                self.evaluate_schema(spec, host).await
            }
            InstanceStatus::Failed => Ok(Attempt::Recreate("instance entered failed state")),
            InstanceStatus::Deleting => Ok(Attempt::Restart("instance began deleting")),
            status => Err(ProvisionError::provider(
                &spec.identifier,
                "describe_db_instances",
                format!("unexpected status after waiting: {status}"),
            )),
        }
    }

    /// Poll while a previous deletion runs its course.
    ///
    /// A provider error while polling means the instance vanished between
    /// checks; either way the loop restarts from creation.
    async fn wait_out_deletion(
        &self,
        identifier: &str,
        started: Instant,
    ) -> ProvisionResult<Attempt> {
        loop {
            self.pause(identifier, started).await?;
            match self.database.describe_instance(identifier).await {
                Ok(Some(description)) if description.status == InstanceStatus::Deleting => {}
                Ok(_) => return Ok(Attempt::Restart("previous deletion completed")),
                Err(err) => {
                    debug!(identifier = %identifier, error = %err, "status poll failed during deletion");
                    return Ok(Attempt::Restart("status poll failed during deletion"));
                }
            }
        }
    }

    async fn evaluate_schema(&self, spec: &InstanceSpec, host: String) -> ProvisionResult<Attempt> {
        let location = DatabaseLocation {
            host: host.clone(),
            port: self.config.database.port,
            database: spec.database_name.clone(),
            credentials: spec.credentials.clone(),
        };

        let health = self.inspector.check_health(&location).await;
        info!(identifier = %spec.identifier, health = %health, "database health inspected");

        if health.is_recoverable_in_place() {
            // Idempotent: initialising an already-healthy schema is a no-op.
            self.inspector.initialise(&location).await?;
            Ok(Attempt::Ready(host))
        } else {
            Ok(Attempt::Recreate("unrecoverable schema state"))
        }
    }

    fn checkpoint(&self, resource: &str, started: Instant) -> ProvisionResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        let waited = started.elapsed();
        if waited >= self.config.provisioning.max_wait() {
            return Err(ProvisionError::Timeout {
                resource: resource.to_owned(),
                waited_secs: waited.as_secs(),
            });
        }
        Ok(())
    }

    async fn pause(&self, resource: &str, started: Instant) -> ProvisionResult<()> {
        self.checkpoint(resource, started)?;
        tokio::time::sleep(self.config.provisioning.poll_interval()).await;
        Ok(())
    }
}

/// Deletes the database instance and its supporting provisioning role.
pub struct DatabaseDecommissioner {
    database: Arc<dyn DatabaseProvider>,
    roles: Arc<dyn RoleProvider>,
    config: StackConfig,
    cancel: CancellationToken,
}

impl DatabaseDecommissioner {
    /// Create a new decommissioner.
    pub fn new(
        database: Arc<dyn DatabaseProvider>,
        roles: Arc<dyn RoleProvider>,
        config: StackConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            database,
            roles,
            config,
            cancel,
        }
    }

    /// Delete the instance and wait for the deletion to complete.
    ///
    /// An instance that is already deleting is waited out; an instance
    /// that does not exist is a success no-op.
    pub async fn decommission(&self, identifier: &str) -> ProvisionResult<()> {
        let started = Instant::now();

        match self.database.describe_instance(identifier).await? {
            None => {
                info!(identifier = %identifier, "database instance already absent");
                Ok(())
            }
            Some(description) if description.status == InstanceStatus::Deleting => {
                info!(identifier = %identifier, "deletion already in progress; waiting");
                self.wait_deleted(identifier, started).await
            }
            Some(description) => {
                info!(
                    identifier = %identifier,
                    status = %description.status,
                    "deleting database instance"
                );
                self.database.delete_instance(identifier).await?;
                self.wait_deleted(identifier, started).await
            }
        }
    }

    /// Detach the listed policies and delete the provisioning role.
    ///
    /// Detach failures (policy not attached, role already gone) are
    /// tolerated; a role that does not exist is a success.
    pub async fn remove_role(&self, role_name: &str, policy_arns: &[String]) -> ProvisionResult<()> {
        for policy_arn in policy_arns {
            if let Err(err) = self.roles.detach_policy(role_name, policy_arn).await {
                debug!(role = %role_name, policy = %policy_arn, error = %err, "policy detach skipped");
            }
        }

        match self.roles.delete_role(role_name).await? {
            RoleDeletion::Deleted => info!(role = %role_name, "provisioning role removed"),
            RoleDeletion::NotFound => info!(role = %role_name, "provisioning role already absent"),
        }
        Ok(())
    }

    async fn wait_deleted(&self, identifier: &str, started: Instant) -> ProvisionResult<()> {
        let mut describe_failed = false;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            let waited = started.elapsed();
            if waited >= self.config.provisioning.max_wait() {
                return Err(ProvisionError::Timeout {
                    resource: identifier.to_owned(),
                    waited_secs: waited.as_secs(),
                });
            }

            tokio::time::sleep(self.config.provisioning.poll_interval()).await;

            match self.database.describe_instance(identifier).await {
                Ok(None) => {
                    info!(identifier = %identifier, "database instance deleted");
                    return Ok(());
                }
                Ok(Some(description)) => {
                    describe_failed = false;
                    debug!(
                        identifier = %identifier,
                        status = %description.status,
                        "waiting for deletion to complete"
                    );
                }
                // A single failure gets one retry; a repeat usually means
                // the instance record vanished mid-deletion.
                Err(err) if !describe_failed => {
                    describe_failed = true;
                    warn!(identifier = %identifier, error = %err, "describe failed during deletion; retrying");
                }
                Err(err) => {
                    warn!(identifier = %identifier, error = %err, "describe failed twice; treating instance as deleted");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfig;
    use crate::provider::{MockDatabaseProvider, MockRoleProvider, MOCK_ENDPOINT};
    use crate::schema::MockInspector;
    use crate::types::DatabaseHealth;

    fn fast_config() -> StackConfig {
        StackConfig {
            namespace: "test".to_owned(),
            provisioning: ProvisioningConfig {
                poll_interval_secs: 0,
                max_wait_secs: 10,
            },
            ..StackConfig::default()
        }
    }

    struct Harness {
        database: Arc<MockDatabaseProvider>,
        inspector: Arc<MockInspector>,
        roles: Arc<MockRoleProvider>,
        provisioner: DatabaseProvisioner,
        decommissioner: Arc<DatabaseDecommissioner>,
        cancel: CancellationToken,
    }

    fn harness_with(
        database: MockDatabaseProvider,
        inspector: MockInspector,
        config: StackConfig,
    ) -> Harness {
        let database = Arc::new(database);
        let inspector = Arc::new(inspector);
        let roles = Arc::new(MockRoleProvider::default());
        let cancel = CancellationToken::new();

        let decommissioner = Arc::new(DatabaseDecommissioner::new(
            Arc::clone(&database) as Arc<dyn DatabaseProvider>,
            Arc::clone(&roles) as Arc<dyn RoleProvider>,
            config.clone(),
            cancel.clone(),
        ));
        let provisioner = DatabaseProvisioner::new(
            Arc::clone(&database) as Arc<dyn DatabaseProvider>,
            Arc::clone(&inspector) as Arc<dyn SchemaInspector>,
            Arc::clone(&decommissioner),
            config,
            cancel.clone(),
        );

        Harness {
            database,
            inspector,
            roles,
            provisioner,
            decommissioner,
            cancel,
        }
    }

    fn harness(database: MockDatabaseProvider, inspector: MockInspector) -> Harness {
        harness_with(database, inspector, fast_config())
    }

    #[tokio::test]
    async fn fresh_instance_becomes_available() {
        let h = harness(MockDatabaseProvider::new(2, 1), MockInspector::default());

        let host = h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(host, MOCK_ENDPOINT);
        assert_eq!(h.database.create_calls(), 1);
        assert_eq!(h.database.delete_calls(), 0);
        assert_eq!(h.inspector.init_calls(), 1);
    }

    #[tokio::test]
    async fn missing_table_triggers_initialisation() {
        let h = harness(
            MockDatabaseProvider::new(0, 0),
            MockInspector::with_health(&[DatabaseHealth::MissingTable]),
        );

        let host = h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(host, MOCK_ENDPOINT);
        assert_eq!(h.inspector.init_calls(), 1);
    }

    #[tokio::test]
    async fn class_mismatch_forces_recreation() {
        let database = MockDatabaseProvider::new(0, 1)
            .with_existing("db.t2.small", InstanceStatus::Available);
        let h = harness(database, MockInspector::default());

        let host = h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(host, MOCK_ENDPOINT);
        // Full recreate, not a resize: exactly one delete then a fresh create.
        assert_eq!(h.database.delete_calls(), 1);
        assert!(h.database.create_calls() >= 2);
    }

    #[tokio::test]
    async fn inconsistent_schema_recreates_exactly_once() {
        let h = harness(
            MockDatabaseProvider::new(0, 1),
            MockInspector::with_health(&[DatabaseHealth::InconsistentSchema]),
        );

        let host = h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(host, MOCK_ENDPOINT);
        assert_eq!(h.database.delete_calls(), 1);
        assert_eq!(h.inspector.init_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_error_recreates() {
        let h = harness(
            MockDatabaseProvider::new(0, 0),
            MockInspector::with_health(&[DatabaseHealth::UnknownError]),
        );

        h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(h.database.delete_calls(), 1);
    }

    #[tokio::test]
    async fn pending_deletion_is_waited_out() {
        let database = MockDatabaseProvider::new(1, 2)
            .with_existing("db.t2.medium", InstanceStatus::Deleting);
        let h = harness(database, MockInspector::default());

        let host = h.provisioner.ensure_available("sg-1").await.unwrap();
        assert_eq!(host, MOCK_ENDPOINT);
        // The old instance was never explicitly deleted by us.
        assert_eq!(h.database.delete_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_preempts_provisioning() {
        let h = harness(MockDatabaseProvider::default(), MockInspector::default());
        h.cancel.cancel();

        let err = h.provisioner.ensure_available("sg-1").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
        assert_eq!(h.database.create_calls(), 0);
    }

    #[tokio::test]
    async fn deadline_surfaces_timeout() {
        let config = StackConfig {
            provisioning: ProvisioningConfig {
                poll_interval_secs: 0,
                max_wait_secs: 0,
            },
            ..fast_config()
        };
        let h = harness_with(MockDatabaseProvider::default(), MockInspector::default(), config);

        let err = h.provisioner.ensure_available("sg-1").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn decommission_missing_instance_is_noop() {
        let h = harness(MockDatabaseProvider::default(), MockInspector::default());

        h.decommissioner.decommission("crowdlab-db-test").await.unwrap();
        assert_eq!(h.database.delete_calls(), 0);
    }

    #[tokio::test]
    async fn decommission_deletes_and_waits() {
        let database = MockDatabaseProvider::new(0, 2)
            .with_existing("db.t2.medium", InstanceStatus::Available);
        let h = harness(database, MockInspector::default());

        h.decommissioner.decommission("crowdlab-db-test").await.unwrap();
        assert_eq!(h.database.delete_calls(), 1);
        assert!(h
            .database
            .describe_instance("crowdlab-db-test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn decommission_retries_failed_poll_before_converging() {
        let database = MockDatabaseProvider::new(0, 1)
            .with_existing("db.t2.medium", InstanceStatus::Available)
            .with_describe_errors(1);
        let h = harness(database, MockInspector::default());

        h.decommissioner.decommission("crowdlab-db-test").await.unwrap();
        assert_eq!(h.database.delete_calls(), 1);
        assert!(h
            .database
            .describe_instance("crowdlab-db-test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn decommission_concludes_after_repeated_poll_failures() {
        let database = MockDatabaseProvider::new(0, 5)
            .with_existing("db.t2.medium", InstanceStatus::Available)
            .with_describe_errors(2);
        let h = harness(database, MockInspector::default());

        h.decommissioner.decommission("crowdlab-db-test").await.unwrap();
        assert_eq!(h.database.delete_calls(), 1);
    }

    #[tokio::test]
    async fn decommission_joins_deletion_in_progress() {
        let database = MockDatabaseProvider::new(0, 1)
            .with_existing("db.t2.medium", InstanceStatus::Deleting);
        let h = harness(database, MockInspector::default());

        h.decommissioner.decommission("crowdlab-db-test").await.unwrap();
        assert_eq!(h.database.delete_calls(), 0);
    }

    #[tokio::test]
    async fn remove_role_tolerates_unattached_policies() {
        let roles = Arc::new(MockRoleProvider::with_role(
            "crowdlab-provisioning-role",
            &["arn:aws:iam::aws:policy/AmazonRDSFullAccess"],
        ));
        let decommissioner = DatabaseDecommissioner::new(
            Arc::new(MockDatabaseProvider::default()),
            Arc::clone(&roles) as Arc<dyn RoleProvider>,
            fast_config(),
            CancellationToken::new(),
        );

        let arns = vec![
            "arn:aws:iam::aws:policy/AmazonRDSFullAccess".to_owned(),
            "arn:aws:iam::aws:policy/AmazonMechanicalTurkFullAccess".to_owned(),
        ];
        decommissioner
            .remove_role("crowdlab-provisioning-role", &arns)
            .await
            .unwrap();
        assert!(!roles.role_exists());
        assert_eq!(roles.detach_attempts(), 2);

        // Removing an already-absent role is a success.
        decommissioner
            .remove_role("crowdlab-provisioning-role", &arns)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unused_roles_mock_is_quiet() {
        let h = harness(MockDatabaseProvider::default(), MockInspector::default());
        assert!(!h.roles.role_exists());
    }
}
