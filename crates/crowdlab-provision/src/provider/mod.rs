//! Cloud provider seams for the provisioning pipeline.
//!
//! Every remote API the pipeline touches sits behind a trait so the
//! reconciliation logic can be exercised against scripted in-memory
//! implementations. The production implementations live in [`aws`].

mod aws;

pub use aws::{AwsDatabaseProvider, AwsNetworkProvider, AwsRoleProvider};

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ProvisionError, ProvisionResult};
use crate::types::{DatabaseCredentials, InstanceDescription, InstanceStatus};

/// Everything needed to request creation of the database instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Unique instance identifier.
    pub identifier: String,
    /// Desired instance class.
    pub instance_class: String,
    /// Name of the database created inside the instance.
    pub database_name: String,
    /// Master credentials.
    pub credentials: DatabaseCredentials,
    /// Allocated storage in GB.
    pub allocated_storage_gb: i32,
    /// Security group guarding the instance's network perimeter.
    pub security_group_id: String,
}

/// Outcome of an instance creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new instance was requested.
    Created,
    /// An instance with this identifier already exists; not an error.
    AlreadyExists,
}

/// Outcome of an instance deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion was accepted and is in progress.
    Deleting,
    /// No instance with this identifier exists; not an error.
    NotFound,
}

/// Outcome of a security group creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCreation {
    /// A new group was created with this provider-assigned id.
    Created(String),
    /// A group with this name already exists; look it up instead.
    Duplicate,
}

/// Outcome of a role deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    /// The role was deleted.
    Deleted,
    /// No role with this name exists; not an error.
    NotFound,
}

/// A single ingress rule for the database security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    /// IP protocol.
    pub protocol: String,
    /// First port in the range.
    pub from_port: u16,
    /// Last port in the range.
    pub to_port: u16,
    /// IPv4 source range.
    pub ipv4_cidr: String,
    /// IPv6 source range.
    pub ipv6_cidr: String,
}

impl IngressRule {
    /// The database ingress rule: TCP on the given port, any source.
    #[must_use]
    pub fn database_port(port: u16) -> Self {
        Self {
            protocol: "tcp".to_owned(),
            from_port: port,
            to_port: port,
            ipv4_cidr: "0.0.0.0/0".to_owned(),
            ipv6_cidr: "::/0".to_owned(),
        }
    }
}

/// Managed relational database API.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Request creation of the instance.
    ///
    /// An already-existing instance is an idempotency collision, not an
    /// error; implementations normalise it to [`CreateOutcome::AlreadyExists`].
    async fn create_instance(&self, spec: &InstanceSpec) -> ProvisionResult<CreateOutcome>;

    /// Fetch the current description of the instance, or `None` if absent.
    async fn describe_instance(
        &self,
        identifier: &str,
    ) -> ProvisionResult<Option<InstanceDescription>>;

    /// Request deletion of the instance, skipping any final snapshot.
    async fn delete_instance(&self, identifier: &str) -> ProvisionResult<DeleteOutcome>;
}

/// Network perimeter API.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// Id of the network the database instance is placed in.
    async fn default_network_id(&self) -> ProvisionResult<String>;

    /// Attempt to create a named security group.
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        network_id: &str,
    ) -> ProvisionResult<GroupCreation>;

    /// Look up an existing security group id by name.
    async fn lookup_security_group(&self, name: &str) -> ProvisionResult<Option<String>>;

    /// Authorize one ingress rule on a group.
    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProvisionResult<()>;

    /// Delete a security group.
    ///
    /// A missing group is normalised to success.
    async fn delete_security_group(&self, name: &str, group_id: &str) -> ProvisionResult<()>;
}

/// Identity/role API used during teardown.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    /// Detach a policy from a role.
    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> ProvisionResult<()>;

    /// Delete a role.
    async fn delete_role(&self, role_name: &str) -> ProvisionResult<RoleDeletion>;
}

// =============================================================================
// Mock implementations for tests
// =============================================================================

/// Endpoint host the mock database provider reports once available.
pub const MOCK_ENDPOINT: &str = "db.mock.internal";

#[derive(Debug, Clone)]
struct MockInstance {
    instance_class: String,
    status: InstanceStatus,
    ticks_left: u32,
}

#[derive(Debug, Default)]
struct MockDatabaseState {
    instance: Option<MockInstance>,
    create_calls: usize,
    delete_calls: usize,
    describe_errors: u32,
}

/// Scripted in-memory database provider.
///
/// Creation and deletion resolve after a configurable number of describe
/// calls, which lets tests drive the reconciliation loop through its
/// transient states without sleeping.
#[derive(Debug)]
pub struct MockDatabaseProvider {
    state: Mutex<MockDatabaseState>,
    create_ticks: u32,
    delete_ticks: u32,
}

impl Default for MockDatabaseProvider {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl MockDatabaseProvider {
    /// Create a mock whose create and delete operations each take the
    /// given number of describe calls to resolve.
    #[must_use]
    pub fn new(create_ticks: u32, delete_ticks: u32) -> Self {
        Self {
            state: Mutex::new(MockDatabaseState::default()),
            create_ticks,
            delete_ticks,
        }
    }

    /// Pre-seed an existing instance in the given state.
    #[must_use]
    pub fn with_existing(self, instance_class: &str, status: InstanceStatus) -> Self {
        {
            let mut state = self.state.lock().expect("mock lock poisoned");
            state.instance = Some(MockInstance {
                instance_class: instance_class.to_owned(),
                status,
                ticks_left: match status {
                    InstanceStatus::Creating => self.create_ticks,
                    InstanceStatus::Deleting => self.delete_ticks,
                    _ => 0,
                },
            });
        }
        self
    }

    /// Fail the next `count` describe calls issued after a delete request
    /// with an unclassified error.
    #[must_use]
    pub fn with_describe_errors(self, count: u32) -> Self {
        {
            let mut state = self.state.lock().expect("mock lock poisoned");
            state.describe_errors = count;
        }
        self
    }

    fn lock(&self) -> ProvisionResult<std::sync::MutexGuard<'_, MockDatabaseState>> {
        self.state
            .lock()
            .map_err(|_| ProvisionError::provider("mock-database", "lock", "poisoned"))
    }

    /// Number of create requests issued so far.
    pub fn create_calls(&self) -> usize {
        self.state.lock().map(|s| s.create_calls).unwrap_or(0)
    }

    /// Number of delete requests issued so far.
    pub fn delete_calls(&self) -> usize {
        self.state.lock().map(|s| s.delete_calls).unwrap_or(0)
    }
}

#[async_trait]
impl DatabaseProvider for MockDatabaseProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> ProvisionResult<CreateOutcome> {
        let mut state = self.lock()?;
        state.create_calls += 1;
        if state.instance.is_some() {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.instance = Some(MockInstance {
            instance_class: spec.instance_class.clone(),
            status: InstanceStatus::Creating,
            ticks_left: self.create_ticks,
        });
        Ok(CreateOutcome::Created)
    }

    async fn describe_instance(
        &self,
        _identifier: &str,
    ) -> ProvisionResult<Option<InstanceDescription>> {
        let mut state = self.lock()?;
        if state.delete_calls > 0 && state.describe_errors > 0 {
            state.describe_errors -= 1;
            return Err(ProvisionError::provider(
                "mock-database",
                "describe",
                "injected failure",
            ));
        }
        let Some(instance) = state.instance.as_mut() else {
            return Ok(None);
        };

        match instance.status {
            InstanceStatus::Creating if instance.ticks_left > 0 => {
                instance.ticks_left -= 1;
            }
            InstanceStatus::Creating => {
                instance.status = InstanceStatus::Available;
            }
            InstanceStatus::Deleting if instance.ticks_left > 0 => {
                instance.ticks_left -= 1;
            }
            InstanceStatus::Deleting => {
                state.instance = None;
                return Ok(None);
            }
            _ => {}
        }

        let instance = state
            .instance
            .as_ref()
            .ok_or_else(|| ProvisionError::provider("mock-database", "describe", "gone"))?;
        Ok(Some(InstanceDescription {
            status: instance.status,
            instance_class: instance.instance_class.clone(),
            endpoint: (instance.status == InstanceStatus::Available)
                .then(|| MOCK_ENDPOINT.to_owned()),
        }))
    }

    async fn delete_instance(&self, _identifier: &str) -> ProvisionResult<DeleteOutcome> {
        let mut state = self.lock()?;
        state.delete_calls += 1;
        match state.instance.as_mut() {
            None => Ok(DeleteOutcome::NotFound),
            Some(instance) => {
                instance.status = InstanceStatus::Deleting;
                instance.ticks_left = self.delete_ticks;
                Ok(DeleteOutcome::Deleting)
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockNetworkState {
    group: Option<(String, String)>,
    ingress: Vec<(String, IngressRule)>,
    created: usize,
}

/// In-memory network provider tracking a single security group.
#[derive(Debug, Default)]
pub struct MockNetworkProvider {
    state: Mutex<MockNetworkState>,
}

impl MockNetworkProvider {
    fn lock(&self) -> ProvisionResult<std::sync::MutexGuard<'_, MockNetworkState>> {
        self.state
            .lock()
            .map_err(|_| ProvisionError::provider("mock-network", "lock", "poisoned"))
    }

    /// Ingress rules authorized so far, with the group they were added to.
    pub fn ingress_rules(&self) -> Vec<(String, IngressRule)> {
        self.state.lock().map(|s| s.ingress.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NetworkProvider for MockNetworkProvider {
    async fn default_network_id(&self) -> ProvisionResult<String> {
        Ok("vpc-mock".to_owned())
    }

    async fn create_security_group(
        &self,
        name: &str,
        _description: &str,
        _network_id: &str,
    ) -> ProvisionResult<GroupCreation> {
        let mut state = self.lock()?;
        if let Some((_, existing)) = &state.group {
            if existing == name {
                return Ok(GroupCreation::Duplicate);
            }
        }
        state.created += 1;
        let id = format!("sg-{:04}", state.created);
        state.group = Some((id.clone(), name.to_owned()));
        Ok(GroupCreation::Created(id))
    }

    async fn lookup_security_group(&self, name: &str) -> ProvisionResult<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .group
            .as_ref()
            .filter(|(_, n)| n == name)
            .map(|(id, _)| id.clone()))
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        state.ingress.push((group_id.to_owned(), rule.clone()));
        Ok(())
    }

    async fn delete_security_group(&self, name: &str, _group_id: &str) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        if state.group.as_ref().is_some_and(|(_, n)| n == name) {
            state.group = None;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockRoleState {
    role: Option<String>,
    attached: Vec<String>,
    detach_attempts: usize,
}

/// In-memory role provider tracking a single role.
#[derive(Debug, Default)]
pub struct MockRoleProvider {
    state: Mutex<MockRoleState>,
}

impl MockRoleProvider {
    /// Create a mock with an existing role and attached policies.
    #[must_use]
    pub fn with_role(role_name: &str, attached: &[&str]) -> Self {
        Self {
            state: Mutex::new(MockRoleState {
                role: Some(role_name.to_owned()),
                attached: attached.iter().map(|&p| p.to_owned()).collect(),
                detach_attempts: 0,
            }),
        }
    }

    fn lock(&self) -> ProvisionResult<std::sync::MutexGuard<'_, MockRoleState>> {
        self.state
            .lock()
            .map_err(|_| ProvisionError::provider("mock-role", "lock", "poisoned"))
    }

    /// Whether the role still exists.
    pub fn role_exists(&self) -> bool {
        self.state.lock().map(|s| s.role.is_some()).unwrap_or(false)
    }

    /// Number of detach attempts issued so far.
    pub fn detach_attempts(&self) -> usize {
        self.state.lock().map(|s| s.detach_attempts).unwrap_or(0)
    }
}

#[async_trait]
impl RoleProvider for MockRoleProvider {
    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> ProvisionResult<()> {
        let mut state = self.lock()?;
        state.detach_attempts += 1;
        if state.role.as_deref() != Some(role_name) {
            return Err(ProvisionError::provider(
                role_name,
                "detach_policy",
                "role not found",
            ));
        }
        let Some(pos) = state.attached.iter().position(|p| p == policy_arn) else {
            return Err(ProvisionError::provider(
                role_name,
                "detach_policy",
                "policy not attached",
            ));
        };
        state.attached.remove(pos);
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> ProvisionResult<RoleDeletion> {
        let mut state = self.lock()?;
        if state.role.as_deref() == Some(role_name) {
            state.role = None;
            Ok(RoleDeletion::Deleted)
        } else {
            Ok(RoleDeletion::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec(group_id: &str) -> InstanceSpec {
        InstanceSpec {
            identifier: "crowdlab-db-test".to_owned(),
            instance_class: "db.t2.medium".to_owned(),
            database_name: "crowdlab_db_test".to_owned(),
            credentials: DatabaseCredentials {
                username: "u".to_owned(),
                password: "p".to_owned(),
            },
            allocated_storage_gb: 20,
            security_group_id: group_id.to_owned(),
        }
    }

    #[tokio::test]
    async fn mock_database_lifecycle() {
        let provider = MockDatabaseProvider::new(1, 1);

        let outcome = provider.create_instance(&test_spec("sg-1")).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);

        let outcome = provider.create_instance(&test_spec("sg-1")).await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);

        // One tick of creating, then available with an endpoint.
        let desc = provider.describe_instance("x").await.unwrap().unwrap();
        assert_eq!(desc.status, InstanceStatus::Creating);
        let desc = provider.describe_instance("x").await.unwrap().unwrap();
        assert_eq!(desc.status, InstanceStatus::Available);
        assert_eq!(desc.endpoint.as_deref(), Some(MOCK_ENDPOINT));

        assert_eq!(provider.delete_instance("x").await.unwrap(), DeleteOutcome::Deleting);
        let desc = provider.describe_instance("x").await.unwrap().unwrap();
        assert_eq!(desc.status, InstanceStatus::Deleting);
        assert!(provider.describe_instance("x").await.unwrap().is_none());
        assert_eq!(provider.delete_instance("x").await.unwrap(), DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn mock_network_duplicate_name() {
        let provider = MockNetworkProvider::default();

        let created = provider
            .create_security_group("sg-name", "desc", "vpc-mock")
            .await
            .unwrap();
        let GroupCreation::Created(id) = created else {
            panic!("expected creation");
        };

        let duplicate = provider
            .create_security_group("sg-name", "desc", "vpc-mock")
            .await
            .unwrap();
        assert_eq!(duplicate, GroupCreation::Duplicate);

        let looked_up = provider.lookup_security_group("sg-name").await.unwrap();
        assert_eq!(looked_up, Some(id));
    }

    #[tokio::test]
    async fn mock_role_detach_and_delete() {
        let provider = MockRoleProvider::with_role("role", &["arn:a"]);

        provider.detach_policy("role", "arn:a").await.unwrap();
        assert!(provider.detach_policy("role", "arn:a").await.is_err());

        assert_eq!(provider.delete_role("role").await.unwrap(), RoleDeletion::Deleted);
        assert_eq!(provider.delete_role("role").await.unwrap(), RoleDeletion::NotFound);
    }
}
