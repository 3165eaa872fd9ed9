//! Provisioning pipeline for the crowdlab experiment stack.
//!
//! Brings up and tears down the cloud resources behind a crowd-labor
//! data-collection experiment: a managed Postgres instance with its
//! security group, the application deployed to a compute host over
//! SSH/SFTP, and the provisioning role removed on teardown.

mod config;
mod error;
mod orchestrator;
mod provider;
mod provision;
mod publish;
mod schema;
mod security_group;
mod types;

pub use config::{
    AwsConfig, DatabaseConfig, DeployConfig, ProvisioningConfig, StackConfig, TeardownConfig,
    SECURITY_GROUP_DESCRIPTION, SECURITY_GROUP_NAME,
};
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::{SetupOutcome, StackOrchestrator};
pub use provider::{
    AwsDatabaseProvider, AwsNetworkProvider, AwsRoleProvider, CreateOutcome, DatabaseProvider,
    DeleteOutcome, GroupCreation, IngressRule, InstanceSpec, MockDatabaseProvider,
    MockNetworkProvider, MockRoleProvider, NetworkProvider, RoleDeletion, RoleProvider,
    MOCK_ENDPOINT,
};
pub use provision::{DatabaseDecommissioner, DatabaseProvisioner};
pub use publish::{
    DeployChannel, DeploymentPublisher, MockChannel, RemoteSession, Ssh2Channel, DB_CONFIG_FILE,
};
pub use schema::{
    DatabaseLocation, MockInspector, PostgresInspector, SchemaInspector, EXPECTED_TABLES,
};
pub use security_group::SecurityGroupManager;
pub use types::{
    DatabaseCredentials, DatabaseHealth, DeployTarget, DeploymentManifest, Endpoints,
    InstanceDescription, InstanceStatus,
};
