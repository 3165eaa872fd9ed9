//! AWS implementations of the provider seams.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange, Ipv6Range};
use aws_sdk_rds::types::Tag;
use tracing::debug;

use crate::config::AwsConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::types::{InstanceDescription, InstanceStatus};

use super::{
    CreateOutcome, DatabaseProvider, DeleteOutcome, GroupCreation, IngressRule, InstanceSpec,
    NetworkProvider, RoleDeletion, RoleProvider,
};

async fn shared_config(config: &AwsConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));
    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }
    loader.load().await
}

/// Managed database provider backed by RDS.
#[derive(Debug, Clone)]
pub struct AwsDatabaseProvider {
    client: aws_sdk_rds::Client,
}

impl AwsDatabaseProvider {
    /// Connect using the given provider settings.
    pub async fn connect(config: &AwsConfig) -> Self {
        let shared = shared_config(config).await;
        Self {
            client: aws_sdk_rds::Client::new(&shared),
        }
    }
}

#[async_trait]
impl DatabaseProvider for AwsDatabaseProvider {
    async fn create_instance(&self, spec: &InstanceSpec) -> ProvisionResult<CreateOutcome> {
        debug!(identifier = %spec.identifier, class = %spec.instance_class, "requesting instance creation");

        let result = self
            .client
            .create_db_instance()
            .db_instance_identifier(&spec.identifier)
            .allocated_storage(spec.allocated_storage_gb)
            .db_name(&spec.database_name)
            .engine("postgres")
            .storage_type("gp2")
            .storage_encrypted(false)
            .auto_minor_version_upgrade(true)
            .multi_az(false)
            .master_username(&spec.credentials.username)
            .master_user_password(&spec.credentials.password)
            .vpc_security_group_ids(&spec.security_group_id)
            .db_instance_class(&spec.instance_class)
            .tags(Tag::builder().key("Name").value(&spec.identifier).build())
            .send()
            .await;

        match result {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_db_instance_already_exists_fault() {
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(ProvisionError::provider(
                        &spec.identifier,
                        "create_db_instance",
                        service.to_string(),
                    ))
                }
            }
        }
    }

    async fn describe_instance(
        &self,
        identifier: &str,
    ) -> ProvisionResult<Option<InstanceDescription>> {
        let result = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_db_instance_not_found_fault() {
                    return Ok(None);
                }
                return Err(ProvisionError::provider(
                    identifier,
                    "describe_db_instances",
                    service.to_string(),
                ));
            }
        };

        let Some(instance) = output.db_instances().first() else {
            return Ok(None);
        };

        let raw_status = instance.db_instance_status().unwrap_or_default();
        let status = InstanceStatus::parse(raw_status).ok_or_else(|| {
            ProvisionError::provider(
                identifier,
                "describe_db_instances",
                format!("unexpected instance status: {raw_status}"),
            )
        })?;

        Ok(Some(InstanceDescription {
            status,
            instance_class: instance.db_instance_class().unwrap_or_default().to_owned(),
            endpoint: instance
                .endpoint()
                .and_then(|e| e.address())
                .map(ToOwned::to_owned),
        }))
    }

    async fn delete_instance(&self, identifier: &str) -> ProvisionResult<DeleteOutcome> {
        debug!(identifier = %identifier, "requesting instance deletion");

        let result = self
            .client
            .delete_db_instance()
            .db_instance_identifier(identifier)
            .skip_final_snapshot(true)
            .send()
            .await;

        match result {
            Ok(_) => Ok(DeleteOutcome::Deleting),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_db_instance_not_found_fault() {
                    Ok(DeleteOutcome::NotFound)
                } else if service.is_invalid_db_instance_state_fault() {
                    // Already deleting; the poll loop takes it from here.
                    Ok(DeleteOutcome::Deleting)
                } else {
                    Err(ProvisionError::provider(
                        identifier,
                        "delete_db_instance",
                        service.to_string(),
                    ))
                }
            }
        }
    }
}

/// Network perimeter provider backed by EC2.
#[derive(Debug, Clone)]
pub struct AwsNetworkProvider {
    client: aws_sdk_ec2::Client,
}

impl AwsNetworkProvider {
    /// Connect using the given provider settings.
    pub async fn connect(config: &AwsConfig) -> Self {
        let shared = shared_config(config).await;
        Self {
            client: aws_sdk_ec2::Client::new(&shared),
        }
    }
}

#[async_trait]
impl NetworkProvider for AwsNetworkProvider {
    async fn default_network_id(&self) -> ProvisionResult<String> {
        let output = self.client.describe_vpcs().send().await.map_err(|err| {
            ProvisionError::provider("vpc", "describe_vpcs", err.into_service_error().to_string())
        })?;

        output
            .vpcs()
            .first()
            .and_then(|vpc| vpc.vpc_id())
            .map(ToOwned::to_owned)
            .ok_or_else(|| ProvisionError::provider("vpc", "describe_vpcs", "no VPC found"))
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        network_id: &str,
    ) -> ProvisionResult<GroupCreation> {
        let result = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(network_id)
            .send()
            .await;

        match result {
            Ok(output) => {
                let id = output.group_id().ok_or_else(|| {
                    ProvisionError::provider(name, "create_security_group", "no group id returned")
                })?;
                Ok(GroupCreation::Created(id.to_owned()))
            }
            Err(err) => {
                let service = err.into_service_error();
                if service.code() == Some("InvalidGroup.Duplicate") {
                    Ok(GroupCreation::Duplicate)
                } else {
                    Err(ProvisionError::provider(
                        name,
                        "create_security_group",
                        service.to_string(),
                    ))
                }
            }
        }
    }

    async fn lookup_security_group(&self, name: &str) -> ProvisionResult<Option<String>> {
        let result = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .send()
            .await;

        match result {
            Ok(output) => Ok(output
                .security_groups()
                .first()
                .and_then(|group| group.group_id())
                .map(ToOwned::to_owned)),
            Err(err) => {
                let service = err.into_service_error();
                if service.code() == Some("InvalidGroup.NotFound") {
                    Ok(None)
                } else {
                    Err(ProvisionError::provider(
                        name,
                        "describe_security_groups",
                        service.to_string(),
                    ))
                }
            }
        }
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProvisionResult<()> {
        let permission = IpPermission::builder()
            .ip_protocol(&rule.protocol)
            .from_port(i32::from(rule.from_port))
            .to_port(i32::from(rule.to_port))
            .ip_ranges(IpRange::builder().cidr_ip(&rule.ipv4_cidr).build())
            .ipv6_ranges(Ipv6Range::builder().cidr_ipv6(&rule.ipv6_cidr).build())
            .build();

        let result = self
            .client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let service = err.into_service_error();
                if service.code() == Some("InvalidPermission.Duplicate") {
                    Ok(())
                } else {
                    Err(ProvisionError::provider(
                        group_id,
                        "authorize_security_group_ingress",
                        service.to_string(),
                    ))
                }
            }
        }
    }

    async fn delete_security_group(&self, name: &str, group_id: &str) -> ProvisionResult<()> {
        let result = self
            .client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let service = err.into_service_error();
                if service.code() == Some("InvalidGroup.NotFound") {
                    Ok(())
                } else {
                    Err(ProvisionError::provider(
                        name,
                        "delete_security_group",
                        service.to_string(),
                    ))
                }
            }
        }
    }
}

/// Identity/role provider backed by IAM.
#[derive(Debug, Clone)]
pub struct AwsRoleProvider {
    client: aws_sdk_iam::Client,
}

impl AwsRoleProvider {
    /// Connect using the given provider settings.
    pub async fn connect(config: &AwsConfig) -> Self {
        let shared = shared_config(config).await;
        Self {
            client: aws_sdk_iam::Client::new(&shared),
        }
    }
}

#[async_trait]
impl RoleProvider for AwsRoleProvider {
    async fn detach_policy(&self, role_name: &str, policy_arn: &str) -> ProvisionResult<()> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|err| {
                ProvisionError::provider(
                    role_name,
                    "detach_role_policy",
                    err.into_service_error().to_string(),
                )
            })?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> ProvisionResult<RoleDeletion> {
        let result = self.client.delete_role().role_name(role_name).send().await;

        match result {
            Ok(_) => Ok(RoleDeletion::Deleted),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_entity_exception() {
                    Ok(RoleDeletion::NotFound)
                } else {
                    Err(ProvisionError::provider(
                        role_name,
                        "delete_role",
                        service.to_string(),
                    ))
                }
            }
        }
    }
}
