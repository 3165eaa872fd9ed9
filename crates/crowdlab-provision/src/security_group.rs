//! Idempotent management of the database security group.

use std::sync::Arc;

use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};
use crate::provider::{GroupCreation, IngressRule, NetworkProvider};

/// Ensures the named ingress rule set for the database's network perimeter
/// exists, and removes it on teardown.
pub struct SecurityGroupManager {
    network: Arc<dyn NetworkProvider>,
    name: String,
    description: String,
    port: u16,
}

impl SecurityGroupManager {
    /// Create a new manager for the given group name.
    pub fn new(
        network: Arc<dyn NetworkProvider>,
        name: impl Into<String>,
        description: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            network,
            name: name.into(),
            description: description.into(),
            port,
        }
    }

    /// Ensure the group exists and return its id.
    ///
    /// Creation is idempotent: a duplicate-name response means the group
    /// is already in place, so its id is looked up and returned. The
    /// ingress rule is only authorized on the creation path, so calling
    /// this twice never issues a duplicate rule.
    pub async fn ensure(&self) -> ProvisionResult<String> {
        let network_id = self.network.default_network_id().await?;

        match self
            .network
            .create_security_group(&self.name, &self.description, &network_id)
            .await?
        {
            GroupCreation::Created(id) => {
                // Database port open to any IPv4 and IPv6 source.
                self.network
                    .authorize_ingress(&id, &IngressRule::database_port(self.port))
                    .await?;
                info!(group = %self.name, id = %id, "security group created");
                Ok(id)
            }
            GroupCreation::Duplicate => {
                let id = self
                    .network
                    .lookup_security_group(&self.name)
                    .await?
                    .ok_or_else(|| {
                        ProvisionError::provider(
                            &self.name,
                            "lookup_security_group",
                            "group reported as duplicate but not found",
                        )
                    })?;
                info!(group = %self.name, id = %id, "security group already exists");
                Ok(id)
            }
        }
    }

    /// Remove the group.
    ///
    /// A group that does not exist is a success, not an error.
    pub async fn remove(&self) -> ProvisionResult<()> {
        match self.network.lookup_security_group(&self.name).await? {
            Some(id) => {
                self.network.delete_security_group(&self.name, &id).await?;
                info!(group = %self.name, id = %id, "security group removed");
                Ok(())
            }
            None => {
                info!(group = %self.name, "security group already absent");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockNetworkProvider;

    fn manager(network: Arc<MockNetworkProvider>) -> SecurityGroupManager {
        SecurityGroupManager::new(network, "crowdlab-db-security-group", "test group", 5432)
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let network = Arc::new(MockNetworkProvider::default());
        let manager = manager(Arc::clone(&network));

        let first = manager.ensure().await.unwrap();
        let second = manager.ensure().await.unwrap();
        assert_eq!(first, second);

        // A single ingress rule, issued only on the creation path.
        let rules = network.ingress_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].0, first);
        assert_eq!(rules[0].1, IngressRule::database_port(5432));
    }

    #[tokio::test]
    async fn ingress_rule_is_any_source() {
        let rule = IngressRule::database_port(5432);
        assert_eq!(rule.protocol, "tcp");
        assert_eq!(rule.from_port, 5432);
        assert_eq!(rule.to_port, 5432);
        assert_eq!(rule.ipv4_cidr, "0.0.0.0/0");
        assert_eq!(rule.ipv6_cidr, "::/0");
    }

    #[tokio::test]
    async fn remove_missing_group_is_noop() {
        let network = Arc::new(MockNetworkProvider::default());
        let manager = manager(Arc::clone(&network));

        manager.remove().await.unwrap();

        let id = manager.ensure().await.unwrap();
        manager.remove().await.unwrap();
        assert!(network.lookup_security_group("crowdlab-db-security-group").await.unwrap().is_none());
        // Ensure after removal creates a fresh group.
        let new_id = manager.ensure().await.unwrap();
        assert_ne!(id, new_id);
    }
}
