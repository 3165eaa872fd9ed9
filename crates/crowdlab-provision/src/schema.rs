//! Schema health collaborator for the managed database.
//!
//! The provisioner never inspects the database directly; it asks a
//! [`SchemaInspector`] whether the live schema matches expectations and,
//! when acceptable, to initialise it. The production implementation
//! connects over Postgres; tests script health outcomes with
//! [`MockInspector`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::ProvisionResult;
use crate::types::{DatabaseCredentials, DatabaseHealth};

/// Tables and columns the experiment application expects.
pub const EXPECTED_TABLES: &[(&str, &[&str])] = &[
    ("conversations", &["id", "created_at"]),
    (
        "messages",
        &["id", "conversation_id", "sender", "body", "created_at"],
    ),
];

/// Where to reach the database whose schema is being inspected.
#[derive(Debug, Clone)]
pub struct DatabaseLocation {
    /// Endpoint host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Credentials used to connect.
    pub credentials: DatabaseCredentials,
}

impl DatabaseLocation {
    fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.credentials.username, self.credentials.password, self.host, self.port, self.database
        )
    }
}

/// Inspects and initialises the experiment schema.
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    /// Classify the live schema.
    ///
    /// Inspection failures are classified, not propagated: any error that
    /// cannot be attributed to a known schema shape comes back as
    /// [`DatabaseHealth::UnknownError`].
    async fn check_health(&self, location: &DatabaseLocation) -> DatabaseHealth;

    /// Create the expected tables.
    ///
    /// Idempotent: initialising an already-healthy schema is a no-op.
    async fn initialise(&self, location: &DatabaseLocation) -> ProvisionResult<()>;
}

/// Production inspector connecting over Postgres.
#[derive(Debug, Default)]
pub struct PostgresInspector;

impl PostgresInspector {
    async fn observed_columns(
        location: &DatabaseLocation,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&location.connection_url())
            .await?;

        let names: Vec<String> = EXPECTED_TABLES.iter().map(|(t, _)| (*t).to_owned()).collect();
        let rows = sqlx::query(
            r#"
            SELECT table_name, column_name
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = ANY($1)
            "#,
        )
        .bind(&names)
        .fetch_all(&pool)
        .await?;

        let mut observed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for row in rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            observed.entry(table).or_default().insert(column);
        }
        Ok(observed)
    }

    fn classify(observed: &BTreeMap<String, BTreeSet<String>>) -> DatabaseHealth {
        if observed.is_empty() {
            return DatabaseHealth::MissingTable;
        }

        for (table, columns) in EXPECTED_TABLES {
            let Some(found) = observed.get(*table) else {
                // Some tables present, some absent: not a fresh database.
                return DatabaseHealth::InconsistentSchema;
            };
            let expected: BTreeSet<String> = columns.iter().map(|&c| c.to_owned()).collect();
            if *found != expected {
                return DatabaseHealth::InconsistentSchema;
            }
        }
        DatabaseHealth::Healthy
    }
}

#[async_trait]
impl SchemaInspector for PostgresInspector {
    async fn check_health(&self, location: &DatabaseLocation) -> DatabaseHealth {
        match Self::observed_columns(location).await {
            Ok(observed) => {
                let health = Self::classify(&observed);
                debug!(host = %location.host, health = %health, "schema inspected");
                health
            }
            Err(err) => {
                warn!(host = %location.host, error = %err, "schema inspection failed");
                DatabaseHealth::UnknownError
            }
        }
    }

    async fn initialise(&self, location: &DatabaseLocation) -> ProvisionResult<()> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&location.connection_url())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGSERIAL PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;

        debug!(host = %location.host, "schema initialised");
        Ok(())
    }
}

/// Scripted inspector for tests.
///
/// Health outcomes are popped from a queue; once exhausted, the inspector
/// reports healthy.
#[derive(Debug, Default)]
pub struct MockInspector {
    health: Mutex<Vec<DatabaseHealth>>,
    init_calls: Mutex<usize>,
}

impl MockInspector {
    /// Create an inspector that reports the given outcomes in order.
    #[must_use]
    pub fn with_health(outcomes: &[DatabaseHealth]) -> Self {
        let mut health: Vec<DatabaseHealth> = outcomes.to_vec();
        health.reverse();
        Self {
            health: Mutex::new(health),
            init_calls: Mutex::new(0),
        }
    }

    /// Number of initialisation calls issued so far.
    pub fn init_calls(&self) -> usize {
        self.init_calls.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SchemaInspector for MockInspector {
    async fn check_health(&self, _location: &DatabaseLocation) -> DatabaseHealth {
        self.health
            .lock()
            .ok()
            .and_then(|mut h| h.pop())
            .unwrap_or(DatabaseHealth::Healthy)
    }

    async fn initialise(&self, _location: &DatabaseLocation) -> ProvisionResult<()> {
        if let Ok(mut n) = self.init_calls.lock() {
            *n += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(entries: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        entries
            .iter()
            .map(|(table, cols)| {
                (
                    (*table).to_owned(),
                    cols.iter().map(|&c| c.to_owned()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_database_is_missing_table() {
        assert_eq!(
            PostgresInspector::classify(&BTreeMap::new()),
            DatabaseHealth::MissingTable
        );
    }

    #[test]
    fn full_expected_schema_is_healthy() {
        assert_eq!(
            PostgresInspector::classify(&columns(EXPECTED_TABLES)),
            DatabaseHealth::Healthy
        );
    }

    #[test]
    fn partial_schema_is_inconsistent() {
        let observed = columns(&[("conversations", &["id", "created_at"])]);
        assert_eq!(
            PostgresInspector::classify(&observed),
            DatabaseHealth::InconsistentSchema
        );
    }

    #[test]
    fn column_drift_is_inconsistent() {
        let observed = columns(&[
            ("conversations", &["id", "created_at", "extra"]),
            (
                "messages",
                &["id", "conversation_id", "sender", "body", "created_at"],
            ),
        ]);
        assert_eq!(
            PostgresInspector::classify(&observed),
            DatabaseHealth::InconsistentSchema
        );
    }

    #[tokio::test]
    async fn mock_inspector_scripted_outcomes() {
        let inspector = MockInspector::with_health(&[
            DatabaseHealth::InconsistentSchema,
            DatabaseHealth::MissingTable,
        ]);
        let location = DatabaseLocation {
            host: "db".to_owned(),
            port: 5432,
            database: "d".to_owned(),
            credentials: DatabaseCredentials {
                username: "u".to_owned(),
                password: "p".to_owned(),
            },
        };

        assert_eq!(
            inspector.check_health(&location).await,
            DatabaseHealth::InconsistentSchema
        );
        assert_eq!(
            inspector.check_health(&location).await,
            DatabaseHealth::MissingTable
        );
        assert_eq!(inspector.check_health(&location).await, DatabaseHealth::Healthy);

        inspector.initialise(&location).await.unwrap();
        assert_eq!(inspector.init_calls(), 1);
    }
}
