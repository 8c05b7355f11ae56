//! Schema migrations.
//!
//! Migrations are ordered and named; applied names are recorded in the
//! database so re-running only applies what is new.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::db::{Database, DatabaseConnector, DbError};
use crate::stores::{settings::SECRET_KEY, tables};

/// A failed migration run. Always terminal for startup.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to open database for migration: {0}")]
    Connect(#[source] DbError),

    #[error("migration {name} failed: {source}")]
    Step {
        name: &'static str,
        #[source]
        source: DbError,
    },

    #[error("failed to persist migrated schema: {0}")]
    Persist(#[source] DbError),
}

/// Names of the migrations applied by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
}

/// Applies outstanding schema changes before any store opens.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, config: &ServerConfig) -> Result<MigrationReport, MigrationError>;
}

#[derive(Debug, Clone, Copy)]
enum Step {
    CreateTable(&'static str),
    SeedSecret,
}

/// One named schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    step: Step,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration { name: "001-create-settings", step: Step::CreateTable(tables::SETTINGS) },
    Migration { name: "002-create-events", step: Step::CreateTable(tables::EVENTS) },
    Migration { name: "003-create-features", step: Step::CreateTable(tables::FEATURES) },
    Migration { name: "004-create-client-instances", step: Step::CreateTable(tables::CLIENT_INSTANCES) },
    Migration { name: "005-create-client-metrics", step: Step::CreateTable(tables::CLIENT_METRICS) },
    Migration { name: "006-seed-secret", step: Step::SeedSecret },
];

impl Migration {
    async fn apply(&self, db: &Database) -> Result<(), DbError> {
        match self.step {
            Step::CreateTable(table) => {
                db.create_table(table).await?;
            }
            Step::SeedSecret => {
                let secret = format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                );
                db.insert_new(tables::SETTINGS, SECRET_KEY, json!(secret)).await?;
            }
        }
        Ok(())
    }
}

/// Apply every migration not yet recorded in `db`.
pub async fn apply_pending(db: &Database) -> Result<MigrationReport, MigrationError> {
    let done = db.applied_migrations().await.map_err(MigrationError::Connect)?;
    let mut report = MigrationReport::default();

    for migration in MIGRATIONS {
        if done.iter().any(|name| name == migration.name) {
            continue;
        }
        let step_err = |source| MigrationError::Step {
            name: migration.name,
            source,
        };
        migration.apply(db).await.map_err(step_err)?;
        db.record_migration(migration.name).await.map_err(step_err)?;
        tracing::info!(migration = migration.name, "Applied migration");
        report.applied.push(migration.name);
    }

    Ok(report)
}

/// Production migrator: opens its own connection, migrates, persists.
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    connector: Arc<DatabaseConnector>,
}

impl SchemaMigrator {
    pub fn new(connector: Arc<DatabaseConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Migrator for SchemaMigrator {
    async fn migrate(&self, config: &ServerConfig) -> Result<MigrationReport, MigrationError> {
        let db = self
            .connector
            .connect(&config.db)
            .await
            .map_err(MigrationError::Connect)?;

        let report = apply_pending(&db).await?;

        // Snapshot-backed connections are private to this run; memory-only
        // ones are shared with the store layer and stay open.
        if db.path().is_some() {
            db.destroy().await.map_err(MigrationError::Persist)?;
        }

        tracing::info!(applied = report.applied.len(), "Database migrations complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    #[tokio::test]
    async fn applies_all_then_nothing() {
        let db = Database::in_memory(2);

        let first = apply_pending(&db).await.unwrap();
        assert_eq!(first.applied.len(), MIGRATIONS.len());

        let second = apply_pending(&db).await.unwrap();
        assert!(second.applied.is_empty());

        for table in [tables::SETTINGS, tables::EVENTS, tables::FEATURES] {
            assert!(db.has_table(table).await.unwrap());
        }
    }

    #[tokio::test]
    async fn seeded_secret_is_stable_across_runs() {
        let db = Database::in_memory(2);
        apply_pending(&db).await.unwrap();
        let secret = db.get(tables::SETTINGS, SECRET_KEY).await.unwrap().unwrap();
        assert_eq!(secret.as_str().unwrap().len(), 64);

        apply_pending(&db).await.unwrap();
        assert_eq!(db.get(tables::SETTINGS, SECRET_KEY).await.unwrap().unwrap(), secret);
    }

    #[tokio::test]
    async fn schema_migrator_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.db = DbConfig {
            path: Some(dir.path().join("flagpole.json")),
            ..DbConfig::default()
        };

        let migrator = SchemaMigrator::new(Arc::new(DatabaseConnector::new()));
        let report = migrator.migrate(&config).await.unwrap();
        assert_eq!(report.applied.len(), MIGRATIONS.len());

        let again = migrator.migrate(&config).await.unwrap();
        assert!(again.applied.is_empty());
    }

    #[tokio::test]
    async fn closed_database_is_a_connect_failure() {
        let db = Database::in_memory(1);
        db.destroy().await.unwrap();
        let err = apply_pending(&db).await.unwrap_err();
        assert!(matches!(err, MigrationError::Connect(DbError::Closed)));
    }
}
