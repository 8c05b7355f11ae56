//! Bulk state import and export.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::events::{types, NewEvent};
use crate::stores::{EventStore, FeatureToggle, FeatureToggleStore, StoreError};

/// Current export format version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read import file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse import file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported state version {0}")]
    Version(u32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Serialized server state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportState {
    pub version: u32,
    #[serde(default)]
    pub features: Vec<FeatureToggle>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub file: PathBuf,
    pub drop_before_import: bool,
    pub keep_existing: bool,
    pub user_name: String,
}

/// What an import changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub dropped: usize,
}

pub struct StateService {
    features: Arc<FeatureToggleStore>,
    events: Arc<EventStore>,
}

impl StateService {
    pub fn new(features: Arc<FeatureToggleStore>, events: Arc<EventStore>) -> Self {
        Self { features, events }
    }

    /// Import a JSON state file.
    pub async fn import_file(&self, options: ImportOptions) -> Result<ImportSummary, ImportError> {
        let state = read_state(&options.file).await?;
        tracing::info!(
            file = %options.file.display(),
            features = state.features.len(),
            drop_before_import = options.drop_before_import,
            keep_existing = options.keep_existing,
            "Importing state"
        );
        self.import_state(
            state,
            options.drop_before_import,
            options.keep_existing,
            &options.user_name,
        )
        .await
    }

    pub async fn import_state(
        &self,
        state: ExportState,
        drop_before_import: bool,
        keep_existing: bool,
        user: &str,
    ) -> Result<ImportSummary, ImportError> {
        if state.version > STATE_VERSION {
            return Err(ImportError::Version(state.version));
        }

        let mut summary = ImportSummary::default();

        if drop_before_import {
            summary.dropped = self.features.truncate().await?;
            self.events
                .append(NewEvent::new(
                    types::DROP_FEATURES,
                    user,
                    json!({ "dropped": summary.dropped }),
                ))
                .await?;
        }

        for feature in state.features {
            if keep_existing && self.features.exists(&feature.name).await? {
                summary.skipped += 1;
                continue;
            }
            self.features.upsert(&feature).await?;
            self.events
                .append(NewEvent::new(types::FEATURE_IMPORT, user, json!(feature)))
                .await?;
            summary.imported += 1;
        }

        self.events
            .append(NewEvent::new(types::STATE_IMPORTED, user, json!(summary)))
            .await?;
        tracing::info!(
            imported = summary.imported,
            skipped = summary.skipped,
            dropped = summary.dropped,
            "State import finished"
        );
        Ok(summary)
    }

    /// Every toggle, archived ones included.
    pub async fn export_state(&self) -> Result<ExportState, StoreError> {
        let mut features = self.features.get_all(false).await?;
        features.extend(self.features.get_all(true).await?);
        features.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ExportState {
            version: STATE_VERSION,
            features,
        })
    }
}

async fn read_state(path: &Path) -> Result<ExportState, ImportError> {
    let raw = tokio::fs::read(path).await.map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ImportError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
