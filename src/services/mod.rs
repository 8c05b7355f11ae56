//! Service layer: business logic composed over the stores.
//!
//! Services do no I/O when built and own nothing that needs tearing down;
//! destroying the stores underneath them is enough.

pub mod client_instance;
pub mod feature_toggle;
pub mod state;

use std::sync::Arc;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::stores::{StoreError, Stores};

pub use client_instance::{ClientInstanceService, ClientRegistration};
pub use feature_toggle::FeatureToggleService;
pub use state::{ExportState, ImportError, ImportOptions, ImportSummary, StateService};

/// Errors raised by services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid name '{0}': use letters, digits and -_.~ only")]
    InvalidName(String),
}

#[derive(Clone)]
pub struct Services {
    pub feature_toggles: Arc<FeatureToggleService>,
    pub state: Arc<StateService>,
    pub client_instances: Arc<ClientInstanceService>,
}

impl Services {
    pub fn new(stores: &Stores, _config: &ServerConfig) -> Self {
        Self {
            feature_toggles: Arc::new(FeatureToggleService::new(
                Arc::clone(&stores.features),
                Arc::clone(&stores.events),
            )),
            state: Arc::new(StateService::new(
                Arc::clone(&stores.features),
                Arc::clone(&stores.events),
            )),
            client_instances: Arc::new(ClientInstanceService::new(
                Arc::clone(&stores.client_instances),
                Arc::clone(&stores.client_metrics),
                Arc::clone(&stores.events),
            )),
        }
    }
}
