//! Domain event type names.

pub const FEATURE_CREATED: &str = "feature-created";
pub const FEATURE_UPDATED: &str = "feature-updated";
pub const FEATURE_TOGGLED: &str = "feature-toggled";
pub const FEATURE_ARCHIVED: &str = "feature-archived";
pub const FEATURE_IMPORT: &str = "feature-import";
pub const DROP_FEATURES: &str = "drop-features";
pub const STATE_IMPORTED: &str = "state-imported";
pub const CLIENT_REGISTERED: &str = "client-registered";
