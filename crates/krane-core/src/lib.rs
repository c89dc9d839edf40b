//! krane-core: settings and the label vocabulary shared by every crate.

pub mod settings;

pub use settings::{JobSettings, KraneSettings, RuntimeSettings, SettingsError};

/// Label identifying the deployment a container belongs to.
pub const NAMESPACE_LABEL: &str = "krane.deployment.namespace";

/// Label carrying the fingerprint of the config a container was built from.
pub const REVISION_LABEL: &str = "krane.deployment.revision";
