//! krane-deployment: deployment configuration and secrets.
//!
//! Both stores sit on top of [`krane_state::StateStore`]:
//!
//! - **`config`**: `DeploymentConfig` records in the `deployments`
//!   collection, validated and defaulted before every write.
//! - **`secrets`**: one isolated `{deployment}-secrets` collection per
//!   deployment. Each secret gets a derived `@ALIAS` that deployment configs
//!   use to reference it without embedding the value.

pub mod config;
pub mod error;
pub mod secrets;

pub use config::{ConfigStore, DeploymentConfig};
pub use error::{DeploymentError, DeploymentResult};
pub use secrets::{Secret, SecretsStore, format_secret_alias, is_valid_secret_key};
