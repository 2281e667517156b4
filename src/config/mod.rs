//! YAML configuration of the binary: grant credentials and settings.

pub mod credentials;
pub mod loader;
pub mod settings;

pub use credentials::{CredentialsConfig, SecretValue, ServiceConfig};
pub use loader::{expand_env_vars, file_to_config, parse_config};
pub use settings::{LogFormat, LoggingConfig, SettingsConfig};
