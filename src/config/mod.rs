//! Configuration: schema, file loading, environment overrides.

mod load;
mod schema;

pub use load::{apply_env_overrides, load_conf, load_toml, parse_conf};
pub use schema::{
    ConfigError, LogFormat, LoggingConfig, ProviderSettings, Settings, StoreSettings,
    WireSettings,
};
