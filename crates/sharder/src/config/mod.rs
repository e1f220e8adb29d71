pub mod loader;
pub mod types;

pub use loader::{
    ConfigError, TOKEN_ENV, load_config, load_config_from_str, load_default_config,
};
pub use types::{GatewayConfigJson, RestConfigJson, ShardingConfigJson, SharderConfigFile};
