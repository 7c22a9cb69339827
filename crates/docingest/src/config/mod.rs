pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, load_with_env, ENV_PREFIX};
pub use schema::{
    ChunkingConfig, Config, DatabaseConfig, JobsConfig, UploadsConfig, VectorStoreConfig,
    CONFIG_VERSION, DEFAULT_MAX_FILE_SIZE,
};
