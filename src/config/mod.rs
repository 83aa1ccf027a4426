pub mod env;
pub mod loader;
pub mod types;

pub use loader::{config_dir, default_credentials_path, load_config};
pub use types::{redirect_uri, AuthConfig, Endpoints, CALLBACK_PATH, DEFAULT_CALLBACK_PORT};
