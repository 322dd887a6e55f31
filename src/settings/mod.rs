//! TOML-based settings for archform.
//!
//! Settings are loaded from `~/.archform/settings.toml` with environment variable
//! interpolation support. Secrets can also come straight from the environment
//! through the `get_with_env_fallback` helper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::settings::{SettingsManager, get_with_env_fallback};
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//!
//! let project = get_with_env_fallback(
//!     &settings.ai.vertex_ai.project_id,
//!     &["VERTEX_AI_PROJECT_ID", "GOOGLE_CLOUD_PROJECT"],
//!     None,
//! );
//! ```

pub mod loader;
pub mod schema;

pub use loader::{archform_dir, expand_home, get_with_env_fallback, settings_path, SettingsManager};
pub use schema::ArchformSettings;
