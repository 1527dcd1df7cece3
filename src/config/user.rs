//! User configuration loading for conjure.
//!
//! User config location: $XDG_CONFIG_HOME/conjure/conjure.toml
//! Fallback: the platform config directory (`~/.config` on Linux)

use std::path::{Path, PathBuf};

use super::settings::ReplSettings;
use crate::error::ReplResult;

const APP_DIR: &str = "conjure";
const FILE_NAME: &str = "conjure.toml";

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/conjure/conjure.toml
/// 2. Otherwise: `dirs::config_dir()`/conjure/conjure.toml
///
/// Returns None if neither can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let xdg = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
    config_path_in(xdg.as_deref())
}

fn config_path_in(xdg_config_home: Option<&Path>) -> Option<PathBuf> {
    let base = match xdg_config_home.filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(FILE_NAME))
}

/// Load the user config. `Ok(None)` when there is no file.
pub fn load_user_config() -> ReplResult<Option<ReplSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    ReplSettings::load(&path).map(Some)
}
