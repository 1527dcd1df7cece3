pub mod settings;
pub mod user;

use std::collections::HashMap;
use std::path::Path;

pub use settings::ReplSettings;
pub use user::{load_user_config, user_config_path};

use crate::bridge::ConnectSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

/// Something worth telling the user about while loading settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }
}

#[derive(Default, Debug)]
pub struct SettingsLoadOutcome {
    pub settings: ReplSettings,
    pub events: Vec<SettingsEvent>,
}

/// Load settings from the user config and an optional explicit file.
///
/// Layers, lowest precedence first: defaults < user config < `explicit`.
/// A layer that fails to load is skipped with a warning event.
pub fn load_settings(explicit: Option<&Path>) -> SettingsLoadOutcome {
    let mut events = Vec::new();

    let user_config = match load_user_config() {
        Ok(Some(settings)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            Some(settings)
        }
        Ok(None) => None,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load user config: {}",
                err
            )));
            None
        }
    };

    let explicit_config = explicit.and_then(|path| match ReplSettings::load(path) {
        Ok(settings) => {
            events.push(SettingsEvent::info(format!(
                "Loaded config file: {}",
                path.display()
            )));
            Some(settings)
        }
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load config file: {}",
                err
            )));
            None
        }
    });

    let settings = merge_all(&[user_config, explicit_config]).unwrap_or_default();
    SettingsLoadOutcome { settings, events }
}

/// Merge configs in order. Later configs have higher precedence.
pub fn merge_all(configs: &[Option<ReplSettings>]) -> Option<ReplSettings> {
    configs.iter().cloned().reduce(merge_settings).flatten()
}

/// Merge two settings, preferring values from `primary` over `fallback`.
pub fn merge_settings(
    fallback: Option<ReplSettings>,
    primary: Option<ReplSettings>,
) -> Option<ReplSettings> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(settings), None) | (None, Some(settings)) => Some(settings),
        (Some(fallback), Some(primary)) => Some(ReplSettings {
            connections: merge_connections(fallback.connections, primary.connections),
            init_timeout_secs: primary.init_timeout_secs.or(fallback.init_timeout_secs),
            shutdown_timeout_secs: primary
                .shutdown_timeout_secs
                .or(fallback.shutdown_timeout_secs),
            eval_timeout_secs: primary.eval_timeout_secs.or(fallback.eval_timeout_secs),
        }),
    }
}

/// Merge connection lists by tag. Primary entries replace fallback entries
/// with the same tag; order is fallback order, then new primary tags.
fn merge_connections(fallback: Vec<ConnectSpec>, primary: Vec<ConnectSpec>) -> Vec<ConnectSpec> {
    let mut overrides: HashMap<String, ConnectSpec> = primary
        .iter()
        .map(|spec| (spec.tag.clone(), spec.clone()))
        .collect();

    let mut merged: Vec<ConnectSpec> = fallback
        .into_iter()
        .map(|spec| overrides.remove(&spec.tag).unwrap_or(spec))
        .collect();
    merged.extend(
        primary
            .into_iter()
            .filter(|spec| overrides.contains_key(&spec.tag)),
    );
    merged
}
