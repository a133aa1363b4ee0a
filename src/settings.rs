use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RendererSettings {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("pagewatch/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Also raise a desktop notification, not just a log line.
    pub desktop: bool,
    pub command: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            desktop: false,
            command: "notify-send".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    renderer: RendererSettings,
    notifications: NotificationSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn renderer(&self) -> RendererSettings {
        self.read().renderer.clone()
    }

    pub fn notifications(&self) -> NotificationSettings {
        self.read().notifications.clone()
    }

    pub fn update_renderer(&self, settings: RendererSettings) -> Result<()> {
        let mut guard = self.write();
        guard.renderer = settings;
        self.persist(&guard)
    }

    pub fn update_notifications(&self, settings: NotificationSettings) -> Result<()> {
        let mut guard = self.write();
        guard.notifications = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_file_missing_or_garbled() {
        let dir = tempdir().unwrap();
        let missing = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(missing.renderer(), RendererSettings::default());

        let garbled = dir.path().join("garbled.json");
        fs::write(&garbled, "[1, 2").unwrap();
        let store = SettingsStore::new(garbled).unwrap();
        assert_eq!(store.notifications(), NotificationSettings::default());
    }

    #[test]
    fn updates_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_renderer(RendererSettings {
                user_agent: "test-agent".into(),
                request_timeout_secs: 5,
            })
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.renderer().user_agent, "test-agent");
        assert_eq!(reopened.renderer().request_timeout_secs, 5);
        assert!(!reopened.notifications().desktop);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"notifications": {"desktop": true}}"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert!(store.notifications().desktop);
        assert_eq!(store.notifications().command, "notify-send");
        assert_eq!(store.renderer(), RendererSettings::default());
    }
}
