use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

/// Ad-reward configuration. Read once per modal open; the session never
/// mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSettings {
    /// Raw third-party ad markup, exactly as the network hands it out.
    pub ad_markup: String,
    /// Segments required before the claim gate unlocks.
    pub segment_count: u32,
    /// Countdown per segment, in seconds.
    pub segment_secs: u32,
    /// Credits granted per completed session.
    pub reward_credits: i64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            ad_markup: String::new(),
            segment_count: 2,
            segment_secs: 30,
            reward_credits: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserSettings {
    reward: RewardSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            reward: RewardSettings::default(),
        }
    }
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
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn reward(&self) -> RewardSettings {
        self.data.read().unwrap().reward.clone()
    }

    pub fn update_reward(&self, settings: RewardSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            guard.reward = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
