use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::Credentials;
use crate::pricing::DiscountCoefficient;
use crate::tracking::TrackingStore;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    app: AppSection,
    #[serde(default)]
    window: WindowSection,
    /// Tracked products per seller account, keyed by client id.
    #[serde(default)]
    accounts: BTreeMap<String, AccountSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AppSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_discount_coefficient: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct WindowSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AccountSection {
    #[serde(default)]
    tracked_products: BTreeMap<String, u32>,
}

/// Opaque layout blobs of a front end, kept across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowState {
    pub geometry: Vec<u8>,
    pub state: Vec<u8>,
}

/// File-backed user settings. Changes stay in memory until [`flush`].
///
/// [`flush`]: SettingsStore::flush
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    data: SettingsFile,
}

impl SettingsStore {
    /// Opens the settings file, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            toml::from_str(&raw)?
        } else {
            debug!("No settings file at {}, using defaults", path.display());
            SettingsFile::default()
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_credentials(&self) -> Credentials {
        self.data.credentials.clone()
    }

    pub fn save_credentials(&mut self, credentials: &Credentials) {
        self.data.credentials = credentials.clone();
    }

    /// Tracked products of one account. An empty client id has none.
    pub fn load_tracked_products(&self, client_id: &str) -> TrackingStore {
        match self.data.accounts.get(client_id) {
            Some(account) if !client_id.is_empty() => {
                TrackingStore::for_account(client_id, account.tracked_products.clone())
            }
            _ => TrackingStore::new(client_id),
        }
    }

    /// Stores the tracking set under its account. Skipped for an empty
    /// client id.
    pub fn save_tracked_products(&mut self, tracking: &TrackingStore) {
        if tracking.account().is_empty() {
            return;
        }
        let tracked_products = tracking
            .iter()
            .map(|(offer_id, target)| (offer_id.to_string(), target))
            .collect();
        self.data
            .accounts
            .insert(tracking.account().to_string(), AccountSection { tracked_products });
    }

    pub fn load_coefficient(&self, default: f64) -> f64 {
        self.data
            .app
            .price_discount_coefficient
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(default)
    }

    pub fn save_coefficient(&mut self, coefficient: DiscountCoefficient) {
        self.data.app.price_discount_coefficient = Some(coefficient.as_f64());
    }

    pub fn load_window_state(&self) -> Result<Option<WindowState>> {
        let WindowSection { geometry, state } = &self.data.window;
        if geometry.is_none() && state.is_none() {
            return Ok(None);
        }
        let decode = |value: &Option<String>| -> Result<Vec<u8>> {
            match value {
                Some(encoded) => STANDARD.decode(encoded).map_err(|e| AppError::Parse {
                    message: format!("window state is not valid base64: {}", e),
                }),
                None => Ok(Vec::new()),
            }
        };
        Ok(Some(WindowState {
            geometry: decode(geometry)?,
            state: decode(state)?,
        }))
    }

    pub fn save_window_state(&mut self, window: &WindowState) {
        self.data.window = WindowSection {
            geometry: Some(STANDARD.encode(&window.geometry)),
            state: Some(STANDARD.encode(&window.state)),
        };
    }

    /// Writes the settings next to their final location, then renames them
    /// into place so a crash never leaves a half-written file.
    pub fn flush(&self) -> Result<()> {
        let raw = toml::to_string_pretty(&self.data)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}
