//! Persisted station settings and presets.
//!
//! Two JSON documents live under `<base>/config/`:
//! - `config.json`: the [`StationConfig`]
//! - `presets.json`: the [`PresetList`]
//!
//! Both are created with defaults on first run and rewritten on every
//! mutation through a temp file and a rename.

mod paths;

pub use paths::StorePaths;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fmgo_protocol::{
    ConfigChange, Preset, PresetList, PresetPatch, StationConfig, StationConfigPatch, TuneError,
};
use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const CONFIG_FILE: &str = "config.json";
const PRESETS_FILE: &str = "presets.json";

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] TuneError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared handle used by the web layer.
pub type StoreHandle = Arc<tokio::sync::Mutex<Store>>;

/// Owner of both persisted documents.
pub struct Store {
    paths: StorePaths,
    config: StationConfig,
    presets: PresetList,
}

impl Store {
    /// Create the directories and load (or initialize) both documents.
    pub fn open(paths: StorePaths) -> Result<Self> {
        paths.ensure_dirs().map_err(|source| StoreError::Io {
            path: paths.config_dir.clone(),
            source,
        })?;

        let config = load_or_init(&paths.config_dir.join(CONFIG_FILE))?;
        let presets = load_or_init(&paths.config_dir.join(PRESETS_FILE))?;

        Ok(Self {
            paths,
            config,
            presets,
        })
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Merge recognized keys into the config and save it.
    ///
    /// A rejected patch, or a failed write, leaves the in-memory config as it was.
    pub fn update_config(&mut self, patch: StationConfigPatch) -> Result<ConfigChange> {
        let mut updated = self.config.clone();
        let change = updated.apply(patch)?;
        save(&self.paths.config_dir.join(CONFIG_FILE), &updated)?;
        self.config = updated;
        Ok(change)
    }

    /// Remember the last tuned frequency.
    pub fn set_frequency(&mut self, frequency_hz: u32) -> Result<()> {
        if self.config.frequency == frequency_hz {
            return Ok(());
        }
        let mut updated = self.config.clone();
        updated.frequency = frequency_hz;
        save(&self.paths.config_dir.join(CONFIG_FILE), &updated)?;
        self.config = updated;
        Ok(())
    }

    pub fn presets(&self) -> &PresetList {
        &self.presets
    }

    pub fn add_preset(&mut self, patch: PresetPatch) -> Result<Preset> {
        let mut updated = self.presets.clone();
        let preset = updated.add(patch)?;
        self.save_presets(updated)?;
        Ok(preset)
    }

    /// `Ok(None)` when no preset has this id.
    pub fn update_preset(&mut self, id: u32, patch: PresetPatch) -> Result<Option<Preset>> {
        let mut updated = self.presets.clone();
        let Some(preset) = updated.update(id, patch)? else {
            return Ok(None);
        };
        self.save_presets(updated)?;
        Ok(Some(preset))
    }

    /// Deleting an unknown id succeeds without touching the file.
    pub fn delete_preset(&mut self, id: u32) -> Result<bool> {
        let mut updated = self.presets.clone();
        if !updated.remove(id) {
            return Ok(false);
        }
        self.save_presets(updated)?;
        Ok(true)
    }

    fn save_presets(&mut self, presets: PresetList) -> Result<()> {
        save(&self.paths.config_dir.join(PRESETS_FILE), &presets)?;
        self.presets = presets;
        Ok(())
    }
}

/// Read a document, writing the default when the file does not exist.
///
/// An unreadable or corrupt file is logged and replaced by the default in
/// memory only; it is overwritten on the next mutation.
fn load_or_init<T>(path: &Path) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("Failed to parse {}: {}; using defaults", path.display(), e);
                Ok(T::default())
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let value = T::default();
            save(path, &value)?;
            info!("Created {} with defaults", path.display());
            Ok(value)
        }
        Err(e) => {
            error!("Failed to read {}: {}; using defaults", path.display(), e);
            Ok(T::default())
        }
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
