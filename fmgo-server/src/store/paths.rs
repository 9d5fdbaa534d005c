//! Installation directory layout.

use std::io;
use std::path::{Path, PathBuf};

use log::warn;

/// Well-known install location, preferred when it exists.
const INSTALL_DIR: &str = "/opt/fm-go";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub base_dir: PathBuf,
    /// Holds `config.json` and `presets.json`.
    pub config_dir: PathBuf,
    /// Static web front end.
    pub frontend_dir: PathBuf,
}

impl StorePaths {
    /// Lay out the directories under `base_dir`.
    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            config_dir: base_dir.join("config"),
            frontend_dir: base_dir.join("frontend"),
            base_dir,
        }
    }

    /// `override_dir`, else `/opt/fm-go` if present, else the parent of the
    /// directory holding the executable.
    pub fn detect(override_dir: Option<PathBuf>) -> io::Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::at(dir));
        }
        let install = Path::new(INSTALL_DIR);
        if install.is_dir() {
            return Ok(Self::at(install));
        }

        let exe = std::env::current_exe()?;
        let base = exe
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .map_or_else(std::env::current_dir, Ok)?;
        Ok(Self::at(base))
    }

    /// Create `config/` and `frontend/` if missing.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.frontend_dir)?;
        if !self.has_frontend() {
            warn!("No front-end files found in {}", self.frontend_dir.display());
        }
        Ok(())
    }

    /// Whether the front end has at least one HTML page.
    pub fn has_frontend(&self) -> bool {
        std::fs::read_dir(&self.frontend_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.path().extension().is_some_and(|ext| ext == "html"))
            })
            .unwrap_or(false)
    }
}
