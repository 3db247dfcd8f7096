// config.rs — User settings, the shared snapshot handle, and the file watcher.
//
// Settings live in `vision_widescreen.toml` next to the DLL. Controllers never
// read a global: each one is handed a ConfigHandle at construction and takes
// a snapshot (an Arc<Config>) at the start of every hook invocation, so a
// reload in the middle of a call cannot tear the values it sees.

use crate::error::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub const CONFIG_FILE_NAME: &str = "vision_widescreen.toml";

const MIN_ADDITIONAL_FOV: f32 = -20.0;
const MAX_ADDITIONAL_FOV: f32 = 35.0;

// ============================================================
// Settings
// ============================================================

/// Where the game window is placed on the desktop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum DockPosition {
    #[default]
    Center,
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Render at `width` x `height` instead of the game's own choice.
    pub override_resolution: bool,
    /// 0 = desktop width.
    pub width: i32,
    /// 0 = desktop height.
    pub height: i32,
    pub dock_position: DockPosition,

    /// Replace the game's frame-rate cap and vsync settings.
    pub override_fps_limit: bool,
    pub vsync: bool,
    /// <= 0 = uncapped.
    pub fps_limit: i32,

    /// Hor+ field-of-view correction for non-16:9 displays.
    pub enable_aspect_fix: bool,
    /// Degrees added to the game's FOV before correction.
    pub additional_fov: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            override_resolution: true,
            width: 0,
            height: 0,
            dock_position: DockPosition::Center,
            override_fps_limit: true,
            vsync: true,
            fps_limit: 0,
            enable_aspect_fix: true,
            additional_fov: 0.0,
        }
    }
}

impl Config {
    /// Parse settings from TOML text. Out-of-range values are clamped.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn normalize(&mut self) {
        if !self.additional_fov.is_finite() {
            self.additional_fov = 0.0;
        }
        self.additional_fov = self.additional_fov.clamp(MIN_ADDITIONAL_FOV, MAX_ADDITIONAL_FOV);
    }

    /// The configured resolution, if the override is on and both sides are positive.
    pub fn resolution_override(&self) -> Option<(i32, i32)> {
        (self.override_resolution && self.width > 0 && self.height > 0)
            .then_some((self.width, self.height))
    }
}

// ============================================================
// Snapshot Handle
// ============================================================

/// Cloneable, thread-safe handle to the current settings.
#[derive(Clone, Debug)]
pub struct ConfigHandle(Arc<RwLock<Arc<Config>>>);

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(config))))
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.0.read().clone()
    }

    pub fn replace(&self, config: Config) {
        *self.0.write() = Arc::new(config);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self { Self::new(Config::default()) }
}

// ============================================================
// File Watcher
// ============================================================

/// Detects edits to the config file by modification time.
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: PathBuf) -> Self {
        let last_modified = modified(&path);
        Self { path, last_modified }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Reload the file if it changed since the last poll.
    ///
    /// Returns Ok(None) when nothing changed. A file that disappears is
    /// treated as a change back to defaults.
    pub fn poll(&mut self) -> Result<Option<Config>> {
        let current = modified(&self.path);
        if current == self.last_modified {
            return Ok(None);
        }
        self.last_modified = current;
        Config::load(&self.path).map(Some)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
