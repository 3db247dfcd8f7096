// presentation.rs — The single authoritative render-resolution state.
//
// Two unsynchronized code paths decide the resolution: the engine's
// SetMode (video_mode.rs) and the D3D9 CreateDevice/Reset calls (device.rs).
// Both apply the same policy and publish here; listeners (the FOV corrector
// and the window collaborator) are told about every published resolution.

use crate::config::{Config, DockPosition};
use crate::math::aspect_multiplier;
use parking_lot::RwLock;

/// Width / height of the aspect ratio the game was authored for.
pub const REFERENCE_ASPECT: f32 = 16.0 / 9.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Resolution {
    pub const fn new(width: i32, height: i32) -> Self { Self { width, height } }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution policy shared by both hook sites: the configured size when
/// the override is on and both sides are positive, otherwise the desktop.
pub fn target_resolution(config: &Config, desktop: Resolution) -> Resolution {
    match config.resolution_override() {
        Some((width, height)) => Resolution::new(width, height),
        None => desktop,
    }
}

// ============================================================
// State
// ============================================================

/// What the last successful mode change applied. The vsync flag and fps
/// cap are not copied here: configGetInt reads them from the live config.
#[derive(Clone, Debug, PartialEq)]
pub struct PresentationState {
    pub resolution: Option<Resolution>,
    /// Applied aspect ratio over REFERENCE_ASPECT; read by the FOV corrector.
    pub aspect_multiplier: f32,
    /// Where the window collaborator docks the game window.
    pub dock: DockPosition,
    /// Focus window of the upgraded device, once one exists.
    pub window: Option<usize>,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            resolution: None,
            aspect_multiplier: 1.0,
            dock: DockPosition::Center,
            window: None,
        }
    }
}

type Listener = Box<dyn Fn(Resolution) + Send + Sync>;

/// PresentationState plus the resolution-changed listeners.
#[derive(Default)]
pub struct Presentation {
    state: RwLock<PresentationState>,
    listeners: RwLock<Vec<Listener>>,
}

impl Presentation {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe(&self, listener: impl Fn(Resolution) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn state(&self) -> PresentationState {
        self.state.read().clone()
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.state.read().resolution
    }

    pub fn aspect_multiplier(&self) -> f32 {
        self.state.read().aspect_multiplier
    }

    pub fn dock(&self) -> DockPosition {
        self.state.read().dock
    }

    pub fn set_window(&self, window: usize) {
        self.state.write().window = Some(window);
    }

    /// Record `resolution` as applied and notify every listener.
    ///
    /// Callers decide whether a publish is warranted (e.g. Reset only
    /// publishes when the size actually changed). A degenerate size keeps
    /// the previous multiplier.
    pub fn publish(&self, resolution: Resolution, config: &Config) {
        {
            let mut state = self.state.write();
            state.resolution = Some(resolution);
            state.dock = config.dock_position;
            match aspect_multiplier(resolution.width, resolution.height) {
                Some(multiplier) => state.aspect_multiplier = multiplier,
                None => tracing::warn!("degenerate resolution {resolution}, aspect multiplier kept"),
            }
        }
        tracing::info!("resolution applied: {resolution}");

        // Listeners run outside the state lock so they may read it.
        for listener in self.listeners.read().iter() {
            listener(resolution);
        }
    }
}
