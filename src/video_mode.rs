// video_mode.rs — Resolution override at engine bring-up (VisVideo_cl::SetMode).
//
// SetMode receives the engine's VVideoConfig before any D3D device exists.
// We rewrite its width/height to the configured size, clear the fullscreen
// flag (the D3D9Ex device only runs windowed), let the original run, and on
// success publish the resolution that was actually applied.

use crate::config::ConfigHandle;
use crate::presentation::{Presentation, Resolution};
use std::sync::Arc;

// ============================================================
// VVideoConfig Layout
// ============================================================

// Field offsets inside VVideoConfig for this engine build.
const OFFSET_WIDTH: usize = 0x08;
const OFFSET_HEIGHT: usize = 0x0C;
const OFFSET_REFRESH_RATE: usize = 0x10;
const OFFSET_BPP: usize = 0x1C;
const OFFSET_FULLSCREEN: usize = 0x48;

/// Bytes of VVideoConfig covered by the view.
pub const VIDEO_CONFIG_LEN: usize = OFFSET_FULLSCREEN + 1;

/// Typed access to a VVideoConfig record. All offset arithmetic lives here.
pub struct VideoConfigView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> VideoConfigView<'a> {
    /// None if `bytes` is shorter than the record.
    pub fn new(bytes: &'a mut [u8]) -> Option<Self> {
        (bytes.len() >= VIDEO_CONFIG_LEN).then_some(Self { bytes })
    }

    fn read_i32(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        i32::from_le_bytes(raw)
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn width(&self) -> i32 { self.read_i32(OFFSET_WIDTH) }
    pub fn height(&self) -> i32 { self.read_i32(OFFSET_HEIGHT) }
    pub fn refresh_rate(&self) -> i32 { self.read_i32(OFFSET_REFRESH_RATE) }
    pub fn bpp(&self) -> i32 { self.read_i32(OFFSET_BPP) }
    pub fn fullscreen(&self) -> bool { self.bytes[OFFSET_FULLSCREEN] != 0 }

    pub fn resolution(&self) -> Resolution { Resolution::new(self.width(), self.height()) }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.write_i32(OFFSET_WIDTH, resolution.width);
        self.write_i32(OFFSET_HEIGHT, resolution.height);
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.bytes[OFFSET_FULLSCREEN] = fullscreen as u8;
    }
}

// ============================================================
// Controller
// ============================================================

pub struct EngineVideoModeController {
    config: ConfigHandle,
    presentation: Arc<Presentation>,
}

impl EngineVideoModeController {
    pub fn new(config: ConfigHandle, presentation: Arc<Presentation>) -> Self {
        Self { config, presentation }
    }

    /// Rewrite the record before the original SetMode runs. Returns the
    /// resolution SetMode will apply.
    pub fn before_set_mode(&self, view: &mut VideoConfigView<'_>) -> Resolution {
        let config = self.config.snapshot();
        let original = view.resolution();
        tracing::info!(
            "SetMode: {original} {}bpp {}Hz fullscreen={}",
            view.bpp(), view.refresh_rate(), view.fullscreen()
        );

        let target = match config.resolution_override() {
            Some((width, height)) => {
                let target = Resolution::new(width, height);
                tracing::info!("SetMode: overriding to {target}");
                view.set_resolution(target);
                target
            }
            None => original,
        };

        if view.fullscreen() {
            tracing::info!("SetMode: forcing windowed mode");
        }
        view.set_fullscreen(false);
        target
    }

    /// Publish `applied` if SetMode reported success (nonzero).
    pub fn after_set_mode(&self, applied: Resolution, result: i32) {
        tracing::info!("SetMode returned {result}");
        if result != 0 {
            self.presentation.publish(applied, &self.config.snapshot());
        }
    }
}

// ============================================================
// SetMode Hook (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{install, uninstall};

#[cfg(windows)]
mod native {
    use super::{EngineVideoModeController, VideoConfigView, VIDEO_CONFIG_LEN};
    use crate::error::Result;
    use crate::hook::{Hook, MinHook};
    use crate::process::ModuleRange;
    use crate::scanner::{locate, Signature};
    use crate::ENGINE_MODULE;
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::ffi::c_void;
    use std::panic::AssertUnwindSafe;
    use std::sync::Arc;

    const SET_MODE_SIGNATURE: &str = "6A ?? 68 ?? ?? ?? ?? 64 A1 ?? ?? ?? ?? 50 83 EC ?? 53 55 56 57 A1 ?? ?? ?? ?? 33 C4 50 8D 44 24 ?? 64 A3 ?? ?? ?? ?? 8B F1 8B 7C 24";

    /// int __thiscall VisVideo_cl::SetMode(VVideoConfig* config)
    type SetModeFn = unsafe extern "thiscall" fn(this: *mut c_void, config: *mut c_void) -> i32;

    static CONTROLLER: OnceCell<Arc<EngineVideoModeController>> = OnceCell::new();
    static ORIGINAL: OnceCell<SetModeFn> = OnceCell::new();
    static HOOK: Mutex<Option<Hook<SetModeFn>>> = Mutex::new(None);

    /// Find and hook SetMode in the loaded engine module.
    pub fn install(controller: Arc<EngineVideoModeController>, engine: &ModuleRange) -> Result<()> {
        let signature = Signature::parse("SetMode", ENGINE_MODULE, SET_MODE_SIGNATURE)?;
        let entry = locate(engine, &signature)?;

        let _ = CONTROLLER.set(controller);
        let hook = unsafe { MinHook::install(entry, detour as SetModeFn)? };
        let _ = ORIGINAL.set(hook.original());
        if let Err(e) = hook.activate() {
            let _ = hook.remove();
            return Err(e);
        }
        *HOOK.lock() = Some(hook);

        tracing::info!("SetMode hooked at {entry:#X}");
        Ok(())
    }

    pub fn uninstall() {
        if HOOK.lock().take().is_some() {
            tracing::info!("SetMode unhooked");
        }
    }

    unsafe extern "thiscall" fn detour(this: *mut c_void, config: *mut c_void) -> i32 {
        let Some(original) = ORIGINAL.get().copied() else { return 0 };

        let applied = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let controller = CONTROLLER.get()?;
            if config.is_null() { return None; }
            let bytes = std::slice::from_raw_parts_mut(config as *mut u8, VIDEO_CONFIG_LEN);
            let mut view = VideoConfigView::new(bytes)?;
            Some(controller.before_set_mode(&mut view))
        }))
        .ok()
        .flatten();

        let result = original(this, config);

        if let (Some(applied), Some(controller)) = (applied, CONTROLLER.get()) {
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| {
                controller.after_set_mode(applied, result)
            }));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use parking_lot::Mutex;

    fn record(width: i32, height: i32, fullscreen: bool) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x50];
        bytes[0x08..0x0C].copy_from_slice(&width.to_le_bytes());
        bytes[0x0C..0x10].copy_from_slice(&height.to_le_bytes());
        bytes[0x10..0x14].copy_from_slice(&60i32.to_le_bytes());
        bytes[0x1C..0x20].copy_from_slice(&32i32.to_le_bytes());
        bytes[0x48] = fullscreen as u8;
        bytes
    }

    fn controller(config: Config) -> (EngineVideoModeController, Arc<Mutex<Vec<Resolution>>>) {
        let presentation = Arc::new(Presentation::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        presentation.subscribe(move |res| sink.lock().push(res));
        (EngineVideoModeController::new(ConfigHandle::new(config), presentation), seen)
    }

    #[test]
    fn view_reads_documented_offsets() {
        let mut bytes = record(1280, 720, true);
        let view = VideoConfigView::new(&mut bytes).unwrap();
        assert_eq!(view.resolution(), Resolution::new(1280, 720));
        assert_eq!(view.refresh_rate(), 60);
        assert_eq!(view.bpp(), 32);
        assert!(view.fullscreen());
    }

    #[test]
    fn view_rejects_short_buffer() {
        let mut bytes = vec![0u8; VIDEO_CONFIG_LEN - 1];
        assert!(VideoConfigView::new(&mut bytes).is_none());
    }

    #[test]
    fn override_rewrites_size_and_clears_fullscreen() {
        let config = Config { width: 3440, height: 1440, ..Config::default() };
        let (c, seen) = controller(config);
        let mut bytes = record(1280, 720, true);

        let mut view = VideoConfigView::new(&mut bytes).unwrap();
        let applied = c.before_set_mode(&mut view);
        assert_eq!(applied, Resolution::new(3440, 1440));
        assert_eq!(view.resolution(), applied);
        assert!(!view.fullscreen());
        // Other fields untouched.
        assert_eq!(view.bpp(), 32);
        assert_eq!(view.refresh_rate(), 60);

        c.after_set_mode(applied, 1);
        assert_eq!(*seen.lock(), vec![Resolution::new(3440, 1440)]);
    }

    #[test]
    fn without_override_keeps_original_size() {
        let config = Config { override_resolution: false, width: 3440, height: 1440, ..Config::default() };
        let (c, seen) = controller(config);
        let mut bytes = record(1280, 720, true);

        let mut view = VideoConfigView::new(&mut bytes).unwrap();
        let applied = c.before_set_mode(&mut view);
        assert_eq!(applied, Resolution::new(1280, 720));
        assert!(!view.fullscreen());

        c.after_set_mode(applied, 1);
        assert_eq!(*seen.lock(), vec![Resolution::new(1280, 720)]);
    }

    #[test]
    fn zero_configured_size_keeps_original() {
        let (c, _) = controller(Config::default());
        let mut bytes = record(1600, 900, false);
        let mut view = VideoConfigView::new(&mut bytes).unwrap();
        assert_eq!(c.before_set_mode(&mut view), Resolution::new(1600, 900));
    }

    #[test]
    fn failed_set_mode_publishes_nothing() {
        let (c, seen) = controller(Config { width: 2560, height: 1080, ..Config::default() });
        c.after_set_mode(Resolution::new(2560, 1080), 0);
        assert!(seen.lock().is_empty());
    }
}
