// aspect.rs — Hor+ field-of-view correction on the engine's SetFOV.
//
// VisRenderContext_cl::SetFOV(fov, fov2) is hooked inside Vision90.dll and
// its first argument is widened for the current aspect ratio before the
// original runs (see math.rs). The multiplier is read from the published
// presentation state; the additive offset and the on/off switch follow the
// config.
//
// Flow:
//   install()   -> locate SetFOV -> hook it (thiscall) -> activate
//   detour()    -> corrector.correct(fov) -> original SetFOV
//   uninstall() -> disable (trampoline freed at MinHook shutdown)

use crate::config::ConfigHandle;
use crate::math::correct_fov;
use crate::presentation::Presentation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Inputs of the correction, all updated independently.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FovCorrection {
    pub multiplier: f32,
    pub additional_fov: f32,
    pub enabled: bool,
}

/// Config-driven half of the correction; the multiplier lives in Presentation.
#[derive(Clone, Copy, Debug)]
struct Settings {
    additional_fov: f32,
    enabled: bool,
}

pub struct AspectRatioCorrector {
    config: ConfigHandle,
    presentation: Arc<Presentation>,
    settings: Mutex<Settings>,
}

impl AspectRatioCorrector {
    pub fn new(config: ConfigHandle, presentation: Arc<Presentation>) -> Self {
        let snapshot = config.snapshot();
        let settings = Settings {
            additional_fov: snapshot.additional_fov,
            enabled: snapshot.enable_aspect_fix,
        };
        Self { config, presentation, settings: Mutex::new(settings) }
    }

    pub fn state(&self) -> FovCorrection {
        let settings = *self.settings.lock();
        FovCorrection {
            multiplier: self.presentation.aspect_multiplier(),
            additional_fov: settings.additional_fov,
            enabled: settings.enabled,
        }
    }

    /// Pick up a changed offset or enable flag.
    pub fn on_config_updated(&self) {
        let config = self.config.snapshot();
        let mut settings = self.settings.lock();
        settings.additional_fov = config.additional_fov;
        settings.enabled = config.enable_aspect_fix;
        tracing::info!(
            "aspect fix {}, additional fov {:+.1}",
            if settings.enabled { "on" } else { "off" },
            settings.additional_fov,
        );
    }

    /// FOV to hand to the original SetFOV for an incoming value.
    pub fn correct(&self, degrees: f32) -> f32 {
        let state = self.state();
        if !state.enabled {
            return degrees;
        }
        correct_fov(degrees, state.multiplier, state.additional_fov)
    }
}

// ============================================================
// SetFOV Hook (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{install, uninstall};

#[cfg(windows)]
mod native {
    use super::AspectRatioCorrector;
    use crate::error::Result;
    use crate::hook::{Hook, MinHook};
    use crate::process::ModuleRange;
    use crate::scanner::{locate, Signature};
    use crate::ENGINE_MODULE;
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::ffi::c_void;
    use std::sync::Arc;

    /// Preceded by one INT3 padding byte.
    const SET_FOV_SIGNATURE: &str = "CC F3 0F 10 44 ?? ?? ?? ?? ?? ?? ?? ?? F3 0F 11 86 ?? ?? ?? ?? F3 0F 10 ?? ?? ?? F3 0F 11 86";

    /// void __thiscall VisRenderContext_cl::SetFOV(float fov, float fov2)
    type SetFovFn = unsafe extern "thiscall" fn(this: *mut c_void, fov: f32, fov2: f32);

    static CORRECTOR: OnceCell<Arc<AspectRatioCorrector>> = OnceCell::new();
    static ORIGINAL: OnceCell<SetFovFn> = OnceCell::new();
    static HOOK: Mutex<Option<Hook<SetFovFn>>> = Mutex::new(None);

    /// Find and hook SetFOV. Skipped (Ok) when the fix is disabled at startup.
    pub fn install(corrector: Arc<AspectRatioCorrector>, engine: &ModuleRange) -> Result<()> {
        if !corrector.state().enabled {
            tracing::info!("aspect ratio fix disabled in config, SetFOV not hooked");
            return Ok(());
        }

        let signature = Signature::parse("SetFOV", ENGINE_MODULE, SET_FOV_SIGNATURE)?;
        let entry = locate(engine, &signature)? + 1;

        let _ = CORRECTOR.set(corrector);
        let hook = unsafe { MinHook::install(entry, detour as SetFovFn)? };
        let _ = ORIGINAL.set(hook.original());
        if let Err(e) = hook.activate() {
            let _ = hook.remove();
            return Err(e);
        }
        *HOOK.lock() = Some(hook);

        tracing::info!("SetFOV hooked at {entry:#X}");
        Ok(())
    }

    pub fn uninstall() {
        if HOOK.lock().take().is_some() {
            tracing::info!("SetFOV unhooked");
        }
    }

    unsafe extern "thiscall" fn detour(this: *mut c_void, fov: f32, fov2: f32) {
        let corrected = std::panic::catch_unwind(|| {
            CORRECTOR.get().map_or(fov, |corrector| corrector.correct(fov))
        })
        .unwrap_or(fov);

        tracing::trace!("SetFOV {fov:.2} -> {corrected:.2}");
        if let Some(original) = ORIGINAL.get() {
            original(this, corrected, fov2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::presentation::Resolution;

    struct Fixture {
        corrector: AspectRatioCorrector,
        config: ConfigHandle,
        presentation: Arc<Presentation>,
    }

    impl Fixture {
        fn new(config: Config) -> Self {
            let config = ConfigHandle::new(config);
            let presentation = Arc::new(Presentation::new());
            let corrector = AspectRatioCorrector::new(config.clone(), presentation.clone());
            Self { corrector, config, presentation }
        }

        fn apply(&self, width: i32, height: i32) {
            self.presentation.publish(Resolution::new(width, height), &self.config.snapshot());
        }
    }

    #[test]
    fn starts_as_identity() {
        let f = Fixture::new(Config::default());
        assert_eq!(f.corrector.state().multiplier, 1.0);
        assert!((f.corrector.correct(85.0) - 85.0).abs() < 1e-4);
    }

    #[test]
    fn follows_published_resolution() {
        let f = Fixture::new(Config::default());
        f.apply(3840, 1080);
        assert!((f.corrector.state().multiplier - 2.0).abs() < 1e-5);
        assert!((f.corrector.correct(85.0) - 122.76).abs() < 0.01);

        f.apply(1920, 1080);
        assert!((f.corrector.correct(85.0) - 85.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_resolution_keeps_previous_multiplier() {
        let f = Fixture::new(Config::default());
        f.apply(3840, 1080);
        f.apply(0, 0);
        assert!((f.corrector.state().multiplier - 2.0).abs() < 1e-5);
    }

    #[test]
    fn config_update_applies_offset_and_toggle() {
        let f = Fixture::new(Config::default());
        let (c, handle) = (&f.corrector, &f.config);
        f.apply(3840, 1080);

        handle.replace(Config { additional_fov: 5.0, ..Config::default() });
        c.on_config_updated();
        assert_eq!(c.state().additional_fov, 5.0);
        assert!((c.correct(80.0) - 122.76).abs() < 0.01);

        handle.replace(Config { enable_aspect_fix: false, ..Config::default() });
        c.on_config_updated();
        assert_eq!(c.correct(80.0), 80.0);
    }

    #[test]
    fn disabled_at_construction_passes_through() {
        let f = Fixture::new(Config { enable_aspect_fix: false, ..Config::default() });
        f.apply(2560, 1080);
        assert_eq!(f.corrector.correct(70.0), 70.0);
    }
}
