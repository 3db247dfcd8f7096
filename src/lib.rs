// lib.rs — DLL entry point for the Vision engine widescreen fix.
//
// When this DLL is loaded into the game, DllMain fires with
// DLL_PROCESS_ATTACH and spawns a worker thread that:
//   1. Sets up logging and loads vision_widescreen.toml (next to the DLL)
//   2. Installs the controllers: window placement, D3D9 device hooks,
//      then SetMode and SetFOV once Vision90.dll is loaded, then configGetInt
//   3. Polls the config file and pushes changes to the controllers
//   4. On DLL_PROCESS_DETACH, removes every hook in reverse order
//
// Must be compiled as a 32-bit cdylib (i686-pc-windows-msvc) for the game.

#![allow(non_snake_case)]

// The hooked engine functions are 32-bit thiscall/fastcall at fixed addresses.
#[cfg(all(windows, not(target_arch = "x86")))]
compile_error!("Build with i686-pc-windows-msvc (32-bit x86).");

pub mod aspect;     // SetFOV hook, Hor+ correction state
pub mod config;     // Settings, snapshot handle, file watcher
pub mod config_int; // configGetInt hook, fps cap / vsync overrides
pub mod d3d9;       // D3D9 ABI: present parameters, method ordinals
pub mod device;     // CreateDevice/Reset hooks, D3D9Ex upgrade
pub mod error;
pub mod hook;       // FunctionHook over MinHook
pub mod logging;
pub mod math;       // FOV trigonometry
pub mod presentation; // Authoritative resolution + listeners
pub mod process;    // Module lookup, checked memory reads (Windows)
pub mod scanner;    // Wildcard signature scanning
pub mod video_mode; // SetMode hook, VVideoConfig view
pub mod vtable;     // D3D9 vtable extraction
pub mod window;     // Game window docking

use aspect::AspectRatioCorrector;
use config::{Config, ConfigHandle};
use config_int::ConfigIntInterceptor;
use device::DeviceResolutionController;
use presentation::{Presentation, Resolution};
use std::sync::Arc;
use std::time::Duration;
use video_mode::EngineVideoModeController;

/// Engine module holding SetMode and SetFOV.
pub const ENGINE_MODULE: &str = "Vision90.dll";

/// How long to wait for ENGINE_MODULE to load before giving up on its hooks.
pub const MODULE_WAIT: Duration = Duration::from_secs(10);

// ============================================================
// Subsystem
// ============================================================

/// Every controller, wired to one config handle and one presentation state.
pub struct Subsystem {
    pub config: ConfigHandle,
    pub presentation: Arc<Presentation>,
    pub video_mode: Arc<EngineVideoModeController>,
    pub aspect: Arc<AspectRatioCorrector>,
    pub device: Arc<DeviceResolutionController>,
    pub config_int: Arc<ConfigIntInterceptor>,
}

impl Subsystem {
    /// `handle_slots` are the (fps limit, vsync) handle addresses.
    pub fn new(config: Config, desktop: fn() -> Resolution, handle_slots: (usize, usize)) -> Self {
        let config = ConfigHandle::new(config);
        let presentation = Arc::new(Presentation::new());

        Self {
            aspect: Arc::new(AspectRatioCorrector::new(config.clone(), presentation.clone())),
            video_mode: Arc::new(EngineVideoModeController::new(config.clone(), presentation.clone())),
            device: Arc::new(DeviceResolutionController::new(config.clone(), presentation.clone(), desktop)),
            config_int: Arc::new(ConfigIntInterceptor::new(config.clone(), handle_slots.0, handle_slots.1)),
            presentation,
            config,
        }
    }

    /// Swap in new settings and let the controllers re-derive their state.
    /// Hooks stay installed; resolution changes wait for the game's next Reset.
    pub fn apply_config(&self, config: Config) {
        tracing::info!("config updated");
        self.config.replace(config);
        self.aspect.on_config_updated();
        self.config_int.on_config_updated();
    }
}

// ============================================================
// DLL Entry (Windows only)
// ============================================================

#[cfg(windows)]
mod entry {
    use super::Subsystem;
    use crate::config::{Config, ConfigWatcher, CONFIG_FILE_NAME};
    use crate::error::Result;
    use crate::{aspect, config_int, device, hook, logging, process, video_mode, window};
    use crate::{ENGINE_MODULE, MODULE_WAIT};
    use std::ptr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use winapi::shared::minwindef::{BOOL, DWORD, HINSTANCE, LPVOID, TRUE};
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::libloaderapi::DisableThreadLibraryCalls;
    use winapi::um::processthreadsapi::CreateThread;
    use winapi::um::winnt::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    /// Keeps the worker thread alive. Cleared on DLL_PROCESS_DETACH.
    static RUNNING: AtomicBool = AtomicBool::new(false);

    const CONFIG_POLL: Duration = Duration::from_millis(250);

    fn report(feature: &str, result: Result<()>) {
        match result {
            Ok(()) => tracing::info!("{feature}: ready"),
            Err(e) => tracing::error!("{feature} disabled: {e}"),
        }
    }

    fn install(subsystem: &Subsystem) {
        let presentation = subsystem.presentation.clone();
        subsystem.presentation.subscribe(move |resolution| {
            window::resize_game_window(resolution.width, resolution.height, presentation.dock());
        });

        report("D3D9 device", device::install(subsystem.device.clone()));

        // SetMode and SetFOV share one wait for the engine module.
        match process::wait_for_module(ENGINE_MODULE, MODULE_WAIT) {
            Some(engine) => {
                report("video mode", video_mode::install(subsystem.video_mode.clone(), &engine));
                report("aspect ratio", aspect::install(subsystem.aspect.clone(), &engine));
            }
            None => tracing::error!(
                "{ENGINE_MODULE} not loaded after {MODULE_WAIT:?}, video mode and aspect ratio disabled"
            ),
        }

        report("fps limit", config_int::install(subsystem.config_int.clone()));
    }

    fn shutdown() {
        config_int::uninstall();
        aspect::uninstall();
        video_mode::uninstall();
        device::uninstall();
        hook::uninitialize();
        tracing::info!("shutdown complete");
    }

    unsafe extern "system" fn worker(_: LPVOID) -> DWORD {
        let dir = process::dll_dir();
        // Nowhere to report a logging failure; carry on without a log.
        let _log = logging::init(&dir).ok();

        let config_path = dir.join(CONFIG_FILE_NAME);
        let config = Config::load(&config_path).unwrap_or_else(|e| {
            tracing::error!("{}: {e}, using defaults", config_path.display());
            Config::default()
        });
        tracing::info!("settings: {config:?}");

        let subsystem = Subsystem::new(
            config,
            window::desktop_resolution,
            (config_int::FPS_LIMIT_SLOT, config_int::VSYNC_SLOT),
        );
        install(&subsystem);

        let mut watcher = ConfigWatcher::new(config_path);
        while RUNNING.load(Ordering::Acquire) {
            std::thread::sleep(CONFIG_POLL);
            match watcher.poll() {
                Ok(Some(config)) => subsystem.apply_config(config),
                Ok(None) => {}
                Err(e) => tracing::warn!("{}: {e}, keeping previous settings", watcher.path().display()),
            }
        }

        shutdown();
        0
    }

    #[no_mangle]
    pub unsafe extern "system" fn DllMain(
        hinst: HINSTANCE,
        reason: DWORD,
        _reserved: LPVOID,
    ) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                DisableThreadLibraryCalls(hinst);
                process::set_dll_hinst(hinst as usize);

                RUNNING.store(true, Ordering::Release);
                let h = CreateThread(
                    ptr::null_mut(), 0, Some(worker),
                    ptr::null_mut(), 0, ptr::null_mut(),
                );
                if !h.is_null() {
                    CloseHandle(h);
                }
            }
            DLL_PROCESS_DETACH => {
                RUNNING.store(false, Ordering::Release);
            }
            _ => {}
        }
        TRUE
    }
}
