// device.rs — D3D9 device creation/reset interception and the D3D9Ex upgrade.
//
// IDirect3D9::CreateDevice is answered with an IDirect3DDevice9Ex created
// from our own IDirect3D9Ex factory, using rewritten present parameters
// (target size, windowed, FLIPEX). Reset on that device gets the same
// rewrite. D3D9Ex has no MANAGED pool, so the three resource-creation
// methods move MANAGED requests to DEFAULT + DYNAMIC.
//
// Flow:
//   install()      -> extract vtables -> hook CreateDevice, Reset,
//                     CreateTexture, CreateVertexBuffer, CreateIndexBuffer
//   CreateDevice   -> create_device: prepare_create -> CreateDeviceEx ->
//                     device_created (any failure: restore the request,
//                     call the original)
//   Reset          -> reset: prepare_reset (ours only) -> original ->
//                     reset_completed
//   uninstall()    -> disable hooks in reverse order -> release the factory

use crate::config::{Config, ConfigHandle};
use crate::d3d9::{
    PresentParameters, D3DCREATE_HARDWARE_VERTEXPROCESSING, D3DCREATE_SOFTWARE_VERTEXPROCESSING,
    D3DMULTISAMPLE_NONE, D3DPOOL_DEFAULT, D3DPOOL_MANAGED, D3DPRESENT_INTERVAL_IMMEDIATE,
    D3DPRESENT_INTERVAL_ONE, D3DSWAPEFFECT_FLIPEX, D3DUSAGE_DYNAMIC, D3D_OK, FLIPEX_BACK_BUFFERS,
};
use crate::error::Result;
use crate::presentation::{target_resolution, Presentation, Resolution};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

// ============================================================
// Parameter Rewrites
// ============================================================

/// Present parameters for a windowed D3D9Ex device at `target`.
///
/// The presentation interval is only touched when the FPS override is on.
pub fn apply_present_parameters(pp: &mut PresentParameters, target: Resolution, config: &Config) {
    pp.back_buffer_width = target.width.max(0) as u32;
    pp.back_buffer_height = target.height.max(0) as u32;
    pp.windowed = 1;
    pp.swap_effect = D3DSWAPEFFECT_FLIPEX;
    pp.back_buffer_count = FLIPEX_BACK_BUFFERS;
    pp.multi_sample_type = D3DMULTISAMPLE_NONE;
    pp.multi_sample_quality = 0;

    if config.override_fps_limit {
        pp.presentation_interval = if config.vsync {
            D3DPRESENT_INTERVAL_ONE
        } else {
            D3DPRESENT_INTERVAL_IMMEDIATE
        };
    }
}

/// Request hardware vertex processing unless a mode was already chosen.
pub fn ensure_vertex_processing(behavior_flags: u32) -> u32 {
    let chosen = D3DCREATE_HARDWARE_VERTEXPROCESSING | D3DCREATE_SOFTWARE_VERTEXPROCESSING;
    if behavior_flags & chosen == 0 {
        behavior_flags | D3DCREATE_HARDWARE_VERTEXPROCESSING
    } else {
        behavior_flags
    }
}

/// Move a MANAGED resource to DEFAULT + DYNAMIC; anything else is unchanged.
pub fn translate_pool(usage: u32, pool: u32) -> (u32, u32) {
    if pool == D3DPOOL_MANAGED {
        (usage | D3DUSAGE_DYNAMIC, D3DPOOL_DEFAULT)
    } else {
        (usage, pool)
    }
}

// ============================================================
// Device Tracking
// ============================================================

/// The upgraded device we created and the resolution last applied to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceTracker {
    device: Option<usize>,
    current: Option<Resolution>,
}

impl DeviceTracker {
    pub fn owns(&self, device: usize) -> bool {
        self.device == Some(device)
    }

    pub fn current(&self) -> Option<Resolution> { self.current }
}

pub struct DeviceResolutionController {
    config: ConfigHandle,
    presentation: Arc<Presentation>,
    tracker: Mutex<DeviceTracker>,
    desktop: fn() -> Resolution,
}

impl DeviceResolutionController {
    /// `desktop` reports the display resolution used when no override applies.
    pub fn new(config: ConfigHandle, presentation: Arc<Presentation>, desktop: fn() -> Resolution) -> Self {
        Self { config, presentation, tracker: Mutex::new(DeviceTracker::default()), desktop }
    }

    pub fn tracker(&self) -> DeviceTracker { *self.tracker.lock() }

    fn target(&self, config: &Config) -> Resolution {
        target_resolution(config, (self.desktop)())
    }

    /// Rewrite a CreateDevice request for the upgraded device. Returns the
    /// target resolution and the behavior flags to create with.
    pub fn prepare_create(&self, pp: &mut PresentParameters, behavior_flags: u32) -> (Resolution, u32) {
        let config = self.config.snapshot();
        let target = self.target(&config);
        tracing::info!("CreateDevice intercepted, target resolution {target}");

        apply_present_parameters(pp, target, &config);
        (target, ensure_vertex_processing(behavior_flags))
    }

    /// Record `device` as ours and publish its resolution.
    pub fn device_created(&self, device: usize, resolution: Resolution, focus_window: usize) {
        *self.tracker.lock() = DeviceTracker { device: Some(device), current: Some(resolution) };
        tracing::info!("D3D9Ex device {device:#X} created at {resolution}");
        if focus_window != 0 {
            self.presentation.set_window(focus_window);
        }
        self.presentation.publish(resolution, &self.config.snapshot());
    }

    /// Answer a CreateDevice call.
    ///
    /// `upgrade` gets the rewritten parameters and flags and returns the new
    /// device. If it fails (or panics), `pp` is restored to the game's
    /// request and `original` is called with the game's flags.
    pub fn create_device(
        &self,
        pp: &mut PresentParameters,
        behavior_flags: u32,
        focus_window: usize,
        upgrade: impl FnOnce(&mut PresentParameters, u32) -> Result<usize>,
        original: impl FnOnce(&mut PresentParameters, u32) -> i32,
    ) -> i32 {
        let requested = *pp;
        let upgraded = catch_unwind(AssertUnwindSafe(|| {
            let (target, flags) = self.prepare_create(pp, behavior_flags);
            match upgrade(pp, flags) {
                Ok(device) => {
                    self.device_created(device, target, focus_window);
                    true
                }
                Err(e) => {
                    tracing::warn!("{e}, falling back to the original CreateDevice");
                    false
                }
            }
        }));

        if let Ok(true) = upgraded {
            return D3D_OK;
        }
        *pp = requested;
        original(pp, behavior_flags)
    }

    /// Rewrite a Reset request. None means the device is not ours and the
    /// call must go through untouched.
    pub fn prepare_reset(&self, device: usize, pp: &mut PresentParameters) -> Option<Resolution> {
        if !self.tracker.lock().owns(device) {
            return None;
        }
        let config = self.config.snapshot();
        let target = self.target(&config);
        tracing::info!("Reset intercepted, resolution {target}");
        apply_present_parameters(pp, target, &config);
        Some(target)
    }

    /// Commit a Reset of our device; publishes only a successful change.
    pub fn reset_completed(&self, target: Resolution, hr: i32) {
        if hr != D3D_OK {
            tracing::warn!("Reset to {target} failed with HRESULT {:#010X}", hr as u32);
            return;
        }
        let changed = {
            let mut tracker = self.tracker.lock();
            let changed = tracker.current != Some(target);
            tracker.current = Some(target);
            changed
        };
        if changed {
            self.presentation.publish(target, &self.config.snapshot());
        }
    }

    /// Answer a Reset call: rewrite it if `device` is ours, always run
    /// `original`, then commit the result.
    pub fn reset(
        &self,
        device: usize,
        pp: &mut PresentParameters,
        original: impl FnOnce(&mut PresentParameters) -> i32,
    ) -> i32 {
        let target = catch_unwind(AssertUnwindSafe(|| self.prepare_reset(device, pp)))
            .ok()
            .flatten();

        let hr = original(pp);
        if let Some(target) = target {
            let _ = catch_unwind(AssertUnwindSafe(|| self.reset_completed(target, hr)));
        }
        hr
    }

    /// Drop ownership of the device (shutdown).
    pub fn forget_device(&self) {
        *self.tracker.lock() = DeviceTracker::default();
    }
}

// ============================================================
// D3D9 Hooks (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{install, uninstall};

#[cfg(windows)]
mod native {
    use super::{translate_pool, DeviceResolutionController};
    use crate::d3d9::{
        CreateDeviceFn, CreateIndexBufferFn, CreateTextureFn, CreateVertexBufferFn,
        Device9Method, Direct3D9Method, PresentParameters, ResetFn, D3DERR_INVALIDCALL,
        D3D_SDK_VERSION,
    };
    use crate::error::{Error, Result};
    use crate::hook::Hook;
    use crate::vtable;
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::Arc;
    use winapi::shared::d3d9::{Direct3DCreate9Ex, IDirect3D9Ex, IDirect3DDevice9Ex};
    use winapi::shared::d3d9types::D3DPRESENT_PARAMETERS;
    use winapi::shared::winerror::FAILED;

    /// Trampolines into the original D3D9 methods.
    struct Originals {
        create_device: CreateDeviceFn,
        reset: ResetFn,
        create_texture: CreateTextureFn,
        create_vertex_buffer: CreateVertexBufferFn,
        create_index_buffer: CreateIndexBufferFn,
    }

    struct Hooks {
        create_device: Hook<CreateDeviceFn>,
        reset: Hook<ResetFn>,
        create_texture: Hook<CreateTextureFn>,
        create_vertex_buffer: Hook<CreateVertexBufferFn>,
        create_index_buffer: Hook<CreateIndexBufferFn>,
    }

    impl Hooks {
        fn activate(&self) -> Result<()> {
            self.create_device.activate()?;
            self.reset.activate()?;
            self.create_texture.activate()?;
            self.create_vertex_buffer.activate()?;
            self.create_index_buffer.activate()
        }

        /// Disable in reverse order of installation. The trampolines stay
        /// until MinHook shuts down.
        fn disable(self) {
            let Hooks { create_device, reset, create_texture, create_vertex_buffer, create_index_buffer } = self;
            drop(create_index_buffer);
            drop(create_vertex_buffer);
            drop(create_texture);
            drop(reset);
            drop(create_device);
        }
    }

    /// Our IDirect3D9Ex reference; the game owns the devices made from it.
    struct Factory(*mut IDirect3D9Ex);

    // Only touched under the FACTORY lock.
    unsafe impl Send for Factory {}

    impl Drop for Factory {
        fn drop(&mut self) {
            unsafe { (*self.0).Release(); }
        }
    }

    static CONTROLLER: OnceCell<Arc<DeviceResolutionController>> = OnceCell::new();
    static ORIGINALS: OnceCell<Originals> = OnceCell::new();
    static HOOKS: Mutex<Option<Hooks>> = Mutex::new(None);
    static FACTORY: Mutex<Option<Factory>> = Mutex::new(None);

    /// Extract the D3D9 vtables and hook device creation, reset and the
    /// resource-pool methods. Any failure leaves nothing hooked.
    pub fn install(controller: Arc<DeviceResolutionController>) -> Result<()> {
        let tables = vtable::extract()?;

        let hooks = unsafe {
            Hooks {
                create_device: tables.direct3d9.hook(
                    Direct3D9Method::CreateDevice, create_device_detour as CreateDeviceFn)?,
                reset: tables.device.hook(Device9Method::Reset, reset_detour as ResetFn)?,
                create_texture: tables.device.hook(
                    Device9Method::CreateTexture, create_texture_detour as CreateTextureFn)?,
                create_vertex_buffer: tables.device.hook(
                    Device9Method::CreateVertexBuffer, create_vertex_buffer_detour as CreateVertexBufferFn)?,
                create_index_buffer: tables.device.hook(
                    Device9Method::CreateIndexBuffer, create_index_buffer_detour as CreateIndexBufferFn)?,
            }
        };

        let _ = CONTROLLER.set(controller);
        let _ = ORIGINALS.set(Originals {
            create_device: hooks.create_device.original(),
            reset: hooks.reset.original(),
            create_texture: hooks.create_texture.original(),
            create_vertex_buffer: hooks.create_vertex_buffer.original(),
            create_index_buffer: hooks.create_index_buffer.original(),
        });

        hooks.activate()?;
        *HOOKS.lock() = Some(hooks);
        tracing::info!("D3D9 device hooks installed");
        Ok(())
    }

    /// Unhook everything, then release our D3D9Ex factory.
    pub fn uninstall() {
        if let Some(hooks) = HOOKS.lock().take() {
            hooks.disable();
            tracing::info!("D3D9 device hooks disabled");
        }
        if let Some(controller) = CONTROLLER.get() {
            controller.forget_device();
        }
        if FACTORY.lock().take().is_some() {
            tracing::info!("D3D9Ex factory released");
        }
    }

    // ------------------------------------------------------------
    // Upgraded device creation
    // ------------------------------------------------------------

    unsafe fn create_upgraded(
        adapter: u32,
        device_type: u32,
        focus_window: *mut c_void,
        behavior_flags: u32,
        pp: &mut PresentParameters,
    ) -> Result<*mut IDirect3DDevice9Ex> {
        let mut factory = FACTORY.lock();
        if factory.is_none() {
            let mut raw: *mut IDirect3D9Ex = ptr::null_mut();
            let hr = Direct3DCreate9Ex(D3D_SDK_VERSION, &mut raw);
            if FAILED(hr) || raw.is_null() {
                return Err(Error::Direct3D { call: "Direct3DCreate9Ex", hr: hr as u32 });
            }
            *factory = Some(Factory(raw));
        }
        let Some(d3d) = factory.as_ref().map(|f| f.0) else {
            return Err(Error::Direct3D { call: "Direct3DCreate9Ex", hr: D3DERR_INVALIDCALL as u32 });
        };

        let mut device: *mut IDirect3DDevice9Ex = ptr::null_mut();
        let hr = (*d3d).CreateDeviceEx(
            adapter, device_type, focus_window as _, behavior_flags,
            pp as *mut PresentParameters as *mut D3DPRESENT_PARAMETERS, ptr::null_mut(), &mut device,
        );
        if FAILED(hr) || device.is_null() {
            // Nothing was created from it; don't keep the factory around.
            factory.take();
            return Err(Error::Direct3D { call: "CreateDeviceEx", hr: hr as u32 });
        }
        Ok(device)
    }

    // ------------------------------------------------------------
    // Detours
    // ------------------------------------------------------------

    unsafe extern "system" fn create_device_detour(
        this: *mut c_void,
        adapter: u32,
        device_type: u32,
        focus_window: *mut c_void,
        behavior_flags: u32,
        params: *mut PresentParameters,
        returned_device: *mut *mut c_void,
    ) -> i32 {
        let Some(original) = ORIGINALS.get().map(|o| o.create_device) else {
            return D3DERR_INVALIDCALL;
        };
        let Some(controller) = CONTROLLER.get() else {
            return original(this, adapter, device_type, focus_window, behavior_flags, params, returned_device);
        };
        if params.is_null() || returned_device.is_null() {
            return original(this, adapter, device_type, focus_window, behavior_flags, params, returned_device);
        }

        controller.create_device(
            &mut *params,
            behavior_flags,
            focus_window as usize,
            |pp, flags| {
                let device = create_upgraded(adapter, device_type, focus_window, flags, pp)?;
                *returned_device = device as *mut c_void;
                Ok(device as usize)
            },
            |pp, flags| original(this, adapter, device_type, focus_window, flags, pp, returned_device),
        )
    }

    unsafe extern "system" fn reset_detour(device: *mut c_void, params: *mut PresentParameters) -> i32 {
        let Some(original) = ORIGINALS.get().map(|o| o.reset) else {
            return D3DERR_INVALIDCALL;
        };
        let (Some(controller), false) = (CONTROLLER.get(), params.is_null()) else {
            return original(device, params);
        };
        controller.reset(device as usize, &mut *params, |pp| original(device, pp))
    }

    unsafe extern "system" fn create_texture_detour(
        device: *mut c_void,
        width: u32,
        height: u32,
        levels: u32,
        usage: u32,
        format: u32,
        pool: u32,
        texture: *mut *mut c_void,
        shared_handle: *mut *mut c_void,
    ) -> i32 {
        let Some(original) = ORIGINALS.get().map(|o| o.create_texture) else {
            return D3DERR_INVALIDCALL;
        };
        let (usage, pool) = translate_pool(usage, pool);
        original(device, width, height, levels, usage, format, pool, texture, shared_handle)
    }

    unsafe extern "system" fn create_vertex_buffer_detour(
        device: *mut c_void,
        length: u32,
        usage: u32,
        fvf: u32,
        pool: u32,
        vertex_buffer: *mut *mut c_void,
        shared_handle: *mut *mut c_void,
    ) -> i32 {
        let Some(original) = ORIGINALS.get().map(|o| o.create_vertex_buffer) else {
            return D3DERR_INVALIDCALL;
        };
        let (usage, pool) = translate_pool(usage, pool);
        original(device, length, usage, fvf, pool, vertex_buffer, shared_handle)
    }

    unsafe extern "system" fn create_index_buffer_detour(
        device: *mut c_void,
        length: u32,
        usage: u32,
        format: u32,
        pool: u32,
        index_buffer: *mut *mut c_void,
        shared_handle: *mut *mut c_void,
    ) -> i32 {
        let Some(original) = ORIGINALS.get().map(|o| o.create_index_buffer) else {
            return D3DERR_INVALIDCALL;
        };
        let (usage, pool) = translate_pool(usage, pool);
        original(device, length, usage, format, pool, index_buffer, shared_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d3d9::{D3DERR_INVALIDCALL, D3DSWAPEFFECT_DISCARD};
    use crate::error::Error;
    use crate::presentation::PresentationState;

    const D3DPOOL_SYSTEMMEM: u32 = 2;
    const D3DUSAGE_WRITEONLY: u32 = 0x8;

    fn desktop() -> Resolution { Resolution::new(1920, 1080) }

    fn controller(config: Config) -> (DeviceResolutionController, Arc<Mutex<Vec<Resolution>>>) {
        let presentation = Arc::new(Presentation::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        presentation.subscribe(move |res| sink.lock().push(res));
        (DeviceResolutionController::new(ConfigHandle::new(config), presentation, desktop), seen)
    }

    fn game_params() -> PresentParameters {
        PresentParameters {
            back_buffer_width: 1280,
            back_buffer_height: 720,
            back_buffer_count: 1,
            multi_sample_type: 4,
            multi_sample_quality: 2,
            swap_effect: D3DSWAPEFFECT_DISCARD,
            windowed: 0,
            presentation_interval: 0,
            back_buffer_format: 22,
            ..PresentParameters::default()
        }
    }

    #[test]
    fn present_parameters_are_forced_for_flipex() {
        let mut pp = game_params();
        apply_present_parameters(&mut pp, Resolution::new(2560, 1080), &Config::default());
        assert_eq!((pp.back_buffer_width, pp.back_buffer_height), (2560, 1080));
        assert_eq!(pp.windowed, 1);
        assert_eq!(pp.swap_effect, D3DSWAPEFFECT_FLIPEX);
        assert_eq!(pp.back_buffer_count, 2);
        assert_eq!(pp.multi_sample_type, D3DMULTISAMPLE_NONE);
        assert_eq!(pp.multi_sample_quality, 0);
        assert_eq!(pp.presentation_interval, D3DPRESENT_INTERVAL_ONE);
        assert_eq!(pp.back_buffer_format, 22);
    }

    #[test]
    fn presentation_interval_follows_fps_override() {
        let mut pp = game_params();
        let no_vsync = Config { vsync: false, ..Config::default() };
        apply_present_parameters(&mut pp, desktop(), &no_vsync);
        assert_eq!(pp.presentation_interval, D3DPRESENT_INTERVAL_IMMEDIATE);

        let mut pp = game_params();
        let no_override = Config { override_fps_limit: false, vsync: false, ..Config::default() };
        apply_present_parameters(&mut pp, desktop(), &no_override);
        assert_eq!(pp.presentation_interval, 0);
    }

    #[test]
    fn vertex_processing_added_only_when_unset() {
        assert_eq!(ensure_vertex_processing(0), D3DCREATE_HARDWARE_VERTEXPROCESSING);
        assert_eq!(ensure_vertex_processing(0x4), 0x4 | D3DCREATE_HARDWARE_VERTEXPROCESSING);
        assert_eq!(
            ensure_vertex_processing(D3DCREATE_SOFTWARE_VERTEXPROCESSING),
            D3DCREATE_SOFTWARE_VERTEXPROCESSING
        );
        assert_eq!(
            ensure_vertex_processing(D3DCREATE_HARDWARE_VERTEXPROCESSING),
            D3DCREATE_HARDWARE_VERTEXPROCESSING
        );
    }

    #[test]
    fn managed_pool_becomes_default_dynamic() {
        assert_eq!(
            translate_pool(D3DUSAGE_WRITEONLY, D3DPOOL_MANAGED),
            (D3DUSAGE_WRITEONLY | D3DUSAGE_DYNAMIC, D3DPOOL_DEFAULT)
        );
        assert_eq!(translate_pool(D3DUSAGE_WRITEONLY, D3DPOOL_DEFAULT), (D3DUSAGE_WRITEONLY, D3DPOOL_DEFAULT));
        assert_eq!(translate_pool(0, D3DPOOL_SYSTEMMEM), (0, D3DPOOL_SYSTEMMEM));
    }

    #[test]
    fn create_uses_desktop_without_override_and_publishes() {
        let (c, seen) = controller(Config::default());
        let mut pp = game_params();
        let (target, flags) = c.prepare_create(&mut pp, 0);
        assert_eq!(target, desktop());
        assert_eq!(flags, D3DCREATE_HARDWARE_VERTEXPROCESSING);
        assert_eq!(pp.back_buffer_width, 1920);
        assert_eq!(c.presentation.state().window, None);

        c.device_created(0xD00D, target, 0x1234);
        assert_eq!(c.presentation.state().window, Some(0x1234));
        assert!(c.tracker().owns(0xD00D));
        assert_eq!(c.tracker().current(), Some(desktop()));
        assert_eq!(*seen.lock(), vec![desktop()]);
    }

    #[test]
    fn foreign_reset_never_mutates_state() {
        let config = Config { width: 2560, height: 1080, ..Config::default() };
        let (c, seen) = controller(config);
        c.device_created(0xD00D, Resolution::new(1920, 1080), 0);
        let before_tracker = c.tracker();
        let before_state = c.presentation.state();

        let mut pp = game_params();
        let untouched = pp;
        assert_eq!(c.prepare_reset(0xBEEF, &mut pp), None);
        assert_eq!(pp.back_buffer_width, untouched.back_buffer_width);
        assert_eq!(pp.swap_effect, untouched.swap_effect);
        assert_eq!(c.tracker(), before_tracker);
        assert_eq!(c.presentation.state(), before_state);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn reset_before_any_device_is_foreign() {
        let (c, _) = controller(Config::default());
        let mut pp = game_params();
        assert_eq!(c.prepare_reset(0xD00D, &mut pp), None);
    }

    #[test]
    fn reset_publishes_only_successful_changes() {
        let handle = ConfigHandle::new(Config::default());
        let presentation = Arc::new(Presentation::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        presentation.subscribe(move |res| sink.lock().push(res));
        let c = DeviceResolutionController::new(handle.clone(), presentation, desktop);
        c.device_created(0xD00D, desktop(), 0);

        // Same size: no publish.
        let mut pp = game_params();
        let target = c.prepare_reset(0xD00D, &mut pp).unwrap();
        c.reset_completed(target, D3D_OK);
        assert_eq!(seen.lock().len(), 1);

        // New size but the reset failed: no publish, no commit.
        handle.replace(Config { width: 3440, height: 1440, ..Config::default() });
        let target = c.prepare_reset(0xD00D, &mut pp).unwrap();
        assert_eq!(target, Resolution::new(3440, 1440));
        assert_eq!(pp.back_buffer_width, 3440);
        c.reset_completed(target, D3DERR_INVALIDCALL);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(c.tracker().current(), Some(desktop()));

        // Retry succeeds: published once.
        c.reset_completed(target, D3D_OK);
        assert_eq!(*seen.lock(), vec![desktop(), Resolution::new(3440, 1440)]);
        assert_eq!(c.tracker().current(), Some(Resolution::new(3440, 1440)));
    }

    #[test]
    fn forget_device_makes_later_resets_foreign() {
        let (c, _) = controller(Config::default());
        c.device_created(0xD00D, desktop(), 0);
        c.forget_device();
        let mut pp = game_params();
        assert_eq!(c.prepare_reset(0xD00D, &mut pp), None);
    }

    #[test]
    fn upgrade_gets_rewritten_request() {
        let config = Config { width: 2560, height: 1080, ..Config::default() };
        let (c, seen) = controller(config);
        let mut pp = game_params();
        let mut upgraded_with = None;

        let hr = c.create_device(
            &mut pp,
            0,
            0x1234,
            |pp, flags| {
                upgraded_with = Some((*pp, flags));
                Ok(0xD00D)
            },
            |_, _| panic!("original must not run"),
        );

        assert_eq!(hr, D3D_OK);
        let (params, flags) = upgraded_with.unwrap();
        assert_eq!((params.back_buffer_width, params.back_buffer_height), (2560, 1080));
        assert_eq!(params.swap_effect, D3DSWAPEFFECT_FLIPEX);
        assert_eq!(flags, D3DCREATE_HARDWARE_VERTEXPROCESSING);
        assert!(c.tracker().owns(0xD00D));
        assert_eq!(c.presentation.state().window, Some(0x1234));
        assert_eq!(*seen.lock(), vec![Resolution::new(2560, 1080)]);
    }

    #[test]
    fn failed_upgrade_falls_back_with_untouched_request() {
        let config = Config { width: 2560, height: 1080, ..Config::default() };
        let (c, seen) = controller(config);
        let requested = game_params();
        let mut pp = requested;
        let mut fallback_with = None;

        let hr = c.create_device(
            &mut pp,
            0x4,
            0x1234,
            |_, _| Err(Error::Direct3D { call: "CreateDeviceEx", hr: D3DERR_INVALIDCALL as u32 }),
            |pp, flags| {
                fallback_with = Some((*pp, flags));
                D3D_OK
            },
        );

        assert_eq!(hr, D3D_OK);
        assert_eq!(fallback_with, Some((requested, 0x4)));
        assert_eq!(pp, requested);
        assert_eq!(c.tracker(), DeviceTracker::default());
        assert_eq!(c.presentation.state(), PresentationState::default());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn panicking_upgrade_still_reaches_original() {
        let (c, _) = controller(Config::default());
        let requested = game_params();
        let mut pp = requested;

        let hr = c.create_device(
            &mut pp,
            0,
            0,
            |_, _| panic!("device creation blew up"),
            |pp, _| if *pp == requested { D3D_OK } else { D3DERR_INVALIDCALL },
        );
        assert_eq!(hr, D3D_OK);
        assert_eq!(c.tracker().current(), None);
    }

    #[test]
    fn foreign_reset_delegates_unmodified() {
        let config = Config { width: 3440, height: 1440, ..Config::default() };
        let (c, seen) = controller(config);
        c.device_created(0xD00D, desktop(), 0);

        let requested = game_params();
        let mut pp = requested;
        let mut passed = None;
        let hr = c.reset(0xBEEF, &mut pp, |pp| {
            passed = Some(*pp);
            D3DERR_INVALIDCALL
        });

        assert_eq!(hr, D3DERR_INVALIDCALL);
        assert_eq!(passed, Some(requested));
        assert_eq!(c.tracker().current(), Some(desktop()));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn owned_reset_rewrites_then_commits() {
        let config = Config { width: 3440, height: 1440, ..Config::default() };
        let (c, seen) = controller(config);
        c.device_created(0xD00D, desktop(), 0);

        let mut pp = game_params();
        let hr = c.reset(0xD00D, &mut pp, |pp| {
            assert_eq!((pp.back_buffer_width, pp.back_buffer_height), (3440, 1440));
            D3D_OK
        });

        assert_eq!(hr, D3D_OK);
        assert_eq!(c.tracker().current(), Some(Resolution::new(3440, 1440)));
        assert_eq!(*seen.lock(), vec![desktop(), Resolution::new(3440, 1440)]);
    }
}
