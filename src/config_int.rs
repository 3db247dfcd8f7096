// config_int.rs — Frame-rate cap and vsync overrides on the engine's configGetInt.
//
// configGetInt(handle, out) is the game's generic "read integer setting"
// accessor. The handles for ForceFPS and VSync are assigned at runtime by
// the game's config registration and stored at two fixed addresses, so
// they are bound lazily on the first calls after registration.
//
// Per call:
//   vsync handle + override on  -> *out = vsync, report success
//   fps handle   + override on  -> cap <= 0: report failure (uncapped)
//                                  cap > 0:  *out = cap, report success
//   anything else               -> original accessor

use crate::config::ConfigHandle;
use parking_lot::Mutex;

/// Value the game stores in a handle slot before registration.
pub const HANDLE_SENTINEL: i32 = -1;

// ============================================================
// Handle Binding
// ============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Slot still holds the sentinel; read again on the next call.
    Unresolved,
    /// Handle read from the slot; never re-read.
    Resolved(i32),
    /// Slot is not readable memory; never read again.
    Unavailable,
}

/// A config handle discovered at a fixed process address.
pub struct HandleBinding {
    name: &'static str,
    address: usize,
    state: Mutex<Binding>,
}

impl HandleBinding {
    pub const fn new(name: &'static str, address: usize) -> Self {
        Self { name, address, state: Mutex::new(Binding::Unresolved) }
    }

    pub fn state(&self) -> Binding { *self.state.lock() }

    /// Resolve the binding with `read`, which returns the i32 at an address
    /// or None if it cannot be read. Only an Unresolved binding calls `read`.
    pub fn resolve(&self, read: impl FnOnce(usize) -> Option<i32>) -> Option<i32> {
        let mut state = self.state.lock();
        if *state == Binding::Unresolved {
            *state = match read(self.address) {
                Some(HANDLE_SENTINEL) => Binding::Unresolved,
                Some(handle) => {
                    tracing::info!("{} handle bound: {handle}", self.name);
                    Binding::Resolved(handle)
                }
                None => {
                    tracing::warn!("{} handle slot {:#X} unreadable, override disabled", self.name, self.address);
                    Binding::Unavailable
                }
            };
        }
        match *state {
            Binding::Resolved(handle) => Some(handle),
            _ => None,
        }
    }
}

// ============================================================
// Interceptor
// ============================================================

/// What the hook does with one configGetInt call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigRead {
    /// Write the value and report success without calling the original.
    Override(i32),
    /// Report failure without calling the original.
    ReportFailure,
    /// Call the original accessor unchanged.
    Delegate,
}

impl ConfigRead {
    /// Carry out the decision for one call and return the accessor's result.
    /// `out` is None when the game passed a null pointer; an override then
    /// falls back to `original`.
    pub fn answer(self, out: Option<&mut i32>, original: impl FnOnce() -> u8) -> u8 {
        match (self, out) {
            (ConfigRead::Override(value), Some(out)) => {
                *out = value;
                1
            }
            (ConfigRead::ReportFailure, _) => 0,
            _ => original(),
        }
    }
}

pub struct ConfigIntInterceptor {
    config: ConfigHandle,
    fps_limit: HandleBinding,
    vsync: HandleBinding,
}

impl ConfigIntInterceptor {
    pub fn new(config: ConfigHandle, fps_limit_slot: usize, vsync_slot: usize) -> Self {
        Self {
            config,
            fps_limit: HandleBinding::new("ForceFPS", fps_limit_slot),
            vsync: HandleBinding::new("VSync", vsync_slot),
        }
    }

    pub fn bindings(&self) -> (Binding, Binding) {
        (self.fps_limit.state(), self.vsync.state())
    }

    /// Decide a configGetInt call for `handle`, reading handle slots with `read`.
    pub fn intercept(&self, handle: i32, read: impl Fn(usize) -> Option<i32>) -> ConfigRead {
        let fps_handle = self.fps_limit.resolve(&read);
        let vsync_handle = self.vsync.resolve(&read);

        let config = self.config.snapshot();
        if !config.override_fps_limit {
            return ConfigRead::Delegate;
        }

        if vsync_handle == Some(handle) {
            return ConfigRead::Override(config.vsync as i32);
        }
        if fps_handle == Some(handle) {
            if config.fps_limit <= 0 {
                return ConfigRead::ReportFailure;
            }
            return ConfigRead::Override(config.fps_limit);
        }
        ConfigRead::Delegate
    }

    /// Log the override now in effect; the next accessor call picks it up.
    pub fn on_config_updated(&self) {
        let config = self.config.snapshot();
        if !config.override_fps_limit {
            tracing::info!("fps override disabled");
            return;
        }
        let limit = if config.fps_limit <= 0 { "no limit".to_string() } else { config.fps_limit.to_string() };
        tracing::info!("vsync {}, fps limit {limit}", if config.vsync { "on" } else { "off" });
    }
}

// ============================================================
// configGetInt Hook (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{install, uninstall, FPS_LIMIT_SLOT, VSYNC_SLOT};

#[cfg(windows)]
mod native {
    use super::{ConfigIntInterceptor, ConfigRead};
    use crate::error::{Error, Result};
    use crate::hook::{Hook, MinHook};
    use crate::process::{main_module, read_i32};
    use crate::scanner::{locate, Signature};
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;

    const CONFIG_GET_INT_SIGNATURE: &str = "A1 ?? ?? ?? ?? ?? ?? ?? 8B 80 ?? ?? ?? ?? 83 F8 ?? 74 ?? ?? ?? ?? A1 ?? ?? ?? ?? F6 44 C8 ?? ?? ?? ?? ?? 75 ?? 85 C0 75 ?? 32 C0 C3 8B 48 ?? 83 E9 ?? 74 ?? 83 E9 ?? 74 ?? 83 E9 ?? 75 ?? 8B 40 ?? 85 C0 75 ?? B8 ?? ?? ?? ?? ?? ?? ?? ?? ?? B0";

    /// The main module is not relocated, so configGetInt must sit here.
    const EXPECTED_ADDRESS: usize = 0x0040_5700;

    /// Where the game stores the registered ForceFPS handle.
    pub const FPS_LIMIT_SLOT: usize = 0x008C_F260;
    /// Where the game stores the registered VSync handle.
    pub const VSYNC_SLOT: usize = 0x008C_F248;

    /// char __fastcall configGetInt(int handle, int* out)
    type ConfigGetIntFn = unsafe extern "fastcall" fn(handle: i32, out: *mut i32) -> u8;

    static INTERCEPTOR: OnceCell<Arc<ConfigIntInterceptor>> = OnceCell::new();
    static ORIGINAL: OnceCell<ConfigGetIntFn> = OnceCell::new();
    static HOOK: Mutex<Option<Hook<ConfigGetIntFn>>> = Mutex::new(None);

    /// Scan the main module for configGetInt and hook it if it is where we expect.
    pub fn install(interceptor: Arc<ConfigIntInterceptor>) -> Result<()> {
        let signature = Signature::parse("configGetInt", "main module", CONFIG_GET_INT_SIGNATURE)?;
        let module = main_module().ok_or_else(|| Error::ModuleNotLoaded("main module".into()))?;

        let found = locate(&module, &signature)?;
        if found != EXPECTED_ADDRESS {
            return Err(Error::AddressMismatch {
                name: signature.name().to_string(),
                found,
                expected: EXPECTED_ADDRESS,
            });
        }

        let _ = INTERCEPTOR.set(interceptor);
        let hook = unsafe { MinHook::install(found, detour as ConfigGetIntFn)? };
        let _ = ORIGINAL.set(hook.original());
        if let Err(e) = hook.activate() {
            let _ = hook.remove();
            return Err(e);
        }
        *HOOK.lock() = Some(hook);

        tracing::info!("configGetInt hooked at {found:#X}");
        Ok(())
    }

    pub fn uninstall() {
        if HOOK.lock().take().is_some() {
            tracing::info!("configGetInt unhooked");
        }
    }

    unsafe extern "fastcall" fn detour(handle: i32, out: *mut i32) -> u8 {
        let Some(original) = ORIGINAL.get().copied() else { return 0 };
        let Some(interceptor) = INTERCEPTOR.get() else { return original(handle, out) };

        let decision = catch_unwind(AssertUnwindSafe(|| interceptor.intercept(handle, read_i32)))
            .unwrap_or(ConfigRead::Delegate);

        if decision != ConfigRead::Delegate {
            tracing::trace!("configGetInt({handle}) -> {decision:?}");
        }
        decision.answer(out.as_mut(), || original(handle, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::cell::Cell;

    const FPS_SLOT: usize = 0x8CF260;
    const VSYNC_SLOT: usize = 0x8CF248;
    const FPS_HANDLE: i32 = 7;
    const VSYNC_HANDLE: i32 = 3;

    fn registered(addr: usize) -> Option<i32> {
        match addr {
            FPS_SLOT => Some(FPS_HANDLE),
            VSYNC_SLOT => Some(VSYNC_HANDLE),
            _ => None,
        }
    }

    fn interceptor(config: Config) -> ConfigIntInterceptor {
        ConfigIntInterceptor::new(ConfigHandle::new(config), FPS_SLOT, VSYNC_SLOT)
    }

    #[test]
    fn zero_cap_reports_failure() {
        let i = interceptor(Config { fps_limit: 0, ..Config::default() });
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::ReportFailure);
        let i = interceptor(Config { fps_limit: -5, ..Config::default() });
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::ReportFailure);
    }

    #[test]
    fn positive_cap_is_written() {
        let i = interceptor(Config { fps_limit: 144, ..Config::default() });
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::Override(144));
    }

    #[test]
    fn vsync_handle_reports_configured_flag() {
        let i = interceptor(Config { vsync: true, ..Config::default() });
        assert_eq!(i.intercept(VSYNC_HANDLE, registered), ConfigRead::Override(1));
        let i = interceptor(Config { vsync: false, ..Config::default() });
        assert_eq!(i.intercept(VSYNC_HANDLE, registered), ConfigRead::Override(0));
    }

    #[test]
    fn other_handles_and_disabled_override_delegate() {
        let i = interceptor(Config { fps_limit: 60, ..Config::default() });
        assert_eq!(i.intercept(42, registered), ConfigRead::Delegate);

        let i = interceptor(Config { override_fps_limit: false, fps_limit: 60, ..Config::default() });
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::Delegate);
        assert_eq!(i.intercept(VSYNC_HANDLE, registered), ConfigRead::Delegate);
    }

    #[test]
    fn runtime_config_change_takes_effect() {
        let handle = ConfigHandle::new(Config { fps_limit: 60, ..Config::default() });
        let i = ConfigIntInterceptor::new(handle.clone(), FPS_SLOT, VSYNC_SLOT);
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::Override(60));
        handle.replace(Config { fps_limit: 0, ..Config::default() });
        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::ReportFailure);
    }

    #[test]
    fn override_writes_output_and_reports_success() {
        let mut out = -1;
        let called = Cell::new(false);
        let result = ConfigRead::Override(144).answer(Some(&mut out), || {
            called.set(true);
            0
        });
        assert_eq!((result, out), (1, 144));
        assert!(!called.get());
    }

    #[test]
    fn failure_skips_original_and_output() {
        let mut out = 60;
        let called = Cell::new(false);
        let result = ConfigRead::ReportFailure.answer(Some(&mut out), || {
            called.set(true);
            1
        });
        assert_eq!((result, out), (0, 60));
        assert!(!called.get());
        assert_eq!(ConfigRead::ReportFailure.answer(None, || 1), 0);
    }

    #[test]
    fn null_output_and_delegate_call_original() {
        assert_eq!(ConfigRead::Override(144).answer(None, || 7), 7);

        let mut out = 60;
        assert_eq!(ConfigRead::Delegate.answer(Some(&mut out), || 1), 1);
        assert_eq!(out, 60);
    }

    #[test]
    fn binding_stays_unresolved_until_registered() {
        let i = interceptor(Config { fps_limit: 144, ..Config::default() });
        let unregistered = |_: usize| Some(HANDLE_SENTINEL);

        // Handle -1 must not match the sentinel slot value.
        assert_eq!(i.intercept(HANDLE_SENTINEL, unregistered), ConfigRead::Delegate);
        assert_eq!(i.bindings(), (Binding::Unresolved, Binding::Unresolved));

        assert_eq!(i.intercept(FPS_HANDLE, registered), ConfigRead::Override(144));
        assert_eq!(i.bindings(), (Binding::Resolved(FPS_HANDLE), Binding::Resolved(VSYNC_HANDLE)));
    }

    #[test]
    fn resolved_binding_is_never_reread() {
        let binding = HandleBinding::new("test", FPS_SLOT);
        assert_eq!(binding.resolve(|_| Some(9)), Some(9));

        let reads = Cell::new(0);
        let value = binding.resolve(|_| {
            reads.set(reads.get() + 1);
            Some(11)
        });
        assert_eq!(value, Some(9));
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn unreadable_slot_is_permanently_unavailable() {
        let binding = HandleBinding::new("test", 0);
        assert_eq!(binding.resolve(|_| None), None);
        assert_eq!(binding.state(), Binding::Unavailable);
        assert_eq!(binding.resolve(|_| Some(5)), None);
        assert_eq!(binding.state(), Binding::Unavailable);
    }

    #[test]
    fn bindings_resolve_independently() {
        let i = interceptor(Config { fps_limit: 30, ..Config::default() });
        let only_fps = |addr: usize| if addr == FPS_SLOT { Some(FPS_HANDLE) } else { Some(HANDLE_SENTINEL) };
        assert_eq!(i.intercept(VSYNC_HANDLE, only_fps), ConfigRead::Delegate);
        assert_eq!(i.bindings(), (Binding::Resolved(FPS_HANDLE), Binding::Unresolved));
        assert_eq!(i.intercept(VSYNC_HANDLE, registered), ConfigRead::Override(1));
    }
}
