// hook.rs — Generic detour primitive used by every controller.
//
// A FunctionHook<F> redirects a function entry to a replacement of the same
// type F (an `unsafe extern "<abi>" fn(..)` pointer) and keeps a callable
// pointer to the original code, so the replacement can delegate.
//
// Flow:
//   install()   -> backend creates the detour + trampoline (inactive)
//   activate()  -> calls start routing through the replacement
//   disable()   -> calls behave exactly as before the hook
//   drop        -> disable; the trampoline lives until uninitialize(), so a
//                  detour already past its decision can still call original()
//   remove()    -> disable + free the trampoline, for hooks never activated
//
// On Windows the backend is MinHook (minhook-sys). The backend is a trait so
// the activation bookkeeping can be exercised without patching real code.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================
// Backend
// ============================================================

/// The code-patching mechanism behind a FunctionHook.
pub trait DetourBackend {
    /// Create a detour from `target` to `detour`; returns the address of a
    /// trampoline that executes the original code. Must not activate it.
    unsafe fn create(&self, target: usize, detour: usize) -> Result<usize>;
    unsafe fn enable(&self, target: usize) -> Result<()>;
    unsafe fn disable(&self, target: usize) -> Result<()>;
    unsafe fn remove(&self, target: usize) -> Result<()>;
}

/// Targets that currently have a FunctionHook, across all backends.
static HOOKED_TARGETS: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

// ============================================================
// FunctionHook
// ============================================================

/// An installed detour on one target address.
///
/// `F` must be a plain function-pointer type whose signature and calling
/// convention match the target exactly.
pub struct FunctionHook<F: Copy, B: DetourBackend> {
    target: usize,
    original: F,
    active: AtomicBool,
    backend: B,
}

struct PointerSized<F>(std::marker::PhantomData<F>);

impl<F> PointerSized<F> {
    /// Evaluated per `F` at compile time; fails the build for non-pointer types.
    const CHECK: () = assert!(
        std::mem::size_of::<F>() == std::mem::size_of::<usize>(),
        "hook signature must be a function pointer"
    );
}

fn fn_to_addr<F: Copy>(f: F) -> usize {
    let () = PointerSized::<F>::CHECK;
    unsafe { std::mem::transmute_copy::<F, usize>(&f) }
}

impl<F: Copy, B: DetourBackend> FunctionHook<F, B> {
    /// Create an inactive hook on `target`.
    ///
    /// # Safety
    /// `target` must be the entry of a function whose ABI is exactly `F`,
    /// and `detour` must remain valid for as long as the hook exists.
    pub unsafe fn install_with(backend: B, target: usize, detour: F) -> Result<Self> {
        let detour_addr = fn_to_addr(detour);
        {
            let mut hooked = HOOKED_TARGETS.lock();
            if !hooked.insert(target) {
                return Err(Error::AlreadyHooked(target));
            }
        }

        let trampoline = match backend.create(target, detour_addr) {
            Ok(t) => t,
            Err(e) => {
                HOOKED_TARGETS.lock().remove(&target);
                return Err(e);
            }
        };

        Ok(Self {
            target,
            original: std::mem::transmute_copy::<usize, F>(&trampoline),
            active: AtomicBool::new(false),
            backend,
        })
    }

    /// The original function, callable from inside the replacement.
    pub fn original(&self) -> F { self.original }

    pub fn is_active(&self) -> bool { self.active.load(Ordering::Acquire) }

    /// Start redirecting calls. No-op if already active.
    pub fn activate(&self) -> Result<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = unsafe { self.backend.enable(self.target) } {
            self.active.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Restore the original call flow. No-op if not active.
    pub fn disable(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = unsafe { self.backend.disable(self.target) } {
            self.active.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Disable the hook and free its trampoline, releasing the target.
    ///
    /// Only for hooks no thread can be inside, i.e. never activated. Live
    /// hooks are dropped instead and freed by the backend's shutdown.
    pub fn remove(self) -> Result<()> {
        self.disable()?;
        unsafe { self.backend.remove(self.target)? };
        HOOKED_TARGETS.lock().remove(&self.target);
        Ok(())
    }
}

impl<F: Copy, B: DetourBackend> Drop for FunctionHook<F, B> {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}

// ============================================================
// MinHook Backend (Windows only)
// ============================================================

#[cfg(windows)]
pub use minhook::{uninitialize, Hook, MinHook};

#[cfg(windows)]
mod minhook {
    use super::{DetourBackend, FunctionHook, HOOKED_TARGETS};
    use crate::error::{Error, Result};
    use minhook_sys::{
        MH_CreateHook, MH_DisableHook, MH_EnableHook, MH_Initialize, MH_OK, MH_RemoveHook,
        MH_Uninitialize,
    };
    use once_cell::sync::OnceCell;
    use std::ffi::c_void;
    use std::ptr;

    const MH_ERROR_ALREADY_INITIALIZED: i32 = 1;

    /// Result of the one-time MH_Initialize call.
    static INITIALIZED: OnceCell<i32> = OnceCell::new();

    /// A FunctionHook patched in place with MinHook.
    pub type Hook<F> = FunctionHook<F, MinHook>;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct MinHook;

    fn check(call: &'static str, status: i32) -> Result<()> {
        if status == MH_OK { Ok(()) } else { Err(Error::MinHook { call, status }) }
    }

    fn ensure_initialized() -> Result<()> {
        let status = *INITIALIZED.get_or_init(|| unsafe { MH_Initialize() });
        if status == MH_ERROR_ALREADY_INITIALIZED {
            return Ok(());
        }
        check("MH_Initialize", status)
    }

    impl MinHook {
        /// Install an inactive MinHook detour on `target`.
        ///
        /// # Safety
        /// See [`FunctionHook::install_with`].
        pub unsafe fn install<F: Copy>(target: usize, detour: F) -> Result<Hook<F>> {
            FunctionHook::install_with(MinHook, target, detour)
        }
    }

    impl DetourBackend for MinHook {
        unsafe fn create(&self, target: usize, detour: usize) -> Result<usize> {
            ensure_initialized()?;
            let mut original = ptr::null_mut::<c_void>();
            let s = MH_CreateHook(target as *mut c_void, detour as *mut c_void, &mut original);
            check("MH_CreateHook", s)?;
            Ok(original as usize)
        }

        unsafe fn enable(&self, target: usize) -> Result<()> {
            check("MH_EnableHook", MH_EnableHook(target as *mut c_void))
        }

        unsafe fn disable(&self, target: usize) -> Result<()> {
            check("MH_DisableHook", MH_DisableHook(target as *mut c_void))
        }

        unsafe fn remove(&self, target: usize) -> Result<()> {
            check("MH_RemoveHook", MH_RemoveHook(target as *mut c_void))
        }
    }

    /// Shut MinHook down, freeing every trampoline. Call once, after every
    /// hook has been disabled.
    pub fn uninitialize() {
        if INITIALIZED.get().is_some() {
            unsafe { MH_Uninitialize(); }
            HOOKED_TARGETS.lock().clear();
        }
    }
}
