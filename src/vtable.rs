// vtable.rs — Virtual function tables read from live D3D9 objects.
//
// The game's D3D9 objects don't exist yet when we install, and their methods
// have no exported names. So we build a throwaway IDirect3D9 + device (and
// the Ex variants) on a hidden window, copy each object's vtable (the array
// of method addresses its first pointer refers to), and release everything.
// The copied addresses are the shared d3d9.dll implementations, so hooking
// them catches the calls the game makes later on its own objects.

use std::marker::PhantomData;

/// A COM interface's vtable shape: one ordinal per method, in declaration order.
pub trait VTableLayout: Copy {
    /// Number of slots in the table.
    const LEN: usize;
    fn ordinal(self) -> usize;
}

/// Snapshot of an object's vtable, indexable by method ordinal.
#[derive(Clone, Debug)]
pub struct VTable<M: VTableLayout> {
    entries: Vec<usize>,
    _layout: PhantomData<M>,
}

impl<M: VTableLayout> VTable<M> {
    /// Copy `M::LEN` entries out of the vtable of the object at `object`.
    ///
    /// # Safety
    /// `object` must point to a live COM object whose vtable has at least
    /// `M::LEN` slots.
    pub unsafe fn from_object(object: *const std::ffi::c_void) -> Self {
        let vtable = *(object as *const *const usize);
        let entries = std::slice::from_raw_parts(vtable, M::LEN).to_vec();
        Self { entries, _layout: PhantomData }
    }

    /// Address of the function behind `method`.
    pub fn get(&self, method: M) -> usize {
        self.entries[method.ordinal()]
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

// ============================================================
// Extraction & Hooking (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{extract, Direct3DTables};

#[cfg(windows)]
mod native {
    use super::{VTable, VTableLayout};
    use crate::d3d9::{
        Device9ExMethod, Device9Method, Direct3D9ExMethod, Direct3D9Method, D3DDEVTYPE_HAL,
        D3DCREATE_HARDWARE_VERTEXPROCESSING, D3DPRESENT_INTERVAL_IMMEDIATE,
        D3DSWAPEFFECT_DISCARD, D3D_SDK_VERSION,
    };
    use crate::error::{Error, Result};
    use crate::hook::{Hook, MinHook};
    use std::ptr;
    use winapi::shared::d3d9::{
        Direct3DCreate9, Direct3DCreate9Ex, IDirect3D9, IDirect3D9Ex, IDirect3DDevice9,
        IDirect3DDevice9Ex,
    };
    use winapi::shared::d3d9types::{D3DDISPLAYMODE, D3DPRESENT_PARAMETERS};
    use winapi::shared::windef::HWND;
    use winapi::shared::winerror::{ERROR_CLASS_ALREADY_EXISTS, SUCCEEDED};
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::libloaderapi::GetModuleHandleA;
    use winapi::um::unknwnbase::IUnknown;
    use winapi::um::winuser::{
        CreateWindowExA, DefWindowProcA, DestroyWindow, RegisterClassA, WNDCLASSA,
    };

    const DUMMY_CLASS: &[u8] = b"VisionWidescreenVTableProbe\0";

    impl<M: VTableLayout> VTable<M> {
        /// Install an inactive detour on the function behind `method`.
        ///
        /// # Safety
        /// `F` must be the exact signature of `method`.
        pub unsafe fn hook<F: Copy>(&self, method: M, detour: F) -> Result<Hook<F>> {
            MinHook::install(self.get(method), detour)
        }
    }

    /// The four D3D9 vtables the device controller hooks into.
    pub struct Direct3DTables {
        pub direct3d9: VTable<Direct3D9Method>,
        pub device: VTable<Device9Method>,
        pub direct3d9_ex: VTable<Direct3D9ExMethod>,
        pub device_ex: VTable<Device9ExMethod>,
    }

    // ------------------------------------------------------------
    // RAII guards for the throwaway objects
    // ------------------------------------------------------------

    /// Owned COM reference, released on drop.
    struct Com<T>(*mut T);

    impl<T> Com<T> {
        fn as_ptr(&self) -> *mut T { self.0 }
    }

    impl<T> Drop for Com<T> {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe { (*(self.0 as *mut IUnknown)).Release(); }
            }
        }
    }

    /// Hidden window used only as the throwaway device's target.
    struct DummyWindow(HWND);

    impl DummyWindow {
        unsafe fn create() -> Result<Self> {
            let instance = GetModuleHandleA(ptr::null());
            let mut class: WNDCLASSA = std::mem::zeroed();
            class.lpfnWndProc = Some(DefWindowProcA);
            class.hInstance = instance;
            class.lpszClassName = DUMMY_CLASS.as_ptr() as _;

            if RegisterClassA(&class) == 0 {
                let err = GetLastError();
                if err != ERROR_CLASS_ALREADY_EXISTS {
                    return Err(Error::Window(err));
                }
            }

            let hwnd = CreateWindowExA(
                0, DUMMY_CLASS.as_ptr() as _, b"\0".as_ptr() as _, 0,
                0, 0, 0, 0,
                ptr::null_mut(), ptr::null_mut(), instance, ptr::null_mut(),
            );
            if hwnd.is_null() {
                return Err(Error::Window(GetLastError()));
            }
            Ok(Self(hwnd))
        }
    }

    impl Drop for DummyWindow {
        fn drop(&mut self) {
            unsafe { DestroyWindow(self.0); }
        }
    }

    fn check(call: &'static str, hr: i32) -> Result<()> {
        if SUCCEEDED(hr) { Ok(()) } else { Err(Error::Direct3D { call, hr: hr as u32 }) }
    }

    unsafe fn throwaway_params(d3d: *mut IDirect3D9, hwnd: HWND) -> Result<D3DPRESENT_PARAMETERS> {
        let mut mode: D3DDISPLAYMODE = std::mem::zeroed();
        check("GetAdapterDisplayMode", (*d3d).GetAdapterDisplayMode(0, &mut mode))?;

        let mut pp: D3DPRESENT_PARAMETERS = std::mem::zeroed();
        pp.BackBufferWidth = mode.Width;
        pp.BackBufferHeight = mode.Height;
        pp.BackBufferFormat = mode.Format;
        pp.hDeviceWindow = hwnd;
        pp.SwapEffect = D3DSWAPEFFECT_DISCARD;
        pp.Windowed = 1;
        pp.PresentationInterval = D3DPRESENT_INTERVAL_IMMEDIATE;
        Ok(pp)
    }

    unsafe fn extract_plain() -> Result<(VTable<Direct3D9Method>, VTable<Device9Method>)> {
        let window = DummyWindow::create()?;
        let d3d = Com(Direct3DCreate9(D3D_SDK_VERSION));
        if d3d.as_ptr().is_null() {
            return Err(Error::Direct3D { call: "Direct3DCreate9", hr: 0 });
        }

        let mut pp = throwaway_params(d3d.as_ptr(), window.0)?;
        let mut raw: *mut IDirect3DDevice9 = ptr::null_mut();
        check("CreateDevice", (*d3d.as_ptr()).CreateDevice(
            0, D3DDEVTYPE_HAL, window.0, D3DCREATE_HARDWARE_VERTEXPROCESSING,
            &mut pp, &mut raw,
        ))?;
        let device = Com(raw);

        Ok((
            VTable::from_object(d3d.as_ptr() as *const _),
            VTable::from_object(device.as_ptr() as *const _),
        ))
    }

    unsafe fn extract_ex() -> Result<(VTable<Direct3D9ExMethod>, VTable<Device9ExMethod>)> {
        let window = DummyWindow::create()?;
        let mut raw_d3d: *mut IDirect3D9Ex = ptr::null_mut();
        check("Direct3DCreate9Ex", Direct3DCreate9Ex(D3D_SDK_VERSION, &mut raw_d3d))?;
        let d3d = Com(raw_d3d);

        let mut pp = throwaway_params(d3d.as_ptr() as *mut IDirect3D9, window.0)?;
        let mut raw: *mut IDirect3DDevice9Ex = ptr::null_mut();
        check("CreateDeviceEx", (*d3d.as_ptr()).CreateDeviceEx(
            0, D3DDEVTYPE_HAL, window.0, D3DCREATE_HARDWARE_VERTEXPROCESSING,
            &mut pp, ptr::null_mut(), &mut raw,
        ))?;
        let device = Com(raw);

        Ok((
            VTable::from_object(d3d.as_ptr() as *const _),
            VTable::from_object(device.as_ptr() as *const _),
        ))
    }

    /// Read all four vtables from throwaway objects.
    ///
    /// Fails if either device cannot be created (no adapter, no driver);
    /// the caller must then skip the whole D3D9 hooking feature. Every
    /// throwaway device, factory and window is released before returning.
    pub fn extract() -> Result<Direct3DTables> {
        let (direct3d9, device) = unsafe { extract_plain()? };
        let (direct3d9_ex, device_ex) = unsafe { extract_ex()? };

        tracing::debug!(
            "vtables: IDirect3D9::CreateDevice={:#X} Device9::Reset={:#X} IDirect3D9Ex::CreateDeviceEx={:#X} Device9Ex::ResetEx={:#X}",
            direct3d9.get(Direct3D9Method::CreateDevice),
            device.get(Device9Method::Reset),
            direct3d9_ex.get(Direct3D9ExMethod::CreateDeviceEx),
            device_ex.get(Device9ExMethod::ResetEx),
        );

        Ok(Direct3DTables { direct3d9, device, direct3d9_ex, device_ex })
    }
}
