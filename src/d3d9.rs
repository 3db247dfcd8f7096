// d3d9.rs — The slice of the Direct3D 9 ABI our hooks touch.
//
// The hooked functions are entered with raw pointers from the game, so the
// structures and constants are declared here with their exact in-memory
// layout (32-bit), the same way the engine structs are mirrored elsewhere.
// Method ordinals follow the interfaces' declaration order in d3d9.h; the
// vtable has no names at runtime, only slot positions.

use crate::vtable::VTableLayout;
use std::ffi::c_void;
use strum::EnumCount;

// ============================================================
// Constants
// ============================================================

pub const D3D_SDK_VERSION: u32 = 32;
pub const D3D_OK: i32 = 0;
pub const D3DERR_INVALIDCALL: i32 = 0x8876_086C_u32 as i32;

pub const D3DDEVTYPE_HAL: u32 = 1;

pub const D3DPOOL_DEFAULT: u32 = 0;
pub const D3DPOOL_MANAGED: u32 = 1;
pub const D3DUSAGE_DYNAMIC: u32 = 0x0000_0200;

pub const D3DSWAPEFFECT_DISCARD: u32 = 1;
pub const D3DSWAPEFFECT_FLIPEX: u32 = 5;
pub const D3DMULTISAMPLE_NONE: u32 = 0;
pub const D3DPRESENT_INTERVAL_ONE: u32 = 0x0000_0001;
pub const D3DPRESENT_INTERVAL_IMMEDIATE: u32 = 0x8000_0000;

pub const D3DCREATE_SOFTWARE_VERTEXPROCESSING: u32 = 0x0000_0020;
pub const D3DCREATE_HARDWARE_VERTEXPROCESSING: u32 = 0x0000_0040;

/// Back-buffer count required by FLIPEX in windowed mode.
pub const FLIPEX_BACK_BUFFERS: u32 = 2;

// ============================================================
// Structures
// ============================================================

/// D3DPRESENT_PARAMETERS.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresentParameters {
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: u32,
    pub back_buffer_count: u32,
    pub multi_sample_type: u32,
    pub multi_sample_quality: u32,
    pub swap_effect: u32,
    pub device_window: *mut c_void,
    pub windowed: i32,
    pub enable_auto_depth_stencil: i32,
    pub auto_depth_stencil_format: u32,
    pub flags: u32,
    pub full_screen_refresh_rate_hz: u32,
    pub presentation_interval: u32,
}

impl Default for PresentParameters {
    fn default() -> Self {
        Self {
            back_buffer_width: 0,
            back_buffer_height: 0,
            back_buffer_format: 0,
            back_buffer_count: 0,
            multi_sample_type: 0,
            multi_sample_quality: 0,
            swap_effect: 0,
            device_window: std::ptr::null_mut(),
            windowed: 0,
            enable_auto_depth_stencil: 0,
            auto_depth_stencil_format: 0,
            flags: 0,
            full_screen_refresh_rate_hz: 0,
            presentation_interval: 0,
        }
    }
}

// ============================================================
// Hooked Function Signatures (all stdcall COM methods)
// ============================================================

/// IDirect3D9::CreateDevice
pub type CreateDeviceFn = unsafe extern "system" fn(
    this: *mut c_void,
    adapter: u32,
    device_type: u32,
    focus_window: *mut c_void,
    behavior_flags: u32,
    params: *mut PresentParameters,
    returned_device: *mut *mut c_void,
) -> i32;

/// IDirect3DDevice9::Reset
pub type ResetFn = unsafe extern "system" fn(
    device: *mut c_void,
    params: *mut PresentParameters,
) -> i32;

/// IDirect3DDevice9::CreateTexture
pub type CreateTextureFn = unsafe extern "system" fn(
    device: *mut c_void,
    width: u32,
    height: u32,
    levels: u32,
    usage: u32,
    format: u32,
    pool: u32,
    texture: *mut *mut c_void,
    shared_handle: *mut *mut c_void,
) -> i32;

/// IDirect3DDevice9::CreateVertexBuffer
pub type CreateVertexBufferFn = unsafe extern "system" fn(
    device: *mut c_void,
    length: u32,
    usage: u32,
    fvf: u32,
    pool: u32,
    vertex_buffer: *mut *mut c_void,
    shared_handle: *mut *mut c_void,
) -> i32;

/// IDirect3DDevice9::CreateIndexBuffer
pub type CreateIndexBufferFn = unsafe extern "system" fn(
    device: *mut c_void,
    length: u32,
    usage: u32,
    format: u32,
    pool: u32,
    index_buffer: *mut *mut c_void,
    shared_handle: *mut *mut c_void,
) -> i32;

// ============================================================
// Method Ordinals
// ============================================================

/// IDirect3D9 methods in vtable order.
// Most variants only hold a slot position.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumCount)]
#[repr(usize)]
pub enum Direct3D9Method {
    QueryInterface,
    AddRef,
    Release,
    RegisterSoftwareDevice,
    GetAdapterCount,
    GetAdapterIdentifier,
    GetAdapterModeCount,
    EnumAdapterModes,
    GetAdapterDisplayMode,
    CheckDeviceType,
    CheckDeviceFormat,
    CheckDeviceMultiSampleType,
    CheckDepthStencilMatch,
    CheckDeviceFormatConversion,
    GetDeviceCaps,
    GetAdapterMonitor,
    CreateDevice,
}

impl VTableLayout for Direct3D9Method {
    const LEN: usize = Self::COUNT;
    fn ordinal(self) -> usize { self as usize }
}

/// Methods IDirect3D9Ex appends after the IDirect3D9 slots.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumCount)]
#[repr(usize)]
pub enum Direct3D9ExMethod {
    GetAdapterModeCountEx = Direct3D9Method::COUNT,
    EnumAdapterModesEx,
    GetAdapterDisplayModeEx,
    CreateDeviceEx,
    GetAdapterLUID,
}

impl VTableLayout for Direct3D9ExMethod {
    const LEN: usize = Direct3D9Method::COUNT + Self::COUNT;
    fn ordinal(self) -> usize { self as usize }
}

/// IDirect3DDevice9 methods in vtable order.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumCount)]
#[repr(usize)]
pub enum Device9Method {
    QueryInterface,
    AddRef,
    Release,
    TestCooperativeLevel,
    GetAvailableTextureMem,
    EvictManagedResources,
    GetDirect3D,
    GetDeviceCaps,
    GetDisplayMode,
    GetCreationParameters,
    SetCursorProperties,
    SetCursorPosition,
    ShowCursor,
    CreateAdditionalSwapChain,
    GetSwapChain,
    GetNumberOfSwapChains,
    Reset,
    Present,
    GetBackBuffer,
    GetRasterStatus,
    SetDialogBoxMode,
    SetGammaRamp,
    GetGammaRamp,
    CreateTexture,
    CreateVolumeTexture,
    CreateCubeTexture,
    CreateVertexBuffer,
    CreateIndexBuffer,
    CreateRenderTarget,
    CreateDepthStencilSurface,
    UpdateSurface,
    UpdateTexture,
    GetRenderTargetData,
    GetFrontBufferData,
    StretchRect,
    ColorFill,
    CreateOffscreenPlainSurface,
    SetRenderTarget,
    GetRenderTarget,
    SetDepthStencilSurface,
    GetDepthStencilSurface,
    BeginScene,
    EndScene,
    Clear,
    SetTransform,
    GetTransform,
    MultiplyTransform,
    SetViewport,
    GetViewport,
    SetMaterial,
    GetMaterial,
    SetLight,
    GetLight,
    LightEnable,
    GetLightEnable,
    SetClipPlane,
    GetClipPlane,
    SetRenderState,
    GetRenderState,
    CreateStateBlock,
    BeginStateBlock,
    EndStateBlock,
    SetClipStatus,
    GetClipStatus,
    GetTexture,
    SetTexture,
    GetTextureStageState,
    SetTextureStageState,
    GetSamplerState,
    SetSamplerState,
    ValidateDevice,
    SetPaletteEntries,
    GetPaletteEntries,
    SetCurrentTexturePalette,
    GetCurrentTexturePalette,
    SetScissorRect,
    GetScissorRect,
    SetSoftwareVertexProcessing,
    GetSoftwareVertexProcessing,
    SetNPatchMode,
    GetNPatchMode,
    DrawPrimitive,
    DrawIndexedPrimitive,
    DrawPrimitiveUP,
    DrawIndexedPrimitiveUP,
    ProcessVertices,
    CreateVertexDeclaration,
    SetVertexDeclaration,
    GetVertexDeclaration,
    SetFVF,
    GetFVF,
    CreateVertexShader,
    SetVertexShader,
    GetVertexShader,
    SetVertexShaderConstantF,
    GetVertexShaderConstantF,
    SetVertexShaderConstantI,
    GetVertexShaderConstantI,
    SetVertexShaderConstantB,
    GetVertexShaderConstantB,
    SetStreamSource,
    GetStreamSource,
    SetStreamSourceFreq,
    GetStreamSourceFreq,
    SetIndices,
    GetIndices,
    CreatePixelShader,
    SetPixelShader,
    GetPixelShader,
    SetPixelShaderConstantF,
    GetPixelShaderConstantF,
    SetPixelShaderConstantI,
    GetPixelShaderConstantI,
    SetPixelShaderConstantB,
    GetPixelShaderConstantB,
    DrawRectPatch,
    DrawTriPatch,
    DeletePatch,
    CreateQuery,
}

impl VTableLayout for Device9Method {
    const LEN: usize = Self::COUNT;
    fn ordinal(self) -> usize { self as usize }
}

/// Methods IDirect3DDevice9Ex appends after the IDirect3DDevice9 slots.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumCount)]
#[repr(usize)]
pub enum Device9ExMethod {
    SetConvolutionMonoKernel = Device9Method::COUNT,
    ComposeRects,
    PresentEx,
    GetGPUThreadPriority,
    SetGPUThreadPriority,
    WaitForVBlank,
    CheckResourceResidency,
    SetMaximumFrameLatency,
    GetMaximumFrameLatency,
    CheckDeviceState,
    CreateRenderTargetEx,
    CreateOffscreenPlainSurfaceEx,
    CreateDepthStencilSurfaceEx,
    ResetEx,
    GetDisplayModeEx,
}

impl VTableLayout for Device9ExMethod {
    const LEN: usize = Device9Method::COUNT + Self::COUNT;
    fn ordinal(self) -> usize { self as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_match_d3d9_header() {
        assert_eq!(Direct3D9Method::CreateDevice.ordinal(), 16);
        assert_eq!(Direct3D9Method::LEN, 17);
        assert_eq!(Direct3D9ExMethod::CreateDeviceEx.ordinal(), 20);
        assert_eq!(Direct3D9ExMethod::LEN, 22);

        assert_eq!(Device9Method::Reset.ordinal(), 16);
        assert_eq!(Device9Method::Present.ordinal(), 17);
        assert_eq!(Device9Method::CreateTexture.ordinal(), 23);
        assert_eq!(Device9Method::CreateVertexBuffer.ordinal(), 26);
        assert_eq!(Device9Method::CreateIndexBuffer.ordinal(), 27);
        assert_eq!(Device9Method::EndScene.ordinal(), 42);
        assert_eq!(Device9Method::LEN, 119);
        assert_eq!(Device9ExMethod::ResetEx.ordinal(), 132);
        assert_eq!(Device9ExMethod::LEN, 134);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn present_parameters_layout_is_56_bytes() {
        assert_eq!(std::mem::size_of::<PresentParameters>(), 56);
        assert_eq!(std::mem::offset_of!(PresentParameters, windowed), 32);
        assert_eq!(std::mem::offset_of!(PresentParameters, presentation_interval), 52);
    }
}
