// process.rs — Loaded-module lookup and checked reads of our own process memory.
//
// Everything here reads memory inside the game process we are injected into.
// Reads go through VirtualQuery first so a bad address yields None instead
// of an access violation on the game's render thread.

#![cfg(windows)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use winapi::um::libloaderapi::{GetModuleFileNameA, GetModuleHandleA};
use winapi::um::memoryapi::VirtualQuery;
use winapi::um::processthreadsapi::GetCurrentProcess;
use winapi::um::psapi::{GetModuleInformation, MODULEINFO};
use winapi::um::winnt::{
    MEMORY_BASIC_INFORMATION, MEM_COMMIT, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
    PAGE_WRITECOPY,
};

const READABLE: u32 = PAGE_READONLY | PAGE_READWRITE | PAGE_WRITECOPY
    | PAGE_EXECUTE_READ | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY;

// ============================================================
// Module Ranges
// ============================================================

/// Base address and image size of a loaded module.
#[derive(Clone, Copy, Debug)]
pub struct ModuleRange {
    pub base: usize,
    pub size: usize,
}

impl ModuleRange {
    pub fn end(&self) -> usize { self.base + self.size }
}

unsafe fn range_of(handle: winapi::shared::minwindef::HMODULE) -> Option<ModuleRange> {
    if handle.is_null() { return None; }
    let mut info: MODULEINFO = std::mem::zeroed();
    let ok = GetModuleInformation(
        GetCurrentProcess(), handle, &mut info,
        std::mem::size_of::<MODULEINFO>() as u32,
    );
    if ok == 0 { return None; }
    Some(ModuleRange { base: info.lpBaseOfDll as usize, size: info.SizeOfImage as usize })
}

/// Range of a loaded module by file name (e.g. "Vision90.dll").
pub fn module_range(name: &str) -> Option<ModuleRange> {
    let mut cname = name.as_bytes().to_vec();
    cname.push(0);
    unsafe { range_of(GetModuleHandleA(cname.as_ptr() as _)) }
}

/// Range of the process's main executable.
pub fn main_module() -> Option<ModuleRange> {
    unsafe { range_of(GetModuleHandleA(std::ptr::null())) }
}

/// Poll for a module until it is loaded or `timeout` elapses.
pub fn wait_for_module(name: &str, timeout: Duration) -> Option<ModuleRange> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(range) = module_range(name) {
            return Some(range);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

// ============================================================
// Readability
// ============================================================

unsafe fn query(addr: usize) -> Option<MEMORY_BASIC_INFORMATION> {
    let mut mbi: MEMORY_BASIC_INFORMATION = std::mem::zeroed();
    let ret = VirtualQuery(addr as *const _, &mut mbi,
        std::mem::size_of::<MEMORY_BASIC_INFORMATION>());
    if ret == 0 { None } else { Some(mbi) }
}

fn region_is_readable(mbi: &MEMORY_BASIC_INFORMATION) -> bool {
    mbi.State == MEM_COMMIT
        && mbi.Protect & READABLE != 0
        && mbi.Protect & (PAGE_GUARD | PAGE_NOACCESS) == 0
}

/// Check if `[addr, addr + len)` lies inside one committed, readable region.
pub fn is_readable(addr: usize, len: usize) -> bool {
    if addr == 0 || len == 0 { return false; }
    let Some(mbi) = (unsafe { query(addr) }) else { return false };
    if !region_is_readable(&mbi) { return false; }
    addr + len <= mbi.BaseAddress as usize + mbi.RegionSize
}

/// Contiguous readable runs inside `[start, end)`, adjacent readable
/// regions merged so a pattern may span region boundaries.
pub fn readable_runs(start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut addr = start;
    while addr < end {
        let Some(mbi) = (unsafe { query(addr) }) else { break };
        let region_end = (mbi.BaseAddress as usize + mbi.RegionSize).min(end);
        if region_end <= addr { break; }

        if region_is_readable(&mbi) {
            match runs.last_mut() {
                Some(last) if last.1 == addr => last.1 = region_end,
                _ => runs.push((addr, region_end)),
            }
        }
        addr = region_end;
    }
    runs
}

/// Read an i32 from an absolute address, or None if it is not readable.
pub fn read_i32(addr: usize) -> Option<i32> {
    if !is_readable(addr, 4) { return None; }
    Some(unsafe { std::ptr::read_unaligned(addr as *const i32) })
}

// ============================================================
// Our Own DLL
// ============================================================

/// Module handle of this DLL (stored at DLL_PROCESS_ATTACH).
static DLL_HINST: AtomicUsize = AtomicUsize::new(0);

pub fn set_dll_hinst(h: usize) { DLL_HINST.store(h, Ordering::Relaxed); }

/// Directory containing this DLL; log and config files live next to it.
pub fn dll_dir() -> PathBuf {
    let hinst = DLL_HINST.load(Ordering::Relaxed);
    if hinst != 0 {
        let mut buf = [0u8; 512];
        let len = unsafe {
            GetModuleFileNameA(hinst as _, buf.as_mut_ptr() as _, buf.len() as u32)
        } as usize;
        if len > 0 {
            if let Ok(s) = std::str::from_utf8(&buf[..len]) {
                if let Some(dir) = std::path::Path::new(s).parent() {
                    return dir.to_path_buf();
                }
            }
        }
    }
    PathBuf::from(".")
}
