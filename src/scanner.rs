// scanner.rs — Wildcard byte-signature scanning.
//
// Signatures are written IDA-style ("F3 0F 10 44 ?? ?? 8B F1"), where "?" or
// "??" matches any byte. A scan always reports the lowest matching offset.
// Scanning never fails loudly: an unreadable region or a miss is simply
// ScanResult::NotFound, and the caller decides what that means for its feature.

use crate::error::{Error, Result};

// ============================================================
// Signature
// ============================================================

/// A parsed byte signature tied to one function in one module build.
#[derive(Clone, Debug)]
pub struct Signature {
    name: &'static str,
    module: &'static str,
    source: &'static str,
    tokens: Vec<Option<u8>>,
}

impl Signature {
    /// Parse a signature string. `module` is the name of the module the
    /// signature was taken from (e.g. "Vision90.dll").
    pub fn parse(name: &'static str, module: &'static str, source: &'static str) -> Result<Self> {
        let mut tokens = Vec::new();
        for token in source.split_whitespace() {
            if token == "?" || token == "??" {
                tokens.push(None);
                continue;
            }
            let byte = u8::from_str_radix(token, 16).map_err(|_| Error::InvalidSignature {
                name: name.to_string(),
                token: token.to_string(),
            })?;
            tokens.push(Some(byte));
        }

        if tokens.is_empty() {
            return Err(Error::EmptySignature(name.to_string()));
        }

        Ok(Self { name, module, source, tokens })
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn module(&self) -> &'static str { self.module }
    pub fn source(&self) -> &'static str { self.source }
    pub fn len(&self) -> usize { self.tokens.len() }
    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }

    /// Whether the signature matches `haystack` starting at `offset`.
    pub fn matches_at(&self, haystack: &[u8], offset: usize) -> bool {
        let Some(window) = haystack.get(offset..offset + self.tokens.len()) else {
            return false;
        };
        self.tokens
            .iter()
            .zip(window)
            .all(|(token, byte)| token.map_or(true, |t| t == *byte))
    }

    /// Find the first (lowest offset) match inside `haystack`.
    ///
    /// The first concrete byte of the signature is used as an anchor and
    /// located with memchr; only anchor hits are checked in full.
    pub fn find_in(&self, haystack: &[u8]) -> ScanResult {
        if haystack.len() < self.tokens.len() {
            return ScanResult::NotFound;
        }
        let last_start = haystack.len() - self.tokens.len();

        let Some((anchor_index, anchor)) = self
            .tokens
            .iter()
            .enumerate()
            .find_map(|(i, t)| t.map(|b| (i, b)))
        else {
            // All wildcards: matches at the very start.
            return ScanResult::Found { offset: 0 };
        };

        let mut search_from = anchor_index;
        let search_end = last_start + anchor_index;
        while search_from <= search_end {
            let Some(hit) = memchr::memchr(anchor, &haystack[search_from..=search_end]) else {
                break;
            };
            let start = search_from + hit - anchor_index;
            if self.matches_at(haystack, start) {
                return ScanResult::Found { offset: start };
            }
            search_from += hit + 1;
        }
        ScanResult::NotFound
    }

    /// Absolute address for a scan of the region at `base`, or
    /// PatternNotFound naming this signature.
    pub fn address_in(&self, base: usize, result: ScanResult) -> Result<usize> {
        match result {
            ScanResult::Found { offset } => Ok(base + offset),
            ScanResult::NotFound => Err(Error::PatternNotFound {
                name: self.name.to_string(),
                module: self.module.to_string(),
            }),
        }
    }
}

// ============================================================
// Scan Result
// ============================================================

/// Outcome of a scan. The offset is relative to the start of the scanned
/// region (the module base for module scans).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanResult {
    Found { offset: usize },
    NotFound,
}

impl ScanResult {
    pub fn found(self) -> bool {
        matches!(self, ScanResult::Found { .. })
    }

    pub fn offset(self) -> Option<usize> {
        match self {
            ScanResult::Found { offset } => Some(offset),
            ScanResult::NotFound => None,
        }
    }
}

// ============================================================
// In-Place Module Scanning (Windows only)
// ============================================================

#[cfg(windows)]
pub use native::{locate, scan_module};

#[cfg(windows)]
mod native {
    use super::{ScanResult, Signature};
    use crate::error::Result;
    use crate::process::{readable_runs, ModuleRange};

    /// Scan a loaded module's image in place.
    ///
    /// The image is walked as runs of contiguous committed, readable pages;
    /// guard pages and uncommitted gaps are skipped rather than faulted on.
    /// Matches that would straddle an unreadable gap are not reported.
    ///
    /// # Safety
    /// `module` must describe a module that stays loaded for the duration
    /// of the scan.
    pub unsafe fn scan_module(module: &ModuleRange, signature: &Signature) -> ScanResult {
        for (start, end) in readable_runs(module.base, module.end()) {
            let bytes = std::slice::from_raw_parts(start as *const u8, end - start);
            if let ScanResult::Found { offset } = signature.find_in(bytes) {
                return ScanResult::Found { offset: start - module.base + offset };
            }
        }
        ScanResult::NotFound
    }

    /// Absolute address of the signature's first match in `module`, which
    /// the caller has already waited for.
    pub fn locate(module: &ModuleRange, signature: &Signature) -> Result<usize> {
        tracing::debug!(
            "scanning {} ({:#X}, {:#X} bytes) for {}",
            signature.module(), module.base, module.size, signature.name()
        );

        let result = unsafe { scan_module(module, signature) };
        if let Some(offset) = result.offset() {
            tracing::debug!("{} found at {}+{:#X}", signature.name(), signature.module(), offset);
        } else {
            tracing::warn!("{} pattern: {}", signature.name(), signature.source());
        }
        signature.address_in(module.base, result)
    }
}
