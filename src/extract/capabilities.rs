//! Registry of optional text-extraction backends.
//!
//! Every backend is a Cargo feature. The compiled-in set is narrowed once at
//! startup (`--disable-backend`, `NARA_DISABLED_BACKENDS`) and stays read-only
//! afterwards. Extractors query the registry by value before doing any work
//! and answer with an "unavailable" notice when their slot is empty.

use once_cell::sync::OnceCell;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Named backend slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Record-level HWP 5.0 reader (primary HWP strategy)
    HwpLoader,
    /// Raw OLE stream scan (fallback HWP strategy)
    HwpOle,
    Pdf,
    Docx,
    Xlsx,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::HwpLoader,
        Backend::HwpOle,
        Backend::Pdf,
        Backend::Docx,
        Backend::Xlsx,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Backend::HwpLoader => "hwp-loader",
            Backend::HwpOle => "hwp-ole",
            Backend::Pdf => "pdf",
            Backend::Docx => "docx",
            Backend::Xlsx => "xlsx",
        }
    }

    /// Whether the backend was linked into this build.
    pub fn compiled_in(self) -> bool {
        match self {
            Backend::HwpLoader => cfg!(feature = "hwp-loader"),
            Backend::HwpOle => cfg!(feature = "hwp-ole"),
            Backend::Pdf => cfg!(feature = "pdf"),
            Backend::Docx => cfg!(feature = "docx"),
            Backend::Xlsx => cfg!(feature = "xlsx"),
        }
    }

    fn bit(self) -> u8 {
        match self {
            Backend::HwpLoader => 1 << 0,
            Backend::HwpOle => 1 << 1,
            Backend::Pdf => 1 << 2,
            Backend::Docx => 1 << 3,
            Backend::Xlsx => 1 << 4,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Backend::ALL
            .into_iter()
            .find(|b| b.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Backend::ALL.iter().map(|b| b.name()).collect();
                format!("unknown backend '{}' (expected one of: {})", s.trim(), known.join(", "))
            })
    }
}

/// Snapshot of which backend slots are bound to a real implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    bits: u8,
}

impl Capabilities {
    /// Every backend compiled into this build.
    pub fn compiled() -> Self {
        let bits = Backend::ALL
            .into_iter()
            .filter(|b| b.compiled_in())
            .fold(0, |acc, b| acc | b.bit());
        Self { bits }
    }

    /// No backend at all; every optional format reports itself unavailable.
    #[cfg(test)]
    pub fn none() -> Self {
        Self { bits: 0 }
    }

    pub fn without(self, backend: Backend) -> Self {
        Self {
            bits: self.bits & !backend.bit(),
        }
    }

    pub fn has(&self, backend: Backend) -> bool {
        self.bits & backend.bit() != 0
    }

    pub fn available(&self) -> Vec<Backend> {
        Backend::ALL.into_iter().filter(|b| self.has(*b)).collect()
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::compiled()
    }
}

static REGISTRY: OnceCell<Capabilities> = OnceCell::new();

/// Fixes the process-wide registry. Only the first call has an effect.
pub fn install(capabilities: Capabilities) -> Capabilities {
    let installed = *REGISTRY.get_or_init(|| capabilities);
    if installed != capabilities {
        warn!(target: "capabilities", "Backend registry already installed; ignoring later update");
    }
    installed
}

/// The process-wide registry, defaulting to the compiled-in set.
pub fn current() -> Capabilities {
    *REGISTRY.get_or_init(Capabilities::compiled)
}
