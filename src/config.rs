//! Knobs the allocator reads once per instance: which placement policy scans
//! the block list and whether freshly returned payloads get scribbled over.

use std::{ffi::CStr, fmt, str::FromStr};

use crate::error::UnknownPolicy;

/// Environment variable selecting the [`Policy`] for [`Config::from_env`].
pub const POLICY_VAR: &CStr = c"ALLOCATOR_ALGORITHM";

/// Environment variable enabling [`DebugFill::Sentinel`] when set to `1`.
pub const DEBUG_FILL_VAR: &CStr = c"ALLOCATOR_SCRIBBLE";

/// Which block the allocator reuses when more than one could hold a request.
/// Every policy scans the whole block list in list order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// First block with enough free capacity.
    #[default]
    FirstFit,
    /// Block whose free capacity exceeds the request by the least. An exact
    /// match ends the scan; on ties the block found first wins.
    BestFit,
    /// Block with the largest free capacity; on ties the block found first wins.
    WorstFit,
}

impl Policy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstFit => "first_fit",
            Self::BestFit => "best_fit",
            Self::WorstFit => "worst_fit",
        }
    }
}

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_fit" => Ok(Self::FirstFit),
            "best_fit" => Ok(Self::BestFit),
            "worst_fit" => Ok(Self::WorstFit),
            _ => Err(UnknownPolicy),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the payload handed out by an allocation is overwritten first.
///
/// Scribbling the whole payload capacity with [`DebugFill::SENTINEL`] makes
/// reads of memory the caller never wrote stand out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugFill {
    #[default]
    Off,
    Sentinel,
}

impl DebugFill {
    pub const SENTINEL: u8 = 0xAA;
}

/// Per-instance allocator configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
    pub policy: Policy,
    pub debug_fill: DebugFill,
}

impl Config {
    pub const DEFAULT: Self = Self {
        policy: Policy::FirstFit,
        debug_fill: DebugFill::Off,
    };

    #[must_use]
    pub const fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_debug_fill(mut self, debug_fill: DebugFill) -> Self {
        self.debug_fill = debug_fill;
        self
    }

    /// Builds a config from [`POLICY_VAR`] and [`DEBUG_FILL_VAR`].
    ///
    /// Unset or unrecognised values keep their defaults. The variables are read
    /// through `getenv` so no allocation happens here, which matters when this
    /// runs inside the global allocator.
    #[cfg(unix)]
    pub fn from_env() -> Self {
        let policy = env_bytes(POLICY_VAR)
            .and_then(|value| std::str::from_utf8(value).ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();

        let debug_fill = match env_bytes(DEBUG_FILL_VAR) {
            Some(b"1") => DebugFill::Sentinel,
            _ => DebugFill::Off,
        };

        Self { policy, debug_fill }
    }

    /// There is no allocation-free way to read the environment here, so the
    /// defaults are used.
    #[cfg(not(unix))]
    pub fn from_env() -> Self {
        Self::DEFAULT
    }
}

#[cfg(unix)]
fn env_bytes(name: &CStr) -> Option<&'static [u8]> {
    unsafe {
        let value = libc::getenv(name.as_ptr());
        if value.is_null() {
            return None;
        }

        Some(CStr::from_ptr(value).to_bytes())
    }
}
