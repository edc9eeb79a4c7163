// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scheduler configuration
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults
//! 2. a TOML file (every key optional)
//! 3. `MACHINA_*` environment variables (a `.env` file is loaded by the
//!    binary before they are read)
//!
//! ```toml
//! machine = "demo"
//! max_quantum_hz = 2000
//! stream_update_hz = 50
//! frame_rate_hz = 60
//! output_rate = 48000
//! unmapped_value = 0xFFFFFFFF
//! strict_handles = true
//! ```

use crate::core::error::{EmulatorError, Result};
use crate::core::time::check_clock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the environment overrides
pub const ENV_PREFIX: &str = "MACHINA_";

/// Tunables of a scheduling session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Machine name recorded in snapshots
    pub machine: String,

    /// Minimum interleave: CPUs are resynchronised at least this often
    pub max_quantum_hz: u64,

    /// Rate of the machine-level stream flush feeding the mixer (0 = off)
    pub stream_update_hz: u64,

    /// Frames per second for `advance_one_frame`
    pub frame_rate_hz: u64,

    /// Mixer output rate in Hz
    pub output_rate: u32,

    /// Value returned by reads nobody answers (truncated to the width)
    pub unmapped_value: u32,

    /// Treat handles of stopped devices as errors instead of warnings
    pub strict_handles: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            machine: "machina".to_string(),
            max_quantum_hz: 1_000,
            stream_update_hz: 50,
            frame_rate_hz: 60,
            output_rate: 48_000,
            unmapped_value: 0,
            strict_handles: cfg!(debug_assertions),
        }
    }
}

impl SchedulerConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SchedulerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `TomlDe` if it does not parse,
    /// `Config`/`InvalidClock` if a value is out of range.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Config: loaded {}", path.display());
        Ok(config)
    }

    /// Apply `MACHINA_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// Recognised names: `MACHINA_MACHINE`, `MACHINA_MAX_QUANTUM_HZ`,
    /// `MACHINA_STREAM_UPDATE_HZ`, `MACHINA_FRAME_RATE_HZ`,
    /// `MACHINA_OUTPUT_RATE`, `MACHINA_UNMAPPED_VALUE` (decimal or `0x`
    /// hex), `MACHINA_STRICT_HANDLES` (`1/true/yes/on` or
    /// `0/false/no/off`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        if let Some(raw) = var("MACHINE") {
            self.machine = raw.trim().to_string();
        }
        if let Some(raw) = var("MAX_QUANTUM_HZ") {
            self.max_quantum_hz = parse_number("MAX_QUANTUM_HZ", &raw)?;
        }
        if let Some(raw) = var("STREAM_UPDATE_HZ") {
            self.stream_update_hz = parse_number("STREAM_UPDATE_HZ", &raw)?;
        }
        if let Some(raw) = var("FRAME_RATE_HZ") {
            self.frame_rate_hz = parse_number("FRAME_RATE_HZ", &raw)?;
        }
        if let Some(raw) = var("OUTPUT_RATE") {
            self.output_rate = to_u32("OUTPUT_RATE", parse_number("OUTPUT_RATE", &raw)?)?;
        }
        if let Some(raw) = var("UNMAPPED_VALUE") {
            self.unmapped_value = to_u32("UNMAPPED_VALUE", parse_number("UNMAPPED_VALUE", &raw)?)?;
        }
        if let Some(raw) = var("STRICT_HANDLES") {
            self.strict_handles = parse_flag("STRICT_HANDLES", &raw)?;
        }
        self.validate()
    }

    /// Check every rate is usable
    pub fn validate(&self) -> Result<()> {
        check_clock(self.max_quantum_hz)?;
        check_clock(self.frame_rate_hz)?;
        check_clock(self.output_rate as u64)?;
        if self.stream_update_hz != 0 {
            check_clock(self.stream_update_hz)?;
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    let value = raw.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|e| EmulatorError::Config(format!("{}{}='{}': {}", ENV_PREFIX, key, raw, e)))
}

fn to_u32(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| EmulatorError::Config(format!("{}{}={} does not fit 32 bits", ENV_PREFIX, key, value)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    let v = raw.trim();
    if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on") {
        Ok(true)
    } else if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") || v.eq_ignore_ascii_case("off") {
        Ok(false)
    } else {
        Err(EmulatorError::Config(format!(
            "{}{}='{}' is not a boolean",
            ENV_PREFIX, key, raw
        )))
    }
}
