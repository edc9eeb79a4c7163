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

use clap::Parser;
use log::{error, info};
use machina::core::config::SchedulerConfig;
use machina::core::devices::{self, ScriptCpu};
use machina::core::error::Result;
use machina::core::Scheduler;
use std::path::PathBuf;

/// Runs the reference machine for a number of frames
#[derive(Parser)]
#[command(name = "machina")]
#[command(about = "Deterministic hardware scheduling demo", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of frames to run
    #[arg(short = 'f', long, default_value = "60")]
    frames: u64,

    /// Write the final scheduler snapshot as JSON
    #[arg(long)]
    dump_state: Option<PathBuf>,

    /// Write the final scheduler snapshot in binary form
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Play the mixer output on the default audio device
    #[cfg(feature = "audio")]
    #[arg(short = 'a', long)]
    audio: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<SchedulerConfig> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            SchedulerConfig::load(path)?
        }
        None => SchedulerConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let mut sched = devices::demo_machine(config)?;
    sched.start()?;

    #[cfg(feature = "audio")]
    let mut audio = if args.audio {
        match machina::core::audio::AudioBackend::new(sched.config().output_rate) {
            Ok(backend) => Some(backend),
            Err(e) => {
                error!("Audio disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let log_interval = (args.frames / 10).max(1);
    for frame in 0..args.frames {
        sched.advance_one_frame()?;

        #[cfg(feature = "audio")]
        match audio.as_mut() {
            Some(backend) => {
                backend.pump(&mut sched);
            }
            None => {
                sched.take_audio();
            }
        }
        #[cfg(not(feature = "audio"))]
        sched.take_audio();

        if frame % log_interval == 0 && frame > 0 {
            report_progress(&sched, frame);
        }
    }

    let diagnostics = sched.diagnostics();
    info!("Emulation completed at {}", sched.now());
    info!("Frames: {}", sched.frame_count());
    info!(
        "Timers fired: {} | Horizons: {} | Mixed frames: {}",
        diagnostics.timers_fired, diagnostics.horizons, diagnostics.mixed_frames
    );
    info!(
        "Faults: {} unhandled reads, {} unhandled writes, {} device, {} not modeled",
        diagnostics.unhandled_reads,
        diagnostics.unhandled_writes,
        diagnostics.device_faults,
        diagnostics.not_modeled
    );

    let state = sched.save_state();
    if let Some(path) = &args.dump_state {
        std::fs::write(path, state.to_json()?)?;
        info!("Snapshot written to: {}", path.display());
    }
    if let Some(path) = &args.snapshot {
        std::fs::write(path, state.encode()?)?;
        info!("Binary snapshot written to: {}", path.display());
    }

    sched.stop()
}

fn report_progress(sched: &Scheduler, frame: u64) {
    let serviced = sched
        .lookup(":cpu")
        .and_then(|cpu| sched.device_as::<ScriptCpu>(cpu))
        .map_or(0, |cpu| cpu.serviced.len());
    info!(
        "Progress: frame {} | time {} | interrupts serviced: {}",
        frame,
        sched.now(),
        serviced
    );
}

fn main() -> Result<()> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only log if the error is NOT "file not found"
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize logger with default level INFO
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("machina v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("Emulation failed: {}", e);
        return Err(e);
    }
    Ok(())
}
