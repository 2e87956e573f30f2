//! Headless recorder for continuous analog-input scans.
//!
//! Drives the simulated board through daq-scan-core:
//! - `record` streams a background scan to a CSV file
//! - `devices` lists attached boards
//! - `recordings` / `delete` manage saved recordings
//! - `monitor` polls digital inputs and a counter through the tick dispatcher
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info daq-recorder record --low 0 --high 3 --rate 1000 --duration 10
//! daq-recorder record --config scan.json --buffers 5
//! ```

mod commands;
mod recorder_state;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};

use daq_scan_core::{
    BufferSizing, CounterDisplay, DeviceSessionConfig, DigitalInputIndicator, DigitalOutputToggle, DigitalPort,
    DiscreteIo, PortDirection, RecordingLength, TickDispatcher,
};
use daq_scan_sim::{SimulatedDaq, Waveform};

use commands::RecordingConfig;
use recorder_state::RecorderState;

/// How often the simulated board's clock writes samples.
const SIM_CLOCK_TICK: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(name = "daq-recorder")]
#[command(about = "Continuous analog-input scan recorder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a continuous scan to a CSV file
    Record(RecordArgs),

    /// List attached boards
    Devices,

    /// List recordings in a directory
    Recordings {
        /// Defaults to the user's recordings directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Delete a recording and its metadata sidecar
    Delete {
        path: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Watch digital inputs and a counter for a while
    Monitor {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        /// Output bit to toggle once per second
        #[arg(long)]
        toggle_bit: Option<u8>,
    },
}

#[derive(clap::Args)]
struct RecordArgs {
    /// JSON settings file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    low: Option<u32>,

    #[arg(long)]
    high: Option<u32>,

    /// Samples per second per channel
    #[arg(long)]
    rate: Option<u32>,

    /// Seconds of data the scan buffer holds
    #[arg(long)]
    buffer_seconds: Option<f64>,

    /// Stop after this many full buffers
    #[arg(long)]
    buffers: Option<u32>,

    /// Wall-clock recording time in seconds for unbounded recordings
    #[arg(long, default_value_t = 10.0)]
    duration: f64,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SignalKind::Sine)]
    signal: SignalKind,
}

#[derive(Clone, Copy, ValueEnum)]
enum SignalKind {
    Ramp,
    Sine,
}

impl RecordArgs {
    fn into_config(self) -> Result<RecordingConfig, String> {
        let mut config = match &self.config {
            Some(path) => RecordingConfig::load(path)?,
            None => RecordingConfig::default(),
        };
        let scan = &mut config.settings.scan;
        if let Some(low) = self.low {
            scan.low_channel = low;
        }
        if let Some(high) = self.high {
            scan.high_channel = high;
        }
        if let Some(rate) = self.rate {
            scan.rate_hz = rate;
        }
        if let Some(seconds) = self.buffer_seconds {
            config.settings.sizing = BufferSizing::Duration { seconds };
        }
        if let Some(n) = self.buffers {
            config.settings.length = RecordingLength::Buffers(n);
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        config.settings.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Record(args) => record(args),
        Commands::Devices => devices(),
        Commands::Recordings { dir } => recordings(dir),
        Commands::Delete { path, dir } => {
            commands::delete_recording(&dir.unwrap_or_else(commands::recordings_dir), &path)
        }
        Commands::Monitor { seconds, toggle_bit } => monitor(Duration::from_secs(seconds), toggle_bit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn simulated_board() -> Result<Arc<SimulatedDaq>, String> {
    let daq = Arc::new(SimulatedDaq::new());
    daq.start_clock(SIM_CLOCK_TICK).map_err(|e| e.to_string())?;
    Ok(daq)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn record(args: RecordArgs) -> Result<(), String> {
    let duration = Duration::from_secs_f64(args.duration.max(0.0));
    let signal = args.signal;
    let config = args.into_config()?;

    let daq = simulated_board()?;
    daq.set_waveform(match signal {
        SignalKind::Ramp => Waveform::Ramp,
        SignalKind::Sine => Waveform::Sine {
            amplitude: 5.0,
            frequency_hz: 1.0,
        },
    });

    let state = RecorderState::new(daq, DeviceSessionConfig::default(), true);

    let output = commands::start_recording(&state, &config)?;
    log::info!("recording to {}", output.display());

    let bounded = config.settings.length != RecordingLength::Unbounded;
    let started = Instant::now();
    let mut last_report = started;
    while commands::is_recording(&state) && (bounded || started.elapsed() < duration) {
        thread::sleep(Duration::from_millis(50));
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if let Some(frame) = state.feed.lock().as_ref().and_then(|f| f.latest()) {
                log::info!("latest frame: {:?}", frame);
            }
        }
    }

    let finished = commands::stop_recording(&state);
    print_json(&commands::get_diagnostics(&state))?;
    state.daq.stop_clock();
    match finished? {
        Some(result) => print_json(&result),
        None => Err("no recording was produced".into()),
    }
}

fn devices() -> Result<(), String> {
    let state = RecorderState::new(Arc::new(SimulatedDaq::new()), DeviceSessionConfig::default(), false);
    print_json(&commands::list_devices(&state)?)
}

fn recordings(dir: Option<PathBuf>) -> Result<(), String> {
    let dir = dir.unwrap_or_else(commands::recordings_dir);
    print_json(&commands::get_recordings(&dir)?)
}

fn monitor(period: Duration, toggle_bit: Option<u8>) -> Result<(), String> {
    let state = RecorderState::new(simulated_board()?, DeviceSessionConfig::default(), false);
    let handle = state.session.acquire().map_err(|e| e.to_string())?;

    let io = DiscreteIo::new(Arc::clone(&state.daq));
    io.configure_digital_port(handle, DigitalPort::FirstPortA, PortDirection::Output)
        .map_err(|e| e.to_string())?;
    io.configure_digital_port(handle, DigitalPort::FirstPortB, PortDirection::Input)
        .map_err(|e| e.to_string())?;

    let input = DigitalInputIndicator::new(io.clone(), handle, DigitalPort::FirstPortB);
    let counter = CounterDisplay::new(io.clone(), handle, 0);
    let toggle = toggle_bit.map(|bit| DigitalOutputToggle::new(io, handle, DigitalPort::FirstPortA, bit));

    let dispatcher = TickDispatcher::new();
    dispatcher.register(Box::new(input.clone()));
    dispatcher.register(Box::new(counter.clone()));
    dispatcher.start().map_err(|e| e.to_string())?;

    let started = Instant::now();
    let mut step: u16 = 0;
    while started.elapsed() < period {
        thread::sleep(Duration::from_secs(1));
        step = step.wrapping_add(1);
        // stand-in for field wiring
        state.daq.set_input_port(DigitalPort::FirstPortB, step & 0xFF);
        state.daq.pulse_counter(0, 10);
        if let Some(toggle) = &toggle {
            if let Err(e) = toggle.toggle() {
                log::warn!("{}", e);
            }
        }
        println!(
            "{} | {} | {}",
            input.label(),
            counter.label(),
            toggle.as_ref().map_or_else(|| "-".to_string(), |t| t.label())
        );
    }

    dispatcher.stop();
    state.daq.stop_clock();
    Ok(())
}
