use clap::{Args as ClapArgs, Parser, Subcommand};
use env_logger::Env;
use log::{debug, error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};

use smu_sweep::config::{load_config, load_config_or_default, AppConfig};
use smu_sweep::export::default_output_path;
use smu_sweep::{
    available_backends, plot_iv, write_csv, CancelToken, ChannelObserver, ConnectionResolver,
    ControllerSettings, CurrentRange, MeasurementSample, SimulatedBus, SimulatedLoad, SmuError,
    SweepController, SweepEvent, SweepResult,
};

/// Keithley 2450 I-V sweep tool
#[derive(Parser, Debug)]
#[command(name = "iv-sweep")]
#[command(about = "Voltage sweeps with current measurement on a Keithley 2450 over GPIB", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Use the built-in simulated instrument
    #[arg(long, global = true)]
    simulate: bool,

    /// GPIB address of the instrument (default from config)
    #[arg(short, long, value_name = "ADDR", global = true)]
    address: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connection backends and whether they are usable here
    Backends,
    /// Connect and print the instrument identity
    Identify,
    /// Run a voltage sweep
    Sweep(SweepArgs),
    /// Change the instrument's GPIB address
    SetAddress {
        /// New primary address (1-30)
        new_address: u8,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[derive(ClapArgs, Debug)]
struct SweepArgs {
    /// Start voltage (V)
    #[arg(long, allow_hyphen_values = true)]
    start: Option<f64>,

    /// Stop voltage (V)
    #[arg(long, allow_hyphen_values = true)]
    stop: Option<f64>,

    /// Number of points including both ends
    #[arg(long)]
    steps: Option<usize>,

    /// Current compliance limit (A)
    #[arg(long)]
    limit: Option<f64>,

    /// Current range, e.g. "Auto", "10 nA", "1 mA"
    #[arg(long)]
    range: Option<CurrentRange>,

    /// Settling delay per point (ms)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// CSV output file (default: timestamped file in the export directory)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Plot the I-V curve in the terminal when done
    #[arg(long)]
    plot: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // An explicitly given file must load; otherwise fall back to defaults
    let mut config = match args.config.as_deref() {
        Some(path) => load_config(Some(path))?,
        None => load_config_or_default(None),
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.logging.log_level.clone());
    initialize_logging(&log_level)?;

    if args.simulate {
        config.connection.simulate = true;
    }
    if let Some(address) = args.address {
        config.connection.address = address;
    }
    log_startup_info(&config, args.config.as_deref());

    match args.command {
        Command::Backends => print_backends(),
        Command::Identify => identify(&config),
        Command::Sweep(sweep) => run_sweep(&mut config, sweep),
        Command::SetAddress { new_address } => set_address(&config, new_address),
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// Helper Functions

/// Log startup information
fn log_startup_info(config: &AppConfig, config_path: Option<&Path>) {
    info!("=== IV Sweep ===");
    match config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: defaults and environment"),
    }
    if config.connection.simulate {
        info!(
            "Backend: simulated 2450 with a {} Ω load",
            config.simulation.load_ohms
        );
    }
    info!("GPIB address: {}", config.connection.address);
}

/// Resolver for the configured backends. In simulation mode a fresh bus is
/// created with one SMU at the configured address.
fn build_resolver(config: &AppConfig) -> ConnectionResolver {
    let bus = config.connection.simulate.then(|| {
        SimulatedBus::with_smu(
            config.connection.address,
            SimulatedLoad::Resistor(config.simulation.load_ohms),
        )
    });
    ConnectionResolver::from_config(&config.connection, bus)
}

fn connect(
    config: &AppConfig,
    resolver: &ConnectionResolver,
) -> Result<SweepController, SmuError> {
    for backend in available_backends() {
        debug!(
            "Backend {}: {} ({})",
            backend.name,
            if backend.available { "available" } else { "unavailable" },
            backend.detail
        );
    }
    for candidate in resolver.candidates(config.connection.address) {
        debug!("Candidate: {candidate}");
    }

    let mut controller = SweepController::new(ControllerSettings::from(&config.instrument));
    controller.connect(resolver, config.connection.address)?;
    Ok(controller)
}

fn print_backends() -> Result<(), Box<dyn std::error::Error>> {
    for backend in available_backends() {
        let mark = if backend.available { "✓" } else { "✗" };
        println!("{mark} {:<16} {}", backend.name, backend.detail);
    }
    Ok(())
}

fn identify(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = build_resolver(config);
    let mut controller = connect(config, &resolver)?;
    if let Some(handle) = controller.handle() {
        println!("{}", handle.identity().unwrap_or("(no identity)"));
        println!("Resource: {}", handle.resource());
    }
    controller.disconnect()?;
    Ok(())
}

fn set_address(config: &AppConfig, new_address: u8) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = build_resolver(config);
    let mut controller = connect(config, &resolver)?;

    match controller.change_address(&resolver, new_address) {
        Ok(change) => {
            info!("✓ GPIB address is now {}", change.new);
            if change.reconnected {
                info!("✓ Reconnected at GPIB{}", change.new);
            } else {
                info!("Session still uses the old address, reconnect to continue");
            }
            Ok(())
        }
        Err(e) => {
            error!("✗ Address change failed: {}", e);
            Err(e.into())
        }
    }
}

fn apply_overrides(config: &mut AppConfig, sweep: &SweepArgs) {
    let measurement = &mut config.measurement;
    if let Some(v) = sweep.start {
        measurement.start_voltage = v;
    }
    if let Some(v) = sweep.stop {
        measurement.stop_voltage = v;
    }
    if let Some(n) = sweep.steps {
        measurement.steps = n;
    }
    if let Some(a) = sweep.limit {
        measurement.current_limit = a;
    }
    if let Some(range) = sweep.range {
        measurement.current_range = range;
    }
    if let Some(ms) = sweep.delay_ms {
        measurement.delay_ms = ms;
    }
}

/// Cancel the sweep on Ctrl+C. The instrument finishes the point in progress
/// and the controller switches the output off before returning.
fn cancel_sweep_on_ctrlc(total_points: usize) -> Result<CancelToken, ctrlc::Error> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();

    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            warn!("Ctrl+C: cancelling the {total_points}-point sweep after the current point");
        }
        handler_token.cancel();
    })?;

    Ok(cancel)
}

fn format_resistance(resistance: Option<f64>) -> String {
    resistance
        .map(|r| format!("{r:.4e} Ω"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_sample(index: usize, total: usize, sample: &MeasurementSample) {
    println!(
        "[{:>4}/{}] V = {:>+.4} V  I = {:>+.4e} A  R = {}",
        index + 1,
        total,
        sample.voltage,
        sample.current,
        format_resistance(sample.resistance)
    );
}

/// Run a sweep on a worker thread and print progress as it arrives
fn run_sweep(config: &mut AppConfig, sweep: SweepArgs) -> Result<(), Box<dyn std::error::Error>> {
    apply_overrides(config, &sweep);
    config.validate()?;
    let sweep_config = config.measurement.sweep_config();
    let total = sweep_config.steps;

    let resolver = build_resolver(config);
    let mut controller = connect(config, &resolver)?;
    controller.setup_measurement(&sweep_config)?;

    let cancel = cancel_sweep_on_ctrlc(total)?;
    let (mut observer, events) = ChannelObserver::channel();

    info!("Starting sweep...");
    let outcome = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let result = controller.perform_sweep(&sweep_config, &cancel, &mut observer);
            // Closes the channel for the printing loop below
            drop(observer);
            result
        });

        for event in events.iter() {
            match event {
                SweepEvent::Sample { index, sample } => print_sample(index, total, &sample),
                SweepEvent::Completed(result) => {
                    info!("Sweep finished with {} points", result.len())
                }
                SweepEvent::Failed { message, .. } => warn!("Sweep aborted: {message}"),
            }
        }

        worker
            .join()
            .unwrap_or_else(|_| Err(SmuError::Backend("sweep thread panicked".to_string())))
    });

    let output = sweep
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&config.export));

    let result = match outcome {
        Ok(result) => result,
        Err(SmuError::Sweep(e)) => {
            error!("✗ Sweep failed: {}", e);
            // Keep what was measured before the failure
            if !e.partial.is_empty() {
                write_csv(&output, &e.partial, &config.export)?;
                info!("Partial data saved to {}", output.display());
            }
            return Err(SmuError::Sweep(e).into());
        }
        Err(e) => {
            error!("✗ Sweep failed: {}", e);
            return Err(e.into());
        }
    };

    if result.is_complete() {
        info!("✓ Sweep completed successfully!");
    } else {
        info!(
            "✓ Sweep stopped by user after {} of {} points",
            result.len(),
            total
        );
    }

    save_and_plot(config, &result, &output, sweep.plot)?;

    info!("Cleaning up and shutting down...");
    controller.disconnect()?;
    info!("Cleanup complete");
    Ok(())
}

fn save_and_plot(
    config: &AppConfig,
    result: &SweepResult,
    output: &Path,
    plot: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if result.is_empty() {
        warn!("No points measured, nothing to save");
        return Ok(());
    }
    write_csv(output, result.samples(), &config.export)?;
    info!("Data saved to {}", output.display());

    if plot {
        plot_iv(
            result.samples(),
            Some(&format!(
                "I-V Sweep {} V to {} V",
                config.measurement.start_voltage, config.measurement.stop_voltage
            )),
            None,
            Some(30),
        )?;
    }
    Ok(())
}

/// Log level from `--log-level` or the config file, timestamps in ms
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = log_level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Warning: Invalid log level '{log_level}', using 'info'");
        LevelFilter::Info
    });

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
