use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

use crate::config::InstrumentConfig;
use crate::error::{SmuError, SweepError};
use crate::instrument::{commands, AddressChange, InstrumentHandle};
use crate::observer::{CancelToken, SweepObserver};
use crate::resolver::ConnectionResolver;
use crate::types::{MeasurementSample, SweepConfig, SweepResult, SweepStatus, Terminals};

/// Lifecycle of the controller.
///
/// `Sweeping` lasts for the duration of [`SweepController::perform_sweep`];
/// a finished, cancelled or failed sweep leaves the controller `Configured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connected,
    Configured,
    Sweeping,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Disconnected => "disconnected",
            ControllerState::Connected => "connected",
            ControllerState::Configured => "configured",
            ControllerState::Sweeping => "sweeping",
        };
        f.write_str(name)
    }
}

/// Instrument-side settings that stay fixed for the lifetime of a controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub small_current_threshold: f64,
    pub nplc: f64,
    pub terminals: Terminals,
    pub source_readback: bool,
    pub reset_on_connect: bool,
    pub reconnect_after_address_change: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings::from(&InstrumentConfig::default())
    }
}

impl From<&InstrumentConfig> for ControllerSettings {
    fn from(config: &InstrumentConfig) -> Self {
        Self {
            small_current_threshold: config.small_current_threshold,
            nplc: config.nplc,
            terminals: config.terminals,
            source_readback: config.source_readback,
            reset_on_connect: config.reset_on_connect,
            reconnect_after_address_change: config.reconnect_after_address_change,
        }
    }
}

/// Drives one Keithley 2450 through setup and voltage sweeps.
///
/// All instrument traffic goes through `&mut self`, so commands are never
/// interleaved. Callers running a sweep on a background thread must not
/// issue other instrument operations until it returns.
///
/// # Examples
///
/// ```
/// use smu_sweep::{
///     CancelToken, ConnectionResolver, ConnectionStrategy, ControllerSettings, NoopObserver,
///     SimulatedBus, SimulatedLoad, SweepConfig, SweepController,
/// };
///
/// let bus = SimulatedBus::with_smu(18, SimulatedLoad::Resistor(1000.0));
/// let resolver = ConnectionResolver::builder()
///     .candidate(ConnectionStrategy::Simulated(bus))
///     .build();
///
/// let mut controller = SweepController::new(ControllerSettings::default());
/// controller.connect(&resolver, 18)?;
///
/// let config = SweepConfig::new(0.0, 1.0, 5).with_delay(std::time::Duration::ZERO);
/// controller.setup_measurement(&config)?;
/// let result = controller.perform_sweep(&config, &CancelToken::new(), &mut NoopObserver)?;
/// assert_eq!(result.len(), 5);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SweepController {
    handle: Option<InstrumentHandle>,
    state: ControllerState,
    settings: ControllerSettings,
}

impl SweepController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            handle: None,
            state: ControllerState::Disconnected,
            settings,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&InstrumentHandle> {
        self.handle.as_ref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.handle.as_ref().and_then(|h| h.identity())
    }

    fn handle_mut(&mut self) -> Result<&mut InstrumentHandle, SmuError> {
        self.handle.as_mut().ok_or(SmuError::NotConnected)
    }

    /// Resolve a session at `address` and take ownership of it.
    ///
    /// An already open session is closed first.
    pub fn connect(
        &mut self,
        resolver: &ConnectionResolver,
        address: u8,
    ) -> Result<&InstrumentHandle, SmuError> {
        self.disconnect()?;
        let handle = resolver.resolve(address)?;
        self.attach(handle)
    }

    /// Take ownership of an already open session and prepare the instrument.
    ///
    /// If the instrument does not answer the preparation commands the
    /// session is closed again.
    pub fn attach(&mut self, handle: InstrumentHandle) -> Result<&InstrumentHandle, SmuError> {
        self.disconnect()?;
        self.handle = Some(handle);
        self.state = ControllerState::Connected;

        if let Err(e) = self.prepare() {
            warn!("Instrument did not respond after connecting: {e}");
            let _ = self.disconnect();
            return Err(e);
        }
        self.handle.as_ref().ok_or(SmuError::NotConnected)
    }

    fn prepare(&mut self) -> Result<(), SmuError> {
        let reset = self.settings.reset_on_connect;
        let handle = self.handle_mut()?;
        if reset {
            handle.write(commands::RESET)?;
            handle.write(commands::CLEAR_STATUS)?;
        }

        let idn = handle.identify()?;
        if !idn.to_uppercase().contains(commands::MODEL_MARKER) {
            warn!("Connected to {idn}, which may not be a Keithley 2450 SMU");
        } else {
            info!(
                "Connected to {} at GPIB{}",
                idn.split(',').nth(1).unwrap_or(&idn).trim(),
                handle.address()
            );
        }
        Ok(())
    }

    /// Switch the output off and close the session. Does nothing when
    /// already disconnected.
    pub fn disconnect(&mut self) -> Result<(), SmuError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        self.state = ControllerState::Disconnected;
        if let Err(e) = handle.write(commands::OUTPUT_OFF) {
            warn!("Could not switch output off before disconnecting: {e}");
        }
        info!("Disconnecting from {}", handle.resource());
        handle.close()
    }

    pub fn output_on(&mut self) -> Result<(), SmuError> {
        self.handle_mut()?.write(commands::OUTPUT_ON)
    }

    pub fn output_off(&mut self) -> Result<(), SmuError> {
        self.handle_mut()?.write(commands::OUTPUT_OFF)
    }

    /// Send one setup command and read the error queue. Any queued error
    /// means the instrument rejected the command.
    fn configure(&mut self, command: &str) -> Result<(), SmuError> {
        let handle = self.handle_mut()?;
        let rejected = |reason: String| SmuError::Configuration {
            command: command.to_string(),
            reason,
        };
        handle.write(command).map_err(|e| rejected(e.to_string()))?;
        match handle.next_error().map_err(|e| rejected(e.to_string()))? {
            None => Ok(()),
            Some((code, message)) => Err(rejected(format!("{code}, {message}"))),
        }
    }

    /// Configure voltage sourcing and current measurement for `config`.
    ///
    /// Allowed when connected or already configured. On a rejected command
    /// the output is switched off and the controller falls back to
    /// `Connected`.
    pub fn setup_measurement(&mut self, config: &SweepConfig) -> Result<(), SmuError> {
        if self.handle.is_none() {
            return Err(SmuError::NotConnected);
        }
        config.validate()?;

        // Errors left in the queue would be blamed on the first setup command
        let setup = [
            commands::CLEAR_STATUS.to_string(),
            commands::terminals(self.settings.terminals),
            commands::SOURCE_FUNCTION_VOLTAGE.to_string(),
            commands::source_range(config.source_range()),
            commands::current_limit(config.current_limit),
            commands::MEASURE_FUNCTION_CURRENT.to_string(),
            commands::current_range(config.current_range),
            commands::nplc(self.settings.nplc),
            commands::source_readback(self.settings.source_readback),
        ];

        info!(
            "Configuring sweep {} V to {} V, {} steps, limit {} A, range {}",
            config.start_voltage,
            config.stop_voltage,
            config.steps,
            config.current_limit,
            config.current_range
        );

        for command in &setup {
            if let Err(e) = self.configure(command) {
                warn!("Setup failed: {e}");
                if let Err(off) = self.output_off() {
                    warn!("Could not switch output off: {off}");
                }
                self.state = ControllerState::Connected;
                return Err(e);
            }
        }

        self.state = ControllerState::Configured;
        Ok(())
    }

    fn measure_point(&mut self, voltage: f64, delay: Duration) -> Result<f64, SmuError> {
        let handle = self.handle_mut()?;
        handle.write(&commands::source_voltage(voltage))?;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let response = handle.query(commands::MEASURE_CURRENT)?;
        commands::parse_reading(&response)
    }

    /// Run the sweep described by `config`.
    ///
    /// Requires a prior [`setup_measurement`](Self::setup_measurement).
    /// Every point is reported to `observer` right after it is taken. When
    /// `cancel` is set the sweep stops before the next point and returns the
    /// samples so far with [`SweepStatus::Cancelled`]. A failing point ends
    /// the sweep with [`SmuError::Sweep`], which keeps the earlier samples.
    pub fn perform_sweep(
        &mut self,
        config: &SweepConfig,
        cancel: &CancelToken,
        observer: &mut dyn SweepObserver,
    ) -> Result<SweepResult, SmuError> {
        if self.state != ControllerState::Configured {
            return Err(SmuError::InvalidState {
                expected: ControllerState::Configured.to_string(),
                actual: self.state.to_string(),
            });
        }
        config.validate()?;

        let voltages = config.voltages();
        let threshold = self.settings.small_current_threshold;
        let mut samples = Vec::with_capacity(voltages.len());

        info!("Sweep started: {} points", voltages.len());
        self.state = ControllerState::Sweeping;

        if let Err(e) = self.output_on() {
            self.state = ControllerState::Configured;
            let error = SmuError::Sweep(SweepError {
                partial: samples,
                index: 0,
                voltage: voltages[0],
                reason: format!("Output on failed: {e}"),
            });
            observer.on_error(&error);
            return Err(error);
        }

        let mut status = SweepStatus::Completed;
        for (index, &voltage) in voltages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Sweep cancelled after {} of {} points", index, voltages.len());
                status = SweepStatus::Cancelled;
                break;
            }

            match self.measure_point(voltage, config.delay) {
                Ok(current) => {
                    let sample = MeasurementSample::new(voltage, current, threshold);
                    debug!(
                        "Point {}/{}: V = {:.6} V, I = {:.6e} A, R = {}",
                        index + 1,
                        voltages.len(),
                        sample.voltage,
                        sample.current,
                        sample
                            .resistance
                            .map(|r| format!("{r:.3} Ω"))
                            .unwrap_or_else(|| "n/a".to_string())
                    );
                    samples.push(sample);
                    observer.on_sample(index, &sample);
                }
                Err(e) => {
                    warn!("Point {} at {voltage} V failed: {e}", index + 1);
                    self.finish_sweep();
                    let error = SmuError::Sweep(SweepError {
                        partial: samples,
                        index,
                        voltage,
                        reason: e.to_string(),
                    });
                    observer.on_error(&error);
                    return Err(error);
                }
            }
        }

        self.finish_sweep();
        let result = SweepResult::new(samples, status);
        if result.is_complete() {
            info!("Sweep completed: {} points", result.len());
        }
        observer.on_complete(&result);
        Ok(result)
    }

    fn finish_sweep(&mut self) {
        if let Err(e) = self.output_off() {
            warn!("Could not switch output off after sweep: {e}");
        }
        self.state = ControllerState::Configured;
    }

    /// Reprogram the instrument's GPIB address and, when configured, reopen
    /// the session at the new address.
    ///
    /// After a reconnect the measurement setup must be repeated; the
    /// controller is left `Connected`. If the new address cannot be reached
    /// the controller ends up `Disconnected`.
    pub fn change_address(
        &mut self,
        resolver: &ConnectionResolver,
        new_address: u8,
    ) -> Result<AddressChange, SmuError> {
        let mut change = self.handle_mut()?.set_gpib_address(new_address)?;
        info!(
            "GPIB address changed from {} to {}",
            change
                .previous
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            change.new
        );

        if !self.settings.reconnect_after_address_change {
            return Ok(change);
        }

        if let Some(old) = self.handle.take() {
            if let Err(e) = old.close() {
                warn!("Closing the old session failed: {e}");
            }
        }
        self.state = ControllerState::Disconnected;

        let handle = resolver.resolve(new_address).map_err(|e| {
            SmuError::AddressChange(format!(
                "Address set to {new_address} but reconnecting failed: {e}"
            ))
        })?;
        self.attach(handle).map_err(|e| {
            SmuError::AddressChange(format!(
                "Reconnected at {new_address} but the instrument did not respond: {e}"
            ))
        })?;
        change.reconnected = true;
        Ok(change)
    }
}

impl Drop for SweepController {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{SimulatedBus, SimulatedLoad, SimulatedSmu, Transport};
    use crate::observer::{ChannelObserver, NoopObserver, SweepEvent};
    use crate::resolver::ConnectionStrategy;
    use std::time::Duration;

    fn resolver_for(bus: &SimulatedBus) -> ConnectionResolver {
        ConnectionResolver::builder()
            .candidate(ConnectionStrategy::Simulated(bus.clone()))
            .attempts(1)
            .retry_delay(Duration::ZERO)
            .build()
    }

    fn connected(smu: SimulatedSmu) -> (SweepController, SimulatedBus) {
        let bus = SimulatedBus::new();
        bus.attach(smu);
        let mut controller = SweepController::new(ControllerSettings::default());
        controller.connect(&resolver_for(&bus), 18).unwrap();
        (controller, bus)
    }

    fn sweep(start: f64, stop: f64, steps: usize) -> SweepConfig {
        SweepConfig::new(start, stop, steps).with_delay(Duration::ZERO)
    }

    #[test]
    fn test_one_kilohm_end_to_end() {
        let (mut controller, bus) =
            connected(SimulatedSmu::new(18, SimulatedLoad::Resistor(1000.0)));
        assert_eq!(controller.state(), ControllerState::Connected);

        let config = sweep(0.0, 1.0, 5);
        controller.setup_measurement(&config).unwrap();
        assert_eq!(controller.state(), ControllerState::Configured);

        let result = controller
            .perform_sweep(&config, &CancelToken::new(), &mut NoopObserver)
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.voltages(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(result.samples()[0].resistance, None);
        for sample in &result.samples()[1..] {
            let r = sample.resistance.unwrap();
            assert!((r - 1000.0).abs() < 1e-9, "R = {r}");
        }

        assert_eq!(controller.state(), ControllerState::Configured);
        assert!(!bus.output_on(0));
    }

    #[test]
    fn test_setup_command_sequence() {
        let (mut controller, bus) = connected(SimulatedSmu::new(18, SimulatedLoad::Open));
        controller
            .setup_measurement(&sweep(-2.0, 1.0, 3).with_current_limit(0.01))
            .unwrap();

        let sent: Vec<String> = bus
            .command_log(0)
            .into_iter()
            .filter(|c| c != commands::ERROR_QUERY)
            .skip_while(|c| c != "ROUT:TERM REAR")
            .collect();
        assert_eq!(
            sent,
            vec![
                "ROUT:TERM REAR",
                "SOUR:FUNC VOLT",
                "SOUR:VOLT:RANG 2",
                "SOUR:VOLT:ILIM 0.01",
                "SENS:FUNC \"CURR\"",
                "SENS:CURR:RANG:AUTO ON",
                "SENS:CURR:NPLC 1",
                "SOUR:VOLT:READ ON",
            ]
        );
    }

    #[test]
    fn test_cancel_after_third_point() {
        let (mut controller, _bus) =
            connected(SimulatedSmu::new(18, SimulatedLoad::Resistor(1000.0)));
        let config = sweep(0.0, 9.0, 10).with_current_limit(1.0);
        controller.setup_measurement(&config).unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut observer = move |index: usize, _: &MeasurementSample| {
            if index == 2 {
                trigger.cancel();
            }
        };

        let result = controller
            .perform_sweep(&config, &cancel, &mut observer)
            .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.status(), SweepStatus::Cancelled);
        assert_eq!(controller.state(), ControllerState::Configured);
    }

    #[test]
    fn test_failure_at_fifth_point_keeps_four_samples() {
        let (mut controller, bus) = connected(
            SimulatedSmu::new(18, SimulatedLoad::Resistor(1000.0)).fail_at_measurement(5),
        );
        let config = sweep(0.0, 9.0, 10).with_current_limit(1.0);
        controller.setup_measurement(&config).unwrap();

        let (mut observer, rx) = ChannelObserver::channel();
        match controller.perform_sweep(&config, &CancelToken::new(), &mut observer) {
            Err(SmuError::Sweep(e)) => {
                assert_eq!(e.partial.len(), 4);
                assert_eq!(e.index, 4);
                assert_eq!(e.voltage, 4.0);
                assert_eq!(e.reason, "Instrument timeout");
            }
            other => panic!("expected sweep error, got {other:?}"),
        }

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[4], SweepEvent::Failed { partial, .. } if partial.len() == 4));
        assert!(!bus.output_on(0));
        assert_eq!(controller.state(), ControllerState::Configured);
    }

    #[test]
    fn test_rejected_setup_command() {
        let (mut controller, _bus) = connected(
            SimulatedSmu::new(18, SimulatedLoad::Open).reject_header("SOUR:VOLT:ILIM"),
        );
        match controller.setup_measurement(&sweep(0.0, 1.0, 5)) {
            Err(SmuError::Configuration { command, reason }) => {
                assert_eq!(command, "SOUR:VOLT:ILIM 0.1");
                assert!(reason.contains("-113"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
        assert_eq!(controller.state(), ControllerState::Connected);
    }

    #[test]
    fn test_stale_error_does_not_fail_setup() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let settings = ControllerSettings {
            reset_on_connect: false,
            ..Default::default()
        };
        let mut controller = SweepController::new(settings);
        controller.connect(&resolver_for(&bus), 18).unwrap();

        // Another session leaves an error in the queue
        let mut other = bus.open(18).unwrap();
        other.write("SOUR:BOGUS 1").unwrap();

        controller.setup_measurement(&sweep(0.0, 1.0, 5)).unwrap();
        assert_eq!(controller.state(), ControllerState::Configured);
    }

    #[test]
    fn test_stale_error_after_address_change_without_reconnect() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let resolver = resolver_for(&bus);
        let settings = ControllerSettings {
            reconnect_after_address_change: false,
            ..Default::default()
        };
        let mut controller = SweepController::new(settings);
        controller.connect(&resolver, 18).unwrap();
        controller.change_address(&resolver, 12).unwrap();

        let mut other = bus.open(12).unwrap();
        other.write("print(gpib.bogus)").unwrap();

        controller.setup_measurement(&sweep(0.0, 1.0, 5)).unwrap();
    }

    #[test]
    fn test_unresponsive_after_reconnect_is_address_change_error() {
        let bus = SimulatedBus::new();
        bus.attach(SimulatedSmu::new(18, SimulatedLoad::Open).mute_identity_after_address_change());
        let resolver = ConnectionResolver::builder()
            .candidate(ConnectionStrategy::Simulated(bus))
            .attempts(1)
            .retry_delay(Duration::ZERO)
            .verify_identity(false)
            .build();
        let mut controller = SweepController::new(ControllerSettings::default());
        controller.connect(&resolver, 18).unwrap();

        match controller.change_address(&resolver, 12) {
            Err(SmuError::AddressChange(reason)) => {
                assert!(reason.contains("did not respond"), "{reason}");
            }
            other => panic!("expected address change error, got {other:?}"),
        }
        assert!(!controller.is_connected());
    }

    #[test]
    fn test_observer_sees_sweep_errors_only() {
        let (mut controller, _bus) = connected(
            SimulatedSmu::new(18, SimulatedLoad::Resistor(1000.0)).fail_at_measurement(1),
        );
        let (mut observer, rx) = ChannelObserver::channel();

        // Sweeping before setup is refused without notifying the observer
        let config = sweep(0.0, 1.0, 3);
        assert!(controller
            .perform_sweep(&config, &CancelToken::new(), &mut observer)
            .is_err());
        assert!(rx.try_recv().is_err());

        controller.setup_measurement(&config).unwrap();
        assert!(controller
            .perform_sweep(&config, &CancelToken::new(), &mut observer)
            .is_err());
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SweepEvent::Failed { partial, .. } if partial.is_empty()));
    }

    #[test]
    fn test_sweep_requires_setup() {
        let (mut controller, _bus) = connected(SimulatedSmu::new(18, SimulatedLoad::Open));
        let result = controller.perform_sweep(&sweep(0.0, 1.0, 5), &CancelToken::new(), &mut NoopObserver);
        assert!(matches!(result, Err(SmuError::InvalidState { .. })));
    }

    #[test]
    fn test_setup_requires_connection() {
        let mut controller = SweepController::new(ControllerSettings::default());
        assert!(matches!(
            controller.setup_measurement(&sweep(0.0, 1.0, 5)),
            Err(SmuError::NotConnected)
        ));
        assert_eq!(controller.state(), ControllerState::Disconnected);
    }

    #[test]
    fn test_invalid_sweep_rejected_before_any_command() {
        let (mut controller, bus) = connected(SimulatedSmu::new(18, SimulatedLoad::Open));
        let before = bus.command_log(0).len();
        assert!(matches!(
            controller.setup_measurement(&sweep(0.0, 1.0, 1)),
            Err(SmuError::InvalidSweep(_))
        ));
        assert_eq!(bus.command_log(0).len(), before);
    }

    #[test]
    fn test_change_address_reconnects() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let resolver = resolver_for(&bus);
        let mut controller = SweepController::new(ControllerSettings::default());
        controller.connect(&resolver, 18).unwrap();

        let change = controller.change_address(&resolver, 12).unwrap();
        assert_eq!(change.previous, Some(18));
        assert_eq!(change.new, 12);
        assert!(change.reconnected);
        assert_eq!(controller.handle().unwrap().address(), 12);
        assert_eq!(controller.state(), ControllerState::Connected);
        assert_eq!(bus.address_of(0), Some(12));
    }

    #[test]
    fn test_change_address_without_reconnect() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let resolver = resolver_for(&bus);
        let settings = ControllerSettings {
            reconnect_after_address_change: false,
            ..Default::default()
        };
        let mut controller = SweepController::new(settings);
        controller.connect(&resolver, 18).unwrap();

        let change = controller.change_address(&resolver, 12).unwrap();
        assert!(!change.reconnected);
        assert_eq!(controller.handle().unwrap().address(), 18);
    }

    #[test]
    fn test_change_address_out_of_range() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let resolver = resolver_for(&bus);
        let mut controller = SweepController::new(ControllerSettings::default());
        controller.connect(&resolver, 18).unwrap();

        assert!(matches!(
            controller.change_address(&resolver, 31),
            Err(SmuError::AddressChange(_))
        ));
        assert!(controller.is_connected());
        assert_eq!(bus.address_of(0), Some(18));
    }

    #[test]
    fn test_reconnect_closes_previous_session() {
        let bus = SimulatedBus::with_smu(18, SimulatedLoad::Open);
        let resolver = resolver_for(&bus);
        let mut controller = SweepController::new(ControllerSettings::default());
        controller.connect(&resolver, 18).unwrap();
        controller.connect(&resolver, 18).unwrap();
        assert!(controller.is_connected());

        controller.disconnect().unwrap();
        assert!(!controller.is_connected());
        assert_eq!(controller.state(), ControllerState::Disconnected);
        assert!(matches!(controller.output_on(), Err(SmuError::NotConnected)));
    }
}
