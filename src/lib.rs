pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod instrument;
pub mod observer;
pub mod plotting;
pub mod resolver;
pub mod types;

pub use config::{load_config, load_config_or_default, AppConfig};
pub use controller::{ControllerSettings, ControllerState, SweepController};
pub use error::{ConnectionAttempt, ConnectionError, SmuError, SweepError};
pub use export::{write_csv, write_samples};
pub use instrument::{
    AddressChange, InstrumentHandle, PrologixTransport, SimulatedBus, SimulatedLoad,
    SimulatedSmu, Transport, VisaTransport,
};
pub use observer::{CancelToken, ChannelObserver, NoopObserver, SweepEvent, SweepObserver};
pub use plotting::plot_iv;
pub use resolver::{
    available_backends, BackendStatus, ConnectionResolver, ConnectionResolverBuilder,
    ConnectionStrategy, Connector, ResolverSettings,
};
pub use types::{
    CurrentRange, MeasurementSample, SweepConfig, SweepResult, SweepStatus, Terminals,
};
