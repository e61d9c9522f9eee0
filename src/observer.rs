use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SmuError;
use crate::types::{MeasurementSample, SweepResult};

/// Receives progress of a running sweep.
///
/// Called synchronously on the sweeping thread; a slow observer slows the
/// sweep down. Any `FnMut(usize, &MeasurementSample)` closure is an observer.
///
/// Observers only see [`SweepController::perform_sweep`](crate::SweepController::perform_sweep).
/// Connection and setup errors are returned to the caller of `connect` and
/// `setup_measurement` as `Err` and never reach an observer.
pub trait SweepObserver {
    fn on_sample(&mut self, index: usize, sample: &MeasurementSample);

    fn on_complete(&mut self, _result: &SweepResult) {}

    /// Called once with [`SmuError::Sweep`] when the sweep aborts. Not
    /// called for a cancelled sweep, which ends in `on_complete`.
    fn on_error(&mut self, _error: &SmuError) {}
}

impl<F> SweepObserver for F
where
    F: FnMut(usize, &MeasurementSample),
{
    fn on_sample(&mut self, index: usize, sample: &MeasurementSample) {
        self(index, sample)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SweepObserver for NoopObserver {
    fn on_sample(&mut self, _index: usize, _sample: &MeasurementSample) {}
}

/// Messages sent by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    Sample {
        index: usize,
        sample: MeasurementSample,
    },
    Completed(SweepResult),
    Failed {
        message: String,
        partial: Vec<MeasurementSample>,
    },
}

/// Forwards sweep progress to another thread.
///
/// A closed receiver is ignored; the sweep is never stopped by a consumer
/// going away. Use a [`CancelToken`] for that.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<SweepEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<SweepEvent>) -> Self {
        Self { tx }
    }

    /// Unbounded channel pair.
    pub fn channel() -> (Self, Receiver<SweepEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl SweepObserver for ChannelObserver {
    fn on_sample(&mut self, index: usize, sample: &MeasurementSample) {
        let _ = self.tx.send(SweepEvent::Sample {
            index,
            sample: *sample,
        });
    }

    fn on_complete(&mut self, result: &SweepResult) {
        let _ = self.tx.send(SweepEvent::Completed(result.clone()));
    }

    fn on_error(&mut self, error: &SmuError) {
        let partial = match error {
            SmuError::Sweep(e) => e.partial.clone(),
            _ => Vec::new(),
        };
        let _ = self.tx.send(SweepEvent::Failed {
            message: error.to_string(),
            partial,
        });
    }
}

/// Shared flag asking a running sweep to stop before its next point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag, e.g. one set by a Ctrl+C handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for the next sweep.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
