//! Host memory sampling around a single inference call.
//!
//! The call runs on the current thread while a scoped worker samples the
//! probe at a fixed interval. The worker is stopped through a channel, so it
//! wakes immediately when the call returns instead of finishing its sleep.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One reading of host memory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Offset from the start of the sampled call.
    pub at: Duration,
    /// Resident memory of the inference process(es).
    pub process_rss_bytes: u64,
    pub system_used_bytes: u64,
    pub available_bytes: u64,
    pub accelerator_used_bytes: Option<u64>,
}

/// Source of host memory readings.
pub trait MemoryProbe: Send {
    fn sample(&mut self) -> ResourceSample;

    /// Memory the OS can still hand out without paging.
    fn available_bytes(&mut self) -> u64;
}

/// Samples collected for one call: a baseline before it starts, periodic
/// readings while it runs and a final reading after it returns.
#[derive(Debug, Clone, Default)]
pub struct SampleTrace {
    pub baseline: ResourceSample,
    pub samples: Vec<ResourceSample>,
}

impl SampleTrace {
    pub fn peak_process_rss(&self) -> u64 {
        self.samples
            .iter()
            .map(|s| s.process_rss_bytes)
            .max()
            .unwrap_or(0)
            .max(self.baseline.process_rss_bytes)
    }

    /// Memory the call added on top of the inference process's idle state.
    pub fn footprint_bytes(&self) -> u64 {
        self.peak_process_rss()
            .saturating_sub(self.baseline.process_rss_bytes)
    }

    pub fn peak_system_used(&self) -> u64 {
        self.samples
            .iter()
            .map(|s| s.system_used_bytes)
            .max()
            .unwrap_or(self.baseline.system_used_bytes)
    }

    pub fn peak_accelerator_used(&self) -> Option<u64> {
        self.samples
            .iter()
            .filter_map(|s| s.accelerator_used_bytes)
            .max()
    }
}

/// Run `call` while sampling `probe` every `interval` on a scoped thread.
pub fn sample_during<T>(
    probe: &mut dyn MemoryProbe,
    interval: Duration,
    call: impl FnOnce() -> T,
) -> (T, SampleTrace) {
    let start = Instant::now();
    let mut baseline = probe.sample();
    baseline.at = Duration::ZERO;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let (output, mut samples) = thread::scope(|scope| {
        let worker = scope.spawn(move || {
            let mut samples = Vec::new();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut s = probe.sample();
                        s.at = start.elapsed();
                        samples.push(s);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            (samples, probe)
        });

        let output = call();
        let _ = stop_tx.send(());

        match worker.join() {
            Ok((mut samples, probe)) => {
                let mut last = probe.sample();
                last.at = start.elapsed();
                samples.push(last);
                (output, samples)
            }
            Err(_) => {
                tracing::error!("resource sampler panicked; keeping baseline only");
                (output, Vec::new())
            }
        }
    });

    samples.sort_by_key(|s| s.at);
    (output, SampleTrace { baseline, samples })
}
