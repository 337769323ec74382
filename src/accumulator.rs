//! Per-event aggregation of the electrometer signal.
//!
//! The [`EventAccumulator`] owns a sample buffer that is reused from one event
//! to the next. The buffer is capped at a fixed number of samples; anything
//! beyond the cap is dropped, but still contributes to the peak current and
//! to the running current sum.

use uom::si::electric_charge::coulomb;
use uom::si::electric_current::ampere;
use uom::si::energy::electronvolt;
use uom::si::f64::{ElectricCharge, ElectricCurrent, Energy, Time};

/// Default ceiling on the number of samples retained per event.
pub const MAX_SAMPLES: usize = 100_000;
/// Approximate length of the decimated series.
pub const SERIES_POINTS: usize = 1000;

/// A single reading of the electrometer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurrentSample {
    pub time: Time,
    pub current: ElectricCurrent,
}

/// Aggregate signal of one event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventStatistics {
    pub energy_deposit: Energy,
    pub charge: ElectricCharge,
    pub electron_count: u64,
    pub ion_count: u64,
    /// Largest current seen, including samples that were not retained. Never
    /// below zero.
    pub peak_current: ElectricCurrent,
    /// Mean over the retained samples.
    pub average_current: ElectricCurrent,
    /// Plain sum of every sample's current. Not weighted by the sampling
    /// interval, so it is a current and not a charge.
    pub current_sum: ElectricCurrent,
    /// Latest retained sample.
    pub final_sample: Option<CurrentSample>,
    /// Time-ordered retained samples thinned to about [`SERIES_POINTS`].
    pub series: Vec<CurrentSample>,
    pub samples_seen: u64,
    pub samples_retained: usize,
}

impl EventStatistics {
    /// Whether samples were dropped because the buffer was full.
    pub fn truncated(&self) -> bool {
        self.samples_seen > self.samples_retained as u64
    }

    /// Whether anything at all was recorded for the event.
    pub fn has_signal(&self) -> bool {
        self.samples_seen > 0 || self.electron_count > 0
    }
}

/// Keep every k-th sample, with `k = max(1, len / SERIES_POINTS)`.
///
/// # Examples
///
/// ```
/// use sensim::accumulator::{decimate, CurrentSample};
/// use uom::si::electric_current::picoampere;
/// use uom::si::f64::{ElectricCurrent, Time};
/// use uom::si::time::nanosecond;
///
/// let samples: Vec<_> = (0..5000)
///     .map(|i| CurrentSample {
///         time: Time::new::<nanosecond>(i as f64),
///         current: ElectricCurrent::new::<picoampere>(1.0),
///     })
///     .collect();
/// assert_eq!(decimate(&samples).len(), 1000);
/// ```
pub fn decimate(samples: &[CurrentSample]) -> Vec<CurrentSample> {
    let stride = (samples.len() / SERIES_POINTS).max(1);
    samples.iter().step_by(stride).copied().collect()
}

/// Running statistics of the event in progress.
#[derive(Debug)]
pub struct EventAccumulator {
    samples: Vec<CurrentSample>,
    max_samples: usize,
    // SI base units (electronvolt for energy).
    energy_deposit: f64,
    charge: f64,
    electron_count: u64,
    ion_count: u64,
    peak_current: f64,
    current_sum: f64,
    samples_seen: u64,
}

impl Default for EventAccumulator {
    fn default() -> Self {
        Self::new(MAX_SAMPLES)
    }
}

impl EventAccumulator {
    /// Create an accumulator that retains at most `max_samples` samples per
    /// event.
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::new(),
            max_samples,
            energy_deposit: 0.0,
            charge: 0.0,
            electron_count: 0,
            ion_count: 0,
            peak_current: 0.0,
            current_sum: 0.0,
            samples_seen: 0,
        }
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Reset all running statistics. The sample buffer keeps its allocation.
    pub fn begin(&mut self) {
        self.samples.clear();
        self.energy_deposit = 0.0;
        self.charge = 0.0;
        self.electron_count = 0;
        self.ion_count = 0;
        self.peak_current = 0.0;
        self.current_sum = 0.0;
        self.samples_seen = 0;
    }

    pub fn add_energy(&mut self, edep: Energy) {
        self.energy_deposit += edep.get::<electronvolt>();
    }

    pub fn add_carriers(&mut self, electrons: u64, ions: u64, charge: ElectricCharge) {
        self.electron_count += electrons;
        self.ion_count += ions;
        self.charge += charge.get::<coulomb>();
    }

    /// Record one electrometer reading. Returns whether the sample was kept in
    /// the buffer.
    pub fn add_sample(&mut self, time: Time, current: ElectricCurrent) -> bool {
        let value = current.get::<ampere>();
        self.samples_seen += 1;
        self.current_sum += value;
        if value > self.peak_current {
            self.peak_current = value;
        }

        if self.samples.len() < self.max_samples {
            self.samples.push(CurrentSample { time, current });
            true
        } else {
            false
        }
    }

    /// Samples retained so far. Time-ordered after [`finalize`](Self::finalize).
    pub fn samples(&self) -> &[CurrentSample] {
        &self.samples
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    /// Sort the retained samples by time and compute the event statistics.
    ///
    /// The retained samples stay available through [`samples`](Self::samples)
    /// until the next [`begin`](Self::begin).
    pub fn finalize(&mut self) -> EventStatistics {
        // Stable, so equal timestamps keep their arrival order.
        self.samples.sort_by(|a, b| a.time.value.total_cmp(&b.time.value));

        let average = if self.samples.is_empty() {
            0.0
        } else {
            let sum: f64 = self.samples.iter().map(|s| s.current.get::<ampere>()).sum();
            sum / self.samples.len() as f64
        };

        EventStatistics {
            energy_deposit: Energy::new::<electronvolt>(self.energy_deposit),
            charge: ElectricCharge::new::<coulomb>(self.charge),
            electron_count: self.electron_count,
            ion_count: self.ion_count,
            peak_current: ElectricCurrent::new::<ampere>(self.peak_current),
            average_current: ElectricCurrent::new::<ampere>(average),
            current_sum: ElectricCurrent::new::<ampere>(self.current_sum),
            final_sample: self.samples.last().copied(),
            series: decimate(&self.samples),
            samples_seen: self.samples_seen,
            samples_retained: self.samples.len(),
        }
    }
}
