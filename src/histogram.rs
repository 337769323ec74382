//! Fixed-binning histograms filled over a run.
//!
//! Bin contents are integer counts (or integer carrier weights), so
//! histograms filled on different workers merge to the same result in any
//! order.

use crate::accumulator::EventStatistics;
use crate::ionization::Ionization;
use crate::step::StepEvent;
use crate::Observer;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use uom::si::electric_charge::picocoulomb;
use uom::si::electric_current::picoampere;
use uom::si::energy::kiloelectronvolt;
use uom::si::length::millimeter;
use uom::si::time::nanosecond;

/// Equal-width binning of `[min, max)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Axis {
    pub n_bins: usize,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bin {
    Underflow,
    In(usize),
    Overflow,
}

impl Axis {
    pub fn new(n_bins: usize, min: f64, max: f64) -> Self {
        Self { n_bins, min, max }
    }

    // NaN goes to the underflow.
    fn locate(&self, value: f64) -> Bin {
        if !(value >= self.min) {
            Bin::Underflow
        } else if !(value < self.max) {
            Bin::Overflow
        } else {
            let fraction = (value - self.min) / (self.max - self.min);
            let index = (fraction * self.n_bins as f64) as usize;
            Bin::In(index.min(self.n_bins - 1))
        }
    }
}

/// A one-dimensional histogram.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram1 {
    pub name: &'static str,
    pub title: &'static str,
    pub axis: Axis,
    pub bin_content: Vec<u64>,
    pub underflow: u64,
    pub overflow: u64,
    /// Number of fills, in range or not.
    pub entries: u64,
}

impl Histogram1 {
    pub fn new(name: &'static str, title: &'static str, axis: Axis) -> Self {
        Self {
            name,
            title,
            axis,
            bin_content: vec![0; axis.n_bins],
            underflow: 0,
            overflow: 0,
            entries: 0,
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.entries += 1;
        match self.axis.locate(value) {
            Bin::Underflow => self.underflow += 1,
            Bin::In(i) => self.bin_content[i] += 1,
            Bin::Overflow => self.overflow += 1,
        }
    }

    /// Add the contents of a histogram with the same binning.
    pub fn merge(&mut self, other: &Histogram1) {
        debug_assert_eq!(self.axis, other.axis);
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
    }
}

/// A two-dimensional histogram with integer weights.
///
/// Bins are stored row by row: `bin_content[ix * y.n_bins + iy]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram2 {
    pub name: &'static str,
    pub title: &'static str,
    pub x: Axis,
    pub y: Axis,
    pub bin_content: Vec<u64>,
    /// Weight that fell outside either axis.
    pub outside: u64,
    pub entries: u64,
}

impl Histogram2 {
    pub fn new(name: &'static str, title: &'static str, x: Axis, y: Axis) -> Self {
        Self {
            name,
            title,
            x,
            y,
            bin_content: vec![0; x.n_bins * y.n_bins],
            outside: 0,
            entries: 0,
        }
    }

    pub fn fill(&mut self, x: f64, y: f64, weight: u64) {
        self.entries += 1;
        match (self.x.locate(x), self.y.locate(y)) {
            (Bin::In(ix), Bin::In(iy)) => self.bin_content[ix * self.y.n_bins + iy] += weight,
            _ => self.outside += weight,
        }
    }

    pub fn bin(&self, ix: usize, iy: usize) -> u64 {
        self.bin_content[ix * self.y.n_bins + iy]
    }

    /// Sum of the in-range bin contents.
    pub fn total(&self) -> u64 {
        self.bin_content.iter().sum()
    }

    pub fn merge(&mut self, other: &Histogram2) {
        debug_assert_eq!((self.x, self.y), (other.x, other.y));
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        self.outside += other.outside;
        self.entries += other.entries;
    }
}

/// Distributions of the per-event results and of where the charge was
/// created.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunHistograms {
    /// Deposited energy per event, keV.
    pub edep: Histogram1,
    /// Collected charge per event, pC.
    pub charge: Histogram1,
    /// Average electrometer current per event, pA.
    pub average_current: Histogram1,
    /// Peak electrometer current per event, pA.
    pub peak_current: Histogram1,
    /// Decimated current series of every event: time (ns) against current
    /// (pA).
    pub current_time: Histogram2,
    /// Where collected electrons were created, x against z in mm, weighted by
    /// the number of electrons.
    pub charge_distribution: Histogram2,
}

impl Default for RunHistograms {
    fn default() -> Self {
        Self {
            edep: Histogram1::new(
                "edep",
                "Energy Deposit in Liquid Crystal",
                Axis::new(100, 0.0, 500.0),
            ),
            charge: Histogram1::new("charge", "Charge Collected", Axis::new(100, 0.0, 100.0)),
            average_current: Histogram1::new(
                "average_current",
                "Average Electrometer Current",
                Axis::new(100, 0.0, 1000.0),
            ),
            peak_current: Histogram1::new(
                "peak_current",
                "Peak Electrometer Current",
                Axis::new(100, 0.0, 5000.0),
            ),
            current_time: Histogram2::new(
                "current_time",
                "Electrometer Current vs Time",
                Axis::new(1000, 0.0, 1000.0),
                Axis::new(100, 0.0, 1000.0),
            ),
            charge_distribution: Histogram2::new(
                "charge_distribution",
                "Charge Distribution in XZ",
                Axis::new(100, -10.0, 10.0),
                Axis::new(100, -15.0, 15.0),
            ),
        }
    }
}

impl RunHistograms {
    pub fn merge(&mut self, other: &RunHistograms) {
        self.edep.merge(&other.edep);
        self.charge.merge(&other.charge);
        self.average_current.merge(&other.average_current);
        self.peak_current.merge(&other.peak_current);
        self.current_time.merge(&other.current_time);
        self.charge_distribution.merge(&other.charge_distribution);
    }

    /// Write all histograms as one JSON document.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()
    }
}

impl Observer for RunHistograms {
    fn on_ionization(&mut self, step: &StepEvent, ionization: &Ionization) {
        if ionization.collected_electrons == 0 {
            return;
        }
        let midpoint = step.midpoint();
        self.charge_distribution.fill(
            midpoint.x.get::<millimeter>(),
            midpoint.z.get::<millimeter>(),
            ionization.collected_electrons,
        );
    }

    fn on_event_end(&mut self, statistics: &EventStatistics) {
        self.edep
            .fill(statistics.energy_deposit.get::<kiloelectronvolt>());
        self.charge.fill(statistics.charge.get::<picocoulomb>());
        self.average_current
            .fill(statistics.average_current.get::<picoampere>());
        self.peak_current
            .fill(statistics.peak_current.get::<picoampere>());
        for sample in &statistics.series {
            self.current_time.fill(
                sample.time.get::<nanosecond>(),
                sample.current.get::<picoampere>(),
                1,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::EventAccumulator;
    use crate::step::{ParticleCategory, Point3, Volume};
    use uom::si::electric_charge::coulomb;
    use uom::si::f64::{ElectricCharge, ElectricCurrent, Energy, Length, Time};

    #[test]
    fn axis_edges() {
        let axis = Axis::new(10, 0.0, 100.0);
        assert_eq!(axis.locate(0.0), Bin::In(0));
        assert_eq!(axis.locate(9.999), Bin::In(0));
        assert_eq!(axis.locate(10.0), Bin::In(1));
        assert_eq!(axis.locate(99.999), Bin::In(9));
        assert_eq!(axis.locate(100.0), Bin::Overflow);
        assert_eq!(axis.locate(-0.1), Bin::Underflow);
        assert_eq!(axis.locate(f64::NAN), Bin::Underflow);
        assert_eq!(axis.locate(f64::INFINITY), Bin::Overflow);
    }

    #[test]
    fn fill_and_merge() {
        let mut a = Histogram1::new("a", "A", Axis::new(4, 0.0, 4.0));
        a.fill(0.5);
        a.fill(3.5);
        a.fill(-1.0);
        let mut b = a.clone();
        b.fill(7.0);
        a.merge(&b);

        assert_eq!(a.bin_content, vec![2, 0, 0, 2]);
        assert_eq!(a.underflow, 2);
        assert_eq!(a.overflow, 1);
        assert_eq!(a.entries, 7);
    }

    #[test]
    fn weighted_two_dimensional() {
        let mut h = Histogram2::new(
            "h",
            "H",
            Axis::new(2, -1.0, 1.0),
            Axis::new(3, 0.0, 3.0),
        );
        h.fill(-0.5, 2.5, 40);
        h.fill(0.5, 0.5, 2);
        h.fill(0.5, 9.0, 7);

        assert_eq!(h.bin(0, 2), 40);
        assert_eq!(h.bin(1, 0), 2);
        assert_eq!(h.total(), 42);
        assert_eq!(h.outside, 7);
        assert_eq!(h.entries, 3);
    }

    #[test]
    fn fills_from_pipeline_hooks() {
        let mut histograms = RunHistograms::default();
        let mm = Length::new::<millimeter>;
        let step = StepEvent::builder()
            .energy_deposit(Energy::new::<kiloelectronvolt>(20.0))
            .pre(Point3::new(mm(2.1), mm(0.0), mm(-3.15)))
            .post(Point3::new(mm(2.1), mm(0.1), mm(-3.15)))
            .particle(ParticleCategory::PrimaryBeam)
            .volume(Volume::Sensitive)
            .global_time(Time::new::<nanosecond>(0.0))
            .build();
        let ionization = Ionization {
            created: 600,
            collected_electrons: 480,
            collected_ions: 480,
        };
        histograms.on_ionization(&step, &ionization);
        histograms.on_ionization(&step, &Ionization::default());

        let mut accumulator = EventAccumulator::default();
        accumulator.begin();
        accumulator.add_energy(Energy::new::<kiloelectronvolt>(252.5));
        accumulator.add_carriers(480, 480, ElectricCharge::new::<coulomb>(5.5e-12));
        for i in 0..3 {
            accumulator.add_sample(
                Time::new::<nanosecond>(10.0 * i as f64 + 0.5),
                ElectricCurrent::new::<picoampere>(55.0),
            );
        }
        histograms.on_event_end(&accumulator.finalize());

        assert_eq!(histograms.charge_distribution.entries, 1);
        // x = 2.1 mm and z = -3.15 mm fall in bins 60 and 39.
        assert_eq!(histograms.charge_distribution.bin(60, 39), 480);
        assert_eq!(histograms.edep.bin_content[50], 1);
        assert_eq!(histograms.charge.bin_content[5], 1);
        assert_eq!(histograms.average_current.bin_content[5], 1);
        assert_eq!(histograms.peak_current.bin_content[1], 1);
        assert_eq!(histograms.current_time.entries, 3);
        assert_eq!(histograms.current_time.bin(20, 5), 1);
    }

    #[test]
    fn writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("histograms.json");
        let mut histograms = RunHistograms::default();
        histograms.edep.fill(12.0);
        histograms.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["edep"]["entries"], 1);
        assert_eq!(value["edep"]["bin_content"][2], 1);
        assert_eq!(value["charge_distribution"]["x"]["n_bins"], 100);
    }
}
