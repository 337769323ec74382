use crate::accumulator::{CurrentSample, EventStatistics};
use crate::config::BeamConfig;
use crate::run::RunSummary;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;
use uom::si::electric_charge::picocoulomb;
use uom::si::electric_current::picoampere;
use uom::si::energy::kiloelectronvolt;
use uom::si::time::nanosecond;

/// Per-event summary, one line of `<base>_events.jsonl`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub event_id: u64,
    pub energy_deposit_kev: f64,
    pub charge_pc: f64,
    pub electron_count: u64,
    pub ion_count: u64,
    pub avg_current_pa: f64,
    pub peak_current_pa: f64,
    pub final_time_ns: f64,
    pub final_current_pa: f64,
}

impl EventRecord {
    pub fn new(event_id: u64, statistics: &EventStatistics) -> Self {
        let (final_time_ns, final_current_pa) = statistics
            .final_sample
            .map_or((0.0, 0.0), |s| {
                (s.time.get::<nanosecond>(), s.current.get::<picoampere>())
            });

        Self {
            event_id,
            energy_deposit_kev: statistics.energy_deposit.get::<kiloelectronvolt>(),
            charge_pc: statistics.charge.get::<picocoulomb>(),
            electron_count: statistics.electron_count,
            ion_count: statistics.ion_count,
            avg_current_pa: statistics.average_current.get::<picoampere>(),
            peak_current_pa: statistics.peak_current.get::<picoampere>(),
            final_time_ns,
            final_current_pa,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time_ns: f64,
    pub current_pa: f64,
}

impl From<&CurrentSample> for SeriesPoint {
    fn from(sample: &CurrentSample) -> Self {
        Self {
            time_ns: sample.time.get::<nanosecond>(),
            current_pa: sample.current.get::<picoampere>(),
        }
    }
}

/// Decimated current series of one event, one line of `<base>_series.jsonl`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesRecord {
    pub event_id: u64,
    pub points: Vec<SeriesPoint>,
}

impl SeriesRecord {
    pub fn new(event_id: u64, statistics: &EventStatistics) -> Self {
        Self {
            event_id,
            points: statistics.series.iter().map(SeriesPoint::from).collect(),
        }
    }
}

/// Destination of finished events. Shared by every worker of a run.
pub trait RecordSink: Sync {
    fn record(&self, event_id: u64, statistics: &EventStatistics);
    /// Called once after the last event.
    fn finish(&self) {}
}

impl RecordSink for () {
    fn record(&self, _: u64, _: &EventStatistics) {}
}

/// Keeps every record in memory.
impl RecordSink for Mutex<Vec<EventRecord>> {
    fn record(&self, event_id: u64, statistics: &EventStatistics) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventRecord::new(event_id, statistics));
    }
}

/// A JSON lines file that gives up quietly.
///
/// The first failure (opening, writing or flushing) is reported with a
/// `warn!` and closes the file. Every later append is a no-op.
#[derive(Debug)]
pub struct JsonLines {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLines {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let writer = match File::create(&path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "could not open output file, continuing without it"
                );
                None
            }
        };

        Self {
            path,
            writer: Mutex::new(writer),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether records are still being written.
    pub fn is_open(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn append<T: Serialize>(&self, value: &T) {
        self.with_writer(|writer| {
            serde_json::to_writer(&mut *writer, value)?;
            writer.write_all(b"\n")
        });
    }

    pub fn flush(&self) {
        self.with_writer(|writer| writer.flush());
    }

    fn with_writer<F>(&self, f: F)
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = slot.as_mut() else {
            return;
        };
        if let Err(error) = f(writer) {
            warn!(
                path = %self.path.display(),
                %error,
                "output file failed, continuing without it"
            );
            *slot = None;
        }
    }
}

/// The per-event artifacts of a run.
#[derive(Debug)]
pub struct ArtifactSink {
    events: JsonLines,
    series: Option<JsonLines>,
}

impl ArtifactSink {
    /// Open `<base>_events.jsonl` and, if `series` is set,
    /// `<base>_series.jsonl` in `dir`.
    pub fn create(dir: &Path, base: &str, series: bool) -> Self {
        Self {
            events: JsonLines::create(dir.join(format!("{base}_events.jsonl"))),
            series: series.then(|| JsonLines::create(dir.join(format!("{base}_series.jsonl")))),
        }
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    pub fn series_path(&self) -> Option<&Path> {
        self.series.as_ref().map(JsonLines::path)
    }
}

impl RecordSink for ArtifactSink {
    fn record(&self, event_id: u64, statistics: &EventStatistics) {
        self.events.append(&EventRecord::new(event_id, statistics));
        if let Some(series) = &self.series {
            series.append(&SeriesRecord::new(event_id, statistics));
        }
    }

    fn finish(&self) {
        self.events.flush();
        if let Some(series) = &self.series {
            series.flush();
        }
    }
}

const RULE: &str = "=================================================";
const THIN_RULE: &str = "-------------------------------------------------";

/// Plain-text run summary, written to `<base>_electrometer_report.txt`.
#[derive(Clone, Copy, Debug)]
pub struct Report<'a> {
    pub beam: &'a BeamConfig,
    pub summary: &'a RunSummary,
    /// Where the per-event records went.
    pub artifact: &'a Path,
}

impl Report<'_> {
    pub fn write(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_string())
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;

        writeln!(f, "{RULE}")?;
        writeln!(f, "    LIQUID CRYSTAL DETECTOR ELECTROMETER REPORT")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Particle type: {}", self.beam.particle)?;
        writeln!(f, "Particle energy: {} MeV", self.beam.energy_mev())?;
        writeln!(f, "Number of events: {}", summary.events)?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Electrometer measurements:")?;
        writeln!(f, "  Events with signal: {}", summary.events_with_signal)?;
        writeln!(
            f,
            "  Total energy deposit: {:.3} keV",
            summary.total_energy_deposit.get::<kiloelectronvolt>()
        )?;
        writeln!(
            f,
            "  Total collected charge: {:.6e} pC",
            summary.total_charge.get::<picocoulomb>()
        )?;
        writeln!(
            f,
            "  Average Current: {:.6e} pA",
            summary.mean_average_current().get::<picoampere>()
        )?;
        writeln!(
            f,
            "  Peak Current: {:.6e} pA (max {:.6e} pA)",
            summary.mean_peak_current().get::<picoampere>(),
            summary.max_peak_current.get::<picoampere>()
        )?;
        if summary.truncated_events > 0 {
            writeln!(f, "  Events over the sample limit: {}", summary.truncated_events)?;
        }
        writeln!(f, "  Detailed data available in: {}", self.artifact.display())?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "Electrometer connected to both electrodes of the cell.")?;
        writeln!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::EventAccumulator;
    use uom::si::electric_charge::coulomb;
    use uom::si::energy::{electronvolt, megaelectronvolt};
    use uom::si::f64::{ElectricCharge, ElectricCurrent, Energy, Time};

    fn statistics() -> EventStatistics {
        let mut acc = EventAccumulator::new(100);
        acc.begin();
        acc.add_energy(Energy::new::<electronvolt>(3000.0));
        acc.add_carriers(80, 80, ElectricCharge::new::<coulomb>(80.0 * 1.602e-19));
        for i in 0..5 {
            acc.add_sample(
                Time::new::<nanosecond>(10.0 * i as f64),
                ElectricCurrent::new::<picoampere>(1.0 + i as f64),
            );
        }
        acc.finalize()
    }

    #[test]
    fn record_units() {
        let record = EventRecord::new(7, &statistics());
        assert_eq!(record.event_id, 7);
        assert!((record.energy_deposit_kev - 3.0).abs() < 1e-9);
        assert!((record.charge_pc - 80.0 * 1.602e-7).abs() < 1e-15);
        assert_eq!(record.electron_count, 80);
        assert!((record.avg_current_pa - 3.0).abs() < 1e-9);
        assert!((record.peak_current_pa - 5.0).abs() < 1e-9);
        assert!((record.final_time_ns - 40.0).abs() < 1e-9);
        assert!((record.final_current_pa - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_event_has_zero_final_fields() {
        let mut acc = EventAccumulator::default();
        acc.begin();
        let record = EventRecord::new(0, &acc.finalize());
        assert_eq!(record.final_time_ns, 0.0);
        assert_eq!(record.final_current_pa, 0.0);
        assert_eq!(record.avg_current_pa, 0.0);
    }

    #[test]
    fn json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ArtifactSink::create(dir.path(), "LC_proton_500MeV", true);
        let stats = statistics();
        sink.record(0, &stats);
        sink.record(1, &stats);
        sink.finish();

        let events = std::fs::read_to_string(sink.events_path()).unwrap();
        assert!(sink.events_path().ends_with("LC_proton_500MeV_events.jsonl"));
        let lines: Vec<_> = events.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_id"], 0);
        assert_eq!(first["ion_count"], 80);

        let series = std::fs::read_to_string(sink.series_path().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(series.lines().nth(1).unwrap()).unwrap();
        assert_eq!(second["event_id"], 1);
        assert_eq!(second["points"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn unwritable_sink_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLines::create(dir.path().join("missing").join("out.jsonl"));
        assert!(!sink.is_open());
        // Appending to a closed sink does nothing.
        sink.append(&SeriesPoint {
            time_ns: 0.0,
            current_pa: 0.0,
        });
        sink.flush();
        assert!(!sink.is_open());
    }

    #[test]
    fn memory_sink() {
        let sink: Mutex<Vec<EventRecord>> = Mutex::new(Vec::new());
        sink.record(3, &statistics());
        let records = sink.into_inner().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, 3);
    }

    #[test]
    fn report_lines() {
        let beam = BeamConfig::new("proton", Energy::new::<megaelectronvolt>(500.0));
        let mut summary = RunSummary::default();
        summary.add(&statistics());
        let report = Report {
            beam: &beam,
            summary: &summary,
            artifact: Path::new("LC_proton_500MeV_events.jsonl"),
        }
        .to_string();

        assert!(report.contains("Particle type: proton\n"));
        assert!(report.contains("Particle energy: 500 MeV\n"));
        assert!(report.contains("Number of events: 1\n"));
        assert!(report.contains("Average Current: 3.000000e0 pA"));
        assert!(report.contains("Peak Current: 5.000000e0 pA"));
        assert!(report.contains("Detailed data available in: LC_proton_500MeV_events.jsonl"));
        assert!(!report.contains("sample limit"));
    }
}
