use crate::accumulator::EventStatistics;
use crate::config::{BeamConfig, SensorConfig};
use crate::error::ConfigError;
use crate::gen::Transport;
use crate::histogram::RunHistograms;
use crate::output::{ArtifactSink, RecordSink, Report};
use crate::statistics::PoissonProcess;
use crate::Sensor;
use bon::bon;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::thread;
use tracing::{info, warn};
use uom::si::electric_charge::{coulomb, picocoulomb};
use uom::si::electric_current::{ampere, picoampere};
use uom::si::energy::{electronvolt, kiloelectronvolt};
use uom::si::f64::{ElectricCharge, ElectricCurrent, Energy, Frequency, Time};
use uom::si::frequency::hertz;
use uom::si::time::second;

/// Keeps the transport stream of an event apart from its sensor stream.
const TRANSPORT_STREAM: u64 = 0xD1B5_4A32_D192_ED03;

/// Seed of the random stream of one event.
///
/// Every event gets its own stream, so results do not depend on how events
/// are spread over threads.
pub fn event_seed(run_seed: u64, event_index: u64) -> u64 {
    run_seed.wrapping_add(event_index.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Aggregates over all events of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub events: u64,
    /// Events with at least one current sample.
    pub events_with_signal: u64,
    pub total_energy_deposit: Energy,
    pub total_charge: ElectricCharge,
    pub max_peak_current: ElectricCurrent,
    /// Events that hit the sample limit.
    pub truncated_events: u64,
    pub histograms: RunHistograms,
    average_current_sum: ElectricCurrent,
    peak_current_sum: ElectricCurrent,
}

impl Default for RunSummary {
    fn default() -> Self {
        let zero = ElectricCurrent::new::<ampere>(0.0);
        Self {
            events: 0,
            events_with_signal: 0,
            total_energy_deposit: Energy::new::<electronvolt>(0.0),
            total_charge: ElectricCharge::new::<coulomb>(0.0),
            max_peak_current: zero,
            truncated_events: 0,
            histograms: RunHistograms::default(),
            average_current_sum: zero,
            peak_current_sum: zero,
        }
    }
}

impl RunSummary {
    /// Account for one event. Events must be added in the same order on every
    /// run for the floating-point totals to come out bit-identical.
    pub fn add(&mut self, statistics: &EventStatistics) {
        self.events += 1;
        if statistics.has_signal() {
            self.events_with_signal += 1;
        }
        if statistics.truncated() {
            self.truncated_events += 1;
        }
        self.total_energy_deposit += statistics.energy_deposit;
        self.total_charge += statistics.charge;
        self.average_current_sum += statistics.average_current;
        self.peak_current_sum += statistics.peak_current;
        if statistics.peak_current > self.max_peak_current {
            self.max_peak_current = statistics.peak_current;
        }
    }

    /// Mean over events of the per-event average current.
    pub fn mean_average_current(&self) -> ElectricCurrent {
        self.mean(self.average_current_sum)
    }

    /// Mean over events of the per-event peak current.
    pub fn mean_peak_current(&self) -> ElectricCurrent {
        self.mean(self.peak_current_sum)
    }

    fn mean(&self, sum: ElectricCurrent) -> ElectricCurrent {
        if self.events == 0 {
            ElectricCurrent::new::<ampere>(0.0)
        } else {
            sum / self.events as f64
        }
    }
}

struct Artifacts {
    dir: PathBuf,
    base: String,
    sink: ArtifactSink,
}

/// One simulation run: a transport source feeding a pool of sensors.
///
/// Everything shared by the workers is fixed by [`setup`](RunBuilder::setup)
/// before any thread starts.
pub struct Run<'a, T> {
    config: &'a SensorConfig,
    beam: BeamConfig,
    transport: &'a T,
    threads: usize,
    seed: u64,
    start_times: Vec<Time>,
    artifacts: Option<Artifacts>,
}

#[bon]
impl<'a, T: Transport + Sync> Run<'a, T> {
    /// `beam_rate` stamps events with Poisson-distributed start times;
    /// without it every event starts at zero. With an `output_dir`, the
    /// per-event records and the report are written there.
    #[builder(finish_fn = setup)]
    pub fn new(
        config: &'a SensorConfig,
        beam: BeamConfig,
        transport: &'a T,
        #[builder(default = 1)] threads: usize,
        #[builder(default)] seed: u64,
        beam_rate: Option<Frequency>,
        output_dir: Option<PathBuf>,
        #[builder(default)] series: bool,
    ) -> Result<Self, ConfigError> {
        if threads == 0 {
            return Err(ConfigError::Invalid {
                name: "threads",
                value: 0.0,
                reason: "at least one worker is needed",
            });
        }

        let start_times = match beam_rate {
            Some(rate) => {
                let rng = StdRng::seed_from_u64(seed ^ TRANSPORT_STREAM);
                let process = PoissonProcess::new(rate, rng).ok_or(ConfigError::Invalid {
                    name: "beam_rate",
                    value: rate.get::<hertz>(),
                    reason: "must be finite and positive",
                })?;
                let events = usize::try_from(transport.num_events()).unwrap_or(usize::MAX);
                process.take(events).collect()
            }
            None => Vec::new(),
        };

        let artifacts = output_dir.map(|dir| {
            let base = beam.output_base_name();
            let sink = ArtifactSink::create(&dir, &base, series);
            Artifacts { dir, base, sink }
        });

        Ok(Self {
            config,
            beam,
            transport,
            threads,
            seed,
            start_times,
            artifacts,
        })
    }
}

impl<T: Transport + Sync> Run<'_, T> {
    /// Start time of the `index`-th event.
    pub fn start_time(&self, index: u64) -> Time {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.start_times.get(i))
            .copied()
            .unwrap_or(Time::new::<second>(0.0))
    }

    /// Run every event and write the artifacts, if any.
    pub fn run(&self) -> RunSummary {
        let Some(artifacts) = &self.artifacts else {
            return self.run_with(&());
        };

        let summary = self.run_with(&artifacts.sink);
        artifacts.sink.finish();

        let path = artifacts
            .dir
            .join(format!("{}_electrometer_report.txt", artifacts.base));
        let report = Report {
            beam: &self.beam,
            summary: &summary,
            artifact: artifacts.sink.events_path(),
        };
        match report.write(&path) {
            Ok(()) => info!(path = %path.display(), "report written"),
            Err(error) => warn!(path = %path.display(), %error, "could not write report"),
        }

        let path = artifacts
            .dir
            .join(format!("{}_histograms.json", artifacts.base));
        match summary.histograms.write(&path) {
            Ok(()) => info!(path = %path.display(), "histograms written"),
            Err(error) => warn!(path = %path.display(), %error, "could not write histograms"),
        }

        summary
    }

    /// Run every event, handing the results to `sink`.
    pub fn run_with<S: RecordSink>(&self, sink: &S) -> RunSummary {
        let events = self.transport.num_events();
        info!(
            particle = %self.beam.particle,
            energy_mev = self.beam.energy_mev(),
            events,
            threads = self.threads,
            seed = self.seed,
            "run started"
        );

        let (mut finished, histograms) = thread::scope(|scope| {
            let workers: Vec<_> = (0..self.threads)
                .map(|worker| scope.spawn(move || self.work(worker, sink)))
                .collect();

            let mut finished = Vec::new();
            let mut histograms = RunHistograms::default();
            for worker in workers {
                match worker.join() {
                    Ok((events, partial)) => {
                        finished.extend(events);
                        histograms.merge(&partial);
                    }
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            (finished, histograms)
        });

        finished.sort_unstable_by_key(|(index, _)| *index);
        let mut summary = RunSummary {
            histograms,
            ..RunSummary::default()
        };
        for (_, statistics) in &finished {
            summary.add(statistics);
        }

        info!(
            events = summary.events,
            with_signal = summary.events_with_signal,
            edep_kev = summary.total_energy_deposit.get::<kiloelectronvolt>(),
            charge_pc = summary.total_charge.get::<picocoulomb>(),
            avg_pa = summary.mean_average_current().get::<picoampere>(),
            peak_pa = summary.max_peak_current.get::<picoampere>(),
            "run finished"
        );
        summary
    }

    /// Events `worker`, `worker + threads`, ... of the run, with their
    /// statistics stripped of the series.
    fn work<S: RecordSink>(
        &self,
        worker: usize,
        sink: &S,
    ) -> (Vec<(u64, EventStatistics)>, RunHistograms) {
        let mut sensor = Sensor::builder()
            .config(self.config)
            .rng(StdRng::seed_from_u64(self.seed))
            .observer(RunHistograms::default())
            .build();
        let mut finished = Vec::new();

        let first = worker as u64;
        for index in (first..self.transport.num_events()).step_by(self.threads) {
            let seed = event_seed(self.seed, index);
            let mut transport_rng = StdRng::seed_from_u64(seed ^ TRANSPORT_STREAM);
            sensor.reseed(seed);

            sensor.on_event_begin();
            self.transport.simulate_event(
                index,
                self.start_time(index),
                &mut transport_rng,
                |step| sensor.on_step(step),
            );
            let mut statistics = sensor.on_event_end();

            sink.record(self.transport.event_id(index), &statistics);
            statistics.series = Vec::new();
            finished.push((index, statistics));
        }

        (finished, sensor.into_observer())
    }
}
