use crate::accumulator::{CurrentSample, EventAccumulator, EventStatistics};
use crate::config::SensorConfig;
use crate::current::{CarrierKind, CarrierPacket, CurrentPulse, CurrentSynthesizer};
use crate::drift::DriftModel;
use crate::electrode::{classify, Disposition, ElectrodeCollection};
use crate::electrometer::Electrometer;
use crate::ionization::{Ionization, IonizationModel};
use crate::step::{StepEvent, TrackStatus};
use bon::bon;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};
use uom::si::electric_charge::picocoulomb;
use uom::si::electric_current::{ampere, picoampere};
use uom::si::energy::{electronvolt, kiloelectronvolt};
use uom::si::f64::{ElectricCurrent, Energy, Time};
use uom::si::length::millimeter;
use uom::si::time::second;

/// Per-event sample buffer and running statistics.
pub mod accumulator;
/// Detector and beam configuration.
pub mod config;
/// Carrier packets and the current they induce.
pub mod current;
/// Carrier drift towards the electrodes.
pub mod drift;
/// Handling of steps inside the electrodes.
pub mod electrode;
/// RC model of the electrometer input.
pub mod electrometer;
pub mod error;
/// Stand-in transport engine producing straight beam tracks.
pub mod gen;
/// Run-level histograms of the per-event results.
pub mod histogram;
/// Electron-ion pair creation and collection.
pub mod ionization;
/// Event records, output sinks and the run report.
pub mod output;
/// Multi-threaded event loop.
pub mod run;
pub mod statistics;
/// Transport step records.
pub mod step;
/// Replay of recorded step traces.
pub mod trace;

/// Deposits above this energy are logged individually.
const SIGNIFICANT_DEPOSIT_KEV: f64 = 10.0;
/// Progress is logged once every this many events.
const PROGRESS_INTERVAL: u64 = 100;

/// A trait that defines the interface for an observer of the sensor pipeline.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called for every step, once it has been classified.
    fn on_step(&mut self, step: &StepEvent, disposition: Disposition) {}
    /// Called when a step in the sensitive volume has been ionized.
    fn on_ionization(&mut self, step: &StepEvent, ionization: &Ionization) {}
    /// Called when a drifting carrier packet reaches its electrode.
    /// `measured` is the electrometer reading at arrival.
    fn on_pulse(&mut self, kind: CarrierKind, pulse: &CurrentPulse, measured: ElectricCurrent) {}
    /// Called when a carrier is absorbed by an electrode.
    fn on_electrode_collection(&mut self, step: &StepEvent, collection: &ElectrodeCollection) {}
    /// Called when a sample does not fit in the event buffer.
    fn on_sample_dropped(&mut self, sample: &CurrentSample) {}
    /// Called once the statistics of an event are final.
    fn on_event_end(&mut self, statistics: &EventStatistics) {}
}

impl Observer for () {}

/// The signal chain of one worker: ionization, drift, current synthesis,
/// electrometer response and per-event accumulation.
///
/// A [`Sensor`] is driven through the event lifecycle by whatever produces the
/// steps: [`on_event_begin`](Self::on_event_begin), then
/// [`on_step`](Self::on_step) for every step, then
/// [`on_event_end`](Self::on_event_end).
pub struct Sensor<R, O> {
    ionization: IonizationModel,
    drift: DriftModel,
    synthesizer: CurrentSynthesizer,
    electrometer: Electrometer,
    accumulator: EventAccumulator,
    rng: R,
    observer: O,
    events: u64,
}

#[bon]
impl<R, O> Sensor<R, O> {
    #[builder]
    pub fn new(config: &SensorConfig, rng: R, observer: O) -> Self {
        Self {
            ionization: config.ionization_model(),
            drift: config.drift_model(),
            synthesizer: config.current_synthesizer(),
            electrometer: config.electrometer(),
            accumulator: EventAccumulator::new(config.max_samples()),
            rng,
            observer,
            events: 0,
        }
    }
}

impl<R, O> Sensor<R, O> {
    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// Samples retained for the current event. Time-ordered once the event
    /// has ended.
    pub fn samples(&self) -> &[CurrentSample] {
        self.accumulator.samples()
    }

    /// Number of events finished by this sensor.
    pub fn events(&self) -> u64 {
        self.events
    }
}

impl<R: SeedableRng, O> Sensor<R, O> {
    /// Restart the random stream. Used to give every event its own stream.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = R::seed_from_u64(seed);
    }
}

impl<R, O> Sensor<R, O>
where
    R: Rng,
    O: Observer,
{
    pub fn on_event_begin(&mut self) {
        self.accumulator.begin();
    }

    /// Process one step. Returns whether the transport engine should keep
    /// tracking the particle.
    pub fn on_step(&mut self, step: &StepEvent) -> TrackStatus {
        let disposition = classify(step.particle, step.volume);
        self.observer.on_step(step, disposition);

        match disposition {
            Disposition::Ignore => TrackStatus::Alive,
            Disposition::CollectAsCharge => {
                self.collect_at_electrode(step);
                TrackStatus::StopAndKill
            }
            Disposition::Normal => {
                self.ionize(step);
                TrackStatus::Alive
            }
        }
    }

    pub fn on_event_end(&mut self) -> EventStatistics {
        let statistics = self.accumulator.finalize();
        self.events += 1;

        if statistics.truncated() {
            warn!(
                retained = statistics.samples_retained,
                seen = statistics.samples_seen,
                "current sample limit reached"
            );
        }
        if self.events % PROGRESS_INTERVAL == 0 {
            debug!(
                events = self.events,
                edep_kev = statistics.energy_deposit.get::<kiloelectronvolt>(),
                charge_pc = statistics.charge.get::<picocoulomb>(),
                pairs = statistics.electron_count,
                avg_pa = statistics.average_current.get::<picoampere>(),
                peak_pa = statistics.peak_current.get::<picoampere>(),
                samples = statistics.samples_retained,
                "event finished"
            );
        }

        self.observer.on_event_end(&statistics);
        statistics
    }

    fn ionize(&mut self, step: &StepEvent) {
        let edep = step.energy_deposit;
        if edep.get::<electronvolt>() <= 0.0 {
            return;
        }

        let ionization = self.ionization.ionize(edep, &mut self.rng);
        self.observer.on_ionization(step, &ionization);

        let electrons = CarrierPacket::new(CarrierKind::Electron, ionization.collected_electrons);
        let ions = CarrierPacket::new(CarrierKind::Ion, ionization.collected_ions);
        self.accumulator.add_energy(edep);
        self.accumulator.add_carriers(
            ionization.collected_electrons,
            ionization.collected_ions,
            electrons.charge(),
        );

        let midpoint = step.midpoint();
        let transit = self.drift.transit_times(&midpoint);
        let electron_current = self.drift_pulse(step, &electrons, transit.electron);
        let ion_current = self.drift_pulse(step, &ions, transit.ion);

        if edep > Energy::new::<kiloelectronvolt>(SIGNIFICANT_DEPOSIT_KEV) {
            debug!(
                edep_kev = edep.get::<kiloelectronvolt>(),
                x_mm = midpoint.x.get::<millimeter>(),
                y_mm = midpoint.y.get::<millimeter>(),
                z_mm = midpoint.z.get::<millimeter>(),
                pairs = ionization.created,
                charge_pc = electrons.charge().get::<picocoulomb>(),
                current_pa = (electron_current + ion_current).get::<picoampere>(),
                "significant energy deposit"
            );
        }
    }

    /// Expand one drifting packet into electrometer samples. Returns the
    /// unfiltered current of the packet with its drift time jittered. The
    /// electrometer itself is driven by the nominal drift time.
    fn drift_pulse(
        &mut self,
        step: &StepEvent,
        packet: &CarrierPacket,
        transit: Time,
    ) -> ElectricCurrent {
        if transit.get::<second>() <= 0.0 {
            trace!(kind = ?packet.kind, "carriers created on the electrode, nothing drifts");
            return ElectricCurrent::new::<ampere>(0.0);
        }

        let jittered = self.synthesizer.synthesize(packet, transit, &mut self.rng);
        let pulse = CurrentPulse {
            arrival: step.global_time + transit,
            charge: packet.charge(),
            duration: transit,
        };

        let response = self.electrometer.respond(&pulse, &mut self.rng);
        let marker = CurrentSample {
            time: pulse.arrival,
            current: response.measured(),
        };
        self.observer.on_pulse(packet.kind, &pulse, marker.current);

        record(&mut self.accumulator, &mut self.observer, marker);
        for sample in response {
            record(&mut self.accumulator, &mut self.observer, sample);
        }

        jittered
    }

    fn collect_at_electrode(&mut self, step: &StepEvent) {
        let Some(collection) = ElectrodeCollection::new(
            step.particle,
            step.global_time,
            self.electrometer.time_constant(),
        ) else {
            return;
        };
        self.observer.on_electrode_collection(step, &collection);

        record(&mut self.accumulator, &mut self.observer, collection.marker());
        for sample in collection.profile() {
            record(&mut self.accumulator, &mut self.observer, sample);
        }
    }
}

fn record<O: Observer>(
    accumulator: &mut EventAccumulator,
    observer: &mut O,
    sample: CurrentSample,
) {
    if !accumulator.add_sample(sample.time, sample.current) {
        observer.on_sample_dropped(&sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ElectrodeSide, ParticleCategory, Point3, Volume};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use uom::si::electric_charge::coulomb;
    use uom::si::electric_field::volt_per_meter;
    use uom::si::f64::{ElectricField, Length};
    use uom::si::length::micrometer;
    use uom::si::time::nanosecond;

    fn config() -> SensorConfig {
        SensorConfig::builder()
            .cell_thickness(Length::new::<micrometer>(100.0))
            .field(ElectricField::new::<volt_per_meter>(3.0e6))
            .build()
            .unwrap()
    }

    fn sensor<O: Observer>(config: &SensorConfig, seed: u64, observer: O) -> Sensor<StdRng, O> {
        Sensor::builder()
            .config(config)
            .rng(StdRng::seed_from_u64(seed))
            .observer(observer)
            .build()
    }

    fn step(edep_kev: f64, y_um: f64, particle: ParticleCategory, volume: Volume) -> StepEvent {
        let um = Length::new::<micrometer>;
        StepEvent::builder()
            .energy_deposit(Energy::new::<kiloelectronvolt>(edep_kev))
            .pre(Point3::new(um(0.0), um(y_um - 1.0), um(0.0)))
            .post(Point3::new(um(0.0), um(y_um + 1.0), um(0.0)))
            .particle(particle)
            .volume(volume)
            .global_time(Time::new::<nanosecond>(0.0))
            .build()
    }

    fn lc_step(edep_kev: f64, y_um: f64) -> StepEvent {
        step(edep_kev, y_um, ParticleCategory::PrimaryBeam, Volume::Sensitive)
    }

    #[derive(Default)]
    struct TestObserver {
        dispositions: Vec<Disposition>,
        ionizations: Vec<Ionization>,
        pulses: Vec<(CarrierKind, CurrentPulse)>,
        measured: Vec<ElectricCurrent>,
        collections: usize,
        dropped: usize,
        events: usize,
    }

    impl Observer for TestObserver {
        fn on_step(&mut self, _: &StepEvent, disposition: Disposition) {
            self.dispositions.push(disposition);
        }

        fn on_ionization(&mut self, _: &StepEvent, ionization: &Ionization) {
            self.ionizations.push(*ionization);
        }

        fn on_pulse(
            &mut self,
            kind: CarrierKind,
            pulse: &CurrentPulse,
            measured: ElectricCurrent,
        ) {
            self.pulses.push((kind, *pulse));
            self.measured.push(measured);
        }

        fn on_electrode_collection(&mut self, _: &StepEvent, _: &ElectrodeCollection) {
            self.collections += 1;
        }

        fn on_sample_dropped(&mut self, _: &CurrentSample) {
            self.dropped += 1;
        }

        fn on_event_end(&mut self, _: &EventStatistics) {
            self.events += 1;
        }
    }

    #[test]
    fn zero_deposit_produces_nothing() {
        let config = config();
        let mut sensor = sensor(&config, 1, TestObserver::default());
        sensor.on_event_begin();
        assert_eq!(sensor.on_step(&lc_step(0.0, 0.0)), TrackStatus::Alive);
        assert_eq!(sensor.on_step(&lc_step(-1.0, 0.0)), TrackStatus::Alive);
        let stats = sensor.on_event_end();

        assert_eq!(stats.samples_seen, 0);
        assert_eq!(stats.electron_count, 0);
        assert!(sensor.observer().ionizations.is_empty());
        assert!(sensor.observer().pulses.is_empty());
    }

    #[test]
    fn sensitive_step_runs_both_polarities() {
        let config = config();
        let mut sensor = sensor(&config, 2, TestObserver::default());
        sensor.on_event_begin();
        sensor.on_step(&lc_step(100.0, 10.0));
        let stats = sensor.on_event_end();

        let observer = sensor.observer();
        assert_eq!(observer.dispositions, vec![Disposition::Normal]);
        assert_eq!(observer.pulses.len(), 2);
        assert_eq!(observer.pulses[0].0, CarrierKind::Electron);
        assert_eq!(observer.pulses[1].0, CarrierKind::Ion);
        // Electrons have 40 um to go, ions 60 um at a hundredth of the speed.
        let electron_t = observer.pulses[0].1.duration.get::<second>();
        let ion_t = observer.pulses[1].1.duration.get::<second>();
        assert_relative_eq!(ion_t / electron_t, 150.0, max_relative = 1e-9);

        assert_eq!(stats.electron_count, stats.ion_count);
        assert!(stats.electron_count > 2000);
        assert_relative_eq!(
            stats.energy_deposit.get::<kiloelectronvolt>(),
            100.0,
            max_relative = 1e-9
        );
        // Marker plus 100 samples per packet (both drift times are long).
        assert_eq!(stats.samples_seen, 2 * 101);
        assert!(sensor.samples().windows(2).all(|w| w[0].time <= w[1].time));
        assert!(stats.peak_current.get::<ampere>() > 0.0);
    }

    #[test]
    fn pulse_amplitude_follows_nominal_drift_time() {
        let config = SensorConfig::builder()
            .cell_thickness(Length::new::<micrometer>(100.0))
            .field(ElectricField::new::<volt_per_meter>(3.0e6))
            .gain_uncertainty(0.0)
            .noise_sigma(ElectricCurrent::new::<ampere>(0.0))
            .build()
            .unwrap();
        let mut sensor = sensor(&config, 12, TestObserver::default());
        sensor.on_event_begin();
        sensor.on_step(&lc_step(100.0, 10.0));
        sensor.on_event_end();

        let tau = config.electrometer().time_constant().get::<second>();
        let observer = sensor.observer();
        assert_eq!(observer.pulses.len(), 2);
        for ((_, pulse), measured) in observer.pulses.iter().zip(&observer.measured) {
            let t = pulse.duration.get::<second>();
            let expected = pulse.charge.get::<coulomb>() / t * (1.0 - (-t / tau).exp());
            assert_relative_eq!(measured.get::<ampere>(), expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn electrons_equal_ions_over_many_steps() {
        let config = config();
        let mut sensor = sensor(&config, 3, TestObserver::default());
        sensor.on_event_begin();
        for i in 0..50 {
            sensor.on_step(&lc_step(0.01 * i as f64, -49.0 + 2.0 * i as f64));
        }
        let stats = sensor.on_event_end();

        assert_eq!(stats.electron_count, stats.ion_count);
        for ionization in &sensor.observer().ionizations {
            assert_eq!(ionization.collected_electrons, ionization.collected_ions);
        }
    }

    #[test]
    fn beam_particle_in_electrode_is_ignored() {
        let config = config();
        let mut sensor = sensor(&config, 4, TestObserver::default());
        sensor.on_event_begin();
        let empty = sensor.on_event_end();

        sensor.on_event_begin();
        for side in [ElectrodeSide::Front, ElectrodeSide::Back] {
            let s = step(500.0, 0.0, ParticleCategory::PrimaryBeam, Volume::Electrode(side));
            assert_eq!(sensor.on_step(&s), TrackStatus::Alive);
        }
        let stats = sensor.on_event_end();

        assert_eq!(stats, empty);
        assert!(sensor.samples().is_empty());
        assert_eq!(
            sensor.observer().dispositions,
            vec![Disposition::Ignore, Disposition::Ignore]
        );
    }

    #[test]
    fn electron_in_electrode_is_absorbed() {
        let config = config();
        let mut sensor = sensor(&config, 5, TestObserver::default());
        sensor.on_event_begin();
        let s = step(
            1.0,
            0.0,
            ParticleCategory::Electron,
            Volume::Electrode(ElectrodeSide::Back),
        );
        assert_eq!(sensor.on_step(&s), TrackStatus::StopAndKill);
        let stats = sensor.on_event_end();

        assert_eq!(sensor.observer().collections, 1);
        // Marker plus the five-sample profile, no drift pulses.
        assert_eq!(stats.samples_seen, 6);
        assert!(sensor.observer().pulses.is_empty());
        assert_eq!(stats.electron_count, 0);
        assert_relative_eq!(
            stats.peak_current.get::<uom::si::electric_current::nanoampere>(),
            1.602,
            max_relative = 1e-9
        );
    }

    #[test]
    fn other_volume_is_ignored() {
        let config = config();
        let mut sensor = sensor(&config, 6, ());
        sensor.on_event_begin();
        sensor.on_step(&step(10.0, 0.0, ParticleCategory::Electron, Volume::Other));
        assert_eq!(sensor.on_event_end().samples_seen, 0);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let config = config();
        let steps: Vec<_> = (0..20)
            .map(|i| lc_step(1.0 + i as f64, -40.0 + 4.0 * i as f64))
            .collect();

        let run = |seed| {
            let mut sensor = sensor(&config, seed, ());
            sensor.on_event_begin();
            for s in &steps {
                sensor.on_step(s);
            }
            sensor.on_event_end()
        };

        assert_eq!(run(77), run(77));
        assert_ne!(run(77), run(78));
    }

    #[test]
    fn reseed_restarts_stream() {
        let config = config();
        let mut sensor = sensor(&config, 0, ());
        let event = |sensor: &mut Sensor<StdRng, ()>| {
            sensor.reseed(99);
            sensor.on_event_begin();
            sensor.on_step(&lc_step(50.0, 0.0));
            sensor.on_event_end()
        };

        let first = event(&mut sensor);
        let again = event(&mut sensor);
        assert_eq!(first, again);
        assert_eq!(sensor.events(), 2);
    }

    #[test]
    fn overflow_is_reported_to_observer() {
        let config = SensorConfig::builder()
            .cell_thickness(Length::new::<micrometer>(100.0))
            .field(ElectricField::new::<volt_per_meter>(3.0e6))
            .max_samples(150)
            .build()
            .unwrap();
        let mut sensor = sensor(&config, 8, TestObserver::default());
        sensor.on_event_begin();
        sensor.on_step(&lc_step(100.0, 0.0));
        let stats = sensor.on_event_end();

        assert_eq!(stats.samples_retained, 150);
        assert_eq!(stats.samples_seen, 202);
        assert_eq!(sensor.observer().dropped, 52);
        assert_eq!(sensor.observer().events, 1);
    }
}
