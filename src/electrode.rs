use crate::accumulator::CurrentSample;
use crate::current::{instantaneous_current, ELEMENTARY_CHARGE};
use crate::step::{ParticleCategory, Volume};
use uom::si::electric_charge::coulomb;
use uom::si::f64::{ElectricCharge, ElectricCurrent, Time};
use uom::si::time::nanosecond;

/// Interval over which a carrier reaching an electrode delivers its charge, in
/// nanoseconds.
pub const COLLECTION_INTERVAL_NS: f64 = 0.1;
/// Number of samples in the profile of a carrier absorbed by an electrode.
pub const COLLECTION_PROFILE_SAMPLES: usize = 5;

/// What the pipeline does with a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the step without touching the event.
    Ignore,
    /// A carrier reached an electrode: record its charge directly and absorb
    /// the track.
    CollectAsCharge,
    /// Run the ionization and drift pipeline.
    Normal,
}

/// Decide how a step is handled based on where it happened and what made it.
///
/// Electrodes are transparent to beam particles, absorb charge carriers and
/// ignore everything else. Only the sensitive volume ionizes.
///
/// # Examples
///
/// ```
/// use sensim::electrode::{classify, Disposition};
/// use sensim::step::{ElectrodeSide, ParticleCategory, Volume};
///
/// let front = Volume::Electrode(ElectrodeSide::Front);
/// assert_eq!(classify(ParticleCategory::PrimaryBeam, front), Disposition::Ignore);
/// assert_eq!(classify(ParticleCategory::Electron, front), Disposition::CollectAsCharge);
/// assert_eq!(classify(ParticleCategory::PrimaryBeam, Volume::Sensitive), Disposition::Normal);
/// ```
pub fn classify(particle: ParticleCategory, volume: Volume) -> Disposition {
    match volume {
        Volume::Electrode(_) if particle.is_charge_carrier() => Disposition::CollectAsCharge,
        Volume::Electrode(_) => Disposition::Ignore,
        Volume::Sensitive => Disposition::Normal,
        Volume::Other => Disposition::Ignore,
    }
}

/// Charge magnitude delivered by a carrier absorbed in an electrode.
pub fn carrier_charge(particle: ParticleCategory) -> Option<ElectricCharge> {
    let elementary = match particle {
        ParticleCategory::Electron => 1.0,
        ParticleCategory::Ion { charge_number } => f64::from(charge_number.unsigned_abs()),
        ParticleCategory::PrimaryBeam | ParticleCategory::Other => return None,
    };

    Some(ElectricCharge::new::<coulomb>(elementary * ELEMENTARY_CHARGE))
}

/// Current pulse of a carrier absorbed by an electrode.
///
/// The carrier has already drifted, so the drift model is bypassed: the full
/// charge is delivered over [`COLLECTION_INTERVAL_NS`] and decays with the
/// electrometer time constant over a short fixed profile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElectrodeCollection {
    pub arrival: Time,
    pub current: ElectricCurrent,
    interval: Time,
    time_constant: Time,
}

impl ElectrodeCollection {
    /// Returns `None` if `particle` does not carry charge.
    pub fn new(particle: ParticleCategory, arrival: Time, time_constant: Time) -> Option<Self> {
        let charge = carrier_charge(particle)?;
        let interval = Time::new::<nanosecond>(COLLECTION_INTERVAL_NS);

        Some(Self {
            arrival,
            current: instantaneous_current(charge, interval),
            interval,
            time_constant,
        })
    }

    /// The undecayed pulse at the moment of arrival.
    pub fn marker(&self) -> CurrentSample {
        CurrentSample {
            time: self.arrival,
            current: self.current,
        }
    }

    pub fn profile(&self) -> impl Iterator<Item = CurrentSample> + '_ {
        (0..COLLECTION_PROFILE_SAMPLES).map(move |i| {
            let elapsed = self.interval * i as f64;
            let decay = (-(elapsed / self.time_constant).value).exp();
            CurrentSample {
                time: self.arrival + elapsed,
                current: self.current * decay,
            }
        })
    }
}
