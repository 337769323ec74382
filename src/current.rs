use crate::statistics::gauss;
use rand::Rng;
use uom::si::electric_charge::coulomb;
use uom::si::electric_current::ampere;
use uom::si::f64::{ElectricCharge, ElectricCurrent, Time};
use uom::si::time::second;

/// Elementary charge in coulomb, as used throughout the detector model.
pub const ELEMENTARY_CHARGE: f64 = 1.602e-19;

/// Relative standard deviation of the drift-time jitter.
pub const TRANSIT_JITTER: f64 = 0.1;

/// Sign of the carriers in a [`CarrierPacket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarrierKind {
    Electron,
    Ion,
}

/// Carriers of one sign produced by a single step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CarrierPacket {
    pub kind: CarrierKind,
    pub count: u64,
    /// Magnitude of the charge of one carrier.
    pub charge_per_carrier: ElectricCharge,
}

impl CarrierPacket {
    /// A packet of singly charged carriers.
    pub fn new(kind: CarrierKind, count: u64) -> Self {
        Self {
            kind,
            count,
            charge_per_carrier: ElectricCharge::new::<coulomb>(ELEMENTARY_CHARGE),
        }
    }

    pub fn charge(&self) -> ElectricCharge {
        self.charge_per_carrier * self.count as f64
    }
}

/// One drift-collection event before it is expanded into samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurrentPulse {
    /// When the carriers reach the electrode: the global time of the step
    /// that created them plus their drift time. The step time is used rather
    /// than the event start, so late secondaries arrive late.
    pub arrival: Time,
    pub charge: ElectricCharge,
    /// Drift (transit) time of the carriers.
    pub duration: Time,
}

/// Current of `charge` delivered over `interval`.
///
/// # Examples
///
/// ```
/// use sensim::current::{instantaneous_current, ELEMENTARY_CHARGE};
/// use uom::si::electric_charge::coulomb;
/// use uom::si::electric_current::nanoampere;
/// use uom::si::f64::{ElectricCharge, Time};
/// use uom::si::time::nanosecond;
///
/// let i = instantaneous_current(
///     ElectricCharge::new::<coulomb>(ELEMENTARY_CHARGE),
///     Time::new::<nanosecond>(0.1),
/// );
/// assert!((i.get::<nanoampere>() - 1.602).abs() < 1e-9);
/// ```
pub fn instantaneous_current(charge: ElectricCharge, interval: Time) -> ElectricCurrent {
    charge / interval
}

/// Turns a packet and its nominal drift time into a current, with the drift
/// time smeared by a relative Gaussian jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurrentSynthesizer {
    jitter: f64,
}

impl Default for CurrentSynthesizer {
    fn default() -> Self {
        Self::new(TRANSIT_JITTER)
    }
}

impl CurrentSynthesizer {
    pub fn new(jitter: f64) -> Self {
        Self { jitter }
    }

    /// Instantaneous current of `packet` drifting for (about) `transit`.
    ///
    /// The sampled drift time falls back to the nominal one when it comes out
    /// non-positive. A non-positive nominal time gives zero current.
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        packet: &CarrierPacket,
        transit: Time,
        rng: &mut R,
    ) -> ElectricCurrent {
        let nominal = transit.get::<second>();
        if nominal.is_nan() || nominal <= 0.0 {
            return ElectricCurrent::new::<ampere>(0.0);
        }

        let mut sampled = gauss(rng, nominal, self.jitter * nominal);
        if sampled <= 0.0 {
            sampled = nominal;
        }

        ElectricCurrent::new::<ampere>(packet.charge().get::<coulomb>() / sampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uom::si::electric_current::nanoampere;
    use uom::si::time::nanosecond;

    #[test]
    fn packet_charge() {
        let packet = CarrierPacket::new(CarrierKind::Electron, 1000);
        assert_relative_eq!(packet.charge().get::<coulomb>(), 1.602e-16, max_relative = 1e-12);
        assert_eq!(
            CarrierPacket::new(CarrierKind::Ion, 0).charge().get::<coulomb>(),
            0.0
        );
    }

    #[test]
    fn single_electron_over_tenth_of_nanosecond() {
        let i = instantaneous_current(
            ElectricCharge::new::<coulomb>(ELEMENTARY_CHARGE),
            Time::new::<nanosecond>(0.1),
        );
        assert_relative_eq!(i.get::<ampere>(), 1.602e-9, max_relative = 1e-12);
    }

    #[test]
    fn no_jitter_is_exact() {
        let mut rng = StdRng::seed_from_u64(0);
        let packet = CarrierPacket::new(CarrierKind::Electron, 1);
        let i = CurrentSynthesizer::new(0.0).synthesize(
            &packet,
            Time::new::<nanosecond>(0.1),
            &mut rng,
        );
        assert_relative_eq!(i.get::<nanoampere>(), 1.602, max_relative = 1e-9);
    }

    #[test]
    fn jitter_is_positive_and_centered() {
        let mut rng = StdRng::seed_from_u64(42);
        let synth = CurrentSynthesizer::default();
        let packet = CarrierPacket::new(CarrierKind::Ion, 10_000);
        let transit = Time::new::<second>(1.0e-3);
        let nominal = packet.charge().get::<coulomb>() / 1.0e-3;

        let n = 5000;
        let mut sum = 0.0;
        for _ in 0..n {
            let i = synth.synthesize(&packet, transit, &mut rng).get::<ampere>();
            assert!(i > 0.0);
            sum += i;
        }
        // E[1/T] is slightly above 1/E[T] for a 10% spread.
        let mean = sum / n as f64;
        assert!((mean / nominal - 1.0).abs() < 0.03, "ratio = {}", mean / nominal);
    }

    #[test]
    fn non_positive_transit_gives_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let packet = CarrierPacket::new(CarrierKind::Electron, 5);
        let synth = CurrentSynthesizer::default();
        for t in [0.0, -1.0] {
            let i = synth.synthesize(&packet, Time::new::<second>(t), &mut rng);
            assert_eq!(i.get::<ampere>(), 0.0);
        }
    }
}
