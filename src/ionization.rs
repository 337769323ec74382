use crate::statistics::gauss;
use rand::Rng;
use rand_distr::{Binomial, Distribution};
use uom::si::energy::electronvolt;
use uom::si::f64::Energy;

/// Number of electron-ion pairs created by depositing `edep`.
///
/// The mean `edep / energy_per_ionization` is rounded to the nearest integer
/// and smeared by a Gaussian of width `sqrt(mean)` (truncated toward zero), so
/// the result follows Poisson-like statistics. Negative outcomes clamp to zero.
/// A non-positive deposit returns zero without touching `rng`.
///
/// # Examples
///
/// ```
/// use rand::SeedableRng;
/// use sensim::ionization::ionization_count;
/// use uom::si::energy::electronvolt;
/// use uom::si::f64::Energy;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// let w = Energy::new::<electronvolt>(30.0);
///
/// assert_eq!(ionization_count(Energy::new::<electronvolt>(0.0), w, &mut rng), 0);
/// let n = ionization_count(Energy::new::<electronvolt>(30_000.0), w, &mut rng);
/// assert!(n > 800 && n < 1200);
/// ```
pub fn ionization_count<R: Rng + ?Sized>(
    edep: Energy,
    energy_per_ionization: Energy,
    rng: &mut R,
) -> u64 {
    let edep = edep.get::<electronvolt>();
    if edep.is_nan() || edep <= 0.0 {
        return 0;
    }

    let mean = edep / energy_per_ionization.get::<electronvolt>();
    let offset = gauss(rng, 0.0, mean.sqrt()).trunc();
    let count = mean.round() + offset;

    if count > 0.0 {
        count as u64
    } else {
        0
    }
}

/// Number of carriers out of `count` that reach an electrode when each one
/// independently survives with probability `efficiency`.
pub fn collect<R: Rng + ?Sized>(count: u64, efficiency: f64, rng: &mut R) -> u64 {
    if count == 0 {
        return 0;
    }
    match Binomial::new(count, efficiency) {
        Ok(binomial) => binomial.sample(rng),
        // Only reachable for an efficiency outside [0, 1], which the config
        // rejects up front.
        Err(_) => 0,
    }
}

/// Ionization statistics of the sensitive medium.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IonizationModel {
    pub energy_per_ionization: Energy,
    pub collection_efficiency: f64,
}

/// Carriers created and collected for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ionization {
    pub created: u64,
    pub collected_electrons: u64,
    pub collected_ions: u64,
}

impl IonizationModel {
    /// Create and collect the carriers of one deposit. The same number of ions
    /// and electrons is collected.
    pub fn ionize<R: Rng + ?Sized>(&self, edep: Energy, rng: &mut R) -> Ionization {
        let created = ionization_count(edep, self.energy_per_ionization, rng);
        let collected = collect(created, self.collection_efficiency, rng);

        Ionization {
            created,
            collected_electrons: collected,
            collected_ions: collected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ev(value: f64) -> Energy {
        Energy::new::<electronvolt>(value)
    }

    #[test]
    fn non_positive_deposit() {
        let mut rng = StdRng::seed_from_u64(0);
        for edep in [0.0, -1.0, -1.0e6] {
            assert_eq!(ionization_count(ev(edep), ev(30.0), &mut rng), 0);
        }
    }

    #[test]
    fn small_deposits_never_negative() {
        // u64 can't go negative, but the clamp must also avoid wrapping.
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..10_000 {
            let n = ionization_count(ev(1.0), ev(30.0), &mut rng);
            assert!(n < 10);
        }
    }

    #[test]
    fn mean_tracks_deposit() {
        let mut rng = StdRng::seed_from_u64(9);
        let n = 2000;
        let total: u64 = (0..n)
            .map(|_| ionization_count(ev(3000.0), ev(30.0), &mut rng))
            .sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 100.0).abs() < 1.0, "mean = {mean}");
    }

    #[test]
    fn single_pair_collection() {
        let mut rng = StdRng::seed_from_u64(21);
        let n = 20_000;
        let mut total = 0;
        for _ in 0..n {
            let c = collect(1, 0.8, &mut rng);
            assert!(c <= 1);
            total += c;
        }
        let mean = total as f64 / n as f64;
        assert!((mean - 0.8).abs() < 0.02, "mean = {mean}");
    }

    #[test]
    fn thirty_ev_mean_is_one_pair() {
        let model = IonizationModel {
            energy_per_ionization: ev(30.0),
            collection_efficiency: 0.8,
        };
        let mut rng = StdRng::seed_from_u64(2);
        let n = 20_000;
        let mut created = 0;
        for _ in 0..n {
            let ion = model.ionize(ev(30.0), &mut rng);
            assert!(ion.collected_electrons <= ion.created);
            created += ion.created;
        }
        // Truncating the offset toward zero keeps the mean at round(mean) plus
        // the clamp bias of the negative tail.
        let mean = created as f64 / n as f64;
        assert!(mean > 0.9 && mean < 1.3, "mean = {mean}");
    }

    #[test]
    fn electrons_equal_ions() {
        let model = IonizationModel {
            energy_per_ionization: ev(30.0),
            collection_efficiency: 0.8,
        };
        let mut rng = StdRng::seed_from_u64(3);
        for edep in [0.0, 15.0, 30.0, 1.0e3, 1.0e6] {
            let ion = model.ionize(ev(edep), &mut rng);
            assert_eq!(ion.collected_electrons, ion.collected_ions);
        }
    }

    #[test]
    fn perfect_and_zero_efficiency() {
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(collect(123, 1.0, &mut rng), 123);
        assert_eq!(collect(123, 0.0, &mut rng), 0);
        assert_eq!(collect(0, 0.5, &mut rng), 0);
    }
}
