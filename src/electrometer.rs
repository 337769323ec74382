use crate::accumulator::CurrentSample;
use crate::current::{instantaneous_current, CurrentPulse};
use crate::statistics::gauss;
use rand::Rng;
use std::iter::FusedIterator;
use uom::si::electric_current::ampere;
use uom::si::f64::{Capacitance, ElectricCurrent, ElectricalResistance, Frequency, Time};
use uom::si::frequency::hertz;
use uom::si::time::second;

/// Fewest samples a pulse is expanded into.
pub const MIN_SAMPLES_PER_PULSE: usize = 10;
/// Most samples a pulse is expanded into.
pub const MAX_SAMPLES_PER_PULSE: usize = 100;

/// Single-pole RC model of the electrometer input stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Electrometer {
    time_constant: Time,
    sampling_rate: Frequency,
    noise_sigma: ElectricCurrent,
    gain_uncertainty: f64,
}

impl Electrometer {
    pub fn new(
        resistance: ElectricalResistance,
        capacitance: Capacitance,
        sampling_rate: Frequency,
        noise_sigma: ElectricCurrent,
        gain_uncertainty: f64,
    ) -> Self {
        Self {
            time_constant: resistance * capacitance,
            sampling_rate,
            noise_sigma,
            gain_uncertainty,
        }
    }

    /// The RC time constant.
    pub fn time_constant(&self) -> Time {
        self.time_constant
    }

    /// Number of samples used to draw a pulse of the given drift time.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sensim::electrometer::Electrometer;
    /// use uom::si::capacitance::picofarad;
    /// use uom::si::electric_current::femtoampere;
    /// use uom::si::electrical_resistance::gigaohm;
    /// use uom::si::f64::*;
    /// use uom::si::frequency::megahertz;
    /// use uom::si::time::microsecond;
    ///
    /// let electrometer = Electrometer::new(
    ///     ElectricalResistance::new::<gigaohm>(1.0),
    ///     Capacitance::new::<picofarad>(10.0),
    ///     Frequency::new::<megahertz>(1.0),
    ///     ElectricCurrent::new::<femtoampere>(10.0),
    ///     0.01,
    /// );
    /// assert_eq!(electrometer.num_samples(Time::new::<microsecond>(1.0)), 10);
    /// assert_eq!(electrometer.num_samples(Time::new::<microsecond>(42.5)), 42);
    /// assert_eq!(electrometer.num_samples(Time::new::<microsecond>(1.0e6)), 100);
    /// ```
    pub fn num_samples(&self, transit: Time) -> usize {
        let desired = (transit.get::<second>() * self.sampling_rate.get::<hertz>()).floor();
        // `as` saturates, NaN becomes zero.
        (desired as usize).clamp(MIN_SAMPLES_PER_PULSE, MAX_SAMPLES_PER_PULSE)
    }

    /// Current seen at the electrometer input when `base` arrives after
    /// drifting for `transit`: attenuated by the finite charging time of the
    /// input capacitance and smeared by the gain uncertainty.
    pub fn measure<R: Rng + ?Sized>(
        &self,
        base: ElectricCurrent,
        transit: Time,
        rng: &mut R,
    ) -> ElectricCurrent {
        let tau = self.time_constant.get::<second>();
        let attenuation = 1.0 - (-transit.get::<second>() / tau).exp();
        let gain = 1.0 + gauss(rng, 0.0, self.gain_uncertainty);

        ElectricCurrent::new::<ampere>(base.get::<ampere>() * attenuation * gain)
    }

    /// Response of the electrometer to one pulse. The unfiltered current is the
    /// pulse charge delivered over its nominal drift time.
    ///
    /// The returned iterator draws its noise lazily from `rng`, so it must be
    /// consumed before `rng` is used again.
    pub fn respond<'a, R: Rng + ?Sized>(
        &self,
        pulse: &CurrentPulse,
        rng: &'a mut R,
    ) -> Response<'a, R> {
        let base = instantaneous_current(pulse.charge, pulse.duration);
        let measured = self.measure(base, pulse.duration, &mut *rng);
        let len = self.num_samples(pulse.duration);

        Response {
            measured: measured.get::<ampere>(),
            arrival: pulse.arrival.get::<second>(),
            dt: pulse.duration.get::<second>() / len as f64,
            tau: self.time_constant.get::<second>(),
            noise_sigma: self.noise_sigma.get::<ampere>(),
            index: 0,
            len,
            rng,
        }
    }
}

/// Decaying, noisy sample train produced by [`Electrometer::respond`].
#[derive(Debug)]
pub struct Response<'a, R: ?Sized> {
    // All in SI base units.
    measured: f64,
    arrival: f64,
    dt: f64,
    tau: f64,
    noise_sigma: f64,
    index: usize,
    len: usize,
    rng: &'a mut R,
}

impl<R: ?Sized> Response<'_, R> {
    /// The attenuated current at the moment of arrival, before decay and
    /// noise.
    pub fn measured(&self) -> ElectricCurrent {
        ElectricCurrent::new::<ampere>(self.measured)
    }

    pub fn arrival(&self) -> Time {
        Time::new::<second>(self.arrival)
    }
}

impl<R: Rng + ?Sized> Iterator for Response<'_, R> {
    type Item = CurrentSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let elapsed = self.index as f64 * self.dt;
        self.index += 1;

        let decay = (-elapsed / self.tau).exp();
        let current = self.measured * decay + gauss(&mut *self.rng, 0.0, self.noise_sigma);

        Some(CurrentSample {
            time: Time::new::<second>(self.arrival + elapsed),
            current: ElectricCurrent::new::<ampere>(current),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl<R: Rng + ?Sized> ExactSizeIterator for Response<'_, R> {}

impl<R: Rng + ?Sized> FusedIterator for Response<'_, R> {}
