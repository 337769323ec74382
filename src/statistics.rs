use rand::Rng;
use rand_distr::{Distribution, Exp, StandardNormal};
use uom::si::f64::{Frequency, Time};
use uom::si::frequency::hertz;
use uom::si::time::second;

/// Draw from a normal distribution with the given mean and standard deviation.
///
/// A zero `sigma` still consumes one draw from `rng`, which keeps the random
/// stream aligned regardless of the parameter values.
pub fn gauss<R: Rng + ?Sized>(rng: &mut R, mean: f64, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + sigma * z
}

#[derive(Debug)]
/// An iterator over a Poisson process.
///
/// The iterator yields [`Time`]s at which events occur in a Poisson process.
/// Times are guaranteed to be in increasing order and their inter-arrival time
/// follows an exponential distribution with the specified rate parameter. Used
/// to stamp beam events with their start times.
pub struct PoissonProcess<R> {
    time: Time,
    // Inter-arrival times in seconds.
    exp: Exp<f64>,
    rng: R,
}

impl<R> PoissonProcess<R>
where
    R: Rng,
{
    /// Create a new Poisson process with the specified rate parameter.
    ///
    /// Returns `None` if the rate is not finite and positive.
    pub fn new(rate: Frequency, rng: R) -> Option<Self> {
        let lambda = rate.get::<hertz>();
        if !(lambda.is_finite() && lambda > 0.0) {
            return None;
        }

        Some(Self {
            time: Time::new::<second>(0.0),
            exp: Exp::new(lambda).ok()?,
            rng,
        })
    }
}

impl<R> Iterator for PoissonProcess<R>
where
    R: Rng,
{
    type Item = Time;

    fn next(&mut self) -> Option<Self::Item> {
        let delta_t = self.exp.sample(&mut self.rng);
        self.time += Time::new::<second>(delta_t);

        Some(self.time)
    }
}
