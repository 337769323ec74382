use crate::error::ConfigError;
use crate::statistics::gauss;
use crate::step::{ElectrodeSide, ParticleCategory, Point3, StepEvent, TrackStatus, Volume};
use bon::bon;
use rand::Rng;
use rand_distr::Exp1;
use uom::si::energy::kiloelectronvolt;
use uom::si::f64::{Energy, Length, Time};
use uom::si::length::{micrometer, millimeter};
use uom::si::time::nanosecond;

/// Distance from the beam origin to the center of the cell.
const SOURCE_DISTANCE_MM: f64 = 15.0;
/// The glass filter sits in front of the source and pushes it back.
const GLASS_THICKNESS_MM: f64 = 3.0;
/// What is left of a beam stopped by the glass filter.
const STOPPED_ENERGY_KEV: f64 = 1.0;
const SPEED_OF_LIGHT_MM_PER_NS: f64 = 299.792_458;
/// Length of the step a delta electron takes into the electrode.
const DELTA_RANGE_MM: f64 = 0.01;
/// Electrodes overhang the cell by this much on every side.
const ELECTRODE_OVERHANG_MM: f64 = 1.0;
const PRIMARY_TRACK: u32 = 1;

/// Producer of transport steps. Anything that can drive a
/// [`Sensor`](crate::Sensor) through an event implements this.
pub trait Transport {
    /// Number of events this source produces.
    fn num_events(&self) -> u64;

    /// Id under which the `index`-th event is reported.
    fn event_id(&self, index: u64) -> u64 {
        index
    }

    /// Produce the steps of one event, in transport order, through `on_step`.
    ///
    /// `t0` is the start time of the event. A [`TrackStatus::StopAndKill`]
    /// returned by `on_step` ends the track that produced the step.
    fn simulate_event<R, F>(&self, event_index: u64, t0: Time, rng: &mut R, on_step: F)
    where
        R: Rng + ?Sized,
        F: FnMut(&StepEvent) -> TrackStatus;
}

/// Energy lost by the beam in the glass filter.
#[derive(Clone, Copy, Debug, PartialEq)]
enum GlassAttenuation {
    /// Scaled by `exp(-a)`, `a` exponentially distributed with mean 2.
    Exponential,
    Fraction(f64),
    Stopped,
    Transparent,
}

impl GlassAttenuation {
    fn for_particle(name: &str) -> Self {
        match name {
            "gamma" => GlassAttenuation::Exponential,
            "e-" | "e+" => GlassAttenuation::Fraction(0.6),
            "alpha" => GlassAttenuation::Stopped,
            "neutron" => GlassAttenuation::Transparent,
            _ => GlassAttenuation::Fraction(0.9),
        }
    }

    fn apply<R: Rng + ?Sized>(&self, energy_kev: f64, rng: &mut R) -> f64 {
        match self {
            GlassAttenuation::Exponential => {
                let attenuation: f64 = 2.0 * rng.sample::<f64, _>(Exp1);
                energy_kev * (-attenuation).exp()
            }
            GlassAttenuation::Fraction(f) => energy_kev * f,
            GlassAttenuation::Stopped => STOPPED_ENERGY_KEV,
            GlassAttenuation::Transparent => energy_kev,
        }
    }
}

/// A pencil beam shot along the field axis through the front electrode, the
/// cell and the back electrode.
///
/// This is a stand-in for a full transport engine: the primary flies in a
/// straight line, loses energy in the cell with exponentially distributed
/// per-step deposits around a fixed stopping power, and occasionally knocks
/// out a delta electron that ends up in one of the electrodes. Electrodes are
/// thin for the beam and take no energy from it.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticBeam {
    particle: ParticleCategory,
    energy: Energy,
    events: u64,
    half_thickness_mm: f64,
    half_width_mm: f64,
    half_length_mm: f64,
    electrode_thickness_mm: f64,
    spot_sigma_mm: f64,
    glass: Option<GlassAttenuation>,
    stopping_power_kev_per_um: f64,
    cell_steps: u32,
    delta_probability: f64,
}

#[bon]
impl SyntheticBeam {
    #[builder]
    pub fn new(
        particle: &str,
        #[builder(default)] charge_number: i32,
        energy: Energy,
        events: u64,
        cell_thickness: Length,
        #[builder(default = Length::new::<millimeter>(15.0))] cell_width: Length,
        #[builder(default = Length::new::<millimeter>(25.0))] cell_length: Length,
        #[builder(default = Length::new::<millimeter>(1.0))] electrode_thickness: Length,
        #[builder(default = Length::new::<millimeter>(3.0))] spot_sigma: Length,
        #[builder(default)] glass_filter: bool,
        #[builder(default = 0.2)] stopping_power_kev_per_um: f64,
        #[builder(default = 10)] cell_steps: u32,
        #[builder(default = 0.05)] delta_probability: f64,
    ) -> Result<Self, ConfigError> {
        ConfigError::non_negative("energy", energy.get::<kiloelectronvolt>())?;
        let thickness =
            ConfigError::positive("cell_thickness", cell_thickness.get::<millimeter>())?;
        let width = ConfigError::positive("cell_width", cell_width.get::<millimeter>())?;
        let length = ConfigError::positive("cell_length", cell_length.get::<millimeter>())?;
        let electrode = ConfigError::positive(
            "electrode_thickness",
            electrode_thickness.get::<millimeter>(),
        )?;
        let sigma = ConfigError::non_negative("spot_sigma", spot_sigma.get::<millimeter>())?;
        ConfigError::non_negative("stopping_power", stopping_power_kev_per_um)?;
        ConfigError::fraction("delta_probability", delta_probability)?;
        if cell_steps == 0 {
            return Err(ConfigError::Invalid {
                name: "cell_steps",
                value: 0.0,
                reason: "the cell needs at least one step",
            });
        }

        Ok(Self {
            particle: ParticleCategory::from_name(particle, charge_number),
            energy,
            events,
            half_thickness_mm: thickness / 2.0,
            half_width_mm: width / 2.0,
            half_length_mm: length / 2.0,
            electrode_thickness_mm: electrode,
            spot_sigma_mm: sigma,
            glass: glass_filter.then(|| GlassAttenuation::for_particle(particle)),
            stopping_power_kev_per_um,
            cell_steps,
            delta_probability,
        })
    }
}

/// Straight-line bookkeeping for one event.
struct Flight {
    x: f64,
    z: f64,
    source_y: f64,
    t0: Time,
}

impl Flight {
    fn at(&self, y: f64) -> Point3 {
        let mm = Length::new::<millimeter>;
        Point3::new(mm(self.x), mm(y), mm(self.z))
    }

    fn time(&self, y: f64) -> Time {
        self.t0 + Time::new::<nanosecond>((y - self.source_y) / SPEED_OF_LIGHT_MM_PER_NS)
    }

    fn step(
        &self,
        from: f64,
        to: f64,
        edep_kev: f64,
        particle: ParticleCategory,
        volume: Volume,
        track_id: u32,
    ) -> StepEvent {
        StepEvent::builder()
            .energy_deposit(Energy::new::<kiloelectronvolt>(edep_kev))
            .pre(self.at(from))
            .post(self.at(to))
            .particle(particle)
            .volume(volume)
            .global_time(self.time(from))
            .track_id(track_id)
            .build()
    }
}

impl SyntheticBeam {
    fn hits_cell(&self, x: f64, z: f64) -> bool {
        x.abs() <= self.half_width_mm && z.abs() <= self.half_length_mm
    }

    fn hits_electrodes(&self, x: f64, z: f64) -> bool {
        x.abs() <= self.half_width_mm + ELECTRODE_OVERHANG_MM
            && z.abs() <= self.half_length_mm + ELECTRODE_OVERHANG_MM
    }
}

impl Transport for SyntheticBeam {
    fn num_events(&self) -> u64 {
        self.events
    }

    fn simulate_event<R, F>(&self, _event_index: u64, t0: Time, rng: &mut R, mut on_step: F)
    where
        R: Rng + ?Sized,
        F: FnMut(&StepEvent) -> TrackStatus,
    {
        let x = gauss(rng, 0.0, self.spot_sigma_mm);
        let z = gauss(rng, 0.0, self.spot_sigma_mm);
        let mut energy = self.energy.get::<kiloelectronvolt>();
        let mut source_y = -SOURCE_DISTANCE_MM;
        if let Some(glass) = self.glass {
            energy = glass.apply(energy, rng);
            source_y -= GLASS_THICKNESS_MM;
        }

        let flight = Flight { x, z, source_y, t0 };
        let half = self.half_thickness_mm;
        let electrode = self.electrode_thickness_mm;
        let primary = |from, to, edep, volume| {
            flight.step(from, to, edep, self.particle, volume, PRIMARY_TRACK)
        };

        if !self.hits_electrodes(x, z) {
            on_step(&primary(source_y, -source_y, 0.0, Volume::Other));
            return;
        }

        let front = Volume::Electrode(ElectrodeSide::Front);
        let status = on_step(&primary(-half - electrode, -half, 0.0, front));
        if status == TrackStatus::StopAndKill {
            return;
        }

        if self.hits_cell(x, z) {
            let dy = 2.0 * half / f64::from(self.cell_steps);
            let dy_um = Length::new::<millimeter>(dy).get::<micrometer>();
            let mean = self.stopping_power_kev_per_um * dy_um;
            let mut next_track = PRIMARY_TRACK + 1;

            for i in 0..self.cell_steps {
                if energy <= 0.0 {
                    // Stopped in the cell.
                    return;
                }
                let from = -half + dy * f64::from(i);
                let to = from + dy;
                let edep = (mean * rng.sample::<f64, _>(Exp1)).min(energy);
                energy -= edep;

                let status = on_step(&primary(from, to, edep, Volume::Sensitive));
                if status == TrackStatus::StopAndKill {
                    return;
                }

                if rng.random_bool(self.delta_probability) {
                    let (side, surface, sign) = if rng.random_bool(0.5) {
                        (ElectrodeSide::Front, -half, -1.0)
                    } else {
                        (ElectrodeSide::Back, half, 1.0)
                    };
                    let delta = flight.step(
                        surface,
                        surface + sign * DELTA_RANGE_MM,
                        0.0,
                        ParticleCategory::Electron,
                        Volume::Electrode(side),
                        next_track,
                    );
                    next_track += 1;
                    // Absorbed either way.
                    on_step(&delta);
                }
            }
            if energy <= 0.0 {
                return;
            }
        } else {
            on_step(&primary(-half, half, 0.0, Volume::Other));
        }

        let back = Volume::Electrode(ElectrodeSide::Back);
        on_step(&primary(half, half + electrode, 0.0, back));
    }
}
