use bon::Builder;
use std::fmt;
use uom::si::f64::{Energy, Length, Time};

/// Which side of the sensitive volume an electrode sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElectrodeSide {
    /// Electrode facing the incoming beam.
    Front,
    /// Electrode away from the beam.
    Back,
}

/// The volume in which a step took place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Volume {
    /// The sensitive (ionizing) medium between the electrodes.
    Sensitive,
    Electrode(ElectrodeSide),
    /// Anything else: world, wires, electrometer case.
    Other,
}

impl Volume {
    pub fn is_electrode(&self) -> bool {
        matches!(self, Volume::Electrode(_))
    }
}

/// Particle categories the pipeline distinguishes.
///
/// The category is resolved once when a [`StepEvent`] is built, so the hot
/// path never compares particle names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParticleCategory {
    /// Beam species that electrodes are transparent to (proton, gamma,
    /// positron, neutron).
    PrimaryBeam,
    /// A free electron.
    Electron,
    /// Any ionized species. `charge_number` is the signed charge in units of
    /// the elementary charge.
    Ion { charge_number: i32 },
    Other,
}

impl ParticleCategory {
    /// Resolve a transport-engine particle name.
    ///
    /// `charge_number` is only used for ions; it is ignored for every other
    /// category.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensim::step::ParticleCategory;
    ///
    /// assert_eq!(ParticleCategory::from_name("proton", 1), ParticleCategory::PrimaryBeam);
    /// assert_eq!(ParticleCategory::from_name("e-", -1), ParticleCategory::Electron);
    /// assert_eq!(
    ///     ParticleCategory::from_name("GenericIon", 2),
    ///     ParticleCategory::Ion { charge_number: 2 }
    /// );
    /// assert_eq!(ParticleCategory::from_name("alpha", 2), ParticleCategory::Other);
    /// ```
    pub fn from_name(name: &str, charge_number: i32) -> Self {
        match name {
            "proton" | "gamma" | "e+" | "neutron" => ParticleCategory::PrimaryBeam,
            "e-" => ParticleCategory::Electron,
            _ if contains_ion(name) => ParticleCategory::Ion { charge_number },
            _ => ParticleCategory::Other,
        }
    }

    /// Whether this particle carries charge that an electrode collects.
    pub fn is_charge_carrier(&self) -> bool {
        matches!(
            self,
            ParticleCategory::Electron | ParticleCategory::Ion { .. }
        )
    }
}

// Ion names come in several spellings ("GenericIon", "C12ion", "ION").
fn contains_ion(name: &str) -> bool {
    name.as_bytes()
        .windows(3)
        .any(|w| w.eq_ignore_ascii_case(b"ion"))
}

impl fmt::Display for ParticleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticleCategory::PrimaryBeam => write!(f, "primary"),
            ParticleCategory::Electron => write!(f, "electron"),
            ParticleCategory::Ion { charge_number } => write!(f, "ion({charge_number:+})"),
            ParticleCategory::Other => write!(f, "other"),
        }
    }
}

/// A point in detector coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point3 {
    pub x: Length,
    pub y: Length,
    pub z: Length,
}

impl Point3 {
    pub fn new(x: Length, y: Length, z: Length) -> Self {
        Self { x, y, z }
    }

    pub fn midpoint(&self, other: &Point3) -> Point3 {
        Point3 {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
        }
    }
}

/// What the transport engine should do with the track after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackStatus {
    Alive,
    /// The particle was absorbed; no further steps should be produced for it.
    StopAndKill,
}

/// One transport step, as reported by the transport engine.
#[derive(Clone, Copy, Debug, PartialEq, Builder)]
pub struct StepEvent {
    /// Energy deposited along the step. Negative values are treated as zero.
    pub energy_deposit: Energy,
    pub pre: Point3,
    pub post: Point3,
    pub particle: ParticleCategory,
    pub volume: Volume,
    /// Global time at the start of the step.
    pub global_time: Time,
    #[builder(default)]
    pub track_id: u32,
}

impl StepEvent {
    pub fn midpoint(&self) -> Point3 {
        self.pre.midpoint(&self.post)
    }
}
