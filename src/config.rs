//! Immutable detector and beam configuration.
//!
//! A [`SensorConfig`] is validated once, when it is built, and then shared by
//! reference with every worker. Nothing in it changes during a run.

use crate::current::CurrentSynthesizer;
use crate::drift::{DriftModel, FieldAxis, Mobility};
use crate::electrometer::Electrometer;
use crate::error::{ConfigError, Error};
use crate::ionization::IonizationModel;
use bon::bon;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use uom::si::capacitance::picofarad;
use uom::si::electric_current::femtoampere;
use uom::si::electric_field::volt_per_meter;
use uom::si::electric_potential::volt;
use uom::si::electrical_resistance::gigaohm;
use uom::si::energy::{electronvolt, gigaelectronvolt, kiloelectronvolt, megaelectronvolt};
use uom::si::f64::{
    Capacitance, ElectricCurrent, ElectricField, ElectricPotential, ElectricalResistance, Energy,
    Frequency, Length,
};
use uom::si::frequency::{hertz, megahertz};
use uom::si::length::{meter, micrometer};
use winnow::ascii::{float, space0};
use winnow::combinator::{alt, delimited, preceded};
use winnow::Parser;

pub const CELL_THICKNESS_UM: f64 = 100.0;
pub const FIELD_V_PER_UM: f64 = 3.0;
pub const ELECTRON_MOBILITY_CM2_PER_VS: f64 = 1.0e-6;
pub const ION_MOBILITY_CM2_PER_VS: f64 = 1.0e-8;
pub const ENERGY_PER_IONIZATION_EV: f64 = 30.0;
pub const COLLECTION_EFFICIENCY: f64 = 0.8;
pub const INPUT_RESISTANCE_GOHM: f64 = 1.0;
pub const INPUT_CAPACITANCE_PF: f64 = 10.0;
pub const SAMPLING_RATE_MHZ: f64 = 1.0;
pub const NOISE_FA: f64 = 10.0;
pub const GAIN_UNCERTAINTY: f64 = 0.01;

/// Field produced by `bias` across a cell of the given thickness.
pub fn field_from_bias(bias: ElectricPotential, thickness: Length) -> ElectricField {
    bias / thickness
}

/// Physical parameters of the sensor and its readout.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorConfig {
    cell_thickness: Length,
    field: ElectricField,
    field_axis: FieldAxis,
    electron_mobility: Mobility,
    ion_mobility: Mobility,
    energy_per_ionization: Energy,
    collection_efficiency: f64,
    input_resistance: ElectricalResistance,
    input_capacitance: Capacitance,
    sampling_rate: Frequency,
    noise_sigma: ElectricCurrent,
    gain_uncertainty: f64,
    transit_jitter: f64,
    max_samples: usize,
}

#[bon]
impl SensorConfig {
    /// Only the cell thickness and the field are required; everything else
    /// defaults to a 5CB liquid-crystal cell read out by a 1 GΩ / 10 pF
    /// electrometer.
    #[builder]
    pub fn new(
        cell_thickness: Length,
        field: ElectricField,
        #[builder(default)] field_axis: FieldAxis,
        #[builder(default = Mobility::from_square_centimeter_per_volt_second(ELECTRON_MOBILITY_CM2_PER_VS))]
        electron_mobility: Mobility,
        #[builder(default = Mobility::from_square_centimeter_per_volt_second(ION_MOBILITY_CM2_PER_VS))]
        ion_mobility: Mobility,
        #[builder(default = Energy::new::<electronvolt>(ENERGY_PER_IONIZATION_EV))]
        energy_per_ionization: Energy,
        #[builder(default = COLLECTION_EFFICIENCY)] collection_efficiency: f64,
        #[builder(default = ElectricalResistance::new::<gigaohm>(INPUT_RESISTANCE_GOHM))]
        input_resistance: ElectricalResistance,
        #[builder(default = Capacitance::new::<picofarad>(INPUT_CAPACITANCE_PF))]
        input_capacitance: Capacitance,
        #[builder(default = Frequency::new::<megahertz>(SAMPLING_RATE_MHZ))]
        sampling_rate: Frequency,
        #[builder(default = ElectricCurrent::new::<femtoampere>(NOISE_FA))]
        noise_sigma: ElectricCurrent,
        #[builder(default = GAIN_UNCERTAINTY)] gain_uncertainty: f64,
        #[builder(default = crate::current::TRANSIT_JITTER)] transit_jitter: f64,
        #[builder(default = crate::accumulator::MAX_SAMPLES)] max_samples: usize,
    ) -> Result<Self, ConfigError> {
        ConfigError::positive("cell_thickness", cell_thickness.get::<meter>())?;
        ConfigError::positive("field", field.get::<volt_per_meter>())?;
        ConfigError::positive(
            "electron_mobility",
            electron_mobility.square_meter_per_volt_second(),
        )?;
        ConfigError::positive("ion_mobility", ion_mobility.square_meter_per_volt_second())?;
        ConfigError::positive(
            "energy_per_ionization",
            energy_per_ionization.get::<electronvolt>(),
        )?;
        ConfigError::fraction("collection_efficiency", collection_efficiency)?;
        ConfigError::positive("input_resistance", input_resistance.get::<gigaohm>())?;
        ConfigError::positive("input_capacitance", input_capacitance.get::<picofarad>())?;
        ConfigError::positive("sampling_rate", sampling_rate.get::<hertz>())?;
        ConfigError::non_negative("noise_sigma", noise_sigma.get::<femtoampere>())?;
        ConfigError::non_negative("gain_uncertainty", gain_uncertainty)?;
        ConfigError::non_negative("transit_jitter", transit_jitter)?;
        if max_samples == 0 {
            return Err(ConfigError::Invalid {
                name: "max_samples",
                value: 0.0,
                reason: "must hold at least one sample",
            });
        }

        Ok(Self {
            cell_thickness,
            field,
            field_axis,
            electron_mobility,
            ion_mobility,
            energy_per_ionization,
            collection_efficiency,
            input_resistance,
            input_capacitance,
            sampling_rate,
            noise_sigma,
            gain_uncertainty,
            transit_jitter,
            max_samples,
        })
    }
}

impl SensorConfig {
    /// Read a TOML detector description from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::try_from(DetectorFile::load(path)?)?)
    }

    pub fn cell_thickness(&self) -> Length {
        self.cell_thickness
    }

    pub fn field(&self) -> ElectricField {
        self.field
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn drift_model(&self) -> DriftModel {
        DriftModel {
            half_thickness: self.cell_thickness / 2.0,
            axis: self.field_axis,
            field: self.field,
            electron_mobility: self.electron_mobility,
            ion_mobility: self.ion_mobility,
        }
    }

    pub fn ionization_model(&self) -> IonizationModel {
        IonizationModel {
            energy_per_ionization: self.energy_per_ionization,
            collection_efficiency: self.collection_efficiency,
        }
    }

    pub fn current_synthesizer(&self) -> CurrentSynthesizer {
        CurrentSynthesizer::new(self.transit_jitter)
    }

    pub fn electrometer(&self) -> Electrometer {
        Electrometer::new(
            self.input_resistance,
            self.input_capacitance,
            self.sampling_rate,
            self.noise_sigma,
            self.gain_uncertainty,
        )
    }
}

impl FromStr for SensorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.parse::<DetectorFile>()?)
    }
}

/// On-disk detector description. Every entry is optional in the file; missing
/// required entries are reported when converting into a [`SensorConfig`].
///
/// ```toml
/// cell_thickness_um = 100.0
/// bias_v = 300.0
/// collection_efficiency = 0.8
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorFile {
    pub cell_thickness_um: Option<f64>,
    pub field_v_per_um: Option<f64>,
    pub bias_v: Option<f64>,
    pub field_axis: Option<FieldAxis>,
    pub electron_mobility_cm2_per_vs: Option<f64>,
    pub ion_mobility_cm2_per_vs: Option<f64>,
    pub energy_per_ionization_ev: Option<f64>,
    pub collection_efficiency: Option<f64>,
    pub input_resistance_gohm: Option<f64>,
    pub input_capacitance_pf: Option<f64>,
    pub sampling_rate_mhz: Option<f64>,
    pub noise_fa: Option<f64>,
    pub gain_uncertainty: Option<f64>,
    pub transit_jitter: Option<f64>,
    pub max_samples: Option<usize>,
}

impl DetectorFile {
    /// The default cell: 100 µm thick at 3 V/µm.
    pub fn lc_cell() -> Self {
        Self {
            cell_thickness_um: Some(CELL_THICKNESS_UM),
            field_v_per_um: Some(FIELD_V_PER_UM),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(text.parse()?)
    }

    /// Replace whatever sets the field with a bias voltage.
    pub fn set_bias(&mut self, bias_v: f64) {
        self.bias_v = Some(bias_v);
        self.field_v_per_um = None;
    }
}

impl FromStr for DetectorFile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::Toml(e.to_string()))
    }
}

impl TryFrom<DetectorFile> for SensorConfig {
    type Error = ConfigError;

    fn try_from(file: DetectorFile) -> Result<Self, Self::Error> {
        let thickness_um = file
            .cell_thickness_um
            .ok_or(ConfigError::Missing("cell_thickness_um"))?;
        let thickness = Length::new::<micrometer>(thickness_um);
        let field = match (file.field_v_per_um, file.bias_v) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingField),
            (Some(f), None) => ElectricField::new::<volt_per_meter>(f * 1.0e6),
            (None, Some(bias)) => field_from_bias(ElectricPotential::new::<volt>(bias), thickness),
            (None, None) => return Err(ConfigError::Missing("field_v_per_um")),
        };

        let electron_mu = file
            .electron_mobility_cm2_per_vs
            .unwrap_or(ELECTRON_MOBILITY_CM2_PER_VS);
        let ion_mu = file.ion_mobility_cm2_per_vs.unwrap_or(ION_MOBILITY_CM2_PER_VS);
        let w = file.energy_per_ionization_ev.unwrap_or(ENERGY_PER_IONIZATION_EV);
        let r = file.input_resistance_gohm.unwrap_or(INPUT_RESISTANCE_GOHM);
        let c = file.input_capacitance_pf.unwrap_or(INPUT_CAPACITANCE_PF);
        let rate = file.sampling_rate_mhz.unwrap_or(SAMPLING_RATE_MHZ);

        SensorConfig::builder()
            .cell_thickness(thickness)
            .field(field)
            .field_axis(file.field_axis.unwrap_or_default())
            .electron_mobility(Mobility::from_square_centimeter_per_volt_second(electron_mu))
            .ion_mobility(Mobility::from_square_centimeter_per_volt_second(ion_mu))
            .energy_per_ionization(Energy::new::<electronvolt>(w))
            .collection_efficiency(file.collection_efficiency.unwrap_or(COLLECTION_EFFICIENCY))
            .input_resistance(ElectricalResistance::new::<gigaohm>(r))
            .input_capacitance(Capacitance::new::<picofarad>(c))
            .sampling_rate(Frequency::new::<megahertz>(rate))
            .noise_sigma(ElectricCurrent::new::<femtoampere>(file.noise_fa.unwrap_or(NOISE_FA)))
            .gain_uncertainty(file.gain_uncertainty.unwrap_or(GAIN_UNCERTAINTY))
            .transit_jitter(file.transit_jitter.unwrap_or(crate::current::TRANSIT_JITTER))
            .max_samples(file.max_samples.unwrap_or(crate::accumulator::MAX_SAMPLES))
            .build()
    }
}

fn energy_unit(input: &mut &str) -> winnow::Result<fn(f64) -> Energy> {
    alt((
        "GeV".value(Energy::new::<gigaelectronvolt> as fn(f64) -> Energy),
        "MeV".value(Energy::new::<megaelectronvolt> as fn(f64) -> Energy),
        "keV".value(Energy::new::<kiloelectronvolt> as fn(f64) -> Energy),
        "eV".value(Energy::new::<electronvolt> as fn(f64) -> Energy),
    ))
    .parse_next(input)
}

/// Parse an energy written as a value and a unit, e.g. `"500 MeV"` or
/// `"30keV"`.
///
/// # Examples
///
/// ```
/// use sensim::config::parse_energy;
/// use uom::si::energy::kiloelectronvolt;
///
/// let energy = parse_energy("1.5 MeV")?;
/// assert!((energy.get::<kiloelectronvolt>() - 1500.0).abs() < 1e-9);
/// # Ok::<(), sensim::error::ConfigError>(())
/// ```
pub fn parse_energy(input: &str) -> Result<Energy, ConfigError> {
    let (value, unit): (f64, fn(f64) -> Energy) =
        delimited(space0, (float, preceded(space0, energy_unit)), space0)
            .parse(input)
            .map_err(|_| ConfigError::Energy(input.to_string()))?;
    ConfigError::non_negative("energy", value)?;

    Ok(unit(value))
}

/// Beam settings, fixed for the whole run.
#[derive(Clone, Debug, PartialEq)]
pub struct BeamConfig {
    pub particle: String,
    pub energy: Energy,
}

impl BeamConfig {
    pub fn new(particle: impl Into<String>, energy: Energy) -> Self {
        Self {
            particle: particle.into(),
            energy,
        }
    }

    /// Base name shared by every output artifact of a run.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensim::config::BeamConfig;
    /// use uom::si::energy::megaelectronvolt;
    /// use uom::si::f64::Energy;
    ///
    /// let beam = BeamConfig::new("proton", Energy::new::<megaelectronvolt>(500.0));
    /// assert_eq!(beam.output_base_name(), "LC_proton_500MeV");
    /// ```
    pub fn output_base_name(&self) -> String {
        format!("LC_{}_{}MeV", self.particle, self.energy_mev())
    }

    /// Beam energy in MeV, rounded to the eV so 500 MeV prints as "500".
    pub fn energy_mev(&self) -> f64 {
        (self.energy.get::<megaelectronvolt>() * 1.0e6).round() / 1.0e6
    }
}
