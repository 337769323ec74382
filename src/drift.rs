use crate::step::Point3;
use serde::Deserialize;
use uom::si::electric_field::volt_per_meter;
use uom::si::f64::{ElectricField, Length, Time};
use uom::si::length::meter;
use uom::si::time::second;

/// Carrier mobility, stored in m²/(V·s).
///
/// `uom` has no mobility quantity, so this is a thin newtype that only knows
/// how to turn a field into a drift velocity.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Mobility(f64);

impl Mobility {
    pub fn from_square_meter_per_volt_second(value: f64) -> Self {
        Self(value)
    }

    /// # Examples
    ///
    /// ```
    /// use sensim::drift::Mobility;
    ///
    /// let mu = Mobility::from_square_centimeter_per_volt_second(1.0e-6);
    /// assert_eq!(mu.square_meter_per_volt_second(), 1.0e-10);
    /// ```
    pub fn from_square_centimeter_per_volt_second(value: f64) -> Self {
        Self(value * 1.0e-4)
    }

    pub fn square_meter_per_volt_second(&self) -> f64 {
        self.0
    }

    /// Drift speed in m/s for the given field.
    fn drift_speed(&self, field: ElectricField) -> f64 {
        self.0 * field.get::<volt_per_meter>()
    }
}

/// Axis along which the bias field points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldAxis {
    X,
    #[default]
    Y,
    Z,
}

impl FieldAxis {
    pub fn component(&self, point: &Point3) -> Length {
        match self {
            FieldAxis::X => point.x,
            FieldAxis::Y => point.y,
            FieldAxis::Z => point.z,
        }
    }
}

/// Time for a carrier to drift `distance` through `field`.
///
/// Negative distances are clamped to zero, so the result is never negative. A
/// zero drift speed yields an infinite time.
///
/// # Examples
///
/// ```
/// use sensim::drift::{transit_time, Mobility};
/// use uom::si::electric_field::volt_per_meter;
/// use uom::si::f64::{ElectricField, Length};
/// use uom::si::length::micrometer;
/// use uom::si::time::second;
///
/// let t = transit_time(
///     Length::new::<micrometer>(50.0),
///     Mobility::from_square_meter_per_volt_second(1.0e-10),
///     ElectricField::new::<volt_per_meter>(3.0e6),
/// );
/// assert!((t.get::<second>() - 5.0e-5 / 3.0e-4).abs() < 1e-12);
/// ```
pub fn transit_time(distance: Length, mobility: Mobility, field: ElectricField) -> Time {
    let distance = distance.get::<meter>().max(0.0);
    let speed = mobility.drift_speed(field);
    let t = if distance == 0.0 {
        0.0
    } else {
        distance / speed
    };

    Time::new::<second>(t)
}

/// Drift times of the two carrier species created by one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitTimes {
    /// Electrons drift to the anode.
    pub electron: Time,
    /// Ions drift to the cathode.
    pub ion: Time,
}

/// Drift geometry of the sensitive volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftModel {
    pub half_thickness: Length,
    pub axis: FieldAxis,
    pub field: ElectricField,
    pub electron_mobility: Mobility,
    pub ion_mobility: Mobility,
}

impl DriftModel {
    /// Distances from `point` to the anode and to the cathode, measured along
    /// the field axis.
    pub fn electrode_distances(&self, point: &Point3) -> (Length, Length) {
        let along = self.axis.component(point);
        let to_anode = self.half_thickness - along;
        let to_cathode = self.half_thickness + along;

        (to_anode, to_cathode)
    }

    pub fn transit_times(&self, point: &Point3) -> TransitTimes {
        let (to_anode, to_cathode) = self.electrode_distances(point);

        TransitTimes {
            electron: transit_time(to_anode, self.electron_mobility, self.field),
            ion: transit_time(to_cathode, self.ion_mobility, self.field),
        }
    }
}
