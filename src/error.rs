use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::trace::ParseError;

/// Fatal problems found while building the detector configuration.
///
/// These are only ever produced during setup. Once a [`Sensor`](crate::Sensor)
/// exists, nothing on the per-step path can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required geometry or field entry was not provided.
    #[error("missing required detector parameter `{0}`")]
    Missing(&'static str),

    /// A parameter was provided but is not physically meaningful.
    #[error("invalid value for `{name}`: {value} ({reason})")]
    Invalid {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// Both a field strength and a bias voltage were given.
    #[error("specify either `field_v_per_um` or `bias_v`, not both")]
    ConflictingField,

    /// A beam energy that is not a number followed by a unit.
    #[error("invalid energy `{0}`, expected a value and a unit such as \"500 MeV\"")]
    Energy(String),

    /// The detector file is not valid TOML for this schema.
    #[error("malformed detector file: {0}")]
    Toml(String),
}

impl ConfigError {
    pub(crate) fn positive(name: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            Err(Self::Invalid {
                name,
                value,
                reason: "must be finite and positive",
            })
        }
    }

    pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(Self::Invalid {
                name,
                value,
                reason: "must be finite and not negative",
            })
        }
    }

    pub(crate) fn fraction(name: &'static str, value: f64) -> Result<f64, Self> {
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(Self::Invalid {
                name,
                value,
                reason: "must be within [0, 1]",
            })
        }
    }
}

/// Errors raised by the adapters around the core pipeline (file loading, trace
/// replay, run setup).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid step trace:\n{0}")]
    Trace(#[from] ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_zero_and_nan() {
        assert!(ConfigError::positive("x", 1.0).is_ok());
        assert!(ConfigError::positive("x", 0.0).is_err());
        assert!(ConfigError::positive("x", -2.0).is_err());
        assert!(ConfigError::positive("x", f64::NAN).is_err());
        assert!(ConfigError::positive("x", f64::INFINITY).is_err());
    }

    #[test]
    fn fraction_bounds() {
        assert!(ConfigError::fraction("eff", 0.0).is_ok());
        assert!(ConfigError::fraction("eff", 1.0).is_ok());
        assert!(ConfigError::fraction("eff", 1.01).is_err());
        assert!(ConfigError::fraction("eff", f64::NAN).is_err());
    }

    #[test]
    fn missing_message_names_parameter() {
        let err = ConfigError::Missing("cell_thickness_um");
        assert_eq!(
            err.to_string(),
            "missing required detector parameter `cell_thickness_um`"
        );
    }
}
