use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::TreeFitError;

/// The number of position components which are taken over from a mother vertex (or constrained
/// by a beam spot).
///
/// Some setups only know the production point in the transverse plane (for instance a beam spot
/// which is long in $`z`$), in which case only $`x`$ and $`y`$ are copied.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginDimension {
    /// Only the transverse components $`(x, y)`$.
    Transverse,
    /// All three components $`(x, y, z)`$.
    #[default]
    Full,
}

impl OriginDimension {
    /// The number of position components this corresponds to.
    pub fn len(&self) -> usize {
        match self {
            OriginDimension::Transverse => 2,
            OriginDimension::Full => 3,
        }
    }

    /// Always `false`, there is no zero-dimensional origin.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Display for OriginDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginDimension::Transverse => write!(f, "2D"),
            OriginDimension::Full => write!(f, "3D"),
        }
    }
}

impl FromStr for OriginDimension {
    type Err = TreeFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "2" | "2d" | "xy" | "transverse" => Ok(Self::Transverse),
            "3" | "3d" | "xyz" | "full" => Ok(Self::Full),
            _ => Err(TreeFitError::ParseError {
                name: s.to_string(),
                object: "OriginDimension".to_string(),
            }),
        }
    }
}

impl TryFrom<usize> for OriginDimension {
    type Error = TreeFitError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Transverse),
            3 => Ok(Self::Full),
            _ => Err(TreeFitError::ParseError {
                name: value.to_string(),
                object: "OriginDimension".to_string(),
            }),
        }
    }
}
