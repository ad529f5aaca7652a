use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::utils::enums::OriginDimension;

/// The luminous region of the collider, used to constrain the production vertex of the head of
/// the decay tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSpot {
    /// Center of the luminous region (cm)
    pub position: Vector3<f64>,
    /// Size of the luminous region as a covariance matrix (cm²)
    pub covariance: Matrix3<f64>,
}

impl BeamSpot {
    /// Create a new [`BeamSpot`].
    pub fn new(position: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        Self {
            position,
            covariance,
        }
    }
}

/// Settings which steer how a decay tree is built and fitted.
///
/// All fields have defaults, so a configuration can be deserialized from a partial description:
///
/// ```
/// use treefit_core::FitConfig;
///
/// let config: FitConfig =
///     serde_json::from_str(r#"{"mass_constraint_pdgs": [421], "max_iterations": 20}"#).unwrap();
/// assert_eq!(config.mass_constraint_pdgs, vec![421]);
/// assert_eq!(config.max_iterations, 20);
/// assert_eq!(config.convergence_tolerance, 0.01);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Absolute PDG codes of composites whose invariant mass is constrained to the nominal mass
    pub mass_constraint_pdgs: Vec<i32>,
    /// Absolute PDG codes of charged composites which are fitted with their own helix
    pub internal_track_pdgs: Vec<i32>,
    /// Give every composite its own vertex, even short-lived resonances
    pub force_fit_all: bool,
    /// Do not fit the energy of internal tracks, derive it from the nominal mass instead
    pub no_energy_sum: bool,
    /// Constrain the mass of every internal track
    pub force_mass_constraint: bool,
    /// Number of position components taken over from a mother vertex or the beam spot
    pub origin_dimension: OriginDimension,
    /// Constrain the production vertex of the head of the tree to the beam spot
    pub beam_spot: Option<BeamSpot>,
    /// Composites with a nominal $`c\tau`$ (cm) above this value get their own vertex
    pub resonance_threshold: f64,
    /// Width (GeV) of the mass constraints, zero for a hard constraint
    pub mass_constraint_width: f64,
    /// Maximum number of passes over all constraints
    pub max_iterations: usize,
    /// Absolute change of the chi-square below which the fit is converged
    pub convergence_tolerance: f64,
    /// Minimal chi-square increase which counts towards slow divergence
    pub divergence_threshold: f64,
    /// Make the momenta of composites consistent with their daughters after convergence
    pub force_p4_sum: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            mass_constraint_pdgs: Vec::default(),
            internal_track_pdgs: Vec::default(),
            force_fit_all: false,
            no_energy_sum: false,
            force_mass_constraint: false,
            origin_dimension: OriginDimension::default(),
            beam_spot: None,
            resonance_threshold: 3e-4,
            mass_constraint_width: 0.0,
            max_iterations: 10,
            convergence_tolerance: 0.01,
            divergence_threshold: 0.01,
            force_p4_sum: true,
        }
    }
}

impl FitConfig {
    /// Returns `true` if composites with the given PDG code carry a mass constraint.
    pub fn is_mass_constrained(&self, pdg: i32) -> bool {
        self.mass_constraint_pdgs.contains(&pdg.abs())
    }

    /// Returns `true` if composites with the given PDG code may be fitted as internal tracks.
    pub fn is_internal_track(&self, pdg: i32) -> bool {
        self.internal_track_pdgs.contains(&pdg.abs())
    }

    /// Set the PDG codes of mass-constrained composites.
    pub fn with_mass_constraints(mut self, pdgs: &[i32]) -> Self {
        self.mass_constraint_pdgs = pdgs.iter().map(|pdg| pdg.abs()).collect();
        self
    }

    /// Set the PDG codes of composites which are fitted as internal tracks.
    pub fn with_internal_tracks(mut self, pdgs: &[i32]) -> Self {
        self.internal_track_pdgs = pdgs.iter().map(|pdg| pdg.abs()).collect();
        self
    }

    /// Constrain the head of the tree to a beam spot.
    pub fn with_beam_spot(mut self, beam_spot: BeamSpot) -> Self {
        self.beam_spot = Some(beam_spot);
        self
    }
}
