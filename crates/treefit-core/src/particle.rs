use nalgebra::{Matrix3, Matrix5, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::utils::{helix::Helix, vectors::ThreeMomentum};

/// The PDG code of the photon.
pub const PHOTON_PDG: i32 = 22;

/// The result of a track fit: a helix with its covariance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackFit {
    /// The measured perigee parameters
    pub helix: Helix,
    /// Covariance of the perigee parameters
    pub covariance: Matrix5<f64>,
    /// The field (Tesla) the helix was measured in
    pub b_field: f64,
}

impl TrackFit {
    /// Create a [`TrackFit`] from measured helix parameters.
    pub fn new(helix: Helix, covariance: Matrix5<f64>, b_field: f64) -> Self {
        Self {
            helix,
            covariance,
            b_field,
        }
    }

    /// Create a [`TrackFit`] for a particle with the given `charge` passing through `position`
    /// with `momentum`.
    pub fn from_cartesian(
        position: &Vector3<f64>,
        momentum: &Vector3<f64>,
        charge: f64,
        b_field: f64,
        covariance: Matrix5<f64>,
    ) -> Self {
        Self::new(
            Helix::from_cartesian(position, momentum, charge, b_field),
            covariance,
            b_field,
        )
    }

    /// The momentum at the perigee.
    pub fn momentum(&self, charge: f64) -> Vector3<f64> {
        self.helix
            .momentum_at_arc_length_2d(0.0, charge, self.b_field)
    }
}

/// A photon measured by its three-momentum, usually from a calorimeter cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotonMeasurement {
    /// The measured momentum
    pub momentum: Vector3<f64>,
    /// Covariance of the measured momentum
    pub covariance: Matrix3<f64>,
}

impl PhotonMeasurement {
    /// Create a new [`PhotonMeasurement`].
    pub fn new(momentum: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        Self {
            momentum,
            covariance,
        }
    }
}

/// A reconstructed particle candidate, the input from which a decay tree is built.
///
/// Final-state particles carry a measurement (a [`TrackFit`] or a [`PhotonMeasurement`]);
/// composites carry their daughters. Pre-fit estimates of the vertex and the four-momentum are
/// used to seed the fit where available.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// The PDG code
    pub pdg: i32,
    /// Electric charge in units of the elementary charge
    pub charge: f64,
    /// Nominal mass in GeV
    pub mass: f64,
    /// Nominal lifetime $`c\tau`$ in cm
    pub lifetime: f64,
    /// Pre-fit four-momentum $`(p_x, p_y, p_z, E)`$
    pub momentum: Vector4<f64>,
    /// Pre-fit decay vertex, all zeros if the candidate was never vertexed
    pub vertex: Vector3<f64>,
    /// The decay products
    pub daughters: Vec<Particle>,
    /// The track measurement of a charged final-state particle
    pub track: Option<TrackFit>,
    /// The measurement of a final-state photon
    pub photon: Option<PhotonMeasurement>,
}

impl Particle {
    /// A final-state charged track.
    pub fn track(pdg: i32, charge: f64, mass: f64, fit: TrackFit) -> Self {
        let momentum = fit.momentum(charge).with_mass(mass);
        Self {
            pdg,
            charge,
            mass,
            momentum,
            track: Some(fit),
            ..Default::default()
        }
    }

    /// A final-state photon.
    pub fn photon(measurement: PhotonMeasurement) -> Self {
        let momentum = measurement.momentum.with_mass(0.0);
        Self {
            pdg: PHOTON_PDG,
            momentum,
            photon: Some(measurement),
            ..Default::default()
        }
    }

    /// A composite with the given daughters. The pre-fit four-momentum is the sum of the
    /// daughters' four-momenta.
    pub fn composite(pdg: i32, charge: f64, mass: f64, daughters: Vec<Particle>) -> Self {
        let momentum = daughters.iter().map(|d| d.momentum).sum();
        Self {
            pdg,
            charge,
            mass,
            momentum,
            daughters,
            ..Default::default()
        }
    }

    /// Set a pre-fit vertex estimate.
    pub fn with_vertex(mut self, vertex: Vector3<f64>) -> Self {
        self.vertex = vertex;
        self
    }

    /// Set the nominal lifetime $`c\tau`$ (cm).
    pub fn with_lifetime(mut self, lifetime: f64) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the pre-fit four-momentum.
    pub fn with_momentum(mut self, momentum: Vector4<f64>) -> Self {
        self.momentum = momentum;
        self
    }

    /// Returns `true` if the particle has no daughters.
    pub fn is_final_state(&self) -> bool {
        self.daughters.is_empty()
    }

    /// Returns `true` if a pre-fit vertex was set.
    pub fn has_vertex(&self) -> bool {
        self.vertex != Vector3::zeros()
    }

    /// The number of particles in the tree below (and including) this one.
    pub fn n_particles(&self) -> usize {
        1 + self
            .daughters
            .iter()
            .map(Particle::n_particles)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        tests::{p4, track, B_FIELD, PION_MASS},
        utils::vectors::FourMomentum,
    };

    #[test]
    fn test_track_momentum_from_helix() {
        let momentum = Vector3::new(0.4, -0.3, 0.2);
        let fit = TrackFit::from_cartesian(
            &Vector3::zeros(),
            &momentum,
            -1.0,
            B_FIELD,
            Matrix5::identity(),
        );
        let particle = Particle::track(-211, -1.0, PION_MASS, fit);
        assert_relative_eq!(particle.momentum.momentum(), momentum, epsilon = 1e-12);
        assert_relative_eq!(particle.momentum.m(), PION_MASS, epsilon = 1e-9);
        assert!(particle.is_final_state());
    }

    #[test]
    fn test_composite_sums_daughters() {
        let vertex = Vector3::new(0.1, 0.0, 0.0);
        let a = track(211, 1.0, PION_MASS, vertex, Vector3::new(0.5, 0.1, 0.0));
        let b = track(-211, -1.0, PION_MASS, vertex, Vector3::new(0.2, -0.4, 0.3));
        let sum = a.momentum + b.momentum;
        let k_short = Particle::composite(310, 0.0, 0.497611, vec![a, b]).with_lifetime(2.6844);
        assert_relative_eq!(k_short.momentum, sum);
        assert_eq!(k_short.n_particles(), 3);
        assert!(!k_short.has_vertex());
        assert!(k_short.clone().with_vertex(vertex).has_vertex());
    }

    #[test]
    fn test_photon() {
        let photon = Particle::photon(PhotonMeasurement::new(
            Vector3::new(0.3, 0.4, 0.0),
            Matrix3::identity() * 1e-4,
        ));
        assert_eq!(photon.pdg, PHOTON_PDG);
        assert_relative_eq!(photon.momentum, p4(0.3, 0.4, 0.0, 0.0));
    }
}
