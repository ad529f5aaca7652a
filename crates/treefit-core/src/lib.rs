//! # treefit-core
//!
//! This is an internal crate used by `treefit`.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// The [`FitConfig`](crate::config::FitConfig) and beam-spot description used to steer a fit.
pub mod config;
/// Constraint descriptions and their evaluation order.
pub mod constraint;
/// Access to the magnetic field the charged particles travel through.
pub mod field;
/// The global state vector and covariance matrix.
pub mod fit_params;
/// The fit orchestrator which iterates over all constraints until convergence.
pub mod fitter;
/// The linearized Kalman update applied to every constraint.
pub mod kalman;
/// The decay tree and its particle nodes.
pub mod nodes;
/// The reconstructed particle candidates which make up a decay hypothesis.
pub mod particle;
/// Residuals, covariances and Jacobians of a single constraint.
pub mod projection;
/// Accumulating status codes for numerical degeneracies.
pub mod status;
/// Utility functions, enums, and traits
pub mod utils;

pub use crate::config::{BeamSpot, FitConfig};
pub use crate::constraint::{Constraint, ConstraintType};
pub use crate::field::{ConstantField, MagneticField};
pub use crate::fit_params::FitParams;
pub use crate::fitter::{fit_all, FitStatus, FitSummary, Fitter, NodeResult};
pub use crate::nodes::{DecayTree, NodeId, NodeKind, ParticleNode};
pub use crate::particle::{Particle, PhotonMeasurement, TrackFit};
pub use crate::projection::Projection;
pub use crate::status::ErrCode;
pub use crate::utils::enums::OriginDimension;
pub use crate::utils::helix::{Helix, Poca, UncertainHelix};

/// A [`Result`] whose error is a [`TreeFitError`].
pub type TreeFitResult<T> = Result<T, TreeFitError>;

/// The error type used by all `treefit` internal methods
///
/// These errors describe invalid setups or contract violations which abort a fit attempt.
/// Numerical trouble inside an otherwise valid fit is reported through [`ErrCode`] instead.
#[derive(Error, Debug)]
pub enum TreeFitError {
    /// A constraint which needs the production vertex was evaluated on a node without a mother.
    #[error("Node {node} (PDG {pdg}) has no mother with a vertex to project onto!")]
    MissingMother {
        /// Index of the offending node in the decay tree
        node: usize,
        /// PDG code of the offending node
        pdg: i32,
    },
    /// A final-state particle carries neither a track nor a photon measurement.
    #[error("Final-state particle with PDG {pdg} carries no measurement!")]
    MissingMeasurement {
        /// PDG code of the particle without a measurement
        pdg: i32,
    },
    /// A constraint was evaluated on a node which does not support it.
    #[error("Constraint \"{constraint}\" cannot be evaluated on a node of kind \"{kind}\"!")]
    InvalidConstraint {
        /// Name of the constraint type
        constraint: String,
        /// Name of the node kind
        kind: String,
    },
    /// A lookup referred to a node which is not part of the decay tree.
    #[error("No node with index {0} exists in this decay tree!")]
    UnknownNode(usize),
    /// Results were requested from a fit which did not converge.
    #[error("The fit has not converged (status: {status})!")]
    NotConverged {
        /// The status the fit ended in
        status: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use nalgebra::{Matrix5, Vector3, Vector4};

    use crate::{
        utils::{
            helix::Helix,
            vectors::{FourMomentum, ThreeMomentum},
        },
        Particle, TrackFit,
    };

    pub(crate) const B_FIELD: f64 = 1.5;
    pub(crate) const PION_MASS: f64 = 0.13957;
    pub(crate) const MUON_MASS: f64 = 0.105658;

    /// A diagonal helix covariance with roughly Belle II-like resolutions.
    pub(crate) fn helix_covariance() -> Matrix5<f64> {
        Matrix5::from_diagonal(&nalgebra::Vector5::new(1e-4, 1e-6, 1e-10, 1e-4, 1e-6))
    }

    /// A charged final-state track which passes through `vertex` with `momentum` there.
    pub(crate) fn track(
        pdg: i32,
        charge: f64,
        mass: f64,
        vertex: Vector3<f64>,
        momentum: Vector3<f64>,
    ) -> Particle {
        let fit = TrackFit::from_cartesian(
            &vertex,
            &momentum,
            charge,
            B_FIELD,
            helix_covariance(),
        );
        Particle::track(pdg, charge, mass, fit).with_momentum(momentum.with_mass(mass))
    }

    pub(crate) fn p4(px: f64, py: f64, pz: f64, m: f64) -> Vector4<f64> {
        Vector3::new(px, py, pz).with_mass(m)
    }

    /// A K+ which flies along its helix from its production vertex to its decay into three
    /// pions.
    pub(crate) struct ChargedDecay {
        /// A neutral head particle with the K+ as its only daughter
        pub(crate) head: Particle,
        /// The true production vertex of the K+
        pub(crate) production: Vector3<f64>,
        /// The true decay vertex of the K+
        pub(crate) vertex: Vector3<f64>,
        /// The true momentum of the K+ at its production vertex
        pub(crate) momentum: Vector3<f64>,
        /// The invariant mass of the three pions
        pub(crate) three_pion_mass: f64,
    }

    /// A K+ produced near the origin which flies 5 cm before it decays. Its nominal mass is the
    /// generated three-pion mass times `mass_scale`.
    pub(crate) fn k_to_three_pi(mass_scale: f64) -> ChargedDecay {
        let production = Vector3::new(0.01, 0.02, 0.03);
        let momentum = Vector3::new(0.8, 0.3, 0.2);
        let helix = Helix::from_cartesian(&production, &momentum, 1.0, B_FIELD);
        let s = helix.arc_length_2d_at(production.x, production.y) + 5.0;
        let vertex = helix.position_at_arc_length_2d(s);
        let p_decay = helix.momentum_at_arc_length_2d(s, 1.0, B_FIELD);
        let d = Vector3::new(0.05, -0.02, 0.01);
        let e = Vector3::new(-0.03, 0.04, 0.0);
        let pion_momenta = [p_decay * 0.5 + d, p_decay * 0.3 + e, p_decay * 0.2 - d - e];
        let three_pion_mass = pion_momenta
            .iter()
            .map(|p| p.with_mass(PION_MASS))
            .sum::<Vector4<f64>>()
            .m();
        let pions = vec![
            track(211, 1.0, PION_MASS, vertex, pion_momenta[0]),
            track(211, 1.0, PION_MASS, vertex, pion_momenta[1]),
            track(-211, -1.0, PION_MASS, vertex, pion_momenta[2]),
        ];
        let kaon = Particle::composite(321, 1.0, three_pion_mass * mass_scale, pions);
        let head = Particle::composite(9010221, 0.0, 0.98, vec![kaon]).with_vertex(production);
        ChargedDecay {
            head,
            production,
            vertex,
            momentum,
            three_pion_mass,
        }
    }
}
