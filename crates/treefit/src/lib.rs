//! `treefit` is a global fitter for particle decay chains. Given a decay hypothesis, for instance
//! $`B^- \to D^0(\to K^-\pi^+)\,\rho^-(\to\pi^-\pi^0)`$, it estimates every vertex, decay length
//! and momentum in the chain at once, by treating all of them as one state vector and applying
//! the physical constraints of the decay (measured tracks and photons, four-momentum
//! conservation, straight-line flight between vertices, nominal masses) as a sequence of Kalman
//! updates.
//!
//! <div class="warning">
//!
//! This crate is still in an early development phase, and the API is not stable. It can (and likely will) be subject to breaking changes before the 1.0.0 version release.
//!
//! </div>
//!
//! # Table of Contents
//! - [Key Features](#key-features)
//! - [Installation](#installation)
//! - [Quick Start](#quick-start)
//!   - [Describing a Decay](#describing-a-decay)
//!   - [Fitting](#fitting)
//! - [Conventions](#conventions)
//! - [How the Fit Works](#how-the-fit-works)
//!
//! # Key Features
//! * A single [`Fitter`] which fits any decay tree built from [`Particle`]s.
//! * Charged tracks enter through their measured helix and its covariance, photons through their
//!   measured momentum.
//! * Composites are fitted with their own vertex, as short-lived resonances decaying at their
//!   production point, or as charged "internal tracks" which curve in the magnetic field between
//!   their production and decay vertices.
//! * Optional mass constraints, beam-spot constraints and a two-dimensional beam spot for
//!   displaced tracks.
//! * Fitting many candidates in parallel with [`rayon`](https://github.com/rayon-rs/rayon) via
//!   [`fit_all`].
//!
//! # Installation
//! `treefit` can be added to a Rust project with `cargo`:
//! ```shell
//! cargo add treefit
//! ```
//!
//! # Quick Start
//! ## Describing a Decay
//! A decay hypothesis is a tree of [`Particle`]s. Final-state charged particles carry a
//! [`TrackFit`], final-state photons a [`PhotonMeasurement`], and composites carry their
//! daughters along with their nominal mass and lifetime:
//! ```rust
//! use nalgebra::{Matrix5, Vector3, Vector5};
//! use treefit::{Particle, TrackFit};
//!
//! let b_field = 1.5;
//! let covariance = Matrix5::from_diagonal(&Vector5::new(1e-4, 1e-6, 1e-10, 1e-4, 1e-6));
//! let vertex = Vector3::new(0.1, -0.2, 0.3);
//! let k_minus = TrackFit::from_cartesian(&vertex, &Vector3::new(0.9, 0.3, 0.4), -1.0, b_field, covariance);
//! let pi_plus = TrackFit::from_cartesian(&vertex, &Vector3::new(-0.2, 0.7, 0.1), 1.0, b_field, covariance);
//! let d0 = Particle::composite(
//!     421,
//!     0.0,
//!     1.86484,
//!     vec![
//!         Particle::track(-321, -1.0, 0.493677, k_minus),
//!         Particle::track(211, 1.0, 0.13957, pi_plus),
//!     ],
//! )
//! .with_lifetime(0.0123);
//! assert_eq!(d0.n_particles(), 3);
//! ```
//!
//! ## Fitting
//! A [`Fitter`] builds the tree once and runs the iteration. Results are available per node once
//! the fit converged:
//! ```rust
//! # use nalgebra::{Matrix5, Vector3, Vector5};
//! # use treefit::{Particle, TrackFit};
//! # let b_field = 1.5;
//! # let covariance = Matrix5::from_diagonal(&Vector5::new(1e-4, 1e-6, 1e-10, 1e-4, 1e-6));
//! # let vertex = Vector3::new(0.1, -0.2, 0.3);
//! # let k_minus = TrackFit::from_cartesian(&vertex, &Vector3::new(0.9, 0.3, 0.4), -1.0, b_field, covariance);
//! # let pi_plus = TrackFit::from_cartesian(&vertex, &Vector3::new(-0.2, 0.7, 0.1), 1.0, b_field, covariance);
//! # let d0 = Particle::composite(
//! #     421,
//! #     0.0,
//! #     1.86484,
//! #     vec![
//! #         Particle::track(-321, -1.0, 0.493677, k_minus),
//! #         Particle::track(211, 1.0, 0.13957, pi_plus),
//! #     ],
//! # );
//! use treefit::{ConstantField, FitConfig, Fitter};
//!
//! let config = FitConfig::default();
//! let mut fitter = Fitter::new(&d0, &config, &ConstantField(b_field)).unwrap();
//! let summary = fitter.fit().unwrap();
//! assert!(summary.is_converged());
//! let d0_result = fitter.head_result().unwrap();
//! assert!((d0_result.vertex.unwrap() - vertex).norm() < 1e-3);
//! ```
//! The [`FitConfig`] is deserializable, so it can just as well be read from a file:
//! ```rust
//! use treefit::FitConfig;
//!
//! let config: FitConfig = serde_json::from_str(r#"{"mass_constraint_pdgs": [111, 310]}"#).unwrap();
//! assert!(config.is_mass_constrained(-310));
//! ```
//!
//! # Conventions
//! * Lengths are in centimeters, momenta and masses in GeV, and magnetic fields in Tesla.
//! * Helices use the perigee parameters $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$ with
//!   respect to the origin, where $`\omega`$ is the signed curvature.
//! * Lifetimes are given as $`c\tau`$ in centimeters and only decide whether a composite gets its
//!   own vertex.
//!
//! # How the Fit Works
//! The tree assigns every node a block of the state: a vertex and a decay length for composites
//! which fly, and a three- or four-momentum for everything. The state is seeded bottom up, with
//! vertices taken from the point of closest approach of the two hardest tracks. Each pass of the
//! fit then applies all constraints, from the head of the tree down to the final-state
//! particles, as linearized Kalman updates, and the passes are repeated until the total
//! chi-square stops changing.
#![warn(clippy::perf, clippy::style, missing_docs)]

/// The decay tree and its nodes.
pub mod nodes {
    pub use treefit_core::nodes::*;
}
/// Constraints and their evaluation order.
pub mod constraints {
    pub use treefit_core::constraint::*;
    pub use treefit_core::projection::Projection;
}
/// Helix arithmetic, enums, and four-vector helpers.
pub mod utils {
    pub use treefit_core::utils::*;
}
/// The linearized Kalman update.
pub mod kalman {
    pub use treefit_core::kalman::*;
}

pub use treefit_core::config::{BeamSpot, FitConfig};
pub use treefit_core::field::{ConstantField, MagneticField};
pub use treefit_core::fit_params::FitParams;
pub use treefit_core::fitter::{fit_all, FitStatus, FitSummary, Fitter, NodeResult};
pub use treefit_core::nodes::{DecayTree, NodeId, NodeKind};
pub use treefit_core::particle::{Particle, PhotonMeasurement, TrackFit};
pub use treefit_core::status::ErrCode;
pub use treefit_core::utils::enums::OriginDimension;
pub use treefit_core::utils::helix::{Helix, UncertainHelix};
pub use treefit_core::{TreeFitError, TreeFitResult};
