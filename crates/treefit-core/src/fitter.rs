use std::fmt::Display;

use log::{debug, warn};
use nalgebra::{Matrix3, Matrix4, Matrix4x3, Vector3, Vector4};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::FitConfig,
    constraint::Constraint,
    field::MagneticField,
    fit_params::FitParams,
    kalman::filter,
    nodes::{DecayTree, NodeId},
    particle::Particle,
    status::ErrCode,
    TreeFitError, TreeFitResult,
};

/// The stages of a [`Fitter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitStatus {
    /// The tree is built but the state has not been seeded.
    Uninitialized,
    /// The state is seeded from the daughters.
    Initialized,
    /// Passes over the constraints are running.
    Iterating,
    /// The chi-square stabilized.
    Converged,
    /// The fit hit a fatal condition, diverged, or ran out of iterations.
    Failed,
}

impl Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FitStatus::Uninitialized => "uninitialized",
            FitStatus::Initialized => "initialized",
            FitStatus::Iterating => "iterating",
            FitStatus::Converged => "converged",
            FitStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The outcome of [`Fitter::fit`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FitSummary {
    /// The final stage of the fit
    pub status: FitStatus,
    /// The chi-square of the last complete pass, `NaN` if the first pass already failed
    pub chi2: f64,
    /// Sum of the constraint dimensions minus the number of parameters
    pub ndf: i64,
    /// The number of passes over the constraints
    pub iterations: usize,
    /// Everything that went wrong along the way
    pub err_code: ErrCode,
}

impl FitSummary {
    /// Returns `true` if the fit converged.
    pub fn is_converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// The fitted kinematics of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeResult {
    /// The node the result belongs to
    pub id: NodeId,
    /// PDG code
    pub pdg: i32,
    /// The decay vertex, `None` for final-state particles
    pub vertex: Option<Vector3<f64>>,
    /// Covariance of [`NodeResult::vertex`]
    pub vertex_covariance: Option<Matrix3<f64>>,
    /// The four-momentum $`(p_x, p_y, p_z, E)`$
    pub momentum: Vector4<f64>,
    /// Covariance of [`NodeResult::momentum`]
    pub momentum_covariance: Matrix4<f64>,
    /// The distance between production and decay vertex along the momentum
    pub decay_length: Option<f64>,
    /// Uncertainty of [`NodeResult::decay_length`]
    pub decay_length_error: Option<f64>,
}

impl NodeResult {
    /// The invariant mass.
    pub fn mass(&self) -> f64 {
        let m2 = self.momentum[3].powi(2) - self.momentum.xyz().norm_squared();
        m2.max(0.0).sqrt()
    }

    /// The uncertainty of [`NodeResult::mass`], zero for massless particles.
    pub fn mass_error(&self) -> f64 {
        let mass = self.mass();
        if mass <= 0.0 {
            return 0.0;
        }
        let gradient = Vector4::new(
            -self.momentum[0],
            -self.momentum[1],
            -self.momentum[2],
            self.momentum[3],
        ) / mass;
        gradient
            .dot(&(self.momentum_covariance * gradient))
            .max(0.0)
            .sqrt()
    }
}

/// Fits one decay hypothesis.
///
/// The fitter seeds the state from the measurements, then repeatedly applies every constraint
/// of the tree as a Kalman update until the chi-square stabilizes.
///
/// ```
/// use nalgebra::{Matrix5, Vector3};
/// use treefit_core::{ConstantField, FitConfig, FitStatus, Fitter, Particle, TrackFit};
///
/// let vertex = Vector3::new(0.1, -0.2, 0.3);
/// let covariance = Matrix5::from_diagonal(&nalgebra::Vector5::new(1e-4, 1e-6, 1e-10, 1e-4, 1e-6));
/// let pion = |charge: f64, momentum: Vector3<f64>| {
///     let fit = TrackFit::from_cartesian(&vertex, &momentum, charge, 1.5, covariance);
///     Particle::track(211 * charge as i32, charge, 0.13957, fit)
/// };
/// let k_short = Particle::composite(
///     310,
///     0.0,
///     0.497611,
///     vec![
///         pion(1.0, Vector3::new(0.6, 0.2, 0.1)),
///         pion(-1.0, Vector3::new(0.3, -0.3, 0.2)),
///     ],
/// );
/// let mut fitter = Fitter::new(&k_short, &FitConfig::default(), &ConstantField::BELLE2).unwrap();
/// let summary = fitter.fit().unwrap();
/// assert_eq!(summary.status, FitStatus::Converged);
/// let result = fitter.head_result().unwrap();
/// assert!((result.vertex.unwrap() - vertex).norm() < 1e-3);
/// ```
#[derive(Clone, Debug)]
pub struct Fitter {
    tree: DecayTree,
    constraints: Vec<Constraint>,
    fit_params: FitParams,
    status: FitStatus,
    err_code: ErrCode,
    iterations: usize,
}

impl Fitter {
    /// Build the decay tree for `particle` and its constraint list.
    pub fn new<F: MagneticField + ?Sized>(
        particle: &Particle,
        config: &FitConfig,
        field: &F,
    ) -> TreeFitResult<Self> {
        let tree = DecayTree::new(particle, config, field)?;
        let constraints = tree.constraints();
        let mut fit_params = FitParams::new(tree.dim());
        fit_params.ndf = constraints.iter().map(|c| c.dim as i64).sum::<i64>() - tree.dim() as i64;
        Ok(Self {
            tree,
            constraints,
            fit_params,
            status: FitStatus::Uninitialized,
            err_code: ErrCode::empty(),
            iterations: 0,
        })
    }

    /// The decay tree.
    pub fn tree(&self) -> &DecayTree {
        &self.tree
    }

    /// The constraints in the order they are applied.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// The current state and covariance.
    pub fn fit_params(&self) -> &FitParams {
        &self.fit_params
    }

    /// The current stage of the fit.
    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Everything that went wrong so far.
    pub fn err_code(&self) -> ErrCode {
        self.err_code
    }

    /// Seed the state from the measurements.
    pub fn initialize(&mut self) -> TreeFitResult<ErrCode> {
        self.fit_params.state.fill(0.0);
        self.fit_params.covariance.fill(0.0);
        let root = self.tree.root();
        let status = self
            .tree
            .init_motherless_particle(root, &mut self.fit_params)?;
        self.err_code |= status;
        self.status = if status.is_fatal() {
            warn!("initialization of {} failed: {}", self.tree[root].name(), status);
            FitStatus::Failed
        } else {
            FitStatus::Initialized
        };
        Ok(status)
    }

    /// Run the fit, initializing first if needed.
    ///
    /// Each pass starts from a fresh prior: the initial variances on the first pass (or if the
    /// covariance degenerated), and the previous covariance without correlations scaled by 1000
    /// otherwise. The fit converges once the chi-square of two passes differs by less than
    /// [`FitConfig::convergence_tolerance`]. A pass whose chi-square grows by more than twice
    /// the larger of the previous chi-square and the number of degrees of freedom is undone and
    /// the fit fails as divergent, as does a chi-square which keeps growing for three passes.
    /// A pass which stops on a fatal [`ErrCode`] is undone as well, so the state and chi-square
    /// stay those of the last complete pass.
    pub fn fit(&mut self) -> TreeFitResult<FitSummary> {
        if self.status == FitStatus::Uninitialized {
            self.initialize()?;
        }
        if self.status != FitStatus::Initialized {
            return Ok(self.summary());
        }
        self.status = FitStatus::Iterating;
        let root = self.tree.root();
        let config = self.tree.config().clone();
        let ndf = self.fit_params.ndf;
        let mut previous = self.fit_params.clone();
        let mut n_increases = 0;
        let mut converged = false;
        for niter in 0..config.max_iterations {
            if niter == 0 || !self.fit_params.test_covariance() {
                self.fit_params.covariance.fill(0.0);
                self.err_code |= self.tree.init_covariance(root, &mut self.fit_params);
            } else {
                self.fit_params.reset_covariance(1000.0);
            }
            self.fit_params.chi2 = 0.0;
            self.fit_params.n_constraints = 0;
            let mut status = ErrCode::empty();
            for constraint in &self.constraints {
                status |= filter(&self.tree, constraint, &mut self.fit_params)?;
                if status.is_fatal() {
                    break;
                }
            }
            self.err_code |= status;
            self.iterations = niter + 1;
            if status.is_fatal() {
                warn!("pass {} over {} failed: {}", niter, self.tree[root].name(), status);
                self.fit_params = previous;
                if niter == 0 {
                    self.fit_params.chi2 = f64::NAN;
                }
                self.status = FitStatus::Failed;
                break;
            }
            let chi2 = self.fit_params.chi2;
            let dchi2 = chi2 - previous.chi2;
            debug!("pass {}: chi2 = {:.4}, ndf = {}, dchi2 = {:.4}", niter, chi2, ndf, dchi2);
            if niter > 0 && dchi2.abs() < config.convergence_tolerance {
                converged = true;
                break;
            }
            if niter > 1 && dchi2 > 2.0 * (ndf as f64).max(previous.chi2) {
                warn!(
                    "fit of {} diverges: chi2 {:.4} -> {:.4}",
                    self.tree[root].name(),
                    previous.chi2,
                    chi2
                );
                self.fit_params = previous;
                self.err_code |= ErrCode::DIVERGENT;
                self.status = FitStatus::Failed;
                return Ok(self.summary());
            }
            if niter > 0 && dchi2 > config.divergence_threshold {
                n_increases += 1;
            } else {
                n_increases = 0;
            }
            if n_increases >= 3 {
                warn!(
                    "fit of {} diverges slowly, chi2 = {:.4}",
                    self.tree[root].name(),
                    chi2
                );
                self.err_code |= ErrCode::SLOW_DIVERGENCE;
                self.status = FitStatus::Failed;
                break;
            }
            previous = self.fit_params.clone();
        }
        if converged {
            self.status = FitStatus::Converged;
            if config.force_p4_sum {
                self.tree.force_p4_sum(root, &mut self.fit_params)?;
            }
        } else if self.status == FitStatus::Iterating {
            warn!(
                "fit of {} did not converge within {} passes",
                self.tree[root].name(),
                config.max_iterations
            );
            self.status = FitStatus::Failed;
        }
        Ok(self.summary())
    }

    /// The current [`FitSummary`].
    pub fn summary(&self) -> FitSummary {
        FitSummary {
            status: self.status,
            chi2: self.fit_params.chi2,
            ndf: self.fit_params.ndf,
            iterations: self.iterations,
            err_code: self.err_code,
        }
    }

    /// The fitted kinematics of node `id`.
    pub fn node_result(&self, id: NodeId) -> TreeFitResult<NodeResult> {
        if self.status != FitStatus::Converged {
            return Err(TreeFitError::NotConverged {
                status: self.status.to_string(),
            });
        }
        let node = self.tree.get(id)?;
        let fit_params = &self.fit_params;
        let block3 = |index: usize| {
            Matrix3::from_fn(|i, j| fit_params.covariance[(index + i, index + j)])
        };
        let mom = node.mom_index();
        let momentum = self.tree.p4(id, fit_params);
        let momentum_covariance = if node.has_energy() {
            Matrix4::from_fn(|i, j| fit_params.covariance[(mom + i, mom + j)])
        } else {
            let p = momentum.xyz();
            let mut jacobian = Matrix4x3::zeros();
            jacobian.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
            jacobian.set_row(3, &(p / momentum[3]).transpose());
            jacobian * block3(mom) * jacobian.transpose()
        };
        let own_vertex = if node.has_position() {
            node.pos_index()
        } else {
            None
        };
        let (decay_length, decay_length_error) = match node.tau_index() {
            Some(tau) => (
                Some(fit_params.state[tau]),
                Some(fit_params.covariance[(tau, tau)].max(0.0).sqrt()),
            ),
            None => (None, None),
        };
        Ok(NodeResult {
            id,
            pdg: node.pdg,
            vertex: own_vertex.map(|pos| fit_params.vector3(pos)),
            vertex_covariance: own_vertex.map(block3),
            momentum,
            momentum_covariance,
            decay_length,
            decay_length_error,
        })
    }

    /// The fitted kinematics of the head of the tree.
    pub fn head_result(&self) -> TreeFitResult<NodeResult> {
        self.node_result(self.tree.root())
    }
}

fn fit_candidate<F: MagneticField + ?Sized>(
    candidate: &Particle,
    config: &FitConfig,
    field: &F,
) -> TreeFitResult<Fitter> {
    let mut fitter = Fitter::new(candidate, config, field)?;
    fitter.fit()?;
    Ok(fitter)
}

/// Fit independent decay hypotheses, in parallel if the `rayon` feature is enabled.
///
/// The results are in the order of `candidates`. A candidate which cannot be fitted at all
/// yields an `Err`; fits which fail numerically are returned with [`FitStatus::Failed`].
pub fn fit_all<F: MagneticField + ?Sized>(
    candidates: &[Particle],
    config: &FitConfig,
    field: &F,
) -> Vec<TreeFitResult<Fitter>> {
    #[cfg(feature = "rayon")]
    return candidates
        .par_iter()
        .map(|candidate| fit_candidate(candidate, config, field))
        .collect();
    #[cfg(not(feature = "rayon"))]
    return candidates
        .iter()
        .map(|candidate| fit_candidate(candidate, config, field))
        .collect();
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        config::BeamSpot,
        field::ConstantField,
        nodes::NodeKind,
        particle::PhotonMeasurement,
        tests::{k_to_three_pi, p4, track, PION_MASS},
        utils::vectors::FourMomentum,
    };

    const VERTEX: [f64; 3] = [0.1, -0.2, 0.3];

    fn vertex() -> Vector3<f64> {
        Vector3::from(VERTEX)
    }

    fn k_short(mass: f64) -> Particle {
        let pi_plus = track(211, 1.0, PION_MASS, vertex(), Vector3::new(0.6, 0.2, 0.1));
        let pi_minus = track(-211, -1.0, PION_MASS, vertex(), Vector3::new(0.3, -0.3, 0.2));
        Particle::composite(310, 0.0, mass, vec![pi_plus, pi_minus])
    }

    fn generated_mass() -> f64 {
        (p4(0.6, 0.2, 0.1, PION_MASS) + p4(0.3, -0.3, 0.2, PION_MASS)).m()
    }

    #[test]
    fn test_two_track_vertex() {
        let mut fitter =
            Fitter::new(&k_short(0.497611), &FitConfig::default(), &ConstantField::BELLE2)
                .unwrap();
        assert_eq!(fitter.status(), FitStatus::Uninitialized);
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        assert_eq!(summary.ndf, 1);
        assert!(summary.chi2 < 1e-3);
        assert!(summary.err_code.is_success());
        let result = fitter.head_result().unwrap();
        assert_relative_eq!(result.vertex.unwrap(), vertex(), epsilon = 1e-3);
        assert_relative_eq!(result.mass(), generated_mass(), epsilon = 1e-4);
        assert!(result.decay_length.is_none());
        let covariance = result.vertex_covariance.unwrap();
        assert!((0..3).all(|i| covariance[(i, i)] > 0.0 && covariance[(i, i)] < 1.0));
    }

    #[test]
    fn test_offset_seed() {
        let particle = k_short(0.497611).with_vertex(vertex() + Vector3::new(0.5, -0.3, 0.2));
        let mut fitter =
            Fitter::new(&particle, &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        let result = fitter.head_result().unwrap();
        assert_relative_eq!(result.vertex.unwrap(), vertex(), epsilon = 1e-3);
    }

    #[test]
    fn test_mass_constrained_fit() {
        let nominal = generated_mass() * 1.001;
        let config = FitConfig::default().with_mass_constraints(&[310]);
        let mut fitter = Fitter::new(&k_short(nominal), &config, &ConstantField::BELLE2).unwrap();
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        assert_eq!(summary.ndf, 2);
        assert!(summary.chi2 > 0.0);
        let result = fitter.head_result().unwrap();
        assert_relative_eq!(result.mass(), nominal, max_relative = 1e-4);
        assert!(result.mass_error() < 1e-4);
    }

    #[test]
    fn test_daughter_results() {
        let mut fitter =
            Fitter::new(&k_short(0.497611), &FitConfig::default(), &ConstantField::BELLE2)
                .unwrap();
        fitter.fit().unwrap();
        let head = fitter.head_result().unwrap();
        let mut sum = Vector4::zeros();
        for &child in &fitter.tree()[fitter.tree().root()].daughters {
            let result = fitter.node_result(child).unwrap();
            assert!(result.vertex.is_none());
            assert_relative_eq!(result.mass(), PION_MASS, epsilon = 1e-9);
            let covariance = result.momentum_covariance;
            assert_relative_eq!(covariance, covariance.transpose(), epsilon = 1e-12);
            sum += result.momentum;
        }
        assert_relative_eq!(head.momentum, sum, epsilon = 1e-9);
        assert!(matches!(
            fitter.node_result(NodeId(17)),
            Err(TreeFitError::UnknownNode(17))
        ));
    }

    #[test]
    fn test_results_require_convergence() {
        let fitter =
            Fitter::new(&k_short(0.497611), &FitConfig::default(), &ConstantField::BELLE2)
                .unwrap();
        assert!(matches!(
            fitter.head_result(),
            Err(TreeFitError::NotConverged { .. })
        ));
    }

    /// Two 300 MeV photons with the opening angle of a pi0 at rest in the transverse plane.
    fn pi0() -> Particle {
        let photon = |p: Vector3<f64>| {
            Particle::photon(PhotonMeasurement::new(p, Matrix3::identity() * 1e-4))
        };
        Particle::composite(
            111,
            0.0,
            0.1349768,
            vec![
                photon(Vector3::new(0.0674883, 0.0, 0.2923104)),
                photon(Vector3::new(-0.0674883, 0.0, 0.2923104)),
            ],
        )
    }

    #[test]
    fn test_bad_setup_fails() {
        let mut fitter = Fitter::new(&pi0(), &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let summary = fitter.fit().unwrap();
        assert_eq!(summary.status, FitStatus::Failed);
        assert!(summary.err_code.contains(ErrCode::BAD_SETUP));
        assert_eq!(summary.iterations, 0);
    }

    #[test]
    fn test_beam_spot_fit() {
        let beam_spot = BeamSpot::new(Vector3::new(0.0, 0.0, 0.1), Matrix3::identity() * 1e-4);
        let config = FitConfig::default()
            .with_beam_spot(beam_spot)
            .with_mass_constraints(&[111]);
        let mut fitter = Fitter::new(&pi0(), &config, &ConstantField::BELLE2).unwrap();
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        let result = fitter.head_result().unwrap();
        assert_relative_eq!(result.vertex.unwrap(), Vector3::new(0.0, 0.0, 0.1), epsilon = 1e-6);
        assert_relative_eq!(result.mass(), 0.1349768, max_relative = 1e-4);
    }

    #[test]
    fn test_failed_first_pass_has_no_chi2() {
        // a negative variance makes the residual covariance of the photon indefinite
        let photon = Particle::photon(PhotonMeasurement::new(
            Vector3::new(0.0674883, 0.0, 0.2923104),
            Matrix3::identity() * -1e-2,
        ));
        let other = Particle::photon(PhotonMeasurement::new(
            Vector3::new(-0.0674883, 0.0, 0.2923104),
            Matrix3::identity() * 1e-4,
        ));
        let pi0 = Particle::composite(111, 0.0, 0.1349768, vec![photon, other]);
        let beam_spot = BeamSpot::new(Vector3::new(0.0, 0.0, 0.1), Matrix3::identity() * 1e-4);
        let config = FitConfig::default().with_beam_spot(beam_spot);
        let mut fitter = Fitter::new(&pi0, &config, &ConstantField::BELLE2).unwrap();
        fitter.initialize().unwrap();
        let seeded = fitter.fit_params().state.clone();
        let summary = fitter.fit().unwrap();
        assert_eq!(summary.status, FitStatus::Failed);
        assert!(summary.err_code.contains(ErrCode::INVERSION_ERROR));
        assert_eq!(summary.iterations, 1);
        assert!(summary.chi2.is_nan());
        assert_eq!(fitter.fit_params().state, seeded);
        assert!(fitter.head_result().is_err());
    }

    fn internal_track_config() -> FitConfig {
        FitConfig::default().with_internal_tracks(&[321])
    }

    #[test]
    fn test_internal_track_fit() {
        let decay = k_to_three_pi(1.0);
        let mut fitter =
            Fitter::new(&decay.head, &internal_track_config(), &ConstantField::BELLE2).unwrap();
        let kaon = fitter.tree().find(321).unwrap();
        assert!(matches!(fitter.tree()[kaon].kind, NodeKind::InternalTrack(_)));
        assert!(fitter.tree()[kaon].has_energy());
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        assert!(summary.chi2 < 1e-3);
        let result = fitter.node_result(kaon).unwrap();
        assert_relative_eq!(result.vertex.unwrap(), decay.vertex, epsilon = 1e-6);
        assert_relative_eq!(result.momentum.xyz(), decay.momentum, epsilon = 1e-3);
        let head = fitter.head_result().unwrap();
        assert_relative_eq!(head.vertex.unwrap(), decay.production, epsilon = 1e-3);
    }

    #[test]
    fn test_mass_constrained_internal_track_fit() {
        let decay = k_to_three_pi(1.0);
        let config = internal_track_config().with_mass_constraints(&[321]);
        let mut fitter = Fitter::new(&decay.head, &config, &ConstantField::BELLE2).unwrap();
        let kaon = fitter.tree().find(321).unwrap();
        assert!(!fitter.tree()[kaon].has_energy());
        let summary = fitter.fit().unwrap();
        assert!(summary.is_converged());
        assert!(summary.chi2 < 1e-3);
        let result = fitter.node_result(kaon).unwrap();
        assert_relative_eq!(result.vertex.unwrap(), decay.vertex, epsilon = 1e-6);
        assert_relative_eq!(result.momentum.xyz(), decay.momentum, epsilon = 1e-3);
        assert_relative_eq!(result.mass(), decay.three_pion_mass, max_relative = 1e-9);
        let pions = fitter.tree()[kaon]
            .daughters
            .iter()
            .map(|&child| fitter.node_result(child).unwrap().momentum)
            .sum::<Vector4<f64>>();
        assert_relative_eq!(pions.m(), decay.three_pion_mass, max_relative = 1e-6);
    }

    #[test]
    fn test_fit_all() {
        let bare = Particle {
            pdg: 211,
            ..Default::default()
        };
        let candidates = vec![
            k_short(0.497611),
            Particle::composite(310, 0.0, 0.497611, vec![bare]),
            pi0(),
        ];
        let results = fit_all(&candidates, &FitConfig::default(), &ConstantField::BELLE2);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().status(), FitStatus::Converged);
        assert!(matches!(
            results[1],
            Err(TreeFitError::MissingMeasurement { pdg: 211 })
        ));
        assert_eq!(results[2].as_ref().unwrap().status(), FitStatus::Failed);
    }
}
