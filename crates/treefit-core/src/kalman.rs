use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::{
    constraint::Constraint, fit_params::FitParams, nodes::DecayTree, projection::Projection,
    status::ErrCode, TreeFitResult,
};

/// The change of the linearized residual below which a nonlinear constraint is not
/// relinearized again.
pub const RELINEARIZATION_TOLERANCE: f64 = 1e-8;

/// The gain of one Kalman update, computed from a linearized constraint and the covariance of
/// the state before the update.
///
/// With the residual $`r`$, the Jacobian $`H`$ of the prediction, the measurement covariance
/// $`V`$ and the prior covariance $`C`$, the update is
/// ```math
/// R = V + H C H^T,\quad K = C H^T R^{-1},\quad x \to x + K r,\quad C \to C - K H C
/// ```
/// and the constraint contributes $`r^T R^{-1} r`$ to the chi-square.
#[derive(Clone, Debug)]
pub struct KalmanCalculator {
    residual: DVector<f64>,
    r_inverse: DMatrix<f64>,
    hc: DMatrix<f64>,
    gain: DMatrix<f64>,
}

impl KalmanCalculator {
    /// Compute the gain for `residual` given the Jacobian and measurement covariance of
    /// `projection` and the prior `covariance` of the state.
    ///
    /// Fails with [`ErrCode::INVERSION_ERROR`] if the residual covariance is not positive
    /// definite.
    pub fn new(
        residual: DVector<f64>,
        projection: &Projection,
        covariance: &DMatrix<f64>,
    ) -> Result<Self, ErrCode> {
        let hc = &projection.h * covariance;
        let r = &projection.v + &hc * projection.h.transpose();
        let r_inverse = r
            .cholesky()
            .ok_or(ErrCode::INVERSION_ERROR)?
            .inverse();
        let gain = hc.transpose() * &r_inverse;
        Ok(Self {
            residual,
            r_inverse,
            hc,
            gain,
        })
    }

    /// The shift $`K r`$ of the state.
    pub fn state_update(&self) -> DVector<f64> {
        &self.gain * &self.residual
    }

    /// The chi-square $`r^T R^{-1} r`$ of the residual.
    pub fn chi2(&self) -> f64 {
        self.residual.dot(&(&self.r_inverse * &self.residual))
    }

    /// Replace `covariance` by $`C - K H C`$, symmetrized.
    pub fn update_covariance(&self, covariance: &mut DMatrix<f64>) {
        let updated = &*covariance - &self.gain * &self.hc;
        *covariance = (&updated + updated.transpose()) * 0.5;
    }
}

/// Apply `constraint` to the state.
///
/// The constraint is projected at the current state and the Kalman update is computed with
/// respect to the state before this call. Nonlinear constraints are relinearized at the updated
/// state up to [`Constraint::max_iterations`] times, until the linearized residual stops
/// changing. The covariance and the chi-square are updated once, with the last gain.
///
/// On a failed inversion the state is restored and [`ErrCode::INVERSION_ERROR`] is returned.
/// Constraints the node cannot evaluate are skipped with [`ErrCode::UNKNOWN_CONSTRAINT`].
pub fn filter(
    tree: &DecayTree,
    constraint: &Constraint,
    fit_params: &mut FitParams,
) -> TreeFitResult<ErrCode> {
    let reference = fit_params.state.clone();
    let mut projection = Projection::new(fit_params.dim(), constraint.dim);
    let mut status = ErrCode::empty();
    let mut calculator: Option<KalmanCalculator> = None;
    let max_iterations = if constraint.is_nonlinear() {
        constraint.max_iterations
    } else {
        1
    };
    for iteration in 0..max_iterations {
        projection.reset();
        status |= tree.project_constraint(constraint, fit_params, &mut projection)?;
        if status.contains(ErrCode::UNKNOWN_CONSTRAINT) {
            return Ok(status);
        }
        let residual = &projection.residual + &projection.h * (&fit_params.state - &reference);
        let converged = calculator
            .as_ref()
            .is_some_and(|previous| (&previous.residual - &residual).amax() < RELINEARIZATION_TOLERANCE);
        let kalman = match KalmanCalculator::new(residual, &projection, &fit_params.covariance) {
            Ok(kalman) => kalman,
            Err(code) => {
                fit_params.state.copy_from(&reference);
                return Ok(status | code);
            }
        };
        fit_params.state = &reference + kalman.state_update();
        trace!(
            "{}: iteration {}, chi2 {:.4}",
            constraint,
            iteration,
            kalman.chi2()
        );
        calculator = Some(kalman);
        if converged {
            break;
        }
    }
    if let Some(kalman) = calculator {
        kalman.update_covariance(&mut fit_params.covariance);
        fit_params.add_chi2(kalman.chi2());
    }
    Ok(status)
}
