use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Vector3};

/// The global state of a fit: one flat parameter vector for every node of the decay tree, its
/// covariance, and the chi-square accumulated in the current pass over the constraints.
///
/// Nodes address their parameters by absolute index (see
/// [`ParticleNode`](crate::nodes::ParticleNode)). Indices are not validated here, an
/// out-of-range access panics.
#[derive(Clone, Debug, PartialEq)]
pub struct FitParams {
    /// The parameters of all nodes
    pub state: DVector<f64>,
    /// Covariance of [`FitParams::state`]
    pub covariance: DMatrix<f64>,
    /// Chi-square accumulated since the last reset
    pub chi2: f64,
    /// Number of degrees of freedom of the fit
    pub ndf: i64,
    /// Number of constraint updates applied since the last reset
    pub n_constraints: usize,
}

impl FitParams {
    /// Create a zeroed state of dimension `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            state: DVector::zeros(dim),
            covariance: DMatrix::zeros(dim, dim),
            chi2: 0.0,
            ndf: 0,
            n_constraints: 0,
        }
    }

    /// The dimension of the state vector.
    pub fn dim(&self) -> usize {
        self.state.len()
    }

    /// A view of `len` parameters starting at `index`.
    pub fn par(&self, index: usize, len: usize) -> DVectorView<'_, f64> {
        self.state.rows(index, len)
    }

    /// A mutable view of `len` parameters starting at `index`.
    pub fn par_mut(&mut self, index: usize, len: usize) -> DVectorViewMut<'_, f64> {
        self.state.rows_mut(index, len)
    }

    /// The three parameters starting at `index`.
    pub fn vector3(&self, index: usize) -> Vector3<f64> {
        self.state.fixed_rows::<3>(index).into_owned()
    }

    /// Overwrite the three parameters starting at `index`.
    pub fn set_vector3(&mut self, index: usize, value: &Vector3<f64>) {
        self.state.fixed_rows_mut::<3>(index).copy_from(value);
    }

    /// Set the variance of `len` parameters starting at `index` to `value`.
    pub fn set_variance(&mut self, index: usize, len: usize, value: f64) {
        for i in index..index + len {
            self.covariance[(i, i)] = value;
        }
    }

    /// Forget all correlations and inflate the variances by `scale`, keeping the current state as
    /// a weak prior for the next pass. Also clears the chi-square.
    pub fn reset_covariance(&mut self, scale: f64) {
        let n = self.dim();
        for i in 0..n {
            for j in 0..i {
                self.covariance[(i, j)] = 0.0;
                self.covariance[(j, i)] = 0.0;
            }
            self.covariance[(i, i)] = self.covariance[(i, i)].abs() * scale;
        }
        self.chi2 = 0.0;
        self.n_constraints = 0;
    }

    /// Returns `true` if every variance is positive and finite.
    pub fn test_covariance(&self) -> bool {
        self.covariance
            .diagonal()
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }

    /// Add the chi-square contribution of one constraint update.
    pub fn add_chi2(&mut self, chi2: f64) {
        self.chi2 += chi2;
        self.n_constraints += 1;
    }
}
