use nalgebra::{DMatrix, DVector, Dim, Matrix, RawStorage};

/// The linearization of one constraint at the current state.
///
/// The residual is `measurement - prediction` and `h` holds the derivatives of the prediction
/// with respect to the full state, so a change `dx` of the state changes the residual by
/// `-h * dx`. Only the columns of the parameters a constraint depends on are nonzero.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// The residual vector
    pub residual: DVector<f64>,
    /// Covariance of the residual's measurement part
    pub v: DMatrix<f64>,
    /// Jacobian of the prediction with respect to the state
    pub h: DMatrix<f64>,
}

impl Projection {
    /// A zeroed [`Projection`] of a `dim`-dimensional constraint on a state of dimension
    /// `state_dim`.
    pub fn new(state_dim: usize, dim: usize) -> Self {
        Self {
            residual: DVector::zeros(dim),
            v: DMatrix::zeros(dim, dim),
            h: DMatrix::zeros(dim, state_dim),
        }
    }

    /// Zero all entries.
    pub fn reset(&mut self) {
        self.residual.fill(0.0);
        self.v.fill(0.0);
        self.h.fill(0.0);
    }

    /// The dimension of the residual.
    pub fn dim(&self) -> usize {
        self.residual.len()
    }

    /// The dimension of the state.
    pub fn state_dim(&self) -> usize {
        self.h.ncols()
    }

    /// Add `block` into the Jacobian with its top-left corner at `(row, col)`.
    pub fn add_h_block<R: Dim, C: Dim, S: RawStorage<f64, R, C>>(
        &mut self,
        row: usize,
        col: usize,
        block: &Matrix<f64, R, C, S>,
    ) {
        let (nrows, ncols) = block.shape();
        for i in 0..nrows {
            for j in 0..ncols {
                self.h[(row + i, col + j)] += block[(i, j)];
            }
        }
    }

    /// Add `value` to the diagonal of the Jacobian block of `len` rows starting at `(row, col)`.
    pub fn add_h_diagonal(&mut self, row: usize, col: usize, len: usize, value: f64) {
        for i in 0..len {
            self.h[(row + i, col + i)] += value;
        }
    }
}
