use std::fmt::Display;

bitflags::bitflags! {
    /// A set of numerical conditions raised while initializing or fitting a decay tree.
    ///
    /// Codes from the recursive tree walks and from every constraint update are combined with
    /// `|`, so the empty set means success.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrCode: u32 {
        /// The point of closest approach of two helices could not be determined.
        const POCA_FAILURE = 1 << 0;
        /// The tree has too few geometric constraints to determine a vertex.
        const BAD_SETUP = 1 << 1;
        /// A residual covariance matrix was not positive definite.
        const INVERSION_ERROR = 1 << 2;
        /// The chi-square grew much faster than the number of degrees of freedom allows.
        const DIVERGENT = 1 << 3;
        /// The chi-square increased over several consecutive iterations.
        const SLOW_DIVERGENCE = 1 << 4;
        /// A constraint was requested which the node does not know how to project.
        const UNKNOWN_CONSTRAINT = 1 << 5;
    }
}

impl ErrCode {
    /// Codes after which the state vector cannot be trusted.
    pub const FATAL: ErrCode = ErrCode::BAD_SETUP
        .union(ErrCode::INVERSION_ERROR)
        .union(ErrCode::DIVERGENT);

    /// Returns `true` if no condition was raised.
    pub fn is_success(&self) -> bool {
        self.is_empty()
    }

    /// Returns `true` if any condition in [`ErrCode::FATAL`] was raised.
    pub fn is_fatal(&self) -> bool {
        self.intersects(Self::FATAL)
    }
}

impl Display for ErrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "success");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join(" | "))
    }
}
