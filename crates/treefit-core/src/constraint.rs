use std::{cmp::Ordering, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::nodes::NodeId;

/// The kinds of constraints a decay tree is built from.
///
/// The declaration order is the order in which constraints at the same depth are applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintType {
    /// The production vertex of the head of the tree lies in the beam spot.
    BeamSpot,
    /// A final-state track is described by its measured helix.
    Track,
    /// A final-state photon is described by its measured momentum.
    Photon,
    /// Four-momentum is conserved at a decay.
    Kinematic,
    /// A particle decays on the straight line from its production vertex along its momentum.
    Geometric,
    /// The invariant mass equals the nominal mass.
    Mass,
    /// A charged composite moves on the helix defined by its production vertex and momentum.
    Helix,
}

impl ConstraintType {
    /// The number of relinearizations of the constraint within one pass.
    pub fn default_max_iterations(&self) -> usize {
        match self {
            ConstraintType::Mass => 10,
            ConstraintType::Geometric => 3,
            _ => 1,
        }
    }
}

impl Display for ConstraintType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintType::BeamSpot => "beam spot",
            ConstraintType::Track => "track",
            ConstraintType::Photon => "photon",
            ConstraintType::Kinematic => "kinematic",
            ConstraintType::Geometric => "geometric",
            ConstraintType::Mass => "mass",
            ConstraintType::Helix => "helix",
        };
        write!(f, "{}", name)
    }
}

/// One constraint of the fit, owned by a node of the decay tree.
///
/// Constraints sort by decreasing `depth` (the head of the tree has depth zero and daughters are
/// one lower than their mother) and then by [`ConstraintType`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// The node the constraint belongs to
    pub node: NodeId,
    /// What is constrained
    pub kind: ConstraintType,
    /// Position of the owner in the tree, zero at the head
    pub depth: i32,
    /// Dimension of the residual
    pub dim: usize,
    /// How often the constraint is relinearized within one pass
    pub max_iterations: usize,
}

impl Constraint {
    /// Create a [`Constraint`] with the default number of iterations for its type.
    pub fn new(node: NodeId, kind: ConstraintType, depth: i32, dim: usize) -> Self {
        Self {
            node,
            kind,
            depth,
            dim,
            max_iterations: kind.default_max_iterations(),
        }
    }

    /// Override the number of relinearizations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Returns `true` if the constraint is relinearized within a pass.
    pub fn is_nonlinear(&self) -> bool {
        self.max_iterations > 1
    }
}

impl PartialOrd for Constraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Constraint {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} constraint (node {}, depth {}, dim {})",
            self.kind, self.node, self.depth, self.dim
        )
    }
}
