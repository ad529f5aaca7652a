use crate::{
    constraint::{Constraint, ConstraintType},
    fit_params::FitParams,
    nodes::{DecayTree, NodeId},
    status::ErrCode,
    TreeFitResult,
};

// A resonance decays where it is produced: it owns a four-momentum only and its daughters are
// attached to the vertex of its mother.
impl DecayTree {
    pub(super) fn init_resonance(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        let mut status = ErrCode::empty();
        for child in self[id].daughters.clone() {
            status |= self.init_motherless_particle(child, fit_params)?;
        }
        status |= self.init_momentum(id, fit_params);
        Ok(status)
    }

    pub(super) fn init_resonance_with_mother(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        let mut status = ErrCode::empty();
        for child in self[id].daughters.clone() {
            status |= self.init_particle_with_mother(child, fit_params)?;
        }
        status |= self.init_momentum(id, fit_params);
        Ok(status)
    }

    pub(super) fn init_resonance_covariance(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> ErrCode {
        let node = &self[id];
        fit_params.set_variance(node.mom_index(), node.n_momentum(), 1e3);
        ErrCode::empty()
    }

    pub(super) fn add_resonance_constraints(
        &self,
        id: NodeId,
        list: &mut Vec<Constraint>,
        depth: i32,
    ) {
        let node = &self[id];
        for &child in &node.daughters {
            self.add_to_constraint_list(child, list, depth - 1);
        }
        list.push(Constraint::new(id, ConstraintType::Kinematic, depth, 4));
        if node.mass_constraint {
            list.push(Constraint::new(id, ConstraintType::Mass, depth, 1));
        }
    }
}
