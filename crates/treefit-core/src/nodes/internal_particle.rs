use crate::{
    constraint::{Constraint, ConstraintType},
    fit_params::FitParams,
    nodes::{DecayTree, NodeId},
    status::ErrCode,
    TreeFitResult,
};

/// A composite with its own decay vertex, which is fitted from the daughters' trajectories.
///
/// Besides the vertex and the four-momentum, a composite with a mother carries the decay length
/// between the production and the decay vertex.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InternalParticle {
    /// Whether the vertex was seeded from two nearly collinear tracks
    pub is_conversion: bool,
}

impl DecayTree {
    pub(super) fn init_internal_particle_with_mother(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        self.copy_mother_position(id, fit_params);
        let node = &self[id];
        let (Some(pos), Some(tau_index)) = (node.pos_index(), node.tau_index()) else {
            return Ok(ErrCode::empty());
        };
        let mother_pos = self.mother_pos_index(id)?;
        let flight = fit_params.vector3(pos) - fit_params.vector3(mother_pos);
        let p = fit_params.vector3(node.mom_index());
        let p_norm = p.norm();
        fit_params.state[tau_index] = if p_norm > 0.0 {
            flight.dot(&p) / p_norm
        } else {
            0.0
        };
        Ok(ErrCode::empty())
    }

    pub(super) fn init_internal_particle_covariance(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> ErrCode {
        let node = &self[id];
        if let Some(pos) = node.pos_index() {
            fit_params.set_variance(pos, 3, 400.0);
        }
        if let Some(tau_index) = node.tau_index() {
            fit_params.set_variance(tau_index, 1, 1e4);
        }
        fit_params.set_variance(node.mom_index(), node.n_momentum(), 1e3);
        ErrCode::empty()
    }

    pub(super) fn add_internal_particle_constraints(
        &self,
        id: NodeId,
        list: &mut Vec<Constraint>,
        depth: i32,
    ) {
        let node = &self[id];
        for &child in &node.daughters {
            self.add_to_constraint_list(child, list, depth - 1);
        }
        if node.mother.is_none() && self.config.beam_spot.is_some() {
            list.push(Constraint::new(
                id,
                ConstraintType::BeamSpot,
                depth,
                self.config.origin_dimension.len(),
            ));
        }
        list.push(Constraint::new(id, ConstraintType::Kinematic, depth, 4));
        if node.tau_index().is_some() {
            list.push(Constraint::new(id, ConstraintType::Geometric, depth, 3));
        }
        if node.mass_constraint {
            list.push(Constraint::new(id, ConstraintType::Mass, depth, 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use super::*;
    use crate::{
        field::ConstantField,
        nodes::{tests::d0_to_k_pi, NodeKind},
        particle::Particle,
        tests::{track, PION_MASS},
        BeamSpot, FitConfig,
    };

    #[test]
    fn test_conversion_flag() {
        let vertex = Vector3::new(3.0, 1.0, 0.5);
        let electron = track(11, -1.0, 0.000511, vertex, Vector3::new(0.3, 0.1, 0.05));
        let positron = track(-11, 1.0, 0.000511, vertex, Vector3::new(0.15, 0.05, 0.025));
        let gamma = Particle::composite(22, 0.0, 0.0, vec![electron, positron]);
        let mut tree = DecayTree::new(&gamma, &FitConfig::default(), &ConstantField::BELLE2)
            .unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        tree.init_motherless_particle(tree.root(), &mut fit_params)
            .unwrap();
        assert!(matches!(
            tree[tree.root()].kind,
            NodeKind::InternalParticle(InternalParticle {
                is_conversion: true
            })
        ));
    }

    #[test]
    fn test_prior_covariance() {
        let pi = track(211, 1.0, PION_MASS, Vector3::zeros(), Vector3::new(-1.0, 0.2, 0.3));
        let b = Particle::composite(
            521,
            1.0,
            5.27934,
            vec![d0_to_k_pi(Vector3::new(0.1, 0.0, 0.2)), pi],
        );
        let tree = DecayTree::new(&b, &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        tree.init_covariance(tree.root(), &mut fit_params);
        let d0 = &tree[tree.find(421).unwrap()];
        let pos = d0.pos_index().unwrap();
        assert_relative_eq!(fit_params.covariance[(pos, pos)], 400.0);
        let tau = d0.tau_index().unwrap();
        assert_relative_eq!(fit_params.covariance[(tau, tau)], 1e4);
        let mom = d0.mom_index();
        assert_relative_eq!(fit_params.covariance[(mom + 3, mom + 3)], 1e3);
        assert!(fit_params.test_covariance());
    }

    #[test]
    fn test_beam_spot_constraint_on_head_only() {
        let config = FitConfig::default().with_beam_spot(BeamSpot::new(
            Vector3::zeros(),
            nalgebra::Matrix3::identity() * 1e-4,
        ));
        let pi = track(211, 1.0, PION_MASS, Vector3::zeros(), Vector3::new(-1.0, 0.2, 0.3));
        let b = Particle::composite(
            521,
            1.0,
            5.27934,
            vec![d0_to_k_pi(Vector3::new(0.1, 0.0, 0.2)), pi],
        );
        let tree = DecayTree::new(&b, &config, &ConstantField::BELLE2).unwrap();
        let beam_spots: Vec<Constraint> = tree
            .constraints()
            .into_iter()
            .filter(|c| c.kind == ConstraintType::BeamSpot)
            .collect();
        assert_eq!(beam_spots.len(), 1);
        assert_eq!(beam_spots[0].node, tree.root());
        assert_eq!(beam_spots[0].dim, 3);
    }
}
