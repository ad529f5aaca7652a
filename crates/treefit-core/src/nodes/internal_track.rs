use log::trace;
use nalgebra::{Matrix6, Vector3};

use crate::{
    constraint::{Constraint, ConstraintType},
    fit_params::FitParams,
    nodes::{DecayTree, NodeId, NodeKind},
    projection::Projection,
    status::ErrCode,
    utils::helix::{jacobian_to_cartesian_helix, wrap_phi, Helix, UncertainHelix},
    TreeFitResult,
};

/// A charged composite which lives long enough to bend in the field, such as a
/// $`\Sigma^\pm`$ or a $`\Xi^-`$.
///
/// It owns a vertex and its momentum at the production point. The helix constraint requires
/// that the helix through the production vertex with that momentum is the same helix as the
/// one through its own decay vertex with the summed momentum of its daughters.
#[derive(Clone, Debug, PartialEq)]
pub struct InternalTrack {
    /// The field (Tesla) the helix is propagated in
    pub b_field: f64,
    /// If `true` the energy is not a parameter of its own
    pub no_energy_sum: bool,
    /// Whether the vertex was seeded from two nearly collinear tracks
    pub is_conversion: bool,
}

impl InternalTrack {
    /// Create an [`InternalTrack`] in a field of strength `b_field`.
    pub fn new(b_field: f64, no_energy_sum: bool) -> Self {
        Self {
            b_field,
            no_energy_sum,
            is_conversion: false,
        }
    }
}

impl DecayTree {
    fn internal_track(&self, id: NodeId) -> Option<&InternalTrack> {
        match &self[id].kind {
            NodeKind::InternalTrack(track) => Some(track),
            _ => None,
        }
    }

    /// The decay vertex and the summed three-momentum of the daughters.
    fn decay_point(&self, id: NodeId, fit_params: &FitParams) -> (Vector3<f64>, Vector3<f64>) {
        let node = &self[id];
        let position = node
            .pos_index()
            .map_or_else(Vector3::zeros, |pos| fit_params.vector3(pos));
        let momentum = node
            .daughters
            .iter()
            .map(|&child| fit_params.vector3(self[child].mom_index()))
            .sum();
        (position, momentum)
    }

    pub(super) fn init_internal_track_with_mother(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        self.copy_mother_position(id, fit_params);
        Ok(ErrCode::empty())
    }

    pub(super) fn init_internal_track_covariance(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> ErrCode {
        let node = &self[id];
        if let Some(pos) = node.pos_index() {
            fit_params.set_variance(pos, 3, 1.0);
        }
        fit_params.set_variance(node.mom_index(), node.n_momentum(), 0.1);
        ErrCode::empty()
    }

    pub(super) fn add_internal_track_constraints(
        &self,
        id: NodeId,
        list: &mut Vec<Constraint>,
        depth: i32,
    ) {
        list.push(Constraint::new(id, ConstraintType::Helix, depth, 5).with_max_iterations(5));
        if self[id].mass_constraint {
            list.push(Constraint::new(id, ConstraintType::Mass, depth, 1).with_max_iterations(3));
        }
        for &child in &self[id].daughters {
            self.add_to_constraint_list(child, list, depth - 1);
        }
    }

    /// The helix through the production vertex with the own momentum minus the helix through
    /// the decay vertex with the daughters' momentum.
    pub(super) fn project_helix_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let node = &self[id];
        let track = self
            .internal_track(id)
            .ok_or_else(|| self.kind_mismatch(id, ConstraintType::Helix))?;
        let mother_pos = self.mother_pos_index(id)?;
        let mom = node.mom_index();
        let position_in = fit_params.vector3(mother_pos);
        let momentum_in = fit_params.vector3(mom);
        let (position_out, momentum_out) = self.decay_point(id, fit_params);

        let indices = [
            mother_pos,
            mother_pos + 1,
            mother_pos + 2,
            mom,
            mom + 1,
            mom + 2,
        ];
        let covariance =
            Matrix6::from_fn(|i, j| fit_params.covariance[(indices[i], indices[j])]);
        let input = UncertainHelix::from_cartesian(
            &position_in,
            &momentum_in,
            &covariance,
            node.charge,
            track.b_field,
        );
        let output =
            Helix::from_cartesian(&position_out, &momentum_out, node.charge, track.b_field);

        let mut residual = input.helix.to_vector() - output.to_vector();
        residual[1] = wrap_phi(residual[1]);
        projection.residual.copy_from(&residual);
        projection.v.copy_from(&input.covariance);
        let jacobian =
            jacobian_to_cartesian_helix(&position_in, &momentum_in, track.b_field, node.charge);
        projection.add_h_block(0, mother_pos, &(-jacobian.fixed_columns::<3>(0)));
        projection.add_h_block(0, mom, &(-jacobian.fixed_columns::<3>(3)));
        Ok(ErrCode::empty())
    }

    /// Replace the momentum by the momentum of the daughters' helix at the production vertex.
    pub(super) fn force_internal_track_p4_sum(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<()> {
        let Some(track) = self.internal_track(id) else {
            return Ok(());
        };
        let node = &self[id];
        let mother_pos = self.mother_pos_index(id)?;
        let (position, momentum) = self.decay_point(id, fit_params);
        let helix = Helix::from_cartesian(&position, &momentum, node.charge, track.b_field);
        let production = fit_params.vector3(mother_pos);
        let s = helix.arc_length_2d_at(production.x, production.y);
        trace!("{}: {} cm from production to decay", node.name(), -s);
        let p = helix.momentum_at_arc_length_2d(s, node.charge, track.b_field);
        fit_params.set_vector3(node.mom_index(), &p);
        Ok(())
    }
}
