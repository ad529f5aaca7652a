use log::trace;
use nalgebra::{Matrix3, Matrix3x5, Vector3};

use crate::{
    constraint::ConstraintType,
    fit_params::FitParams,
    nodes::{DecayTree, NodeId, NodeKind, MEASUREMENT_PRIOR_SCALE, MIN_PRIOR_VARIANCE},
    particle::TrackFit,
    projection::Projection,
    status::ErrCode,
    utils::helix::{jacobian_to_cartesian_helix, wrap_phi, Helix},
    TreeFitResult,
};

/// A final-state charged particle measured as a helix by the tracking.
///
/// Its only parameters are the three momentum components at the production vertex. The vertex
/// itself belongs to the mother, so the track constraint ties the helix to both.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoTrack {
    /// The measured helix and its covariance
    pub fit: TrackFit,
    /// The field (Tesla) the helix is propagated in
    pub b_field: f64,
    /// Transverse arc length from the perigee to the production vertex, once known
    pub flight_length: Option<f64>,
}

impl RecoTrack {
    /// Create a [`RecoTrack`] for `fit` in a field of strength `b_field`.
    pub fn new(fit: TrackFit, b_field: f64) -> Self {
        Self {
            fit,
            b_field,
            flight_length: None,
        }
    }

    /// The transverse momentum of the measured helix.
    pub fn transverse_momentum(&self, charge: f64) -> f64 {
        self.fit.helix.transverse_momentum(charge, self.b_field)
    }

    /// The momentum of the measured helix after a transverse arc length `s`.
    pub fn momentum_at(&self, s: f64, charge: f64) -> Vector3<f64> {
        self.fit
            .helix
            .momentum_at_arc_length_2d(s, charge, self.b_field)
    }

    /// The covariance of [`RecoTrack::momentum_at`] propagated from the helix covariance.
    pub fn momentum_covariance(&self, s: f64, charge: f64) -> Matrix3<f64> {
        let helix = &self.fit.helix;
        let p = self.momentum_at(s, charge);
        let pt = p.xy().norm();
        let omega = helix.omega;
        // columns: d0, phi0, omega, z0, tan(lambda)
        #[rustfmt::skip]
        let jacobian = Matrix3x5::new(
            0.0, -p.y, -p.x / omega + s * p.y, 0.0, 0.0,
            0.0,  p.x, -p.y / omega - s * p.x, 0.0, 0.0,
            0.0,  0.0, -p.z / omega,           0.0, pt,
        );
        jacobian * self.fit.covariance * jacobian.transpose()
    }
}

impl DecayTree {
    fn reco_track(&self, id: NodeId) -> Option<&RecoTrack> {
        match &self[id].kind {
            NodeKind::RecoTrack(track) => Some(track),
            _ => None,
        }
    }

    pub(super) fn init_reco_track(&mut self, id: NodeId, fit_params: &mut FitParams) -> ErrCode {
        let charge = self[id].charge;
        let mom = self[id].mom_index();
        if let Some(track) = self.reco_track(id) {
            let p = track.momentum_at(track.flight_length.unwrap_or(0.0), charge);
            fit_params.set_vector3(mom, &p);
        }
        ErrCode::empty()
    }

    /// Evaluate the momentum at the point of the helix closest to the (now initialized)
    /// production vertex, unless a flight length was already found while seeding the vertex.
    pub(super) fn init_reco_track_with_mother(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        let vertex = fit_params.vector3(self.mother_pos_index(id)?);
        let charge = self[id].charge;
        let mom = self[id].mom_index();
        if let NodeKind::RecoTrack(track) = &mut self.nodes[id.0].kind {
            let helix = track.fit.helix;
            let s = *track
                .flight_length
                .get_or_insert_with(|| helix.arc_length_2d_at(vertex.x, vertex.y));
            trace!("track {}: flight length {}", id, s);
            fit_params.set_vector3(mom, &track.momentum_at(s, charge));
        }
        Ok(ErrCode::empty())
    }

    pub(super) fn init_reco_track_covariance(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> ErrCode {
        let node = &self[id];
        let mom = node.mom_index();
        if let Some(track) = self.reco_track(id) {
            let covariance =
                track.momentum_covariance(track.flight_length.unwrap_or(0.0), node.charge);
            for i in 0..3 {
                fit_params.covariance[(mom + i, mom + i)] =
                    (MEASUREMENT_PRIOR_SCALE * covariance[(i, i)]).max(MIN_PRIOR_VARIANCE);
            }
        }
        ErrCode::empty()
    }

    /// The measured helix minus the helix through the mother vertex with this momentum.
    pub(super) fn project_track_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let node = &self[id];
        let track = self
            .reco_track(id)
            .ok_or_else(|| self.kind_mismatch(id, ConstraintType::Track))?;
        let mother_pos = self.mother_pos_index(id)?;
        let mom = node.mom_index();
        let x = fit_params.vector3(mother_pos);
        let p = fit_params.vector3(mom);
        let predicted = Helix::from_cartesian(&x, &p, node.charge, track.b_field);
        let mut residual = track.fit.helix.to_vector() - predicted.to_vector();
        residual[1] = wrap_phi(residual[1]);
        projection.residual.copy_from(&residual);
        projection.v.copy_from(&track.fit.covariance);
        let jacobian = jacobian_to_cartesian_helix(&x, &p, track.b_field, node.charge);
        projection.add_h_block(0, mother_pos, &jacobian.fixed_columns::<3>(0));
        projection.add_h_block(0, mom, &jacobian.fixed_columns::<3>(3));
        Ok(ErrCode::empty())
    }
}
