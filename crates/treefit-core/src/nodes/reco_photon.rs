use crate::{
    fit_params::FitParams,
    nodes::{DecayTree, NodeId, NodeKind, MEASUREMENT_PRIOR_SCALE, MIN_PRIOR_VARIANCE},
    particle::PhotonMeasurement,
    projection::Projection,
    status::ErrCode,
};

/// A final-state neutral particle measured by the calorimeter.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoPhoton {
    /// The measured momentum and its covariance
    pub measurement: PhotonMeasurement,
}

impl RecoPhoton {
    /// Create a [`RecoPhoton`] from its measurement.
    pub fn new(measurement: PhotonMeasurement) -> Self {
        Self { measurement }
    }
}

impl DecayTree {
    fn reco_photon(&self, id: NodeId) -> Option<&RecoPhoton> {
        match &self[id].kind {
            NodeKind::RecoPhoton(photon) => Some(photon),
            _ => None,
        }
    }

    pub(super) fn init_reco_photon(&mut self, id: NodeId, fit_params: &mut FitParams) -> ErrCode {
        if let Some(photon) = self.reco_photon(id) {
            fit_params.set_vector3(self[id].mom_index(), &photon.measurement.momentum);
        }
        ErrCode::empty()
    }

    pub(super) fn init_reco_photon_covariance(
        &self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> ErrCode {
        let mom = self[id].mom_index();
        if let Some(photon) = self.reco_photon(id) {
            for i in 0..3 {
                fit_params.covariance[(mom + i, mom + i)] =
                    (MEASUREMENT_PRIOR_SCALE * photon.measurement.covariance[(i, i)])
                        .max(MIN_PRIOR_VARIANCE);
            }
        }
        ErrCode::empty()
    }

    pub(super) fn project_photon_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> ErrCode {
        let Some(photon) = self.reco_photon(id) else {
            return ErrCode::UNKNOWN_CONSTRAINT;
        };
        let mom = self[id].mom_index();
        let residual = photon.measurement.momentum - fit_params.vector3(mom);
        projection.residual.copy_from(&residual);
        projection.v.copy_from(&photon.measurement.covariance);
        projection.add_h_diagonal(0, mom, 3, 1.0);
        ErrCode::empty()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    use super::*;
    use crate::{
        constraint::{Constraint, ConstraintType},
        field::ConstantField,
        particle::Particle,
        FitConfig,
    };

    fn pi0() -> Particle {
        let photon = |p: Vector3<f64>| {
            Particle::photon(PhotonMeasurement::new(p, Matrix3::identity() * 1e-4))
        };
        Particle::composite(
            111,
            0.0,
            0.1349768,
            vec![
                photon(Vector3::new(0.2, 0.1, 0.3)),
                photon(Vector3::new(0.3, -0.1, 0.2)),
            ],
        )
        .with_vertex(Vector3::new(0.0, 0.0, 0.1))
    }

    #[test]
    fn test_photon_initialization_and_residual() {
        let mut tree =
            DecayTree::new(&pi0(), &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        let status = tree.init_motherless_particle(tree.root(), &mut fit_params)
            .unwrap();
        assert!(status.is_success());
        tree.init_covariance(tree.root(), &mut fit_params);
        let photon = tree[tree.root()].daughters[0];
        let mom = tree[photon].mom_index();
        assert_eq!(fit_params.vector3(mom), Vector3::new(0.2, 0.1, 0.3));
        assert_relative_eq!(fit_params.covariance[(mom, mom)], 0.1);

        fit_params.state[mom] += 0.01;
        let constraint = Constraint::new(photon, ConstraintType::Photon, -1, 3);
        let mut projection = Projection::new(tree.dim(), 3);
        tree.project_constraint(&constraint, &fit_params, &mut projection)
            .unwrap();
        assert_relative_eq!(projection.residual[0], -0.01, epsilon = 1e-12);
        assert_eq!(projection.h[(0, mom)], 1.0);
        assert_eq!(
            projection.v.fixed_view::<3, 3>(0, 0).into_owned(),
            Matrix3::identity() * 1e-4
        );
    }
}
