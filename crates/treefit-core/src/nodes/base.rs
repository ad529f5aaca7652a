use log::{debug, warn};
use nalgebra::{Matrix3, Vector3, Vector4};

use crate::{
    constraint::ConstraintType,
    fit_params::FitParams,
    nodes::{DecayTree, NodeId, NodeKind},
    projection::Projection,
    status::ErrCode,
    utils::{
        helix::{helix_poca, Helix},
        vectors::{FourMomentum, ThreeMomentum},
    },
    TreeFitError, TreeFitResult,
};

impl DecayTree {
    pub(super) fn kind_mismatch(&self, id: NodeId, what: ConstraintType) -> TreeFitError {
        TreeFitError::InvalidConstraint {
            constraint: what.to_string(),
            kind: self[id].kind.name().to_string(),
        }
    }

    /// The four-momentum of daughter `id`, with the on-shell energy for daughters without an
    /// energy parameter.
    pub fn p4(&self, id: NodeId, fit_params: &FitParams) -> Vector4<f64> {
        let node = &self[id];
        let mom = node.mom_index();
        let p = fit_params.vector3(mom);
        if node.has_energy() {
            p.with_energy(fit_params.state[mom + 3])
        } else {
            p.with_mass(node.mass)
        }
    }

    /// The sum of the four-momenta of the daughters of `id`.
    pub fn daughters_p4(&self, id: NodeId, fit_params: &FitParams) -> Vector4<f64> {
        self[id]
            .daughters
            .iter()
            .map(|&child| self.p4(child, fit_params))
            .sum()
    }

    /// Collect the daughters which are produced at the vertex of `id`, looking through
    /// resonances which decay there as well.
    pub fn collect_vertex_daughters(&self, id: NodeId, pos_index: usize, out: &mut Vec<NodeId>) {
        for &child in &self[id].daughters {
            out.push(child);
            if matches!(self[child].kind, NodeKind::Resonance)
                && self[child].pos_index() == Some(pos_index)
            {
                self.collect_vertex_daughters(child, pos_index, out);
            }
        }
    }

    /// Copy the first `origin_dimension` components of the mother vertex into the vertex of
    /// `id` if the latter is still exactly at the origin.
    pub(super) fn copy_mother_position(&self, id: NodeId, fit_params: &mut FitParams) {
        let node = &self[id];
        let (Some(pos), Some(mother_pos)) = (
            node.pos_index(),
            node.mother.and_then(|mother| self[mother].pos_index()),
        ) else {
            return;
        };
        if fit_params.vector3(pos) == Vector3::zeros() {
            for i in 0..self.config.origin_dimension.len() {
                fit_params.state[pos + i] = fit_params.state[mother_pos + i];
            }
        }
    }

    /// The common initialization of composites which own a vertex.
    pub(super) fn init_vertexed_composite(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        let pos = self[id].pos_index().ok_or_else(|| {
            TreeFitError::Custom(format!("{} has no vertex to initialize", self[id].name()))
        })?;
        let mut status = ErrCode::empty();
        fit_params.set_vector3(pos, &Vector3::zeros());
        for child in self[id].daughters.clone() {
            status |= self.init_motherless_particle(child, fit_params)?;
        }
        if let Some(seed) = self[id].vertex_seed {
            debug!("{}: using existing vertex {:?}", self[id].name(), seed);
            fit_params.set_vector3(pos, &seed);
        } else {
            status |= self.seed_vertex(id, pos, fit_params);
        }
        for child in self[id].daughters.clone() {
            status |= self.init_particle_with_mother(child, fit_params)?;
        }
        status |= self.init_momentum(id, fit_params);
        Ok(status)
    }

    /// Estimate the vertex of `id` from its daughters, its mother or the beam spot.
    fn seed_vertex(&mut self, id: NodeId, pos: usize, fit_params: &mut FitParams) -> ErrCode {
        let mut status = ErrCode::empty();
        let mut vertex_daughters = Vec::new();
        self.collect_vertex_daughters(id, pos, &mut vertex_daughters);
        let mut tracks: Vec<(NodeId, Helix, f64)> = vertex_daughters
            .iter()
            .filter_map(|&child| match &self[child].kind {
                NodeKind::RecoTrack(track) => Some((
                    child,
                    track.fit.helix,
                    track.transverse_momentum(self[child].charge),
                )),
                _ => None,
            })
            .collect();
        if tracks.len() >= 2 {
            tracks.sort_by(|a, b| b.2.total_cmp(&a.2));
            let (first, second) = (&tracks[0], &tracks[1]);
            let poca = helix_poca(&first.1, &second.1);
            if poca.point.iter().all(|x| x.is_finite()) {
                debug!(
                    "{}: vertex seeded at {:?} from the tracks of nodes {} and {}",
                    self[id].name(),
                    poca.point,
                    first.0,
                    second.0
                );
                fit_params.set_vector3(pos, &poca.point);
                let (first, second) = (first.0, second.0);
                self.set_flight_length(first, poca.flight_length_a);
                self.set_flight_length(second, poca.flight_length_b);
                match &mut self.nodes[id.0].kind {
                    NodeKind::InternalParticle(particle) => {
                        particle.is_conversion = poca.is_conversion
                    }
                    NodeKind::InternalTrack(track) => track.is_conversion = poca.is_conversion,
                    _ => {}
                }
                return status;
            }
            warn!(
                "{}: no point of closest approach between the two leading tracks",
                self[id].name()
            );
            status |= ErrCode::POCA_FAILURE;
        } else if let Some(point) = self.line_seed(id, &vertex_daughters, fit_params) {
            debug!(
                "{}: vertex seeded at {:?} from straight-line daughter trajectories",
                self[id].name(),
                point
            );
            fit_params.set_vector3(pos, &point);
            return status;
        }
        let mother_pos = self[id]
            .mother
            .and_then(|mother| self[mother].pos_index());
        if let Some(mother_pos) = mother_pos {
            for i in 0..self.config.origin_dimension.len() {
                fit_params.state[pos + i] = fit_params.state[mother_pos + i];
            }
        } else if let Some(beam_spot) = &self.config.beam_spot {
            debug!("{}: vertex seeded at the beam spot", self[id].name());
            fit_params.set_vector3(pos, &beam_spot.position);
        } else {
            warn!(
                "{}: not enough geometric constraints to fit this decay tree, consider adding a beam spot",
                self[id].name()
            );
            status |= ErrCode::BAD_SETUP;
        }
        status
    }

    /// Approximate every track and every daughter with an initialized vertex by a straight line
    /// and return the midpoint of the closest pair of lines.
    ///
    /// Only composites fitted as [`NodeKind::InternalParticle`] are seeded this way.
    fn line_seed(
        &self,
        id: NodeId,
        vertex_daughters: &[NodeId],
        fit_params: &FitParams,
    ) -> Option<Vector3<f64>> {
        if !matches!(self[id].kind, NodeKind::InternalParticle(_)) {
            return None;
        }
        let lines: Vec<(Vector3<f64>, Vector3<f64>)> = vertex_daughters
            .iter()
            .filter_map(|&child| {
                let daughter = &self[child];
                match &daughter.kind {
                    NodeKind::RecoTrack(track) => {
                        let s = track.flight_length.unwrap_or(0.0);
                        Some((
                            track.fit.helix.position_at_arc_length_2d(s),
                            track.momentum_at(s, daughter.charge),
                        ))
                    }
                    NodeKind::InternalParticle(_) | NodeKind::InternalTrack(_) => {
                        let vertex = fit_params.vector3(daughter.pos_index()?);
                        // a vertex still at the origin was never seeded
                        if vertex == Vector3::zeros() {
                            return None;
                        }
                        Some((vertex, fit_params.vector3(daughter.mom_index())))
                    }
                    _ => None,
                }
            })
            .collect();
        let mut best: Option<(f64, Vector3<f64>)> = None;
        for (i, a) in lines.iter().enumerate() {
            for b in &lines[..i] {
                if let Some((doca, point)) = line_poca(a, b) {
                    let closer = match best {
                        Some((best_doca, _)) => doca < best_doca,
                        None => true,
                    };
                    if closer {
                        best = Some((doca, point));
                    }
                }
            }
        }
        best.map(|(_, point)| point)
    }

    fn set_flight_length(&mut self, id: NodeId, flight_length: f64) {
        if let NodeKind::RecoTrack(track) = &mut self.nodes[id.0].kind {
            track.flight_length = Some(flight_length);
        }
    }

    /// Projections which do not depend on the kind of node.
    pub(super) fn project_base_constraint(
        &self,
        id: NodeId,
        kind: ConstraintType,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        match kind {
            ConstraintType::BeamSpot => self.project_beam_spot_constraint(id, fit_params, projection),
            ConstraintType::Kinematic => self.project_kinematic_constraint(id, fit_params, projection),
            ConstraintType::Geometric => self.project_geometric_constraint(id, fit_params, projection),
            ConstraintType::Mass => self.project_mass_constraint(id, fit_params, projection),
            ConstraintType::Track | ConstraintType::Photon | ConstraintType::Helix => {
                warn!("{}: cannot project a {} constraint", self[id].name(), kind);
                Ok(ErrCode::UNKNOWN_CONSTRAINT)
            }
        }
    }

    /// `beam - x` over the first `origin_dimension` components of the vertex.
    fn project_beam_spot_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let (Some(beam_spot), Some(pos)) = (&self.config.beam_spot, self[id].pos_index()) else {
            return Err(self.kind_mismatch(id, ConstraintType::BeamSpot));
        };
        let n = self.config.origin_dimension.len();
        for i in 0..n {
            projection.residual[i] = beam_spot.position[i] - fit_params.state[pos + i];
            projection.h[(i, pos + i)] = 1.0;
            for j in 0..n {
                projection.v[(i, j)] = beam_spot.covariance[(i, j)];
            }
        }
        Ok(ErrCode::empty())
    }

    /// `p4 - sum(p4 of daughters)`.
    fn project_kinematic_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let node = &self[id];
        if !node.has_energy() || node.daughters.is_empty() {
            return Err(self.kind_mismatch(id, ConstraintType::Kinematic));
        }
        let mom = node.mom_index();
        let own = fit_params.par(mom, 4);
        let sum = self.daughters_p4(id, fit_params);
        for i in 0..4 {
            projection.residual[i] = own[i] - sum[i];
        }
        projection.add_h_diagonal(0, mom, 4, -1.0);
        for &child in &node.daughters {
            let daughter = &self[child];
            let child_mom = daughter.mom_index();
            if daughter.has_energy() {
                projection.add_h_diagonal(0, child_mom, 4, 1.0);
            } else {
                let p = fit_params.vector3(child_mom);
                let energy = p.energy(daughter.mass);
                projection.add_h_diagonal(0, child_mom, 3, 1.0);
                for j in 0..3 {
                    projection.h[(3, child_mom + j)] += p[j] / energy;
                }
            }
        }
        Ok(ErrCode::empty())
    }

    /// `x_mother + tau * p / |p| - x`.
    fn project_geometric_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let node = &self[id];
        let (Some(pos), Some(tau_index)) = (node.pos_index(), node.tau_index()) else {
            return Err(self.kind_mismatch(id, ConstraintType::Geometric));
        };
        let mother_pos = self.mother_pos_index(id)?;
        let mom = node.mom_index();
        let x_mother = fit_params.vector3(mother_pos);
        let x = fit_params.vector3(pos);
        let tau = fit_params.state[tau_index];
        let p = fit_params.vector3(mom);
        let p_norm = p.norm();
        let direction = if p_norm > 0.0 {
            p / p_norm
        } else {
            Vector3::zeros()
        };
        let residual = x_mother + direction * tau - x;
        projection.residual.copy_from(&residual);
        projection.add_h_diagonal(0, mother_pos, 3, -1.0);
        projection.add_h_diagonal(0, pos, 3, 1.0);
        projection.add_h_block(0, tau_index, &(-direction));
        if p_norm > 0.0 {
            let d_direction = (Matrix3::identity() - direction * direction.transpose()) / p_norm;
            projection.add_h_block(0, mom, &(d_direction * (-tau)));
        }
        Ok(ErrCode::empty())
    }

    /// `m_nominal^2 - m^2`, using the daughters' momenta if the node has no energy parameter.
    fn project_mass_constraint(
        &self,
        id: NodeId,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let node = &self[id];
        let width_term = 2.0 * node.mass * self.config.mass_constraint_width;
        projection.v[(0, 0)] = width_term * width_term;
        if node.has_energy() {
            let mom = node.mom_index();
            let p4 = self.p4(id, fit_params);
            projection.residual[0] = node.mass * node.mass - p4.m2();
            for j in 0..3 {
                projection.h[(0, mom + j)] = -2.0 * p4[j];
            }
            projection.h[(0, mom + 3)] = 2.0 * p4.e();
            return Ok(ErrCode::empty());
        }
        if node.daughters.is_empty() {
            return Err(self.kind_mismatch(id, ConstraintType::Mass));
        }
        let total = self.daughters_p4(id, fit_params);
        projection.residual[0] = node.mass * node.mass - total.m2();
        for &child in &node.daughters {
            let daughter = &self[child];
            let child_mom = daughter.mom_index();
            if daughter.has_energy() {
                for j in 0..3 {
                    projection.h[(0, child_mom + j)] += -2.0 * total[j];
                }
                projection.h[(0, child_mom + 3)] += 2.0 * total.e();
            } else {
                let p = fit_params.vector3(child_mom);
                let energy = p.energy(daughter.mass);
                for j in 0..3 {
                    projection.h[(0, child_mom + j)] +=
                        -2.0 * total[j] + 2.0 * total.e() * p[j] / energy;
                }
            }
        }
        Ok(ErrCode::empty())
    }
}

/// The distance of closest approach of two lines given as `(point, direction)` and the midpoint
/// between them, or `None` for parallel lines.
fn line_poca(
    a: &(Vector3<f64>, Vector3<f64>),
    b: &(Vector3<f64>, Vector3<f64>),
) -> Option<(f64, Vector3<f64>)> {
    let (p1, d1) = a;
    let (p2, d2) = b;
    let w = p1 - p2;
    let aa = d1.dot(d1);
    let ab = d1.dot(d2);
    let bb = d2.dot(d2);
    let det = aa * bb - ab * ab;
    if det <= 1e-12 * aa * bb {
        return None;
    }
    let t1 = (ab * d2.dot(&w) - bb * d1.dot(&w)) / det;
    let t2 = (aa * d2.dot(&w) - ab * d1.dot(&w)) / det;
    let q1 = p1 + d1 * t1;
    let q2 = p2 + d2 * t2;
    Some(((q1 - q2).norm(), (q1 + q2) / 2.0))
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Vector3};

    use super::*;
    use crate::{
        config::{BeamSpot, FitConfig},
        constraint::Constraint,
        field::ConstantField,
        particle::Particle,
        tests::{p4, track, PION_MASS},
    };

    /// Compare the Jacobian of a projection against central differences of its residual.
    pub(crate) fn check_projection_jacobian(
        tree: &DecayTree,
        constraint: &Constraint,
        fit_params: &FitParams,
    ) {
        let mut projection = Projection::new(fit_params.dim(), constraint.dim);
        tree.project_constraint(constraint, fit_params, &mut projection)
            .unwrap();
        for col in 0..fit_params.dim() {
            let step = 1e-6 * (1.0 + fit_params.state[col].abs());
            let mut up = fit_params.clone();
            up.state[col] += step;
            let mut down = fit_params.clone();
            down.state[col] -= step;
            let mut p_up = Projection::new(fit_params.dim(), constraint.dim);
            let mut p_down = Projection::new(fit_params.dim(), constraint.dim);
            tree.project_constraint(constraint, &up, &mut p_up).unwrap();
            tree.project_constraint(constraint, &down, &mut p_down)
                .unwrap();
            let derivative: DVector<f64> = (&p_up.residual - &p_down.residual) / (2.0 * step);
            for row in 0..constraint.dim {
                assert_relative_eq!(
                    -derivative[row],
                    projection.h[(row, col)],
                    epsilon = 1e-6,
                    max_relative = 1e-5
                );
            }
        }
    }

    fn k_short(vertex: Vector3<f64>) -> Particle {
        let pi_plus = track(211, 1.0, PION_MASS, vertex, Vector3::new(0.6, 0.2, 0.1));
        let pi_minus = track(-211, -1.0, PION_MASS, vertex, Vector3::new(0.3, -0.3, 0.2));
        Particle::composite(310, 0.0, 0.497611, vec![pi_plus, pi_minus]).with_lifetime(2.6844)
    }

    fn b_to_k_short_pi(vertex: Vector3<f64>) -> Particle {
        let pi = track(211, 1.0, PION_MASS, Vector3::zeros(), Vector3::new(-1.2, 0.4, 0.5));
        Particle::composite(521, 1.0, 5.27934, vec![k_short(vertex), pi]).with_lifetime(0.0491)
    }

    fn initialized(particle: &Particle, config: &FitConfig) -> (DecayTree, FitParams) {
        let mut tree = DecayTree::new(particle, config, &ConstantField::BELLE2).unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        let root = tree.root();
        tree.init_motherless_particle(root, &mut fit_params)
            .unwrap();
        (tree, fit_params)
    }

    #[test]
    fn test_vertex_seed_from_two_tracks() {
        let vertex = Vector3::new(1.5, -0.8, 2.0);
        let (tree, fit_params) = initialized(&k_short(vertex), &FitConfig::default());
        let pos = tree[tree.root()].pos_index().unwrap();
        assert_relative_eq!(fit_params.vector3(pos), vertex, epsilon = 1e-6);
        for &child in &tree[tree.root()].daughters {
            let NodeKind::RecoTrack(track) = &tree[child].kind else {
                panic!("expected a track");
            };
            let s = track.flight_length.unwrap();
            assert_relative_eq!(
                track.fit.helix.position_at_arc_length_2d(s),
                vertex,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_existing_vertex_is_used() {
        let seed = Vector3::new(0.1, 0.2, 0.3);
        let particle = k_short(Vector3::new(1.5, -0.8, 2.0)).with_vertex(seed);
        let (tree, fit_params) = initialized(&particle, &FitConfig::default());
        let pos = tree[tree.root()].pos_index().unwrap();
        assert_eq!(fit_params.vector3(pos), seed);
    }

    #[test]
    fn test_bad_setup_without_tracks() {
        let photon = |p: Vector3<f64>| {
            Particle::photon(crate::particle::PhotonMeasurement::new(
                p,
                Matrix3::identity() * 1e-4,
            ))
        };
        let pi0 = Particle::composite(
            111,
            0.0,
            0.1349768,
            vec![
                photon(Vector3::new(0.2, 0.1, 0.3)),
                photon(Vector3::new(0.3, -0.1, 0.2)),
            ],
        );
        let mut tree = DecayTree::new(&pi0, &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        let status = tree.init_motherless_particle(tree.root(), &mut fit_params)
            .unwrap();
        assert!(status.contains(ErrCode::BAD_SETUP));

        let beam_spot = BeamSpot::new(Vector3::new(0.01, 0.02, 0.3), Matrix3::identity() * 1e-4);
        let mut tree = DecayTree::new(
            &pi0,
            &FitConfig::default().with_beam_spot(beam_spot.clone()),
            &ConstantField::BELLE2,
        )
        .unwrap();
        let mut fit_params = FitParams::new(tree.dim());
        let status = tree.init_motherless_particle(tree.root(), &mut fit_params)
            .unwrap();
        assert!(status.is_success());
        let pos = tree[tree.root()].pos_index().unwrap();
        assert_eq!(fit_params.vector3(pos), beam_spot.position);
    }

    #[test]
    fn test_unseeded_daughter_vertex_is_no_line() {
        let photon = |p: Vector3<f64>| {
            Particle::photon(crate::particle::PhotonMeasurement::new(
                p,
                Matrix3::identity() * 1e-4,
            ))
        };
        let k_short = Particle::composite(
            310,
            0.0,
            0.497611,
            vec![
                photon(Vector3::new(0.2, 0.1, 0.3)),
                photon(Vector3::new(0.3, -0.1, 0.2)),
            ],
        )
        .with_lifetime(2.6844);
        let pi = track(211, 1.0, PION_MASS, Vector3::zeros(), Vector3::new(-1.2, 0.4, 0.5));
        let b = Particle::composite(521, 1.0, 5.27934, vec![k_short, pi]);
        let mut tree = DecayTree::new(&b, &FitConfig::default(), &ConstantField::BELLE2).unwrap();
        let k_short = tree.find(310).unwrap();
        assert!(matches!(tree[k_short].kind, NodeKind::InternalParticle(_)));
        let mut fit_params = FitParams::new(tree.dim());
        let status = tree.init_motherless_particle(tree.root(), &mut fit_params)
            .unwrap();
        assert_eq!(
            fit_params.vector3(tree[k_short].pos_index().unwrap()),
            Vector3::zeros()
        );
        // one track alone does not make a vertex
        assert!(status.contains(ErrCode::BAD_SETUP));
    }

    #[test]
    fn test_momentum_sum_consistency() {
        let (tree, fit_params) =
            initialized(&b_to_k_short_pi(Vector3::new(2.0, 1.0, -1.0)), &FitConfig::default());
        for (id, node) in tree.iter() {
            if node.daughters.is_empty() {
                continue;
            }
            let mut expected = Vector4::zeros();
            for &child in &node.daughters {
                let daughter = &tree[child];
                let p = fit_params.vector3(daughter.mom_index());
                let energy = if daughter.has_energy() {
                    fit_params.state[daughter.mom_index() + 3]
                } else {
                    (p.norm_squared() + daughter.mass * daughter.mass).sqrt()
                };
                expected += p.with_energy(energy);
            }
            let own = fit_params.par(node.mom_index(), 4);
            for i in 0..4 {
                assert_relative_eq!(own[i], expected[i], epsilon = 1e-12);
            }
            assert_relative_eq!(tree.daughters_p4(id, &fit_params), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_decay_length_initialization() {
        let vertex = Vector3::new(2.0, 1.0, -1.0);
        let (tree, fit_params) = initialized(&b_to_k_short_pi(vertex), &FitConfig::default());
        let ks = tree.find(310).unwrap();
        let tau = fit_params.state[tree[ks].tau_index().unwrap()];
        let b_pos = fit_params.vector3(tree[tree.root()].pos_index().unwrap());
        let ks_pos = fit_params.vector3(tree[ks].pos_index().unwrap());
        let p = fit_params.vector3(tree[ks].mom_index());
        assert_relative_eq!(tau, (ks_pos - b_pos).dot(&p) / p.norm(), epsilon = 1e-12);
        assert!(tau > 0.0);
    }

    #[test]
    fn test_base_projection_jacobians() {
        let config = FitConfig::default()
            .with_mass_constraints(&[310])
            .with_beam_spot(BeamSpot::new(
                Vector3::new(0.0, 0.0, 0.1),
                Matrix3::identity() * 1e-4,
            ));
        let (tree, mut fit_params) =
            initialized(&b_to_k_short_pi(Vector3::new(2.0, 1.0, -1.0)), &config);
        // move away from the initial point so that no residual vanishes
        for (i, x) in fit_params.state.iter_mut().enumerate() {
            *x += 0.01 * ((i % 7) as f64 - 3.0);
        }
        let constraints = tree.constraints();
        let kinds: Vec<ConstraintType> = constraints.iter().map(|c| c.kind).collect();
        for kind in [
            ConstraintType::BeamSpot,
            ConstraintType::Kinematic,
            ConstraintType::Geometric,
            ConstraintType::Mass,
        ] {
            assert!(kinds.contains(&kind), "missing {kind}");
        }
        for constraint in constraints
            .iter()
            .filter(|c| c.kind != ConstraintType::Track)
        {
            check_projection_jacobian(&tree, constraint, &fit_params);
        }
    }

    #[test]
    fn test_mass_residual() {
        let (tree, fit_params) = initialized(
            &k_short(Vector3::new(1.5, -0.8, 2.0)),
            &FitConfig::default().with_mass_constraints(&[310]),
        );
        let root = tree.root();
        let constraint = Constraint::new(root, ConstraintType::Mass, 0, 1);
        let mut projection = Projection::new(fit_params.dim(), 1);
        tree.project_constraint(&constraint, &fit_params, &mut projection)
            .unwrap();
        let m2 = tree.p4(root, &fit_params).m2();
        assert_relative_eq!(projection.residual[0], 0.497611f64.powi(2) - m2);
        assert_eq!(projection.v[(0, 0)], 0.0);
        let sum = p4(0.6, 0.2, 0.1, PION_MASS) + p4(0.3, -0.3, 0.2, PION_MASS);
        assert_relative_eq!(m2, sum.m2(), epsilon = 1e-9);
    }

    #[test]
    fn test_wrong_constraint_is_rejected() {
        let (tree, fit_params) =
            initialized(&k_short(Vector3::new(1.5, -0.8, 2.0)), &FitConfig::default());
        let root = tree.root();
        let mut projection = Projection::new(fit_params.dim(), 3);
        // the head of the tree has no mother
        let geometric = Constraint::new(root, ConstraintType::Geometric, 0, 3);
        assert!(tree
            .project_constraint(&geometric, &fit_params, &mut projection)
            .is_err());
        let mut projection = Projection::new(fit_params.dim(), 5);
        let helix = Constraint::new(root, ConstraintType::Helix, 0, 5);
        assert_eq!(
            tree.project_constraint(&helix, &fit_params, &mut projection)
                .unwrap(),
            ErrCode::UNKNOWN_CONSTRAINT
        );
    }
}
