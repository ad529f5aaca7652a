use std::{fmt::Display, ops::Index};

use log::warn;
use nalgebra::{Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::{
    config::FitConfig,
    constraint::{Constraint, ConstraintType},
    field::MagneticField,
    fit_params::FitParams,
    particle::Particle,
    projection::Projection,
    status::ErrCode,
    TreeFitError, TreeFitResult,
};

/// Routines shared by all kinds of nodes.
pub mod base;
/// Composites with their own decay vertex.
pub mod internal_particle;
/// Charged composites fitted as if they had their own helix.
pub mod internal_track;
/// Final-state photons.
pub mod reco_photon;
/// Final-state charged tracks.
pub mod reco_track;
/// Composites decaying at their production vertex.
pub mod resonance;

pub use internal_particle::InternalParticle;
pub use internal_track::InternalTrack;
pub use reco_photon::RecoPhoton;
pub use reco_track::RecoTrack;

/// The factor by which the measured momentum variances of final-state particles are inflated
/// to form their prior.
pub const MEASUREMENT_PRIOR_SCALE: f64 = 1000.0;
/// The smallest prior variance of a measured momentum component.
pub const MIN_PRIOR_VARIANCE: f64 = 1e-6;

/// The index of a node in a [`DecayTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role a node plays in the fit, with the data specific to that role.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// A final-state charged track.
    RecoTrack(RecoTrack),
    /// A final-state photon.
    RecoPhoton(RecoPhoton),
    /// A composite with its own decay vertex.
    InternalParticle(InternalParticle),
    /// A charged composite with its own helix.
    InternalTrack(InternalTrack),
    /// A composite which decays at its production vertex.
    Resonance,
}

impl NodeKind {
    /// A short name for logging and errors.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::RecoTrack(_) => "RecoTrack",
            NodeKind::RecoPhoton(_) => "RecoPhoton",
            NodeKind::InternalParticle(_) => "InternalParticle",
            NodeKind::InternalTrack(_) => "InternalTrack",
            NodeKind::Resonance => "Resonance",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One particle of the decay hypothesis.
///
/// A node owns a contiguous block of the state vector starting at [`ParticleNode::index`], laid
/// out as `[position (3)][decay length (1)][momentum (3 or 4)]` where each part is optional
/// depending on the [`NodeKind`].
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleNode {
    /// The role of the node
    pub kind: NodeKind,
    /// The node this particle was produced in, `None` for the head of the tree
    pub mother: Option<NodeId>,
    /// The decay products
    pub daughters: Vec<NodeId>,
    /// PDG code
    pub pdg: i32,
    /// Electric charge
    pub charge: f64,
    /// Nominal mass (GeV)
    pub mass: f64,
    /// Nominal lifetime $`c\tau`$ (cm)
    pub lifetime: f64,
    /// Pre-fit decay vertex, if known
    pub vertex_seed: Option<Vector3<f64>>,
    /// Pre-fit four-momentum
    pub momentum_seed: Vector4<f64>,
    /// Whether the invariant mass is constrained
    pub mass_constraint: bool,
    index: usize,
    pos_index: Option<usize>,
}

impl ParticleNode {
    fn new(particle: &Particle, kind: NodeKind, mother: Option<NodeId>) -> Self {
        Self {
            kind,
            mother,
            daughters: Vec::with_capacity(particle.daughters.len()),
            pdg: particle.pdg,
            charge: particle.charge,
            mass: particle.mass,
            lifetime: particle.lifetime,
            vertex_seed: particle.has_vertex().then_some(particle.vertex),
            momentum_seed: particle.momentum,
            mass_constraint: false,
            index: 0,
            pos_index: None,
        }
    }

    /// The first state index owned by this node.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns `true` if the node owns a vertex.
    pub fn has_position(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::InternalParticle(_) | NodeKind::InternalTrack(_)
        )
    }

    /// Returns `true` if the energy is a parameter of its own rather than derived from the
    /// three-momentum and the nominal mass.
    pub fn has_energy(&self) -> bool {
        match &self.kind {
            NodeKind::RecoTrack(_) | NodeKind::RecoPhoton(_) => false,
            NodeKind::InternalParticle(_) | NodeKind::Resonance => true,
            NodeKind::InternalTrack(track) => !(self.mass_constraint || track.no_energy_sum),
        }
    }

    /// The index of the vertex this node decays at. Resonances report the vertex of their
    /// mother, final-state particles have none.
    pub fn pos_index(&self) -> Option<usize> {
        self.pos_index
    }

    /// The index of the decay length, only present for composites with their own vertex which
    /// were produced in another one.
    pub fn tau_index(&self) -> Option<usize> {
        match self.kind {
            NodeKind::InternalParticle(_) if self.mother.is_some() => Some(self.index + 3),
            _ => None,
        }
    }

    /// The index of the momentum.
    pub fn mom_index(&self) -> usize {
        match self.kind {
            NodeKind::RecoTrack(_) | NodeKind::RecoPhoton(_) | NodeKind::Resonance => self.index,
            NodeKind::InternalTrack(_) => self.index + 3,
            NodeKind::InternalParticle(_) => {
                self.index + 3 + usize::from(self.tau_index().is_some())
            }
        }
    }

    /// The number of momentum parameters, 4 if the node has an energy parameter and 3 otherwise.
    pub fn n_momentum(&self) -> usize {
        if self.has_energy() {
            4
        } else {
            3
        }
    }

    /// The number of state parameters owned by this node.
    pub fn dim(&self) -> usize {
        let position = if self.has_position() { 3 } else { 0 };
        let tau = usize::from(self.tau_index().is_some());
        position + tau + self.n_momentum()
    }

    /// Iterate over the state indices owned by this node.
    pub fn owned_indices(&self) -> std::ops::Range<usize> {
        self.index..self.index + self.dim()
    }

    /// A short description for logging.
    pub fn name(&self) -> String {
        format!("{} (PDG {})", self.kind, self.pdg)
    }
}

/// A decay hypothesis as an arena of [`ParticleNode`]s.
///
/// The tree owns all nodes. Mothers refer to their daughters and daughters to their mother by
/// [`NodeId`], so the topology is fixed once the tree is built and every per-node operation
/// takes the id of the node it acts on.
#[derive(Clone, Debug, PartialEq)]
pub struct DecayTree {
    nodes: Vec<ParticleNode>,
    root: NodeId,
    dim: usize,
    config: FitConfig,
}

impl Index<NodeId> for DecayTree {
    type Output = ParticleNode;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl DecayTree {
    /// Build the tree for `particle` and assign state indices to all nodes.
    ///
    /// The field is sampled once, at the origin, for every charged node which needs it.
    pub fn new<F: MagneticField + ?Sized>(
        particle: &Particle,
        config: &FitConfig,
        field: &F,
    ) -> TreeFitResult<Self> {
        let mut tree = Self {
            nodes: Vec::with_capacity(particle.n_particles()),
            root: NodeId(0),
            dim: 0,
            config: config.clone(),
        };
        let b_field = field.field_z(&Vector3::zeros());
        tree.root = tree.add_particle(particle, None, b_field)?;
        tree.dim = tree.assign_indices(tree.root, 0);
        tree.resolve_position_indices(tree.root, None);
        Ok(tree)
    }

    fn add_particle(
        &mut self,
        particle: &Particle,
        mother: Option<NodeId>,
        b_field: f64,
    ) -> TreeFitResult<NodeId> {
        let kind = self.select_kind(particle, mother, b_field)?;
        let id = NodeId(self.nodes.len());
        let mut node = ParticleNode::new(particle, kind, mother);
        node.mass_constraint = match node.kind {
            NodeKind::InternalTrack(_) => {
                self.config.force_mass_constraint || self.config.is_mass_constrained(node.pdg)
            }
            NodeKind::InternalParticle(_) | NodeKind::Resonance => {
                self.config.is_mass_constrained(node.pdg)
            }
            NodeKind::RecoTrack(_) | NodeKind::RecoPhoton(_) => false,
        };
        self.nodes.push(node);
        for daughter in &particle.daughters {
            let child = self.add_particle(daughter, Some(id), b_field)?;
            self.nodes[id.0].daughters.push(child);
        }
        Ok(id)
    }

    fn select_kind(
        &self,
        particle: &Particle,
        mother: Option<NodeId>,
        b_field: f64,
    ) -> TreeFitResult<NodeKind> {
        if particle.is_final_state() {
            if let Some(fit) = &particle.track {
                return Ok(NodeKind::RecoTrack(RecoTrack::new(fit.clone(), b_field)));
            }
            if let Some(measurement) = &particle.photon {
                return Ok(NodeKind::RecoPhoton(RecoPhoton::new(measurement.clone())));
            }
            return Err(TreeFitError::MissingMeasurement { pdg: particle.pdg });
        }
        if self.config.is_internal_track(particle.pdg) {
            if mother.is_some() && particle.charge != 0.0 {
                return Ok(NodeKind::InternalTrack(InternalTrack::new(
                    b_field,
                    self.config.no_energy_sum,
                )));
            }
            warn!(
                "PDG {} is configured as an internal track but is {}, fitting it as a composite instead",
                particle.pdg,
                if mother.is_none() {
                    "the head of the tree"
                } else {
                    "neutral"
                }
            );
        }
        if mother.is_none()
            || self.config.force_fit_all
            || particle.lifetime > self.config.resonance_threshold
        {
            Ok(NodeKind::InternalParticle(InternalParticle::default()))
        } else {
            Ok(NodeKind::Resonance)
        }
    }

    /// Depth-first, daughters before their mother.
    fn assign_indices(&mut self, id: NodeId, offset: usize) -> usize {
        let mut offset = offset;
        for child in self.nodes[id.0].daughters.clone() {
            offset = self.assign_indices(child, offset);
        }
        let node = &mut self.nodes[id.0];
        node.index = offset;
        if node.has_position() {
            node.pos_index = Some(offset);
        }
        offset + node.dim()
    }

    fn resolve_position_indices(&mut self, id: NodeId, mother_pos: Option<usize>) {
        if matches!(self.nodes[id.0].kind, NodeKind::Resonance) {
            self.nodes[id.0].pos_index = mother_pos;
        }
        let pos = self.nodes[id.0].pos_index;
        for child in self.nodes[id.0].daughters.clone() {
            self.resolve_position_indices(child, pos);
        }
    }

    /// The head of the tree.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The dimension of the state vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`, a tree has at least its head.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The configuration the tree was built with.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Look up a node.
    pub fn get(&self, id: NodeId) -> TreeFitResult<&ParticleNode> {
        self.nodes.get(id.0).ok_or(TreeFitError::UnknownNode(id.0))
    }

    /// Iterate over all nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ParticleNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i), node))
    }

    /// Find the first node with the given PDG code, in the order the decay hypothesis lists them.
    pub fn find(&self, pdg: i32) -> Option<NodeId> {
        self.iter().find(|(_, node)| node.pdg == pdg).map(|(id, _)| id)
    }

    /// The vertex index of the mother of `id`.
    pub fn mother_pos_index(&self, id: NodeId) -> TreeFitResult<usize> {
        let node = &self[id];
        node.mother
            .and_then(|mother| self[mother].pos_index())
            .ok_or(TreeFitError::MissingMother {
                node: id.0,
                pdg: node.pdg,
            })
    }

    /// Initialize the parameters of `id` and everything below it without relying on a mother.
    ///
    /// Daughters are initialized first; composites with a vertex then seed it, hand it down to
    /// their daughters with [`DecayTree::init_particle_with_mother`], and finally sum up the
    /// daughters' momenta.
    pub fn init_motherless_particle(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        match self[id].kind {
            NodeKind::RecoTrack(_) => Ok(self.init_reco_track(id, fit_params)),
            NodeKind::RecoPhoton(_) => Ok(self.init_reco_photon(id, fit_params)),
            NodeKind::InternalParticle(_) | NodeKind::InternalTrack(_) => {
                self.init_vertexed_composite(id, fit_params)
            }
            NodeKind::Resonance => self.init_resonance(id, fit_params),
        }
    }

    /// Finish the initialization of `id` once the vertex of its mother is known.
    pub fn init_particle_with_mother(
        &mut self,
        id: NodeId,
        fit_params: &mut FitParams,
    ) -> TreeFitResult<ErrCode> {
        match self[id].kind {
            NodeKind::RecoTrack(_) => self.init_reco_track_with_mother(id, fit_params),
            NodeKind::RecoPhoton(_) => Ok(ErrCode::empty()),
            NodeKind::InternalParticle(_) => {
                self.init_internal_particle_with_mother(id, fit_params)
            }
            NodeKind::InternalTrack(_) => self.init_internal_track_with_mother(id, fit_params),
            NodeKind::Resonance => self.init_resonance_with_mother(id, fit_params),
        }
    }

    /// Set the momentum of a composite to the sum of its daughters' momenta.
    pub fn init_momentum(&self, id: NodeId, fit_params: &mut FitParams) -> ErrCode {
        let node = &self[id];
        if node.daughters.is_empty() {
            return ErrCode::empty();
        }
        let sum = self.daughters_p4(id, fit_params);
        let n = node.n_momentum();
        fit_params
            .par_mut(node.mom_index(), n)
            .copy_from(&sum.rows(0, n));
        ErrCode::empty()
    }

    /// Put the prior variances of `id` and everything below it on the diagonal of the
    /// covariance.
    pub fn init_covariance(&self, id: NodeId, fit_params: &mut FitParams) -> ErrCode {
        let mut status = match &self[id].kind {
            NodeKind::RecoTrack(_) => self.init_reco_track_covariance(id, fit_params),
            NodeKind::RecoPhoton(_) => self.init_reco_photon_covariance(id, fit_params),
            NodeKind::InternalParticle(_) => {
                self.init_internal_particle_covariance(id, fit_params)
            }
            NodeKind::InternalTrack(_) => self.init_internal_track_covariance(id, fit_params),
            NodeKind::Resonance => self.init_resonance_covariance(id, fit_params),
        };
        for &child in &self[id].daughters {
            status |= self.init_covariance(child, fit_params);
        }
        status
    }

    /// Append the constraints of `id` and everything below it to `list`.
    pub fn add_to_constraint_list(&self, id: NodeId, list: &mut Vec<Constraint>, depth: i32) {
        match &self[id].kind {
            NodeKind::RecoTrack(_) => {
                list.push(Constraint::new(id, ConstraintType::Track, depth, 5))
            }
            NodeKind::RecoPhoton(_) => {
                list.push(Constraint::new(id, ConstraintType::Photon, depth, 3))
            }
            NodeKind::InternalParticle(_) => {
                self.add_internal_particle_constraints(id, list, depth)
            }
            NodeKind::InternalTrack(_) => self.add_internal_track_constraints(id, list, depth),
            NodeKind::Resonance => self.add_resonance_constraints(id, list, depth),
        }
    }

    /// All constraints of the tree in the order they are applied.
    pub fn constraints(&self) -> Vec<Constraint> {
        let mut list = Vec::new();
        self.add_to_constraint_list(self.root, &mut list, 0);
        list.sort();
        list
    }

    /// Linearize `constraint` at the current state.
    ///
    /// Numerical trouble is reported in the returned [`ErrCode`]; asking a node for a constraint
    /// it cannot have (for instance a geometric constraint without a mother) is an error.
    pub fn project_constraint(
        &self,
        constraint: &Constraint,
        fit_params: &FitParams,
        projection: &mut Projection,
    ) -> TreeFitResult<ErrCode> {
        let id = constraint.node;
        match (&self.get(id)?.kind, constraint.kind) {
            (NodeKind::RecoTrack(_), ConstraintType::Track) => {
                self.project_track_constraint(id, fit_params, projection)
            }
            (NodeKind::RecoPhoton(_), ConstraintType::Photon) => {
                Ok(self.project_photon_constraint(id, fit_params, projection))
            }
            (NodeKind::InternalTrack(_), ConstraintType::Helix) => {
                self.project_helix_constraint(id, fit_params, projection)
            }
            (_, kind) => self.project_base_constraint(id, kind, fit_params, projection),
        }
    }

    /// Reconcile the momenta of composites with their daughters after the fit.
    pub fn force_p4_sum(&self, id: NodeId, fit_params: &mut FitParams) -> TreeFitResult<()> {
        for &child in &self[id].daughters {
            self.force_p4_sum(child, fit_params)?;
        }
        match &self[id].kind {
            NodeKind::RecoTrack(_) | NodeKind::RecoPhoton(_) => Ok(()),
            NodeKind::InternalParticle(_) | NodeKind::Resonance => {
                self.init_momentum(id, fit_params);
                Ok(())
            }
            NodeKind::InternalTrack(_) => self.force_internal_track_p4_sum(id, fit_params),
        }
    }
}
