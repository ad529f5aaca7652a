use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A source of the longitudinal magnetic field.
///
/// Every node samples the field once, at the origin, when the decay tree is built, and treats it
/// as homogeneous from then on. Implementors must be shareable between threads since independent
/// hypotheses may be fitted in parallel (see [`fit_all`](crate::fitter::fit_all)).
pub trait MagneticField: Sync {
    /// The $`z`$-component of the field at `position` (cm) in Tesla.
    fn field_z(&self, position: &Vector3<f64>) -> f64;
}

/// A homogeneous field along $`z`$.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantField(pub f64);

impl ConstantField {
    /// The 1.5 T solenoid field of the Belle II detector.
    pub const BELLE2: ConstantField = ConstantField(1.5);
}

impl Default for ConstantField {
    fn default() -> Self {
        Self::BELLE2
    }
}

impl MagneticField for ConstantField {
    fn field_z(&self, _position: &Vector3<f64>) -> f64 {
        self.0
    }
}

impl<F: MagneticField + ?Sized> MagneticField for &F {
    fn field_z(&self, position: &Vector3<f64>) -> f64 {
        (**self).field_z(position)
    }
}
