/// Useful enumerations for fit configuration.
pub mod enums;
/// Perigee helix parametrization, its Jacobians and the point of closest approach between two
/// helices.
pub mod helix;
/// Traits to give additional functionality to [`nalgebra::Vector3`] and [`nalgebra::Vector4`] (in
/// particular, to treat the latter as a four-momentum).
pub mod vectors;
