use nalgebra::{Vector3, Vector4};

/// Extra methods for a [`Vector3`] holding a three-momentum `(px, py, pz)`.
pub trait ThreeMomentum {
    /// The on-shell energy for a particle of the given `mass`.
    fn energy(&self, mass: f64) -> f64;
    /// Build the four-momentum `(px, py, pz, E)` of an on-shell particle with the given `mass`.
    fn with_mass(&self, mass: f64) -> Vector4<f64>;
    /// Build the four-momentum `(px, py, pz, E)` with the given `energy`.
    fn with_energy(&self, energy: f64) -> Vector4<f64>;
}

impl ThreeMomentum for Vector3<f64> {
    fn energy(&self, mass: f64) -> f64 {
        (self.norm_squared() + mass * mass).sqrt()
    }
    fn with_mass(&self, mass: f64) -> Vector4<f64> {
        self.with_energy(self.energy(mass))
    }
    fn with_energy(&self, energy: f64) -> Vector4<f64> {
        Vector4::new(self.x, self.y, self.z, energy)
    }
}

/// Extra methods for a [`Vector4`] holding a four-momentum `(px, py, pz, E)`.
///
/// Note that the energy is the *last* component, matching the layout of momenta in the fit
/// state vector.
pub trait FourMomentum {
    /// The three-momentum part.
    fn momentum(&self) -> Vector3<f64>;
    /// The energy component.
    fn e(&self) -> f64;
    /// The invariant mass squared $`E^2 - |\vec{p}|^2`$.
    fn m2(&self) -> f64;
    /// The invariant mass. Negative values of [`FourMomentum::m2`] give a negative mass.
    fn m(&self) -> f64;
}

impl FourMomentum for Vector4<f64> {
    fn momentum(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
    fn e(&self) -> f64 {
        self.w
    }
    fn m2(&self) -> f64 {
        self.w * self.w - self.momentum().norm_squared()
    }
    fn m(&self) -> f64 {
        let m2 = self.m2();
        m2.signum() * m2.abs().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_three_to_four_momentum_conversion() {
        let p3 = Vector3::new(1.0, 2.0, 3.0);
        let target_p4 = Vector4::new(1.0, 2.0, 3.0, 10.0);
        let p4_from_mass = p3.with_mass(target_p4.m());
        let p4_from_energy = p3.with_energy(target_p4.e());
        assert_relative_eq!(p4_from_mass, target_p4, epsilon = 1e-12);
        assert_eq!(p4_from_energy, target_p4);
    }

    #[test]
    fn test_four_momentum_basics() {
        let p = Vector4::new(3.0, 4.0, 5.0, 10.0);
        assert_eq!(p.e(), 10.0);
        assert_eq!(p.momentum(), Vector3::new(3.0, 4.0, 5.0));
        assert_relative_eq!(p.m2(), 50.0);
        assert_relative_eq!(p.m(), 50.0_f64.sqrt());
    }

    #[test]
    fn test_spacelike_mass_is_negative() {
        let p = Vector4::new(3.0, 4.0, 0.0, 3.0);
        assert_relative_eq!(p.m(), -4.0);
    }
}
