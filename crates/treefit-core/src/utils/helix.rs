use std::f64::consts::{PI, TAU};

use nalgebra::{Matrix5, Matrix6, SMatrix, Vector3, Vector5};
use serde::{Deserialize, Serialize};

/// The speed of light in cm/ns.
pub const SPEED_OF_LIGHT: f64 = 29.9792458;

/// Maximum number of Gauss-Newton steps taken when refining a point of closest approach.
const POCA_MAX_ITERATIONS: usize = 20;
/// Step size (in cm of arc length) below which the POCA refinement stops.
const POCA_TOLERANCE: f64 = 1e-9;
/// Opening angle (in radians) below which two helices are considered parallel at their POCA.
const CONVERSION_OPENING_ANGLE: f64 = 1e-3;
/// Below this value of $`|\omega| r`$ the arc length is expanded in a power series.
const SMALL_CURVATURE: f64 = 5e-6;

/// The 5x6 Jacobian of the perigee helix parameters with respect to the Cartesian position and
/// momentum.
pub type HelixJacobian = SMatrix<f64, 5, 6>;

/// The conversion factor $`\alpha = 1/(cB)`$ between transverse momentum (GeV) and radius of
/// curvature (cm) in a field of `b_field` Tesla.
pub fn alpha(b_field: f64) -> f64 {
    1.0 / (b_field * SPEED_OF_LIGHT) * 1e4
}

/// Reduce an angle into the interval $`(-\pi, \pi]`$.
///
/// Angles which already lie in this interval are returned unchanged.
pub fn wrap_phi(phi: f64) -> f64 {
    let wrapped = phi % TAU;
    if wrapped > PI {
        wrapped - TAU
    } else if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// $`\sin(x)/x`$
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-4 {
        let x2 = x * x;
        1.0 - x2 / 6.0 * (1.0 - x2 / 20.0)
    } else {
        x.sin() / x
    }
}

/// $`(1 - \cos(x))/x`$
fn cosc(x: f64) -> f64 {
    let half_sinc = sinc(x / 2.0);
    x / 2.0 * half_sinc * half_sinc
}

/// The 2D arc length from a reference point to the perigee of a circle with curvature `omega`,
/// given the components of the displacement parallel and orthogonal to the direction of flight.
fn arc_length_from_displacement(omega: f64, parallel: f64, orthogonal: f64) -> f64 {
    if omega == 0.0 {
        parallel
    } else {
        (omega * parallel).atan2(1.0 + omega * orthogonal) / omega
    }
}

/// A helix in the Belle II perigee parametrization with respect to the origin.
///
/// The perigee is the point of the trajectory closest to the $`z`$-axis in the transverse plane.
/// It is located at $`(d_0 \sin\phi_0, -d_0\cos\phi_0, z_0)`$, where the particle travels in the
/// direction $`(\cos\phi_0, \sin\phi_0)`$. The signed curvature $`\omega = q/(\alpha p_T)`$ is
/// positive for trajectories turning clockwise in the transverse plane, which is how positively
/// charged particles move in a field along $`+z`$.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Helix {
    /// Signed transverse distance of the perigee from the origin
    pub d0: f64,
    /// Azimuth of the direction of flight at the perigee
    pub phi0: f64,
    /// Signed curvature
    pub omega: f64,
    /// Longitudinal position of the perigee
    pub z0: f64,
    /// Tangent of the dip angle
    pub tan_lambda: f64,
}

impl Helix {
    /// Create a [`Helix`] from its five perigee parameters.
    pub fn new(d0: f64, phi0: f64, omega: f64, z0: f64, tan_lambda: f64) -> Self {
        Self {
            d0,
            phi0,
            omega,
            z0,
            tan_lambda,
        }
    }

    /// Create a [`Helix`] from a vector ordered as $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$.
    pub fn from_vector(parameters: &Vector5<f64>) -> Self {
        Self::new(
            parameters[0],
            parameters[1],
            parameters[2],
            parameters[3],
            parameters[4],
        )
    }

    /// The parameters ordered as $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$.
    pub fn to_vector(&self) -> Vector5<f64> {
        Vector5::new(self.d0, self.phi0, self.omega, self.z0, self.tan_lambda)
    }

    /// The helix of a particle with the given `charge` which passes through `position` with
    /// `momentum` in a homogeneous field of `b_field` Tesla along $`z`$.
    pub fn from_cartesian(
        position: &Vector3<f64>,
        momentum: &Vector3<f64>,
        charge: f64,
        b_field: f64,
    ) -> Self {
        let pt = momentum.x.hypot(momentum.y);
        let phi = momentum.y.atan2(momentum.x);
        let omega = charge / (alpha(b_field) * pt);
        let tan_lambda = momentum.z / pt;
        let (sin_phi, cos_phi) = phi.sin_cos();
        let (x, y) = (position.x, position.y);
        // displacement from the given point to the new reference point (the origin)
        let parallel = -(x * cos_phi + y * sin_phi);
        let orthogonal = x * sin_phi - y * cos_phi;
        let a = 2.0 * orthogonal + omega * (x * x + y * y);
        let u = (1.0 + omega * a).sqrt();
        let arc_length = arc_length_from_displacement(omega, parallel, orthogonal);
        Self {
            d0: a / (1.0 + u),
            phi0: wrap_phi(phi - omega * arc_length),
            omega,
            z0: position.z + arc_length * tan_lambda,
            tan_lambda,
        }
    }

    /// The perigee point.
    pub fn perigee(&self) -> Vector3<f64> {
        let (sin_phi0, cos_phi0) = self.phi0.sin_cos();
        Vector3::new(self.d0 * sin_phi0, -self.d0 * cos_phi0, self.z0)
    }

    /// The radius of curvature, infinite for a straight line.
    pub fn radius(&self) -> f64 {
        1.0 / self.omega.abs()
    }

    /// The center of the circle the helix projects onto in the transverse plane.
    pub fn center(&self) -> (f64, f64) {
        let (sin_phi0, cos_phi0) = self.phi0.sin_cos();
        let distance = self.d0 + 1.0 / self.omega;
        (distance * sin_phi0, -distance * cos_phi0)
    }

    /// The azimuth of the direction of flight after travelling the 2D arc length `s` from the
    /// perigee.
    pub fn phi_at_arc_length_2d(&self, s: f64) -> f64 {
        wrap_phi(self.phi0 - self.omega * s)
    }

    /// The point reached after travelling the 2D arc length `s` from the perigee.
    pub fn position_at_arc_length_2d(&self, s: f64) -> Vector3<f64> {
        let (sin_phi0, cos_phi0) = self.phi0.sin_cos();
        let chi = -self.omega * s;
        let sinc_chi = sinc(chi);
        let cosc_chi = cosc(chi);
        Vector3::new(
            self.d0 * sin_phi0 + s * (cos_phi0 * sinc_chi - sin_phi0 * cosc_chi),
            -self.d0 * cos_phi0 + s * (sin_phi0 * sinc_chi + cos_phi0 * cosc_chi),
            self.z0 + s * self.tan_lambda,
        )
    }

    /// The (not normalized) tangent $`(\cos\phi, \sin\phi, \tan\lambda)`$ after travelling the 2D arc
    /// length `s` from the perigee. This is the derivative of
    /// [`Helix::position_at_arc_length_2d`] with respect to `s`.
    pub fn direction_at_arc_length_2d(&self, s: f64) -> Vector3<f64> {
        let (sin_phi, cos_phi) = (self.phi0 - self.omega * s).sin_cos();
        Vector3::new(cos_phi, sin_phi, self.tan_lambda)
    }

    /// The transverse momentum of a particle with the given `charge` on this helix.
    pub fn transverse_momentum(&self, charge: f64, b_field: f64) -> f64 {
        (charge / (alpha(b_field) * self.omega)).abs()
    }

    /// The momentum of a particle with the given `charge` after travelling the 2D arc length `s`
    /// from the perigee.
    pub fn momentum_at_arc_length_2d(&self, s: f64, charge: f64, b_field: f64) -> Vector3<f64> {
        self.direction_at_arc_length_2d(s) * self.transverse_momentum(charge, b_field)
    }

    /// The signed 2D arc length from the perigee to the point of the trajectory which is closest
    /// to `(x, y)` in the transverse plane.
    pub fn arc_length_2d_at(&self, x: f64, y: f64) -> f64 {
        let (sin_phi0, cos_phi0) = self.phi0.sin_cos();
        let parallel = x * cos_phi0 + y * sin_phi0;
        let orthogonal = y * cos_phi0 - x * sin_phi0 + self.d0;
        arc_length_from_displacement(self.omega, parallel, orthogonal)
    }
}

/// A [`Helix`] together with the covariance matrix of its five parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UncertainHelix {
    /// The helix parameters
    pub helix: Helix,
    /// Covariance of $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$
    pub covariance: Matrix5<f64>,
}

impl UncertainHelix {
    /// Create an [`UncertainHelix`] from parameters and their covariance.
    pub fn new(helix: Helix, covariance: Matrix5<f64>) -> Self {
        Self { helix, covariance }
    }

    /// Convert a Cartesian position and momentum with a 6x6 covariance (ordered as
    /// $`(x, y, z, p_x, p_y, p_z)`$) into a helix by linear error propagation.
    pub fn from_cartesian(
        position: &Vector3<f64>,
        momentum: &Vector3<f64>,
        covariance: &Matrix6<f64>,
        charge: f64,
        b_field: f64,
    ) -> Self {
        let helix = Helix::from_cartesian(position, momentum, charge, b_field);
        let jacobian = jacobian_to_cartesian_helix(position, momentum, b_field, charge);
        Self::new(helix, jacobian * covariance * jacobian.transpose())
    }
}

/// The analytic Jacobian of [`Helix::from_cartesian`] with respect to
/// $`(x, y, z, p_x, p_y, p_z)`$, evaluated at the given point.
///
/// Rows are ordered as $`(d_0, \phi_0, \omega, z_0, \tan\lambda)`$.
pub fn jacobian_to_cartesian_helix(
    position: &Vector3<f64>,
    momentum: &Vector3<f64>,
    b_field: f64,
    charge: f64,
) -> HelixJacobian {
    let (x, y) = (position.x, position.y);
    let (px, py, pz) = (momentum.x, momentum.y, momentum.z);
    let pt2 = px * px + py * py;
    let pt = pt2.sqrt();
    let (sin_phi, cos_phi) = (py / pt, px / pt);
    let omega = charge / (alpha(b_field) * pt);
    let tan_lambda = pz / pt;

    let parallel = -(x * cos_phi + y * sin_phi);
    let orthogonal = x * sin_phi - y * cos_phi;
    let r2 = x * x + y * y;
    let a = 2.0 * orthogonal + omega * r2;
    let u2 = 1.0 + omega * a;
    let u = u2.sqrt();
    let n = omega * parallel;
    let m = 1.0 + omega * orthogonal;
    let turn = n.atan2(m);
    let arc_length = arc_length_from_displacement(omega, parallel, orthogonal);

    // intermediate variables as functions of the momentum
    let dphi_dpx = -py / pt2;
    let dphi_dpy = px / pt2;
    let domega_dpx = -omega * px / pt2;
    let domega_dpy = -omega * py / pt2;
    let dtanl_dpx = -tan_lambda * px / pt2;
    let dtanl_dpy = -tan_lambda * py / pt2;
    let dtanl_dpz = 1.0 / pt;

    // d0 = A / (1 + U)
    let one_plus_u2 = (1.0 + u) * (1.0 + u);
    let dd0_da = 1.0 / (1.0 + u) - a * omega / (2.0 * u * one_plus_u2);
    let dd0_dx = dd0_da * (2.0 * sin_phi + 2.0 * omega * x);
    let dd0_dy = dd0_da * (-2.0 * cos_phi + 2.0 * omega * y);
    let dd0_dphi = dd0_da * (-2.0 * parallel);
    let dd0_domega = dd0_da * r2 - a * a / (2.0 * u * one_plus_u2);

    // the arc length s = atan2(n, m) / omega, and the turning angle omega * s
    let ds_dx = (-m * cos_phi - n * sin_phi) / u2;
    let ds_dy = (-m * sin_phi + n * cos_phi) / u2;
    let ds_dphi = (m * orthogonal + n * parallel) / u2;
    let dturn_domega = parallel / u2;
    let ds_domega = if (omega * r2.sqrt()).abs() < SMALL_CURVATURE {
        -parallel * orthogonal
            + 2.0 * omega * (parallel * orthogonal * orthogonal - parallel.powi(3) / 3.0)
    } else {
        (omega * dturn_domega - turn) / (omega * omega)
    };

    let mut jacobian = HelixJacobian::zeros();
    // d0
    jacobian[(0, 0)] = dd0_dx;
    jacobian[(0, 1)] = dd0_dy;
    jacobian[(0, 3)] = dd0_dphi * dphi_dpx + dd0_domega * domega_dpx;
    jacobian[(0, 4)] = dd0_dphi * dphi_dpy + dd0_domega * domega_dpy;
    // phi0 = phi - omega * s
    jacobian[(1, 0)] = -omega * ds_dx;
    jacobian[(1, 1)] = -omega * ds_dy;
    jacobian[(1, 3)] = (1.0 - omega * ds_dphi) * dphi_dpx - dturn_domega * domega_dpx;
    jacobian[(1, 4)] = (1.0 - omega * ds_dphi) * dphi_dpy - dturn_domega * domega_dpy;
    // omega
    jacobian[(2, 3)] = domega_dpx;
    jacobian[(2, 4)] = domega_dpy;
    // z0 = z + s * tan(lambda)
    jacobian[(3, 0)] = tan_lambda * ds_dx;
    jacobian[(3, 1)] = tan_lambda * ds_dy;
    jacobian[(3, 2)] = 1.0;
    jacobian[(3, 3)] =
        tan_lambda * (ds_dphi * dphi_dpx + ds_domega * domega_dpx) + arc_length * dtanl_dpx;
    jacobian[(3, 4)] =
        tan_lambda * (ds_dphi * dphi_dpy + ds_domega * domega_dpy) + arc_length * dtanl_dpy;
    jacobian[(3, 5)] = arc_length * dtanl_dpz;
    // tan(lambda)
    jacobian[(4, 3)] = dtanl_dpx;
    jacobian[(4, 4)] = dtanl_dpy;
    jacobian[(4, 5)] = dtanl_dpz;
    jacobian
}

/// The result of [`helix_poca`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Poca {
    /// 2D arc length from the perigee of the first helix to its closest point
    pub flight_length_a: f64,
    /// 2D arc length from the perigee of the second helix to its closest point
    pub flight_length_b: f64,
    /// The midpoint between the two closest points
    pub point: Vector3<f64>,
    /// Set if both helices fly in (almost) the same direction at their closest points, as the
    /// daughters of a photon conversion do
    pub is_conversion: bool,
}

/// Seed arc lengths for the POCA search from the intersection of the transverse projections.
fn transverse_seed(a: &Helix, b: &Helix) -> (f64, f64) {
    let candidates: Vec<(f64, f64)> = if a.omega == 0.0 || b.omega == 0.0 {
        // intersect the tangents at the perigees
        let (pa, pb) = (a.perigee(), b.perigee());
        let (ta, tb) = (a.direction_at_arc_length_2d(0.0), b.direction_at_arc_length_2d(0.0));
        let cross = ta.x * tb.y - ta.y * tb.x;
        if cross.abs() < 1e-12 {
            return (0.0, 0.0);
        }
        let (dx, dy) = (pb.x - pa.x, pb.y - pa.y);
        let s = (dx * tb.y - dy * tb.x) / cross;
        let point = pa + ta * s;
        vec![(point.x, point.y)]
    } else {
        let (xa, ya) = a.center();
        let (xb, yb) = b.center();
        let (ra, rb) = (a.radius(), b.radius());
        let (dx, dy) = (xb - xa, yb - ya);
        let d = dx.hypot(dy);
        if d < 1e-9 * (ra + rb) {
            // concentric circles, every point is equally close in the transverse plane
            return (0.0, 0.0);
        }
        let (ux, uy) = (dx / d, dy / d);
        if d > ra + rb {
            // disjoint circles, take the midpoint of the gap
            let (pax, pay) = (xa + ra * ux, ya + ra * uy);
            let (pbx, pby) = (xb - rb * ux, yb - rb * uy);
            vec![(0.5 * (pax + pbx), 0.5 * (pay + pby))]
        } else if d < (ra - rb).abs() {
            // one circle inside the other
            let sign = if ra > rb { 1.0 } else { -1.0 };
            let (pax, pay) = (xa + sign * ra * ux, ya + sign * ra * uy);
            let (pbx, pby) = (xb + sign * rb * ux, yb + sign * rb * uy);
            vec![(0.5 * (pax + pbx), 0.5 * (pay + pby))]
        } else {
            let along = (d * d + ra * ra - rb * rb) / (2.0 * d);
            let across = (ra * ra - along * along).max(0.0).sqrt();
            let (bx, by) = (xa + along * ux, ya + along * uy);
            vec![
                (bx - across * uy, by + across * ux),
                (bx + across * uy, by - across * ux),
            ]
        }
    };
    candidates
        .into_iter()
        .map(|(x, y)| {
            let sa = a.arc_length_2d_at(x, y);
            let sb = b.arc_length_2d_at(x, y);
            let dz = (a.z0 + sa * a.tan_lambda) - (b.z0 + sb * b.tan_lambda);
            (sa, sb, dz.abs())
        })
        .min_by(|lhs, rhs| lhs.2.total_cmp(&rhs.2))
        .map(|(sa, sb, _)| (sa, sb))
        .unwrap_or((0.0, 0.0))
}

/// Find the point of closest approach of two helices in three dimensions.
///
/// The search is seeded with the intersection of the two circles in the transverse plane (of the
/// two intersections, the one with the smaller separation in $`z`$) and refined with Gauss-Newton
/// steps on the 3D distance. The result does not depend on the order of the arguments, apart from
/// the flight lengths which are swapped.
pub fn helix_poca(a: &Helix, b: &Helix) -> Poca {
    let (mut sa, mut sb) = transverse_seed(a, b);
    for _ in 0..POCA_MAX_ITERATIONS {
        let delta = a.position_at_arc_length_2d(sa) - b.position_at_arc_length_2d(sb);
        let ta = a.direction_at_arc_length_2d(sa);
        let tb = b.direction_at_arc_length_2d(sb);
        let (taa, tbb, tab) = (ta.norm_squared(), tb.norm_squared(), ta.dot(&tb));
        let det = taa * tbb - tab * tab;
        if det <= 1e-14 * taa * tbb {
            // (anti)parallel trajectories, the closest point is not unique
            break;
        }
        let ga = -ta.dot(&delta);
        let gb = tb.dot(&delta);
        let dsa = (tbb * ga + tab * gb) / det;
        let dsb = (tab * ga + taa * gb) / det;
        sa += dsa;
        sb += dsb;
        if dsa.abs() < POCA_TOLERANCE && dsb.abs() < POCA_TOLERANCE {
            break;
        }
    }
    let point =
        0.5 * (a.position_at_arc_length_2d(sa) + b.position_at_arc_length_2d(sb));
    let ta = a.direction_at_arc_length_2d(sa).normalize();
    let tb = b.direction_at_arc_length_2d(sb).normalize();
    Poca {
        flight_length_a: sa,
        flight_length_b: sb,
        point,
        is_conversion: ta.dot(&tb) > CONVERSION_OPENING_ANGLE.cos(),
    }
}
