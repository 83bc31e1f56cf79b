//! Quadrature rules on the reference elements.
//!
//! Rules for quadrilaterals and hexahedra are tensor products of Gauss-Legendre rules.
//! Simplices use collapsed ("Duffy") tensor rules: a Gauss rule on the reference square or cube
//! is mapped onto the reference triangle or tetrahedron, with the Jacobian determinant of
//! the collapsing map folded into the weights. All rules have positive weights.
use crate::allocators::DimAllocator;
use crate::SmallDim;
use itertools::iproduct;
use nalgebra::{DefaultAllocator, OPoint, Point2, Point3, U2, U3};
use std::f64::consts::PI;

/// A quadrature rule consisting of weights and points on a reference domain.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    weights: Vec<f64>,
    points: Vec<OPoint<f64, D>>,
}

impl<D> QuadratureRule<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    /// # Panics
    ///
    /// Panics if the number of weights and points differ.
    pub fn from_weights_and_points(weights: Vec<f64>, points: Vec<OPoint<f64, D>>) -> Self {
        assert_eq!(weights.len(), points.len(), "Weights and points must have the same length.");
        Self { weights, points }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[OPoint<f64, D>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &OPoint<f64, D>)> {
        self.weights.iter().copied().zip(self.points.iter())
    }

    /// Approximates the integral of the given function over the reference domain.
    pub fn integrate(&self, f: impl Fn(&OPoint<f64, D>) -> f64) -> f64 {
        self.iter().map(|(w, xi)| w * f(xi)).sum()
    }
}

const MAX_NEWTON_ITERATIONS: usize = 100;

/// Evaluates the Legendre polynomial of degree `n` and its derivative at `x`.
fn legendre_value_and_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p_prev = 1.0;
    let mut p = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for k in 1..n {
        let k = k as f64;
        let p_next = ((2.0 * k + 1.0) * x * p - k * p_prev) / (k + 1.0);
        p_prev = p;
        p = p_next;
    }
    let dp = (n as f64) * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// The `num_points`-point Gauss-Legendre rule on `[-1, 1]`.
///
/// The rule integrates polynomials of degree `2 * num_points - 1` exactly.
///
/// # Panics
///
/// Panics if `num_points` is zero.
pub fn gauss(num_points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = num_points;
    assert!(n > 0, "Number of points must be positive.");

    let m = (n + 1) / 2;
    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    // Roots are symmetric about the origin, so only the first half is computed
    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p, dp) = legendre_value_and_derivative(n, x);
            let dx = -p / dp;
            x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_value_and_derivative(n, x);
        points.push(x);
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
    }

    for i in m..n {
        let mirror = n - i - 1;
        points.push(-points[mirror]);
        weights.push(weights[mirror]);
    }

    (weights, points)
}

/// Number of Gauss points needed to integrate a univariate polynomial of the given degree.
fn gauss_points_for_degree(degree: usize) -> usize {
    degree / 2 + 1
}

/// A tensor-product Gauss rule on the reference quadrilateral `[-1, 1]^2`,
/// exact for polynomials of degree `strength` in each variable.
pub fn quadrilateral_gauss(strength: usize) -> QuadratureRule<U2> {
    let (w, x) = gauss(gauss_points_for_degree(strength));
    let (weights, points) = iproduct!(0..x.len(), 0..x.len())
        .map(|(j, i)| (w[i] * w[j], Point2::new(x[i], x[j])))
        .unzip();
    QuadratureRule { weights, points }
}

/// A tensor-product Gauss rule on the reference hexahedron `[-1, 1]^3`,
/// exact for polynomials of degree `strength` in each variable.
pub fn hexahedron_gauss(strength: usize) -> QuadratureRule<U3> {
    let (w, x) = gauss(gauss_points_for_degree(strength));
    let (weights, points) = iproduct!(0..x.len(), 0..x.len(), 0..x.len())
        .map(|(k, j, i)| (w[i] * w[j] * w[k], Point3::new(x[i], x[j], x[k])))
        .unzip();
    QuadratureRule { weights, points }
}

/// A collapsed Gauss rule on the reference triangle with vertices
/// `(-1, -1)`, `(1, -1)` and `(-1, 1)`, exact for polynomials of total degree `strength`.
pub fn triangle_collapsed_gauss(strength: usize) -> QuadratureRule<U2> {
    let (wu, u) = gauss(gauss_points_for_degree(strength));
    // The collapsing map contributes a factor linear in v
    let (wv, v) = gauss(gauss_points_for_degree(strength + 1));
    let (weights, points) = iproduct!(0..v.len(), 0..u.len())
        .map(|(j, i)| {
            let (u, v) = (u[i], v[j]);
            let xi = 0.5 * (1.0 + u) * (1.0 - v) - 1.0;
            let det = 0.5 * (1.0 - v);
            (wu[i] * wv[j] * det, Point2::new(xi, v))
        })
        .unzip();
    QuadratureRule { weights, points }
}

/// A collapsed Gauss rule on the reference tetrahedron with vertices
/// `(-1, -1, -1)`, `(1, -1, -1)`, `(-1, 1, -1)` and `(-1, -1, 1)`,
/// exact for polynomials of total degree `strength`.
pub fn tetrahedron_collapsed_gauss(strength: usize) -> QuadratureRule<U3> {
    let (wu, u) = gauss(gauss_points_for_degree(strength));
    let (wv, v) = gauss(gauss_points_for_degree(strength + 1));
    let (ww, w) = gauss(gauss_points_for_degree(strength + 2));
    let (weights, points) = iproduct!(0..w.len(), 0..v.len(), 0..u.len())
        .map(|(k, j, i)| {
            let (u, v, w) = (u[i], v[j], w[k]);
            let x = 0.25 * (1.0 + u) * (1.0 - v) * (1.0 - w) - 1.0;
            let y = 0.5 * (1.0 + v) * (1.0 - w) - 1.0;
            let det = 0.125 * (1.0 - v) * (1.0 - w) * (1.0 - w);
            (wu[i] * wv[j] * ww[k] * det, Point3::new(x, y, w))
        })
        .unzip();
    QuadratureRule { weights, points }
}
