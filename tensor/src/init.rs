//! Parameter initialisers.

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// He/Kaiming normal initialisation: `N(0, sqrt(2 / fan))`.
///
/// A `fan` of zero yields an all-zero array.
pub fn kaiming_normal<Sh, D, R>(shape: Sh, fan: usize, rng: &mut R) -> Array<f32, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    let std_dev = if fan == 0 {
        0.0
    } else {
        (2.0 / fan as f32).sqrt()
    };
    match Normal::new(0.0_f32, std_dev) {
        Ok(normal) => Array::from_shape_simple_fn(shape, || normal.sample(rng)),
        Err(_) => Array::zeros(shape),
    }
}

/// Uniform initialisation over `[-bound, bound)`.
pub fn uniform<Sh, D, R>(shape: Sh, bound: f32, rng: &mut R) -> Array<f32, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    if bound <= 0.0 {
        return Array::zeros(shape);
    }
    Array::from_shape_simple_fn(shape, || rng.random_range(-bound..bound))
}
