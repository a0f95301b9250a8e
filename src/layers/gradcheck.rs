//! Finite-difference gradient checks shared by the layer tests.
//!
//! The scalar objective is `L = sum(forward(x) * G)` for a fixed random `G`,
//! so `dL/dx` is exactly what `backward(G)` should return.

use crate::error::Result;
use crate::tensor::{Blob, Fill};
use rand::Rng;

const EPS: f64 = 1e-5;
const TOL: f64 = 1e-6;

fn objective(y: &Blob, g: &Blob) -> f64 {
    y.data().iter().zip(g.data()).map(|(a, b)| a * b).sum()
}

fn numeric_gradient<F>(x: &Blob, g: &Blob, forward: &F) -> Vec<f64>
where
    F: Fn(&Blob) -> Result<Blob>,
{
    (0..x.data().len())
        .map(|i| {
            let mut plus = x.clone();
            plus.data_mut()[i] += EPS;
            let mut minus = x.clone();
            minus.data_mut()[i] -= EPS;
            let lp = objective(&forward(&plus).unwrap(), g);
            let lm = objective(&forward(&minus).unwrap(), g);
            (lp - lm) / (2.0 * EPS)
        })
        .collect()
}

fn assert_close(numeric: &[f64], analytic: &[f64], scale: f64, what: &str) {
    assert_eq!(numeric.len(), analytic.len());
    for (i, (&n, &a)) in numeric.iter().zip(analytic).enumerate() {
        let a = a * scale;
        let tol = TOL * (1.0 + n.abs().max(a.abs()));
        assert!(
            (n - a).abs() <= tol,
            "{} gradient mismatch at {}: numeric {} vs analytic {}",
            what,
            i,
            n,
            a
        );
    }
}

/// Compare `backward(x, G)` against central differences of the forward pass
pub(crate) fn check_input_gradient<R, F, B>(x: &Blob, rng: &mut R, forward: F, backward: B)
where
    R: Rng + ?Sized,
    F: Fn(&Blob) -> Result<Blob>,
    B: Fn(&Blob, &Blob) -> Result<Blob>,
{
    let y = forward(x).unwrap();
    let g = Blob::new(y.shape(), Fill::RandomNormal, rng);
    let analytic = backward(x, &g).unwrap();
    assert_eq!(analytic.shape(), x.shape());
    let numeric = numeric_gradient(x, &g, &forward);
    assert_close(&numeric, analytic.data(), 1.0, "input");
}

/// Same as [`check_input_gradient`] for a parameter blob
///
/// `scale` multiplies the analytic gradient before comparison; pass the batch
/// size for parameters whose gradient is averaged over the batch.
pub(crate) fn check_param_gradient<R, F, B>(
    param: &Blob,
    scale: f64,
    rng: &mut R,
    forward: F,
    backward: B,
) where
    R: Rng + ?Sized,
    F: Fn(&Blob) -> Result<Blob>,
    B: Fn(&Blob, &Blob) -> Result<Blob>,
{
    let y = forward(param).unwrap();
    let g = Blob::new(y.shape(), Fill::RandomNormal, rng);
    let analytic = backward(param, &g).unwrap();
    assert_eq!(analytic.shape(), param.shape());
    let numeric = numeric_gradient(param, &g, &forward);
    assert_close(&numeric, analytic.data(), scale, "parameter");
}
