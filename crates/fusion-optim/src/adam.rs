//! Adam with bias correction.

use fusion_core::Real;
use nalgebra::DVector;

#[derive(Debug, Clone)]
pub struct Adam {
    beta1: Real,
    beta2: Real,
    eps: Real,
    m: DVector<Real>,
    v: DVector<Real>,
    t: i32,
}

impl Adam {
    pub fn new(dim: usize, beta1: Real, beta2: Real, eps: Real) -> Self {
        Self {
            beta1,
            beta2,
            eps,
            m: DVector::zeros(dim),
            v: DVector::zeros(dim),
            t: 0,
        }
    }

    /// Descent step to subtract from the parameters.
    pub fn step(&mut self, grad: &DVector<Real>, lr: Real) -> DVector<Real> {
        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        self.m = &self.m * b1 + grad * (1.0 - b1);
        self.v = &self.v * b2 + grad.component_mul(grad) * (1.0 - b2);
        let c1 = 1.0 - b1.powi(self.t);
        let c2 = 1.0 - b2.powi(self.t);
        DVector::from_fn(grad.len(), |i, _| {
            let m_hat = self.m[i] / c1;
            let v_hat = self.v[i] / c2;
            lr * m_hat / (v_hat.sqrt() + self.eps)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LrSchedule;

    #[test]
    fn first_step_has_magnitude_lr() {
        let mut adam = Adam::new(3, 0.9, 0.9, 1e-8);
        let g = DVector::from_vec(vec![2.0, -0.5, 0.0]);
        let s = adam.step(&g, 0.1);
        assert!((s[0] - 0.1).abs() < 1e-6);
        assert!((s[1] + 0.1).abs() < 1e-6);
        assert_eq!(s[2], 0.0);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut adam = Adam::new(2, 0.9, 0.9, 1e-8);
        let mut x = DVector::from_vec(vec![3.0, -2.0]);
        for i in 0..500 {
            let g = &x * 2.0;
            let lr = LrSchedule::Cosine.lr_at(i, 500, 0.05, 1e-5);
            x -= adam.step(&g, lr);
        }
        assert!(x.norm() < 1e-2, "x = {x}");
    }
}
