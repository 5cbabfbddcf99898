use crate::math::{axpy, axpy_out, vector_dot};
use crate::nuts::Direction;

/// A point in phase space together with the running momentum sum
/// needed for the no-u-turn criterion.
///
/// Points with a non-negative index accumulate the momenta from the
/// initial point up to and including themselves. Points with a negative
/// index accumulate the momenta from themselves up to index -1.
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub(crate) p: Box<[f64]>,
    pub(crate) q: Box<[f64]>,
    pub(crate) v: Box<[f64]>,
    pub(crate) p_sum: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) idx_in_trajectory: i64,
    pub(crate) kinetic_energy: f64,
    pub(crate) potential_energy: f64,
}

impl State {
    pub(crate) fn new(dim: usize) -> State {
        State {
            p: vec![0.; dim].into(),
            q: vec![0.; dim].into(),
            v: vec![0.; dim].into(),
            p_sum: vec![0.; dim].into(),
            grad: vec![0.; dim].into(),
            idx_in_trajectory: 0,
            kinetic_energy: 0.,
            potential_energy: 0.,
        }
    }

    pub(crate) fn energy(&self) -> f64 {
        self.kinetic_energy + self.potential_energy
    }

    pub(crate) fn index_in_trajectory(&self) -> i64 {
        self.idx_in_trajectory
    }

    pub(crate) fn log_acceptance_probability(&self, initial_energy: f64) -> f64 {
        (initial_energy - self.energy()).min(0.)
    }

    /// Make this the first point of a new trajectory.
    pub(crate) fn make_init_point(&mut self) {
        self.idx_in_trajectory = 0;
        self.p_sum.copy_from_slice(&self.p);
    }

    pub(crate) fn is_turning(&self, other: &State) -> bool {
        let (start, end) = if self.idx_in_trajectory < other.idx_in_trajectory {
            (self, other)
        } else {
            (other, self)
        };

        let rho: Vec<f64> = match (start.idx_in_trajectory >= 0, end.idx_in_trajectory >= 0) {
            (true, true) => itertools::izip!(&*end.p_sum, &*start.p_sum, &*start.p)
                .map(|(e, s, p)| e - s + p)
                .collect(),
            (false, true) => end
                .p_sum
                .iter()
                .zip(&*start.p_sum)
                .map(|(e, s)| e + s)
                .collect(),
            _ => itertools::izip!(&*start.p_sum, &*end.p_sum, &*end.p)
                .map(|(s, e, p)| s - e + p)
                .collect(),
        };

        (vector_dot(&rho, &start.v) < 0.) | (vector_dot(&rho, &end.v) < 0.)
    }

    pub(crate) fn first_momentum_halfstep(&self, out: &mut State, epsilon: f64) {
        axpy_out(&self.p, &self.grad, epsilon / 2., &mut out.p);
    }

    pub(crate) fn position_step(&self, out: &mut State, epsilon: f64) {
        axpy_out(&self.q, &out.v, epsilon, &mut out.q);
    }

    pub(crate) fn second_momentum_halfstep(&mut self, epsilon: f64) {
        axpy(&self.grad, &mut self.p, epsilon / 2.);
    }

    pub(crate) fn set_psum(&self, target: &mut State, dir: Direction) {
        let extends_negative = matches!(dir, Direction::Backward) && self.idx_in_trajectory == 0;
        if extends_negative {
            target.p_sum.copy_from_slice(&target.p);
        } else {
            axpy_out(&self.p_sum, &target.p, 1., &mut target.p_sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(idx: i64, p: f64, v: f64) -> State {
        let mut state = State::new(1);
        state.idx_in_trajectory = idx;
        state.p[0] = p;
        state.v[0] = v;
        state
    }

    #[test]
    fn momentum_sums_cover_the_trajectory() {
        let mut init = point(0, 1., 1.);
        init.make_init_point();

        let mut forward = point(1, 2., 1.);
        init.set_psum(&mut forward, Direction::Forward);
        assert_eq!(forward.p_sum[0], 3.);

        let mut backward = point(-1, 4., 1.);
        init.set_psum(&mut backward, Direction::Backward);
        assert_eq!(backward.p_sum[0], 4.);

        let mut further = point(-2, 8., 1.);
        backward.set_psum(&mut further, Direction::Backward);
        assert_eq!(further.p_sum[0], 12.);
    }

    #[test]
    fn turning_when_momentum_reverses() {
        let mut init = point(0, 1., 1.);
        init.make_init_point();
        let mut end = point(1, -3., -3.);
        init.set_psum(&mut end, Direction::Forward);
        // rho = 1 - 3 = -2, opposite to the initial velocity
        assert!(init.is_turning(&end));
        assert!(end.is_turning(&init));

        let mut end = point(1, 2., 2.);
        init.set_psum(&mut end, Direction::Forward);
        assert!(!init.is_turning(&end));
    }
}
