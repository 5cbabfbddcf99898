use itertools::izip;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

pub(crate) fn log_sum_exp(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, |acc, val| {
        if acc == f64::NEG_INFINITY {
            val
        } else if val == f64::NEG_INFINITY {
            acc
        } else {
            logaddexp(acc, val)
        }
    })
}

pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += a * x`
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    assert!(x.len() == y.len());
    y.iter_mut().zip(x).for_each(|(y, &x)| *y = a.mul_add(x, *y));
}

/// `out = x + a * y`
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    assert!(x.len() == out.len());
    assert!(y.len() == out.len());
    izip!(x, y, out).for_each(|(&x, &y, out)| *out = a.mul_add(y, x));
}

pub(crate) fn multiply(x: &[f64], y: &[f64], out: &mut [f64]) {
    assert!(x.len() == out.len());
    assert!(y.len() == out.len());
    izip!(x, y, out).for_each(|(&x, &y, out)| *out = x * y);
}

/// Numerically stable `1 / (1 + exp(-x))`.
#[inline]
pub(crate) fn logistic(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

/// Numerically stable `ln(1 + exp(x))`.
#[inline]
pub(crate) fn log1p_exp(x: f64) -> f64 {
    if x > 0. {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// 1-based ranks; tied values share the average of their ranks.
pub(crate) fn average_ranks(values: &[f64]) -> Vec<f64> {
    let count = values.len();
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0f64; count];
    let mut start = 0;
    while start < count {
        let mut end = start + 1;
        while end < count && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn check_logaddexp() {
        let x = logaddexp(1., 2.);
        assert_relative_eq!(x, (1f64.exp() + 2f64.exp()).ln(), epsilon = 1e-12);
        assert_relative_eq!(logaddexp(3., 3.), 3. + 2f64.ln(), epsilon = 1e-12);
        assert!(logaddexp(f64::NAN, 1.).is_nan());
    }

    #[test]
    fn check_log_sum_exp() {
        let vals = [0.5, -1., 2.];
        let expect = vals.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        assert_relative_eq!(log_sum_exp(vals.into_iter()), expect, epsilon = 1e-12);
        assert_eq!(log_sum_exp(std::iter::empty()), f64::NEG_INFINITY);
        assert_relative_eq!(
            log_sum_exp([f64::NEG_INFINITY, 0.].into_iter()),
            0.,
            epsilon = 1e-12
        );
    }

    #[test]
    fn check_axpy() {
        let x = [1., 2., 3.];
        let mut y = [1., 1., 1.];
        axpy(&x, &mut y, 2.);
        assert_eq!(y, [3., 5., 7.]);

        let mut out = [0.; 3];
        axpy_out(&x, &y, -1., &mut out);
        assert_eq!(out, [-2., -3., -4.]);

        multiply(&x, &y, &mut out);
        assert_eq!(out, [3., 10., 21.]);
        assert_eq!(vector_dot(&x, &y), 34.);
    }

    #[test]
    fn check_average_ranks() {
        assert_eq!(average_ranks(&[3., 1., 2., 1.]), vec![4., 1.5, 3., 1.5]);
        assert!(average_ranks(&[]).is_empty());
    }

    #[test]
    fn check_logistic() {
        assert_relative_eq!(logistic(0.), 0.5);
        assert_relative_eq!(logistic(40.), 1., epsilon = 1e-12);
        assert!(logistic(-800.) >= 0.);
        assert_relative_eq!(logistic(2.) + logistic(-2.), 1., epsilon = 1e-12);
        assert_relative_eq!(log1p_exp(0.), 2f64.ln());
        assert_relative_eq!(log1p_exp(800.), 800.);
        assert_relative_eq!(log1p_exp(-3.), (1. + (-3f64).exp()).ln(), epsilon = 1e-12);
    }
}
