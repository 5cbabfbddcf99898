//! Zero-mean, unit-variance scaling of the data and the matching affine
//! maps between standardized and raw-scale coefficient draws.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::density::ParameterLayout;
use crate::draws::{mean, sample_std, Draws};
use crate::error::{GlmError, Result};

/// Returns `(mean, std, (v - mean) / std)` using the sample standard deviation.
pub fn standardize_vector(values: ArrayView1<f64>, name: &str) -> Result<(f64, f64, Array1<f64>)> {
    let sd = sample_std(values);
    if !(sd > 0. && sd.is_finite()) {
        return Err(GlmError::ConstantColumn(name.to_string()));
    }
    let mu = mean(values);
    Ok((mu, sd, values.mapv(|v| (v - mu) / sd)))
}

/// Column-wise [`standardize_vector`]; `names` labels the columns in errors.
pub fn standardize_columns(
    x: ArrayView2<f64>,
    names: &[String],
) -> Result<(Array1<f64>, Array1<f64>, Array2<f64>)> {
    let k = x.ncols();
    let mut mu = Array1::zeros(k);
    let mut sd = Array1::zeros(k);
    let mut out = Array2::zeros(x.raw_dim());
    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        let name = names.get(j).map_or("?", String::as_str);
        let (m, s, z) = standardize_vector(column, name)?;
        mu[j] = m;
        sd[j] = s;
        out.column_mut(j).assign(&z);
    }
    Ok((mu, sd, out))
}

/// Scaling applied to the data before sampling.
///
/// Dimensions that were not standardized have mean 0 and sd 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaling {
    pub mu_x: Array1<f64>,
    pub sigma_x: Array1<f64>,
    pub mu_y: f64,
    pub sigma_y: f64,
}

struct Slots {
    alpha: usize,
    coefficients: Vec<usize>,
    scales: Vec<usize>,
}

impl Scaling {
    pub fn identity(num_predictors: usize) -> Self {
        Self {
            mu_x: Array1::zeros(num_predictors),
            sigma_x: Array1::ones(num_predictors),
            mu_y: 0.,
            sigma_y: 1.,
        }
    }

    pub fn num_predictors(&self) -> usize {
        self.mu_x.len()
    }

    /// Scale raw predictors the way the training data was scaled.
    pub fn transform_x(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.num_predictors() {
            return Err(GlmError::DimensionMismatch {
                context: "predictor columns",
                expected: self.num_predictors(),
                actual: x.ncols(),
            });
        }
        Ok((&x - &self.mu_x) / &self.sigma_x)
    }

    /// Map a standardized outcome value back to the raw outcome scale.
    pub fn inverse_y(&self, value: f64) -> f64 {
        value * self.sigma_y + self.mu_y
    }

    fn slots(&self, draws: &Draws, layout: &ParameterLayout) -> Result<Slots> {
        if layout.num_coefficients() != self.num_predictors() {
            return Err(GlmError::DimensionMismatch {
                context: "scaling coefficients",
                expected: self.num_predictors(),
                actual: layout.num_coefficients(),
            });
        }
        let names = layout.display_names();
        let find = |slot: usize| {
            draws
                .position(&names[slot])
                .ok_or_else(|| GlmError::UnknownParameter(names[slot].clone()))
        };
        Ok(Slots {
            alpha: find(0)?,
            coefficients: layout.coefficients().map(find).collect::<Result<_>>()?,
            scales: layout.scale_slots().map(find).collect::<Result<_>>()?,
        })
    }

    /// Standardized-model draws to raw-scale draws, per draw and chain.
    ///
    /// ```text
    /// beta_raw[k] = beta[k] * sigma_y / sigma_x[k]
    /// alpha_raw   = mu_y + sigma_y * (alpha - sum_k beta[k] * mu_x[k] / sigma_x[k])
    /// scale_raw   = scale * sigma_y
    /// ```
    ///
    /// Shape parameters and every label outside the layout are copied.
    pub fn unstandardize(&self, draws: &Draws, layout: &ParameterLayout) -> Result<Draws> {
        let slots = self.slots(draws, layout)?;
        let mut out = draws.clone();
        for mut lane in out.values_mut().lanes_mut(Axis(1)) {
            let mut shift = 0.;
            for (k, &pos) in slots.coefficients.iter().enumerate() {
                let beta = lane[pos];
                shift += beta * self.mu_x[k] / self.sigma_x[k];
                lane[pos] = beta * self.sigma_y / self.sigma_x[k];
            }
            lane[slots.alpha] = self.mu_y + self.sigma_y * (lane[slots.alpha] - shift);
            for &pos in &slots.scales {
                lane[pos] *= self.sigma_y;
            }
        }
        Ok(out)
    }

    /// The inverse of [`Scaling::unstandardize`].
    pub fn restandardize(&self, draws: &Draws, layout: &ParameterLayout) -> Result<Draws> {
        let slots = self.slots(draws, layout)?;
        let mut out = draws.clone();
        for mut lane in out.values_mut().lanes_mut(Axis(1)) {
            let mut shift = 0.;
            for (k, &pos) in slots.coefficients.iter().enumerate() {
                let beta = lane[pos] * self.sigma_x[k] / self.sigma_y;
                shift += beta * self.mu_x[k] / self.sigma_x[k];
                lane[pos] = beta;
            }
            lane[slots.alpha] = (lane[slots.alpha] - self.mu_y) / self.sigma_y + shift;
            for &pos in &slots.scales {
                lane[pos] /= self.sigma_y;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::Family;
    use approx::assert_relative_eq;
    use ndarray::{array, Array, Array3};
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    #[test]
    fn standardizing_twice_is_stable() {
        let x = array![[1., 10.], [2., 30.], [4., 20.], [8., 60.]];
        let names = vec!["a".to_string(), "b".to_string()];
        let (_, _, once) = standardize_columns(x.view(), &names).unwrap();
        let (mu, sd, twice) = standardize_columns(once.view(), &names).unwrap();
        for j in 0..2 {
            assert!(mu[j].abs() < 1e-10);
            assert!((sd[j] - 1.).abs() < 1e-10);
            assert!(mean(twice.column(j)).abs() < 1e-10);
            assert!((sample_std(twice.column(j)) - 1.).abs() < 1e-10);
        }
    }

    #[test]
    fn constant_column_is_rejected() {
        let x = array![[1., 3.], [2., 3.], [4., 3.]];
        let err = standardize_columns(x.view(), &["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, GlmError::ConstantColumn(name) if name == "b"));
        assert!(standardize_vector(array![1.].view(), "y").is_err());
    }

    fn setup() -> (Scaling, ParameterLayout, Draws) {
        let layout =
            ParameterLayout::new(&["wt".to_string(), "hp".to_string()], Family::StudentT).unwrap();
        let scaling = Scaling {
            mu_x: array![3.2, 146.7],
            sigma_x: array![0.98, 68.6],
            mu_y: 20.1,
            sigma_y: 6.03,
        };
        let mut rng = SmallRng::seed_from_u64(11);
        // alpha, wt, hp, sigma, nu, lp
        let values: Array3<f64> =
            Array::from_shape_simple_fn((20, 6, 3), || rng.random_range(0.1..2.));
        let mut labels: Vec<String> = layout.display_names().to_vec();
        labels.push("lp".into());
        (scaling, layout, Draws::new(values, labels).unwrap())
    }

    #[test]
    fn round_trip() {
        let (scaling, layout, draws) = setup();
        let raw = scaling.unstandardize(&draws, &layout).unwrap();
        let back = scaling.restandardize(&raw, &layout).unwrap();
        for (a, b) in back.values().iter().zip(draws.values().iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-9);
        }
        let nu = draws.position("nu").unwrap();
        let lp = draws.position("lp").unwrap();
        let sigma = draws.position("sigma").unwrap();
        assert_eq!(
            raw.values().index_axis(Axis(1), nu),
            draws.values().index_axis(Axis(1), nu)
        );
        assert_eq!(
            raw.values().index_axis(Axis(1), lp),
            draws.values().index_axis(Axis(1), lp)
        );
        assert_relative_eq!(
            raw.values()[[4, sigma, 1]],
            draws.values()[[4, sigma, 1]] * 6.03
        );
    }

    #[test]
    fn raw_coefficients_predict_the_same() {
        let (scaling, layout, draws) = setup();
        let raw = scaling.unstandardize(&draws, &layout).unwrap();
        let x_raw = array![[2.5, 110.], [3.9, 245.]];
        let x_std = scaling.transform_x(x_raw.view()).unwrap();
        for (std_lane, raw_lane) in draws
            .values()
            .lanes(Axis(1))
            .into_iter()
            .zip(raw.values().lanes(Axis(1)))
        {
            for i in 0..2 {
                let eta_std = std_lane[0] + std_lane[1] * x_std[[i, 0]] + std_lane[2] * x_std[[i, 1]];
                let eta_raw = raw_lane[0] + raw_lane[1] * x_raw[[i, 0]] + raw_lane[2] * x_raw[[i, 1]];
                assert_relative_eq!(scaling.inverse_y(eta_std), eta_raw, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn identity_leaves_draws_alone() {
        let (_, layout, draws) = setup();
        let raw = Scaling::identity(2).unstandardize(&draws, &layout).unwrap();
        for (a, b) in raw.values().iter().zip(draws.values().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        assert!(Scaling::identity(3).unstandardize(&draws, &layout).is_err());
        assert!(Scaling::identity(3).transform_x(array![[1., 2.]].view()).is_err());
    }
}
