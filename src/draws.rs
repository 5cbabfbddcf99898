//! Labeled posterior draws and the selection pipeline every accessor
//! goes through.
//!
//! Raw draws are stored as a (draw, label, chain) array. Selection drops
//! warmup draws, keeps a prefix of the rest, and optionally collapses
//! chains into the draw axis. Chains are collapsed chain-major: all
//! draws of chain 0, then all draws of chain 1, and so on.

use std::collections::HashMap;
use std::fmt;

use log::warn;
use ndarray::{s, Array2, Array3, ArrayD, ArrayView1, ArrayView3, Axis};

use crate::error::{GlmError, Result};

/// Meaning of an array axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Draw,
    Chain,
    Parameter,
    Observation,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    /// Leading draws of every chain to discard.
    pub drop_warmup: usize,
    /// Keep at most this many draws per chain after the warmup drop.
    /// `None` or `Some(0)` keeps everything.
    pub n_draws: Option<usize>,
    /// Merge the chain axis into the draw axis.
    pub collapse: bool,
    /// Remove length one axes from accessor results.
    pub drop_singleton_dims: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            drop_warmup: 200,
            n_draws: None,
            collapse: true,
            drop_singleton_dims: true,
        }
    }
}

/// Draws of a set of labeled quantities, indexed (draw, label, chain).
#[derive(Debug, Clone, PartialEq)]
pub struct Draws {
    values: Array3<f64>,
    labels: Vec<String>,
    index: HashMap<String, usize>,
    label_dim: Dim,
}

fn build_index(labels: &[String]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(labels.len());
    for (i, label) in labels.iter().enumerate() {
        if index.insert(label.clone(), i).is_some() {
            return Err(GlmError::DuplicateName(label.clone()));
        }
    }
    Ok(index)
}

impl Draws {
    pub fn new(values: Array3<f64>, labels: Vec<String>) -> Result<Self> {
        if values.len_of(Axis(1)) != labels.len() {
            return Err(GlmError::DimensionMismatch {
                context: "draw labels",
                expected: values.len_of(Axis(1)),
                actual: labels.len(),
            });
        }
        let index = build_index(&labels)?;
        Ok(Self {
            values,
            labels,
            index,
            label_dim: Dim::Parameter,
        })
    }

    pub fn with_label_dim(mut self, dim: Dim) -> Self {
        self.label_dim = dim;
        self
    }

    pub fn values(&self) -> ArrayView3<'_, f64> {
        self.values.view()
    }

    pub(crate) fn values_mut(&mut self) -> &mut Array3<f64> {
        &mut self.values
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label_dim(&self) -> Dim {
        self.label_dim
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Draws per chain.
    pub fn num_draws(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn num_chains(&self) -> usize {
        self.values.len_of(Axis(2))
    }

    /// Keep only the given labels, in the given order.
    pub fn subset<S: AsRef<str>>(&self, labels: &[S]) -> Result<Draws> {
        let positions = labels
            .iter()
            .map(|label| {
                self.position(label.as_ref())
                    .ok_or_else(|| GlmError::UnknownParameter(label.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        let values = self.values.select(Axis(1), &positions);
        let labels = labels.iter().map(|l| l.as_ref().to_string()).collect();
        Ok(Draws::new(values, labels)?.with_label_dim(self.label_dim))
    }

    /// Apply warmup drop and draw limit; the result is still (draw, label, chain).
    pub(crate) fn window(&self, opts: &SelectOptions) -> Result<ArrayView3<'_, f64>> {
        let (start, keep) = window_bounds(self.num_draws(), opts)?;
        Ok(self.values.slice(s![start..start + keep, .., ..]))
    }

    pub fn select(&self, opts: &SelectOptions) -> Result<DrawArray> {
        let window = self.window(opts)?;
        DrawArray::from_chains(
            window.to_owned(),
            self.labels.clone(),
            self.label_dim,
            opts.collapse,
        )
    }
}

/// Returns the first kept draw and the number of draws kept per chain.
pub(crate) fn window_bounds(total: usize, opts: &SelectOptions) -> Result<(usize, usize)> {
    let requested = opts.n_draws.unwrap_or(0);
    if opts.drop_warmup > total {
        return Err(GlmError::InconsistentSelection {
            drop_warmup: opts.drop_warmup,
            requested,
            total,
        });
    }
    let remaining = total - opts.drop_warmup;
    let keep = match opts.n_draws {
        None | Some(0) => remaining,
        Some(_) if remaining == 0 => {
            return Err(GlmError::InconsistentSelection {
                drop_warmup: opts.drop_warmup,
                requested,
                total,
            })
        }
        Some(n) => n.min(remaining),
    };
    if keep == 0 {
        warn!(
            "dropping {} warmup draws leaves no draws out of {total} per chain",
            opts.drop_warmup
        );
    }
    Ok((opts.drop_warmup, keep))
}

/// Merge (draw, x, chain) into (chain * draw, x), chain-major.
pub(crate) fn collapse_chains(values: Array3<f64>) -> Result<Array2<f64>> {
    let (draws, width, chains) = values.dim();
    let by_chain = values.permuted_axes([2, 0, 1]);
    Ok(by_chain
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((chains * draws, width))?)
}

/// Summary applied along the draw axis.
#[derive(Clone, Copy)]
pub enum Reducer {
    Mean,
    Median,
    /// Sample standard deviation.
    Std,
    Quantile(f64),
    Custom(fn(ArrayView1<'_, f64>) -> f64),
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Mean => f.write_str("Mean"),
            Reducer::Median => f.write_str("Median"),
            Reducer::Std => f.write_str("Std"),
            Reducer::Quantile(q) => write!(f, "Quantile({q})"),
            Reducer::Custom(_) => f.write_str("Custom"),
        }
    }
}

pub(crate) fn mean(values: ArrayView1<f64>) -> f64 {
    values.sum() / values.len() as f64
}

pub(crate) fn sample_std(values: ArrayView1<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Linearly interpolated quantile, the default definition in R and numpy.
pub(crate) fn quantile(values: ArrayView1<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

impl Reducer {
    fn check(&self) -> Result<()> {
        match self {
            Reducer::Quantile(q) if !(0. ..=1.).contains(q) => Err(GlmError::InvalidArgument(
                format!("quantile {q} is outside [0, 1]"),
            )),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, values: ArrayView1<f64>) -> f64 {
        match self {
            Reducer::Mean => mean(values),
            Reducer::Median => quantile(values, 0.5),
            Reducer::Std => sample_std(values),
            Reducer::Quantile(q) => quantile(values, *q),
            Reducer::Custom(func) => func(values),
        }
    }
}

/// An n-dimensional array of draws with tagged axes.
///
/// One axis (`label_dim`) is labeled, the labels stay known even when
/// that axis has been dropped for having length one.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawArray {
    values: ArrayD<f64>,
    dims: Vec<Dim>,
    labels: Vec<String>,
    label_dim: Dim,
}

impl DrawArray {
    pub(crate) fn new(
        values: ArrayD<f64>,
        dims: Vec<Dim>,
        labels: Vec<String>,
        label_dim: Dim,
    ) -> Result<Self> {
        if values.ndim() != dims.len() {
            return Err(GlmError::DimensionMismatch {
                context: "array dimensions",
                expected: dims.len(),
                actual: values.ndim(),
            });
        }
        if let Some(pos) = dims.iter().position(|&d| d == label_dim) {
            if values.len_of(Axis(pos)) != labels.len() {
                return Err(GlmError::DimensionMismatch {
                    context: "array labels",
                    expected: values.len_of(Axis(pos)),
                    actual: labels.len(),
                });
            }
        }
        Ok(Self {
            values,
            dims,
            labels,
            label_dim,
        })
    }

    /// Build from a (draw, label, chain) array, optionally collapsing chains.
    pub(crate) fn from_chains(
        values: Array3<f64>,
        labels: Vec<String>,
        label_dim: Dim,
        collapse: bool,
    ) -> Result<Self> {
        if collapse {
            let values = collapse_chains(values)?.into_dyn();
            Self::new(values, vec![Dim::Draw, label_dim], labels, label_dim)
        } else {
            Self::new(
                values.into_dyn(),
                vec![Dim::Draw, label_dim, Dim::Chain],
                labels,
                label_dim,
            )
        }
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn axis(&self, dim: Dim) -> Option<Axis> {
        self.dims.iter().position(|&d| d == dim).map(Axis)
    }

    /// Length along `dim`; an absent axis counts as length one.
    pub fn len_of(&self, dim: Dim) -> usize {
        self.axis(dim).map_or(1, |ax| self.values.len_of(ax))
    }

    pub fn num_draws(&self) -> usize {
        self.len_of(Dim::Draw)
    }

    /// The slice belonging to one label.
    pub fn get(&self, label: &str) -> Result<ArrayD<f64>> {
        let pos = self
            .labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| GlmError::UnknownParameter(label.to_string()))?;
        match self.axis(self.label_dim) {
            Some(ax) => Ok(self.values.index_axis(ax, pos).to_owned()),
            None => Ok(self.values.clone()),
        }
    }

    /// Summarize along the draw axis, which disappears from the result.
    pub fn reduce(&self, reducer: Reducer) -> Result<DrawArray> {
        reducer.check()?;
        let Some(ax) = self.axis(Dim::Draw) else {
            return Err(GlmError::InvalidArgument(
                "array has no draw axis to reduce".to_string(),
            ));
        };
        let values = self.values.map_axis(ax, |lane| reducer.apply(lane));
        let dims = self
            .dims
            .iter()
            .copied()
            .filter(|&d| d != Dim::Draw)
            .collect();
        DrawArray::new(values, dims, self.labels.clone(), self.label_dim)
    }

    pub fn drop_singleton_dims(mut self) -> DrawArray {
        for i in (0..self.values.ndim()).rev() {
            if self.values.len_of(Axis(i)) == 1 {
                self.values = self.values.index_axis_move(Axis(i), 0);
                self.dims.remove(i);
            }
        }
        self
    }

    /// Optional reduction, then optional singleton removal.
    pub fn finish(self, reduce: Option<Reducer>, drop_singleton: bool) -> Result<DrawArray> {
        let reduced = match reduce {
            Some(r) => self.reduce(r)?,
            None => self,
        };
        Ok(if drop_singleton {
            reduced.drop_singleton_dims()
        } else {
            reduced
        })
    }
}
