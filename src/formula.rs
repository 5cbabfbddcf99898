//! Formula parsing and model-frame construction.
//!
//! Only the fixed-effects subset of the R formula syntax is understood:
//!
//! - `y ~ a + b` main effects
//! - `y ~ a:b` interaction only
//! - `y ~ a * b` expands to `a + b + a:b`
//! - `y ~ 1` intercept only
//!
//! Grouping terms such as `(1 | g)` are recognized so that they can be
//! rejected by the model, never fitted.

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{GlmError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Main(String),
    /// Element-wise product of two or more columns.
    Interaction(Vec<String>),
}

impl Term {
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// Column name of the term in the design matrix.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Main(v) => f.write_str(v),
            Term::Interaction(vs) => f.write_str(&vs.join(":")),
        }
    }
}

/// A parsed `response ~ predictors` formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub response: String,
    pub terms: Vec<Term>,
    /// Grouping terms like `(1 | g)`, kept verbatim.
    pub random_effects: Vec<String>,
}

fn check_variable(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GlmError::FormulaParse(format!(
            "invalid variable name '{name}'"
        )))
    }
}

/// Split on `+` outside of parentheses.
fn split_terms(rhs: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in rhs.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(GlmError::FormulaParse("unbalanced ')'".to_string()));
                }
            }
            '+' if depth == 0 => {
                parts.push(rhs[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(GlmError::FormulaParse("unbalanced '('".to_string()));
    }
    parts.push(rhs[start..].trim());
    Ok(parts)
}

impl Formula {
    pub fn parse(formula: &str) -> Result<Self> {
        let Some((lhs, rhs)) = formula.split_once('~') else {
            return Err(GlmError::FormulaParse(format!(
                "'{formula}' has no '~'"
            )));
        };
        let response = lhs.trim().to_string();
        check_variable(&response)?;
        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(GlmError::FormulaParse(
                "right-hand side is empty".to_string(),
            ));
        }

        let mut terms: Vec<Term> = Vec::new();
        let mut random_effects = Vec::new();

        for part in split_terms(rhs)? {
            if part.is_empty() {
                return Err(GlmError::FormulaParse(format!("empty term in '{rhs}'")));
            }
            if part.contains('|') {
                random_effects.push(part.to_string());
                continue;
            }
            if part == "0" || part.contains('-') {
                return Err(GlmError::FormulaParse(
                    "models always include an intercept; '0' and '-1' are not supported"
                        .to_string(),
                ));
            }
            if part == "1" {
                continue;
            }
            if part.contains('*') {
                let vars: Vec<String> = part.split('*').map(|s| s.trim().to_string()).collect();
                for var in &vars {
                    check_variable(var)?;
                    push(&mut terms, Term::Main(var.clone()));
                }
                // every product of two or more factors
                for size in 2..=vars.len() {
                    for combo in combinations(&vars, size) {
                        push(&mut terms, Term::Interaction(combo));
                    }
                }
            } else if part.contains(':') {
                let vars: Vec<String> = part.split(':').map(|s| s.trim().to_string()).collect();
                for var in &vars {
                    check_variable(var)?;
                }
                push(&mut terms, Term::Interaction(vars));
            } else {
                check_variable(part)?;
                push(&mut terms, Term::Main(part.to_string()));
            }
        }

        Ok(Formula {
            response,
            terms,
            random_effects,
        })
    }

    /// The formula `response ~ n1 + n2 + ...`.
    pub fn from_names(response: &str, names: &[String]) -> Self {
        Formula {
            response: response.to_string(),
            terms: names.iter().cloned().map(Term::Main).collect(),
            random_effects: Vec::new(),
        }
    }

    pub fn has_random_effects(&self) -> bool {
        !self.random_effects.is_empty()
    }

    pub fn predictor_names(&self) -> Vec<String> {
        self.terms.iter().map(Term::name).collect()
    }
}

fn push(terms: &mut Vec<Term>, term: Term) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

fn combinations(vars: &[String], size: usize) -> Vec<Vec<String>> {
    if size == 0 {
        return vec![vec![]];
    }
    let mut out = Vec::new();
    for (i, var) in vars.iter().enumerate() {
        for mut rest in combinations(&vars[i + 1..], size - 1) {
            rest.insert(0, var.clone());
            out.push(rest);
        }
    }
    out
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.response)?;
        let mut rhs: Vec<String> = self.terms.iter().map(Term::name).collect();
        rhs.extend(self.random_effects.iter().cloned());
        if rhs.is_empty() {
            f.write_str("1")
        } else {
            f.write_str(&rhs.join(" + "))
        }
    }
}

/// Named numeric columns of equal length.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    names: Vec<String>,
    columns: HashMap<String, Array1<f64>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: &str, values: impl Into<Array1<f64>>) -> Result<Self> {
        let values = values.into();
        if self.columns.contains_key(name) {
            return Err(GlmError::DuplicateName(name.to_string()));
        }
        if let Some(rows) = self.num_rows() {
            if rows != values.len() {
                return Err(GlmError::DimensionMismatch {
                    context: "dataset column length",
                    expected: rows,
                    actual: values.len(),
                });
            }
        }
        self.names.push(name.to_string());
        self.columns.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.columns
            .get(name)
            .map(|c| c.view())
            .ok_or_else(|| GlmError::MissingColumn(name.to_string()))
    }

    /// `None` while the dataset has no columns.
    pub fn num_rows(&self) -> Option<usize> {
        self.names.first().map(|n| self.columns[n].len())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Outcome vector and raw design matrix (without intercept column).
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub y: Array1<f64>,
    pub x: Array2<f64>,
    pub predictor_names: Vec<String>,
}

pub fn model_frame(formula: &Formula, data: &Dataset) -> Result<ModelFrame> {
    let y = data.column(&formula.response)?.to_owned();
    let n = y.len();
    let mut x = Array2::zeros((n, formula.terms.len()));
    for (mut col, term) in x.columns_mut().into_iter().zip(&formula.terms) {
        col.fill(1.);
        for var in term.variables() {
            col *= &data.column(var)?;
        }
    }
    Ok(ModelFrame {
        y,
        x,
        predictor_names: formula.predictor_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn main(name: &str) -> Term {
        Term::Main(name.to_string())
    }

    #[test]
    fn parse_main_effects() {
        let f = Formula::parse("mpg ~ wt + hp").unwrap();
        assert_eq!(f.response, "mpg");
        assert_eq!(f.terms, vec![main("wt"), main("hp")]);
        assert!(!f.has_random_effects());
        assert_eq!(f.to_string(), "mpg ~ wt + hp");
    }

    #[test]
    fn parse_interactions() {
        let f = Formula::parse("y ~ a * b + a + c:d").unwrap();
        assert_eq!(
            f.predictor_names(),
            vec!["a", "b", "a:b", "c:d"]
        );
        let f = Formula::parse("y ~ a*b*c").unwrap();
        assert_eq!(f.terms.len(), 7);
        assert_eq!(f.terms[6], Term::Interaction(vec!["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn parse_random_effects() {
        let f = Formula::parse("y ~ x + (1 + x | group)").unwrap();
        assert!(f.has_random_effects());
        assert_eq!(f.terms, vec![main("x")]);
        assert_eq!(f.random_effects, vec!["(1 + x | group)"]);
    }

    #[test]
    fn parse_errors() {
        assert!(Formula::parse("y x").is_err());
        assert!(Formula::parse("y ~ ").is_err());
        assert!(Formula::parse("y ~ 0 + x").is_err());
        assert!(Formula::parse("y ~ x - 1").is_err());
        assert!(Formula::parse("y ~ log(x)").is_err());
        assert!(Formula::parse("y ~ x + (1 | g").is_err());
        assert!(Formula::parse("y ~ 1").unwrap().terms.is_empty());
    }

    #[test]
    fn frame_with_interaction() {
        let data = Dataset::new()
            .with_column("y", array![1., 2., 3.])
            .unwrap()
            .with_column("a", array![1., 2., 3.])
            .unwrap()
            .with_column("b", array![2., 0., -1.])
            .unwrap();
        let frame = model_frame(&Formula::parse("y ~ a:b + a").unwrap(), &data).unwrap();
        assert_eq!(frame.predictor_names, vec!["a:b", "a"]);
        assert_eq!(frame.x, array![[2., 1.], [0., 2.], [-3., 3.]]);
        assert_eq!(frame.y, array![1., 2., 3.]);
    }

    #[test]
    fn dataset_errors() {
        let data = Dataset::new().with_column("y", array![1., 2.]).unwrap();
        assert!(matches!(
            data.clone().with_column("x", array![1.]),
            Err(GlmError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            data.clone().with_column("y", array![1., 2.]),
            Err(GlmError::DuplicateName(_))
        ));
        assert!(matches!(
            model_frame(&Formula::parse("y ~ z").unwrap(), &data),
            Err(GlmError::MissingColumn(_))
        ));
    }
}
