use std::fmt;

use crate::diagnostics::{self, ConvergenceIssue, ConvergenceThresholds, ParameterSummary};
use crate::error::Result;
use crate::model::BayesGlm;

impl BayesGlm {
    /// Convergence summary of every parameter over all stored draws,
    /// on the scale of the data.
    pub fn summarize(&self) -> Result<Vec<ParameterSummary>> {
        let posterior = self.posterior()?;
        diagnostics::summarize(&posterior.unstandardized, &posterior.parameters)
    }

    /// Diagnostics that cross `thresholds`, recomputed from the current draws.
    pub fn check_convergence(&self, thresholds: &ConvergenceThresholds) -> Result<Vec<ConvergenceIssue>> {
        Ok(diagnostics::check_convergence(&self.summarize()?, thresholds))
    }

    /// Render the model and log any convergence issues of the posterior.
    pub fn describe(&self) -> String {
        if self.is_fitted() {
            match self.check_convergence(&ConvergenceThresholds::default()) {
                Ok(issues) => diagnostics::log_issues(&issues),
                Err(err) => log::warn!("could not compute convergence diagnostics: {err}"),
            }
        }
        self.to_string()
    }
}

impl fmt::Display for BayesGlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Formula: {}", self.formula())?;
        writeln!(f, "Family: {} (link: {})", self.family(), self.link())?;
        writeln!(f, "Priors:\n{}", self.prior())?;
        writeln!(f, "Observations: {}", self.num_observations())?;
        match self.posterior() {
            Ok(posterior) => {
                let draws = posterior.samples().num_draws();
                let chains = posterior.samples().num_chains();
                write!(
                    f,
                    "Posterior samples: {} ({chains} chains x {draws} draws)",
                    draws * chains
                )
            }
            Err(_) => write!(f, "Posterior samples: empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::Diagnostic;
    use crate::family::Family;
    use crate::model::test_engine::{cars, settings, StubEngine};
    use crate::model::BayesGlm;
    use crate::ConvergenceThresholds;
    use crate::GlmError;

    #[test]
    fn render_unfit() {
        let model = BayesGlm::new("mpg ~ wt + hp", &cars(), Family::Normal, Default::default()).unwrap();
        let text = model.describe();
        assert!(text.contains("Formula: mpg ~ wt + hp"));
        assert!(text.contains("Family: Normal (link: identity)"));
        assert!(text.contains("sigma: Exponential(1)"));
        assert!(text.contains("Observations: 10"));
        assert!(text.ends_with("Posterior samples: empty"));
        assert!(matches!(model.summarize(), Err(GlmError::NotFitted)));
    }

    #[test]
    fn render_fitted() {
        let mut model = BayesGlm::new("mpg ~ wt", &cars(), Family::Normal, Default::default()).unwrap();
        // a chain that never moves in the second half
        let engine = StubEngine {
            value: |d, i, c| {
                if c == 1 {
                    3.
                } else {
                    0.5 + ((d * 7 + i * 3) % 11) as f64 / 11.
                }
            },
        };
        model.fit_with(&engine, &settings(40, 2)).unwrap();
        assert!(model
            .describe()
            .ends_with("Posterior samples: 80 (2 chains x 40 draws)"));
        let issues = model
            .check_convergence(&ConvergenceThresholds::default())
            .unwrap();
        assert!(issues
            .iter()
            .any(|i| i.parameter == "alpha" && i.diagnostic == Diagnostic::Rhat));
    }
}
