//! Gradient descent with adaptive step size over a cost/gradient contract.

use log::{debug, info};

use crate::Error;

/// The step size below which a descent run is considered stagnated.
const MIN_STEP_SIZE: f64 = 1e-10;

/// The cost/gradient contract shared by the embedding models.
///
/// The flat parameter vector is the single source of truth for all trainable
/// state: implementors refresh any derived quantities from it at the start of
/// [`cost`](Objective::cost) and [`grad`](Objective::grad), and all mutation
/// goes through [`set_params`](Objective::set_params). Any unconstrained
/// non-linear optimizer can be written against this trait.
pub trait Objective {
    /// The flat parameter vector.
    fn params(&self) -> &[f64];

    /// Replaces the flat parameter vector. Fails when the length does not
    /// match the current one.
    fn set_params(&mut self, params: &[f64]) -> Result<(), Error>;

    /// Evaluates the objective at the current parameters.
    fn cost(&mut self) -> Result<f64, Error>;

    /// Evaluates the gradient at the current parameters, with the same
    /// length and layout as the parameter vector.
    fn grad(&mut self) -> Result<Vec<f64>, Error>;
}

/// Outcome of a descent run.
#[derive(Clone, Debug)]
pub struct TrainSummary {
    /// Number of steps attempted.
    pub steps: usize,
    /// Best cost seen, which the parameters are left at.
    pub cost: f64,
    /// Step size at exit.
    pub step_size: f64,
    /// Whether the run exited early because the step size collapsed below
    /// `1e-10`. Exhausting the step budget instead is not an error; the
    /// caller inspects the cost trend.
    pub stagnated: bool,
}

/// Simple gradient descent with adaptive step size.
///
/// Each iteration takes a tentative step against the gradient: a step that
/// does not increase the cost is accepted and grows the step size by 1.1,
/// any other step is undone and halves it. Not fast, but dependable, and the
/// accept/reject policy is deterministic given the starting parameters.
#[derive(Clone, Copy, Debug)]
pub struct GradientDescent {
    step_size: f64,
    max_steps: usize,
}

impl GradientDescent {
    /// Creates an optimizer with an initial step size and a step budget.
    pub fn new(step_size: f64, max_steps: usize) -> Self {
        Self {
            step_size,
            max_steps,
        }
    }

    /// Minimizes `objective` in place.
    ///
    /// Errors from cost or gradient evaluation abort immediately, with the
    /// parameters restored to their last accepted state.
    pub fn minimize<O: Objective + ?Sized>(&self, objective: &mut O) -> Result<TrainSummary, Error> {
        let mut step_size = self.step_size;
        let mut best = objective.cost()?;
        debug!("initial cost: {best}");

        // Parameter copies are reused across iterations.
        let mut previous = vec![0.0; objective.params().len()];
        let mut tentative = vec![0.0; objective.params().len()];

        for step in 0..self.max_steps {
            if step_size < MIN_STEP_SIZE {
                info!("step size {step_size} collapsed after {step} steps: exiting");
                return Ok(TrainSummary {
                    steps: step,
                    cost: best,
                    step_size,
                    stagnated: true,
                });
            }

            previous.copy_from_slice(objective.params());
            let gradient = objective.grad()?;
            for ((t, &p), &g) in tentative.iter_mut().zip(&previous).zip(&gradient) {
                *t = p - step_size * g;
            }
            objective.set_params(&tentative)?;

            let cost = match objective.cost() {
                Ok(cost) => cost,
                Err(e) => {
                    // Leave the parameters at their state before the failing
                    // step.
                    objective.set_params(&previous)?;
                    return Err(e);
                }
            };

            if cost <= best {
                best = cost;
                step_size *= 1.1;
                debug!("step {step}: cost {cost}, increasing step size to {step_size}");
            } else {
                objective.set_params(&previous)?;
                step_size *= 0.5;
                debug!("step {step}: cost {cost} above best {best}, decreasing step size to {step_size}");
            }
        }

        Ok(TrainSummary {
            steps: self.max_steps,
            cost: best,
            step_size,
            stagnated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A convex bowl with a known minimum at the origin.
    struct Quadratic {
        params: Vec<f64>,
    }

    impl Objective for Quadratic {
        fn params(&self) -> &[f64] {
            &self.params
        }

        fn set_params(&mut self, params: &[f64]) -> Result<(), Error> {
            self.params.copy_from_slice(params);
            Ok(())
        }

        fn cost(&mut self) -> Result<f64, Error> {
            Ok(self.params.iter().map(|p| p * p).sum())
        }

        fn grad(&mut self) -> Result<Vec<f64>, Error> {
            Ok(self.params.iter().map(|p| 2.0 * p).collect())
        }
    }

    #[test]
    fn descent_reaches_the_minimum_of_a_bowl() {
        let mut bowl = Quadratic {
            params: vec![3.0, -2.0, 0.5],
        };
        let initial = bowl.cost().unwrap();

        let summary = GradientDescent::new(0.01, 500).minimize(&mut bowl).unwrap();

        assert!(summary.cost <= initial);
        assert!(summary.cost < 1e-4);
        assert!((bowl.cost().unwrap() - summary.cost).abs() < 1e-12);
    }

    #[test]
    fn rejected_steps_restore_the_parameters_exactly() {
        let mut bowl = Quadratic { params: vec![1.0] };

        // A gigantic step overshoots, gets rejected and must be undone.
        let summary = GradientDescent::new(1e6, 1).minimize(&mut bowl).unwrap();

        assert_eq!(bowl.params(), &[1.0]);
        assert!((summary.cost - 1.0).abs() < 1e-12);
        assert!(!summary.stagnated);
    }

    /// A bowl whose cost evaluation fails once its budget of successful
    /// calls runs out.
    struct Tripwire {
        params: Vec<f64>,
        evaluations: usize,
    }

    impl Objective for Tripwire {
        fn params(&self) -> &[f64] {
            &self.params
        }

        fn set_params(&mut self, params: &[f64]) -> Result<(), Error> {
            self.params.copy_from_slice(params);
            Ok(())
        }

        fn cost(&mut self) -> Result<f64, Error> {
            if self.evaluations == 0 {
                return Err(Error::DegenerateRow { row: 0 });
            }
            self.evaluations -= 1;
            Ok(self.params.iter().map(|p| p * p).sum())
        }

        fn grad(&mut self) -> Result<Vec<f64>, Error> {
            Ok(self.params.iter().map(|p| 2.0 * p).collect())
        }
    }

    #[test]
    fn evaluation_errors_restore_the_last_accepted_parameters() {
        // The initial evaluation and the first step succeed; evaluating the
        // second step fails, and that step must be undone before the error
        // surfaces.
        let mut objective = Tripwire {
            params: vec![1.0, -2.0],
            evaluations: 2,
        };

        let result = GradientDescent::new(0.01, 10).minimize(&mut objective);
        assert!(matches!(result, Err(Error::DegenerateRow { .. })));

        let accepted: Vec<f64> = [1.0, -2.0].iter().map(|p| p - 0.01 * (2.0 * p)).collect();
        assert_eq!(objective.params(), accepted.as_slice());
    }

    #[test]
    fn tiny_step_sizes_report_stagnation() {
        let mut bowl = Quadratic { params: vec![1.0] };

        let summary = GradientDescent::new(1e-12, 100).minimize(&mut bowl).unwrap();

        assert!(summary.stagnated);
        assert_eq!(summary.steps, 0);
    }
}
