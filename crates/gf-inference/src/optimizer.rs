//! Optimization algorithms
//!
//! Bounded minimizers over a flat parameter vector, wrapping argmin solvers
//! behind the [`Minimizer`] trait so the fit engine can swap backends.

use argmin::core::observers::ObserverMode;
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use gf_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cancel::{BestPoint, CancelObserver, CancelToken};
use crate::config::{Backend, OptimizerConfig};

/// Message of a run stopped through its [`CancelToken`].
pub const CANCELLED: &str = "cancelled";

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found
    pub parameters: Vec<f64>,
    /// Function value at `parameters`
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute gradient at given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut work = params.to_vec();
        for i in 0..params.len() {
            let eps = 1e-8_f64.sqrt() * params[i].abs().max(1.0);
            work[i] = params[i] + eps;
            let f_plus = self.eval(&work)?;
            work[i] = params[i] - eps;
            let f_minus = self.eval(&work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

/// Bounded minimizer.
pub trait Minimizer: Send + Sync {
    /// Minimize `objective` from `init` inside `bounds`, stopping after the
    /// current iteration once `cancel` is set.
    ///
    /// Non-convergence and cancellation are reported in the result; only
    /// failures of the objective itself are errors.
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        cancel: &CancelToken,
    ) -> Result<OptimizationResult>;
}

/// Minimizer selected by `config.backend`.
pub fn minimizer_for(config: &OptimizerConfig) -> Box<dyn Minimizer> {
    match config.backend {
        Backend::Lbfgs => Box::new(LbfgsbOptimizer::new(config.clone())),
        Backend::NelderMead => Box::new(NelderMeadOptimizer::new(config.clone())),
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self.objective.gradient(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: a component pushing out of an active bound is zeroed.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

fn check_lengths(init: &[f64], bounds: &[(f64, f64)]) -> Result<()> {
    if init.len() != bounds.len() {
        return Err(Error::Validation(format!(
            "Parameter and bounds length mismatch: {} != {}",
            init.len(),
            bounds.len()
        )));
    }
    Ok(())
}

fn summarize<I>(state: &I, bounds: &[(f64, f64)], counts: &FuncCounts) -> Result<OptimizationResult>
where
    I: State<Param = Vec<f64>, Float = f64>,
{
    let best = state.get_best_param().ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    Ok(OptimizationResult {
        parameters: clamp_params(best, bounds),
        fval: state.get_best_cost(),
        n_iter: state.get_iter(),
        n_fev: counts.cost.load(Ordering::Relaxed),
        n_gev: counts.grad.load(Ordering::Relaxed),
        converged,
        message: termination.to_string(),
    })
}

/// Result of a run stopped early: the best point recorded after the last
/// completed iteration, or the start point.
fn stopped(
    objective: &dyn ObjectiveFunction,
    init: Vec<f64>,
    bounds: &[(f64, f64)],
    best: &BestPoint,
    counts: &FuncCounts,
    message: String,
) -> Result<OptimizationResult> {
    let recorded = best.lock().expect("best point mutex poisoned").take();
    let (parameters, fval, n_iter) = match recorded {
        Some((p, f, it)) => (clamp_params(&p, bounds), f, it),
        None => {
            let f = objective.eval(&init)?;
            (init, f, 0)
        }
    };
    log::info!("optimization stopped after {} iterations: {}", n_iter, message);
    Ok(OptimizationResult {
        parameters,
        fval,
        n_iter,
        n_fev: counts.cost.load(Ordering::Relaxed),
        n_gev: counts.grad.load(Ordering::Relaxed),
        converged: false,
        message,
    })
}

/// Map a failed argmin run: cancellation and line-search breakdowns after
/// at least one iteration keep the best point, anything else is an error.
fn recover(
    err: argmin::core::Error,
    objective: &dyn ObjectiveFunction,
    init: Vec<f64>,
    bounds: &[(f64, f64)],
    best: &BestPoint,
    counts: &FuncCounts,
    cancel: &CancelToken,
) -> Result<OptimizationResult> {
    if cancel.is_cancelled() {
        return stopped(objective, init, bounds, best, counts, CANCELLED.to_string());
    }
    if best.lock().expect("best point mutex poisoned").is_some() {
        log::warn!("optimizer aborted: {}", err);
        return stopped(objective, init, bounds, best, counts, format!("aborted: {}", err));
    }
    Err(Error::Computation(format!("Optimization failed: {}", err)))
}

/// L-BFGS-B optimizer with box constraints
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create new L-BFGS-B optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }
}

impl Default for LbfgsbOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl Minimizer for LbfgsbOptimizer {
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        cancel: &CancelToken,
    ) -> Result<OptimizationResult> {
        check_lengths(init, bounds)?;
        let init_clamped = clamp_params(init, bounds);
        let counts = Arc::new(FuncCounts::default());
        let best = BestPoint::default();

        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };
        let linesearch = MoreThuenteLineSearch::new();
        // argmin's default cost tolerance (~EPS) is far below the noise of a
        // summed Cash statistic.
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}")))?;

        let observer = CancelObserver { token: cancel.clone(), best: best.clone() };
        let run = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped.clone()).max_iters(self.config.max_iter))
            .add_observer(observer, ObserverMode::Always)
            .run();

        match run {
            Ok(res) => summarize(res.state(), bounds, &counts),
            Err(e) => recover(e, objective, init_clamped, bounds, &best, &counts, cancel),
        }
    }
}

/// Derivative-free Nelder-Mead simplex; bounds are enforced by clamping.
pub struct NelderMeadOptimizer {
    config: OptimizerConfig,
}

impl NelderMeadOptimizer {
    /// Relative size of the initial simplex.
    const SIMPLEX_STEP: f64 = 0.1;

    /// Create new Nelder-Mead optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Start point plus one vertex per coordinate, stepped away from the
    /// nearer bound.
    fn initial_simplex(init: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
        let mut simplex = vec![init.to_vec()];
        for (i, (&x, &(lo, hi))) in init.iter().zip(bounds).enumerate() {
            let step = Self::SIMPLEX_STEP * x.abs().max(1.0);
            let mut v = init.to_vec();
            v[i] = if x + step <= hi { x + step } else { (x - step).max(lo) };
            simplex.push(v);
        }
        simplex
    }
}

impl Default for NelderMeadOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig { backend: Backend::NelderMead, ..OptimizerConfig::default() })
    }
}

impl Minimizer for NelderMeadOptimizer {
    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        cancel: &CancelToken,
    ) -> Result<OptimizationResult> {
        check_lengths(init, bounds)?;
        let init_clamped = clamp_params(init, bounds);
        let counts = Arc::new(FuncCounts::default());
        let best = BestPoint::default();

        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };
        let solver = NelderMead::new(Self::initial_simplex(&init_clamped, bounds))
            .with_sd_tolerance(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?;

        let observer = CancelObserver { token: cancel.clone(), best: best.clone() };
        let run = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.config.max_iter))
            .add_observer(observer, ObserverMode::Always)
            .run();

        match run {
            Ok(res) => summarize(res.state(), bounds, &counts),
            Err(e) => recover(e, objective, init_clamped, bounds, &best, &counts, cancel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3)
    struct QuadraticFunction;

    impl ObjectiveFunction for QuadraticFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 2.0).powi(2) + (params[1] - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * (params[0] - 2.0), 2.0 * (params[1] - 3.0)])
        }
    }

    #[test]
    fn test_lbfgs_quadratic() {
        let optimizer = LbfgsbOptimizer::new(OptimizerConfig { max_iter: 100, ..Default::default() });
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result = optimizer.minimize(&QuadraticFunction, &[0.0, 0.0], &bounds, &CancelToken::new()).unwrap();

        assert!(result.converged, "{}", result);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lbfgs_converges_at_bound() {
        let optimizer = LbfgsbOptimizer::default();
        let bounds = vec![(3.0, 5.0), (1.0, 2.0)];
        let result = optimizer.minimize(&QuadraticFunction, &[4.0, 1.5], &bounds, &CancelToken::new()).unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(result.converged, "Status: {}", result.message);
    }

    // Rosenbrock, minimum at (1, 1); uses the default numerical gradient.
    struct RosenbrockFunction;

    impl ObjectiveFunction for RosenbrockFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let (x, y) = (params[0], params[1]);
            Ok((1.0 - x).powi(2) + 100.0 * (y - x.powi(2)).powi(2))
        }
    }

    #[test]
    fn test_lbfgs_rosenbrock_numeric_gradient() {
        let optimizer = LbfgsbOptimizer::default();
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result = optimizer.minimize(&RosenbrockFunction, &[0.0, 0.0], &bounds, &CancelToken::new()).unwrap();
        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_nelder_mead_quadratic() {
        let optimizer = NelderMeadOptimizer::new(OptimizerConfig {
            backend: Backend::NelderMead,
            tol: 1e-10,
            max_iter: 2000,
            ..Default::default()
        });
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result = optimizer.minimize(&QuadraticFunction, &[0.0, 0.0], &bounds, &CancelToken::new()).unwrap();
        assert!(result.converged, "{}", result);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-3);
        assert_eq!(result.n_gev, 0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let optimizer = LbfgsbOptimizer::default();
        let r = optimizer.minimize(&QuadraticFunction, &[0.0], &[(0.0, 1.0), (0.0, 1.0)], &CancelToken::new());
        assert!(matches!(r, Err(Error::Validation(_))));
    }

    /// Sets the token during its first evaluation.
    struct CancellingQuadratic(CancelToken);

    impl ObjectiveFunction for CancellingQuadratic {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            self.0.cancel();
            QuadraticFunction.eval(params)
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            QuadraticFunction.gradient(params)
        }
    }

    #[test]
    fn test_cancel_stops_after_current_iteration() {
        let token = CancelToken::new();
        let objective = CancellingQuadratic(token.clone());
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let optimizers: Vec<Box<dyn Minimizer>> =
            vec![minimizer_for(&OptimizerConfig::default()), Box::new(NelderMeadOptimizer::default())];
        for optimizer in optimizers {
            token.reset();
            let result = optimizer.minimize(&objective, &[0.0, 0.0], &bounds, &token).unwrap();
            assert!(!result.converged);
            assert_eq!(result.message, CANCELLED);
            assert!(result.n_iter <= 1);
            assert!(result.fval <= 13.0);
        }
    }
}
