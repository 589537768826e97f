//! Iterative impulse solvers.

use glam::Vec3;
use tracing::trace;

use crate::body::{Body, BodyType};
use crate::equation::Equation;

/// Solves a set of equations and writes the result into body velocities.
pub trait Solver {
    /// Queues an equation for the next solve. Disabled equations are ignored.
    fn add_equation(&mut self, equation: Equation);

    /// Clears the queue.
    fn remove_all_equations(&mut self);

    /// Queued equations; after [`Solver::solve`] their multipliers are set.
    fn equations(&self) -> &[Equation];

    /// Solves the queued equations for timestep `dt`. Returns the number of
    /// iterations (or islands) processed.
    fn solve(&mut self, dt: f32, bodies: &mut [Body]) -> usize;

    /// Sets the maximum number of passes per solve.
    fn set_iterations(&mut self, iterations: usize);

    /// Sets the convergence tolerance.
    fn set_tolerance(&mut self, tolerance: f32);
}

/// Projected Gauss–Seidel solver.
#[derive(Debug, Clone)]
pub struct GsSolver {
    /// Maximum passes over the equations.
    pub iterations: usize,
    /// Stop once the summed impulse change drops below this.
    pub tolerance: f32,
    equations: Vec<Equation>,
    lambda: Vec<f32>,
    rhs: Vec<f32>,
    inv_c: Vec<f32>,
}

impl Default for GsSolver {
    fn default() -> Self {
        Self::new(10, 1e-7)
    }
}

impl GsSolver {
    pub fn new(iterations: usize, tolerance: f32) -> Self {
        Self {
            iterations,
            tolerance,
            equations: Vec::new(),
            lambda: Vec::new(),
            rhs: Vec::new(),
            inv_c: Vec::new(),
        }
    }

    /// Solves only the queued equations, resetting and committing only
    /// `island` bodies (every body when `None`).
    fn solve_bodies(&mut self, dt: f32, bodies: &mut [Body], island: Option<&[usize]>) -> usize {
        let n = self.equations.len();
        if n == 0 {
            return 0;
        }

        let h = dt;
        self.lambda.clear();
        self.lambda.resize(n, 0.0);
        self.rhs.clear();
        self.inv_c.clear();
        for eq in &mut self.equations {
            self.rhs.push(eq.compute_b(h, bodies));
            self.inv_c.push(1.0 / eq.compute_c(bodies));
        }

        match island {
            Some(indices) => {
                for &i in indices {
                    bodies[i].vlambda = Vec3::ZERO;
                    bodies[i].wlambda = Vec3::ZERO;
                }
            }
            None => {
                for b in bodies.iter_mut() {
                    b.vlambda = Vec3::ZERO;
                    b.wlambda = Vec3::ZERO;
                }
            }
        }

        let tol_sq = self.tolerance * self.tolerance;
        let mut iter = 0;
        while iter < self.iterations {
            iter += 1;
            let mut delta_total = 0.0f32;
            for (j, eq) in self.equations.iter().enumerate() {
                let lambda_j = self.lambda[j];
                let gw_lambda = eq.compute_gw_lambda(bodies);
                let mut delta = self.inv_c[j] * (self.rhs[j] - gw_lambda - eq.eps * lambda_j);
                if lambda_j + delta < eq.min_force {
                    delta = eq.min_force - lambda_j;
                } else if lambda_j + delta > eq.max_force {
                    delta = eq.max_force - lambda_j;
                }
                self.lambda[j] += delta;
                delta_total += delta.abs();
                eq.add_to_wlambda(bodies, delta);
            }
            if delta_total * delta_total < tol_sq {
                break;
            }
        }

        fn commit(b: &mut Body) {
            b.velocity += b.vlambda * b.linear_factor;
            b.angular_velocity += b.wlambda * b.angular_factor;
        }
        match island {
            Some(indices) => indices.iter().for_each(|&i| commit(&mut bodies[i])),
            None => bodies.iter_mut().for_each(commit),
        }

        let inv_dt = 1.0 / h;
        for (eq, lambda) in self.equations.iter_mut().zip(&self.lambda) {
            eq.multiplier = lambda * inv_dt;
        }
        trace!(equations = n, iterations = iter, "gauss-seidel solve");
        iter
    }
}

impl Solver for GsSolver {
    fn add_equation(&mut self, equation: Equation) {
        if equation.enabled {
            self.equations.push(equation);
        }
    }

    fn remove_all_equations(&mut self) {
        self.equations.clear();
    }

    fn equations(&self) -> &[Equation] {
        &self.equations
    }

    fn solve(&mut self, dt: f32, bodies: &mut [Body]) -> usize {
        for b in bodies.iter_mut() {
            b.update_solve_mass_properties();
        }
        self.solve_bodies(dt, bodies, None)
    }

    fn set_iterations(&mut self, iterations: usize) {
        self.iterations = iterations;
    }

    fn set_tolerance(&mut self, tolerance: f32) {
        self.tolerance = tolerance;
    }
}

/// Splits bodies into islands connected by equations and solves each with
/// an inner [`GsSolver`]. Static bodies do not join islands together.
#[derive(Debug, Clone, Default)]
pub struct SplitSolver {
    /// Solver run per island.
    pub inner: GsSolver,
    equations: Vec<Equation>,
}

impl SplitSolver {
    pub fn new(inner: GsSolver) -> Self {
        Self {
            inner,
            equations: Vec::new(),
        }
    }

    /// Groups equation indices and body indices by island.
    fn islands(&self, bodies: &[Body]) -> Vec<(Vec<usize>, Vec<usize>)> {
        let n = bodies.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (k, eq) in self.equations.iter().enumerate() {
            adjacency[eq.body_a].push(k);
            adjacency[eq.body_b].push(k);
        }

        let joins = |i: usize| bodies[i].body_type != BodyType::Static;
        let mut visited = vec![false; n];
        let mut eq_taken = vec![false; self.equations.len()];
        let mut islands = Vec::new();

        for root in 0..n {
            if visited[root] || !joins(root) {
                continue;
            }
            let mut island_bodies = Vec::new();
            let mut island_eqs = Vec::new();
            let mut queue = vec![root];
            visited[root] = true;
            while let Some(node) = queue.pop() {
                island_bodies.push(node);
                for &k in &adjacency[node] {
                    if !eq_taken[k] {
                        eq_taken[k] = true;
                        island_eqs.push(k);
                    }
                    let eq = &self.equations[k];
                    let other = if eq.body_a == node { eq.body_b } else { eq.body_a };
                    if !visited[other] && joins(other) {
                        visited[other] = true;
                        queue.push(other);
                    }
                }
            }
            island_eqs.sort_unstable();
            islands.push((island_bodies, island_eqs));
        }
        islands
    }
}

impl Solver for SplitSolver {
    fn add_equation(&mut self, equation: Equation) {
        if equation.enabled {
            self.equations.push(equation);
        }
    }

    fn remove_all_equations(&mut self) {
        self.equations.clear();
    }

    fn equations(&self) -> &[Equation] {
        &self.equations
    }

    fn solve(&mut self, dt: f32, bodies: &mut [Body]) -> usize {
        for b in bodies.iter_mut() {
            b.update_solve_mass_properties();
        }
        let islands = self.islands(bodies);
        for (island_bodies, island_eqs) in &islands {
            self.inner.remove_all_equations();
            for &k in island_eqs {
                self.inner.add_equation(self.equations[k].clone());
            }
            self.inner.solve_bodies(dt, bodies, Some(island_bodies));
            for (&k, solved) in island_eqs.iter().zip(self.inner.equations()) {
                self.equations[k].multiplier = solved.multiplier;
            }
        }
        self.inner.remove_all_equations();
        trace!(islands = islands.len(), "split solve");
        islands.len()
    }

    fn set_iterations(&mut self, iterations: usize) {
        self.inner.set_iterations(iterations);
    }

    fn set_tolerance(&mut self, tolerance: f32) {
        self.inner.set_tolerance(tolerance);
    }
}
