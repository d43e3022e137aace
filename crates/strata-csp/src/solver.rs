//! Backtracking search over registered variables.

use strata_common::{Pixel, PixelSet, Rect};
use tracing::debug;

use crate::constraint::Constraint;

/// A variable handle; the index is the registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(u32);

impl VarId {
    /// Creates a variable id from its registration index.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// The registration index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Result of a [`Solver::solve`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A complete assignment; indexed by [`VarId::index`].
    Solution(Vec<i32>),
    /// No satisfying assignment exists under the registration order.
    Unsatisfiable,
    /// The cancellation hook fired during the search.
    Cancelled,
}

enum Search {
    Found,
    Exhausted,
    Stopped,
}

/// A constraint satisfaction problem plus its backtracking search.
///
/// Determinism: the first unassigned variable (registration order) is
/// selected at each depth and values are tried in domain order, so a fixed
/// problem always searches the same tree.
#[derive(Debug, Default)]
pub struct Solver<'a> {
    domains: Vec<Vec<i32>>,
    constraints: Vec<Constraint<'a>>,
    // constraint indices mentioning each variable
    watching: Vec<Vec<usize>>,
}

impl<'a> Solver<'a> {
    /// Creates a solver with no variables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variable with its domain, kept in the given order.
    pub fn add_variable(&mut self, domain: Vec<i32>) -> VarId {
        let id = VarId::from_index(self.domains.len());
        self.domains.push(domain);
        self.watching.push(Vec::new());
        id
    }

    /// Number of registered variables.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.domains.len()
    }

    /// Registers a constraint. All mentioned variables must already exist.
    pub fn add_constraint(&mut self, constraint: Constraint<'a>) {
        let idx = self.constraints.len();
        for var in constraint.variables().into_iter().flatten() {
            assert!(
                var.index() < self.domains.len(),
                "constraint mentions unregistered variable {var:?}"
            );
            self.watching[var.index()].push(idx);
        }
        self.constraints.push(constraint);
    }

    /// Runs the backtracking search.
    ///
    /// `cancel` is polled at every recursive descent; when it returns true
    /// the search aborts with [`Outcome::Cancelled`]. Any returned solution
    /// satisfies every registered constraint.
    #[must_use]
    pub fn solve(&self, cancel: &dyn Fn() -> bool) -> Outcome {
        let mut assignment: Vec<Option<i32>> = vec![None; self.domains.len()];
        match self.search(&mut assignment, cancel) {
            Search::Found => {
                let values = assignment.into_iter().map(|v| v.unwrap_or(0)).collect();
                Outcome::Solution(values)
            }
            Search::Exhausted => {
                debug!(
                    variables = self.domains.len(),
                    constraints = self.constraints.len(),
                    "search exhausted without a solution"
                );
                Outcome::Unsatisfiable
            }
            Search::Stopped => Outcome::Cancelled,
        }
    }

    fn search(&self, assignment: &mut Vec<Option<i32>>, cancel: &dyn Fn() -> bool) -> Search {
        if cancel() {
            return Search::Stopped;
        }

        let Some(var) = assignment.iter().position(Option::is_none) else {
            return Search::Found;
        };

        for i in 0..self.domains[var].len() {
            assignment[var] = Some(self.domains[var][i]);
            if self.consistent(var, assignment) {
                match self.search(assignment, cancel) {
                    Search::Exhausted => {}
                    done => return done,
                }
            }
        }
        assignment[var] = None;
        Search::Exhausted
    }

    /// Checks every constraint watching `var` against the assignment.
    fn consistent(&self, var: usize, assignment: &[Option<i32>]) -> bool {
        self.watching[var]
            .iter()
            .all(|&c| self.constraints[c].satisfied(assignment))
    }
}

/// Flat-index domain of every `stride`-th position in `rect` whose decoded
/// pixel is a member of `set`.
///
/// Values decode the same way [`Constraint::InsidePixelSet2D`] does:
/// `(rect.x + v % rect.w, rect.y + v / rect.w)`.
#[must_use]
pub fn domain_inside_pixel_set(rect: Rect, set: &PixelSet, stride: i32) -> Vec<i32> {
    let mut domain = Vec::new();
    if rect.is_empty() {
        return domain;
    }
    let mut v = 0;
    while i64::from(v) < rect.area() {
        let x = rect.x + v % rect.w;
        let y = rect.y + v / rect.w;
        if set.contains(Pixel::new(x, y)) {
            domain.push(v);
        }
        v += stride;
    }
    domain
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn never() -> bool {
        false
    }

    #[test]
    fn assigns_all_variables() {
        let mut solver = Solver::new();
        let a = solver.add_variable(vec![0, 10, 20]);
        let b = solver.add_variable(vec![0, 10, 20]);
        solver.add_constraint(Constraint::Distance { a, b, min: 15 });
        match solver.solve(&never) {
            Outcome::Solution(values) => {
                assert!((values[a.index()] - values[b.index()]).abs() >= 15);
            }
            other => panic!("expected solution, got {other:?}"),
        }
    }

    #[test]
    fn reports_unsatisfiable() {
        let mut solver = Solver::new();
        let a = solver.add_variable(vec![0, 5]);
        let b = solver.add_variable(vec![0, 5]);
        solver.add_constraint(Constraint::Distance { a, b, min: 50 });
        assert_eq!(solver.solve(&never), Outcome::Unsatisfiable);
    }

    #[test]
    fn empty_domain_is_unsatisfiable() {
        let mut solver = Solver::new();
        solver.add_variable(Vec::new());
        assert_eq!(solver.solve(&never), Outcome::Unsatisfiable);
    }

    #[test]
    fn no_variables_is_trivially_solved() {
        let solver = Solver::new();
        assert_eq!(solver.solve(&never), Outcome::Solution(Vec::new()));
    }

    #[test]
    fn cancellation_aborts_search() {
        let mut solver = Solver::new();
        let a = solver.add_variable((0..100).collect());
        let b = solver.add_variable((0..100).collect());
        solver.add_constraint(Constraint::Distance { a, b, min: 1 });
        assert_eq!(solver.solve(&|| true), Outcome::Cancelled);
    }

    #[test]
    fn deterministic_value_selection() {
        let mut solver = Solver::new();
        let a = solver.add_variable(vec![30, 10, 20]);
        match solver.solve(&never) {
            // First domain value wins with no constraints in play.
            Outcome::Solution(values) => assert_eq!(values[a.index()], 30),
            other => panic!("expected solution, got {other:?}"),
        }
    }

    #[test]
    fn backtracks_through_chained_constraints() {
        // a < b < c forced by distances within a narrow domain: the solver
        // must revisit early choices to fit all three.
        let mut solver = Solver::new();
        let domain: Vec<i32> = (0..=40).step_by(10).collect();
        let a = solver.add_variable(domain.clone());
        let b = solver.add_variable(domain.clone());
        let c = solver.add_variable(domain);
        solver.add_constraint(Constraint::Distance { a, b, min: 20 });
        solver.add_constraint(Constraint::Distance { a: b, b: c, min: 20 });
        solver.add_constraint(Constraint::Distance { a, b: c, min: 20 });
        match solver.solve(&never) {
            Outcome::Solution(v) => {
                assert!((v[a.index()] - v[b.index()]).abs() >= 20);
                assert!((v[b.index()] - v[c.index()]).abs() >= 20);
                assert!((v[a.index()] - v[c.index()]).abs() >= 20);
            }
            other => panic!("expected solution, got {other:?}"),
        }
    }

    #[test]
    fn domain_inside_pixel_set_filters_membership() {
        let mut set = PixelSet::new();
        set.fill_rect(Rect::new(0, 0, 10, 1));
        let rect = Rect::new(0, 0, 20, 1);
        let domain = domain_inside_pixel_set(rect, &set, 5);
        // v in {0, 5, 10, 15}; only 0 and 5 decode inside the set.
        assert_eq!(domain, vec![0, 5]);
    }

    proptest! {
        /// Any returned assignment satisfies every registered constraint.
        #[test]
        fn solutions_satisfy_all_constraints(
            domains in prop::collection::vec(
                prop::collection::vec(0i32..60, 1..8),
                2..5,
            ),
            pairs in prop::collection::vec((0usize..5, 0usize..5, 1i32..40), 0..6),
        ) {
            let mut solver = Solver::new();
            let vars: Vec<VarId> = domains.into_iter().map(|d| solver.add_variable(d)).collect();
            let mut constraints = Vec::new();
            for (i, j, min) in pairs {
                let (a, b) = (vars[i % vars.len()], vars[j % vars.len()]);
                if a != b {
                    constraints.push(Constraint::Distance { a, b, min });
                }
            }
            for c in &constraints {
                solver.add_constraint(c.clone());
            }
            if let Outcome::Solution(values) = solver.solve(&never) {
                let assignment: Vec<Option<i32>> = values.iter().copied().map(Some).collect();
                for c in &constraints {
                    prop_assert!(c.satisfied(&assignment));
                }
            }
        }
    }
}
