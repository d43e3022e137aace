//! # Strata CSP
//!
//! A small backtracking constraint solver used to place terrain features.
//!
//! Variables are registered in a fixed order and carry finite integer
//! domains; constraints are a closed set of variants rather than an open
//! trait, so dispatch is cheap and the solver's behavior is fully
//! enumerable. The search is deterministic: variables are selected in
//! registration order and values tried in domain order, which is what makes
//! world generation reproducible for a fixed seed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod constraint;
pub mod solver;

pub use constraint::Constraint;
pub use solver::{domain_inside_pixel_set, Outcome, Solver, VarId};
