//! Persona matching: evaluate every rule against a snapshot, then pick one winner by rank.

pub mod evaluator;
pub mod resolver;

pub use evaluator::{evaluate, evaluate_condition};
pub use resolver::{rank, resolve, unclassified_after_violation, Ranking};
