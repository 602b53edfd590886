//! Syntax trees and the passes that prepare them for evaluation.

pub mod analyze;
pub mod assignment_elimination;
pub mod env;
pub mod fix_letrec;
pub mod tree_il;
