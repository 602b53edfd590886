//! A runtime for fully expanded Racket programs.
//!
//! Programs arrive as the JSON trees produced by an external expander. The
//! loader reads them into [`compiler::tree_il`] nodes, assignment conversion
//! prepares them for evaluation, and [`runtime::vm`] runs them with heap
//! allocated continuations so that tail calls never grow the native stack.

pub mod compiler;
pub mod load;
pub mod options;
pub mod runtime;

pub use runtime::Runtime;
