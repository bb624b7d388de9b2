//! Parallel tool execution with dependency resolution.
//!
//! Independent read-only calls from one LLM step run concurrently;
//! side-effect calls are fenced behind everything before them. See
//! [`resolver::execution_levels`] for the rules and [`ParallelExecutor`]
//! for the bounded runner.

pub mod executor;
pub mod resolver;

pub use executor::ParallelExecutor;
pub use resolver::execution_levels;
