//! Shared CLI argument types

mod common;
mod filters;

pub use common::OutputFormat;
pub use filters::ListFilterArgs;
