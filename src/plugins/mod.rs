//! Workflow subsystems layered on the core engine.

pub mod adopt;
pub mod governance;
pub mod proposal;
