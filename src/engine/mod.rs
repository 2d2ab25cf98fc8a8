//! Core engine — pricing and the concurrent evaluation run.

pub mod accountant;
pub mod orchestrator;
