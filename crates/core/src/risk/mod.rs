//! # Risk
//!
//! Instruction scoring and the checkpoint/rollback safety net around it.

pub mod assessor;
pub mod checkpoint;

pub use assessor::RiskAssessor;
pub use checkpoint::CheckpointManager;
