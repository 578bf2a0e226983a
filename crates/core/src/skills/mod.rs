//! # Handlers and Policies
//!
//! Everything the execution pipeline consults around a handler call.
//!
//! ```text
//! ExecutionPipeline
//!   ├── SkillRepository  (registry)       which handler runs
//!   ├── ProtocolSource   (prompts)        text prepended to every instruction
//!   ├── GuardrailChecker (guardrail_skill) reasoning and action validation
//!   └── CriticEvaluator  (critic_skill)   output review
//! ```
//!
//! `script_skill` provides the one built-in [`Handler`]: an external program
//! fed the instruction on stdin.

pub mod critic_skill;
pub mod guardrail_skill;
pub mod prompts;
pub mod registry;
pub mod script_skill;

pub use critic_skill::{CriticEvaluator, Critique, HeuristicCritic, PASSING_SCORE};
pub use guardrail_skill::{ActionRequest, GuardrailChecker, GuardrailVerdict, PatternGuardrails};
pub use prompts::{inject_protocol, NoProtocol, ProtocolSource, StaticProtocol};
pub use registry::{
    Handler, HandlerDefinition, HandlerOutput, HandlerRegistry, SkillRepository,
};
pub use script_skill::{load_catalog, ScriptHandler, ScriptSpec};
