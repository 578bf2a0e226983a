//! Protocol text prepended to every instruction before execution.
//!
//! The default protocol is bundled at compile time. Injection is wrapped in
//! markers so that re-injecting an already injected instruction is a no-op.

/// Default workflow rules
pub const DEFAULT_PROTOCOL: &str = include_str!("defaults/protocol.md");

const PROTOCOL_OPEN: &str = "[PROTOCOL]";
const PROTOCOL_CLOSE: &str = "[/PROTOCOL]";

/// Supplies the mandatory rules text
pub trait ProtocolSource: Send + Sync {
    /// `None` disables injection
    fn protocol(&self) -> Option<String>;
}

/// Fixed protocol text
#[derive(Debug, Clone)]
pub struct StaticProtocol(pub String);

impl Default for StaticProtocol {
    fn default() -> Self {
        Self(DEFAULT_PROTOCOL.to_string())
    }
}

impl ProtocolSource for StaticProtocol {
    fn protocol(&self) -> Option<String> {
        let text = self.0.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// No protocol text
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProtocol;

impl ProtocolSource for NoProtocol {
    fn protocol(&self) -> Option<String> {
        None
    }
}

/// Prepend `protocol` to `instruction` unless it is already there
pub fn inject_protocol(instruction: &str, protocol: &str) -> String {
    if instruction.starts_with(PROTOCOL_OPEN) {
        return instruction.to_string();
    }
    format!(
        "{}\n{}\n{}\n\n{}",
        PROTOCOL_OPEN, protocol, PROTOCOL_CLOSE, instruction
    )
}
