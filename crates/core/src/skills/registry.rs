//! # Handler Registry
//!
//! Typed registration of capability handlers and the weighted keyword match
//! that picks one for an instruction.
//!
//! ## Scoring
//!
//! | Signal                                   | Weight |
//! |------------------------------------------|--------|
//! | activation phrase contained in instruction | 10   |
//! | capability keyword present               | 5      |
//! | tech-stack entry present                 | 2      |
//! | handler name token present               | 2      |
//!
//! The highest score wins; ties go to the handler registered first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ConductorError;
use crate::models::ExecutionContext;

const ACTIVATION_WEIGHT: u32 = 10;
const CAPABILITY_WEIGHT: u32 = 5;
const TECH_STACK_WEIGHT: u32 = 2;
const NAME_TOKEN_WEIGHT: u32 = 2;

/// Catalog metadata of a handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandlerDefinition {
    pub name: String,
    pub description: String,
    pub activation_phrases: Vec<String>,
    pub capabilities: Vec<String>,
    pub tech_stack: Vec<String>,
    pub rules: Vec<String>,
    /// Path the handler writes to, checked by the action guardrail
    pub output_target: Option<String>,
}

impl HandlerDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_activation(mut self, phrases: &[&str]) -> Self {
        self.activation_phrases = phrases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_tech_stack(mut self, stack: &[&str]) -> Self {
        self.tech_stack = stack.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_output_target(mut self, target: &str) -> Self {
        self.output_target = Some(target.to_string());
        self
    }
}

/// What a handler produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutput {
    pub output: String,
    pub tokens_used: u64,
}

impl HandlerOutput {
    /// Output with a token estimate of one token per four chars
    pub fn text(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            tokens_used: (output.len() / 4) as u64,
            output,
        }
    }
}

/// A named capability that executes instructions
#[async_trait]
pub trait Handler: Send + Sync {
    fn definition(&self) -> &HandlerDefinition;

    async fn invoke(&self, ctx: &ExecutionContext) -> Result<HandlerOutput, ConductorError>;
}

/// Catalog the pipeline resolves handlers from
pub trait SkillRepository: Send + Sync {
    fn list_handlers(&self) -> Vec<HandlerDefinition>;

    /// Name of the best match for `instruction` among `handlers`
    fn find_best(&self, instruction: &str, handlers: &[HandlerDefinition]) -> Option<String> {
        find_best(instruction, handlers)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Handler>>;
}

/// In-process registry of handlers, in registration order
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler`, replacing any handler with the same name in place
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let name = handler.definition().name.clone();
        match self
            .handlers
            .iter()
            .position(|h| h.definition().name == name)
        {
            Some(i) => {
                tracing::debug!(handler = %name, "Replacing registered handler");
                self.handlers[i] = handler;
            }
            None => self.handlers.push(handler),
        }
    }

    pub fn with(mut self, handler: Arc<dyn Handler>) -> Self {
        self.register(handler);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|h| h.definition().name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl SkillRepository for HandlerRegistry {
    fn list_handlers(&self) -> Vec<HandlerDefinition> {
        self.handlers
            .iter()
            .map(|h| h.definition().clone())
            .collect()
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .find(|h| h.definition().name == name)
            .cloned()
    }
}

/// Pick the highest scoring handler; ties keep catalog order
pub fn find_best(instruction: &str, handlers: &[HandlerDefinition]) -> Option<String> {
    let mut best: Option<(&HandlerDefinition, u32)> = None;
    for handler in handlers {
        let score = score_handler(instruction, handler);
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((handler, score));
        }
    }
    best.map(|(handler, score)| {
        tracing::debug!(handler = %handler.name, score, "Handler resolved");
        handler.name.clone()
    })
}

/// Weighted keyword score of `handler` for `instruction`
pub fn score_handler(instruction: &str, handler: &HandlerDefinition) -> u32 {
    let lowered = instruction.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '+' && c != '#')
        .filter(|w| !w.is_empty())
        .collect();

    let mut score = 0;
    for phrase in &handler.activation_phrases {
        let phrase = phrase.trim().to_lowercase();
        if !phrase.is_empty() && lowered.contains(&phrase) {
            score += ACTIVATION_WEIGHT;
        }
    }
    for capability in &handler.capabilities {
        let keywords = capability.to_lowercase();
        if keywords
            .split_whitespace()
            .any(|k| k.len() > 2 && words.contains(k))
        {
            score += CAPABILITY_WEIGHT;
        }
    }
    for tech in &handler.tech_stack {
        if words.contains(tech.to_lowercase().as_str()) {
            score += TECH_STACK_WEIGHT;
        }
    }
    for token in handler.name.to_lowercase().split(['-', '_', ' ']) {
        if token.len() > 2 && words.contains(token) {
            score += NAME_TOKEN_WEIGHT;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(HandlerDefinition);

    #[async_trait]
    impl Handler for Echo {
        fn definition(&self) -> &HandlerDefinition {
            &self.0
        }

        async fn invoke(&self, ctx: &ExecutionContext) -> Result<HandlerOutput, ConductorError> {
            Ok(HandlerOutput::text(ctx.instruction.clone()))
        }
    }

    fn catalog() -> Vec<HandlerDefinition> {
        vec![
            HandlerDefinition::new("doc-writer")
                .with_capabilities(&["documentation", "readme"])
                .with_tech_stack(&["markdown"]),
            HandlerDefinition::new("test-runner")
                .with_activation(&["run the tests"])
                .with_capabilities(&["testing"])
                .with_tech_stack(&["rust"]),
            HandlerDefinition::new("rust-fixer").with_tech_stack(&["rust"]),
        ]
    }

    #[test]
    fn test_activation_phrase_beats_keywords() {
        let best = find_best("Please run the tests for the rust crate", &catalog());
        assert_eq!(best.as_deref(), Some("test-runner"));
    }

    #[test]
    fn test_capability_match() {
        let best = find_best("Update the README with install steps", &catalog());
        assert_eq!(best.as_deref(), Some("doc-writer"));
    }

    #[test]
    fn test_ties_keep_catalog_order() {
        let handlers = vec![
            HandlerDefinition::new("first").with_tech_stack(&["go"]),
            HandlerDefinition::new("second").with_tech_stack(&["go"]),
        ];
        assert_eq!(find_best("port it to go", &handlers).as_deref(), Some("first"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(find_best("bake a cake", &catalog()), None);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo(HandlerDefinition::new("a"))));
        registry.register(Arc::new(Echo(HandlerDefinition::new("b"))));
        registry.register(Arc::new(Echo(
            HandlerDefinition::new("a").with_tech_stack(&["rust"]),
        )));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(
            registry.get("a").unwrap().definition().tech_stack,
            vec!["rust"]
        );
        assert!(registry.get("c").is_none());
    }
}
