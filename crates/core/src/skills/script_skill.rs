//! # Script Handlers
//!
//! Handlers backed by an external program. The instruction is written to the
//! program's stdin and its stdout becomes the handler output.
//!
//! ## Catalog format
//!
//! ```json
//! [
//!   {
//!     "name": "doc-writer",
//!     "capabilities": ["documentation"],
//!     "program": "node",
//!     "args": ["scripts/doc-writer.js"],
//!     "timeoutSecs": 120
//!   }
//! ]
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::registry::{Handler, HandlerDefinition, HandlerOutput, HandlerRegistry};
use crate::error::ConductorError;
use crate::models::ExecutionContext;
use crate::tools::terminal::{ProcessRequest, ProcessRunner};

/// One catalog entry: handler metadata plus the program to run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpec {
    #[serde(flatten)]
    pub definition: HandlerDefinition,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub struct ScriptHandler {
    spec: ScriptSpec,
    runner: Arc<dyn ProcessRunner>,
}

impl ScriptHandler {
    pub fn new(spec: ScriptSpec, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { spec, runner }
    }

    fn request(&self, ctx: &ExecutionContext) -> ProcessRequest {
        ProcessRequest {
            program: self.spec.program.clone(),
            args: self.spec.args.clone(),
            timeout_secs: self.spec.timeout_secs,
            ..Default::default()
        }
        .in_dir(&ctx.working_directory)
        .with_stdin(ctx.instruction.as_str())
        .with_env("CONDUCTOR_HANDLER", self.spec.definition.name.as_str())
        .with_env("CONDUCTOR_TARGET_PATHS", ctx.target_paths.join(":"))
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    fn definition(&self) -> &HandlerDefinition {
        &self.spec.definition
    }

    async fn invoke(&self, ctx: &ExecutionContext) -> Result<HandlerOutput, ConductorError> {
        let output = self.runner.run(&self.request(ctx)).await?;

        if !output.success() {
            return Err(ConductorError::ScriptExecutionFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(HandlerOutput::text(output.stdout.trim_end()))
    }
}

/// Build a registry from a JSON catalog of [`ScriptSpec`]s
pub fn load_catalog(path: &Path, runner: Arc<dyn ProcessRunner>) -> Result<HandlerRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read handler catalog: {:?}", path))?;
    let specs: Vec<ScriptSpec> =
        serde_json::from_str(&content).context("Failed to parse handler catalog")?;

    let mut registry = HandlerRegistry::new();
    for spec in specs {
        registry.register(Arc::new(ScriptHandler::new(spec, Arc::clone(&runner))));
    }
    tracing::info!(handlers = registry.len(), "Handler catalog loaded");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::registry::SkillRepository;
    use crate::tools::terminal::ProcessOutput;
    use parking_lot::Mutex;

    /// Records requests and answers with a canned output
    struct FakeRunner {
        output: ProcessOutput,
        seen: Mutex<Vec<ProcessRequest>>,
    }

    impl FakeRunner {
        fn new(exit_code: i32, stdout: &str, stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                output: ProcessOutput {
                    exit_code: Some(exit_code),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    duration_ms: 1,
                },
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput> {
            self.seen.lock().push(request.clone());
            Ok(self.output.clone())
        }
    }

    fn spec() -> ScriptSpec {
        ScriptSpec {
            definition: HandlerDefinition::new("doc-writer"),
            program: "node".into(),
            args: vec!["doc.js".into()],
            timeout_secs: Some(5),
        }
    }

    #[tokio::test]
    async fn test_instruction_goes_to_stdin() {
        let runner = FakeRunner::new(0, "wrote README.md\n", "");
        let handler = ScriptHandler::new(spec(), runner.clone());
        let ctx = ExecutionContext::new("Write docs", "/work");

        let output = handler.invoke(&ctx).await.unwrap();
        assert_eq!(output.output, "wrote README.md");

        let seen = runner.seen.lock();
        assert_eq!(seen[0].stdin.as_deref(), Some("Write docs"));
        assert_eq!(seen[0].cwd.as_deref(), Some(Path::new("/work")));
        assert!(seen[0]
            .env
            .contains(&("CONDUCTOR_HANDLER".to_string(), "doc-writer".to_string())));
        assert_eq!(seen[0].timeout_secs, Some(5));
    }

    #[tokio::test]
    async fn test_nonzero_exit_maps_to_script_failure() {
        let handler = ScriptHandler::new(spec(), FakeRunner::new(2, "", "boom\n"));
        let err = handler
            .invoke(&ExecutionContext::new("Write docs", "/work"))
            .await
            .unwrap_err();

        match err {
            ConductorError::ScriptExecutionFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handlers.json");
        std::fs::write(
            &path,
            r#"[{"name":"doc-writer","capabilities":["documentation"],"program":"node","args":["doc.js"]},
                {"name":"tester","activationPhrases":["run the tests"],"program":"cargo","args":["test"]}]"#,
        )
        .unwrap();

        let registry = load_catalog(&path, FakeRunner::new(0, "", "")).unwrap();
        assert_eq!(registry.names(), vec!["doc-writer", "tester"]);
        assert_eq!(
            registry.list_handlers()[1].activation_phrases,
            vec!["run the tests"]
        );
    }
}
