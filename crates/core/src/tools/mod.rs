//! # Process and VCS Tools
//!
//! Thin async wrappers around external processes and git.
//!
//! - `git` - Stash-based snapshots of the working tree
//! - `terminal` - Subprocess runner with timeouts and a command blocklist

pub mod git;
pub mod terminal;

pub use git::{GitVcs, NoopVcs, VersionControl};
pub use terminal::{ProcessOutput, ProcessRequest, ProcessRunner, TokioProcessRunner};
