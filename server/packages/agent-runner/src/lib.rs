//! Subprocess plumbing for driving a command-line agent.
//!
//! [`process::run`] executes a shell command to completion with a timeout,
//! [`stream::stream_run`] does the same while classifying every output line
//! and forwarding it over a channel as it arrives.

pub mod invocation;
pub mod process;
pub mod stream;

pub use invocation::{shell_quote, AgentInvocation};
pub use process::{run, ProcessResult, RunRequest};
pub use stream::{classify_line, stream_run, StreamEvent, MILESTONE_GLYPH};
