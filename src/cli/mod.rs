//! Command-line front end.
//!
//! Two ways to drive a conversation, both built from the same
//! [`bootstrap::initialize`] wiring:
//!
//! ```text
//! +------------+     +--------------+     +------------------+
//! | runner.rs  | --> |              |     | stdout (stream)  |
//! | repl.rs    |     | Orchestrator | --> | stderr (status)  |
//! +------------+     |              |     +------------------+
//! | server/    | --> |              | --> JSON TurnResult
//! +------------+     +--------------+
//! ```
//!
//! Interactive mode takes the diagram as an argument, shows the explanation
//! for review, generates, and then enters the REPL for updates and
//! validation. `--server` exposes the same operations over HTTP.

mod args;
mod bootstrap;
mod repl;
mod runner;

#[cfg(feature = "server")]
pub mod server;

pub use args::{media_type_for, Args};
pub use bootstrap::{build_orchestrator, initialize, CliContext};
pub use repl::{run_repl, ReplCommand};
pub use runner::{print_turn, run, StdoutSink};
