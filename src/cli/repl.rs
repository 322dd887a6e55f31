//! Lightweight REPL for follow-up turns on a generated template.
//!
//! Commands:
//! - `/validate` - Validate the current template
//! - `/resolve <error>` - Fix the template against an error message
//! - `/image <path>` - Explain and generate from a new diagram (after `/clear`)
//! - `/template` - Print the current template
//! - `/versions` - List stored versions
//! - `/clear` - Start a new session
//! - `/quit`, `/exit`, `/q` - Exit the REPL
//!
//! Any other input is sent as an update instruction.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;

use crate::session::Session;

use super::bootstrap::CliContext;
use super::runner::{print_turn, sink_for, upload_and_confirm};

/// REPL command variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Quit,
    Validate,
    Resolve(String),
    Image(PathBuf),
    Template,
    Versions,
    Clear,
    /// Unknown command (will show help)
    Unknown(String),
    /// Free text, sent as an update instruction
    Update(String),
    Empty,
}

impl ReplCommand {
    /// Parse user input into a REPL command.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }

        if !trimmed.starts_with('/') {
            return ReplCommand::Update(trimmed.to_string());
        }

        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };

        match command.to_lowercase().as_str() {
            "/quit" | "/exit" | "/q" => ReplCommand::Quit,
            "/validate" => ReplCommand::Validate,
            "/resolve" => ReplCommand::Resolve(rest.to_string()),
            "/image" if !rest.is_empty() => ReplCommand::Image(PathBuf::from(rest)),
            "/template" => ReplCommand::Template,
            "/versions" => ReplCommand::Versions,
            "/clear" => ReplCommand::Clear,
            _ => ReplCommand::Unknown(trimmed.to_string()),
        }
    }
}

/// Run the REPL on `session` until the user exits or on EOF (Ctrl+D).
pub async fn run_repl(ctx: &CliContext, session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let sink = sink_for(&ctx.args);

    eprintln!();
    eprintln!("Type an update instruction, /validate, /resolve <error>, /template, /versions, /clear or /quit\n");

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            eprintln!("\nGoodbye!");
            break;
        }

        match ReplCommand::parse(&input) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => {
                eprintln!("Goodbye!");
                break;
            }
            ReplCommand::Unknown(cmd) => {
                eprintln!("Unknown command: {}", cmd);
                eprintln!(
                    "Available: /validate, /resolve <error>, /image <path>, /template, /versions, /clear, /quit"
                );
            }
            ReplCommand::Update(instruction) => {
                let result = ctx
                    .orchestrator
                    .send_update_instruction(session, &instruction, sink)
                    .await;
                print_turn(&result, sink.is_some());
            }
            ReplCommand::Validate => {
                let result = ctx.orchestrator.request_validate(session, sink).await;
                print_turn(&result, sink.is_some());
            }
            ReplCommand::Resolve(error) => {
                let result = ctx
                    .orchestrator
                    .resolve_error(session, &error, sink)
                    .await;
                print_turn(&result, sink.is_some());
            }
            ReplCommand::Image(path) => {
                if let Err(e) = upload_and_confirm(ctx, session, &path).await {
                    eprintln!("Error: {:#}", e);
                }
            }
            ReplCommand::Template => match ctx.orchestrator.current_template(&session.id).await {
                Ok(Some(revision)) => println!("{}", revision.content),
                Ok(None) => eprintln!("No template for this session"),
                Err(e) => eprintln!("Error: {}", e),
            },
            ReplCommand::Versions => match ctx.orchestrator.template_versions(&session.id).await {
                Ok(versions) if versions.is_empty() => eprintln!("No stored versions"),
                Ok(versions) => {
                    for revision in versions {
                        eprintln!(
                            "v{}  {:?}  {}",
                            revision.version,
                            revision.validity,
                            revision.created_at.to_rfc3339()
                        );
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            ReplCommand::Clear => {
                let result = ctx.orchestrator.clear_session(session).await;
                eprintln!(
                    "Started session {}. Load a new diagram with /image <path>",
                    result.session_id
                );
            }
        }

        println!();
    }

    Ok(())
}
