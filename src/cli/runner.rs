//! Interactive conversation runner.
//!
//! Uploads the diagram, lets the user review the explanation, runs the
//! generate cycle and then hands over to the REPL.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::llm::TextSink;
use crate::orchestrator::{TurnResult, TurnStatus};
use crate::session::Session;

use super::args::{media_type_for, Args};
use super::bootstrap::CliContext;
use super::repl::run_repl;

/// Streams model output to stdout as it arrives.
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn on_partial_text(&self, text: &str) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn on_retry(&self, attempt: u32) {
        eprintln!("\n[retry] model throttled, attempt {} abandoned; retrying", attempt);
    }
}

pub(crate) fn sink_for(args: &Args) -> Option<&'static dyn TextSink> {
    if args.quiet {
        None
    } else {
        Some(&StdoutSink)
    }
}

/// Run the full conversation for the image given on the command line.
pub async fn run(ctx: &CliContext) -> Result<()> {
    let image = ctx
        .args
        .image
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No image given"))?;

    let mut session = Session::new();
    if !upload_and_confirm(ctx, &mut session, image).await? {
        anyhow::bail!("Could not generate a template for {}", image.display());
    }

    run_repl(ctx, &mut session).await
}

/// Upload `image`, review the explanation, and generate. Returns whether a
/// template was produced.
pub async fn upload_and_confirm(
    ctx: &CliContext,
    session: &mut Session,
    image: &Path,
) -> Result<bool> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let media_type = media_type_for(image)?;
    let sink = sink_for(&ctx.args);

    eprintln!("[explain] {}", image.display());
    let result = ctx
        .orchestrator
        .upload_image(session, &bytes, media_type, sink)
        .await;
    print_turn(&result, sink.is_some());
    if !result.is_ok() {
        return Ok(false);
    }

    let explanation = if ctx.args.yes {
        result.explanation.clone().unwrap_or_default()
    } else {
        review_explanation(result.explanation.as_deref().unwrap_or_default())?
    };

    eprintln!("[generate] generating template");
    let result = ctx
        .orchestrator
        .confirm_explanation(session, &explanation, sink)
        .await;
    print_turn(&result, sink.is_some());
    Ok(result.is_ok())
}

/// Let the user accept the explanation or type a replacement.
fn review_explanation(explanation: &str) -> Result<String> {
    eprintln!();
    eprintln!("Press Enter to accept the explanation, or type a corrected one and finish with an empty line:");

    let stdin = io::stdin();
    let mut edited = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        edited.push(line);
    }

    if edited.is_empty() {
        Ok(explanation.to_string())
    } else {
        Ok(edited.join("\n"))
    }
}

/// Print the outcome of one turn. Streamed text is already on stdout.
pub fn print_turn(result: &TurnResult, streamed: bool) {
    if streamed {
        println!();
    }

    match result.status {
        TurnStatus::Ok => {
            if !streamed {
                if let Some(turn) = result.chat_turns_delta.last() {
                    println!("{}", turn.text);
                }
            }
            if let Some(version) = result.current_version {
                let validity = result
                    .current_validity
                    .map(|v| format!("{:?}", v).to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string());
                eprintln!("[template] v{} ({})", version, validity);
            }
            if let Some(diagnostic) = &result.diagnostic {
                eprintln!("[validation] {}", diagnostic);
            }
        }
        TurnStatus::Locked | TurnStatus::Rejected | TurnStatus::Failed => {
            if let Some(error) = &result.error {
                eprintln!("[{}] {}", error.kind, error.message);
            }
        }
    }
}
