//! Archform CLI - architecture diagram to CloudFormation template
//!
//! # Usage
//!
//! ```bash
//! # Explain a diagram, review the explanation, generate and refine
//! ./target/debug/archform-cli diagram.png
//!
//! # Accept the explanation as-is, print only final output
//! ./target/debug/archform-cli diagram.png --yes --quiet
//!
//! # Serve the conversation API (requires the `server` feature)
//! cargo build --features server --bin archform-cli
//! ./target/debug/archform-cli --server --port 8080
//! ```

use anyhow::Result;
use clap::Parser;

use archform_lib::cli::{initialize, run, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let ctx = initialize(&args).await?;

    if args.server {
        return serve(&ctx).await;
    }

    run(&ctx).await
}

#[cfg(feature = "server")]
async fn serve(ctx: &archform_lib::cli::CliContext) -> Result<()> {
    use archform_lib::cli::server::start_server;

    let server = &ctx.settings.server;
    let port = ctx.args.port.unwrap_or(server.port);
    let (addr, shutdown) = start_server(
        ctx.orchestrator.clone(),
        port,
        server.max_sessions,
        server.session_idle_secs,
    )
    .await?;

    eprintln!("Listening on http://{} (Ctrl+C to stop)", addr);
    tokio::signal::ctrl_c().await?;
    shutdown.cancel();
    Ok(())
}

#[cfg(not(feature = "server"))]
async fn serve(_ctx: &archform_lib::cli::CliContext) -> Result<()> {
    anyhow::bail!("--server requires a build with the `server` feature")
}
