//! CLI argument parsing using clap.

use clap::Parser;
use std::path::{Path, PathBuf};

/// Archform CLI - turn an architecture diagram into a CloudFormation template
#[derive(Parser, Debug, Clone)]
#[command(name = "archform-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Architecture diagram to explain (PNG, JPEG, GIF or WebP)
    #[arg(required_unless_present = "server")]
    pub image: Option<PathBuf>,

    /// Settings file (default: ~/.archform/settings.toml)
    #[arg(short = 's', long, env = "ARCHFORM_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Override the conversation model from settings
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Accept the model's explanation without prompting for edits
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Only print final templates (suppress streaming)
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Serve the conversation API over HTTP instead of running interactively
    #[arg(long)]
    pub server: bool,

    /// Port for --server (default: server.port from settings)
    #[arg(long, requires = "server")]
    pub port: Option<u16>,
}

impl Args {
    /// Media type for the image, from its extension.
    pub fn image_media_type(&self) -> anyhow::Result<&'static str> {
        let path = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No image given"))?;
        media_type_for(path)
    }
}

/// Media type for a diagram file, from its extension.
pub fn media_type_for(path: &Path) -> anyhow::Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => anyhow::bail!(
            "Unsupported image '{}': expected .png, .jpg, .gif or .webp",
            path.display()
        ),
    }
}
