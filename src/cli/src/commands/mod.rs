//! CLI command definitions and dispatch.

mod push;
mod verify;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use containerdisks_core::config::DEFAULT_REGISTRY;
use containerdisks_core::Options;

/// Publish and verify KubeVirt containerdisks.
#[derive(Parser)]
#[command(name = "containerdisks", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Registry path the containerdisks are published to
    #[arg(long, global = true, default_value = DEFAULT_REGISTRY)]
    pub registry: String,

    /// Talk to the registry over plain HTTP or with unverified TLS
    #[arg(long = "insecure-skip-tls", global = true)]
    pub insecure_skip_tls: bool,

    /// Do everything except pushing to the registry
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Only process the artifact with this name:version (e.g. "fedora:36")
    #[arg(long, global = true)]
    pub focus: Option<String>,

    /// YAML file declaring additional generic artifacts
    #[arg(long, global = true)]
    pub catalog_file: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn options(&self) -> Options {
        Options {
            registry: self.registry.clone(),
            allow_insecure_registry: self.insecure_skip_tls,
            dry_run: self.dry_run,
            focus: self.focus.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build and push containerdisks whose upstream release changed
    Push(push::PushArgs),
    /// Verify that containerdisks are bootable and guests are working
    Verify(verify::VerifyArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Returns the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Push(args) => push::execute(&cli.global, args).await,
        Command::Verify(args) => verify::execute(&cli.global, args).await,
    }
}
