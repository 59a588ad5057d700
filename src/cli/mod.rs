//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
#[cfg(feature = "serve")]
mod serve;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::config::{find_site_root, SITE_CONFIG};

/// Process exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Kiln - build a static site from pages, posts and content-addressed assets
#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln - build a static site from pages, posts and content-addressed assets")]
#[command(version)]
pub struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the site into out/
    Build {
        /// Site root (default: nearest directory containing site.toml)
        #[arg(short = 'C', long = "dir")]
        dir: Option<PathBuf>,

        /// Rebuild whenever a file in the site changes
        #[arg(short, long)]
        watch: bool,

        /// Parse every file on each rebuild in watch mode
        #[arg(long)]
        nocache: bool,

        /// Dev build: no compression, static.dev_url for static files
        #[arg(long)]
        dev: bool,

        /// Remove out/ before building
        #[arg(long)]
        clean: bool,

        /// Base URL to build with instead of site.toml's `url`
        #[arg(long)]
        url: Option<String>,

        /// Print the build summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build the site, serve out/ over HTTP and rebuild on changes
    #[cfg(feature = "serve")]
    Serve {
        /// Site root (default: nearest directory containing site.toml)
        #[arg(short = 'C', long = "dir")]
        dir: Option<PathBuf>,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,

        /// Parse every file on each rebuild
        #[arg(long)]
        nocache: bool,

        /// Serve the first build only
        #[arg(long)]
        no_watch: bool,
    },

    /// Remove the output directory
    Clean {
        /// Site root (default: nearest directory containing site.toml)
        #[arg(short = 'C', long = "dir")]
        dir: Option<PathBuf>,
    },
}

/// Run the CLI application
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build { dir, watch, nocache, dev, clean, url, json } => {
            build::run_build(dir.as_deref(), watch, nocache, dev, clean, url, json)
        }
        #[cfg(feature = "serve")]
        Commands::Serve { dir, addr, nocache, no_watch } => {
            serve::run_serve(dir.as_deref(), addr, nocache, no_watch)
        }
        Commands::Clean { dir } => build::run_clean(dir.as_deref()),
    }
}

/// Install the tracing subscriber on stderr. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve the site root from `-C` or by searching upwards from the
/// working directory.
pub(crate) fn site_root(dir: Option<&Path>) -> Result<PathBuf, ExitCode> {
    match dir {
        Some(dir) if dir.join(SITE_CONFIG).is_file() => Ok(dir.to_path_buf()),
        Some(dir) => {
            eprintln!("Error: {} not found in {}", SITE_CONFIG, dir.display());
            Err(ExitCode::from(EXIT_INVALID_ARGS))
        }
        None => find_site_root().ok_or_else(|| {
            eprintln!("Error: no {} found in this directory or any parent", SITE_CONFIG);
            ExitCode::from(EXIT_INVALID_ARGS)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from(["kiln", "build", "-C", "site", "--watch", "--nocache", "--dev"]).unwrap();
        match cli.command {
            Commands::Build { dir, watch, nocache, dev, clean, url, json } => {
                assert_eq!(dir, Some(PathBuf::from("site")));
                assert!(watch && nocache && dev);
                assert!(!clean && !json);
                assert!(url.is_none());
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_build_url() {
        let cli = Cli::try_parse_from(["kiln", "build", "--url", "https://preview.example.com"]).unwrap();
        match cli.command {
            Commands::Build { url, .. } => assert_eq!(url.as_deref(), Some("https://preview.example.com")),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["kiln", "clean", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_site_root_from_dir() {
        let dir = TempDir::new().unwrap();
        assert!(site_root(Some(dir.path())).is_err());
        std::fs::write(dir.path().join(SITE_CONFIG), "").unwrap();
        assert_eq!(site_root(Some(dir.path())).unwrap(), dir.path());
    }
}
