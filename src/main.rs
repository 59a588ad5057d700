//! Kiln - command-line static site builder

use std::process::ExitCode;

use kiln::cli;

fn main() -> ExitCode {
    cli::run()
}
