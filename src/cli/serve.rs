//! Serve command implementation

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use super::{site_root, EXIT_ERROR, EXIT_SUCCESS};
use crate::serve::{serve, ServeOptions};

/// Run the serve command
pub fn run_serve(dir: Option<&Path>, addr: SocketAddr, nocache: bool, no_watch: bool) -> ExitCode {
    let root = match site_root(dir) {
        Ok(root) => root,
        Err(code) => return code,
    };

    let options = ServeOptions { addr, watch: !no_watch, cache: !no_watch && !nocache };
    match serve(&root, &options) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Serve error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
