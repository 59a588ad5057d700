//! Build command implementations (build, clean)

use std::path::Path;
use std::process::ExitCode;

use tracing::error;

use super::{site_root, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{clean_output, BuildContext, BuildSummary, Coordinator, Site};
use crate::config::{load_config, CliOverrides};
use crate::watch::{rebuild_on_change, site_excludes, Intervals, PollWatcher};

/// Run the build command
pub fn run_build(
    dir: Option<&Path>,
    watch: bool,
    nocache: bool,
    dev: bool,
    clean: bool,
    url: Option<String>,
    json: bool,
) -> ExitCode {
    let root = match site_root(dir) {
        Ok(root) => root,
        Err(code) => return code,
    };

    let overrides = CliOverrides { url, clean: clean.then_some(true) };
    let context = BuildContext::new(root.clone())
        .with_dev(dev)
        .with_cache(watch && !nocache)
        .with_overrides(overrides);

    if !watch {
        let mut site = Site::open(context);
        return match site.build() {
            Ok(summary) => {
                report(&summary, json);
                ExitCode::from(EXIT_SUCCESS)
            }
            Err(e) => {
                eprintln!("Build error: {}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    let config = match load_config(&root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let coordinator = match Coordinator::spawn(Site::open(context)) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Error starting build thread: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match coordinator.build() {
        Ok(summary) => report(&summary, json),
        Err(e) => error!("build failed: {}", e),
    }

    let watcher = match site_excludes(&root, &config.watch)
        .and_then(|excludes| PollWatcher::watch(&root, excludes, Intervals::from_config(&config.watch)))
    {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Watch error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    println!("Watching {} (press Ctrl+C to stop)", root.display());
    rebuild_on_change(&watcher, &coordinator.handle());
    coordinator.shutdown();
    ExitCode::from(EXIT_SUCCESS)
}

/// Run the clean command
pub fn run_clean(dir: Option<&Path>) -> ExitCode {
    let root = match site_root(dir) {
        Ok(root) => root,
        Err(code) => return code,
    };

    match clean_output(&root) {
        Ok(true) => ExitCode::from(EXIT_SUCCESS),
        Ok(false) => {
            println!("Nothing to clean");
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Clean error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn report(summary: &BuildSummary, json: bool) {
    if !json {
        println!("{}", summary);
        return;
    }
    match serde_json::to_string_pretty(summary) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error encoding summary: {}", e),
    }
}
