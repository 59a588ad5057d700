//! Local development server.
//!
//! Serves `out/` over HTTP while a watcher thread requests rebuilds through
//! the build coordinator. Builds are dev builds: no compression, and
//! `static.dev_url` for static files.

use crate::build::{BuildContext, BuildError, Coordinator, Site};
use crate::config::{load_config, ConfigError};
use crate::watch::{rebuild_on_change, site_excludes, Intervals, PollWatcher, WatchError};
use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tower_http::services::ServeDir;
use tracing::{error, info};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// How to run the server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub addr: SocketAddr,
    /// Rebuild when site files change
    pub watch: bool,
    /// Keep parsed pages and posts between rebuilds
    pub cache: bool,
}

/// Build the site at `root` and serve it until Ctrl+C.
///
/// A failing first build is logged and the server still starts, so the
/// error can be fixed while watching.
pub fn serve(root: &Path, options: &ServeOptions) -> Result<(), ServeError> {
    let config = load_config(root)?;
    let context = BuildContext::new(root.to_path_buf()).with_dev(true).with_cache(options.cache);
    let coordinator = Coordinator::spawn(Site::open(context))?;

    match coordinator.build() {
        Ok(summary) => info!("{}", summary),
        Err(e) => error!("build failed: {}", e),
    }

    let mut consumer = None;
    if options.watch {
        let excludes = site_excludes(root, &config.watch)?;
        let watcher = PollWatcher::watch(root, excludes, Intervals::from_config(&config.watch))?;
        let stopper = watcher.stopper();
        let handle = coordinator.handle();
        let thread = std::thread::Builder::new()
            .name("kiln-rebuild".to_string())
            .spawn(move || rebuild_on_change(&watcher, &handle))?;
        consumer = Some((stopper, thread));
    }

    let out_dir = root.join(crate::build::OUT_DIR);
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let served = runtime.block_on(listen(options.addr, out_dir));

    if let Some((stopper, thread)) = consumer {
        if let Some(stopper) = stopper {
            stopper.stop();
        }
        let _ = thread.join();
    }
    coordinator.shutdown();
    served
}

async fn listen(addr: SocketAddr, out_dir: PathBuf) -> Result<(), ServeError> {
    let app = Router::new().fallback_service(ServeDir::new(&out_dir));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving {} at http://{}", out_dir.display(), listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
