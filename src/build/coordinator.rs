//! Single-flight build coordinator.
//!
//! One thread owns the [`SiteBuilder`] and runs at most one build at a time.
//! Callers on any thread send a request carrying its own reply channel and
//! block until their build has run; requests are served in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use kiln::build::{BuildContext, Coordinator, Site};
//!
//! let coordinator = Coordinator::spawn(Site::open(BuildContext::new(root)))?;
//! let handle = coordinator.handle();
//! std::thread::spawn(move || handle.build());
//! let summary = coordinator.build()?;
//! coordinator.shutdown();
//! ```

use crate::build::{BuildError, BuildSummary, Site};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::debug;

type Reply = Result<BuildSummary, BuildError>;

/// Something that can run a build pass.
pub trait SiteBuilder: Send {
    fn build(&mut self) -> Reply;
}

impl SiteBuilder for Site {
    fn build(&mut self) -> Reply {
        Site::build(self)
    }
}

impl<F> SiteBuilder for F
where
    F: FnMut() -> Reply + Send,
{
    fn build(&mut self) -> Reply {
        self()
    }
}

struct BuildRequest {
    respond_to: Sender<Reply>,
}

enum Message {
    Build(BuildRequest),
    Stop,
}

/// Cloneable sender side of a [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: Sender<Message>,
}

impl CoordinatorHandle {
    /// Request a build and wait for its own result.
    ///
    /// Fails with [`BuildError::CoordinatorStopped`] once the coordinator
    /// thread has exited.
    pub fn build(&self) -> Reply {
        let (respond_to, reply) = mpsc::channel();
        self.requests
            .send(Message::Build(BuildRequest { respond_to }))
            .map_err(|_| BuildError::CoordinatorStopped)?;
        reply.recv().map_err(|_| BuildError::CoordinatorStopped)?
    }
}

/// Owner of the build thread.
pub struct Coordinator {
    handle: CoordinatorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Start the build thread around `builder`.
    pub fn spawn<B: SiteBuilder + 'static>(builder: B) -> io::Result<Self> {
        let (requests, inbox) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("kiln-build".to_string())
            .spawn(move || serve(builder, inbox))?;
        Ok(Self { handle: CoordinatorHandle { requests }, thread: Some(thread) })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Request a build and wait for its result.
    pub fn build(&self) -> Reply {
        self.handle.build()
    }

    /// Stop after the requests already queued and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.requests.send(Message::Stop);
            let _ = thread.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve<B: SiteBuilder>(mut builder: B, inbox: Receiver<Message>) {
    for message in inbox {
        match message {
            Message::Build(request) => {
                let reply = builder.build();
                if request.respond_to.send(reply).is_err() {
                    debug!("build requester went away");
                }
            }
            Message::Stop => break,
        }
    }
    debug!("build coordinator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_builder(
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicBool>,
    ) -> impl FnMut() -> Reply + Send + 'static {
        move || {
            assert!(!active.swap(true, Ordering::SeqCst), "builds overlapped");
            std::thread::sleep(Duration::from_millis(5));
            let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
            active.store(false, Ordering::SeqCst);
            Ok(BuildSummary { pages: n, ..Default::default() })
        }
    }

    #[test]
    fn test_serializes_concurrent_requests() {
        let runs = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicBool::new(false));
        let coordinator = Coordinator::spawn(counting_builder(Arc::clone(&runs), active)).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = coordinator.handle();
                std::thread::spawn(move || handle.build().unwrap().pages)
            })
            .collect();
        let mut seen: Vec<usize> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        seen.sort_unstable();

        assert_eq!(seen, (1..=8).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::SeqCst), 8);
        coordinator.shutdown();
    }

    #[test]
    fn test_each_caller_gets_its_own_error() {
        let mut calls = 0;
        let coordinator = Coordinator::spawn(move || {
            calls += 1;
            if calls == 1 {
                Err(BuildError::CoordinatorStopped)
            } else {
                Ok(BuildSummary::default())
            }
        })
        .unwrap();

        assert!(coordinator.build().is_err());
        assert!(coordinator.build().is_ok());
    }

    #[test]
    fn test_handle_after_shutdown() {
        let coordinator = Coordinator::spawn(|| Ok::<_, BuildError>(BuildSummary::default())).unwrap();
        let handle = coordinator.handle();
        coordinator.shutdown();
        assert!(matches!(handle.build(), Err(BuildError::CoordinatorStopped)));
    }
}
