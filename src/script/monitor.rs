//! Filesystem watcher feeding the script loader.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use super::loader::{FileEvent, ScriptLoader};
use crate::config::ScriptsConfig;
use crate::Result;

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Watches the scripts directory and applies changes to a [`ScriptLoader`].
pub struct ScriptDirectoryMonitor {
    loader: Arc<Mutex<ScriptLoader>>,
    watcher: Option<Box<dyn Watcher + Send>>,
    control_handle: Option<WatcherControlHandle>,
}

struct WatcherControlHandle {
    stop_sender: Sender<()>,
    thread_handle: thread::JoinHandle<()>,
}

impl ScriptDirectoryMonitor {
    /// Scan the directory and, if configured, start watching it.
    ///
    /// The initial scan completes before this returns.
    pub fn start(mut loader: ScriptLoader, config: &ScriptsConfig) -> Result<Self> {
        loader.ensure_scripts_dir()?;
        let scan = loader.scan();
        info!(
            "Loaded {} scripts from {} ({} unreadable entries)",
            scan.added,
            loader.scripts_dir().display(),
            scan.errors.len()
        );

        let scripts_dir = loader.scripts_dir().to_path_buf();
        let loader = Arc::new(Mutex::new(loader));
        if !config.watch {
            debug!("Script directory watching disabled");
            return Ok(Self {
                loader,
                watcher: None,
                control_handle: None,
            });
        }

        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handler = move |res: notify::Result<Event>| {
            if let Err(e) = event_tx.send(res) {
                debug!(error = %e, "Script monitor stopped, dropping file event");
            }
        };
        let mut watcher: Box<dyn Watcher + Send> = if config.poll_interval_ms > 0 {
            let poll_config = notify::Config::default()
                .with_poll_interval(Duration::from_millis(config.poll_interval_ms));
            Box::new(PollWatcher::new(handler, poll_config)?)
        } else {
            Box::new(RecommendedWatcher::new(handler, notify::Config::default())?)
        };

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&scripts_dir, mode)?;
        info!(path = %scripts_dir.display(), "Watching scripts directory");

        let thread_loader = Arc::clone(&loader);
        let thread_handle = thread::Builder::new()
            .name("script-monitor".to_string())
            .spawn(move || Self::event_loop(thread_loader, event_rx, stop_rx))?;

        Ok(Self {
            loader,
            watcher: Some(watcher),
            control_handle: Some(WatcherControlHandle {
                stop_sender: stop_tx,
                thread_handle,
            }),
        })
    }

    /// The loader shared with the watcher thread.
    pub fn loader(&self) -> Arc<Mutex<ScriptLoader>> {
        Arc::clone(&self.loader)
    }

    pub fn is_watching(&self) -> bool {
        self.control_handle.is_some()
    }

    /// Stop watching and wait for the watcher thread to exit.
    pub fn stop(&mut self) {
        self.watcher = None;
        if let Some(handle) = self.control_handle.take() {
            let _ = handle.stop_sender.send(());
            if handle.thread_handle.join().is_err() {
                error!("Script monitor thread panicked");
            }
            debug!("Script monitor stopped");
        }
    }

    fn event_loop(
        loader: Arc<Mutex<ScriptLoader>>,
        event_rx: Receiver<notify::Result<Event>>,
        stop_rx: Receiver<()>,
    ) {
        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match event_rx.recv_timeout(STOP_CHECK_INTERVAL) {
                Ok(Ok(event)) => {
                    let events = translate(&event);
                    if events.is_empty() {
                        continue;
                    }
                    let mut loader = loader.lock().unwrap_or_else(PoisonError::into_inner);
                    for file_event in events {
                        loader.apply(file_event);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Script directory watcher error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl Drop for ScriptDirectoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map a watcher event onto loader events, preserving path order.
pub fn translate(event: &Event) -> Vec<FileEvent> {
    let paths = event.paths.iter().cloned();
    match &event.kind {
        EventKind::Create(_) => paths.map(FileEvent::Created).collect(),
        EventKind::Remove(_) => paths.map(FileEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(FileEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(FileEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            FileEvent::Removed(event.paths[0].clone()),
            FileEvent::Created(event.paths[1].clone()),
        ],
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|path| existence_event(path, FileEvent::Created))
            .collect(),
        EventKind::Modify(_) | EventKind::Any => paths
            .map(|path| existence_event(path, FileEvent::Modified))
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

fn existence_event(path: PathBuf, present: fn(PathBuf) -> FileEvent) -> FileEvent {
    if path.exists() {
        present(path)
    } else {
        FileEvent::Removed(path)
    }
}
