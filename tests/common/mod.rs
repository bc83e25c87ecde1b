//! Test helpers for integration tests.
//!
//! Provides a log capture writer, a fake world and helpers for writing
//! script files.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use scripthost::{CommandSender, ServerPos, SessionHandle, WorldView};

/// Default timeout for waiting on the directory watcher.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Log output collected by a scoped subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines logged at `level`.
    pub fn lines_at(&self, level: Level) -> Vec<String> {
        let marker = format!(" {} ", level);
        self.contents()
            .lines()
            .filter(|line| line.contains(&marker))
            .map(str::to_string)
            .collect()
    }
}

pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter(Arc::clone(&self.0))
    }
}

/// Run `f` with every event at `level` or above captured.
pub fn capture_logs<T>(level: Level, f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs)
}

/// World with fixed player positions.
#[derive(Default)]
pub struct TestWorld {
    positions: HashMap<i32, ServerPos>,
}

impl TestWorld {
    pub fn with_player(mut self, entity_id: i32, position: ServerPos) -> Self {
        self.positions.insert(entity_id, position);
        self
    }
}

impl WorldView for TestWorld {
    fn player_position(&self, entity_id: i32) -> Option<ServerPos> {
        self.positions.get(&entity_id).copied()
    }
}

/// A connected player sender.
pub fn player(name: &str, entity_id: i32) -> CommandSender {
    CommandSender::Player {
        name: name.to_string(),
        session: Some(SessionHandle {
            entity_id,
            player_name: name.to_string(),
            platform_id: format!("Steam_{entity_id}"),
        }),
    }
}

/// Write a script below `dir`, creating parent directories.
pub fn write_script(dir: &Path, rel: &str, body: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, body).unwrap();
    path
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}
