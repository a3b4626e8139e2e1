//! # Session directory allocation.
//!
//! A session is one experiment iteration. Its id is `max(existing numeric
//! subdirectories) + 1`, so ids are append-only and never reused, even when a
//! session was abandoned half way.
//!
//! ```text
//! <base>/
//!   1/ task/ restore/ status.txt
//!   2/ task/ restore/
//!   3/ ...                ◄── allocate(base) creates the next one
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory set of one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDirs {
    /// Numeric session id (starts at 1).
    pub id: u64,
    /// `<base>/<id>`
    pub session: PathBuf,
    /// `<base>/<id>/task`
    pub task: PathBuf,
    /// `<base>/<id>/restore`
    pub restore: PathBuf,
}

impl SessionDirs {
    /// Path of the status file written at RESETTING entry.
    pub fn status_file(&self) -> PathBuf {
        self.session.join("status.txt")
    }
}

/// Allocates the next session under `base`, creating `base` itself if needed.
///
/// Only immediate subdirectories whose names parse as non-negative integers count.
/// Not atomic across processes; a single coordinator owns a base directory.
pub fn allocate(base: &Path) -> io::Result<SessionDirs> {
    fs::create_dir_all(base)?;

    let mut last = 0u64;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse_id) {
            last = last.max(id);
        }
    }

    let id = last + 1;
    let session = base.join(id.to_string());
    let task = session.join("task");
    let restore = session.join("restore");
    fs::create_dir_all(&task)?;
    fs::create_dir_all(&restore)?;

    Ok(SessionDirs {
        id,
        session,
        task,
        restore,
    })
}

fn parse_id(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
