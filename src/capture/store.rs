//! # Frame persistence backends.
//!
//! The recorder never encodes pixels itself. It asks a [`FrameStore`] to open clip
//! writers (video mode) or to save single images (image mode). Paths handed to the
//! store are **stems**: the store appends its own extension.
//!
//! [`RawFrameStore`] is the built-in backend:
//! - clips: `<stem>.rawv`, a `RAWV` header followed by one framed record per frame
//!   (`width`, `height`, `channels` as little-endian `u32`, then the pixel bytes);
//! - images: binary PPM (`.ppm`) for 3-channel frames, PGM (`.pgm`) for 1-channel
//!   frames, raw bytes (`.bin`) otherwise.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::capture::Frame;
use crate::error::PersistenceError;

/// An open clip (video file) accepting frames in order.
pub trait ClipWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), PersistenceError>;

    /// Flushes and closes the clip.
    fn finish(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Persistence backend used by the recorder.
pub trait FrameStore: Send + Sync + 'static {
    /// Opens a new clip at `stem`. `first` is the first frame that will be written
    /// (stores use it to learn the geometry).
    fn open_clip(
        &self,
        stem: &Path,
        fps: u32,
        first: &Frame,
    ) -> Result<Box<dyn ClipWriter>, PersistenceError>;

    /// Writes one frame as an individual image at `stem`.
    fn save_image(&self, stem: &Path, frame: &Frame) -> Result<(), PersistenceError>;
}

/// Codec-free store writing raw containers and netpbm images.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawFrameStore;

impl RawFrameStore {
    pub const CLIP_MAGIC: &'static [u8; 4] = b"RAWV";
}

struct RawClip {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ClipWriter for RawClip {
    fn write(&mut self, frame: &Frame) -> Result<(), PersistenceError> {
        let mut header = [0u8; 12];
        header[0..4].copy_from_slice(&frame.width.to_le_bytes());
        header[4..8].copy_from_slice(&frame.height.to_le_bytes());
        header[8..12].copy_from_slice(&u32::from(frame.channels).to_le_bytes());
        self.out
            .write_all(&header)
            .and_then(|_| self.out.write_all(&frame.data))
            .map_err(|e| PersistenceError::io(&self.path, e))
    }

    fn finish(mut self: Box<Self>) -> Result<(), PersistenceError> {
        self.out
            .flush()
            .map_err(|e| PersistenceError::io(&self.path, e))
    }
}

impl FrameStore for RawFrameStore {
    fn open_clip(
        &self,
        stem: &Path,
        fps: u32,
        _first: &Frame,
    ) -> Result<Box<dyn ClipWriter>, PersistenceError> {
        let path = stem.with_extension("rawv");
        let file = File::create(&path).map_err(|e| PersistenceError::io(&path, e))?;
        let mut out = BufWriter::with_capacity(256 * 1024, file);
        out.write_all(Self::CLIP_MAGIC)
            .and_then(|_| out.write_all(&fps.to_le_bytes()))
            .map_err(|e| PersistenceError::io(&path, e))?;
        Ok(Box::new(RawClip { path, out }))
    }

    fn save_image(&self, stem: &Path, frame: &Frame) -> Result<(), PersistenceError> {
        let (path, header) = match frame.channels {
            3 => (
                stem.with_extension("ppm"),
                format!("P6\n{} {}\n255\n", frame.width, frame.height),
            ),
            1 => (
                stem.with_extension("pgm"),
                format!("P5\n{} {}\n255\n", frame.width, frame.height),
            ),
            _ => (stem.with_extension("bin"), String::new()),
        };
        if !frame.is_valid() {
            return Err(PersistenceError::Encode {
                path,
                reason: format!(
                    "{} bytes do not match {}x{}x{}",
                    frame.data.len(),
                    frame.width,
                    frame.height,
                    frame.channels
                ),
            });
        }

        let file = File::create(&path).map_err(|e| PersistenceError::io(&path, e))?;
        let mut out = BufWriter::new(file);
        out.write_all(header.as_bytes())
            .and_then(|_| out.write_all(&frame.data))
            .and_then(|_| out.flush())
            .map_err(|e| PersistenceError::io(&path, e))
    }
}
