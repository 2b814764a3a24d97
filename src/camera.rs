//! Frame sources.
//!
//! The relay only needs JPEG bytes. A [`Camera`] hands out a [`FrameReader`]
//! when the stream starts; dropping the reader releases the device.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RelayError;

/// A device that can be opened for reading frames.
pub trait Camera: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameReader>, RelayError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// An open camera.
pub trait FrameReader: Send {
    /// Next JPEG-encoded frame.
    fn read_frame(&mut self) -> Result<Vec<u8>, RelayError>;
}

/// Replays the JPEG files of a directory in name order, looping forever.
#[derive(Debug, Clone)]
pub struct DirectoryCamera {
    dir: PathBuf,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

/// Sorted JPEG paths directly inside `dir`.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, RelayError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| RelayError::Camera(format!("cannot read {}: {e}", dir.display())))?;
    let mut frames: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_jpeg(p))
        .collect();
    frames.sort();
    Ok(frames)
}

impl Camera for DirectoryCamera {
    fn open(&self) -> Result<Box<dyn FrameReader>, RelayError> {
        let frames = list_frames(&self.dir)?;
        if frames.is_empty() {
            return Err(RelayError::Camera(format!(
                "no .jpg frames in {}",
                self.dir.display()
            )));
        }
        Ok(Box::new(DirectoryReader { frames, next: 0 }))
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

struct DirectoryReader {
    frames: Vec<PathBuf>,
    next: usize,
}

impl FrameReader for DirectoryReader {
    fn read_frame(&mut self) -> Result<Vec<u8>, RelayError> {
        let path = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();
        fs::read(path).map_err(|e| RelayError::Camera(format!("{}: {e}", path.display())))
    }
}
