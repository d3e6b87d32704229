//! Slicing engine adapter.

pub mod command;
pub mod error;

use std::path::{Path, PathBuf};

pub use command::CommandSlicer;
pub use error::SliceError;

/// A finished slice: the G-code written by the engine and the text to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceOutput {
    pub gcode_path: PathBuf,
    /// Engine stdout followed by the comment lines of the G-code.
    pub report: String,
    pub stderr: String,
}

/// Turns one geometry file into G-code. Implementations block the calling
/// worker thread until the engine is done.
pub trait Slicer: Send + Sync {
    fn slice(&self, geometry: &Path) -> Result<SliceOutput, SliceError>;
}
