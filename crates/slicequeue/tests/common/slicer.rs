//! Scripted slicing engine.
//!
//! Each uploaded file can be given a list of steps, matched by the suffix of
//! its stored name. Files without a script (or whose script has run out)
//! slice successfully with the reference report: 2h 15m 30s and 12.50 g.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use slicequeue::{SliceError, SliceOutput, Slicer};

pub const REFERENCE_TIME: &str = "2h 15m 30s";
pub const REFERENCE_GRAMS: &str = "12.50";

#[derive(Debug, Clone)]
pub enum Step {
    /// Slice and report the reference estimate.
    Succeed,
    /// Slice and report the given time and mass.
    SucceedWith(&'static str, &'static str),
    /// The engine crashed or could not be launched.
    Crash,
    /// The engine refused the model.
    Unprintable,
    /// The engine produced output without a filament line.
    Garbled,
    /// The engine thread blows up.
    Panic,
}

#[derive(Default)]
pub struct ScriptedSlicer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedSlicer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `steps` for every file whose stored name ends with `suffix`.
    pub fn script(&self, suffix: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .expect("Failed to lock scripts")
            .insert(suffix.to_string(), steps.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("Failed to lock calls").len()
    }

    pub fn calls_for(&self, suffix: &str) -> usize {
        self.calls
            .lock()
            .expect("Failed to lock calls")
            .iter()
            .filter(|p| p.to_string_lossy().ends_with(suffix))
            .count()
    }

    fn next_step(&self, geometry: &Path) -> Step {
        let name = geometry.to_string_lossy();
        let mut scripts = self.scripts.lock().expect("Failed to lock scripts");
        scripts
            .iter_mut()
            .find(|(suffix, _)| name.ends_with(suffix.as_str()))
            .and_then(|(_, steps)| steps.pop_front())
            .unwrap_or(Step::Succeed)
    }
}

impl Slicer for ScriptedSlicer {
    fn slice(&self, geometry: &Path) -> Result<SliceOutput, SliceError> {
        self.calls
            .lock()
            .expect("Failed to lock calls")
            .push(geometry.to_path_buf());

        let gcode_path = geometry.with_extension("gcode");
        match self.next_step(geometry) {
            Step::Succeed => write_output(&gcode_path, REFERENCE_TIME, Some(REFERENCE_GRAMS)),
            Step::SucceedWith(time, grams) => write_output(&gcode_path, time, Some(grams)),
            Step::Garbled => write_output(&gcode_path, REFERENCE_TIME, None),
            Step::Crash => Err(SliceError::EngineInvocationFailed(
                "engine exited with signal 11".to_string(),
            )),
            Step::Unprintable => Err(SliceError::OutputNotFound {
                permanent: true,
                detail: "Objects could not fit on the bed".to_string(),
            }),
            Step::Panic => panic!("scripted engine panic"),
        }
    }
}

fn write_output(
    gcode_path: &Path,
    time: &str,
    grams: Option<&str>,
) -> Result<SliceOutput, SliceError> {
    let mut comments = format!("; estimated printing time (normal mode) = {}\n", time);
    if let Some(grams) = grams {
        comments.push_str(&format!("; total filament used [g] = {}\n", grams));
    }
    std::fs::write(gcode_path, format!("G28\n{}", comments))
        .map_err(|e| SliceError::EngineInvocationFailed(e.to_string()))?;

    Ok(SliceOutput {
        gcode_path: gcode_path.to_path_buf(),
        report: format!(
            "Slicing result exported to {}\n{}",
            gcode_path.display(),
            comments
        ),
        stderr: String::new(),
    })
}
