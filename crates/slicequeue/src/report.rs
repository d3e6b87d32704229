//! Slice report parsing.
//!
//! The engine reports the estimate as free text: stdout carries the export
//! line, and the G-code comments carry the statistics, e.g.
//!
//! ```text
//! Slicing result exported to /srv/media/PLA-RED-...-benchy.gcode
//! ; estimated printing time (normal mode) = 2h 15m 30s
//! ; total filament used [g] = 12.50
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static RE_EXPORTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)Slicing result exported to[ \t]+(.+?)[ \t]*\r?$").unwrap());
static RE_PRINT_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)estimated\s+printing\s+time[^=:\r\n]*[=:][ \t]*([^\r\n]*)").unwrap()
});
static RE_DURATION_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*([dhms])").unwrap());
static RE_TOTAL_GRAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)total\s+filament\s+used\s*\[g\][ \t]*[=:][ \t]*([^\r\n]*)").unwrap()
});
// Per-extruder line, comma separated when more than one extruder is used.
static RE_EXTRUDER_GRAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t;]*filament\s+used\s*\[g\][ \t]*[=:][ \t]*([^\r\n]*)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportField {
    PrintTime,
    FilamentMass,
}

impl fmt::Display for ReportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrintTime => write!(f, "estimated printing time"),
            Self::FilamentMass => write!(f, "total filament used [g]"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    #[error("report has no '{0}' line")]
    MissingField(ReportField),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: ReportField, value: String },
}

/// The two figures pricing needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceEstimate {
    pub seconds: u64,
    pub grams: f64,
}

/// Extracts print duration and filament mass. Both are required; a missing
/// line is an error, never a zero.
pub fn parse_report(report: &str) -> Result<SliceEstimate, ReportError> {
    let time = RE_PRINT_TIME
        .captures(report)
        .map(|c| c[1].trim().to_string())
        .ok_or(ReportError::MissingField(ReportField::PrintTime))?;
    let seconds = parse_duration(&time)?;
    let grams = parse_grams(report)?;

    Ok(SliceEstimate { seconds, grams })
}

/// Normalises `[<D>d] [<H>h] [<M>m] [<S>s]` to whole seconds.
pub fn parse_duration(value: &str) -> Result<u64, ReportError> {
    let invalid = || ReportError::InvalidValue {
        field: ReportField::PrintTime,
        value: value.to_string(),
    };

    let mut seconds: u64 = 0;
    let mut matched = false;
    for caps in RE_DURATION_PART.captures_iter(value) {
        let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "d" => 86_400,
            "h" => 3_600,
            "m" => 60,
            _ => 1,
        };
        seconds = amount
            .checked_mul(unit)
            .and_then(|s| seconds.checked_add(s))
            .ok_or_else(invalid)?;
        matched = true;
    }

    // Anything left over means the token is not a duration.
    let leftover = RE_DURATION_PART.replace_all(value, "");
    if !matched || !leftover.trim().is_empty() {
        return Err(invalid());
    }
    Ok(seconds)
}

fn parse_grams(report: &str) -> Result<f64, ReportError> {
    let raw = RE_TOTAL_GRAMS
        .captures(report)
        .or_else(|| RE_EXTRUDER_GRAMS.captures(report))
        .map(|c| c[1].trim().to_string())
        .ok_or(ReportError::MissingField(ReportField::FilamentMass))?;

    let invalid = || ReportError::InvalidValue {
        field: ReportField::FilamentMass,
        value: raw.clone(),
    };

    let mut total = 0.0;
    for part in raw.split(',') {
        let grams: f64 = part.trim().parse().map_err(|_| invalid())?;
        if !grams.is_finite() || grams < 0.0 {
            return Err(invalid());
        }
        total += grams;
    }
    Ok(total)
}

/// Path from the `Slicing result exported to <path>` line, if present.
pub fn export_path(output: &str) -> Option<String> {
    RE_EXPORTED
        .captures(output)
        .map(|c| c[1].trim().to_string())
        .filter(|p| !p.is_empty())
}
