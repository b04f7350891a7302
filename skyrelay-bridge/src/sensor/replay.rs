//! Replays recorded telemetry from a JSON-lines file.
//!
//! Each non-blank line is one tick: a JSON object mapping simulator
//! variable names to values. `null` marks a value that was unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{RawValue, SourceError, TelemetrySource};

type Frame = HashMap<String, Value>;

/// Telemetry source backed by a recording.
pub struct ReplaySource {
    path: PathBuf,
    frames: Vec<Frame>,
    /// Index of the frame for the current tick; `None` before the first tick.
    cursor: Option<usize>,
    looping: bool,
}

impl ReplaySource {
    /// Load a recording. Fails if the file is missing, unreadable, malformed,
    /// or holds no frames.
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Init(format!("{}: {}", path.display(), e)))?;
        let frames = parse_frames(&content)
            .map_err(|e| SourceError::Init(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            frames,
            cursor: None,
            looping,
        })
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn current(&self) -> Option<&Frame> {
        self.cursor.and_then(|i| self.frames.get(i))
    }
}

fn parse_frames(content: &str) -> Result<Vec<Frame>, String> {
    let mut frames = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let frame: Frame =
            serde_json::from_str(line).map_err(|e| format!("line {}: {}", lineno + 1, e))?;
        frames.push(frame);
    }
    if frames.is_empty() {
        return Err("recording has no frames".to_string());
    }
    Ok(frames)
}

impl TelemetrySource for ReplaySource {
    fn get(&mut self, name: &str) -> Result<RawValue, SourceError> {
        let frame = self.current().ok_or(SourceError::Exhausted)?;
        match frame.get(name) {
            None => Err(SourceError::UnknownField(name.to_string())),
            Some(Value::Null) => Err(SourceError::Unavailable(name.to_string())),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(RawValue::Number)
                .ok_or_else(|| SourceError::Unavailable(name.to_string())),
            Some(Value::Bool(b)) => Ok(RawValue::Bool(*b)),
            Some(Value::String(s)) => Ok(RawValue::Text(s.clone())),
            Some(other) => Ok(RawValue::Text(other.to_string())),
        }
    }

    fn begin_tick(&mut self) {
        let next = match self.cursor {
            None => 0,
            Some(i) => i + 1,
        };
        self.cursor = if next < self.frames.len() {
            Some(next)
        } else if self.looping {
            Some(0)
        } else {
            // Park past the end so every read reports exhaustion.
            Some(self.frames.len())
        };
    }

    fn describe(&self) -> String {
        format!(
            "replay {} ({} frames{})",
            self.path.display(),
            self.frames.len(),
            if self.looping { ", looping" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn recording(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_missing_file_is_init_error() {
        let result = ReplaySource::open("/nonexistent/flight.jsonl", true);
        assert!(matches!(result, Err(SourceError::Init(_))));
    }

    #[test]
    fn test_empty_recording_is_init_error() {
        let file = recording(&["", "   "]);
        assert!(matches!(
            ReplaySource::open(file.path(), true),
            Err(SourceError::Init(_))
        ));
    }

    #[test]
    fn test_malformed_line_is_init_error() {
        let file = recording(&[r#"{"PLANE_ALTITUDE": 100}"#, "{oops"]);
        let Err(SourceError::Init(msg)) = ReplaySource::open(file.path(), true) else {
            panic!("expected init error");
        };
        assert!(msg.contains("line 2"));
    }

    #[test]
    fn test_reads_follow_ticks_and_loop() {
        let file = recording(&[
            r#"{"PLANE_ALTITUDE": 100, "SIM_ON_GROUND": true}"#,
            r#"{"PLANE_ALTITUDE": 200, "SIM_ON_GROUND": null}"#,
        ]);
        let mut source = ReplaySource::open(file.path(), true).unwrap();
        assert_eq!(source.len(), 2);

        assert!(matches!(
            source.get("PLANE_ALTITUDE"),
            Err(SourceError::Exhausted)
        ));

        source.begin_tick();
        assert_eq!(
            source.get("PLANE_ALTITUDE").unwrap(),
            RawValue::Number(100.0)
        );
        assert_eq!(source.get("SIM_ON_GROUND").unwrap(), RawValue::Bool(true));

        source.begin_tick();
        assert_eq!(
            source.get("PLANE_ALTITUDE").unwrap(),
            RawValue::Number(200.0)
        );
        assert!(matches!(
            source.get("SIM_ON_GROUND"),
            Err(SourceError::Unavailable(_))
        ));
        assert!(matches!(
            source.get("G_FORCE"),
            Err(SourceError::UnknownField(_))
        ));

        source.begin_tick();
        assert_eq!(
            source.get("PLANE_ALTITUDE").unwrap(),
            RawValue::Number(100.0)
        );
    }

    #[test]
    fn test_non_looping_exhausts() {
        let file = recording(&[r#"{"G_FORCE": 1.0}"#]);
        let mut source = ReplaySource::open(file.path(), false).unwrap();

        source.begin_tick();
        assert!(source.get("G_FORCE").is_ok());
        source.begin_tick();
        assert!(matches!(source.get("G_FORCE"), Err(SourceError::Exhausted)));
        source.begin_tick();
        assert!(matches!(source.get("G_FORCE"), Err(SourceError::Exhausted)));
    }
}
