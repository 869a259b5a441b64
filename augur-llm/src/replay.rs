//! Deterministic record/replay of completions
//!
//! In record mode every completion is appended to a JSON-lines file as
//! `{tick, callType, promptHash, response}`. In replay mode the file is
//! loaded up front and requests are answered by exact `(tick, callType)`
//! key without invoking any provider. Records are appended in completion
//! order, which need not match dispatch order when a lane runs requests
//! concurrently, so several records under one key are matched by prompt hash
//! first and served in recorded order otherwise. A key with nothing left is
//! a [`LlmError::ReplayKeyMissing`] integrity fault.

use augur_core::{CallType, GenerationResponse, LlmError, PromptHash, ReplayConfig, ReplayError, ReplayMode, Tick};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One persisted completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    pub tick: Tick,
    pub call_type: CallType,
    pub prompt_hash: PromptHash,
    pub response: GenerationResponse,
}

enum ReplayState {
    Off,
    Recording {
        writer: BufWriter<File>,
        path: PathBuf,
        written: u64,
    },
    Replaying {
        records: HashMap<(Tick, CallType), VecDeque<ReplayRecord>>,
        path: PathBuf,
    },
}

/// Replay log in one of three modes, fixed at construction.
pub struct ReplayLog {
    mode: ReplayMode,
    state: Mutex<ReplayState>,
}

impl ReplayLog {
    /// A log that records nothing and answers nothing.
    pub fn off() -> Self {
        Self {
            mode: ReplayMode::Off,
            state: Mutex::new(ReplayState::Off),
        }
    }

    /// Open `path` for appending, creating parent directories as needed.
    pub fn record_to(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "Recording replay log");
        Ok(Self {
            mode: ReplayMode::Record,
            state: Mutex::new(ReplayState::Recording {
                writer: BufWriter::new(file),
                path,
                written: 0,
            }),
        })
    }

    /// Load every record from `path` for playback.
    pub fn replay_from(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref().to_path_buf();
        let mut records: HashMap<(Tick, CallType), VecDeque<ReplayRecord>> = HashMap::new();
        let loaded = read_records(&path)?;
        let count = loaded.len();
        for record in loaded {
            records
                .entry((record.tick, record.call_type))
                .or_default()
                .push_back(record);
        }
        tracing::info!(path = %path.display(), records = count, "Loaded replay log");
        Ok(Self {
            mode: ReplayMode::Replay,
            state: Mutex::new(ReplayState::Replaying { records, path }),
        })
    }

    pub fn from_config(config: &ReplayConfig) -> Result<Self, ReplayError> {
        match (config.mode, config.path.as_deref()) {
            (ReplayMode::Off, _) => Ok(Self::off()),
            (ReplayMode::Record, Some(path)) => Self::record_to(path),
            (ReplayMode::Replay, Some(path)) => Self::replay_from(path),
            (_, None) => Err(ReplayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "replay mode requires a log path",
            ))),
        }
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    pub fn is_replaying(&self) -> bool {
        self.mode == ReplayMode::Replay
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record. No-op when off; an error when replaying.
    pub fn append(&self, record: &ReplayRecord) -> Result<(), ReplayError> {
        let mut state = self.lock();
        match &mut *state {
            ReplayState::Off => Ok(()),
            ReplayState::Replaying { .. } => Err(ReplayError::NotRecording),
            ReplayState::Recording { writer, written, .. } => {
                serde_json::to_writer(&mut *writer, record)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
                *written += 1;
                Ok(())
            }
        }
    }

    /// Take the record for `(tick, call_type)`.
    ///
    /// Prefers the oldest record with a matching `prompt_hash`; without one,
    /// the oldest record under the key.
    pub fn lookup(&self, tick: Tick, call_type: CallType, prompt_hash: &str) -> Result<ReplayRecord, LlmError> {
        let mut state = self.lock();
        let found = match &mut *state {
            ReplayState::Replaying { records, .. } => records.get_mut(&(tick, call_type)).and_then(|queue| {
                let index = queue
                    .iter()
                    .position(|record| record.prompt_hash == prompt_hash)
                    .unwrap_or(0);
                queue.remove(index)
            }),
            _ => None,
        };
        found.ok_or(LlmError::ReplayKeyMissing { tick, call_type })
    }

    /// Records not yet served (replay) or written so far (record).
    pub fn len(&self) -> usize {
        match &*self.lock() {
            ReplayState::Off => 0,
            ReplayState::Recording { written, .. } => *written as usize,
            ReplayState::Replaying { records, .. } => records.values().map(VecDeque::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            ReplayState::Off => None,
            ReplayState::Recording { path, .. } | ReplayState::Replaying { path, .. } => Some(path.clone()),
        }
    }

    pub fn flush(&self) -> Result<(), ReplayError> {
        if let ReplayState::Recording { writer, .. } = &mut *self.lock() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplayLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayLog")
            .field("mode", &self.mode)
            .field("path", &self.path())
            .field("len", &self.len())
            .finish()
    }
}

/// Read every record from a JSON-lines replay file. Blank lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<ReplayRecord>, ReplayError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| ReplayError::Corrupt {
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_core::compute_prompt_hash;
    use tempfile::tempdir;

    fn record(tick: Tick, call_type: CallType, text: &str) -> ReplayRecord {
        ReplayRecord {
            tick,
            call_type,
            prompt_hash: compute_prompt_hash(text),
            response: GenerationResponse::success(text, 3, 7, 0.002, 42),
        }
    }

    #[test]
    fn test_record_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traces/run.jsonl");

        let log = ReplayLog::record_to(&path).unwrap();
        log.append(&record(7, CallType::Narrative, "The well ran dry.")).unwrap();
        log.append(&record(7, CallType::Decision, "build a well")).unwrap();
        assert_eq!(log.len(), 2);
        drop(log);

        let replay = ReplayLog::replay_from(&path).unwrap();
        let found = replay
            .lookup(7, CallType::Narrative, &compute_prompt_hash("The well ran dry."))
            .unwrap();
        assert_eq!(found.response.content, "The well ran dry.");
        assert_eq!(replay.len(), 1);
    }

    #[test]
    fn test_missing_key_is_integrity_fault() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        ReplayLog::record_to(&path)
            .unwrap()
            .append(&record(1, CallType::Decision, "x"))
            .unwrap();

        let replay = ReplayLog::replay_from(&path).unwrap();
        let err = replay.lookup(2, CallType::Decision, &compute_prompt_hash("x")).unwrap_err();
        assert_eq!(
            err,
            LlmError::ReplayKeyMissing {
                tick: 2,
                call_type: CallType::Decision
            }
        );
        assert!(err.is_integrity_fault());
    }

    #[test]
    fn test_same_key_served_in_order_then_exhausted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let log = ReplayLog::record_to(&path).unwrap();
        log.append(&record(3, CallType::Conversation, "first")).unwrap();
        log.append(&record(3, CallType::Conversation, "second")).unwrap();
        drop(log);

        let replay = ReplayLog::replay_from(&path).unwrap();
        let unknown = compute_prompt_hash("unrecorded prompt");
        assert_eq!(replay.lookup(3, CallType::Conversation, &unknown).unwrap().response.content, "first");
        assert_eq!(replay.lookup(3, CallType::Conversation, &unknown).unwrap().response.content, "second");
        assert!(replay.lookup(3, CallType::Conversation, &unknown).is_err());
    }

    #[test]
    fn test_same_key_matched_by_prompt_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let log = ReplayLog::record_to(&path).unwrap();
        // Completion order, not dispatch order.
        log.append(&record(1, CallType::Conversation, "reply to c")).unwrap();
        log.append(&record(1, CallType::Conversation, "reply to b")).unwrap();
        log.append(&record(1, CallType::Conversation, "reply to a")).unwrap();
        drop(log);

        let replay = ReplayLog::replay_from(&path).unwrap();
        for text in ["reply to a", "reply to b", "reply to c"] {
            let found = replay
                .lookup(1, CallType::Conversation, &compute_prompt_hash(text))
                .unwrap();
            assert_eq!(found.response.content, text);
        }
        assert!(replay.is_empty());
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let json = serde_json::to_value(record(1, CallType::Narrative, "x")).unwrap();
        assert_eq!(json["callType"], "narrative");
        assert!(json.get("promptHash").is_some());
        assert_eq!(json["tick"], 1);
    }

    #[test]
    fn test_corrupt_line_reports_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let good = serde_json::to_string(&record(1, CallType::Decision, "x")).unwrap();
        std::fs::write(&path, format!("{}\n\nnot json\n", good)).unwrap();

        match ReplayLog::replay_from(&path) {
            Err(ReplayError::Corrupt { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected corrupt error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_off_and_replay_modes_reject_appends_appropriately() {
        let off = ReplayLog::off();
        assert!(off.append(&record(1, CallType::Decision, "x")).is_ok());
        assert!(off.lookup(1, CallType::Decision, "").is_err());
        assert_eq!(off.mode(), ReplayMode::Off);

        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, "").unwrap();
        let replay = ReplayLog::replay_from(&path).unwrap();
        assert!(matches!(
            replay.append(&record(1, CallType::Decision, "x")),
            Err(ReplayError::NotRecording)
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let config = ReplayConfig {
            mode: ReplayMode::Record,
            path: Some(dir.path().join("cfg.jsonl")),
        };
        let log = ReplayLog::from_config(&config).unwrap();
        assert_eq!(log.mode(), ReplayMode::Record);
        assert!(ReplayLog::from_config(&ReplayConfig::default()).unwrap().path().is_none());
    }
}
