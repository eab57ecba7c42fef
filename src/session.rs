use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    ident,
    segment::Role,
    stage::StageError,
};

pub const FIRST_PROMPT_LEN: usize = 100;

/// Turn content is either plain text (what the terminal pipeline produces)
/// or structured blocks (the richer native log format). Serialized untagged
/// so the wire shape stays a string vs an array, matching both formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub content: TurnContent,
}

/// One line of the record stream: a single turn, threaded to its
/// predecessor through `parentUuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub uuid: Uuid,
    #[serde(rename = "parentUuid")]
    pub parent_uuid: Option<Uuid>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub role: Role,
    pub message: TurnMessage,
}

/// First line of the record stream: the session summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub app: String,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    pub created: String,
    pub modified: String,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

pub const SESSION_META_TYPE: &str = "session_meta";

/// Assembles one session's turns with deterministic ids and writes them as
/// an append-friendly JSONL record stream (summary first, then turns).
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    pub app: String,
    pub source_file: PathBuf,
    pub start_time: DateTime<Utc>,
    pub session_id: Uuid,
    pub model: Option<String>,
    pub tag: Option<String>,
    pub cwd: Option<String>,
    turns: Vec<TurnRecord>,
    last_timestamp: DateTime<Utc>,
}

impl SessionBuilder {
    pub fn new(app: &str, source_file: &Path, start_time: DateTime<Utc>) -> Self {
        let filename = source_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let session_id = ident::session_id(app, &filename, start_time);
        Self {
            app: app.to_string(),
            source_file: source_file.to_path_buf(),
            start_time,
            session_id,
            model: None,
            tag: None,
            cwd: None,
            turns: Vec::new(),
            last_timestamp: start_time,
        }
    }

    /// Append a turn, assigning its ordinal id and linking it to the
    /// previous turn. Turns carry the capture timestamp unless a better
    /// one is supplied via [`Self::push_turn_at`].
    pub fn push_turn(&mut self, role: Role, content: TurnContent) -> &TurnRecord {
        let at = self.last_timestamp;
        self.push_turn_at(role, content, at)
    }

    pub fn push_turn_at(
        &mut self,
        role: Role,
        content: TurnContent,
        timestamp: DateTime<Utc>,
    ) -> &TurnRecord {
        let ordinal = self.turns.len();
        let uuid = ident::turn_id(&self.session_id, ordinal);
        let parent_uuid = self.turns.last().map(|t| t.uuid);
        self.last_timestamp = timestamp;

        self.turns.push(TurnRecord {
            session_id: self.session_id,
            uuid,
            parent_uuid,
            timestamp: ident::iso_z(timestamp),
            role,
            message: TurnMessage { role, content },
        });
        &self.turns[ordinal]
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    /// First user prompt, truncated for index display.
    pub fn first_prompt(&self) -> String {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| match &t.message.content {
                TurnContent::Text(text) => text.chars().take(FIRST_PROMPT_LEN).collect(),
                TurnContent::Blocks(_) => String::new(),
            })
            .unwrap_or_default()
    }

    pub fn meta(&self) -> SessionMeta {
        let created = self
            .turns
            .first()
            .map(|t| t.timestamp.clone())
            .unwrap_or_else(|| ident::iso_z(self.start_time));
        let modified = self
            .turns
            .last()
            .map(|t| t.timestamp.clone())
            .unwrap_or_else(|| created.clone());

        SessionMeta {
            kind: SESSION_META_TYPE.to_string(),
            session_id: self.session_id,
            app: self.app.clone(),
            source_file: self.source_file.display().to_string(),
            created,
            modified,
            message_count: self.turns.len(),
            model: self.model.clone(),
            tag: self.tag.clone(),
            cwd: self.cwd.clone(),
        }
    }

    /// Serialize as JSONL: session summary first, then one turn per line.
    /// Pure function of the builder's state, so identical inputs always
    /// produce identical bytes.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut lines = Vec::with_capacity(self.turns.len() + 1);
        lines.push(serde_json::to_string(&self.meta())?);
        for turn in &self.turns {
            lines.push(serde_json::to_string(turn)?);
        }
        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }

    /// Write the record stream atomically: temp file in the destination
    /// directory, then rename over the target. A partial write never
    /// becomes visible and re-invocation overwrites byte-for-byte.
    pub fn write_jsonl(&self, path: &Path) -> Result<(), StageError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| StageError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let jsonl = self.to_jsonl().map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        tmp.write_all(jsonl.as_bytes())
            .map_err(|e| StageError::Write {
                path: path.to_path_buf(),
                source: e,
            })?;
        tmp.persist(path).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn builder() -> SessionBuilder {
        let start = Utc.with_ymd_and_hms(2026, 1, 24, 12, 14, 14).unwrap();
        SessionBuilder::new("ollama", &PathBuf::from("2026-01-24_121414.log"), start)
    }

    fn text(s: &str) -> TurnContent {
        TurnContent::Text(s.to_string())
    }

    #[test]
    fn test_parent_chain() {
        let mut b = builder();
        b.push_turn(Role::User, text("q1"));
        b.push_turn(Role::Assistant, text("a1"));
        b.push_turn(Role::User, text("q2"));

        let turns = b.turns();
        assert_eq!(turns[0].parent_uuid, None);
        assert_eq!(turns[1].parent_uuid, Some(turns[0].uuid));
        assert_eq!(turns[2].parent_uuid, Some(turns[1].uuid));
    }

    #[test]
    fn test_jsonl_is_deterministic() {
        let make = || {
            let mut b = builder();
            b.push_turn(Role::User, text("how do I sort a list?"));
            b.push_turn(Role::Assistant, text("use sorted() or .sort()"));
            b
        };
        assert_eq!(make().to_jsonl().unwrap(), make().to_jsonl().unwrap());
        assert_eq!(make().session_id, make().session_id);
    }

    #[test]
    fn test_jsonl_shape() {
        let mut b = builder();
        b.tag = Some("bugfix".to_string());
        b.push_turn(Role::User, text("hello"));
        b.push_turn(Role::Assistant, text("hi"));

        let jsonl = b.to_jsonl().unwrap();
        let lines: Vec<&str> = jsonl.trim_end().lines().collect();
        assert_eq!(lines.len(), 3);

        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["type"], "session_meta");
        assert_eq!(meta["app"], "ollama");
        assert_eq!(meta["messageCount"], 2);
        assert_eq!(meta["tag"], "bugfix");
        assert!(meta.get("model").is_none());

        let first: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["type"], "user");
        assert_eq!(first["parentUuid"], serde_json::Value::Null);
        assert_eq!(first["message"]["role"], "user");
        assert_eq!(first["message"]["content"], "hello");
    }

    #[test]
    fn test_first_prompt_truncated() {
        let mut b = builder();
        b.push_turn(Role::User, text(&"x".repeat(300)));
        assert_eq!(b.first_prompt().chars().count(), FIRST_PROMPT_LEN);
    }

    #[test]
    fn test_zero_turn_session_meta() {
        let b = builder();
        let meta = b.meta();
        assert_eq!(meta.message_count, 0);
        assert_eq!(meta.created, "2026-01-24T12:14:14Z");
        assert_eq!(meta.modified, meta.created);
    }

    #[test]
    fn test_write_is_idempotent_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions").join("s.jsonl");

        let mut b = builder();
        b.push_turn(Role::User, text("q"));
        b.write_jsonl(&path).unwrap();
        let first = fs::read(&path).unwrap();

        b.write_jsonl(&path).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_structured_blocks_roundtrip() {
        let line = r#"{"sessionId":"6ba7b810-9dad-11d1-80b4-00c04fd430c8","uuid":"6ba7b811-9dad-11d1-80b4-00c04fd430c8","parentUuid":null,"timestamp":"2026-01-24T12:14:14Z","type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#;
        let rec: TurnRecord = serde_json::from_str(line).unwrap();
        match &rec.message.content {
            TurnContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].kind, "text");
            }
            TurnContent::Text(_) => panic!("expected structured blocks"),
        }
    }
}
