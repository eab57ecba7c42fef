use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    cli::SessionsOpts,
    config,
    segment::Role,
    session::{SessionMeta, TurnContent, TurnRecord},
    stage::StageError,
};

pub const INDEX_VERSION: u32 = 1;

/// Denormalized session summary kept in the per-app index for fast listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    #[serde(rename = "fullPath")]
    pub full_path: String,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    #[serde(rename = "firstPrompt")]
    pub first_prompt: String,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    pub created: String,
    pub modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// The per-app session catalog. A plain value: callers load it, mutate it
/// in memory and save the whole document back atomically. There is no
/// ambient index state anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndex {
    pub version: u32,
    pub app: String,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub app: String,
    pub session_count: usize,
    pub total_messages: usize,
    pub models: BTreeMap<String, usize>,
}

impl SessionIndex {
    pub fn new(app: &str) -> Self {
        Self {
            version: INDEX_VERSION,
            app: app.to_string(),
            entries: Vec::new(),
        }
    }

    /// Load the index document. Missing file means an empty index; a file
    /// that exists but does not parse is `IndexCorrupt`, which callers must
    /// surface loudly before deciding to start over.
    pub fn load(path: &Path, app: &str) -> Result<Self, StageError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(app));
            }
            Err(e) => {
                return Err(StageError::Write {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|e| StageError::IndexCorrupt {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Full atomic rewrite: temp file in the index directory, rename over
    /// the original, so readers never observe a half-written document.
    pub fn save(&self, path: &Path) -> Result<(), StageError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| StageError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let json = serde_json::to_string_pretty(self).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        tmp.write_all(json.as_bytes()).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        tmp.persist(path).map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Upsert by session id. An existing entry is replaced in place with
    /// its original `created` preserved; otherwise the entry is appended.
    pub fn upsert(&mut self, mut entry: IndexEntry) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.session_id == entry.session_id)
        {
            entry.created = existing.created.clone();
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn get(&self, session_id: &Uuid) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| &e.session_id == session_id)
    }

    pub fn remove(&mut self, session_id: &Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.session_id != session_id);
        self.entries.len() < before
    }

    /// Most recently modified entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&IndexEntry> {
        let mut sorted: Vec<&IndexEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.modified.cmp(&a.modified));
        sorted.truncate(limit);
        sorted
    }

    pub fn find_by_tag(&self, pattern: &str) -> Vec<&IndexEntry> {
        let pattern = pattern.to_lowercase();
        self.entries
            .iter()
            .filter(|e| {
                e.tag
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&pattern))
            })
            .collect()
    }

    pub fn find_by_prompt(&self, pattern: &str) -> Vec<&IndexEntry> {
        let pattern = pattern.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.first_prompt.to_lowercase().contains(&pattern))
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let mut models: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            if let Some(model) = &entry.model {
                *models.entry(model.clone()).or_insert(0) += 1;
            }
        }
        IndexStats {
            app: self.app.clone(),
            session_count: self.entries.len(),
            total_messages: self.entries.iter().map(|e| e.message_count).sum(),
            models,
        }
    }

    /// Rebuild the index by scanning the sessions directory. Recovery path
    /// for manual file operations or a lost index.
    pub fn rebuild(app: &str, sessions_dir: &Path) -> Result<Self> {
        let mut index = Self::new(app);
        if !sessions_dir.exists() {
            return Ok(index);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(sessions_dir)
            .with_context(|| format!("failed to read {}", sessions_dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        for path in paths {
            match entry_from_session_file(&path) {
                Ok(Some(entry)) => index.entries.push(entry),
                Ok(None) => {
                    tracing::warn!(file = %path.display(), "no session_meta record; skipping")
                }
                Err(err) => {
                    tracing::warn!(file = %path.display(), ?err, "unreadable session file; skipping")
                }
            }
        }

        Ok(index)
    }
}

fn entry_from_session_file(path: &Path) -> Result<Option<IndexEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());

    let Some(first) = lines.next() else {
        return Ok(None);
    };
    let meta: SessionMeta = serde_json::from_str(first)
        .with_context(|| format!("first line of {} is not a session meta", path.display()))?;

    let mut message_count = 0usize;
    let mut first_prompt = String::new();
    for line in lines {
        let turn: TurnRecord = serde_json::from_str(line)
            .with_context(|| format!("bad turn record in {}", path.display()))?;
        message_count += 1;
        if first_prompt.is_empty() && turn.role == Role::User {
            if let TurnContent::Text(text) = &turn.message.content {
                first_prompt = text
                    .chars()
                    .take(crate::session::FIRST_PROMPT_LEN)
                    .collect();
            }
        }
    }

    Ok(Some(IndexEntry {
        session_id: meta.session_id,
        full_path: path.display().to_string(),
        source_file: meta.source_file,
        first_prompt,
        message_count,
        created: meta.created,
        modified: meta.modified,
        model: meta.model,
        tag: meta.tag,
        cwd: meta.cwd,
    }))
}

/// `ttyscribe sessions` — list/query the index for one app.
pub fn run(opts: SessionsOpts) -> Result<()> {
    let config = config::load()?;
    let index_path = config.index_path(&opts.app);

    if opts.rebuild {
        let rebuilt = SessionIndex::rebuild(&opts.app, &config.sessions_dir(&opts.app))?;
        rebuilt.save(&index_path)?;
        println!("Rebuilt index with {} sessions", rebuilt.entries.len());
        return Ok(());
    }

    let index = match SessionIndex::load(&index_path, &opts.app) {
        Ok(index) => index,
        Err(err @ StageError::IndexCorrupt { .. }) => {
            anyhow::bail!("{err}; run `ttyscribe sessions {} --rebuild` to recover", opts.app);
        }
        Err(err) => return Err(err.into()),
    };

    if opts.stats {
        let stats = index.stats();
        println!("App: {}", stats.app);
        println!("Sessions: {}", stats.session_count);
        println!("Total messages: {}", stats.total_messages);
        if !stats.models.is_empty() {
            println!("Models:");
            for (model, count) in &stats.models {
                println!("  {model}: {count}");
            }
        }
    } else if let Some(pattern) = &opts.find_tag {
        for e in index.find_by_tag(pattern) {
            println!("{}  {}  {}", short_id(&e.session_id), e.tag.as_deref().unwrap_or(""), e.first_prompt);
        }
    } else if let Some(pattern) = &opts.find_prompt {
        for e in index.find_by_prompt(pattern) {
            println!("{}  {}", short_id(&e.session_id), e.first_prompt);
        }
    } else if let Some(n) = opts.recent {
        for e in index.recent(n) {
            println!("{}  {}  {}", &e.modified[..10.min(e.modified.len())], short_id(&e.session_id), e.first_prompt);
        }
    } else {
        for e in &index.entries {
            let tag = e.tag.as_deref().map(|t| format!("[{t}] ")).unwrap_or_default();
            println!("{}  {}{}", short_id(&e.session_id), tag, e.first_prompt);
        }
    }

    Ok(())
}

fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: Uuid, count: usize, modified: &str) -> IndexEntry {
        IndexEntry {
            session_id: id,
            full_path: format!("/tmp/{id}.jsonl"),
            source_file: "a.log".to_string(),
            first_prompt: "hello".to_string(),
            message_count: count,
            created: "2026-01-24T12:14:14Z".to_string(),
            modified: modified.to_string(),
            model: None,
            tag: None,
            cwd: None,
        }
    }

    fn some_id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_upsert_replaces_not_appends() {
        let mut index = SessionIndex::new("ollama");
        let id = some_id(1);
        index.upsert(entry(id, 2, "2026-01-24T12:14:14Z"));
        index.upsert(entry(id, 8, "2026-01-25T09:00:00Z"));

        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].message_count, 8);
    }

    #[test]
    fn test_upsert_preserves_created() {
        let mut index = SessionIndex::new("ollama");
        let id = some_id(1);
        let mut first = entry(id, 2, "2026-01-24T12:14:14Z");
        first.created = "2026-01-01T00:00:00Z".to_string();
        index.upsert(first);

        index.upsert(entry(id, 3, "2026-01-25T09:00:00Z"));
        assert_eq!(index.entries[0].created, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = SessionIndex::load(&dir.path().join("sessions-index.json"), "gemini").unwrap();
        assert_eq!(index.app, "gemini");
        assert!(index.entries.is_empty());
    }

    #[test]
    fn test_load_corrupt_is_classified() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions-index.json");
        fs::write(&path, "{ not json").unwrap();
        let err = SessionIndex::load(&path, "gemini").unwrap_err();
        assert!(matches!(err, StageError::IndexCorrupt { .. }));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions-index.json");

        let mut index = SessionIndex::new("ollama");
        index.upsert(entry(some_id(1), 4, "2026-01-24T12:14:14Z"));
        index.save(&path).unwrap();

        let loaded = SessionIndex::load(&path, "ollama").unwrap();
        assert_eq!(loaded.version, INDEX_VERSION);
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].message_count, 4);
    }

    #[test]
    fn test_recent_orders_by_modified() {
        let mut index = SessionIndex::new("ollama");
        index.upsert(entry(some_id(1), 1, "2026-01-20T00:00:00Z"));
        index.upsert(entry(some_id(2), 1, "2026-01-25T00:00:00Z"));
        index.upsert(entry(some_id(3), 1, "2026-01-22T00:00:00Z"));

        let recent = index.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].session_id, some_id(2));
        assert_eq!(recent[1].session_id, some_id(3));
    }

    #[test]
    fn test_find_by_tag_case_insensitive() {
        let mut index = SessionIndex::new("ollama");
        let mut tagged = entry(some_id(1), 1, "2026-01-20T00:00:00Z");
        tagged.tag = Some("Bugfix-Auth".to_string());
        index.upsert(tagged);
        index.upsert(entry(some_id(2), 1, "2026-01-21T00:00:00Z"));

        assert_eq!(index.find_by_tag("bugfix").len(), 1);
        assert!(index.find_by_tag("nothing").is_empty());
    }

    #[test]
    fn test_rebuild_from_session_files() {
        use crate::session::SessionBuilder;

        let dir = tempfile::TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");

        let start = Utc.with_ymd_and_hms(2026, 1, 24, 12, 14, 14).unwrap();
        let mut b = SessionBuilder::new("ollama", Path::new("2026-01-24_121414.log"), start);
        b.push_turn(Role::User, TurnContent::Text("rebuild me".to_string()));
        b.push_turn(Role::Assistant, TurnContent::Text("ok".to_string()));
        b.write_jsonl(&sessions.join(format!("{}.jsonl", b.session_id)))
            .unwrap();

        let index = SessionIndex::rebuild("ollama", &sessions).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].session_id, b.session_id);
        assert_eq!(index.entries[0].message_count, 2);
        assert_eq!(index.entries[0].first_prompt, "rebuild me");
    }
}
