use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// Deterministic session identity: a v5 UUID over the URL namespace keyed by
/// (app, source filename, capture start time). Reprocessing the same capture
/// always yields the same id, which is what makes overwrite-in-place safe.
pub fn session_id(app: &str, filename: &str, start_time: DateTime<Utc>) -> Uuid {
    let key = format!(
        "{app}:{filename}:{}",
        start_time.format("%Y-%m-%dT%H:%M:%S")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// Deterministic turn identity, namespaced by the owning session so equal
/// ordinals in different sessions never collide.
pub fn turn_id(session_id: &Uuid, ordinal: usize) -> Uuid {
    Uuid::new_v5(session_id, format!("turn:{ordinal}").as_bytes())
}

/// Parse the capture start time out of a `YYYY-MM-DD_HHMMSS.log` filename.
pub fn timestamp_from_filename(name: &str) -> Option<DateTime<Utc>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(\d{4})-(\d{2})-(\d{2})_(\d{2})(\d{2})(\d{2})").unwrap()
    });

    let caps = re.captures(name)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Utc.with_ymd_and_hms(
        field(1)? as i32,
        field(2)?,
        field(3)?,
        field(4)?,
        field(5)?,
        field(6)?,
    )
    .single()
}

/// RFC3339-style second-precision timestamp with a literal Z, the shape the
/// record stream and index use throughout.
pub fn iso_z(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 24, 12, 14, 14).unwrap()
    }

    #[test]
    fn test_session_id_is_stable() {
        let a = session_id("ollama", "2026-01-24_121414.log", start());
        let b = session_id("ollama", "2026-01-24_121414.log", start());
        assert_eq!(a, b);
    }

    #[test]
    fn test_session_id_varies_with_inputs() {
        let base = session_id("ollama", "2026-01-24_121414.log", start());
        assert_ne!(base, session_id("gemini", "2026-01-24_121414.log", start()));
        assert_ne!(base, session_id("ollama", "other.log", start()));
        let later = Utc.with_ymd_and_hms(2026, 1, 24, 12, 14, 15).unwrap();
        assert_ne!(base, session_id("ollama", "2026-01-24_121414.log", later));
    }

    #[test]
    fn test_turn_ids_are_stable_and_distinct() {
        let sid = session_id("ollama", "a.log", start());
        assert_eq!(turn_id(&sid, 0), turn_id(&sid, 0));
        assert_ne!(turn_id(&sid, 0), turn_id(&sid, 1));

        let other = session_id("ollama", "b.log", start());
        assert_ne!(turn_id(&sid, 0), turn_id(&other, 0));
    }

    #[test]
    fn test_timestamp_from_filename() {
        let ts = timestamp_from_filename("2026-01-24_121414.log").unwrap();
        assert_eq!(ts, start());
    }

    #[test]
    fn test_timestamp_from_filename_rejects_other_names() {
        assert!(timestamp_from_filename("notes.log").is_none());
    }

    #[test]
    fn test_iso_z_format() {
        assert_eq!(iso_z(start()), "2026-01-24T12:14:14Z");
    }
}
