use serde::{Deserialize, Serialize};

/// Who produced a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversational unit recovered from rendered terminal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnText {
    pub role: Role,
    pub text: String,
}

/// Split rendered text into (role, text) turns by scanning for prompt
/// marker lines. Markers are literal prefixes matched against the trimmed
/// line; the first marker in the list wins when several would match.
///
/// Lines before the first marker are banner/preamble output and dropped.
/// Consecutive markers with no assistant text in between collapse into one
/// user turn. Zero recognized markers yields zero turns, which is a valid
/// (empty) session rather than an error.
pub fn segment(rendered: &str, markers: &[String]) -> Vec<TurnText> {
    let mut turns: Vec<TurnText> = Vec::new();
    // role of the block currently being accumulated; None until the first
    // marker is seen
    let mut current: Option<(Role, Vec<String>)> = None;

    for line in rendered.lines() {
        if let Some(prompt) = match_marker(line, markers) {
            flush(&mut turns, current.take());
            if prompt.is_empty() {
                // bare prompt: the user's input is on the following lines
                current = Some((Role::User, Vec::new()));
            } else {
                push_user(&mut turns, prompt);
                current = Some((Role::Assistant, Vec::new()));
            }
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line.to_string());
        }
    }

    flush(&mut turns, current.take());
    turns
}

/// Returns the text after the marker when the line is a prompt line.
fn match_marker<'a>(line: &'a str, markers: &[String]) -> Option<&'a str> {
    let trimmed = line.trim();
    for marker in markers {
        if let Some(rest) = trimmed.strip_prefix(marker.as_str()) {
            // a prefix ending in whitespace ("> ") must be followed by
            // content so that stray ">" quoting is not taken for a prompt
            if marker.ends_with(' ') && rest.trim().is_empty() {
                continue;
            }
            return Some(rest.trim());
        }
    }
    None
}

fn flush(turns: &mut Vec<TurnText>, block: Option<(Role, Vec<String>)>) {
    let Some((role, lines)) = block else {
        return;
    };
    let text = trim_blank_edges(&lines);
    if text.is_empty() {
        return;
    }
    match role {
        Role::User => push_user(turns, &text),
        Role::Assistant => turns.push(TurnText {
            role: Role::Assistant,
            text,
        }),
    }
}

/// Append user text, merging into the previous turn when it was also user
/// input (consecutive prompts with nothing in between).
fn push_user(turns: &mut Vec<TurnText>, text: &str) {
    if let Some(last) = turns.last_mut() {
        if last.role == Role::User {
            last.text.push('\n');
            last.text.push_str(text);
            return;
        }
    }
    turns.push(TurnText {
        role: Role::User,
        text: text.to_string(),
    });
}

fn trim_blank_edges(lines: &[String]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["❯".to_string(), "> ".to_string()]
    }

    fn roles(turns: &[TurnText]) -> Vec<(Role, &str)> {
        turns.iter().map(|t| (t.role, t.text.as_str())).collect()
    }

    #[test]
    fn test_alternating_turns() {
        let turns = segment("> hello\nworld\n> foo\nbar\n", &markers());
        assert_eq!(
            roles(&turns),
            vec![
                (Role::User, "hello"),
                (Role::Assistant, "world"),
                (Role::User, "foo"),
                (Role::Assistant, "bar"),
            ]
        );
    }

    #[test]
    fn test_glyph_marker() {
        let turns = segment("❯ list files\nfile_a\nfile_b\n", &markers());
        assert_eq!(
            roles(&turns),
            vec![(Role::User, "list files"), (Role::Assistant, "file_a\nfile_b")]
        );
    }

    #[test]
    fn test_consecutive_prompts_collapse() {
        let turns = segment("> first\n> second\nresponse\n", &markers());
        assert_eq!(
            roles(&turns),
            vec![(Role::User, "first\nsecond"), (Role::Assistant, "response")]
        );
    }

    #[test]
    fn test_bare_prompt_collects_following_lines() {
        let turns = segment("❯\nmulti line\ninput here\n", &markers());
        assert_eq!(roles(&turns), vec![(Role::User, "multi line\ninput here")]);
    }

    #[test]
    fn test_preamble_before_first_marker_is_dropped() {
        let turns = segment("Welcome to tool v1.2\nloading...\n> hi\nhello\n", &markers());
        assert_eq!(
            roles(&turns),
            vec![(Role::User, "hi"), (Role::Assistant, "hello")]
        );
    }

    #[test]
    fn test_no_markers_yields_no_turns() {
        let turns = segment("just\nsome\noutput\n", &markers());
        assert!(turns.is_empty());
    }

    #[test]
    fn test_blank_edges_trimmed_in_turn() {
        let turns = segment("> q\n\n\nanswer text\n\n\n> next\nok\n", &markers());
        assert_eq!(turns[1].text, "answer text");
    }

    #[test]
    fn test_bare_angle_bracket_is_not_a_prompt() {
        let turns = segment("> q\nquoted:\n> \nmore\n", &markers());
        assert_eq!(
            roles(&turns),
            vec![(Role::User, "q"), (Role::Assistant, "quoted:\n>\nmore")]
        );
    }

    #[test]
    fn test_first_declared_marker_wins() {
        // "❯ > x" matches the glyph first; the remainder keeps the "> "
        let turns = segment("❯ > x\n", &vec!["❯".to_string(), "> ".to_string()]);
        assert_eq!(roles(&turns), vec![(Role::User, "> x")]);
    }
}
