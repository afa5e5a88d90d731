//! Operation-block extraction — `[FILE_READ]`/`[FILE_WRITE]`/`[FILE_EDIT]`.
//!
//! Parsed from the completed turn text by regex against the DOTALL-matched
//! body of each tag pair. Grounded in `async_streaming_agent.py`'s
//! `_extract_file_operations`: any block missing a mandatory field is
//! silently skipped rather than raising.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReadOp {
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileWriteOp {
    pub path: String,
    pub lang: Option<String>,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEditOp {
    pub path: String,
    pub find: String,
    pub replace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedOperations {
    pub reads: Vec<FileReadOp>,
    pub writes: Vec<FileWriteOp>,
    pub edits: Vec<FileEditOp>,
}

/// `true` iff the completed turn text contains at least one `[PLAN]` block —
/// the hand-off point at which the caller should route the full text
/// through `orc-workflow`'s `PlanParser`.
pub fn contains_plan(turn_text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)\[PLAN\].*?\[/PLAN\]").unwrap())
        .is_match(turn_text)
}

pub fn extract_operations(turn_text: &str) -> ExtractedOperations {
    ExtractedOperations {
        reads: extract_reads(turn_text),
        writes: extract_writes(turn_text),
        edits: extract_edits(turn_text),
    }
}

fn extract_reads(text: &str) -> Vec<FileReadOp> {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static PATH: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| Regex::new(r"(?is)\[FILE_READ\](.*?)\[/FILE_READ\]").unwrap());
    let path_re = PATH.get_or_init(|| Regex::new(r"path:\s*(\S+)").unwrap());

    block
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let path = path_re.captures(body)?.get(1)?.as_str().to_string();
            Some(FileReadOp { path })
        })
        .collect()
}

fn extract_writes(text: &str) -> Vec<FileWriteOp> {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static PATH: OnceLock<Regex> = OnceLock::new();
    static CONTENT: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| Regex::new(r"(?is)\[FILE_WRITE\](.*?)\[/FILE_WRITE\]").unwrap());
    let path_re = PATH.get_or_init(|| Regex::new(r"path:\s*(\S+)").unwrap());
    let content_re =
        CONTENT.get_or_init(|| Regex::new(r"(?s)content:\s*```(\w*)\n(.*?)```").unwrap());

    block
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let path = path_re.captures(body)?.get(1)?.as_str().to_string();
            let content_caps = content_re.captures(body)?;
            let lang = content_caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty());
            let content = content_caps.get(2)?.as_str().to_string();
            Some(FileWriteOp { path, lang, content })
        })
        .collect()
}

fn extract_edits(text: &str) -> Vec<FileEditOp> {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static PATH: OnceLock<Regex> = OnceLock::new();
    static FIND_REPLACE: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| Regex::new(r"(?is)\[FILE_EDIT\](.*?)\[/FILE_EDIT\]").unwrap());
    let path_re = PATH.get_or_init(|| Regex::new(r"path:\s*(\S+)").unwrap());
    let fr_re = FIND_REPLACE
        .get_or_init(|| Regex::new(r"(?s)find:\s*\|\n(.*?)\n\s*replace:\s*\|\n(.*)").unwrap());

    block
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let path = path_re.captures(body)?.get(1)?.as_str().to_string();
            let fr_caps = fr_re.captures(body)?;
            let find = fr_caps.get(1)?.as_str().to_string();
            let replace = fr_caps.get(2)?.as_str().trim_end().to_string();
            Some(FileEditOp { path, find, replace })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_missing_path_are_skipped() {
        let text = "[FILE_READ] no path here [/FILE_READ]";
        assert!(extract_reads(text).is_empty());
    }

    #[test]
    fn reads_are_extracted() {
        let text = "[FILE_READ] path: src/main.rs [/FILE_READ]";
        let ops = extract_reads(text);
        assert_eq!(ops, vec![FileReadOp { path: "src/main.rs".into() }]);
    }

    #[test]
    fn writes_parse_path_and_fenced_content() {
        let text = "[FILE_WRITE]\npath: out.txt\ncontent: ```rust\nfn main() {}\n```\n[/FILE_WRITE]";
        let ops = extract_writes(text);
        assert_eq!(
            ops,
            vec![FileWriteOp {
                path: "out.txt".into(),
                lang: Some("rust".into()),
                content: "fn main() {}\n".into(),
            }]
        );
    }

    #[test]
    fn writes_missing_content_are_skipped() {
        let text = "[FILE_WRITE]\npath: out.txt\n[/FILE_WRITE]";
        assert!(extract_writes(text).is_empty());
    }

    #[test]
    fn edits_parse_find_and_replace() {
        let text = "[FILE_EDIT]\npath: a.rs\nfind: |\nold line\nreplace: |\nnew line\n[/FILE_EDIT]";
        let ops = extract_edits(text);
        assert_eq!(
            ops,
            vec![FileEditOp { path: "a.rs".into(), find: "old line".into(), replace: "new line".into() }]
        );
    }

    #[test]
    fn multiple_blocks_in_one_turn_all_extract() {
        let text = "[FILE_READ] path: a.txt [/FILE_READ] some text [FILE_READ] path: b.txt [/FILE_READ]";
        let ops = extract_reads(text);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn contains_plan_detects_block_case_insensitively() {
        assert!(contains_plan("blah [plan]x[/PLAN] blah"));
        assert!(!contains_plan("no plan here"));
    }
}
