//! The line-level grammar shared by export and import.
//!
//! A document is a sequence of sections. A section starts at a line of the
//! form `## [@Session::<uuid>]` and runs until the next such line. Fields are
//! written as `**name**: value`; a value runs until the next marker or the
//! end of its line. Inside a value `\*` is a literal star and `\\` a literal
//! backslash.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use flowai_core::EntityKind;

/// Any line that opens a section, well-formed or not.
static SECTION_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#+\s*\[@").unwrap());

/// A well-formed section header.
static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s*\[@(\w+)::([^\]]+)\]").unwrap());

static FIELD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(\w+)\*\*:\s*").unwrap());

/// Reserved marker turning a section into a topology-only anchor.
pub const ANCHOR: &str = "anchor";

/// Header identifier requesting a fresh entity.
pub const NEW: &str = "new";

/// One section of raw text, before any interpretation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSection<'a> {
    /// Position among the document's sections, from 0.
    pub index: usize,
    /// Number of leading `#`.
    pub depth: usize,
    pub lines: Vec<&'a str>,
}

impl<'a> RawSection<'a> {
    pub fn header_line(&self) -> &'a str {
        self.lines.first().copied().unwrap_or_default().trim()
    }
}

/// A header that matched the strict grammar.
#[derive(Clone, Debug, PartialEq)]
pub struct Header<'a> {
    pub tag: &'a str,
    pub ident: &'a str,
    /// Byte offset just past the closing `]`.
    pub end: usize,
}

/// The identity written in a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ident {
    New,
    Existing(Uuid),
}

pub fn parse_ident(raw: &str) -> Option<Ident> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(NEW) {
        return Some(Ident::New);
    }
    Uuid::parse_str(raw).ok().map(Ident::Existing)
}

/// Split a document into sections. Text before the first section is dropped.
pub fn split_sections(text: &str) -> Vec<RawSection<'_>> {
    let mut sections: Vec<RawSection<'_>> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if SECTION_START.is_match(trimmed) {
            let depth = trimmed.chars().take_while(|c| *c == '#').count();
            sections.push(RawSection {
                index: sections.len(),
                depth,
                lines: vec![trimmed],
            });
        } else if let Some(current) = sections.last_mut() {
            current.lines.push(line);
        }
    }
    sections
}

pub fn parse_header(line: &str) -> Option<Header<'_>> {
    let caps = HEADER.captures(line)?;
    let whole = caps.get(0)?;
    Some(Header {
        tag: caps.get(1)?.as_str(),
        ident: caps.get(2)?.as_str().trim(),
        end: whole.end(),
    })
}

/// Field markers of one line, left to right.
pub fn parse_fields(line: &str) -> Vec<(String, String)> {
    let markers: Vec<_> = FIELD.captures_iter(line).collect();
    let mut fields = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value_end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(line.len(), |m| m.start());
        let value = line[whole.end()..value_end].trim();
        fields.push((name.as_str().to_string(), value.to_string()));
    }
    fields
}

/// Collapse every whitespace run (newlines included) to a single space.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape a rendered value so it can never read back as a field marker.
///
/// A backslash becomes `\\` and every `*` touching another `*` becomes `\*`.
pub fn escape_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let starred = |j: Option<usize>| j.and_then(|j| chars.get(j)) == Some(&'*');
        match c {
            '\\' => out.push_str(r"\\"),
            '*' if starred(i.checked_sub(1)) || starred(Some(i + 1)) => out.push_str(r"\*"),
            _ => out.push(c),
        }
    }
    out
}

/// Undo [`escape_value`]. A backslash not followed by `\` or `*` is kept.
pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next @ ('\\' | '*')) = chars.peek() {
                out.push(next);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

pub fn header(depth: usize, kind: EntityKind, uuid: &Uuid) -> String {
    format!("{} [@{}::{}]", "#".repeat(depth.max(1)), kind.tag(), uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_ignores_preamble_and_keeps_continuations() {
        let doc = "Title text\n\n# [@Client::new] **name**: A\n**email**: a@b.c\n## [@Session::new]\n";
        let sections = split_sections(doc);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].depth, 1);
        assert_eq!(sections[0].lines.len(), 2);
        assert_eq!(sections[1].depth, 2);
        assert_eq!(sections[1].index, 1);
    }

    #[test]
    fn malformed_headers_still_open_sections() {
        let sections = split_sections("# [@Client broken\n## [@Session::new]");
        assert_eq!(sections.len(), 2);
        assert!(parse_header(sections[0].header_line()).is_none());
        assert!(parse_header(sections[1].header_line()).is_some());
    }

    #[test]
    fn header_allows_missing_space() {
        let header = parse_header("###[@Sequence::new] **title**: x").unwrap();
        assert_eq!(header.tag, "Sequence");
        assert_eq!(header.ident, "new");
        assert_eq!(header.end, "###[@Sequence::new]".len());
    }

    #[test]
    fn fields_run_until_next_marker() {
        let fields = parse_fields(" **title**: Opening  **objective**: Set the scene **order**: 2");
        assert_eq!(
            fields,
            vec![
                ("title".to_string(), "Opening".to_string()),
                ("objective".to_string(), "Set the scene".to_string()),
                ("order".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn value_may_contain_colons_and_stars() {
        let fields = parse_fields("**input_drive_url**: https://drive.example/x?a=1 **title**: 5 * 3");
        assert_eq!(fields[0].1, "https://drive.example/x?a=1");
        assert_eq!(fields[1].1, "5 * 3");
    }

    #[test]
    fn escaped_stars_are_not_markers() {
        let value = escape_value("Use **bold**: now");
        assert_eq!(value, r"Use \*\*bold\*\*: now");
        let fields = parse_fields(&format!("**title**: {value} **order**: 2"));
        assert_eq!(fields.len(), 2);
        assert_eq!(unescape_value(&fields[0].1), "Use **bold**: now");
    }

    #[test]
    fn escaping_keeps_lone_stars_and_backslashes_readable() {
        assert_eq!(escape_value("5 * 3"), "5 * 3");
        assert_eq!(escape_value("***"), r"\*\*\*");
        assert_eq!(escape_value(r"a\b"), r"a\\b");
        assert_eq!(unescape_value(&escape_value(r"x\*y**")), r"x\*y**");
        assert_eq!(unescape_value(r"C:\temp\x"), r"C:\temp\x");
        assert_eq!(unescape_value(r"trailing\"), r"trailing\");
    }

    #[test]
    fn ident_parsing() {
        assert_eq!(parse_ident("new"), Some(Ident::New));
        assert_eq!(parse_ident(" NEW "), Some(Ident::New));
        let uuid = Uuid::now_v7();
        assert_eq!(parse_ident(&uuid.to_string()), Some(Ident::Existing(uuid)));
        assert_eq!(parse_ident("not-a-uuid"), None);
    }

    #[test]
    fn collapse_newlines_and_runs() {
        assert_eq!(collapse_whitespace("a\r\nb   c\t d "), "a b c d");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
