//! Turns chat-formatted assistant replies into prose that can be read aloud.
//!
//! Markdown structure, tables, code, emoji and the chat protocol's embedded
//! machine-readable blocks are removed; link text and table cell contents are
//! kept. Paragraph breaks become sentence breaks so the synthesis engine
//! pauses where the reader would.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Tags whose whole body is machine-readable payload, never narration.
pub const DEFAULT_PROTOCOL_TAGS: &[&str] = &["query", "result", "data", "chart", "think"];

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(```|~~~).*?(```|~~~)").expect("invalid code block regex"));

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").expect("invalid heading regex"));

static RULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*([-*_][ \t]*){3,}$").expect("invalid rule regex"));

static QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").expect("invalid blockquote regex"));

static BULLET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*[-*+•◦▪‣][ \t]+").expect("invalid bullet regex")
});

static NUMBERED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d{1,3}[.)][ \t]+").expect("invalid numbered regex"));

static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("invalid image regex"));

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("invalid link regex"));

static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]*)`").expect("invalid inline code regex"));

static BOLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").expect("invalid bold regex"));

// Emphasis must hug its text, so spaced operators like `2 * 3` survive.
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*|(^|[\s(])_([^_\n]+)_")
        .expect("invalid italic regex")
});

static STRIKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"~~([^~]+)~~").expect("invalid strikethrough regex"));

// Unpaired markers attached to a word. A free-standing `*` is left alone.
static STRAY_MARK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*{2,}|[`~]+|(\S)\*+|\*+(\S)").expect("invalid stray marker regex")
});

static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^>\n]{0,200}>").expect("invalid html tag regex"));

// Pictographs, dingbats, arrows, geometric shapes, flags, variation
// selectors and joiners, plus the bullet glyphs used as decoration.
static EMOJI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2B00}-\x{2BFF}\x{2300}-\x{23FF}",
        r"\x{2190}-\x{21FF}\x{25A0}-\x{25FF}\x{FE00}-\x{FE0F}\x{200D}\x{20E3}",
        r"\x{E0020}-\x{E007F}\x{2022}\x{2023}\x{2043}\x{2219}]",
    ))
    .expect("invalid emoji regex")
});

static PARAGRAPH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]*\n[ \t]*\n\s*").expect("invalid paragraph regex"));

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace regex"));

static SPACE_BEFORE_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([.!?;:,])").expect("invalid space before stop regex"));

// A paragraph break after text that already ends a sentence or clause.
static DOUBLE_STOP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?;:,])\s*\.(\s|$)").expect("invalid double stop regex"));

static DEFAULT_CLEANSER: Lazy<SpeechCleanser> =
    Lazy::new(|| SpeechCleanser::new(DEFAULT_PROTOCOL_TAGS));

/// Clean `raw` with the default protocol tag set.
pub fn cleanse(raw: &str) -> String {
    DEFAULT_CLEANSER.clean(raw)
}

/// Speech cleanser with a configurable set of protocol payload tags.
#[derive(Debug, Clone)]
pub struct SpeechCleanser {
    protocol_block: Option<Regex>,
}

impl SpeechCleanser {
    pub fn new<S: AsRef<str>>(protocol_tags: &[S]) -> Self {
        let names: Vec<String> = protocol_tags
            .iter()
            .map(|t| t.as_ref().trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();

        let protocol_block = if names.is_empty() {
            None
        } else {
            let alternatives = names.join("|");
            let pattern = format!(r"(?is)<(?:{alternatives})\b[^>]*>.*?</(?:{alternatives})\s*>");
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("protocol tag pattern rejected ({e}), tags will not be stripped");
                    None
                }
            }
        };

        Self { protocol_block }
    }

    /// Produce narration-safe prose. May return an empty string.
    pub fn clean(&self, raw: &str) -> String {
        let mut text = raw.replace("\r\n", "\n");

        if let Some(re) = &self.protocol_block {
            text = re.replace_all(&text, "\n").into_owned();
        }

        text = CODE_BLOCK_RE.replace_all(&text, "\n").into_owned();
        text = text.replace("```", " ").replace("~~~", " ");
        text = EMOJI_RE.replace_all(&text, " ").into_owned();
        text = strip_tables(&text);

        text = RULE_RE.replace_all(&text, "").into_owned();
        text = HEADING_RE.replace_all(&text, "").into_owned();
        text = QUOTE_RE.replace_all(&text, "").into_owned();
        text = BULLET_RE.replace_all(&text, "").into_owned();
        text = NUMBERED_RE.replace_all(&text, "").into_owned();

        text = IMAGE_RE.replace_all(&text, "${1}").into_owned();
        text = LINK_RE.replace_all(&text, "${1}").into_owned();
        text = INLINE_CODE_RE.replace_all(&text, "${1}").into_owned();
        text = BOLD_RE.replace_all(&text, "${1}${2}").into_owned();
        text = ITALIC_RE.replace_all(&text, "${1}${2}${3}").into_owned();
        text = STRIKE_RE.replace_all(&text, "${1}").into_owned();
        text = STRAY_MARK_RE.replace_all(&text, "${1}${2}").into_owned();
        text = HTML_TAG_RE.replace_all(&text, " ").into_owned();

        text = PARAGRAPH_RE.replace_all(text.trim(), ". ").into_owned();
        text = WHITESPACE_RE.replace_all(&text, " ").into_owned();
        text = SPACE_BEFORE_STOP_RE.replace_all(&text, "${1}").into_owned();
        text = DOUBLE_STOP_RE.replace_all(&text, "${1}${2}").into_owned();

        text.trim()
            .trim_start_matches(|c: char| c == '.' || c == ',' || c.is_whitespace())
            .to_string()
    }
}

/// Table rows become comma-separated sentences; alignment rows disappear;
/// stray pipes outside tables become spaces.
fn strip_tables(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if is_table_separator(trimmed) {
            continue;
        }
        if trimmed.starts_with('|') {
            let cells: Vec<&str> = trimmed
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            if !cells.is_empty() {
                out.push(format!("{}.", cells.join(", ")));
            }
            continue;
        }
        out.push(line.replace('|', " "));
    }
    out.join("\n")
}

fn is_table_separator(line: &str) -> bool {
    line.contains('|')
        && line.contains('-')
        && line
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_emoji(s: &str) -> bool {
        s.chars().any(|c| {
            let cp = c as u32;
            (0x1F300..=0x1FAFF).contains(&cp) || (0x2600..=0x27BF).contains(&cp)
        })
    }

    #[test]
    fn table_emoji_and_heading_become_plain_prose() {
        let raw = "## Aday Özeti 🎉\n\n\
                   | Aday | Puan |\n\
                   |------|:----:|\n\
                   | Ayşe | 9 |\n\
                   | Mehmet | 7 |\n\n\
                   Harika sonuçlar! 👍✨";
        let cleaned = cleanse(raw);
        assert!(!cleaned.is_empty());
        assert!(!cleaned.contains('|'), "{cleaned}");
        assert!(!cleaned.contains('#'), "{cleaned}");
        assert!(!has_emoji(&cleaned), "{cleaned}");
        assert!(cleaned.contains("Ayşe, 9"), "{cleaned}");
        assert!(cleaned.contains("Harika sonuçlar!"), "{cleaned}");
    }

    #[test]
    fn strips_emphasis_links_and_inline_code() {
        let cleaned = cleanse("Lütfen **formu** _bugün_ [buradan](https://ornek.com/form) `gönderin`.");
        assert_eq!(cleaned, "Lütfen formu bugün buradan gönderin.");
    }

    #[test]
    fn spaced_asterisks_are_arithmetic_not_emphasis() {
        assert_eq!(cleanse("Toplam 2 * 3 * 4 eder."), "Toplam 2 * 3 * 4 eder.");
        assert_eq!(cleanse("Bu *çok* önemli, *yarım"), "Bu çok önemli, yarım");
    }

    #[test]
    fn removes_code_blocks_entirely() {
        let cleaned = cleanse("Sorgu şu:\n```sql\nSELECT * FROM adaylar;\n```\nBitti.");
        assert!(!cleaned.contains("SELECT"), "{cleaned}");
        assert!(cleaned.starts_with("Sorgu şu:"));
        assert!(cleaned.ends_with("Bitti."));
    }

    #[test]
    fn removes_protocol_payload_blocks() {
        let raw = "Üç aday buldum. <query>{\"table\":\"candidates\"}</query> <RESULT rows=\"3\">[1,2,3]</RESULT>";
        assert_eq!(cleanse(raw), "Üç aday buldum.");
    }

    #[test]
    fn custom_protocol_tags_are_honoured() {
        let cleanser = SpeechCleanser::new(&["sql"]);
        assert_eq!(cleanser.clean("Tamam <sql>select 1</sql> oldu"), "Tamam oldu");
    }

    #[test]
    fn list_prefixes_are_dropped_and_paragraphs_become_sentences() {
        let raw = "Gerekli belgeler\n\n- Kimlik\n- Diploma\n\n1. Başvur\n2) Bekle";
        assert_eq!(
            cleanse(raw),
            "Gerekli belgeler. Kimlik Diploma. Başvur Bekle"
        );
    }

    #[test]
    fn paragraph_after_terminal_punctuation_adds_no_extra_stop() {
        assert_eq!(cleanse("Merhaba!\n\nNasılsınız?"), "Merhaba! Nasılsınız?");
    }

    #[test]
    fn inline_pipes_are_spoken_as_spaces() {
        let cleaned = cleanse("Çok **uzun** bir | tablo | olmayan | yanıt");
        assert_eq!(cleaned, "Çok uzun bir tablo olmayan yanıt");
    }

    #[test]
    fn markup_only_input_cleans_to_empty() {
        assert_eq!(cleanse("🎉🎉 ---\n\n**\n```\ncode\n```"), "");
        assert_eq!(cleanse(""), "");
    }
}
