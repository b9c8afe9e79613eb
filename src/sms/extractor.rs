//! Verification code extraction
//!
//! A candidate is a maximal run of 4 to 8 ASCII digits. Because runs are
//! maximal, a candidate can never be a slice of a longer number such as a
//! phone number or an amount. Rules are tried in [`MatchRule`] order and the
//! first rule with any match wins; within a rule the earliest candidate wins.

use std::fmt;

/// Phrases that mark a text as carrying a verification code
///
/// Latin entries match case-insensitively.
pub const KEYWORDS: &[&str] = &[
    "验证码",
    "校验码",
    "驗證碼",
    "动态码",
    "verification code",
    "auth code",
    "otp",
    "code",
];

pub const MIN_CODE_LEN: usize = 4;
pub const MAX_CODE_LEN: usize = 8;

/// Maximum distance in characters between a keyword and its code
pub const KEYWORD_WINDOW: usize = 16;

/// Rule that produced a match, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRule {
    /// Code follows a keyword, e.g. `验证码是583920`
    AfterKeyword,
    /// Code precedes a keyword, e.g. `583920 is your verification code`
    BeforeKeyword,
    /// Keyword and code appear anywhere in the same text
    SameText,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::AfterKeyword => write!(f, "after-keyword"),
            MatchRule::BeforeKeyword => write!(f, "before-keyword"),
            MatchRule::SameText => write!(f, "same-text"),
        }
    }
}

/// An extracted code
///
/// `source` borrows the text it was found in, for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult<'a> {
    pub code: String,
    pub rule: MatchRule,
    /// Character offset of the code in `source`
    pub position: usize,
    pub source: &'a str,
}

impl ExtractionResult<'_> {
    /// Drops the back-reference so the result can outlive its source text
    pub fn into_owned(self) -> ExtractedCode {
        ExtractedCode {
            code: self.code,
            rule: self.rule,
        }
    }
}

/// An [`ExtractionResult`] detached from its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCode {
    pub code: String,
    pub rule: MatchRule,
}

impl fmt::Display for ExtractedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.rule)
    }
}

/// Span in characters, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Extracts at most one verification code from `text`
///
/// Deterministic: the result depends on `text` only.
pub fn extract(text: &str) -> Option<ExtractionResult<'_>> {
    let chars: Vec<char> = text.chars().collect();
    let lowered: Vec<char> = chars.iter().map(|c| c.to_ascii_lowercase()).collect();

    let keywords = keyword_spans(&lowered);
    if keywords.is_empty() {
        return None;
    }

    let candidates = candidate_spans(&chars);
    if candidates.is_empty() {
        return None;
    }

    let after = candidates.iter().find(|c| {
        keywords
            .iter()
            .any(|k| c.start >= k.end && c.start - k.end <= KEYWORD_WINDOW)
    });
    let before = || {
        candidates.iter().find(|c| {
            keywords
                .iter()
                .any(|k| k.start >= c.end && k.start - c.end <= KEYWORD_WINDOW)
        })
    };

    let (span, rule) = if let Some(span) = after {
        (span, MatchRule::AfterKeyword)
    } else if let Some(span) = before() {
        (span, MatchRule::BeforeKeyword)
    } else {
        (&candidates[0], MatchRule::SameText)
    };

    Some(ExtractionResult {
        code: chars[span.start..span.end].iter().collect(),
        rule,
        position: span.start,
        source: text,
    })
}

/// Tries each snippet in order and returns the first extraction
pub fn extract_first<'a, I>(snippets: I) -> Option<ExtractionResult<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    snippets
        .into_iter()
        .filter(|snippet| !snippet.is_empty())
        .find_map(extract)
}

fn keyword_spans(lowered: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    for keyword in KEYWORDS {
        let needle: Vec<char> = keyword.chars().collect();
        if needle.len() > lowered.len() {
            continue;
        }
        for start in 0..=lowered.len() - needle.len() {
            let end = start + needle.len();
            if lowered[start..end] != needle[..] {
                continue;
            }
            // overlapping keywords ("verification code" contains "code")
            if spans.iter().any(|s: &Span| s.start <= start && end <= s.end) {
                continue;
            }
            // latin keywords must not be part of a longer word ("barcode", "codec")
            if needle[0].is_ascii_alphabetic() && !word_bounded(lowered, start, end) {
                continue;
            }
            spans.push(Span { start, end });
        }
    }
    spans.sort_by_key(|s| s.start);
    spans
}

fn word_bounded(chars: &[char], start: usize, end: usize) -> bool {
    let before_ok = start == 0 || !chars[start - 1].is_ascii_alphabetic();
    let after_ok = end == chars.len() || !chars[end].is_ascii_alphabetic();
    before_ok && after_ok
}

fn candidate_spans(chars: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        if !chars[idx].is_ascii_digit() {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < chars.len() && chars[idx].is_ascii_digit() {
            idx += 1;
        }
        let len = idx - start;
        if (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
            spans.push(Span { start, end: idx });
        }
    }
    spans
}
