//! Tolerant parser for the re-ranking model's free-text response.
//!
//! The expected shape is:
//!
//! ```text
//! Answer:
//! <free text>
//!
//! Ranked Text Results:
//! 1. [Text #N] — Title #N
//!
//! Ranked Image Results:
//! 1. [Image #N] — Title #N
//! ```
//!
//! In evaluation mode each ranked line must also carry
//! `Title: "<title>" — Score: <0|1>`.
//!
//! Parsing never fails. Whatever can be recovered ends up in the
//! [`QueryResult`]; everything that was skipped is listed in the
//! [`ParseReport`]. The model is not trusted: indices outside the candidate
//! lists are dropped, and so are repeated entries.
//!
//! Accepted variations on a ranked line:
//!
//! | Variation | Example |
//! |-----------|---------|
//! | enumerator or bullet | `3)`, `-`, `*`, `•`, none |
//! | markdown bold | `**[Text #2]**` |
//! | tag spacing and case | `[ text # 2 ]` |
//! | separator | `—`, `–`, `-`, `:` |
//! | title quoting | `"x"`, `“x”`, `x` |

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::models::{Modality, Mode, QueryResult, RankedItem};

/// Answer used when the response has no recognisable `Answer:` section.
pub const NO_ANSWER: &str = "[No answer found]";

/// Number of candidates shown to the model per modality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateCounts {
    pub text: usize,
    pub image: usize,
}

impl CandidateCounts {
    pub fn for_modality(&self, modality: Modality) -> usize {
        match modality {
            Modality::Text => self.text,
            Modality::Image => self.image,
        }
    }
}

/// Something in the response that could not be used as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    MissingAnswer,
    /// A line inside a ranked section that does not follow the grammar.
    Malformed { line: usize, text: String },
    /// Evaluation mode only.
    MissingScore {
        line: usize,
        modality: Modality,
        index: usize,
    },
    IndexOutOfRange {
        line: usize,
        modality: Modality,
        index: usize,
        available: usize,
    },
    Duplicate {
        line: usize,
        modality: Modality,
        index: usize,
    },
    NoRankedLines,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIssue::MissingAnswer => write!(f, "no answer section"),
            ParseIssue::Malformed { line, text } => {
                write!(f, "line {}: unrecognised ranked entry: {}", line, text)
            }
            ParseIssue::MissingScore {
                line,
                modality,
                index,
            } => write!(
                f,
                "line {}: [{} #{}] has no relevance score",
                line,
                modality.label(),
                index
            ),
            ParseIssue::IndexOutOfRange {
                line,
                modality,
                index,
                available,
            } => write!(
                f,
                "line {}: [{} #{}] out of range ({} candidates)",
                line,
                modality.label(),
                index,
                available
            ),
            ParseIssue::Duplicate {
                line,
                modality,
                index,
            } => write!(
                f,
                "line {}: [{} #{}] already ranked",
                line,
                modality.label(),
                index
            ),
            ParseIssue::NoRankedLines => write!(f, "no ranked entries found"),
        }
    }
}

/// Diagnostics collected while parsing one response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseReport {
    pub issues: Vec<ParseIssue>,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Extract the answer and both ranked lists from a raw model response.
pub fn parse_response(
    raw: &str,
    mode: Mode,
    counts: CandidateCounts,
) -> (QueryResult, ParseReport) {
    let lines: Vec<&str> = raw.lines().collect();
    let mut report = ParseReport::default();

    let (answer, answer_lines) = match extract_answer(&lines) {
        Some((text, span)) => (text, span),
        None => {
            report.issues.push(ParseIssue::MissingAnswer);
            (NO_ANSWER.to_string(), 0..0)
        }
    };

    let mut result = QueryResult {
        answer,
        ranked_text: Vec::new(),
        ranked_images: Vec::new(),
    };
    let mut seen: HashSet<(Modality, usize)> = HashSet::new();
    let mut in_section = false;
    let mut matched = 0usize;

    for (i, raw_line) in lines.iter().enumerate() {
        if answer_lines.contains(&i) {
            continue;
        }
        let line_no = i + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        match section_header(line) {
            Some(Header::Ranked) => {
                in_section = true;
                continue;
            }
            Some(Header::Answer) => {
                in_section = false;
                continue;
            }
            None => {}
        }

        let Some(entry) = parse_entry(line, mode) else {
            if in_section {
                report.issues.push(ParseIssue::Malformed {
                    line: line_no,
                    text: line.to_string(),
                });
            }
            continue;
        };
        matched += 1;

        let available = counts.for_modality(entry.modality);
        if entry.index == 0 || entry.index > available {
            report.issues.push(ParseIssue::IndexOutOfRange {
                line: line_no,
                modality: entry.modality,
                index: entry.index,
                available,
            });
            continue;
        }

        let score = match mode {
            Mode::Interactive => None,
            Mode::Evaluation => match entry.score {
                Some(s) => Some(s),
                None => {
                    report.issues.push(ParseIssue::MissingScore {
                        line: line_no,
                        modality: entry.modality,
                        index: entry.index,
                    });
                    continue;
                }
            },
        };

        if !seen.insert((entry.modality, entry.index)) {
            report.issues.push(ParseIssue::Duplicate {
                line: line_no,
                modality: entry.modality,
                index: entry.index,
            });
            continue;
        }

        let item = RankedItem {
            modality: entry.modality,
            index: entry.index,
            title: entry.title,
            score,
        };
        match entry.modality {
            Modality::Text => result.ranked_text.push(item),
            Modality::Image => result.ranked_images.push(item),
        }
    }

    if matched == 0 {
        report.issues.push(ParseIssue::NoRankedLines);
    }

    for issue in &report.issues {
        tracing::warn!(%issue, "response parse degraded");
    }
    tracing::debug!(
        text = result.ranked_text.len(),
        image = result.ranked_images.len(),
        issues = report.issues.len(),
        "parsed response"
    );

    (result, report)
}

// ============ Answer ============

/// Returns the answer text and the range of line indices it occupies.
fn extract_answer(lines: &[&str]) -> Option<(String, std::ops::Range<usize>)> {
    let start = lines
        .iter()
        .position(|l| matches!(section_header(l.trim()), Some(Header::Answer)))?;

    let mut parts: Vec<&str> = Vec::new();
    let inline = after_label(strip_markup(lines[start].trim()), "answer:").unwrap_or("");
    let inline = inline.trim_start_matches('*').trim();
    if !inline.is_empty() {
        parts.push(inline);
    }

    let mut end = start + 1;
    while end < lines.len() {
        let line = lines[end].trim();
        if section_header(line).is_some() {
            break;
        }
        if line.is_empty() {
            if parts.is_empty() {
                end += 1;
                continue;
            }
            break;
        }
        parts.push(line);
        end += 1;
    }

    if parts.is_empty() {
        return None;
    }
    Some((parts.join("\n"), start..end))
}

// ============ Headers ============

enum Header {
    Answer,
    Ranked,
}

fn section_header(line: &str) -> Option<Header> {
    let bare = strip_markup(line);
    let lower = bare.to_ascii_lowercase();
    if lower.starts_with("answer:") {
        return Some(Header::Answer);
    }
    if lower.starts_with("ranked text") || lower.starts_with("ranked image") {
        return Some(Header::Ranked);
    }
    None
}

/// Drop leading markdown heading/bold markers.
fn strip_markup(line: &str) -> &str {
    line.trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace())
}

fn after_label<'a>(s: &'a str, label: &str) -> Option<&'a str> {
    let head = s.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        s.get(label.len()..)
    } else {
        None
    }
}

// ============ Ranked entries ============

struct Entry {
    modality: Modality,
    index: usize,
    title: String,
    score: Option<f64>,
}

/// Match one ranked line. `None` means the line is not a ranked entry.
fn parse_entry(line: &str, mode: Mode) -> Option<Entry> {
    let cleaned = line.replace("**", "");
    let rest = strip_enumerator(cleaned.trim());

    let rest = rest.strip_prefix('[')?.trim_start();
    let (modality, rest) = if let Some(r) = after_label(rest, "text") {
        (Modality::Text, r)
    } else if let Some(r) = after_label(rest, "image") {
        (Modality::Image, r)
    } else {
        return None;
    };

    let rest = rest.trim_start().strip_prefix('#')?.trim_start();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let index: usize = rest[..digits_end].parse().ok()?;
    let rest = rest[digits_end..].trim_start().strip_prefix(']')?;

    let (title_part, score) = match mode {
        Mode::Interactive => (rest, None),
        Mode::Evaluation => split_score(rest),
    };
    Some(Entry {
        modality,
        index,
        title: clean_title(title_part),
        score,
    })
}

/// Skip `1.`, `2)`, `-`, `*`, `•` prefixes.
fn strip_enumerator(line: &str) -> &str {
    let digits_end = line
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(line.len());
    let rest = if digits_end > 0 {
        let after = &line[digits_end..];
        after
            .strip_prefix('.')
            .or_else(|| after.strip_prefix(')'))
            .unwrap_or(after)
    } else {
        line.strip_prefix(['-', '*', '•']).unwrap_or(line)
    };
    rest.trim_start()
}

/// Split `<title part> — Score: <n>` into its halves.
///
/// Only a trailing `Score: <n>` segment set off by a separator counts, so a
/// title such as `Final Score: Argentina wins` is left whole.
fn split_score(rest: &str) -> (&str, Option<f64>) {
    // ASCII lowercasing keeps byte offsets intact.
    let lower = rest.to_ascii_lowercase();
    let Some(pos) = lower.rfind("score:") else {
        return (rest, None);
    };

    let head = rest[..pos].trim_end();
    if !(head.is_empty() || head.ends_with(SEPARATORS) || head.ends_with(',')) {
        return (rest, None);
    }

    let value = rest[pos + "score:".len()..].trim_start();
    let num_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let tail = value[num_end..].trim().trim_end_matches(['.', ')']);
    if num_end == 0 || !tail.is_empty() {
        return (rest, None);
    }
    match value[..num_end].parse::<f64>() {
        Ok(score) => (head.trim_end_matches(','), Some(score)),
        Err(_) => (rest, None),
    }
}

const SEPARATORS: &[char] = &['—', '–', '-', ':', '|'];

fn clean_title(part: &str) -> String {
    let trimmed = part
        .trim()
        .trim_start_matches(SEPARATORS)
        .trim_end_matches(SEPARATORS)
        .trim();
    let unlabeled = after_label(trimmed, "title:")
        .map(str::trim)
        .unwrap_or(trimmed);
    unlabeled
        .trim_matches(|c| c == '"' || c == '“' || c == '”')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(text: usize, image: usize) -> CandidateCounts {
        CandidateCounts { text, image }
    }

    fn indices(items: &[RankedItem]) -> Vec<usize> {
        items.iter().map(|i| i.index).collect()
    }

    #[test]
    fn test_interactive_response() {
        let raw = "Answer:\nBikes are red.\nMostly.\n\nRanked Text Results:\n1. [Text #2] — Red bikes\n2. [Text #1] — Blue bikes\n\nRanked Image Results:\n1. [Image #1] — A bike\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(2, 1));
        assert_eq!(result.answer, "Bikes are red.\nMostly.");
        assert_eq!(indices(&result.ranked_text), vec![2, 1]);
        assert_eq!(result.ranked_text[0].title, "Red bikes");
        assert_eq!(result.ranked_text[0].score, None);
        assert_eq!(indices(&result.ranked_images), vec![1]);
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_evaluation_response_with_scores() {
        let raw = r#"Answer:
Two match.

Ranked Text Results:
1. [Text #1] — Title: "Alpha" — Score: 1
2. [Text #3] — Title: "Gamma" — Score: 0
3. [Text #2] — Title: "Beta" — Score: 1

Ranked Image Results:
1. [Image #2] — Title: "Photo" — Score: 0.0
"#;
        let (result, report) = parse_response(raw, Mode::Evaluation, counts(3, 2));
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(indices(&result.ranked_text), vec![1, 3, 2]);
        assert_eq!(result.ranked_text[1].title, "Gamma");
        assert_eq!(result.ranked_text[2].score, Some(1.0));
        assert_eq!(result.ranked_images[0].score, Some(0.0));
    }

    #[test]
    fn test_permutation_parses_back_in_order() {
        let text_order = [4, 1, 5, 2, 3];
        let image_order = [2, 3, 1];
        let mut raw = String::from("Answer:\nok\n\nRanked Text Results:\n");
        for (rank, idx) in text_order.iter().enumerate() {
            raw.push_str(&format!(
                "{}. [Text #{}] — Title: \"t{}\" — Score: 1\n",
                rank + 1,
                idx,
                idx
            ));
        }
        raw.push_str("\nRanked Image Results:\n");
        for (rank, idx) in image_order.iter().enumerate() {
            raw.push_str(&format!(
                "{}. [Image #{}] — Title: \"i{}\" — Score: 0\n",
                rank + 1,
                idx,
                idx
            ));
        }

        let (result, report) = parse_response(&raw, Mode::Evaluation, counts(5, 3));
        assert!(report.is_clean());
        assert_eq!(indices(&result.ranked_text), text_order.to_vec());
        assert_eq!(indices(&result.ranked_images), image_order.to_vec());
        assert!(result.ranked_text.iter().all(|i| i.modality == Modality::Text));
    }

    #[test]
    fn test_duplicate_keeps_first_position() {
        let raw = "Answer:\nx\n\nRanked Text Results:\n1. [Text #2] — A\n2. [Text #1] — B\n3. [Text #2] — A again\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(3, 0));
        assert_eq!(indices(&result.ranked_text), vec![2, 1]);
        assert_eq!(result.ranked_text[0].title, "A");
        assert_eq!(
            report.issues,
            vec![ParseIssue::Duplicate {
                line: 7,
                modality: Modality::Text,
                index: 2
            }]
        );
    }

    #[test]
    fn test_out_of_range_index_is_dropped() {
        let raw = "Answer:\nx\n\nRanked Text Results:\n1. [Text #7] — Invented\n2. [Text #0] — Zero\n3. [Text #5] — Last\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(5, 0));
        assert_eq!(indices(&result.ranked_text), vec![5]);
        assert!(report.issues.contains(&ParseIssue::IndexOutOfRange {
            line: 5,
            modality: Modality::Text,
            index: 7,
            available: 5,
        }));
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_missing_answer_uses_sentinel() {
        let raw = "Ranked Text Results:\n1. [Text #1] — Only\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(1, 0));
        assert_eq!(result.answer, NO_ANSWER);
        assert_eq!(indices(&result.ranked_text), vec![1]);
        assert_eq!(report.issues, vec![ParseIssue::MissingAnswer]);
    }

    #[test]
    fn test_unstructured_response_degrades() {
        let raw = "I'm sorry, I cannot help with that.";
        let (result, report) = parse_response(raw, Mode::Evaluation, counts(3, 3));
        assert_eq!(result.answer, NO_ANSWER);
        assert!(result.ranked_text.is_empty());
        assert!(result.ranked_images.is_empty());
        assert_eq!(
            report.issues,
            vec![ParseIssue::MissingAnswer, ParseIssue::NoRankedLines]
        );
    }

    #[test]
    fn test_evaluation_requires_score() {
        let raw = "Answer:\nx\n\nRanked Text Results:\n1. [Text #1] — Title: \"A\"\n2. [Text #2] — Title: \"B\" — Score: 1\n";
        let (result, report) = parse_response(raw, Mode::Evaluation, counts(2, 0));
        assert_eq!(indices(&result.ranked_text), vec![2]);
        assert!(matches!(
            report.issues[0],
            ParseIssue::MissingScore { index: 1, .. }
        ));
    }

    #[test]
    fn test_malformed_lines_in_section_are_reported() {
        let raw = "Answer:\nx\n\nRanked Text Results:\nnothing relevant here\n1. [Text #1] — Fine\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(1, 0));
        assert_eq!(indices(&result.ranked_text), vec![1]);
        assert_eq!(
            report.issues,
            vec![ParseIssue::Malformed {
                line: 5,
                text: "nothing relevant here".into()
            }]
        );
    }

    #[test]
    fn test_tolerated_formatting_variants() {
        let raw = "**Answer:** Short answer.\n\n### Ranked Text Results\n- **[ text # 2 ]** – Title: “Curly” – Score: 1\n3) [TEXT #1]: Title: Plain - Score: 0\n[Image #1] - Pic - Score: 1\n";
        let (result, report) = parse_response(raw, Mode::Evaluation, counts(2, 1));
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(result.answer, "Short answer.");
        assert_eq!(indices(&result.ranked_text), vec![2, 1]);
        assert_eq!(result.ranked_text[0].title, "Curly");
        assert_eq!(result.ranked_text[1].title, "Plain");
        assert_eq!(result.ranked_text[1].score, Some(0.0));
        assert_eq!(result.ranked_images[0].title, "Pic");
    }

    #[test]
    fn test_answer_prose_mentioning_candidates_is_not_ranked() {
        let raw = "Answer:\n[Text #1] explains it best.\n\nRanked Text Results:\n1. [Text #2] — B\n";
        let (result, _) = parse_response(raw, Mode::Interactive, counts(2, 0));
        assert_eq!(result.answer, "[Text #1] explains it best.");
        assert_eq!(indices(&result.ranked_text), vec![2]);
    }

    #[test]
    fn test_score_in_title_is_kept_interactive() {
        let raw = "Answer:\nx\n\nRanked Text Results:\n1. [Text #1] — Final Score: Argentina wins\n";
        let (result, report) = parse_response(raw, Mode::Interactive, counts(1, 0));
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(result.ranked_text[0].title, "Final Score: Argentina wins");
        assert_eq!(result.ranked_text[0].score, None);
    }

    #[test]
    fn test_score_in_title_is_kept_evaluation() {
        let raw = "Answer:\nx\n\nRanked Text Results:\n1. [Text #1] — Title: \"Final Score: Argentina wins\" — Score: 1\n2. [Text #2] — Final Score: 3\n";
        let (result, report) = parse_response(raw, Mode::Evaluation, counts(2, 0));
        assert_eq!(indices(&result.ranked_text), vec![1]);
        assert_eq!(result.ranked_text[0].title, "Final Score: Argentina wins");
        assert_eq!(result.ranked_text[0].score, Some(1.0));
        assert_eq!(
            report.issues,
            vec![ParseIssue::MissingScore {
                line: 6,
                modality: Modality::Text,
                index: 2
            }]
        );
    }
}
