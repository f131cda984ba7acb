//! Splits response text into bounded, speakable chunks.
//!
//! Boundaries are tried from coarse to fine: paragraph, sentence, clause,
//! word, and finally a hard split every `max_chunk_size` characters. Each tier
//! only sees the remainder the coarser tier could not fit. Every chunk is a
//! trimmed contiguous slice of the input, so no text is dropped or repeated.

use crate::tts::types::TextChunk;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// Sentence-final punctuation: CJK full-width marks end a sentence outright,
/// Latin marks only when followed by whitespace or end of text (keeps `3.14`
/// intact). Trailing closing quotes/brackets stay with the sentence.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[。！？；…]+[」』”’"')）\]]*\s*|[.!?;]+[”’"')）\]]*(?:\s+|$)"#)
        .unwrap_or_else(|e| panic!("invalid sentence regex: {e}"))
});

/// Clause-level punctuation in either script.
static CLAUSE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[，、：；]+\s*|[,:;]+(?:\s+|$)")
        .unwrap_or_else(|e| panic!("invalid clause regex: {e}"))
});

static WORD_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("invalid word regex: {e}")));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Sentence,
    Clause,
    Word,
}

impl Tier {
    fn finer(self) -> Option<Tier> {
        match self {
            Tier::Sentence => Some(Tier::Clause),
            Tier::Clause => Some(Tier::Word),
            Tier::Word => None,
        }
    }

    fn boundary(self) -> &'static Regex {
        match self {
            Tier::Sentence => &SENTENCE_END,
            Tier::Clause => &CLAUSE_END,
            Tier::Word => &WORD_GAP,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into trimmed, non-empty chunks of at most `max_chunk_size` chars.
///
/// Blank input yields an empty vector. A `max_chunk_size` of zero is treated as one.
pub fn split_text(text: &str, max_chunk_size: usize) -> Vec<String> {
    let max = max_chunk_size.max(1);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if char_len(paragraph) <= max {
            chunks.push(paragraph.to_string());
            continue;
        }
        split_segment(paragraph, max, Tier::Sentence, &mut chunks);
    }
    chunks
}

/// Split `text` and assign playback indices in text order.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<TextChunk> {
    split_text(text, max_chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk::new(index, text))
        .collect()
}

/// Byte ranges covering `segment` end to end, cut after each boundary match.
fn spans(segment: &str, boundary: &Regex) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for m in boundary.find_iter(segment) {
        if m.end() > start {
            spans.push(start..m.end());
            start = m.end();
        }
    }
    if start < segment.len() {
        spans.push(start..segment.len());
    }
    spans
}

/// Greedily pack the spans of `tier` into chunks; oversized spans fall through
/// to the next finer tier.
fn split_segment(segment: &str, max: usize, tier: Tier, out: &mut Vec<String>) {
    let mut current: Option<Range<usize>> = None;

    for span in spans(segment, tier.boundary()) {
        if let Some(ref cur) = current {
            if char_len(segment[cur.start..span.end].trim()) <= max {
                current = Some(cur.start..span.end);
                continue;
            }
            push_trimmed(&segment[cur.clone()], out);
            current = None;
        }

        let piece = segment[span.clone()].trim();
        if char_len(piece) <= max {
            current = Some(span);
        } else {
            match tier.finer() {
                Some(finer) => split_segment(piece, max, finer, out),
                None => hard_split(piece, max, out),
            }
        }
    }

    if let Some(cur) = current {
        push_trimmed(&segment[cur], out);
    }
}

/// Last resort: cut every `max` characters.
fn hard_split(piece: &str, max: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = piece.chars().collect();
    for window in chars.chunks(max) {
        let part: String = window.iter().collect();
        push_trimmed(&part, out);
    }
}

fn push_trimmed(s: &str, out: &mut Vec<String>) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn assert_round_trip(text: &str, chunks: &[String]) {
        assert_eq!(squash(&chunks.concat()), squash(text), "chunks: {chunks:?}");
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(split_text("", 80).is_empty());
        assert!(split_text("   \n\t  ", 80).is_empty());
    }

    #[test]
    fn test_short_text_is_single_trimmed_chunk() {
        assert_eq!(split_text("  Hello there.  ", 80), vec!["Hello there."]);
    }

    #[test]
    fn test_short_text_with_newline_stays_whole() {
        assert_eq!(split_text("one\ntwo", 80), vec!["one\ntwo"]);
    }

    #[test]
    fn test_paragraphs_that_fit_are_emitted_as_is() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_text(&text, 60);
        assert_eq!(chunks, vec!["a".repeat(50), "b".repeat(50)]);
    }

    #[test]
    fn test_sentences_are_packed_greedily() {
        let text = "First sentence here. Second one is here. Third sentence ends it.";
        let chunks = split_text(text, 42);
        assert_eq!(
            chunks,
            vec![
                "First sentence here. Second one is here.",
                "Third sentence ends it."
            ]
        );
    }

    #[test]
    fn test_chinese_sentences_split_on_full_width_marks() {
        let text = "今天天气很好。我们去公园散步吧！你觉得怎么样？好的；那就出发。";
        let chunks = split_text(text, 10);
        assert_eq!(
            chunks,
            vec!["今天天气很好。", "我们去公园散步吧！", "你觉得怎么样？好的；", "那就出发。"]
        );
    }

    #[test]
    fn test_trailing_sentence_without_punctuation_is_kept() {
        let text = "This part ends properly. This trailing part has no final mark";
        let chunks = split_text(text, 30);
        assert_eq!(chunks[0], "This part ends properly.");
        assert_eq!(chunks.last().map(String::as_str), Some("final mark"));
        assert_round_trip(text, &chunks);
    }

    #[test]
    fn test_decimal_point_does_not_end_sentence() {
        let text = "Pi is about 3.14159 and that is fine. Next sentence follows here.";
        let chunks = split_text(text, 40);
        assert_eq!(chunks[0], "Pi is about 3.14159 and that is fine.");
    }

    #[test]
    fn test_long_sentence_splits_on_clauses() {
        let text = "When the rain stopped, the children ran outside, laughing loudly, and the dog followed them.";
        let chunks = split_text(text, 40);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 40, "{chunk:?}");
        }
        assert_eq!(chunks[0], "When the rain stopped,");
        assert_round_trip(text, &chunks);
    }

    #[test]
    fn test_long_clause_splits_on_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = split_text(text, 20);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 20, "{chunk:?}");
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        assert_eq!(chunks[0], "alpha beta gamma");
        assert_round_trip(text, &chunks);
    }

    #[test]
    fn test_unbroken_text_is_hard_split() {
        let text = "字".repeat(25);
        let chunks = split_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(char_len(&chunks[0]), 10);
        assert_eq!(char_len(&chunks[1]), 10);
        assert_eq!(char_len(&chunks[2]), 5);
    }

    #[test]
    fn test_zero_max_is_treated_as_one() {
        let chunks = split_text("abc", 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_multibyte_lengths_are_counted_in_chars() {
        // 12 chars but 36 bytes
        let text = "你好世界你好世界你好世界";
        assert_eq!(split_text(text, 12), vec![text]);
    }

    #[test]
    fn test_chunk_text_assigns_sequential_indices() {
        let chunks = chunk_text("One. Two. Three.", 6);
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(chunks[2].text, "Three.");
    }

    #[test]
    fn test_quotes_stay_with_their_sentence() {
        let text = "He said \"stop.\" Then he left the room quietly.";
        let chunks = split_text(text, 20);
        assert_eq!(chunks[0], "He said \"stop.\"");
    }

    #[test]
    fn test_mixed_paragraphs_round_trip() {
        let text = "短段落。\n\nThis is a much longer English paragraph, with clauses; and more words than fit. \
                    It keeps going for a while.\n最后一段文字，包含中文标点，需要被正确地切分成多个片段。";
        let chunks = split_text(text, 24);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 24, "{chunk:?}");
        }
        assert_round_trip(text, &chunks);
    }
}
