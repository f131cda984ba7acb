use voxline::tts::{chunk_text, split_text};

const CORPUS: &[&str] = &[
    "",
    "   \n\t ",
    "Hello.",
    "Pi is roughly 3.14, and e is about 2.718. Neither ends neatly!",
    "First line without punctuation\nsecond line, with a comma\n\nthird paragraph after a gap.",
    "今天天气很好。我们去公园散步吧！你觉得怎么样？好的，我们下午三点出发；记得带水。",
    "Mixed text 混合文本，English and 中文 together. 这是第二句。And a third one?",
    "Supercalifragilisticexpialidocious-is-a-very-long-token-without-any-spaces-at-all-in-it.",
    "\"Quoted sentence,\" she said. (A parenthetical aside.) Then: a colon; a semicolon, a comma.",
    "Trailing text with no final punctuation at all and quite a few words to split",
];

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn long_story() -> String {
    [
        "The morning started quietly over the harbor town.",
        "Fishing boats drifted out past the breakwater while gulls circled overhead.",
        "By noon the market square was crowded with traders selling bread and cheese, and children chased each other between the stalls laughing loudly.",
        "A sudden storm rolled in from the west.",
        "Rain hammered the rooftops for nearly an hour without pause, flooding the narrow lanes that wound down toward the water.",
        "By evening the sky had cleared and the lamps along the quay flickered on.",
    ]
    .join(" ")
}

#[test]
fn test_chunks_are_bounded_trimmed_and_non_empty() {
    for text in CORPUS {
        for max in [1, 2, 5, 10, 17, 40, 80, 200] {
            for chunk in split_text(text, max) {
                assert!(!chunk.is_empty(), "empty chunk for {text:?} at {max}");
                assert_eq!(chunk, chunk.trim(), "untrimmed chunk for {text:?} at {max}");
                assert!(
                    chunk.chars().count() <= max,
                    "chunk {chunk:?} exceeds {max} chars"
                );
            }
        }
    }
}

#[test]
fn test_no_text_dropped_or_repeated() {
    for text in CORPUS {
        for max in [1, 3, 8, 25, 60, 80] {
            let chunks = split_text(text, max);
            assert_eq!(
                squash(&chunks.concat()),
                squash(text),
                "round trip failed for {text:?} at {max}: {chunks:?}"
            );
        }
    }
}

#[test]
fn test_chunks_are_slices_in_text_order() {
    for text in CORPUS {
        for max in [4, 12, 30, 80] {
            let mut rest = *text;
            for chunk in split_text(text, max) {
                let at = rest
                    .find(chunk.as_str())
                    .unwrap_or_else(|| panic!("{chunk:?} out of order in {text:?} at {max}"));
                rest = &rest[at + chunk.len()..];
            }
            assert!(rest.trim().is_empty(), "unconsumed tail {rest:?}");
        }
    }
}

#[test]
fn test_indices_follow_split_order() {
    let text = long_story();
    let chunks = chunk_text(&text, 80);
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    assert_eq!(texts, split_text(&text, 80));
    for (position, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, position);
    }
}

#[test]
fn test_long_story_splits_into_few_sentence_chunks() {
    let text = long_story();
    assert!((450..=550).contains(&text.chars().count()));

    let chunks = split_text(&text, 80);
    assert!(chunks.len() <= 8, "too many chunks: {chunks:?}");
    assert!(chunks.iter().all(|c| c.chars().count() <= 80));
    assert_eq!(squash(&chunks.concat()), squash(&text));

    // Short sentences are never cut
    assert!(chunks.contains(&"A sudden storm rolled in from the west.".to_string()));
    assert_eq!(chunks[0], "The morning started quietly over the harbor town.");
    assert!(
        chunks
            .last()
            .unwrap()
            .ends_with("the lamps along the quay flickered on.")
    );
}

#[test]
fn test_oversized_sentence_breaks_at_clause() {
    let text = long_story();
    let chunks = split_text(&text, 80);
    assert!(chunks.contains(
        &"By noon the market square was crowded with traders selling bread and cheese,".to_string()
    ));
    assert!(chunks.contains(
        &"and children chased each other between the stalls laughing loudly.".to_string()
    ));
}

#[test]
fn test_cjk_sentences_split_on_full_width_marks() {
    let chunks = split_text(CORPUS[5], 12);
    assert_eq!(chunks[0], "今天天气很好。");
    assert!(chunks.iter().all(|c| c.chars().count() <= 12));
}

#[test]
fn test_zero_max_is_treated_as_one() {
    assert_eq!(split_text("abc", 0), vec!["a", "b", "c"]);
}
