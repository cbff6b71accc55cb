/// Separators tried in priority order when splitting oversized segments.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, String> {
        if max_chars == 0 {
            return Err("chunk max size must be greater than zero".to_string());
        }
        if overlap_chars >= max_chars {
            return Err(
                format!(
                    "chunk overlap ({}) must be smaller than chunk size ({})",
                    overlap_chars,
                    max_chars
                )
            );
        }
        Ok(Self { max_chars, overlap_chars })
    }
}

/// Split text into chunks of at most `max_chars` characters, preferring
/// paragraph, line and sentence boundaries over raw slicing, then prepend
/// `overlap_chars` of trailing context from each chunk onto its successor.
///
/// Every returned chunk is non-empty and at most `max_chars + overlap_chars`
/// characters long.
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    split_recursive(trimmed, config.max_chars, &mut chunks);
    apply_overlap(&mut chunks, config.overlap_chars);
    chunks
}

fn split_recursive(mut segment: &str, max_chars: usize, chunks: &mut Vec<String>) {
    // The remainder is consumed iteratively so arbitrarily long documents do
    // not grow the stack.
    'remainder: loop {
        segment = segment.trim();
        if segment.is_empty() {
            return;
        }

        if segment.chars().count() <= max_chars {
            chunks.push(segment.to_string());
            return;
        }

        for separator in SEPARATORS {
            if let Some(split_at) = find_best_split(segment, separator, max_chars) {
                let head = segment[..split_at].trim_end();
                let tail = segment[split_at..].trim_start();

                // A split that leaves either side empty makes no progress.
                if head.is_empty() || tail.is_empty() {
                    continue;
                }

                // The head fits by construction of find_best_split.
                chunks.push(head.to_string());
                segment = tail;
                continue 'remainder;
            }
        }

        split_by_chars(segment, max_chars, chunks);
        return;
    }
}

/// Byte index just past the last occurrence of `separator` that still keeps
/// the head within `max_chars` characters. The separator stays with the head
/// so sentences keep their punctuation.
fn find_best_split(text: &str, separator: &str, max_chars: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut search_from = 0;
    let mut chars_before = 0;

    while let Some(found) = text[search_from..].find(separator) {
        let split_at = search_from + found + separator.len();
        let head_chars = chars_before + text[search_from..split_at].chars().count();

        if head_chars <= max_chars {
            best = Some(split_at);
            chars_before = head_chars;
            search_from = split_at;
        } else {
            break;
        }
    }

    best
}

/// Last resort for segments with no usable separator: hard character slices.
fn split_by_chars(segment: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let chars: Vec<char> = segment.chars().collect();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(piece.trim().to_string());
        }
        start = end;
    }
}

fn apply_overlap(chunks: &mut [String], overlap_chars: usize) {
    if overlap_chars == 0 || chunks.len() < 2 {
        return;
    }

    for i in (1..chunks.len()).rev() {
        let prev = &chunks[i - 1];
        let skip = prev.chars().count().saturating_sub(overlap_chars);
        let overlap: String = prev.chars().skip(skip).collect();

        if overlap.is_empty() {
            continue;
        }

        let mut joined = overlap;
        if !joined.ends_with(char::is_whitespace) && !chunks[i].starts_with(char::is_whitespace) {
            joined.push(' ');
        }
        joined.push_str(&chunks[i]);
        chunks[i] = joined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkConfig {
        ChunkConfig::new(max_chars, overlap_chars).unwrap()
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let text = "Aspirin inhibits cyclooxygenase.";
        let chunks = split_text(text, &config(100, 10));
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        assert!(split_text("", &config(100, 10)).is_empty());
        assert!(split_text("  \n\n \t ", &config(100, 10)).is_empty());
    }

    #[test]
    fn paragraph_breaks_are_preferred_split_points() {
        let text = "First paragraph about beta blockers.\n\nSecond paragraph about ACE inhibitors.";
        let chunks = split_text(text, &config(45, 0));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "First paragraph about beta blockers.");
        assert_eq!(chunks[1], "Second paragraph about ACE inhibitors.");
    }

    #[test]
    fn sentences_split_when_no_newlines_exist() {
        let text = "Warfarin is an anticoagulant. It is monitored with INR. Dosing is individual.";
        let chunks = split_text(text, &config(40, 0));
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('.'));
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn unbroken_text_falls_back_to_character_slices() {
        let text = "x".repeat(250);
        let chunks = split_text(&text, &config(100, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 100);
        assert_eq!(chunks[2].chars().count(), 50);
    }

    #[test]
    fn overlap_prepends_tail_of_previous_chunk() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = split_text(text, &config(25, 5));
        assert_eq!(chunks.len(), 2);
        // Tail of "First paragraph here." is "here."
        assert!(chunks[1].starts_with("here."));
        assert!(chunks[1].ends_with("Second paragraph here."));
    }

    #[test]
    fn chunks_never_exceed_size_plus_overlap() {
        let text =
            "Metformin lowers hepatic glucose production. ".repeat(40) +
            "\n\n" +
            &"Lisinopril is an ACE inhibitor used for hypertension. ".repeat(40);
        let cfg = config(120, 30);
        let chunks = split_text(&text, &cfg);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.trim().is_empty());
            assert!(
                chunk.chars().count() <= cfg.max_chars + cfg.overlap_chars,
                "chunk too large: {} chars",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "α".repeat(90);
        let chunks = split_text(&text, &config(40, 0));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn config_rejects_overlap_not_smaller_than_size() {
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(100, 99).is_ok());
    }
}
