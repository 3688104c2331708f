//! Rough token counts for prompt budgeting.
//!
//! Each whitespace-separated word costs one token per four characters of
//! text (at least one), plus one per ASCII punctuation mark.

const CHARS_PER_TOKEN: usize = 4;

fn word_tokens(word: &str) -> usize {
    let (punct, text) = word.chars().fold((0usize, 0usize), |(p, t), c| {
        if c.is_ascii_punctuation() {
            (p + 1, t)
        } else {
            (p, t + 1)
        }
    });
    (text.div_ceil(CHARS_PER_TOKEN) + punct).max(1)
}

pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().map(word_tokens).sum()
}

pub fn would_exceed_limit(current_tokens: usize, new_text: &str, max_tokens: usize) -> bool {
    current_tokens + estimate_tokens(new_text) > max_tokens
}

/// Longest word-aligned prefix of `text` that fits in `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let mut used = 0;
    let mut end = 0;

    for piece in text.split_inclusive(char::is_whitespace) {
        let word = piece.trim();
        let cost = if word.is_empty() { 0 } else { word_tokens(word) };
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        end += piece.len();
    }

    text[..end].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        // 2 + 2 + 2 + 1 + 2 + 1 + 2
        assert_eq!(estimate_tokens("Embryo transfer follows a seven day culture"), 12);
        // "ICSI," -> 1 + 1, "(ICSI)." -> 1 + 3
        assert_eq!(estimate_tokens("ICSI, (ICSI)."), 6);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens(" \n\t "), 0);
    }

    #[test]
    fn test_would_exceed() {
        let text = "word ".repeat(500);
        assert!(would_exceed_limit(1000, &text, 1400));
        assert!(!would_exceed_limit(1000, &text, 1500));
    }

    #[test]
    fn test_truncate_to_tokens() {
        let text = "oocyte retrieval happens under sedation";
        let cut = truncate_to_tokens(text, 5);
        assert_eq!(cut, "oocyte retrieval");
        assert!(estimate_tokens(cut) <= 5);

        assert_eq!(truncate_to_tokens(text, 100), text);
        assert_eq!(truncate_to_tokens(text, 1), "");
    }
}
