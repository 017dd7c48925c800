//! Paragraph-boundary node splitter.
//!
//! Splits a document's text into node-sized passages that respect a
//! configurable `max_tokens` limit. Splitting prefers paragraph boundaries
//! (`\n\n`), then line or word boundaries for oversize paragraphs. When
//! `overlap_tokens > 0`, each passage after the first starts with the tail
//! of its predecessor so that sentences cut at a boundary stay retrievable.

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into passages. Blank text yields no passages.
pub fn split_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let pieces = split_paragraphs(text, max_chars);
    if overlap_chars == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut out = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            out.push(piece.clone());
            continue;
        }
        let tail = overlap_tail(&pieces[i - 1], overlap_chars);
        if tail.is_empty() {
            out.push(piece.clone());
        } else {
            out.push(format!("{} {}", tail, piece));
        }
    }
    out
}

fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut chunks);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(current_buf);
    }

    chunks
}

/// Split an oversize paragraph at newline or space boundaries, falling back
/// to the nearest char boundary below `max_chars`.
fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            break;
        }

        let limit = floor_char_boundary(remaining, max_chars);
        let window = &remaining[..limit];
        let mut split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        if split_at == 0 {
            // A single char wider than max_chars.
            split_at = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// The last `overlap_chars` bytes of `text`, moved forward to a char and
/// word boundary.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if overlap_chars >= text.len() {
        return text.trim();
    }
    let mut start = text.len() - overlap_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) if start > 0 => tail[pos..].trim(),
        _ => tail.trim(),
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 700, 0);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(split_text("", 700, 0).is_empty());
        assert!(split_text("  \n\n  ", 700, 0).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_text(text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = split_text(text, 5, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.trim().is_empty());
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "é".repeat(100) + " " + &"日本語".repeat(40);
        let chunks = split_text(&text, 3, 1);
        assert!(!chunks.is_empty());
        let joined: String = chunks.concat();
        assert!(joined.contains('é'));
        assert!(joined.contains('語'));
    }

    #[test]
    fn test_overlap_carries_tail_forward() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = split_text(text, 6, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("delta"));
        assert!(chunks[1].ends_with("theta"));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(split_text(text, 5, 1), split_text(text, 5, 1));
    }
}
