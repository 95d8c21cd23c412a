//! Recursive character splitting (spec section 4.7), the fallback every
//! other chunker in this module eventually delegates to.

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

fn overlap_for(max_size: usize) -> usize {
    (max_size as f64 * 0.15).floor().min(200.0) as usize
}

/// Splits `text` into chunks of at most `max_size` characters, preferring
/// to break on the earliest separator in `SEPARATORS` that keeps pieces
/// under the limit, backing off to character-level splitting as a last
/// resort. Adjacent chunks share `overlap_for(max_size)` characters.
fn split_recursive(text: &str, max_size: usize) -> Vec<String> {
    if text.chars().count() <= max_size {
        return if text.trim().is_empty() { Vec::new() } else { vec![text.to_string()] };
    }

    for sep in SEPARATORS {
        if sep.is_empty() {
            continue;
        }
        let pieces: Vec<&str> = text.split(sep).collect();
        if pieces.len() <= 1 {
            continue;
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            let candidate = if current.is_empty() { piece.to_string() } else { format!("{current}{sep}{piece}") };
            if candidate.chars().count() > max_size && !current.is_empty() {
                chunks.push(current.clone());
                current = piece.to_string();
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        // Re-split any oversized piece with the next separator down.
        let mut refined = Vec::new();
        for chunk in chunks {
            if chunk.chars().count() > max_size {
                refined.extend(split_recursive(&chunk, max_size));
            } else {
                refined.push(chunk);
            }
        }
        return apply_overlap(refined, overlap_for(max_size));
    }

    // No separator applied (single long token): hard character split.
    let overlap = overlap_for(max_size);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

fn apply_overlap(chunks: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }
    let mut out = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
            continue;
        }
        let prev = &chunks[i - 1];
        let tail: String = prev.chars().rev().take(overlap).collect::<Vec<_>>().into_iter().rev().collect();
        out.push(format!("{tail}{chunk}"));
    }
    out
}

/// `text_to_chunks` (spec section 4.7): recursive splitting, source
/// prefixing, and min-size discarding.
pub fn text_to_chunks(text: &str, filename: &str, max_size: usize, min_size: usize) -> Vec<String> {
    split_recursive(text, max_size)
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| c.chars().count() >= min_size)
        .map(|c| format!("Source: {filename}\n{c}"))
        .collect()
}

/// `markdown_to_chunks` (spec section 4.7): splits on header boundaries
/// first so a chunk never straddles two `#` sections, then falls back to
/// `text_to_chunks`'s recursive splitter within an oversized section.
pub fn markdown_to_chunks(text: &str, filename: &str, max_size: usize, min_size: usize) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let is_header = line.trim_start().starts_with('#');
        if is_header && !current.trim().is_empty() {
            sections.push(current.clone());
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    if sections.is_empty() {
        sections.push(text.to_string());
    }

    let mut chunks = Vec::new();
    for section in sections {
        if section.chars().count() <= max_size {
            if section.trim().chars().count() >= min_size {
                chunks.push(format!("Source: {filename}\n{}", section.trim()));
            }
        } else {
            chunks.extend(text_to_chunks(&section, filename, max_size, min_size));
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_becomes_a_single_prefixed_chunk() {
        let chunks = text_to_chunks("hello world", "notes.txt", 1000, 1);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("Source: notes.txt"));
        assert!(chunks[0].contains("hello world"));
    }

    #[test]
    fn long_text_splits_into_multiple_chunks_under_max_size() {
        let paragraph = "word ".repeat(200);
        let chunks = text_to_chunks(&paragraph, "doc.txt", 100, 10);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let body = chunk.strip_prefix("Source: doc.txt\n").unwrap();
            assert!(body.chars().count() <= 100 + 15);
        }
    }

    #[test]
    fn chunks_below_min_size_are_discarded() {
        let chunks = text_to_chunks("hi", "doc.txt", 1000, 10);
        assert!(chunks.is_empty());
    }

    #[test]
    fn markdown_splits_on_header_boundaries() {
        let md = "# Title\n\nintro text\n\n## Section A\n\nbody a\n\n## Section B\n\nbody b";
        let chunks = markdown_to_chunks(md, "readme.md", 1000, 1);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].contains("Section A"));
        assert!(chunks[2].contains("Section B"));
    }
}
