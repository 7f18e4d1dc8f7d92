//! Oversized-input handling: split at natural boundaries, embed each chunk,
//! combine by element-wise mean.
//!
//! Splitting prefers paragraph boundaries, falls back to sentences, and hard
//! cuts as a last resort. Below the provider limit the input passes through
//! as a single chunk, so chunking is a no-op for short text.

pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if paragraph.chars().count() > max_chars {
            flush(&mut chunks, &mut current);
            split_paragraph(paragraph, max_chars, &mut chunks, &mut current);
            continue;
        }
        append_piece(paragraph, "\n\n", max_chars, &mut chunks, &mut current);
    }

    flush(&mut chunks, &mut current);
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

fn split_paragraph(paragraph: &str, max_chars: usize, chunks: &mut Vec<String>, current: &mut String) {
    for sentence in paragraph.split_inclusive(['.', '!', '?']) {
        if sentence.chars().count() > max_chars {
            flush(chunks, current);
            chunks.extend(hard_cut(sentence, max_chars));
            continue;
        }
        append_piece(sentence, " ", max_chars, chunks, current);
    }
}

fn append_piece(
    piece: &str,
    separator: &str,
    max_chars: usize,
    chunks: &mut Vec<String>,
    current: &mut String,
) {
    let piece = piece.trim_matches(['\n', ' ']);
    if piece.is_empty() {
        return;
    }

    let needed = if current.is_empty() {
        piece.chars().count()
    } else {
        current.chars().count() + separator.chars().count() + piece.chars().count()
    };

    if needed > max_chars {
        flush(chunks, current);
    }
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

fn hard_cut(text: &str, max_chars: usize) -> Vec<String> {
    let characters: Vec<char> = text.chars().collect();
    characters
        .chunks(max_chars.max(1))
        .map(|window| window.iter().collect::<String>())
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}

/// Element-wise arithmetic mean over chunk vectors. Caller guarantees equal
/// dimensions.
pub fn mean_pool(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };

    let mut pooled = vec![0.0f32; first.len()];
    for vector in vectors {
        for (slot, value) in pooled.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }

    let count = vectors.len() as f32;
    for slot in &mut pooled {
        *slot /= count;
    }
    pooled
}

/// Rescales to unit length. The all-zero vector stays zero rather than
/// dividing by zero.
pub fn normalize_unit(mut vector: Vec<f32>) -> Vec<f32> {
    let norm_sq = vector
        .iter()
        .map(|value| value * value)
        .fold(0.0f32, |acc, value| acc + value);
    if norm_sq <= f32::EPSILON {
        return vector;
    }

    let norm = norm_sq.sqrt();
    for value in &mut vector {
        *value /= norm;
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through_as_single_chunk() {
        let text = "short paragraph about a retry fix";
        assert_eq!(split_into_chunks(text, 100), vec![text.to_owned()]);
    }

    #[test]
    fn chunks_respect_the_limit_and_keep_all_content() {
        let text = "first paragraph here.\n\nsecond paragraph follows.\n\nthird one closes.";
        let chunks = split_into_chunks(text, 30);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 30, "oversized chunk: {chunk:?}");
        }
        let rejoined = chunks.join(" ");
        assert!(rejoined.contains("first paragraph"));
        assert!(rejoined.contains("third one"));
    }

    #[test]
    fn giant_sentence_falls_back_to_hard_cut() {
        let text = "x".repeat(95);
        let chunks = split_into_chunks(&text, 20);
        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
        }
    }

    #[test]
    fn mean_pool_averages_elementwise() {
        let pooled = mean_pool(&[vec![1.0, 0.0, 3.0], vec![3.0, 2.0, 1.0]]);
        assert_eq!(pooled, vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn normalize_unit_produces_unit_norm_and_keeps_zero() {
        let normalized = normalize_unit(vec![3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        assert_eq!(normalize_unit(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
