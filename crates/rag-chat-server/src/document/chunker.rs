#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// Character offsets into the source text
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Sliding character window that ends chunks on whitespace where it can and
/// starts every chunk at a word.
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    pub fn with_overlap_percentage(chunk_size: usize, percentage: f32) -> Self {
        let overlap = (chunk_size as f32 * percentage.clamp(0.0, 0.5)) as usize;
        Self::new(chunk_size, overlap)
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = skip_whitespace(&chars, 0);

        while start < total {
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                if let Some(ws) = (start + self.chunk_size / 2..end)
                    .rev()
                    .find(|&i| chars[i].is_whitespace())
                {
                    end = ws;
                }
            }

            let content: String = chars[start..end].iter().collect();
            let content = content.trim();
            if !content.is_empty() {
                chunks.push(Chunk {
                    content: content.to_string(),
                    start_pos: start,
                    end_pos: end,
                });
            }

            if end >= total {
                break;
            }

            let mut next = end.saturating_sub(self.overlap).max(start + 1);
            while next < end && !chars[next - 1].is_whitespace() {
                next += 1;
            }
            start = skip_whitespace(&chars, next);
        }

        chunks
    }
}

fn skip_whitespace(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}
