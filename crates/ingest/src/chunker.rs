use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;

/// Character budgets for the splitter
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// A run of source text that is never split further when packing chunks
#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    text: &'a str,
    start: usize,
    /// first piece of a paragraph, joined with a blank line
    paragraph: bool,
    /// markdown heading, always starts a new chunk
    heading: bool,
}

impl Piece<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            config: ChunkerConfig {
                chunk_size,
                chunk_overlap: config.chunk_overlap.min(chunk_size / 2),
            },
        }
    }

    /// Split a document into chunks of at most `chunk_size` characters.
    ///
    /// Paragraphs are kept whole when they fit; longer ones fall back to
    /// sentences, then words. Consecutive chunks share up to `chunk_overlap`
    /// trailing characters of the previous chunk.
    pub fn chunk_text(&self, doc_id: &str, text: &str, source: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut buffer = String::new();
        let mut span: Option<(usize, usize)> = None;

        for piece in self.pieces(text) {
            let separator = if piece.paragraph { "\n\n" } else { " " };
            let needed = char_len(&buffer) + char_len(separator) + char_len(piece.text);
            let must_flush = span.is_some() && (piece.heading || needed > self.config.chunk_size);

            if must_flush {
                if let Some(range) = span.take() {
                    chunks.push(Chunk::new(
                        doc_id.to_string(),
                        buffer.clone(),
                        source.to_string(),
                        range,
                    ));
                }

                let tail = if piece.heading {
                    ""
                } else {
                    overlap_tail(&buffer, self.config.chunk_overlap)
                };
                let fits = char_len(tail) + 1 + char_len(piece.text) <= self.config.chunk_size;
                buffer = if fits { tail.to_string() } else { String::new() };
            }

            if !buffer.is_empty() {
                buffer.push_str(separator);
            }
            buffer.push_str(piece.text);
            span = Some(match span {
                Some((start, _)) => (start, piece.end()),
                None => (piece.start, piece.end()),
            });
        }

        if let Some(range) = span {
            chunks.push(Chunk::new(doc_id.to_string(), buffer, source.to_string(), range));
        }

        chunks
    }

    fn pieces<'a>(&self, text: &'a str) -> Vec<Piece<'a>> {
        let mut pieces = Vec::new();
        let mut offset = 0;

        for block in text.split("\n\n") {
            let block_start = offset;
            offset += block.len() + 2;

            let trimmed = block.trim();
            if trimmed.is_empty() {
                continue;
            }
            let start = block_start + (block.len() - block.trim_start().len());
            let heading = trimmed.starts_with('#');

            if char_len(trimmed) <= self.config.chunk_size {
                pieces.push(Piece { text: trimmed, start, paragraph: true, heading });
                continue;
            }

            let mut first = true;
            for (idx, sentence) in trimmed.split_sentence_bound_indices() {
                let sentence_trimmed = sentence.trim();
                if sentence_trimmed.is_empty() {
                    continue;
                }
                let sentence_start = start + idx + (sentence.len() - sentence.trim_start().len());

                for (piece_start, piece_text) in self.fit(sentence_trimmed, sentence_start) {
                    pieces.push(Piece {
                        text: piece_text,
                        start: piece_start,
                        paragraph: first,
                        heading: heading && first,
                    });
                    first = false;
                }
            }
        }

        pieces
    }

    /// Cut a run that is too long into windows of whole words (or raw
    /// characters when a single word exceeds the budget)
    fn fit<'a>(&self, text: &'a str, start: usize) -> Vec<(usize, &'a str)> {
        let size = self.config.chunk_size;
        if char_len(text) <= size {
            return vec![(start, text)];
        }

        let mut windows = Vec::new();
        let mut window_start: Option<usize> = None;
        let mut window_end = 0;
        let mut window_chars = 0;

        for (idx, word) in text.split_word_bound_indices() {
            let word_chars = char_len(word);

            if word_chars > size {
                if let Some(ws) = window_start.take() {
                    windows.push((ws, window_end));
                }
                windows.extend(char_windows(word, idx, size));
                window_chars = 0;
                continue;
            }

            if window_start.is_some() && window_chars + word_chars > size {
                if let Some(ws) = window_start.take() {
                    windows.push((ws, window_end));
                }
                window_chars = 0;
            }

            if window_start.is_none() {
                if word.trim().is_empty() {
                    continue;
                }
                window_start = Some(idx);
            }
            window_end = idx + word.len();
            window_chars += word_chars;
        }

        if let Some(ws) = window_start {
            windows.push((ws, window_end));
        }

        windows
            .into_iter()
            .filter_map(|(s, e)| {
                let slice = text[s..e].trim_end();
                (!slice.is_empty()).then_some((start + s, slice))
            })
            .collect()
    }
}

fn char_windows(word: &str, base: usize, size: usize) -> Vec<(usize, usize)> {
    let boundaries: Vec<usize> = word
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(word.len()))
        .collect();

    boundaries
        .chunks(size)
        .map(|run| {
            let from = run[0];
            let to = boundaries
                .iter()
                .copied()
                .find(|&b| b > run[run.len() - 1])
                .unwrap_or(word.len());
            (base + from, base + to)
        })
        .filter(|(from, to)| to > from)
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Last `max_chars` characters of `text`, starting on a word boundary
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let total = char_len(text);
    if total <= max_chars {
        return text;
    }

    let cut = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[cut..];

    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker.chunk_text("test-doc", text, "test.txt");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "test-doc");
        assert_eq!(chunks[0].text, "This is a test paragraph.\n\nThis is another paragraph.");
        assert_eq!(chunks[0].offset, (0, text.len()));
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let chunker = Chunker::new(ChunkerConfig { chunk_size: 60, chunk_overlap: 15 });
        let text = (0..20)
            .map(|i| format!("Sentence number {i} is here."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunker.chunk_text("d", &text, "s.txt");

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_count() <= 60, "chunk too long: {:?}", chunk.text);
        }
        // the second chunk repeats the tail of the first
        let tail = overlap_tail(&chunks[0].text, 15);
        assert!(!tail.is_empty());
        assert!(chunks[1].text.starts_with(tail));
    }

    #[test]
    fn test_headings_start_new_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "# Revenue\n\nApple grew.\n\n# People\n\nTim Cook leads Apple.";
        let chunks = chunker.chunk_text("d", text, "s.md");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("# People"));
    }

    #[test]
    fn test_oversized_word_is_cut() {
        let chunker = Chunker::new(ChunkerConfig { chunk_size: 10, chunk_overlap: 0 });
        let chunks = chunker.chunk_text("d", &"x".repeat(25), "s.txt");

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.char_count() <= 10));
    }

    #[test]
    fn test_blank_document_has_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_text("d", "  \n\n \n\n", "s.txt").is_empty());
    }
}
