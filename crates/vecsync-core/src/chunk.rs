//! Sentence-aware, token-budgeted text chunker.
//!
//! Splits document text into an ordered list of chunks whose token count
//! never exceeds a per-model budget. Adjacent chunks share a small
//! overlap so that context spanning a boundary stays retrievable.
//!
//! Sentence detection and tokenization are pluggable through the
//! [`SentenceSplitter`] and [`Tokenizer`] traits. The defaults split on
//! terminal punctuation and blank lines, and count whitespace-delimited
//! words as tokens.
//!
//! # Algorithm
//!
//! 1. Split the text into sentences; skip empty ones.
//! 2. Greedily append sentences to the running chunk while the token
//!    count stays within `max_tokens`.
//! 3. When the next sentence does not fit, close the chunk and seed the
//!    next one with the last `overlap_tokens` tokens of the closed chunk
//!    (shortened if the seed plus the sentence would not fit).
//! 4. A sentence that alone exceeds the budget closes the running chunk
//!    and is hard-split into fixed windows of `max_tokens` tokens. This is
//!    lossy, so it is logged and counted in [`Chunked::hard_splits`].
//! 5. The trailing partial chunk is always emitted.
//!
//! # Example
//!
//! ```rust
//! use vecsync_core::chunk::chunk_text;
//!
//! let out = chunk_text("One sentence. Another one! A third?", 50, 5);
//! assert_eq!(out.chunks, vec!["One sentence. Another one! A third?".to_string()]);
//! assert_eq!(out.hard_splits, 0);
//! ```

/// Default number of tokens carried over between adjacent chunks.
pub const DEFAULT_OVERLAP_TOKENS: usize = 20;

/// Token budget used when the model is not in [`MODEL_TOKEN_LIMITS`].
pub const DEFAULT_TOKEN_BUDGET: usize = 512;

/// Known per-model token budgets.
pub const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("all-mpnet-base-v2", 384),
    ("distilbert-base-nli-stsb-mean-tokens", 512),
    ("bert-base-nli-mean-tokens", 512),
    ("roberta-base-nli-mean-tokens", 512),
    ("bge-small-en-v1.5", 512),
    ("bge-base-en-v1.5", 512),
    ("nomic-embed-text-v1.5", 2048),
    ("text-embedding-3-small", 8191),
];

/// Token budget for an embedding model, matched case-insensitively and
/// ignoring any `org/` prefix (e.g. `sentence-transformers/all-MiniLM-L6-v2`).
pub fn token_budget_for_model(model: &str) -> usize {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    MODEL_TOKEN_LIMITS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_TOKEN_BUDGET)
}

/// Splits text into sentence units, in source order.
pub trait SentenceSplitter: Send + Sync {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Converts text to tokens and back.
///
/// `decode(encode(s))` need not reproduce `s` byte for byte, but the
/// token count of a decoded sequence must equal the sequence length.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<String>;
    fn decode(&self, tokens: &[String]) -> String;
}

/// Splits after `.`, `!` or `?` (plus trailing quotes/brackets) when
/// followed by whitespace, and at blank lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct PunctuationSplitter;

impl SentenceSplitter for PunctuationSplitter {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        for block in text.split("\n\n") {
            let mut start = 0;
            let mut chars = block.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                if !is_terminator(c) {
                    continue;
                }
                let mut end = i + c.len_utf8();
                while let Some(&(j, n)) = chars.peek() {
                    if is_terminator(n) || is_closer(n) {
                        end = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let at_boundary = match chars.peek() {
                    Some(&(_, n)) => n.is_whitespace(),
                    None => true,
                };
                if at_boundary {
                    out.push(&block[start..end]);
                    start = end;
                }
            }
            if start < block.len() {
                out.push(&block[start..]);
            }
        }
        out
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201D}' | '\u{2019}')
}

/// One token per whitespace-delimited word; decoding joins with a space.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn decode(&self, tokens: &[String]) -> String {
        tokens.join(" ")
    }
}

/// Result of chunking one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunked {
    /// Non-empty chunks in source order.
    pub chunks: Vec<String>,
    /// Number of sentences that had to be hard-split.
    pub hard_splits: usize,
}

/// Chunker configured with a splitter, a tokenizer, and a token budget.
pub struct Chunker {
    splitter: Box<dyn SentenceSplitter>,
    tokenizer: Box<dyn Tokenizer>,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    /// Chunker with the default splitter and tokenizer.
    ///
    /// `max_tokens` is clamped to at least 1 and `overlap_tokens` to at
    /// most `max_tokens - 1`.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self::with_parts(
            Box::new(PunctuationSplitter),
            Box::new(WhitespaceTokenizer),
            max_tokens,
            overlap_tokens,
        )
    }

    pub fn with_parts(
        splitter: Box<dyn SentenceSplitter>,
        tokenizer: Box<dyn Tokenizer>,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            splitter,
            tokenizer,
            max_tokens,
            overlap_tokens: overlap_tokens.min(max_tokens - 1),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Split `text` into chunks. Pure function of the text and settings.
    pub fn chunk(&self, text: &str) -> Chunked {
        let budget = self.max_tokens;
        let mut out = Chunked::default();
        let mut current: Vec<String> = Vec::new();

        for sentence in self.splitter.split(text) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let tokens = self.tokenizer.encode(sentence);
            if tokens.is_empty() {
                continue;
            }

            if tokens.len() > budget {
                self.flush(&mut out, &current);
                current.clear();
                tracing::warn!(
                    "[chunker] sentence of {} tokens exceeds budget {}, hard-splitting",
                    tokens.len(),
                    budget
                );
                out.hard_splits += 1;
                for window in tokens.chunks(budget) {
                    self.flush(&mut out, window);
                }
                continue;
            }

            if current.len() + tokens.len() > budget {
                let closed = std::mem::take(&mut current);
                self.flush(&mut out, &closed);
                let keep = self
                    .overlap_tokens
                    .min(budget - tokens.len())
                    .min(closed.len());
                current.extend_from_slice(&closed[closed.len() - keep..]);
            }

            current.extend(tokens);
        }

        self.flush(&mut out, &current);
        out
    }

    fn flush(&self, out: &mut Chunked, tokens: &[String]) {
        if tokens.is_empty() {
            return;
        }
        let text = self.tokenizer.decode(tokens);
        let text = text.trim();
        if !text.is_empty() {
            out.chunks.push(text.to_string());
        }
    }
}

/// Chunk `text` with the default splitter and tokenizer.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Chunked {
    Chunker::new(max_tokens, overlap_tokens).chunk(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> usize {
        s.split_whitespace().count()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let out = chunk_text("Hello, world!", 384, 20);
        assert_eq!(out.chunks, vec!["Hello, world!".to_string()]);
        assert_eq!(out.hard_splits, 0);
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(chunk_text("", 10, 2).chunks.is_empty());
        assert!(chunk_text("   \n\n \t ", 10, 2).chunks.is_empty());
    }

    #[test]
    fn test_three_sentences_fit_one_chunk() {
        let text = "The cat sat. The dog ran. The bird flew.";
        let out = chunk_text(text, 50, 5);
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0], text);
    }

    #[test]
    fn test_overlap_seeds_next_chunk() {
        let text = "a b c d. e f g h. i j k l.";
        let out = chunk_text(text, 8, 2);
        assert_eq!(
            out.chunks,
            vec!["a b c d. e f g h.".to_string(), "g h. i j k l.".to_string()]
        );
    }

    #[test]
    fn test_zero_overlap() {
        let text = "a b c d. e f g h. i j k l.";
        let out = chunk_text(text, 8, 0);
        assert_eq!(
            out.chunks,
            vec!["a b c d. e f g h.".to_string(), "i j k l.".to_string()]
        );
    }

    #[test]
    fn test_budget_respected() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} has a few words in it.", i))
            .collect::<Vec<_>>()
            .join(" ");
        for budget in [9, 10, 17, 40, 100] {
            let out = chunk_text(&text, budget, 4);
            assert!(out.chunks.len() > 1);
            assert_eq!(out.hard_splits, 0);
            for c in &out.chunks {
                assert!(words(c) <= budget, "chunk of {} > {}", words(c), budget);
            }
        }
    }

    #[test]
    fn test_overlap_shrinks_to_fit_budget() {
        // The second sentence uses 5 of 6 tokens, leaving room for 1 overlap token.
        let out = chunk_text("a b c d e f. g h i j k.", 6, 4);
        assert_eq!(out.chunks, vec!["a b c d e f.".to_string(), "f. g h i j k.".to_string()]);
    }

    #[test]
    fn test_oversized_sentence_hard_split_in_order() {
        let long = (0..25).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let text = format!("Intro here. {}. Outro here.", long);
        let out = chunk_text(&text, 10, 2);
        assert_eq!(out.hard_splits, 1);
        assert_eq!(out.chunks.first().map(String::as_str), Some("Intro here."));
        assert_eq!(out.chunks.last().map(String::as_str), Some("Outro here."));
        // 25 tokens in windows of 10: 10, 10, 5
        assert_eq!(out.chunks.len(), 5);
        assert!(out.chunks[1].starts_with("w0 "));
        assert!(out.chunks[3].ends_with("w24."));
        for c in &out.chunks {
            assert!(words(c) <= 10);
        }
    }

    #[test]
    fn test_blank_lines_are_sentence_boundaries() {
        let splitter = PunctuationSplitter;
        let parts = splitter.split("Heading without period\n\nBody text. More text");
        let trimmed: Vec<&str> = parts.iter().map(|s| s.trim()).collect();
        assert_eq!(trimmed, vec!["Heading without period", "Body text.", "More text"]);
    }

    #[test]
    fn test_splitter_keeps_closing_quotes() {
        let parts = PunctuationSplitter.split("He said \"stop.\" Then left.");
        let trimmed: Vec<&str> = parts.iter().map(|s| s.trim()).collect();
        assert_eq!(trimmed, vec!["He said \"stop.\"", "Then left."]);
    }

    #[test]
    fn test_splitter_ignores_inner_dots() {
        let parts = PunctuationSplitter.split("Version 1.5 is out. Upgrade now.");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta. Gamma delta epsilon. Zeta eta theta iota. Kappa.";
        assert_eq!(chunk_text(text, 5, 1), chunk_text(text, 5, 1));
    }

    #[test]
    fn test_overlap_clamped_below_budget() {
        let chunker = Chunker::new(4, 10);
        assert_eq!(chunker.overlap_tokens(), 3);
        let chunker = Chunker::new(0, 0);
        assert_eq!(chunker.max_tokens(), 1);
    }

    #[test]
    fn test_token_budget_for_model() {
        assert_eq!(token_budget_for_model("all-MiniLM-L6-v2"), 384);
        assert_eq!(
            token_budget_for_model("sentence-transformers/all-MiniLM-L6-v2"),
            384
        );
        assert_eq!(token_budget_for_model("roberta-base-nli-mean-tokens"), 512);
        assert_eq!(token_budget_for_model("something-else"), DEFAULT_TOKEN_BUDGET);
    }
}
