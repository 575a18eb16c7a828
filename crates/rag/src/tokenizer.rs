//! Morphology-aware tokenization for the sparse index
//!
//! Lowercases, trims, then splits into morpheme-like tokens with stemming.
//! Mixed-script text (Korean + Latin) is handled by the Unicode-aware base
//! tokenizer; English tokens are additionally stemmed. If the analyzer
//! produces nothing for non-empty input, falls back to a whitespace split.
//! Pure and deterministic.

use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer,
};

/// Tokenizer used for both index construction and query analysis.
#[derive(Clone)]
pub struct Tokenizer {
    analyzer: TextAnalyzer,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Tokenizer {
    pub fn new(stemming: bool) -> Self {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);
        let analyzer = if stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        };
        Self { analyzer }
    }

    /// Tokenize normalized text into lowercase morpheme-like tokens.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut analyzer = self.analyzer.clone();
        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(normalized);
        while let Some(token) = stream.next() {
            if !token.text.is_empty() {
                tokens.push(token.text.clone());
            }
        }

        if tokens.is_empty() {
            // Analyzer yielded nothing for non-empty input; degrade to a
            // plain whitespace split so the query still matches something.
            return normalized
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }

        tokens
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_splits() {
        let tokens = Tokenizer::default().tokenize("Kimchi STEW Recipe");
        assert_eq!(tokens[0], "kimchi");
        assert!(tokens.contains(&"recip".to_string()) || tokens.contains(&"recipe".to_string()));
    }

    #[test]
    fn test_mixed_script() {
        let tokens = Tokenizer::default().tokenize("김치찌개 recipe 알려줘");
        assert!(tokens.iter().any(|t| t.contains("김치찌개")));
        assert!(tokens.iter().any(|t| t.starts_with("recip")));
    }

    #[test]
    fn test_empty_input() {
        assert!(Tokenizer::default().tokenize("").is_empty());
        assert!(Tokenizer::default().tokenize("   ").is_empty());
    }

    #[test]
    fn test_deterministic() {
        let tok = Tokenizer::default();
        assert_eq!(tok.tokenize("된장찌개 끓이는 법"), tok.tokenize("된장찌개 끓이는 법"));
    }

    #[test]
    fn test_punctuation_separated() {
        let tokens = Tokenizer::default().tokenize("eggs, milk; butter!");
        assert_eq!(
            tokens,
            vec!["egg".to_string(), "milk".to_string(), "butter".to_string()]
        );
    }
}
