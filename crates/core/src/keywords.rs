use crate::error::{CollaboratorError, IngestError};
use crate::models::KeywordMode;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const HEURISTIC_KEYWORD_CAP: usize = 15;
pub const DELEGATED_KEYWORD_CAP: usize = 10;
pub const DELEGATED_PROMPT_CHARS: usize = 1_000;
pub const KEYWORD_INSTRUCTION: &str = "Extract 5-10 important keywords/key phrases from the text. \
Return ONLY a comma-separated list, no explanation.";

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "in", "on", "at", "to", "for", "of", "and", "or", "is", "are", "was",
    "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "must", "shall", "can", "need", "dare", "ought", "used",
    "this", "that", "these", "those", "we", "our", "they", "their", "it", "its", "he", "she",
    "his", "her", "i", "you", "your", "my", "me", "us", "them", "who", "what", "which", "when",
    "where", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
    "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very",
    "just", "but", "if", "because", "as", "until", "while", "although", "though", "after",
    "before", "since", "unless", "however", "therefore", "thus", "hence", "also", "still",
    "yet", "even", "here", "there", "then", "now", "abstract", "introduction", "conclusion",
    "references", "figure", "table",
];

const ROMAN_NUMERALS: [&str; 9] = ["ii", "iii", "iv", "vi", "vii", "viii", "ix", "xi", "xii"];

/// External text-completion service used for delegated keyword extraction.
#[async_trait]
pub trait KeywordCompleter: Send + Sync {
    async fn complete(&self, instruction: &str, text: &str) -> Result<String, CollaboratorError>;
}

/// Pattern-based extraction: deterministic, no I/O.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    capitalized: Regex,
    acronym: Regex,
    number_unit: Regex,
    hyphenated: Regex,
    trailing_word: Regex,
    camel_case: Regex,
    stop_words: HashSet<&'static str>,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            capitalized: Regex::new(r"\b[A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*)*\b")?,
            acronym: Regex::new(r"\b[A-Z]{2,5}\b")?,
            number_unit: Regex::new(
                r"(?i)(\d+\.?\d*)\s*(%|BLEU|days?|hours?|layers?|heads?|dimensions?|parameters?)",
            )?,
            hyphenated: Regex::new(r"\b[a-zA-Z]+(?:-[a-zA-Z]+)+\b")?,
            trailing_word: Regex::new(r"^\s+([a-zA-Z]{3,})\b")?,
            camel_case: Regex::new(r"\b[a-z]+[A-Z][a-zA-Z]*\b")?,
            stop_words: STOP_WORDS.iter().copied().collect(),
        })
    }

    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut keywords = KeywordSet::default();

        for found in self.capitalized.find_iter(text) {
            if let Some(phrase) = self.strip_stop_words(found.as_str()) {
                keywords.insert(phrase.to_lowercase());
            }
        }

        for found in self.acronym.find_iter(text) {
            let acronym = found.as_str();
            if !ROMAN_NUMERALS.contains(&acronym.to_lowercase().as_str()) {
                keywords.insert(acronym.to_string());
            }
        }

        for captures in self.number_unit.captures_iter(text) {
            if let (Some(number), Some(unit)) = (captures.get(1), captures.get(2)) {
                keywords.insert(format!("{} {}", number.as_str(), unit.as_str()).to_lowercase());
            }
        }

        for found in self.hyphenated.find_iter(text) {
            let term = found.as_str().to_lowercase();
            if term.chars().count() < 5 {
                continue;
            }
            let following = text.get(found.end()..).unwrap_or_default();
            let phrase = self.hyphenated_phrase(&term, following);
            keywords.insert(term);
            if let Some(phrase) = phrase {
                keywords.insert(phrase);
            }
        }

        for found in self.camel_case.find_iter(text) {
            keywords.insert(found.as_str().to_string());
        }

        keywords.into_capped(HEURISTIC_KEYWORD_CAP)
    }

    /// Trims leading/trailing function words off a capitalized run so that
    /// "The Transformer" yields "Transformer".
    fn strip_stop_words(&self, run: &str) -> Option<String> {
        let words: Vec<&str> = run.split_whitespace().collect();
        let is_stop = |word: &&str| self.stop_words.contains(word.to_lowercase().as_str());

        let start = words.iter().position(|word| !is_stop(word))?;
        let end = words.iter().rposition(|word| !is_stop(word))?;
        let phrase = words.get(start..=end)?.join(" ");

        if phrase.chars().count() < 2 {
            return None;
        }
        Some(phrase)
    }

    /// "multi-head attention": a hyphenated term plus the content word after it.
    fn hyphenated_phrase(&self, term: &str, following: &str) -> Option<String> {
        let captures = self.trailing_word.captures(following)?;
        let word = captures.get(1)?;
        if following[word.end()..].starts_with('-') {
            return None;
        }
        let word = word.as_str().to_lowercase();
        if self.stop_words.contains(word.as_str()) {
            return None;
        }
        Some(format!("{term} {word}"))
    }
}

/// Insertion-ordered set so truncation keeps earlier rules' matches.
#[derive(Default)]
struct KeywordSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl KeywordSet {
    fn insert(&mut self, keyword: String) {
        if self.seen.insert(keyword.clone()) {
            self.ordered.push(keyword);
        }
    }

    fn into_capped(mut self, cap: usize) -> Vec<String> {
        self.ordered.truncate(cap);
        self.ordered
    }
}

/// Two-stage strategy: delegated extraction when requested and available,
/// with the heuristic extractor as the declared fallback.
#[derive(Clone)]
pub struct KeywordExtractor {
    heuristic: HeuristicExtractor,
    completer: Option<Arc<dyn KeywordCompleter>>,
}

impl KeywordExtractor {
    pub fn heuristic_only() -> Result<Self, IngestError> {
        Ok(Self {
            heuristic: HeuristicExtractor::new()?,
            completer: None,
        })
    }

    pub fn with_completer(completer: Arc<dyn KeywordCompleter>) -> Result<Self, IngestError> {
        Ok(Self {
            heuristic: HeuristicExtractor::new()?,
            completer: Some(completer),
        })
    }

    pub fn heuristic(&self) -> &HeuristicExtractor {
        &self.heuristic
    }

    pub async fn extract(&self, text: &str, mode: KeywordMode) -> Vec<String> {
        let completer = match (mode, &self.completer) {
            (KeywordMode::Delegated, Some(completer)) => completer,
            (KeywordMode::Delegated, None) => {
                debug!("no keyword completer configured, using heuristic extraction");
                return self.heuristic.extract(text);
            }
            (KeywordMode::Heuristic, _) => return self.heuristic.extract(text),
        };

        let truncated: String = text.chars().take(DELEGATED_PROMPT_CHARS).collect();
        let delegated = completer
            .complete(KEYWORD_INSTRUCTION, &truncated)
            .await
            .and_then(|response| parse_completion(&response));

        match delegated {
            Ok(keywords) => keywords,
            Err(error) => {
                warn!(%error, "delegated keyword extraction failed, falling back to heuristic");
                self.heuristic.extract(text)
            }
        }
    }
}

pub fn parse_completion(response: &str) -> Result<Vec<String>, CollaboratorError> {
    let keywords: Vec<String> = response
        .split(',')
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .take(DELEGATED_KEYWORD_CAP)
        .collect();

    if keywords.is_empty() {
        return Err(CollaboratorError::Malformed {
            service: "keyword completion",
            details: format!("no keywords in response {response:?}"),
        });
    }
    Ok(keywords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingCompleter;

    #[async_trait]
    impl KeywordCompleter for FailingCompleter {
        async fn complete(&self, _instruction: &str, _text: &str) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Timeout {
                service: "keyword completion",
            })
        }
    }

    struct CannedCompleter {
        response: String,
        seen_chars: AtomicUsize,
    }

    #[async_trait]
    impl KeywordCompleter for CannedCompleter {
        async fn complete(&self, instruction: &str, text: &str) -> Result<String, CollaboratorError> {
            assert_eq!(instruction, KEYWORD_INSTRUCTION);
            self.seen_chars.store(text.chars().count(), Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn as_set(keywords: &[String]) -> HashSet<&str> {
        keywords.iter().map(String::as_str).collect()
    }

    #[test]
    fn transformer_sentence_yields_expected_terms() {
        let extractor = HeuristicExtractor::new().unwrap();
        let keywords = extractor
            .extract("The Transformer architecture achieves 28.4 BLEU using multi-head attention.");
        let found = as_set(&keywords);

        for expected in [
            "transformer",
            "bleu",
            "28.4 bleu",
            "multi-head",
            "multi-head attention",
        ] {
            assert!(found.contains(expected), "missing {expected} in {keywords:?}");
        }
        assert!(found.contains("BLEU"));
        assert!(!found.contains("the"));
    }

    #[test]
    fn roman_numerals_and_stop_words_are_skipped() {
        let extractor = HeuristicExtractor::new().unwrap();
        let keywords = extractor.extract("Section III covers the Introduction. See Figure IV.");
        let found = as_set(&keywords);

        assert!(!found.contains("III"));
        assert!(!found.contains("IV"));
        assert!(!found.contains("introduction"));
        assert!(found.contains("section iii"));
    }

    #[test]
    fn units_hyphens_and_camel_case_are_captured() {
        let extractor = HeuristicExtractor::new().unwrap();
        let keywords = extractor.extract(
            "training took 3.5 days on eight GPUs with 41.8% accuracy using self-attention and maxPooling",
        );
        let found = as_set(&keywords);

        assert!(found.contains("3.5 days"));
        assert!(found.contains("41.8 %"));
        assert!(found.contains("self-attention"));
        assert!(found.contains("maxPooling"));
        assert!(found.contains("gpus"));
    }

    #[test]
    fn hyphen_phrase_does_not_swallow_next_hyphenated_term() {
        let extractor = HeuristicExtractor::new().unwrap();
        let keywords = extractor.extract("we compare multi-head self-attention layers");
        let found = as_set(&keywords);

        assert!(found.contains("multi-head"));
        assert!(found.contains("self-attention"));
        assert!(found.contains("self-attention layers"));
        assert!(!found.contains("multi-head self"));
    }

    #[test]
    fn heuristic_output_is_capped() {
        let extractor = HeuristicExtractor::new().unwrap();
        let text = (0..40)
            .map(|index| format!("{index} layers, "))
            .collect::<String>();
        let keywords = extractor.extract(&text);
        assert!(keywords.len() <= HEURISTIC_KEYWORD_CAP);
        assert_eq!(keywords.len(), HEURISTIC_KEYWORD_CAP);
    }

    #[test]
    fn heuristic_extraction_is_deterministic() {
        let extractor = HeuristicExtractor::new().unwrap();
        let text = "OpenSearch supports BM25 and knn with HNSW graphs.";
        assert_eq!(extractor.extract(text), extractor.extract(text));
    }

    #[test]
    fn completion_parsing_trims_lowercases_and_caps() {
        let parsed = parse_completion(" Transformer , BLEU,, a, b, c, d, e, f, g, h, i, j").unwrap();
        assert_eq!(parsed.len(), DELEGATED_KEYWORD_CAP);
        assert_eq!(parsed[0], "transformer");
        assert_eq!(parsed[1], "bleu");
        assert!(parse_completion(" , ,").is_err());
    }

    #[tokio::test]
    async fn delegated_failure_falls_back_to_heuristic() {
        let extractor = KeywordExtractor::with_completer(Arc::new(FailingCompleter)).unwrap();
        let text = "The Transformer architecture achieves 28.4 BLEU using multi-head attention.";

        let delegated = extractor.extract(text, KeywordMode::Delegated).await;
        let heuristic = extractor.heuristic().extract(text);

        assert_eq!(as_set(&delegated), as_set(&heuristic));
    }

    #[tokio::test]
    async fn delegated_success_uses_completion_with_truncated_prompt() {
        let completer = Arc::new(CannedCompleter {
            response: "Attention, Encoder Decoder, BLEU".to_string(),
            seen_chars: AtomicUsize::new(0),
        });
        let extractor = KeywordExtractor::with_completer(completer.clone()).unwrap();
        let text = "word ".repeat(500);

        let keywords = extractor.extract(&text, KeywordMode::Delegated).await;

        assert_eq!(keywords, vec!["attention", "encoder decoder", "bleu"]);
        assert_eq!(completer.seen_chars.load(Ordering::SeqCst), DELEGATED_PROMPT_CHARS);
    }

    #[tokio::test]
    async fn delegated_mode_without_completer_uses_heuristic() {
        let extractor = KeywordExtractor::heuristic_only().unwrap();
        let keywords = extractor.extract("Uses BERT embeddings.", KeywordMode::Delegated).await;
        assert!(as_set(&keywords).contains("BERT"));
    }
}
