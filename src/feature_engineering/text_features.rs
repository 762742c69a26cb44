//! Keyword indicators from free-text fields

use crate::error::{FeatureError, Result};
use crate::preprocessing::{extend_names, Context, Stage};
use crate::record::{indicator_column, FrameExt};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// English stop words removed before keyword counting
pub const ENGLISH_STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

/// Unit and filler tokens that never become keywords
pub const DENIED_TOKENS: &[&str] = &["mg", "g", "&", "kg", "b", "none"];

/// Whitespace tokenizer with configurable cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTokenizer {
    lowercase: bool,
    strip_digits: bool,
    strip_punctuation: bool,
    stop_words: BTreeSet<String>,
}

impl TextTokenizer {
    pub fn new() -> Self {
        Self {
            lowercase: true,
            strip_digits: true,
            strip_punctuation: true,
            stop_words: BTreeSet::new(),
        }
    }

    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn with_strip_digits(mut self, strip: bool) -> Self {
        self.strip_digits = strip;
        self
    }

    pub fn with_strip_punctuation(mut self, strip: bool) -> Self {
        self.strip_punctuation = strip;
        self
    }

    pub fn with_english_stop_words(mut self) -> Self {
        self.stop_words = ENGLISH_STOP_WORDS.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// Clean then split on whitespace, dropping stop words.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut cleaned = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        if self.strip_digits {
            cleaned.retain(|c| !c.is_ascii_digit());
        }
        if self.strip_punctuation {
            cleaned = cleaned
                .chars()
                .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
                .collect();
        }

        cleaned
            .split_whitespace()
            .filter(|token| !self.is_stop_word(token))
            .map(str::to_string)
            .collect()
    }
}

impl Default for TextTokenizer {
    fn default() -> Self {
        Self::new().with_english_stop_words()
    }
}

/// Learns the most frequent tokens of each text field and emits one
/// `<field>_<keyword>` indicator per retained token.
///
/// Frequency is the total token count over the fit batch. Ties at the
/// cut-off are broken by token, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordExtractor {
    columns: Vec<String>,
    n_keywords: usize,
    tokenizer: TextTokenizer,
    keywords: BTreeMap<String, Vec<String>>,
    is_fitted: bool,
}

impl KeywordExtractor {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>, n_keywords: usize) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            n_keywords,
            tokenizer: TextTokenizer::default(),
            keywords: BTreeMap::new(),
            is_fitted: false,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: TextTokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Retained keywords of a field, most frequent first.
    pub fn keywords(&self, column: &str) -> Option<&[String]> {
        self.keywords.get(column).map(Vec::as_slice)
    }

    /// All tokens of a cell; list cells are tokenized element by element.
    fn cell_tokens(&self, texts: &[String]) -> Vec<String> {
        texts
            .iter()
            .flat_map(|text| self.tokenizer.tokenize(text))
            .filter(|token| !DENIED_TOKENS.contains(&token.as_str()))
            .collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|col| {
                self.keywords
                    .get(col)
                    .into_iter()
                    .flatten()
                    .map(move |kw| format!("{col}_{kw}"))
            })
            .collect()
    }
}

impl Stage for KeywordExtractor {
    fn kind(&self) -> &'static str {
        "keywords"
    }

    fn input_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn output_columns(&self, input: &[String]) -> Vec<String> {
        extend_names(input, self.output_names())
    }

    fn fit(&mut self, df: &DataFrame, _ctx: &Context) -> Result<()> {
        let mut keywords = BTreeMap::new();
        for name in &self.columns {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for cell in df.text_lists(name)? {
                for token in self.cell_tokens(&cell) {
                    *counts.entry(token).or_insert(0) += 1;
                }
            }

            let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let retained: Vec<String> = ranked
                .into_iter()
                .take(self.n_keywords)
                .map(|(token, _)| token)
                .collect();
            debug!(column = %name, ?retained, "Keywords selected");
            keywords.insert(name.clone(), retained);
        }

        self.keywords = keywords;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame, _ctx: &Context) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(FeatureError::NotFitted(self.kind().to_string()));
        }

        let mut columns = Vec::new();
        for name in &self.columns {
            let cells: Vec<BTreeSet<String>> = df
                .text_lists(name)?
                .iter()
                .map(|texts| self.cell_tokens(texts).into_iter().collect())
                .collect();
            for keyword in self.keywords.get(name).into_iter().flatten() {
                columns.push(indicator_column(
                    &format!("{name}_{keyword}"),
                    cells.iter().map(|tokens| tokens.contains(keyword)),
                ));
            }
        }
        df.append_columns(columns)
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}
