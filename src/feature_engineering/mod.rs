//! Feature generation from free text

mod text_features;

pub use text_features::{KeywordExtractor, TextTokenizer, DENIED_TOKENS, ENGLISH_STOP_WORDS};
