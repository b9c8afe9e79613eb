//! SMS text handling
//!
//! [`content`] shapes a decoded payload into notification text and the
//! snippets worth searching; [`extractor`] finds the verification code in
//! those snippets.

pub mod content;
pub mod extractor;

pub use content::MessageContent;
pub use extractor::{extract, extract_first, ExtractedCode, ExtractionResult, MatchRule};
