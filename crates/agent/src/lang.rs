use serde::{Deserialize, Serialize};

use kcart_core::errors::EngineError;

/// Reply language for a session, re-detected on every turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageTag {
    English,
    Amharic,
    /// Amharic written in Latin script ("selam, timatim alle?").
    AmharicLatin,
}

impl LanguageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Amharic => "am",
            Self::AmharicLatin => "am-latn",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedInput {
    pub text: String,
    pub language: LanguageTag,
}

pub trait LanguageNormalizer: Send + Sync {
    /// Trim and collapse whitespace, then tag the language. Input that is
    /// empty after normalization is rejected before any model call.
    fn normalize(&self, raw: &str) -> Result<NormalizedInput, EngineError>;
}

/// Latin-script tokens that strongly indicate romanized Amharic. Greetings,
/// confirmations, and market vocabulary cover the common openings.
const LATIN_AMHARIC_WORDS: &[&str] = &[
    "selam", "dehna", "ameseginalehu", "ishi", "eshi", "awo", "aydelem", "endet", "neh", "nesh",
    "alle", "yelem", "betam", "konjo", "gebeya", "timatim", "shinkurt", "wetet", "sintinew",
    "sint", "bakih", "bakish", "yikerta", "geza", "metshet", "chigir", "tiru",
];

/// Script-range heuristic detector. No model involvement; detection must
/// work even when the model capability is down.
#[derive(Clone, Debug, Default)]
pub struct ScriptDetector;

impl ScriptDetector {
    pub fn new() -> Self {
        Self
    }

    fn detect(&self, text: &str) -> LanguageTag {
        let alphabetic: Vec<char> = text.chars().filter(|ch| ch.is_alphabetic()).collect();
        if alphabetic.is_empty() {
            return LanguageTag::English;
        }

        let ethiopic = alphabetic.iter().filter(|ch| is_ethiopic(**ch)).count();
        if ethiopic * 10 >= alphabetic.len() * 3 {
            return LanguageTag::Amharic;
        }

        let tokens: Vec<String> = text
            .split_whitespace()
            .map(|token| {
                token
                    .chars()
                    .filter(|ch| ch.is_alphabetic())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|token| !token.is_empty())
            .collect();

        let amharic_hits =
            tokens.iter().filter(|token| LATIN_AMHARIC_WORDS.contains(&token.as_str())).count();

        // One hit in a short utterance, or two anywhere, tips the scale.
        if amharic_hits >= 2 || (amharic_hits == 1 && tokens.len() <= 3) {
            LanguageTag::AmharicLatin
        } else {
            LanguageTag::English
        }
    }
}

impl LanguageNormalizer for ScriptDetector {
    fn normalize(&self, raw: &str) -> Result<NormalizedInput, EngineError> {
        let text = raw.split_whitespace().collect::<Vec<&str>>().join(" ");
        if text.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let language = self.detect(&text);
        Ok(NormalizedInput { text, language })
    }
}

fn is_ethiopic(ch: char) -> bool {
    matches!(
        ch,
        '\u{1200}'..='\u{137F}'    // Ethiopic
        | '\u{1380}'..='\u{139F}'  // Ethiopic Supplement
        | '\u{2D80}'..='\u{2DDF}'  // Ethiopic Extended
        | '\u{AB00}'..='\u{AB2F}'  // Ethiopic Extended-A
    )
}
