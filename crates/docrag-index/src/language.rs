//! Query language detection.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use serde::{Deserialize, Serialize};

const MIN_RELATIVE_DISTANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Zh,
    En,
    Ja,
    Unknown,
}

impl Lang {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::Ja => "ja",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported language code: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Lang {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "chinese" => Ok(Self::Zh),
            "en" | "english" => Ok(Self::En),
            "ja" | "japanese" => Ok(Self::Ja),
            _ => Err(UnknownLanguage(s.to_owned())),
        }
    }
}

pub trait DetectLanguage: Send + Sync {
    fn detect(&self, text: &str) -> Lang;
}

/// Statistical detector restricted to Chinese, English and Japanese.
pub struct LinguaDetector {
    inner: LanguageDetector,
}

impl fmt::Debug for LinguaDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinguaDetector").finish_non_exhaustive()
    }
}

impl LinguaDetector {
    #[must_use]
    pub fn new() -> Self {
        let inner = LanguageDetectorBuilder::from_languages(&[
            Language::Chinese,
            Language::English,
            Language::Japanese,
        ])
        .with_minimum_relative_distance(MIN_RELATIVE_DISTANCE)
        .build();
        Self { inner }
    }
}

impl Default for LinguaDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectLanguage for LinguaDetector {
    fn detect(&self, text: &str) -> Lang {
        match self.inner.detect_language_of(text) {
            Some(Language::Chinese) => Lang::Zh,
            Some(Language::English) => Lang::En,
            Some(Language::Japanese) => Lang::Ja,
            _ => Lang::Unknown,
        }
    }
}

static SHARED: LazyLock<Arc<LinguaDetector>> = LazyLock::new(|| Arc::new(LinguaDetector::new()));

/// Process-wide detector; models are built on first use and reused afterwards.
#[must_use]
pub fn shared_detector() -> Arc<dyn DetectLanguage> {
    Arc::clone(&*SHARED) as Arc<dyn DetectLanguage>
}

/// Detector that always reports the same language.
#[derive(Debug, Clone, Copy)]
pub struct FixedLanguage(pub Lang);

impl DetectLanguage for FixedLanguage {
    fn detect(&self, _text: &str) -> Lang {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes() {
        assert_eq!("en".parse::<Lang>().unwrap(), Lang::En);
        assert_eq!("ZH".parse::<Lang>().unwrap(), Lang::Zh);
        assert_eq!("japanese".parse::<Lang>().unwrap(), Lang::Ja);
        assert!("fr".parse::<Lang>().is_err());
    }

    #[test]
    fn display_matches_code() {
        assert_eq!(Lang::Ja.to_string(), "ja");
        assert_eq!(Lang::Unknown.code(), "unknown");
    }

    #[test]
    fn detects_supported_languages() {
        let detector = shared_detector();
        assert_eq!(detector.detect("how do I open a workbook from a stream"), Lang::En);
        assert_eq!(detector.detect("ワークブックを開く方法を教えてください"), Lang::Ja);
    }

    #[test]
    fn empty_text_is_unknown() {
        assert_eq!(LinguaDetector::new().detect(""), Lang::Unknown);
    }

    #[test]
    fn fixed_detector_ignores_input() {
        assert_eq!(FixedLanguage(Lang::Zh).detect("anything"), Lang::Zh);
    }
}
