//! Bio language identification.

use whatlang::Lang;

use crate::models::UNKNOWN_LANG;

/// Maps a profile bio to a language code.
pub trait LanguageDetector: Send + Sync {
    /// Returns an ISO 639-1 code, or [`UNKNOWN_LANG`] when undetermined.
    fn detect(&self, text: &str) -> String;
}

/// Trigram-based detector backed by `whatlang`.
#[derive(Debug, Clone, Default)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return UNKNOWN_LANG.to_string();
        }
        match whatlang::detect_lang(text) {
            Some(lang) => iso_639_1(lang).unwrap_or(UNKNOWN_LANG).to_string(),
            None => {
                tracing::debug!("No language detected for bio of {} chars", text.len());
                UNKNOWN_LANG.to_string()
            }
        }
    }
}

/// Two-letter code for the languages the model was trained on.
fn iso_639_1(lang: Lang) -> Option<&'static str> {
    let code = match lang {
        Lang::Ara => "ar",
        Lang::Ben => "bn",
        Lang::Cat => "ca",
        Lang::Ces => "cs",
        Lang::Cmn => "zh",
        Lang::Dan => "da",
        Lang::Deu => "de",
        Lang::Ell => "el",
        Lang::Eng => "en",
        Lang::Est => "et",
        Lang::Fin => "fi",
        Lang::Fra => "fr",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Hrv => "hr",
        Lang::Hun => "hu",
        Lang::Ind => "id",
        Lang::Ita => "it",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Lav => "lv",
        Lang::Lit => "lt",
        Lang::Nld => "nl",
        Lang::Nob => "no",
        Lang::Pes => "fa",
        Lang::Pol => "pl",
        Lang::Por => "pt",
        Lang::Ron => "ro",
        Lang::Rus => "ru",
        Lang::Slk => "sk",
        Lang::Slv => "sl",
        Lang::Spa => "es",
        Lang::Srp => "sr",
        Lang::Swe => "sv",
        Lang::Tgl => "tl",
        Lang::Tha => "th",
        Lang::Tur => "tr",
        Lang::Ukr => "uk",
        Lang::Urd => "ur",
        Lang::Vie => "vi",
        _ => return None,
    };
    Some(code)
}
