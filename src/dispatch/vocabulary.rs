//! Keyword sets and spoken phrases per language
//!
//! The NLU agent answers in free text, so the same vocabulary drives both the
//! keyword router and the phrases the daemon speaks back.

use std::fmt;
use std::str::FromStr;

/// Words and phrases for one language
#[derive(Debug)]
pub struct Vocabulary {
    /// Language code sent to the NLU endpoint
    pub language_code: &'static str,
    /// Locale handed to the speech-capture collaborator
    pub speech_locale: &'static str,

    pub light_on: &'static str,
    pub light_off: &'static str,
    pub brightness_words: &'static [&'static str],
    pub color_word: &'static str,
    pub white_word: &'static str,
    /// Colour name to hue in degrees, scanned in order
    pub colors: &'static [(&'static str, u16)],

    /// Replies containing this phrase get the local time appended
    pub current_time_phrase: &'static str,

    pub arm_prompt: &'static str,
    pub not_understood: &'static str,
    pub resolution_failed: &'static str,
    pub auth_failed: &'static str,
    pub actuation_failed: &'static str,
}

pub static ENGLISH: Vocabulary = Vocabulary {
    language_code: "en",
    speech_locale: "en-US",
    light_on: "light activated",
    light_off: "light deactivated",
    brightness_words: &["brightness", "intensity"],
    color_word: "color",
    white_word: "white",
    colors: &[
        ("red", 0),
        ("orange", 30),
        ("yellow", 60),
        ("green", 120),
        ("cyan", 180),
        ("blue", 240),
        ("violet", 270),
        ("pink", 320),
    ],
    current_time_phrase: "the current time is",
    arm_prompt: "Awaiting your command",
    not_understood: "I did not understand the command",
    resolution_failed: "Error contacting the intent service",
    auth_failed: "Error authenticating with the cloud",
    actuation_failed: "Error controlling the light",
};

pub static SPANISH: Vocabulary = Vocabulary {
    language_code: "es",
    speech_locale: "es-ES",
    light_on: "foco activado",
    light_off: "foco desactivado",
    brightness_words: &["brillo", "intensidad"],
    color_word: "color",
    white_word: "blanco",
    colors: &[
        ("rojo", 0),
        ("naranja", 30),
        ("amarillo", 60),
        ("verde", 120),
        ("cian", 180),
        ("azul", 240),
        ("violeta", 270),
        ("rosado", 320),
    ],
    current_time_phrase: "hora actual es",
    arm_prompt: "Esperando su orden señor",
    not_understood: "No entendí la orden",
    resolution_failed: "Error al contactar con Dialogflow",
    auth_failed: "Error autenticando con Tuya",
    actuation_failed: "Error controlando el foco",
};

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Spanish,
}

impl Language {
    pub fn vocabulary(self) -> &'static Vocabulary {
        match self {
            Language::English => &ENGLISH,
            Language::Spanish => &SPANISH,
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "es" | "spanish" => Ok(Language::Spanish),
            other => Err(format!("unsupported language '{other}' (expected en or es)")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vocabulary().language_code)
    }
}
