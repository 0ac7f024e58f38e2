//! Keyword router from fulfillment text to a light action

use std::sync::OnceLock;

use regex::Regex;

use super::vocabulary::Vocabulary;

/// Percentage used when the text carries no number
const DEFAULT_PERCENT: u32 = 100;
const MIN_PERCENT: u32 = 10;
const MAX_PERCENT: u32 = 100;
/// Device level per percent
const LEVEL_PER_PERCENT: u32 = 10;

/// Full saturation and value for named colours
pub const FULL_SCALE: u16 = 1000;

/// What the fulfillment text asks the light to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    Power(bool),
    Brightness { level: u16 },
    White { level: u16 },
    Color { hue: u16 },
}

/// Map fulfillment text to at most one action.
///
/// Matching is case-insensitive and first match wins, in this order: on, off,
/// brightness, colour (white before named hues).
pub fn parse_action(text: &str, vocab: &Vocabulary) -> Option<LightAction> {
    let lower = text.to_lowercase();

    if lower.contains(vocab.light_on) {
        return Some(LightAction::Power(true));
    }
    if lower.contains(vocab.light_off) {
        return Some(LightAction::Power(false));
    }
    if vocab.brightness_words.iter().any(|w| lower.contains(w)) {
        return Some(LightAction::Brightness {
            level: percent_level(&lower),
        });
    }
    if lower.contains(vocab.color_word) {
        if lower.contains(vocab.white_word) {
            return Some(LightAction::White {
                level: percent_level(&lower),
            });
        }
        return vocab
            .colors
            .iter()
            .find(|(name, _)| lower.contains(name))
            .map(|(_, hue)| LightAction::Color { hue: *hue });
    }
    None
}

/// First run of ASCII digits in `text`, if it fits in a `u32`
pub fn extract_number(text: &str) -> Option<u32> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern should be valid"));
    digits.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Percentage in the text clamped to `[10, 100]`, scaled to a device level
fn percent_level(text: &str) -> u16 {
    let percent = extract_number(text)
        .map(|n| n.clamp(MIN_PERCENT, MAX_PERCENT))
        .unwrap_or(DEFAULT_PERCENT);
    (percent * LEVEL_PER_PERCENT) as u16
}
