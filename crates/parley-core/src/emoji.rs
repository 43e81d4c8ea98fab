//! Reaction emoji validation.
//!
//! The accepted set is a policy: the service asks an [`EmojiPolicy`] and
//! never inspects code points itself.

use unicode_segmentation::UnicodeSegmentation;

/// Decides whether a string is acceptable as a reaction.
pub trait EmojiPolicy: Send + Sync {
    fn is_single_emoji(&self, candidate: &str) -> bool;
}

const VARIATION_SELECTOR_16: char = '\u{FE0F}';
const COMBINING_KEYCAP: char = '\u{20E3}';

/// Accepts exactly one extended grapheme cluster that renders as an emoji.
///
/// A cluster qualifies when its first code point is pictographic, when it
/// is a regional-indicator flag pair, or when it is a keycap sequence
/// (`1️⃣`, `#️⃣`). Skin-tone modifiers and ZWJ sequences stay inside one
/// cluster and are therefore accepted with their base.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphemeEmojiPolicy;

impl GraphemeEmojiPolicy {
    fn is_pictographic(c: char) -> bool {
        matches!(c as u32,
            0x00A9 | 0x00AE | 0x203C | 0x2049 | 0x2122 | 0x2139
            | 0x2194..=0x2199 | 0x21A9..=0x21AA
            | 0x231A..=0x231B | 0x2328 | 0x23CF | 0x23E9..=0x23F3 | 0x23F8..=0x23FA
            | 0x24C2 | 0x25AA..=0x25AB | 0x25B6 | 0x25C0 | 0x25FB..=0x25FE
            | 0x2600..=0x27BF
            | 0x2934..=0x2935 | 0x2B05..=0x2B07 | 0x2B1B..=0x2B1C | 0x2B50 | 0x2B55
            | 0x3030 | 0x303D | 0x3297 | 0x3299
            | 0x1F000..=0x1F0FF
            | 0x1F170..=0x1F1FF
            | 0x1F200..=0x1F2FF
            | 0x1F300..=0x1FAFF)
    }

    fn is_regional_indicator(c: char) -> bool {
        ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
    }

    fn is_keycap(cluster: &str) -> bool {
        let mut chars = cluster.chars();
        let Some(base) = chars.next() else {
            return false;
        };
        let rest: Vec<char> = chars.collect();
        matches!(base, '0'..='9' | '#' | '*')
            && matches!(
                rest.as_slice(),
                [COMBINING_KEYCAP] | [VARIATION_SELECTOR_16, COMBINING_KEYCAP]
            )
    }
}

impl EmojiPolicy for GraphemeEmojiPolicy {
    fn is_single_emoji(&self, candidate: &str) -> bool {
        let mut clusters = candidate.graphemes(true);
        let (Some(cluster), None) = (clusters.next(), clusters.next()) else {
            return false;
        };

        let Some(first) = cluster.chars().next() else {
            return false;
        };

        if Self::is_regional_indicator(first) {
            return cluster.chars().count() == 2
                && cluster.chars().all(Self::is_regional_indicator);
        }

        Self::is_pictographic(first) || Self::is_keycap(cluster)
    }
}
