//! Emoji constants and normalization
//!
//! Constants are built from `\u{...}` escapes, not pasted glyphs: a raw
//! literal survives exactly one editor round-trip before someone's tooling
//! re-encodes it. Comparison goes through NFC so variation-selector and ZWJ
//! sequence differences do not split groups.

use unicode_normalization::UnicodeNormalization;

/// Person (used for human-context curation)
pub const PERSON: &str = "\u{1F9D1}";

/// Face (emitted by the face analyzer)
pub const FACE: &str = "\u{1F600}";

/// NSFW content marker
pub const NSFW: &str = "\u{1F51E}";

/// Extracted text marker
pub const TEXT: &str = "\u{1F4AC}";

/// Normalize an emoji string to NFC
#[must_use]
pub fn nfc(emoji: &str) -> String {
    emoji.nfc().collect()
}

/// Whether two emoji strings are equal under NFC
#[must_use]
pub fn eq(a: &str, b: &str) -> bool {
    a.nfc().eq(b.nfc())
}
