//! Speech-oriented text normalization.

/// Characters that already end a sentence for synthesis purposes.
const TERMINAL_PUNCTUATION: [char; 4] = ['.', '!', '?', ':'];

/// Canonicalize punctuation so a synthesizer reads `text` naturally, and make
/// sure it ends in terminal punctuation.
pub fn optimize_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    for c in text.trim().chars() {
        match c {
            '\u{2026}' => out.push_str("..."),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            other => out.push(other),
        }
    }

    if !out.is_empty() && !out.ends_with(TERMINAL_PUNCTUATION) {
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_period() {
        assert_eq!(optimize_for_speech("hola"), "hola.");
        assert_eq!(optimize_for_speech("  hola  "), "hola.");
    }

    #[test]
    fn test_keeps_terminal_punctuation() {
        assert_eq!(optimize_for_speech("¿Cómo estás?"), "¿Cómo estás?");
        assert_eq!(optimize_for_speech("Wait!"), "Wait!");
        assert_eq!(optimize_for_speech("Note:"), "Note:");
        assert_eq!(optimize_for_speech("Done."), "Done.");
    }

    #[test]
    fn test_canonicalizes_punctuation() {
        assert_eq!(
            optimize_for_speech("\u{201C}Well\u{201D} \u{2014} it\u{2019}s fine\u{2026}"),
            "\"Well\" - it's fine..."
        );
        assert_eq!(optimize_for_speech("a \u{2013} b"), "a - b.");
    }

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(optimize_for_speech(""), "");
        assert_eq!(optimize_for_speech("   "), "");
    }
}
