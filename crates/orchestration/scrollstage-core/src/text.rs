//! Character/word splitting for text reveal bindings.
//!
//! The split structure depends on the breakpoint (narrow layouts split by
//! word), which is why a controller rebuilds rather than reuses its timelines
//! when the viewport class changes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    Chars,
    Words,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    pub index: usize,
    pub text: String,
}

/// Split `text` into fragments. Whitespace never forms a fragment.
pub fn split_text(text: &str, mode: SplitMode) -> Vec<TextFragment> {
    match mode {
        SplitMode::Chars => text
            .chars()
            .filter(|c| !c.is_whitespace())
            .enumerate()
            .map(|(index, c)| TextFragment {
                index,
                text: c.to_string(),
            })
            .collect(),
        SplitMode::Words => text
            .split_whitespace()
            .enumerate()
            .map(|(index, w)| TextFragment {
                index,
                text: w.to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_by_chars_skips_whitespace() {
        let frags = split_text("Hi there", SplitMode::Chars);
        assert_eq!(frags.len(), 7);
        assert_eq!(frags[2].text, "t");
        assert_eq!(frags[2].index, 2);
    }

    #[test]
    fn split_by_words() {
        let frags = split_text("  Scroll   into view ", SplitMode::Words);
        let words: Vec<_> = frags.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(words, vec!["Scroll", "into", "view"]);
    }
}
