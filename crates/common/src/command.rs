// Per-turn command flags and the operation tags they select.

use serde::{Deserialize, Serialize};

/// A highlighted span of a code artifact, in character offsets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeHighlight {
    pub start_offset: usize,
    /// Exclusive.
    pub end_offset: usize,
}

/// A highlighted passage of a markdown artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TextHighlight {
    pub selected_text: String,
    /// The markdown block containing the selection, as the client saw it.
    pub containing_block: String,
    /// The whole document the block was taken from.
    pub full_document: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLength {
    Shortest,
    Short,
    Long,
    Longest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingLevel {
    Pirate,
    Child,
    Teenager,
    College,
    Phd,
}

/// Mutually exclusive per-turn edit intents plus the search toggle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandFlags {
    pub highlighted_code: Option<CodeHighlight>,
    pub highlighted_text: Option<TextHighlight>,
    /// Target natural language for a translation.
    pub language: Option<String>,
    pub reading_level: Option<ReadingLevel>,
    pub artifact_length: Option<ArtifactLength>,
    pub regenerate_with_emojis: bool,
    pub add_comments: bool,
    pub add_logs: bool,
    /// Target programming language for a port.
    pub port_language: Option<String>,
    pub fix_bugs: bool,
    pub custom_quick_action_id: Option<String>,
    pub web_search_enabled: bool,
}

impl CommandFlags {
    pub fn has_text_theme(&self) -> bool {
        self.language.is_some()
            || self.reading_level.is_some()
            || self.artifact_length.is_some()
            || self.regenerate_with_emojis
    }

    pub fn has_code_theme(&self) -> bool {
        self.add_comments || self.add_logs || self.port_language.is_some() || self.fix_bugs
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reset every transient flag.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The single operation chosen for a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    RangeRewriteCode,
    RangeRewriteMarkdown,
    ThemeTransform,
    CodeThemeTransform,
    CustomAction,
    SearchAugmented,
    FullRewrite,
    Generate,
    ReplyOnly,
}

impl OperationTag {
    pub const ALL: [OperationTag; 9] = [
        Self::RangeRewriteCode,
        Self::RangeRewriteMarkdown,
        Self::ThemeTransform,
        Self::CodeThemeTransform,
        Self::CustomAction,
        Self::SearchAugmented,
        Self::FullRewrite,
        Self::Generate,
        Self::ReplyOnly,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RangeRewriteCode => "range_rewrite_code",
            Self::RangeRewriteMarkdown => "range_rewrite_markdown",
            Self::ThemeTransform => "theme_transform",
            Self::CodeThemeTransform => "code_theme_transform",
            Self::CustomAction => "custom_action",
            Self::SearchAugmented => "search_augmented",
            Self::FullRewrite => "full_rewrite",
            Self::Generate => "generate",
            Self::ReplyOnly => "reply_only",
        }
    }
}

impl std::fmt::Display for OperationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_parse_from_camel_case_payload() {
        let flags: CommandFlags = serde_json::from_value(json!({
            "highlightedCode": {"startOffset": 4, "endOffset": 9},
            "readingLevel": "phd",
            "webSearchEnabled": true
        }))
        .expect("flags should parse");

        assert_eq!(flags.highlighted_code, Some(CodeHighlight { start_offset: 4, end_offset: 9 }));
        assert_eq!(flags.reading_level, Some(ReadingLevel::Phd));
        assert!(flags.web_search_enabled);
        assert!(flags.has_text_theme());
        assert!(!flags.has_code_theme());
    }

    #[test]
    fn clear_resets_every_flag() {
        let mut flags = CommandFlags {
            language: Some("french".into()),
            fix_bugs: true,
            custom_quick_action_id: Some("abc".into()),
            web_search_enabled: true,
            ..CommandFlags::default()
        };
        assert!(!flags.is_empty());
        flags.clear();
        assert!(flags.is_empty());
    }

    #[test]
    fn operation_tags_have_unique_names() {
        let mut names: Vec<&str> = OperationTag::ALL.iter().map(|tag| tag.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OperationTag::ALL.len());
    }
}
