// Keyword matching and message rendering.

/// Case-insensitive substring matcher over the configured keywords.
///
/// Keywords are tested in configuration order; the first hit wins.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    /// Build a matcher. Keywords are lower-cased; empty ones are dropped
    /// since they would match every comment.
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// The first keyword contained in `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.first_match(text).is_some()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Placeholder replaced with the commenter's username.
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Resolve the message template for one recipient.
pub fn render_message(template: &str, username: &str) -> String {
    template.replace(USERNAME_PLACEHOLDER, username)
}
