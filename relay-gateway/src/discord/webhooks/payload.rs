use serde_json::{Map, Value, json};

pub const MAX_CONTENT_CHARS: usize = 2000;
pub const MAX_EMBEDS: usize = 10;
pub const MAX_FILES: usize = 10;
pub const MAX_COMPONENT_ROWS: usize = 5;
pub const MAX_THREAD_NAME_CHARS: usize = 100;
pub const DEFAULT_THREAD_NAME: &str = "New post";

/// A file uploaded alongside a webhook message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One message to post through a webhook.
///
/// Embeds and component rows are raw Discord JSON objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookPayload {
    pub content: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub embeds: Vec<Value>,
    pub files: Vec<WebhookFile>,
    pub components: Vec<Value>,
    /// Title of the post when the target is a forum channel.
    pub thread_name: Option<String>,
    pub suppress_mentions: bool,
}

impl WebhookPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    pub fn with_embed(mut self, embed: Value) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.push(WebhookFile {
            name: name.into(),
            bytes,
        });
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn suppress_mentions(mut self) -> Self {
        self.suppress_mentions = true;
        self
    }

    fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Nothing Discord would accept as a message.
    pub fn is_empty(&self) -> bool {
        self.content_str().trim().is_empty()
            && self.embeds.is_empty()
            && self.files.is_empty()
            && self.components.is_empty()
    }

    /// Payload exceeds a Discord per-message limit on its own.
    pub fn exceeds_limits(&self) -> bool {
        self.content_str().chars().count() > MAX_CONTENT_CHARS
            || self.embeds.len() > MAX_EMBEDS
            || self.files.len() > MAX_FILES
            || self.components.len() > MAX_COMPONENT_ROWS
    }

    fn merged_content_chars(&self, other: &Self) -> usize {
        let a = self.content_str().chars().count();
        let b = other.content_str().chars().count();
        if a > 0 && b > 0 { a + 1 + b } else { a + b }
    }

    /// Whether `other` can be appended to this message as a single post.
    pub fn can_merge(&self, other: &Self) -> bool {
        self.username == other.username
            && self.avatar_url == other.avatar_url
            && self.suppress_mentions == other.suppress_mentions
            && self.thread_name.is_none()
            && other.thread_name.is_none()
            && self.merged_content_chars(other) <= MAX_CONTENT_CHARS
            && self.embeds.len() + other.embeds.len() <= MAX_EMBEDS
            && self.files.len() + other.files.len() <= MAX_FILES
            && self.components.len() + other.components.len() <= MAX_COMPONENT_ROWS
    }

    /// Append `other`; content is joined with a newline.
    pub fn merge(&mut self, other: Self) {
        self.content = match (self.content.take(), other.content) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a}\n{b}")),
            (Some(a), Some(b)) if a.is_empty() => Some(b),
            (Some(a), _) => Some(a),
            (None, b) => b,
        };
        self.embeds.extend(other.embeds);
        self.files.extend(other.files);
        self.components.extend(other.components);
    }

    /// Post title for a forum target: the given name, else the first
    /// content line, else a placeholder.
    pub fn forum_thread_name(&self) -> String {
        let name = self
            .thread_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.content_str()
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
            })
            .unwrap_or(DEFAULT_THREAD_NAME);
        name.chars().take(MAX_THREAD_NAME_CHARS).collect()
    }

    /// JSON body for the execute-webhook endpoint. Files travel separately.
    pub fn to_json(&self, thread_name: Option<&str>) -> Value {
        let mut body = Map::new();
        if let Some(content) = self.content.as_deref().filter(|c| !c.is_empty()) {
            body.insert("content".into(), json!(content));
        }
        if let Some(username) = &self.username {
            body.insert("username".into(), json!(username));
        }
        if let Some(avatar_url) = &self.avatar_url {
            body.insert("avatar_url".into(), json!(avatar_url));
        }
        if !self.embeds.is_empty() {
            body.insert("embeds".into(), Value::Array(self.embeds.clone()));
        }
        if !self.components.is_empty() {
            body.insert("components".into(), Value::Array(self.components.clone()));
        }
        if let Some(name) = thread_name {
            body.insert("thread_name".into(), json!(name));
        }
        if self.suppress_mentions {
            body.insert("allowed_mentions".into(), json!({ "parse": [] }));
        }
        Value::Object(body)
    }
}
