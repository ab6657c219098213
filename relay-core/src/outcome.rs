//! Status/message result shape returned to Discord users.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of a user-facing operation: a success flag and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
        }
    }

    /// Message prefixed with a status marker, ready to post.
    pub fn render(&self) -> String {
        let marker = if self.status { "✅" } else { "❌" };
        format!("{marker} {}", self.message)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl<E: fmt::Display> From<Result<String, E>> for Outcome {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(err) => Self::fail(err.to_string()),
        }
    }
}
