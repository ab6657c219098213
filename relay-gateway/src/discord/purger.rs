//! Bulk message deletion with author/content filters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serenity::builder::GetMessages;
use serenity::http::{Http, HttpError};
use serenity::model::id::{ChannelId, MessageId};
use tracing::{debug, info};

/// Discord refuses to bulk delete messages older than this.
pub const BULK_DELETE_MAX_AGE_DAYS: i64 = 14;
pub const PAGE_SIZE: u8 = 100;
pub const BULK_CHUNK: usize = 100;
pub const MAX_LIMIT: u16 = 1000;

const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PurgeError {
    #[error("limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: u16, max: u16 },
    #[error("missing permissions to read or delete messages")]
    MissingPermissions,
    #[error("Discord error: {0}")]
    Discord(String),
}

impl From<serenity::Error> for PurgeError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err
            && response.status_code.as_u16() == 403
        {
            return Self::MissingPermissions;
        }
        Self::Discord(err.to_string())
    }
}

/// The parts of a message the filters look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeMessage {
    pub id: u64,
    pub author_id: u64,
    pub author_bot: bool,
    pub content: String,
    pub pinned: bool,
}

impl PurgeMessage {
    /// Creation time, decoded from the snowflake id.
    pub fn created_at(&self) -> DateTime<Utc> {
        let ms = (self.id >> 22) as i64 + DISCORD_EPOCH_MS;
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeFilter {
    /// How many recent messages to scan.
    pub limit: u16,
    pub author: Option<u64>,
    pub bots_only: bool,
    /// Case-insensitive substring.
    pub contains: Option<String>,
    pub include_pinned: bool,
    /// Delete messages too old for bulk deletion one by one.
    pub delete_old: bool,
}

impl PurgeFilter {
    pub fn new(limit: u16) -> Self {
        Self {
            limit,
            author: None,
            bots_only: false,
            contains: None,
            include_pinned: false,
            delete_old: false,
        }
    }

    pub fn validate(&self, max: u16) -> Result<(), PurgeError> {
        let max = max.min(MAX_LIMIT);
        if self.limit == 0 || self.limit > max {
            return Err(PurgeError::InvalidLimit {
                limit: self.limit,
                max,
            });
        }
        Ok(())
    }

    pub fn matches(&self, message: &PurgeMessage) -> bool {
        if message.pinned && !self.include_pinned {
            return false;
        }
        if self.author.is_some_and(|author| author != message.author_id) {
            return false;
        }
        if self.bots_only && !message.author_bot {
            return false;
        }
        if let Some(needle) = &self.contains
            && !message
                .content
                .to_lowercase()
                .contains(&needle.to_lowercase())
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Young enough for bulk deletion.
    pub bulk: Vec<u64>,
    pub old: Vec<u64>,
}

/// Pick the matching messages and split off those too old to bulk delete.
pub fn select_for_deletion(
    messages: &[PurgeMessage],
    filter: &PurgeFilter,
    now: DateTime<Utc>,
) -> Selection {
    let cutoff = now - Duration::days(BULK_DELETE_MAX_AGE_DAYS);
    let mut selection = Selection::default();
    for message in messages.iter().filter(|m| filter.matches(m)) {
        if message.created_at() <= cutoff {
            selection.old.push(message.id);
        } else {
            selection.bulk.push(message.id);
        }
    }
    selection
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub scanned: usize,
    pub deleted: usize,
    pub skipped_old: usize,
}

impl PurgeReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Deleted {} of {} scanned messages.",
            self.deleted, self.scanned
        );
        if self.skipped_old > 0 {
            text.push_str(&format!(
                " {} older than {} days were left alone.",
                self.skipped_old, BULK_DELETE_MAX_AGE_DAYS
            ));
        }
        text
    }
}

/// Channel history access needed to purge.
#[async_trait]
pub trait PurgeTarget: Send + Sync {
    /// Up to `limit` messages before `before` (newest first).
    async fn history(
        &self,
        channel_id: u64,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<PurgeMessage>, PurgeError>;

    /// Delete 2 to 100 messages at once.
    async fn bulk_delete(&self, channel_id: u64, ids: &[u64]) -> Result<(), PurgeError>;

    async fn delete(&self, channel_id: u64, id: u64) -> Result<(), PurgeError>;
}

/// Scan up to `filter.limit` recent messages and delete the matching ones.
pub async fn purge(
    target: &dyn PurgeTarget,
    channel_id: u64,
    filter: &PurgeFilter,
) -> Result<PurgeReport, PurgeError> {
    filter.validate(MAX_LIMIT)?;

    let limit = filter.limit as usize;
    let mut scanned: Vec<PurgeMessage> = Vec::with_capacity(limit);
    let mut before = None;
    while scanned.len() < limit {
        let want = (limit - scanned.len()).min(PAGE_SIZE as usize) as u8;
        let page = target.history(channel_id, before, want).await?;
        let exhausted = page.len() < want as usize;
        before = page.last().map(|m| m.id);
        scanned.extend(page.into_iter().take(want as usize));
        if exhausted || before.is_none() {
            break;
        }
    }

    let selection = select_for_deletion(&scanned, filter, Utc::now());
    let mut report = PurgeReport {
        scanned: scanned.len(),
        ..PurgeReport::default()
    };

    for chunk in selection.bulk.chunks(BULK_CHUNK) {
        if let [id] = chunk {
            target.delete(channel_id, *id).await?;
        } else {
            target.bulk_delete(channel_id, chunk).await?;
        }
        report.deleted += chunk.len();
        debug!(channel_id, count = chunk.len(), "Deleted message chunk");
    }

    if filter.delete_old {
        for id in &selection.old {
            target.delete(channel_id, *id).await?;
            report.deleted += 1;
        }
    } else {
        report.skipped_old = selection.old.len();
    }

    info!(
        channel_id,
        scanned = report.scanned,
        deleted = report.deleted,
        skipped_old = report.skipped_old,
        "Purge finished"
    );
    Ok(report)
}

/// [`PurgeTarget`] over serenity's REST client.
pub struct SerenityPurgeTarget {
    http: Arc<Http>,
}

impl SerenityPurgeTarget {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PurgeTarget for SerenityPurgeTarget {
    async fn history(
        &self,
        channel_id: u64,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<PurgeMessage>, PurgeError> {
        let mut request = GetMessages::new().limit(limit);
        if let Some(before) = before {
            request = request.before(MessageId::new(before));
        }
        let messages = ChannelId::new(channel_id)
            .messages(&self.http, request)
            .await?;
        Ok(messages
            .into_iter()
            .map(|message| PurgeMessage {
                id: message.id.get(),
                author_id: message.author.id.get(),
                author_bot: message.author.bot,
                content: message.content,
                pinned: message.pinned,
            })
            .collect())
    }

    async fn bulk_delete(&self, channel_id: u64, ids: &[u64]) -> Result<(), PurgeError> {
        let body = serde_json::json!({ "messages": ids });
        self.http
            .delete_messages(ChannelId::new(channel_id), &body, None)
            .await?;
        Ok(())
    }

    async fn delete(&self, channel_id: u64, id: u64) -> Result<(), PurgeError> {
        self.http
            .delete_message(ChannelId::new(channel_id), MessageId::new(id), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Snowflake for a message created at `at`.
    fn id_at(at: DateTime<Utc>, seq: u64) -> u64 {
        (((at.timestamp_millis() - DISCORD_EPOCH_MS) as u64) << 22) | seq
    }

    fn message(id: u64, author_id: u64, content: &str) -> PurgeMessage {
        PurgeMessage {
            id,
            author_id,
            author_bot: false,
            content: content.to_string(),
            pinned: false,
        }
    }

    #[test]
    fn snowflake_decodes_creation_time() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(message(id_at(at, 7), 1, "").created_at(), at);
    }

    #[test]
    fn filters_combine() {
        let now = Utc::now();
        let mut pinned = message(id_at(now, 1), 1, "hello");
        pinned.pinned = true;
        let mut bot = message(id_at(now, 2), 2, "HELLO there");
        bot.author_bot = true;
        let messages = vec![
            pinned,
            bot,
            message(id_at(now, 3), 1, "goodbye"),
            message(id_at(now, 4), 1, "well hello"),
        ];

        let mut filter = PurgeFilter::new(100);
        filter.contains = Some("Hello".into());
        let selection = select_for_deletion(&messages, &filter, now);
        assert_eq!(selection.bulk, vec![messages[1].id, messages[3].id]);

        filter.include_pinned = true;
        filter.author = Some(1);
        let selection = select_for_deletion(&messages, &filter, now);
        assert_eq!(selection.bulk, vec![messages[0].id, messages[3].id]);

        let mut bots = PurgeFilter::new(100);
        bots.bots_only = true;
        assert_eq!(
            select_for_deletion(&messages, &bots, now).bulk,
            vec![messages[1].id]
        );
    }

    #[test]
    fn old_messages_are_split_off() {
        let now = Utc::now();
        let messages = vec![
            message(id_at(now - Duration::days(1), 0), 1, "new"),
            message(id_at(now - Duration::days(15), 0), 1, "old"),
        ];
        let selection = select_for_deletion(&messages, &PurgeFilter::new(10), now);
        assert_eq!(selection.bulk, vec![messages[0].id]);
        assert_eq!(selection.old, vec![messages[1].id]);
    }

    #[test]
    fn limit_is_validated() {
        assert!(PurgeFilter::new(0).validate(1000).is_err());
        assert!(PurgeFilter::new(1001).validate(1000).is_err());
        assert!(PurgeFilter::new(200).validate(100).is_err());
        assert!(PurgeFilter::new(100).validate(100).is_ok());
    }

    #[test]
    fn summary_mentions_skipped_old() {
        let report = PurgeReport {
            scanned: 10,
            deleted: 4,
            skipped_old: 2,
        };
        assert_eq!(
            report.summary(),
            "Deleted 4 of 10 scanned messages. 2 older than 14 days were left alone."
        );
    }
}
