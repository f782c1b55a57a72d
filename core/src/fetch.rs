use serde::{Deserialize, Serialize};

/// Why the pipeline gave up on a message-list index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    NotFound,
    ParsingFailed,
    Cancelled,
}

/// Network side of the client. Requests are fire-and-forget; results come back
/// through `ForumClient::on_message_decoded`, `on_message_list_fetched` and
/// `on_fetch_failed`.
pub trait FetchPipeline: Send + Sync {
    fn fetch_message_list(&self, author_id: &str, index: i64, follow_newer: bool);
}
