use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A decoded forum message. Produced by the fetch pipeline, never by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub parent_id: Option<String>,
    pub author_id: String,
    pub date: i64,
    pub title: String,
    pub body: Option<String>,
    pub board_names: BTreeSet<String>,
}

impl Message {
    pub fn is_thread_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Thread this message belongs to. Roots are their own thread, and a reply
    /// without an explicit thread id falls back to its parent.
    pub fn thread_root_id(&self) -> &str {
        match (&self.thread_id, &self.parent_id) {
            (_, None) => &self.id,
            (Some(thread_id), Some(_)) => thread_id,
            (None, Some(parent_id)) => parent_id,
        }
    }

    pub fn is_in_board(&self, board_name: &str) -> bool {
        self.board_names.contains(board_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedBoard {
    pub id: String,
    pub subscriber_id: String,
    pub board_name: String,
    pub created_at: i64,
}

/// Fields shared by thread and reply links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCommon {
    pub message_id: String,
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub author_id: Option<String>,
    pub title: String,
    pub date: i64,
    pub index: i64,
    pub read: bool,
    /// False for a ghost reference: the message is known to exist but has not
    /// been fetched or accepted yet.
    pub has_message: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLink {
    pub common: LinkCommon,
    pub last_reply_date: i64,
    pub thread_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyLink {
    pub common: LinkCommon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardMessageLink {
    Thread(ThreadLink),
    Reply(ReplyLink),
}

impl BoardMessageLink {
    pub fn common(&self) -> &LinkCommon {
        match self {
            BoardMessageLink::Thread(link) => &link.common,
            BoardMessageLink::Reply(link) => &link.common,
        }
    }

    pub fn is_ghost(&self) -> bool {
        !self.common().has_message
    }

    pub fn kind(&self) -> LinkKind {
        match self {
            BoardMessageLink::Thread(_) => LinkKind::Thread,
            BoardMessageLink::Reply(_) => LinkKind::Reply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Thread,
    Reply,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Thread => "thread",
            LinkKind::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwantedMessageLink {
    pub subscribed_board_id: String,
    pub message_id: String,
    pub author_id: String,
    pub retry_count: u32,
    pub last_retry: i64,
    pub next_retry: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread: ThreadLink,
    pub reply_count: i64,
    pub unread_replies: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Linked,
    AlreadyLinked,
    Unwanted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub promoted: u32,
    pub still_unwanted: u32,
    pub rechecked: u32,
    pub demoted: u32,
    pub deferred: u32,
    pub dropped: u32,
    /// Records whose mutation was rolled back by the consistency check.
    pub failed: u32,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.promoted += other.promoted;
        self.still_unwanted += other.still_unwanted;
        self.rechecked += other.rechecked;
        self.demoted += other.demoted;
        self.deferred += other.deferred;
        self.dropped += other.dropped;
        self.failed += other.failed;
    }
}

/// What happened to one decoded message across the subscribed boards it
/// reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub newly_stored: bool,
    pub linked: u32,
    pub duplicates: u32,
    pub unwanted: u32,
    pub deferred: u32,
    pub failed: u32,
}

impl DeliveryReport {
    pub fn record(&mut self, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Linked => self.linked += 1,
            AddOutcome::AlreadyLinked => self.duplicates += 1,
            AddOutcome::Unwanted => self.unwanted += 1,
        }
    }
}
