use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::links;
use crate::models::{BoardMessageLink, LinkCommon, ReplyLink, ThreadLink, ThreadSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardStats {
    pub threads: i64,
    pub replies: i64,
    pub ghosts: i64,
    pub unread: i64,
    pub unwanted: i64,
}

/// Threads of a subscribed board, most recently active first.
pub fn list_threads(
    conn: &Connection,
    board_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ThreadSummary>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.message_id, t.thread_id, t.parent_id, t.author_id, t.title, t.date, t.link_index, \
                t.is_read, t.has_message, COALESCE(t.last_reply_date, t.date), t.thread_read, \
                (SELECT COUNT(1) FROM board_links r \
                   WHERE r.subscribed_board_id = t.subscribed_board_id AND r.kind = 'reply' \
                     AND r.thread_id = t.thread_id AND r.has_message = 1) AS reply_count, \
                (SELECT COUNT(1) FROM board_links r \
                   WHERE r.subscribed_board_id = t.subscribed_board_id AND r.kind = 'reply' \
                     AND r.thread_id = t.thread_id AND r.has_message = 1 AND r.is_read = 0) AS unread_replies \
         FROM board_links t \
         WHERE t.subscribed_board_id = ?1 AND t.kind = 'thread' \
         ORDER BY COALESCE(t.last_reply_date, t.date) DESC, t.link_index DESC \
         LIMIT ?2 OFFSET ?3;",
    )?;
    let rows = stmt.query_map(params![board_id, limit, offset], |row| {
        Ok(ThreadSummary {
            thread: ThreadLink {
                common: LinkCommon {
                    message_id: row.get(0)?,
                    thread_id: row.get(1)?,
                    parent_id: row.get(2)?,
                    author_id: row.get(3)?,
                    title: row.get(4)?,
                    date: row.get(5)?,
                    index: row.get(6)?,
                    read: row.get::<_, i64>(7)? != 0,
                    has_message: row.get::<_, i64>(8)? != 0,
                },
                last_reply_date: row.get(9)?,
                thread_read: row.get::<_, i64>(10)? != 0,
            },
            reply_count: row.get(11)?,
            unread_replies: row.get(12)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Replies of one thread in date order, ghosts included.
pub fn list_replies(conn: &Connection, board_id: &str, thread_id: &str) -> Result<Vec<ReplyLink>, CoreError> {
    links::replies_in_thread(conn, board_id, thread_id)
}

/// Unread links that carry a message. Ghosts are not counted.
pub fn unread_count(conn: &Connection, board_id: &str) -> Result<i64, CoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM board_links \
         WHERE subscribed_board_id = ?1 AND has_message = 1 AND is_read = 0;",
        params![board_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn link_by_index(conn: &Connection, board_id: &str, index: i64) -> Result<BoardMessageLink, CoreError> {
    links::link_by_index(conn, board_id, index)?
        .ok_or_else(|| CoreError::NotFound(format!("link index {}", index)))
}

/// Sequential catch-up: links with an index above `after_index`, in index
/// order. Pass -1 to start from the beginning.
pub fn links_after_index(
    conn: &Connection,
    board_id: &str,
    after_index: i64,
    limit: i64,
) -> Result<Vec<BoardMessageLink>, CoreError> {
    links::links_after_index(conn, board_id, after_index, limit)
}

pub fn board_stats(conn: &Connection, board_id: &str) -> Result<BoardStats, CoreError> {
    let threads: i64 = conn.query_row(
        "SELECT COUNT(1) FROM board_links WHERE subscribed_board_id = ?1 AND kind = 'thread';",
        params![board_id],
        |row| row.get(0),
    )?;
    let replies: i64 = conn.query_row(
        "SELECT COUNT(1) FROM board_links WHERE subscribed_board_id = ?1 AND kind = 'reply';",
        params![board_id],
        |row| row.get(0),
    )?;
    let ghosts: i64 = conn.query_row(
        "SELECT COUNT(1) FROM board_links WHERE subscribed_board_id = ?1 AND has_message = 0;",
        params![board_id],
        |row| row.get(0),
    )?;
    let unwanted: i64 = conn.query_row(
        "SELECT COUNT(1) FROM unwanted_links WHERE subscribed_board_id = ?1;",
        params![board_id],
        |row| row.get(0),
    )?;
    Ok(BoardStats {
        threads,
        replies,
        ghosts,
        unread: unread_count(conn, board_id)?,
        unwanted,
    })
}
