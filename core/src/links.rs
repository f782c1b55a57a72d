use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CoreError;
use crate::models::{
    BoardMessageLink, LinkCommon, LinkKind, Message, ReplyLink, ThreadLink, UnwantedMessageLink,
};

const LINK_COLUMNS: &str = "kind, message_id, thread_id, parent_id, author_id, title, date, \
                            link_index, is_read, has_message, last_reply_date, thread_read";

/// Identifies one link inside a subscribed board.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkKey {
    pub kind: LinkKind,
    pub thread_id: String,
    pub message_id: String,
}

impl LinkKey {
    pub fn thread(thread_id: &str) -> Self {
        Self {
            kind: LinkKind::Thread,
            thread_id: thread_id.to_string(),
            message_id: thread_id.to_string(),
        }
    }

    pub fn reply(thread_id: &str, message_id: &str) -> Self {
        Self {
            kind: LinkKind::Reply,
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

/// Values for a link about to be inserted.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub key: LinkKey,
    pub parent_id: Option<String>,
    pub author_id: Option<String>,
    pub title: String,
    pub date: i64,
    pub has_message: bool,
    pub next_wanted_check: Option<i64>,
}

impl NewLink {
    pub fn real(key: LinkKey, message: &Message, next_wanted_check: i64) -> Self {
        let parent_id = match key.kind {
            LinkKind::Thread => None,
            LinkKind::Reply => message.parent_id.clone(),
        };
        Self {
            key,
            parent_id,
            author_id: Some(message.author_id.clone()),
            title: message.title.clone(),
            date: message.date,
            has_message: true,
            next_wanted_check: Some(next_wanted_check),
        }
    }

    pub fn ghost(key: LinkKey, title: String, date: i64) -> Self {
        Self {
            key,
            parent_id: None,
            author_id: None,
            title,
            date,
            has_message: false,
            next_wanted_check: None,
        }
    }
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<BoardMessageLink> {
    let kind: String = row.get(0)?;
    let date: i64 = row.get(6)?;
    let common = LinkCommon {
        message_id: row.get(1)?,
        thread_id: row.get(2)?,
        parent_id: row.get(3)?,
        author_id: row.get(4)?,
        title: row.get(5)?,
        date,
        index: row.get(7)?,
        read: row.get::<_, i64>(8)? != 0,
        has_message: row.get::<_, i64>(9)? != 0,
    };
    if kind == LinkKind::Thread.as_str() {
        Ok(BoardMessageLink::Thread(ThreadLink {
            common,
            last_reply_date: row.get::<_, Option<i64>>(10)?.unwrap_or(date),
            thread_read: row.get::<_, i64>(11)? != 0,
        }))
    } else {
        Ok(BoardMessageLink::Reply(ReplyLink { common }))
    }
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadLink> {
    match link_from_row(row)? {
        BoardMessageLink::Thread(link) => Ok(link),
        BoardMessageLink::Reply(_) => Err(rusqlite::Error::InvalidColumnType(
            0,
            "kind".to_string(),
            rusqlite::types::Type::Text,
        )),
    }
}

fn reply_from_row(row: &Row<'_>) -> rusqlite::Result<ReplyLink> {
    match link_from_row(row)? {
        BoardMessageLink::Reply(link) => Ok(link),
        BoardMessageLink::Thread(_) => Err(rusqlite::Error::InvalidColumnType(
            0,
            "kind".to_string(),
            rusqlite::types::Type::Text,
        )),
    }
}

pub fn thread_link(conn: &Connection, board_id: &str, thread_id: &str) -> Result<Option<ThreadLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'thread' AND thread_id = ?2;",
        LINK_COLUMNS
    );
    conn.query_row(&sql, params![board_id, thread_id], thread_from_row)
        .optional()
        .map_err(CoreError::from)
}

pub fn reply_link(
    conn: &Connection,
    board_id: &str,
    thread_id: &str,
    message_id: &str,
) -> Result<Option<ReplyLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'reply' AND thread_id = ?2 AND message_id = ?3;",
        LINK_COLUMNS
    );
    conn.query_row(&sql, params![board_id, thread_id, message_id], reply_from_row)
        .optional()
        .map_err(CoreError::from)
}

/// Reply links for one message id across every thread of the board.
pub fn reply_links_for_message(
    conn: &Connection,
    board_id: &str,
    message_id: &str,
) -> Result<Vec<ReplyLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'reply' AND message_id = ?2 \
         ORDER BY link_index ASC;",
        LINK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id, message_id], reply_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn replies_in_thread(conn: &Connection, board_id: &str, thread_id: &str) -> Result<Vec<ReplyLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'reply' AND thread_id = ?2 \
         ORDER BY date ASC, link_index ASC;",
        LINK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id, thread_id], reply_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn all_links(conn: &Connection, board_id: &str) -> Result<Vec<BoardMessageLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links WHERE subscribed_board_id = ?1 ORDER BY link_index ASC;",
        LINK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id], link_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn link_by_index(conn: &Connection, board_id: &str, index: i64) -> Result<Option<BoardMessageLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links WHERE subscribed_board_id = ?1 AND link_index = ?2;",
        LINK_COLUMNS
    );
    conn.query_row(&sql, params![board_id, index], link_from_row)
        .optional()
        .map_err(CoreError::from)
}

pub fn links_after_index(
    conn: &Connection,
    board_id: &str,
    after_index: i64,
    limit: i64,
) -> Result<Vec<BoardMessageLink>, CoreError> {
    let sql = format!(
        "SELECT {} FROM board_links \
         WHERE subscribed_board_id = ?1 AND link_index > ?2 \
         ORDER BY link_index ASC LIMIT ?3;",
        LINK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id, after_index, limit], link_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// True if a non-ghost link for `message_id` exists anywhere in the board.
pub fn has_real_link(conn: &Connection, board_id: &str, message_id: &str) -> Result<bool, CoreError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM board_links \
             WHERE subscribed_board_id = ?1 AND message_id = ?2 AND has_message = 1 LIMIT 1;",
            params![board_id, message_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// True if a non-ghost reply in `thread_id` names `message_id` as its parent.
pub fn has_real_child(
    conn: &Connection,
    board_id: &str,
    thread_id: &str,
    message_id: &str,
) -> Result<bool, CoreError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM board_links \
             WHERE subscribed_board_id = ?1 AND kind = 'reply' AND thread_id = ?2 \
               AND parent_id = ?3 AND has_message = 1 LIMIT 1;",
            params![board_id, thread_id, message_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub fn reply_count(conn: &Connection, board_id: &str, thread_id: &str) -> Result<i64, CoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'reply' AND thread_id = ?2;",
        params![board_id, thread_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn take_link_index(conn: &Connection, board_id: &str) -> Result<i64, CoreError> {
    let index: Option<i64> = conn
        .query_row(
            "SELECT next_free_index FROM subscribed_boards WHERE id = ?1;",
            params![board_id],
            |row| row.get(0),
        )
        .optional()?;
    let index = index.ok_or_else(|| CoreError::NotFound(format!("subscribed board {}", board_id)))?;
    conn.execute(
        "UPDATE subscribed_boards SET next_free_index = next_free_index + 1 WHERE id = ?1;",
        params![board_id],
    )?;
    Ok(index)
}

/// Inserts a link at the board's next free index and returns that index.
pub fn insert_link(conn: &Connection, board_id: &str, link: &NewLink) -> Result<i64, CoreError> {
    let index = take_link_index(conn, board_id)?;
    let last_reply_date = match link.key.kind {
        LinkKind::Thread => Some(link.date),
        LinkKind::Reply => None,
    };
    conn.execute(
        "INSERT INTO board_links \
         (subscribed_board_id, kind, message_id, thread_id, parent_id, author_id, title, date, \
          link_index, is_read, has_message, last_reply_date, thread_read, \
          wanted_check_count, last_wanted_check, next_wanted_check) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, 0, 0, NULL, ?12);",
        params![
            board_id,
            link.key.kind.as_str(),
            link.key.message_id,
            link.key.thread_id,
            link.parent_id,
            link.author_id,
            link.title,
            link.date,
            index,
            link.has_message as i64,
            last_reply_date,
            link.next_wanted_check
        ],
    )?;
    Ok(index)
}

/// Turns a ghost into a real, unread link in place. The index is kept.
pub fn attach_message(
    conn: &Connection,
    board_id: &str,
    key: &LinkKey,
    message: &Message,
    next_wanted_check: i64,
) -> Result<(), CoreError> {
    let parent_id = match key.kind {
        LinkKind::Thread => None,
        LinkKind::Reply => message.parent_id.clone(),
    };
    conn.execute(
        "UPDATE board_links SET \
           has_message = 1, is_read = 0, parent_id = ?5, author_id = ?6, title = ?7, date = ?8, \
           wanted_check_count = 0, last_wanted_check = NULL, next_wanted_check = ?9 \
         WHERE subscribed_board_id = ?1 AND kind = ?2 AND thread_id = ?3 AND message_id = ?4;",
        params![
            board_id,
            key.kind.as_str(),
            key.thread_id,
            key.message_id,
            parent_id,
            message.author_id,
            message.title,
            message.date,
            next_wanted_check
        ],
    )?;
    Ok(())
}

/// Turns a real link back into a ghost. Title and date stay as the last known
/// values.
pub fn demote_to_ghost(conn: &Connection, board_id: &str, key: &LinkKey) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE board_links SET \
           has_message = 0, wanted_check_count = 0, last_wanted_check = NULL, next_wanted_check = NULL \
         WHERE subscribed_board_id = ?1 AND kind = ?2 AND thread_id = ?3 AND message_id = ?4;",
        params![board_id, key.kind.as_str(), key.thread_id, key.message_id],
    )?;
    Ok(())
}

pub fn delete_link(conn: &Connection, board_id: &str, key: &LinkKey) -> Result<(), CoreError> {
    conn.execute(
        "DELETE FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = ?2 AND thread_id = ?3 AND message_id = ?4;",
        params![board_id, key.kind.as_str(), key.thread_id, key.message_id],
    )?;
    Ok(())
}

pub fn set_link_date(conn: &Connection, board_id: &str, key: &LinkKey, date: i64) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE board_links SET date = ?5 \
         WHERE subscribed_board_id = ?1 AND kind = ?2 AND thread_id = ?3 AND message_id = ?4;",
        params![board_id, key.kind.as_str(), key.thread_id, key.message_id, date],
    )?;
    Ok(())
}

pub fn set_thread_stats(
    conn: &Connection,
    board_id: &str,
    thread_id: &str,
    last_reply_date: i64,
    thread_read: bool,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE board_links SET last_reply_date = ?3, thread_read = ?4 \
         WHERE subscribed_board_id = ?1 AND kind = 'thread' AND thread_id = ?2;",
        params![board_id, thread_id, last_reply_date, thread_read as i64],
    )?;
    Ok(())
}

/// Sets the read flag on a thread link and every reply in it.
pub fn set_thread_read(conn: &Connection, board_id: &str, thread_id: &str, read: bool) -> Result<usize, CoreError> {
    let changed = conn.execute(
        "UPDATE board_links SET is_read = ?3 WHERE subscribed_board_id = ?1 AND thread_id = ?2;",
        params![board_id, thread_id, read as i64],
    )?;
    conn.execute(
        "UPDATE board_links SET thread_read = ?3 \
         WHERE subscribed_board_id = ?1 AND kind = 'thread' AND thread_id = ?2;",
        params![board_id, thread_id, read as i64],
    )?;
    Ok(changed)
}

/// Sets the read flag on every link for one message id. Returns the threads
/// that were touched.
pub fn set_message_read(
    conn: &Connection,
    board_id: &str,
    message_id: &str,
    read: bool,
) -> Result<Vec<String>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT thread_id FROM board_links \
         WHERE subscribed_board_id = ?1 AND message_id = ?2 ORDER BY thread_id ASC;",
    )?;
    let threads = stmt
        .query_map(params![board_id, message_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    conn.execute(
        "UPDATE board_links SET is_read = ?3 WHERE subscribed_board_id = ?1 AND message_id = ?2;",
        params![board_id, message_id, read as i64],
    )?;
    Ok(threads)
}

/// A real link whose wanted re-check is due.
#[derive(Debug, Clone)]
pub struct DueWantedCheck {
    pub key: LinkKey,
    pub author_id: String,
    pub check_count: u32,
}

pub fn due_wanted_checks(conn: &Connection, board_id: &str, now: i64) -> Result<Vec<DueWantedCheck>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT kind, thread_id, message_id, author_id, wanted_check_count FROM board_links \
         WHERE subscribed_board_id = ?1 AND has_message = 1 \
           AND next_wanted_check IS NOT NULL AND next_wanted_check <= ?2 \
           AND author_id IS NOT NULL \
         ORDER BY next_wanted_check ASC, link_index ASC;",
    )?;
    let rows = stmt.query_map(params![board_id, now], |row| {
        let kind: String = row.get(0)?;
        let thread_id: String = row.get(1)?;
        let message_id: String = row.get(2)?;
        let key = if kind == LinkKind::Thread.as_str() {
            LinkKey::thread(&thread_id)
        } else {
            LinkKey::reply(&thread_id, &message_id)
        };
        Ok(DueWantedCheck {
            key,
            author_id: row.get(3)?,
            check_count: row.get::<_, i64>(4)?.max(0) as u32,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn reschedule_wanted_check(
    conn: &Connection,
    board_id: &str,
    key: &LinkKey,
    check_count: u32,
    last_check: i64,
    next_check: i64,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE board_links SET wanted_check_count = ?5, last_wanted_check = ?6, next_wanted_check = ?7 \
         WHERE subscribed_board_id = ?1 AND kind = ?2 AND thread_id = ?3 AND message_id = ?4 \
           AND has_message = 1;",
        params![
            board_id,
            key.kind.as_str(),
            key.thread_id,
            key.message_id,
            check_count as i64,
            last_check,
            next_check
        ],
    )?;
    Ok(())
}

fn unwanted_from_row(row: &Row<'_>) -> rusqlite::Result<UnwantedMessageLink> {
    Ok(UnwantedMessageLink {
        subscribed_board_id: row.get(0)?,
        message_id: row.get(1)?,
        author_id: row.get(2)?,
        retry_count: row.get::<_, i64>(3)?.max(0) as u32,
        last_retry: row.get(4)?,
        next_retry: row.get(5)?,
    })
}

pub fn get_unwanted(
    conn: &Connection,
    board_id: &str,
    message_id: &str,
) -> Result<Option<UnwantedMessageLink>, CoreError> {
    conn.query_row(
        "SELECT subscribed_board_id, message_id, author_id, retry_count, last_retry, next_retry \
         FROM unwanted_links WHERE subscribed_board_id = ?1 AND message_id = ?2;",
        params![board_id, message_id],
        unwanted_from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn put_unwanted(conn: &Connection, link: &UnwantedMessageLink) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO unwanted_links \
         (subscribed_board_id, message_id, author_id, retry_count, last_retry, next_retry) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(subscribed_board_id, message_id) DO UPDATE SET \
           author_id = excluded.author_id, \
           retry_count = excluded.retry_count, \
           last_retry = excluded.last_retry, \
           next_retry = excluded.next_retry;",
        params![
            link.subscribed_board_id,
            link.message_id,
            link.author_id,
            link.retry_count as i64,
            link.last_retry,
            link.next_retry
        ],
    )?;
    Ok(())
}

pub fn delete_unwanted(conn: &Connection, board_id: &str, message_id: &str) -> Result<bool, CoreError> {
    let deleted = conn.execute(
        "DELETE FROM unwanted_links WHERE subscribed_board_id = ?1 AND message_id = ?2;",
        params![board_id, message_id],
    )?;
    Ok(deleted > 0)
}

pub fn due_unwanted(conn: &Connection, board_id: &str, now: i64) -> Result<Vec<UnwantedMessageLink>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT subscribed_board_id, message_id, author_id, retry_count, last_retry, next_retry \
         FROM unwanted_links WHERE subscribed_board_id = ?1 AND next_retry <= ?2 \
         ORDER BY next_retry ASC, message_id ASC;",
    )?;
    let rows = stmt.query_map(params![board_id, now], unwanted_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

