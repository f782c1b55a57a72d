//! Subscriber-local thread assembly.
//!
//! A `BoardEngine` turns message arrivals, purges and oracle re-evaluations
//! into thread and reply links for one subscribed board. Messages may arrive
//! in any order: a reply whose thread root or parent is missing gets a ghost
//! link for it, and the ghost is promoted in place once the real message is
//! accepted.
//!
//! A message that became a thread link through a forward reference stays a
//! thread of its own even after it turns out to be a reply elsewhere. The two
//! views are never merged.
//!
//! Every mutation runs in one transaction and ends with
//! [`consistency::verify_board`]; a broken invariant rolls it back.

use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::config::RetrySettings;
use crate::consistency;
use crate::db::with_transaction;
use crate::error::CoreError;
use crate::links::{self, LinkKey, NewLink};
use crate::models::{AddOutcome, Message, SubscribedBoard, SweepReport, UnwantedMessageLink};
use crate::oracle::{AcceptabilityOracle, OracleError};
use crate::store;
use crate::subscription;

/// How far before the referring message a ghost's guessed date is placed.
pub const GUESS_EPSILON_MS: i64 = 1;

const REPLY_PREFIX: &str = "Re: ";

pub struct BoardEngine<'a> {
    conn: &'a Connection,
    oracle: &'a dyn AcceptabilityOracle,
    unwanted_retry: RetrySettings,
    wanted_check: RetrySettings,
}

impl<'a> BoardEngine<'a> {
    pub fn new(
        conn: &'a Connection,
        oracle: &'a dyn AcceptabilityOracle,
        unwanted_retry: RetrySettings,
        wanted_check: RetrySettings,
    ) -> Self {
        Self {
            conn,
            oracle,
            unwanted_retry,
            wanted_check,
        }
    }

    /// Creates the subscription. Returns true in the second slot when it is
    /// new; a new board is still empty until [`BoardEngine::backfill`] runs.
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        board_name: &str,
        now: i64,
    ) -> Result<(SubscribedBoard, bool), CoreError> {
        let (board, created) = with_transaction(self.conn, |conn| {
            subscription::create_subscription(conn, subscriber_id, board_name, now)
        })?;
        if created {
            info!(subscriber = %subscriber_id, board = %board_name, "subscribed to board");
        }
        Ok((board, created))
    }

    /// Runs `add_message` over every stored message of the board, oldest
    /// first. Messages whose oracle verdict is unavailable are skipped and
    /// picked up again on their next delivery.
    pub fn backfill(&self, board: &SubscribedBoard, now: i64) -> Result<u32, CoreError> {
        let mut linked = 0;
        for message in store::messages_in_board(self.conn, &board.board_name)? {
            match self.add_message(board, &message, now) {
                Ok(AddOutcome::Linked) => linked += 1,
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    warn!(
                        board = %board.board_name,
                        message = %message.id,
                        "backfill deferred: {}",
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(linked)
    }

    pub fn unsubscribe(&self, board: &SubscribedBoard) -> Result<bool, CoreError> {
        let deleted = with_transaction(self.conn, |conn| {
            subscription::delete_subscription(conn, &board.id)
        })?;
        if deleted {
            info!(
                subscriber = %board.subscriber_id,
                board = %board.board_name,
                "unsubscribed from board"
            );
        }
        Ok(deleted)
    }

    /// Links a message into the board, or parks it in the unwanted queue if
    /// its author is currently not wanted. The oracle is asked before anything
    /// is written, so an unavailable oracle leaves the board untouched.
    pub fn add_message(
        &self,
        board: &SubscribedBoard,
        message: &Message,
        now: i64,
    ) -> Result<AddOutcome, CoreError> {
        validate_for_board(board, message)?;
        let wanted = self
            .oracle
            .is_wanted(&board.subscriber_id, &message.author_id)?;
        self.mutate(board, |conn| {
            if wanted {
                links::delete_unwanted(conn, &board.id, &message.id)?;
                self.link_message(conn, board, message, now)
            } else {
                self.reject_message(conn, board, message, now)?;
                Ok(AddOutcome::Unwanted)
            }
        })
        .map(|outcome| {
            if outcome == AddOutcome::AlreadyLinked {
                debug!(board = %board.board_name, message = %message.id, "duplicate delivery");
            }
            outcome
        })
    }

    /// Forgets a purged message. Links that other real replies still point at
    /// stay behind as ghosts.
    pub fn remove_message(&self, board: &SubscribedBoard, message_id: &str) -> Result<bool, CoreError> {
        self.mutate(board, |conn| {
            let unwanted = links::delete_unwanted(conn, &board.id, message_id)?;
            let detached = self.detach_message(conn, board, message_id)?;
            Ok(unwanted || detached)
        })
    }

    /// Marks a thread link and every reply in it read or unread.
    pub fn mark_thread_read(
        &self,
        board: &SubscribedBoard,
        thread_id: &str,
        read: bool,
    ) -> Result<(), CoreError> {
        self.mutate(board, |conn| {
            if links::thread_link(conn, &board.id, thread_id)?.is_none() {
                return Err(CoreError::NotFound(format!("thread {}", thread_id)));
            }
            links::set_thread_read(conn, &board.id, thread_id, read)?;
            Ok(())
        })
    }

    pub fn mark_message_read(
        &self,
        board: &SubscribedBoard,
        message_id: &str,
        read: bool,
    ) -> Result<(), CoreError> {
        self.mutate(board, |conn| {
            let threads = links::set_message_read(conn, &board.id, message_id, read)?;
            if threads.is_empty() {
                return Err(CoreError::NotFound(format!("message {}", message_id)));
            }
            for thread_id in threads {
                refresh_thread(conn, &board.id, &thread_id)?;
            }
            Ok(())
        })
    }

    /// Re-asks the oracle about every unwanted message whose retry is due.
    /// A record whose mutation breaks an invariant is rolled back and counted
    /// as failed; the rest of the queue is still processed.
    pub fn retry_unwanted(&self, board: &SubscribedBoard, now: i64) -> Result<SweepReport, CoreError> {
        let mut report = SweepReport::default();
        let mut verdicts: HashMap<String, Result<bool, OracleError>> = HashMap::new();
        for unwanted in links::due_unwanted(self.conn, &board.id, now)? {
            let verdict = verdicts
                .entry(unwanted.author_id.clone())
                .or_insert_with(|| self.oracle.is_wanted(&board.subscriber_id, &unwanted.author_id))
                .clone();
            let message_id = unwanted.message_id.clone();
            match self.retry_one(board, unwanted, verdict, now, &mut report) {
                Ok(()) => {}
                Err(CoreError::InvariantViolation(detail)) => {
                    warn!(board = %board.board_name, message = %message_id, "unwanted retry failed: {}", detail);
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    fn retry_one(
        &self,
        board: &SubscribedBoard,
        unwanted: UnwantedMessageLink,
        verdict: Result<bool, OracleError>,
        now: i64,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        match verdict {
            Err(err) => {
                warn!(
                    board = %board.board_name,
                    message = %unwanted.message_id,
                    "unwanted retry deferred: {}",
                    err
                );
                report.deferred += 1;
            }
            Ok(true) => match store::get_message(self.conn, &unwanted.message_id)? {
                Some(message) if validate_for_board(board, &message).is_ok() => {
                    self.mutate(board, |conn| {
                        links::delete_unwanted(conn, &board.id, &message.id)?;
                        self.link_message(conn, board, &message, now)
                    })?;
                    report.promoted += 1;
                }
                _ => {
                    debug!(
                        board = %board.board_name,
                        message = %unwanted.message_id,
                        "unwanted message gone from board, dropping record"
                    );
                    self.mutate(board, |conn| {
                        links::delete_unwanted(conn, &board.id, &unwanted.message_id)
                    })?;
                    report.dropped += 1;
                }
            },
            Ok(false) => {
                let retry_count = unwanted.retry_count.saturating_add(1);
                let next = UnwantedMessageLink {
                    retry_count,
                    last_retry: now,
                    next_retry: now.saturating_add(self.unwanted_retry.backoff_delay(retry_count)),
                    ..unwanted
                };
                self.mutate(board, |conn| links::put_unwanted(conn, &next))?;
                report.still_unwanted += 1;
            }
        }
        Ok(())
    }

    /// Re-asks the oracle about linked messages whose wanted check is due and
    /// demotes the ones whose author is no longer wanted. Failures are
    /// isolated per link the same way as in [`BoardEngine::retry_unwanted`].
    pub fn revalidate_wanted(&self, board: &SubscribedBoard, now: i64) -> Result<SweepReport, CoreError> {
        let mut report = SweepReport::default();
        let mut verdicts: HashMap<String, Result<bool, OracleError>> = HashMap::new();
        let mut demoted: HashSet<String> = HashSet::new();
        for due in links::due_wanted_checks(self.conn, &board.id, now)? {
            if demoted.contains(&due.key.message_id) {
                continue;
            }
            let verdict = verdicts
                .entry(due.author_id.clone())
                .or_insert_with(|| self.oracle.is_wanted(&board.subscriber_id, &due.author_id))
                .clone();
            let message_id = due.key.message_id.clone();
            match self.recheck_one(board, &due, verdict, now, &mut report) {
                Ok(true) => {
                    demoted.insert(message_id);
                }
                Ok(false) => {}
                Err(CoreError::InvariantViolation(detail)) => {
                    warn!(board = %board.board_name, message = %message_id, "wanted check failed: {}", detail);
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Returns true if the message was demoted.
    fn recheck_one(
        &self,
        board: &SubscribedBoard,
        due: &links::DueWantedCheck,
        verdict: Result<bool, OracleError>,
        now: i64,
        report: &mut SweepReport,
    ) -> Result<bool, CoreError> {
        match verdict {
            Err(err) => {
                warn!(
                    board = %board.board_name,
                    message = %due.key.message_id,
                    "wanted check deferred: {}",
                    err
                );
                report.deferred += 1;
                Ok(false)
            }
            Ok(true) => {
                let check_count = due.check_count.saturating_add(1);
                let next_check = now.saturating_add(self.wanted_check.backoff_delay(check_count));
                self.mutate(board, |conn| {
                    links::reschedule_wanted_check(conn, &board.id, &due.key, check_count, now, next_check)
                })?;
                report.rechecked += 1;
                Ok(false)
            }
            Ok(false) => {
                let message_id = due.key.message_id.as_str();
                match store::get_message(self.conn, message_id)? {
                    Some(message) => {
                        self.mutate(board, |conn| self.reject_message(conn, board, &message, now))?;
                    }
                    None => {
                        self.mutate(board, |conn| self.detach_message(conn, board, message_id))?;
                    }
                }
                info!(
                    board = %board.board_name,
                    message = %message_id,
                    author = %due.author_id,
                    "author no longer wanted, message demoted"
                );
                report.demoted += 1;
                Ok(true)
            }
        }
    }

    fn mutate<T, F>(&self, board: &SubscribedBoard, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, CoreError>,
    {
        with_transaction(self.conn, |conn| {
            if subscription::get_subscription(conn, &board.id)?.is_none() {
                return Err(CoreError::NotFound(format!("subscribed board {}", board.id)));
            }
            let value = f(conn)?;
            consistency::verify_board(conn, &board.id)?;
            Ok(value)
        })
        .map_err(|err| {
            if let CoreError::InvariantViolation(detail) = &err {
                error!(board = %board.board_name, "mutation rolled back: {}", detail);
            }
            err
        })
    }

    fn link_message(
        &self,
        conn: &Connection,
        board: &SubscribedBoard,
        message: &Message,
        now: i64,
    ) -> Result<AddOutcome, CoreError> {
        let board_id = board.id.as_str();
        let mut changed = false;
        let mut touched: BTreeSet<String> = BTreeSet::new();

        // Promote ghosts that were waiting for this message.
        if let Some(thread) = links::thread_link(conn, board_id, &message.id)? {
            if !thread.common.has_message {
                links::attach_message(conn, board_id, &LinkKey::thread(&message.id), message, self.next_wanted_check(now))?;
                touched.insert(message.id.clone());
                changed = true;
            }
        }
        for reply in links::reply_links_for_message(conn, board_id, &message.id)? {
            if !reply.common.has_message {
                let key = LinkKey::reply(&reply.common.thread_id, &message.id);
                links::attach_message(conn, board_id, &key, message, self.next_wanted_check(now))?;
                touched.insert(reply.common.thread_id.clone());
                changed = true;
            }
        }
        if let Some(parent_id) = &message.parent_id {
            let guess = message.date.saturating_sub(GUESS_EPSILON_MS);
            for ghost in links::reply_links_for_message(conn, board_id, parent_id)? {
                if !ghost.common.has_message && guess < ghost.common.date {
                    let key = LinkKey::reply(&ghost.common.thread_id, parent_id);
                    links::set_link_date(conn, board_id, &key, guess)?;
                    touched.insert(ghost.common.thread_id.clone());
                    changed = true;
                }
            }
            if let Some(ghost) = links::thread_link(conn, board_id, parent_id)? {
                if !ghost.common.has_message && guess < ghost.common.date {
                    links::set_link_date(conn, board_id, &LinkKey::thread(parent_id), guess)?;
                    touched.insert(parent_id.clone());
                    changed = true;
                }
            }
        }

        if message.is_thread_root() {
            if links::thread_link(conn, board_id, &message.id)?.is_none() {
                let link = NewLink::real(LinkKey::thread(&message.id), message, self.next_wanted_check(now));
                links::insert_link(conn, board_id, &link)?;
                touched.insert(message.id.clone());
                changed = true;
            }
        } else {
            let thread_id = message.thread_root_id().to_string();
            changed |= self.ensure_thread_link(conn, board_id, &thread_id, message, now)?;
            if let Some(parent_id) = message.parent_id.as_deref() {
                if parent_id != thread_id {
                    changed |= self.ensure_parent_link(conn, board_id, &thread_id, parent_id, message, now)?;
                }
            }
            if links::reply_link(conn, board_id, &thread_id, &message.id)?.is_none() {
                let key = LinkKey::reply(&thread_id, &message.id);
                let link = NewLink::real(key, message, self.next_wanted_check(now));
                links::insert_link(conn, board_id, &link)?;
                changed = true;
            }
            touched.insert(thread_id);
        }

        for thread_id in &touched {
            refresh_thread(conn, board_id, thread_id)?;
        }
        Ok(if changed {
            AddOutcome::Linked
        } else {
            AddOutcome::AlreadyLinked
        })
    }

    /// Makes sure the reply's thread has a thread link. A thread message that
    /// is already linked here as a reply is forked into a real thread link;
    /// anything else becomes a ghost guessed from the reply.
    fn ensure_thread_link(
        &self,
        conn: &Connection,
        board_id: &str,
        thread_id: &str,
        reply: &Message,
        now: i64,
    ) -> Result<bool, CoreError> {
        if links::thread_link(conn, board_id, thread_id)?.is_some() {
            return Ok(false);
        }
        let key = LinkKey::thread(thread_id);
        let known = if links::has_real_link(conn, board_id, thread_id)? {
            store::get_message(conn, thread_id)?
        } else {
            None
        };
        let link = match known {
            Some(thread_message) => {
                debug!(thread = %thread_id, "forking linked reply into a thread");
                NewLink::real(key, &thread_message, self.next_wanted_check(now))
            }
            None => NewLink::ghost(key, guess_title(&reply.title), guess_date(reply)),
        };
        links::insert_link(conn, board_id, &link)?;
        Ok(true)
    }

    fn ensure_parent_link(
        &self,
        conn: &Connection,
        board_id: &str,
        thread_id: &str,
        parent_id: &str,
        reply: &Message,
        now: i64,
    ) -> Result<bool, CoreError> {
        if links::reply_link(conn, board_id, thread_id, parent_id)?.is_some() {
            return Ok(false);
        }
        let key = LinkKey::reply(thread_id, parent_id);
        let known = if links::has_real_link(conn, board_id, parent_id)? {
            store::get_message(conn, parent_id)?
        } else {
            None
        };
        let link = match known {
            Some(parent) => NewLink::real(key, &parent, self.next_wanted_check(now)),
            None => NewLink::ghost(key, guess_title(&reply.title), guess_date(reply)),
        };
        links::insert_link(conn, board_id, &link)?;
        Ok(true)
    }

    fn reject_message(
        &self,
        conn: &Connection,
        board: &SubscribedBoard,
        message: &Message,
        now: i64,
    ) -> Result<(), CoreError> {
        self.detach_message(conn, board, &message.id)?;
        let record = match links::get_unwanted(conn, &board.id, &message.id)? {
            Some(existing) => {
                let retry_count = existing.retry_count.saturating_add(1);
                UnwantedMessageLink {
                    retry_count,
                    last_retry: now,
                    next_retry: now.saturating_add(self.unwanted_retry.backoff_delay(retry_count)),
                    author_id: message.author_id.clone(),
                    ..existing
                }
            }
            None => UnwantedMessageLink {
                subscribed_board_id: board.id.clone(),
                message_id: message.id.clone(),
                author_id: message.author_id.clone(),
                retry_count: 0,
                last_retry: now,
                next_retry: now.saturating_add(self.unwanted_retry.initial_delay(&mut rand::thread_rng())),
            },
        };
        debug!(
            board = %board.board_name,
            message = %message.id,
            retry_count = record.retry_count,
            "message parked as unwanted"
        );
        links::put_unwanted(conn, &record)
    }

    /// Demotes or deletes every real link of `message_id`, then prunes ghosts
    /// left without real dependents.
    fn detach_message(
        &self,
        conn: &Connection,
        board: &SubscribedBoard,
        message_id: &str,
    ) -> Result<bool, CoreError> {
        let board_id = board.id.as_str();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for reply in links::reply_links_for_message(conn, board_id, message_id)? {
            if !reply.common.has_message {
                continue;
            }
            let thread_id = reply.common.thread_id.clone();
            let key = LinkKey::reply(&thread_id, message_id);
            if links::has_real_child(conn, board_id, &thread_id, message_id)? {
                links::demote_to_ghost(conn, board_id, &key)?;
            } else {
                links::delete_link(conn, board_id, &key)?;
            }
            touched.insert(thread_id);
        }
        if let Some(thread) = links::thread_link(conn, board_id, message_id)? {
            if thread.common.has_message {
                let key = LinkKey::thread(message_id);
                if links::reply_count(conn, board_id, message_id)? == 0 {
                    links::delete_link(conn, board_id, &key)?;
                } else {
                    links::demote_to_ghost(conn, board_id, &key)?;
                }
                touched.insert(message_id.to_string());
            }
        }

        for thread_id in &touched {
            prune_ghosts(conn, board_id, thread_id)?;
            refresh_thread(conn, board_id, thread_id)?;
        }
        Ok(!touched.is_empty())
    }

    fn next_wanted_check(&self, now: i64) -> i64 {
        let mut rng = rand::thread_rng();
        now.saturating_add(self.wanted_check.initial_delay(&mut rng))
    }
}

fn validate_for_board(board: &SubscribedBoard, message: &Message) -> Result<(), CoreError> {
    if !message.is_in_board(&board.board_name) {
        return Err(CoreError::InvalidArgument(format!(
            "message {} is not posted to board {}",
            message.id, board.board_name
        )));
    }
    if !message.is_thread_root() && message.thread_root_id() == message.id {
        return Err(CoreError::InvalidArgument(format!(
            "reply {} names itself as thread root",
            message.id
        )));
    }
    Ok(())
}

fn guess_title(reply_title: &str) -> String {
    let mut title = reply_title.trim();
    while let Some(rest) = title.strip_prefix(REPLY_PREFIX) {
        title = rest.trim_start();
    }
    title.to_string()
}

fn guess_date(reply: &Message) -> i64 {
    reply.date.saturating_sub(GUESS_EPSILON_MS)
}

/// Deletes ghosts in `thread_id` that no real link depends on any more.
fn prune_ghosts(conn: &Connection, board_id: &str, thread_id: &str) -> Result<(), CoreError> {
    for reply in links::replies_in_thread(conn, board_id, thread_id)? {
        if reply.common.has_message {
            continue;
        }
        if !links::has_real_child(conn, board_id, thread_id, &reply.common.message_id)? {
            links::delete_link(conn, board_id, &LinkKey::reply(thread_id, &reply.common.message_id))?;
        }
    }
    if let Some(thread) = links::thread_link(conn, board_id, thread_id)? {
        if !thread.common.has_message {
            let has_real_reply = links::replies_in_thread(conn, board_id, thread_id)?
                .iter()
                .any(|reply| reply.common.has_message);
            if !has_real_reply {
                links::delete_link(conn, board_id, &LinkKey::thread(thread_id))?;
            }
        }
    }
    Ok(())
}

/// Recomputes the derived `last_reply_date` and `thread_read` of a thread.
fn refresh_thread(conn: &Connection, board_id: &str, thread_id: &str) -> Result<(), CoreError> {
    let Some(thread) = links::thread_link(conn, board_id, thread_id)? else {
        return Ok(());
    };
    let replies = links::replies_in_thread(conn, board_id, thread_id)?;
    let last_reply_date = replies
        .iter()
        .map(|reply| reply.common.date)
        .fold(thread.common.date, i64::max);
    let thread_read = replies
        .iter()
        .fold(thread.common.read, |read, reply| read && reply.common.read);
    links::set_thread_stats(conn, board_id, thread_id, last_reply_date, thread_read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_title_strips_reply_prefixes() {
        assert_eq!(guess_title("Re: Re: hello"), "hello");
        assert_eq!(guess_title("hello"), "hello");
        assert_eq!(guess_title("  Re: spaced"), "spaced");
    }
}
