//! Entry point used by the fetch pipeline, the retry scheduler and the UI
//! layers.
//!
//! Mutations of one subscribed board are serialized by that board's lock;
//! availability bookkeeping of one author by that author's lock. No method
//! holds an author lock while taking a board lock.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::availability::{self, AuthorAvailability, StoreProbe};
use crate::config::ClientConfig;
use crate::db::{self, with_transaction, SyncStore};
use crate::diagnostics;
use crate::engine::BoardEngine;
use crate::error::CoreError;
use crate::fetch::{FetchFailure, FetchPipeline};
use crate::locks::{acquire, LockTable};
use crate::models::{
    AddOutcome, BoardMessageLink, DeliveryReport, Message, ReplyLink, SubscribedBoard,
    SweepReport, ThreadSummary,
};
use crate::oracle::AcceptabilityOracle;
use crate::query;
use crate::store::{self, MessageListStatus};
use crate::subscription;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct ForumClient {
    config: ClientConfig,
    store: SyncStore,
    oracle: Arc<dyn AcceptabilityOracle>,
    board_locks: LockTable<String>,
    author_locks: LockTable<String>,
}

impl ForumClient {
    pub fn open(config: ClientConfig, oracle: Arc<dyn AcceptabilityOracle>) -> Result<Self, CoreError> {
        config.validate()?;
        let store = db::open_store(&config.store_path)?;
        info!(store = %store.path().display(), "board sync store opened");
        Ok(Self {
            config,
            store,
            oracle,
            board_locks: LockTable::new(),
            author_locks: LockTable::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn connect(&self) -> Result<Connection, CoreError> {
        self.store.connect()
    }

    fn engine<'a>(&'a self, conn: &'a Connection) -> BoardEngine<'a> {
        BoardEngine::new(
            conn,
            self.oracle.as_ref(),
            self.config.unwanted_retry,
            self.config.wanted_check,
        )
    }

    pub fn subscribe(&self, subscriber_id: &str, board_name: &str) -> Result<SubscribedBoard, CoreError> {
        let now = now_ms();
        let conn = self.connect()?;
        let engine = self.engine(&conn);
        let (board, created) = engine.subscribe(subscriber_id, board_name, now)?;
        if created {
            let handle = self.board_locks.handle(&board.id);
            let _guard = acquire(&handle);
            let linked = engine
                .backfill(&board, now)
                .map_err(|err| self.report_failure(err))?;
            debug!(board = %board_name, linked, "backfill finished");
        }
        Ok(board)
    }

    pub fn unsubscribe(&self, subscriber_id: &str, board_name: &str) -> Result<bool, CoreError> {
        let conn = self.connect()?;
        let Some(board) = subscription::find_subscription(&conn, subscriber_id, board_name)? else {
            return Ok(false);
        };
        let deleted = {
            let handle = self.board_locks.handle(&board.id);
            let _guard = acquire(&handle);
            self.engine(&conn).unsubscribe(&board)?
        };
        self.board_locks.forget(&board.id);
        Ok(deleted)
    }

    pub fn subscription(&self, subscriber_id: &str, board_name: &str) -> Result<Option<SubscribedBoard>, CoreError> {
        let conn = self.connect()?;
        subscription::find_subscription(&conn, subscriber_id, board_name)
    }

    /// Stores a decoded message and links it into every subscribed board it
    /// was posted to.
    pub fn on_message_decoded(&self, message: &Message) -> Result<DeliveryReport, CoreError> {
        let now = now_ms();
        let conn = self.connect()?;
        let newly_stored = with_transaction(&conn, |conn| store::store_message(conn, message, now))?;
        let mut report = DeliveryReport {
            newly_stored,
            ..DeliveryReport::default()
        };
        for board_name in &message.board_names {
            for board in subscription::subscriptions_for_board(&conn, board_name)? {
                let handle = self.board_locks.handle(&board.id);
                let _guard = acquire(&handle);
                match self.engine(&conn).add_message(&board, message, now) {
                    Ok(outcome) => report.record(outcome),
                    Err(err) if err.is_transient() => {
                        warn!(
                            board = %board.board_name,
                            message = %message.id,
                            "message left unlinked until redelivery: {}",
                            err
                        );
                        report.deferred += 1;
                    }
                    Err(CoreError::NotFound(_)) => {
                        debug!(board = %board.board_name, "board unsubscribed during delivery");
                    }
                    Err(err) => {
                        self.report_failure(err);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    pub fn on_message_list_fetched(&self, author_id: &str, index: i64) -> Result<AuthorAvailability, CoreError> {
        self.update_availability(author_id, index, MessageListStatus::Fetched)
    }

    pub fn on_message_list_removed(&self, author_id: &str, index: i64) -> Result<AuthorAvailability, CoreError> {
        let handle = self.author_locks.handle(&author_id.to_string());
        let _guard = acquire(&handle);
        let conn = self.connect()?;
        with_transaction(&conn, |conn| {
            store::delete_message_list(conn, author_id, index)?;
            let mut tracker = availability::load_availability(conn, author_id)?;
            tracker.on_index_removed(index, &StoreProbe::new(conn))?;
            availability::save_availability(conn, &tracker)?;
            Ok(tracker)
        })
        .map_err(|err| self.report_failure(err))
    }

    pub fn on_fetch_failed(&self, author_id: &str, index: i64, reason: FetchFailure) -> Result<(), CoreError> {
        match reason {
            FetchFailure::ParsingFailed => {
                warn!(author = %author_id, index, "message list failed to parse");
                self.update_availability(author_id, index, MessageListStatus::ParseFailed)?;
            }
            FetchFailure::NotFound => {
                debug!(author = %author_id, index, "message list not found");
            }
            FetchFailure::Cancelled => {
                debug!(author = %author_id, index, "message list fetch cancelled");
            }
        }
        Ok(())
    }

    fn update_availability(
        &self,
        author_id: &str,
        index: i64,
        status: MessageListStatus,
    ) -> Result<AuthorAvailability, CoreError> {
        let handle = self.author_locks.handle(&author_id.to_string());
        let _guard = acquire(&handle);
        let conn = self.connect()?;
        let now = now_ms();
        with_transaction(&conn, |conn| {
            store::record_message_list(conn, author_id, index, status, now)?;
            let mut tracker = availability::load_availability(conn, author_id)?;
            tracker.on_index_fetched(index, &StoreProbe::new(conn))?;
            availability::save_availability(conn, &tracker)?;
            Ok(tracker)
        })
        .map_err(|err| self.report_failure(err))
    }

    pub fn availability(&self, author_id: &str) -> Result<AuthorAvailability, CoreError> {
        let handle = self.author_locks.handle(&author_id.to_string());
        let _guard = acquire(&handle);
        let conn = self.connect()?;
        availability::load_availability(&conn, author_id)
    }

    /// Asks the pipeline for the next newer list and, if there is a gap below
    /// the known range, the next older one.
    pub fn request_next_fetches(&self, author_id: &str, pipeline: &dyn FetchPipeline) -> Result<(), CoreError> {
        let tracker = self.availability(author_id)?;
        pipeline.fetch_message_list(author_id, tracker.next_new_index(), true);
        if let Some(older) = tracker.next_old_index() {
            pipeline.fetch_message_list(author_id, older, false);
        }
        Ok(())
    }

    /// Drops every message of an author from the store and from all boards.
    pub fn purge_author(&self, author_id: &str) -> Result<usize, CoreError> {
        let conn = self.connect()?;
        let messages = store::messages_by_author(&conn, author_id)?;
        for message in &messages {
            self.unlink_everywhere(&conn, message)?;
            with_transaction(&conn, |conn| store::delete_message(conn, &message.id))?;
        }
        {
            let handle = self.author_locks.handle(&author_id.to_string());
            let _guard = acquire(&handle);
            with_transaction(&conn, |conn| store::delete_author_lists(conn, author_id))?;
        }
        info!(author = %author_id, messages = messages.len(), "author purged");
        Ok(messages.len())
    }

    pub fn purge_message(&self, message_id: &str) -> Result<bool, CoreError> {
        let conn = self.connect()?;
        let Some(message) = store::get_message(&conn, message_id)? else {
            return Ok(false);
        };
        self.unlink_everywhere(&conn, &message)?;
        with_transaction(&conn, |conn| store::delete_message(conn, &message.id))
    }

    fn unlink_everywhere(&self, conn: &Connection, message: &Message) -> Result<(), CoreError> {
        for board_name in &message.board_names {
            for board in subscription::subscriptions_for_board(conn, board_name)? {
                let handle = self.board_locks.handle(&board.id);
                let _guard = acquire(&handle);
                match self.engine(conn).remove_message(&board, &message.id) {
                    Ok(_) | Err(CoreError::NotFound(_)) => {}
                    Err(err @ CoreError::InvariantViolation(_)) => {
                        self.report_failure(err);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// One pass of the unwanted retry queue and the wanted re-check over every
    /// subscribed board. Safe to run on any schedule.
    pub fn run_retry_sweep(&self, now: i64) -> Result<SweepReport, CoreError> {
        let conn = self.connect()?;
        let mut report = SweepReport::default();
        for board in subscription::all_subscriptions(&conn)? {
            let handle = self.board_locks.handle(&board.id);
            let _guard = acquire(&handle);
            if subscription::get_subscription(&conn, &board.id)?.is_none() {
                continue;
            }
            let engine = self.engine(&conn);
            let swept = engine
                .retry_unwanted(&board, now)
                .and_then(|mut swept| {
                    swept.merge(engine.revalidate_wanted(&board, now)?);
                    Ok(swept)
                });
            match swept {
                Ok(swept) => {
                    if swept.failed > 0 {
                        self.report_failure(CoreError::InvariantViolation(format!(
                            "{} sweep mutations rolled back on board {} ({})",
                            swept.failed, board.board_name, board.id
                        )));
                    }
                    report.merge(swept);
                }
                Err(CoreError::NotFound(_)) => {
                    debug!(board = %board.board_name, "board unsubscribed during sweep");
                }
                Err(err) if err.is_transient() => {
                    warn!(board = %board.board_name, "sweep deferred: {}", err);
                }
                Err(err @ CoreError::InvariantViolation(_)) => {
                    self.report_failure(err);
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if report != SweepReport::default() {
            info!(
                promoted = report.promoted,
                still_unwanted = report.still_unwanted,
                rechecked = report.rechecked,
                demoted = report.demoted,
                deferred = report.deferred,
                failed = report.failed,
                "retry sweep finished"
            );
        }
        Ok(report)
    }

    pub fn add_message_to(&self, board: &SubscribedBoard, message: &Message) -> Result<AddOutcome, CoreError> {
        let conn = self.connect()?;
        let handle = self.board_locks.handle(&board.id);
        let _guard = acquire(&handle);
        self.engine(&conn)
            .add_message(board, message, now_ms())
            .map_err(|err| self.report_failure(err))
    }

    pub fn mark_thread_read(&self, board: &SubscribedBoard, thread_id: &str, read: bool) -> Result<(), CoreError> {
        let conn = self.connect()?;
        let handle = self.board_locks.handle(&board.id);
        let _guard = acquire(&handle);
        self.engine(&conn)
            .mark_thread_read(board, thread_id, read)
            .map_err(|err| self.report_failure(err))
    }

    pub fn mark_message_read(&self, board: &SubscribedBoard, message_id: &str, read: bool) -> Result<(), CoreError> {
        let conn = self.connect()?;
        let handle = self.board_locks.handle(&board.id);
        let _guard = acquire(&handle);
        self.engine(&conn)
            .mark_message_read(board, message_id, read)
            .map_err(|err| self.report_failure(err))
    }

    pub fn list_threads(&self, board: &SubscribedBoard, limit: i64, offset: i64) -> Result<Vec<ThreadSummary>, CoreError> {
        let conn = self.connect()?;
        query::list_threads(&conn, &board.id, limit, offset)
    }

    pub fn list_replies(&self, board: &SubscribedBoard, thread_id: &str) -> Result<Vec<ReplyLink>, CoreError> {
        let conn = self.connect()?;
        query::list_replies(&conn, &board.id, thread_id)
    }

    pub fn unread_count(&self, board: &SubscribedBoard) -> Result<i64, CoreError> {
        let conn = self.connect()?;
        query::unread_count(&conn, &board.id)
    }

    pub fn link_by_index(&self, board: &SubscribedBoard, index: i64) -> Result<BoardMessageLink, CoreError> {
        let conn = self.connect()?;
        query::link_by_index(&conn, &board.id, index)
    }

    pub fn links_after_index(
        &self,
        board: &SubscribedBoard,
        after_index: i64,
        limit: i64,
    ) -> Result<Vec<BoardMessageLink>, CoreError> {
        let conn = self.connect()?;
        query::links_after_index(&conn, &board.id, after_index, limit)
    }

    pub fn board_message_by_index(&self, board_name: &str, index: i64) -> Result<Option<Message>, CoreError> {
        let conn = self.connect()?;
        store::board_message_by_index(&conn, board_name, index)
    }

    /// Sends invariant violations to the diagnostics log and hands the error
    /// back to the caller.
    fn report_failure(&self, err: CoreError) -> CoreError {
        if let CoreError::InvariantViolation(detail) = &err {
            if let Some(dir) = &self.config.diagnostics_dir {
                if let Err(io_err) = diagnostics::log_event(dir, "invariant_violation", detail) {
                    warn!("diagnostics log write failed: {}", io_err);
                }
            }
        }
        err
    }
}
