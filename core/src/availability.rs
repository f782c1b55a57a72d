//! Per-author bookkeeping of which message-list indices are known to exist
//! contiguously.
//!
//! The tracker only ever describes one run of indices. When a fetched index
//! is disjoint from the current run, the run is replaced by the newest one:
//! older fragments stay in the store but stop being reported, so fetch
//! scheduling keeps favouring new content.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::store;

/// Existence check used by the greedy expansion. Backed by the local store,
/// so it is cheap and synchronous.
pub trait IndexProbe {
    fn message_list_exists(&self, author_id: &str, index: i64) -> Result<bool, CoreError>;
}

pub struct StoreProbe<'a> {
    conn: &'a Connection,
}

impl<'a> StoreProbe<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IndexProbe for StoreProbe<'_> {
    fn message_list_exists(&self, author_id: &str, index: i64) -> Result<bool, CoreError> {
        store::message_list_exists(self.conn, author_id, index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorAvailability {
    pub author_id: String,
    pub lowest_index: i64,
    pub highest_index: i64,
}

impl AuthorAvailability {
    pub fn new(author_id: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            lowest_index: -1,
            highest_index: -1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.highest_index < 0
    }

    pub fn range(&self) -> (i64, i64) {
        (self.lowest_index, self.highest_index)
    }

    pub fn contains(&self, index: i64) -> bool {
        !self.is_empty() && self.lowest_index <= index && index <= self.highest_index
    }

    /// Hint for "fetch something newer".
    pub fn next_new_index(&self) -> i64 {
        self.highest_index + 1
    }

    /// Hint for "fetch something older"; `None` once index 0 is covered or
    /// nothing is known.
    pub fn next_old_index(&self) -> Option<i64> {
        if self.lowest_index <= 0 {
            None
        } else {
            Some(self.lowest_index - 1)
        }
    }

    pub fn on_index_fetched(&mut self, index: i64, probe: &dyn IndexProbe) -> Result<(), CoreError> {
        if index < 0 {
            return Err(CoreError::InvalidArgument(format!(
                "message list index {} is negative",
                index
            )));
        }
        if self.contains(index) {
            debug!(
                author = %self.author_id,
                index,
                "message list index already inside the contiguous range"
            );
            return Ok(());
        }
        if !self.is_empty() && index == self.highest_index + 1 {
            self.highest_index = index;
            self.expand_upward(probe)?;
        } else if !self.is_empty() && index == self.lowest_index - 1 {
            self.lowest_index = index;
            self.expand_downward(probe)?;
        } else {
            if !self.is_empty() {
                debug!(
                    author = %self.author_id,
                    index,
                    lowest = self.lowest_index,
                    highest = self.highest_index,
                    "disjoint message list index, restarting range"
                );
            }
            self.lowest_index = index;
            self.highest_index = index;
            self.expand_upward(probe)?;
            self.expand_downward(probe)?;
        }
        Ok(())
    }

    pub fn on_index_removed(&mut self, index: i64, probe: &dyn IndexProbe) -> Result<(), CoreError> {
        if !self.contains(index) {
            return Ok(());
        }
        if self.lowest_index == index && self.highest_index == index {
            self.lowest_index = -1;
            self.highest_index = -1;
            // A neighbour may still be present; newer first.
            for neighbour in [index + 1, index - 1] {
                if neighbour >= 0 && probe.message_list_exists(&self.author_id, neighbour)? {
                    return self.on_index_fetched(neighbour, probe);
                }
            }
            return Ok(());
        }
        if index == self.highest_index {
            self.highest_index = index - 1;
        } else if index == self.lowest_index {
            self.lowest_index = index + 1;
        } else {
            warn!(
                author = %self.author_id,
                index,
                lowest = self.lowest_index,
                highest = self.highest_index,
                "removal inside a contiguous range"
            );
            return Err(CoreError::InvariantViolation(format!(
                "message list {} of {} removed from inside contiguous range [{}, {}]",
                index, self.author_id, self.lowest_index, self.highest_index
            )));
        }
        Ok(())
    }

    fn expand_upward(&mut self, probe: &dyn IndexProbe) -> Result<(), CoreError> {
        while probe.message_list_exists(&self.author_id, self.highest_index + 1)? {
            self.highest_index += 1;
        }
        Ok(())
    }

    fn expand_downward(&mut self, probe: &dyn IndexProbe) -> Result<(), CoreError> {
        while self.lowest_index > 0
            && probe.message_list_exists(&self.author_id, self.lowest_index - 1)?
        {
            self.lowest_index -= 1;
        }
        Ok(())
    }
}

pub fn load_availability(conn: &Connection, author_id: &str) -> Result<AuthorAvailability, CoreError> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT lowest_index, highest_index FROM author_availability WHERE author_id = ?1;",
            params![author_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(match row {
        Some((lowest_index, highest_index)) => AuthorAvailability {
            author_id: author_id.to_string(),
            lowest_index,
            highest_index,
        },
        None => AuthorAvailability::new(author_id),
    })
}

pub fn save_availability(conn: &Connection, availability: &AuthorAvailability) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO author_availability (author_id, lowest_index, highest_index) \
         VALUES (?1, ?2, ?3) \
         ON CONFLICT(author_id) DO UPDATE SET \
           lowest_index = excluded.lowest_index, \
           highest_index = excluded.highest_index;",
        params![
            availability.author_id,
            availability.lowest_index,
            availability.highest_index
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct SetProbe {
        present: RefCell<BTreeSet<i64>>,
    }

    impl SetProbe {
        fn add(&self, index: i64) {
            self.present.borrow_mut().insert(index);
        }

        fn remove(&self, index: i64) {
            self.present.borrow_mut().remove(&index);
        }
    }

    impl IndexProbe for SetProbe {
        fn message_list_exists(&self, _author_id: &str, index: i64) -> Result<bool, CoreError> {
            Ok(self.present.borrow().contains(&index))
        }
    }

    fn fetch(tracker: &mut AuthorAvailability, probe: &SetProbe, index: i64) {
        probe.add(index);
        tracker.on_index_fetched(index, probe).expect("fetched");
    }

    fn remove(tracker: &mut AuthorAvailability, probe: &SetProbe, index: i64) {
        probe.remove(index);
        tracker.on_index_removed(index, probe).expect("removed");
    }

    #[test]
    fn out_of_order_indices_converge() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        fetch(&mut tracker, &probe, 5);
        assert_eq!(tracker.range(), (5, 5));
        fetch(&mut tracker, &probe, 3);
        assert_eq!(tracker.range(), (3, 3));
        fetch(&mut tracker, &probe, 4);
        assert_eq!(tracker.range(), (3, 5));
        fetch(&mut tracker, &probe, 6);
        assert_eq!(tracker.range(), (3, 6));

        remove(&mut tracker, &probe, 6);
        assert_eq!(tracker.range(), (3, 5));
        remove(&mut tracker, &probe, 3);
        remove(&mut tracker, &probe, 4);
        assert_eq!(tracker.range(), (5, 5));
        remove(&mut tracker, &probe, 5);
        assert_eq!(tracker.range(), (-1, -1));
        assert!(tracker.is_empty());
    }

    #[test]
    fn first_index_zero_starts_a_range() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        fetch(&mut tracker, &probe, 0);
        assert_eq!(tracker.range(), (0, 0));
        assert_eq!(tracker.next_new_index(), 1);
        assert_eq!(tracker.next_old_index(), None);
    }

    #[test]
    fn disjoint_fragment_prefers_newest_run() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        for index in 0..3 {
            fetch(&mut tracker, &probe, index);
        }
        assert_eq!(tracker.range(), (0, 2));
        fetch(&mut tracker, &probe, 10);
        assert_eq!(tracker.range(), (10, 10));
        assert_eq!(tracker.next_old_index(), Some(9));
        assert_eq!(tracker.next_new_index(), 11);
    }

    #[test]
    fn greedy_expansion_absorbs_earlier_fragments() {
        let probe = SetProbe::default();
        probe.add(4);
        probe.add(5);
        probe.add(1);
        let mut tracker = AuthorAvailability::new("alice");
        fetch(&mut tracker, &probe, 3);
        assert_eq!(tracker.range(), (3, 5));
        fetch(&mut tracker, &probe, 2);
        assert_eq!(tracker.range(), (1, 5));
    }

    #[test]
    fn removing_sole_index_finds_neighbour() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        fetch(&mut tracker, &probe, 7);
        // 8 shows up in the store without a fetch notification
        probe.add(8);
        remove(&mut tracker, &probe, 7);
        assert_eq!(tracker.range(), (8, 8));
    }

    #[test]
    fn removal_inside_range_is_an_invariant_violation() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        for index in 0..3 {
            fetch(&mut tracker, &probe, index);
        }
        probe.remove(1);
        let err = tracker.on_index_removed(1, &probe);
        assert!(matches!(err, Err(CoreError::InvariantViolation(_))));
        assert_eq!(tracker.range(), (0, 2));
    }

    #[test]
    fn removal_outside_range_is_ignored() {
        let probe = SetProbe::default();
        let mut tracker = AuthorAvailability::new("alice");
        fetch(&mut tracker, &probe, 4);
        tracker.on_index_removed(9, &probe).expect("ignored");
        assert_eq!(tracker.range(), (4, 4));
    }
}
