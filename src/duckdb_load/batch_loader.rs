use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::error::{BackendError, LoadError, Result};
use crate::file_load::{MalformedRowError, RawRow};
use crate::location::LocationRecord;

/// Transactional store the batch loader writes into.
///
/// Implementations execute one statement per call and must not commit on their own.
pub trait LocationSink {
    fn begin(&mut self) -> std::result::Result<(), BackendError>;
    fn insert(&mut self, record: &LocationRecord) -> std::result::Result<(), BackendError>;
    fn commit(&mut self) -> std::result::Result<(), BackendError>;
    fn rollback(&mut self) -> std::result::Result<(), BackendError>;
}

impl<S: LocationSink + ?Sized> LocationSink for &mut S {
    fn begin(&mut self) -> std::result::Result<(), BackendError> {
        (**self).begin()
    }

    fn insert(&mut self, record: &LocationRecord) -> std::result::Result<(), BackendError> {
        (**self).insert(record)
    }

    fn commit(&mut self) -> std::result::Result<(), BackendError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> std::result::Result<(), BackendError> {
        (**self).rollback()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    TransactionOpen,
    Failed,
    Done,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub rows_loaded: u64,
    pub batches_committed: u64,
    pub elapsed: Duration,
}

/// Inserts rows one at a time and commits every `batch_size` rows.
///
/// The first failure rolls back the open transaction and ends the load; rows from
/// earlier batches stay committed.
pub struct BatchLoader<S: LocationSink> {
    sink: S,
    batch_size: usize,
    state: LoaderState,
    pending: usize,
    rows_processed: u64,
    rows_committed: u64,
    batches_committed: u64,
    started: Instant,
}

impl<S: LocationSink> BatchLoader<S> {
    pub fn new(sink: S, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            state: LoaderState::Idle,
            pending: 0,
            rows_processed: 0,
            rows_committed: 0,
            batches_committed: 0,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    pub fn rows_committed(&self) -> u64 {
        self.rows_committed
    }

    /// Open the first transaction.
    pub fn start(&mut self) -> Result<()> {
        debug!(batch_size = self.batch_size, "Starting batch load");
        self.begin()
    }

    fn begin(&mut self) -> Result<()> {
        if let Err(source) = self.sink.begin() {
            self.state = LoaderState::Failed;
            return Err(LoadError::Transaction {
                rows_committed: self.rows_committed,
                source,
            });
        }
        self.state = LoaderState::TransactionOpen;
        Ok(())
    }

    /// Insert one data row into the open transaction, committing when the batch is full.
    pub fn insert_row(&mut self, row: &RawRow) -> Result<()> {
        match self.state {
            LoaderState::TransactionOpen => {}
            LoaderState::Idle => self.start()?,
            LoaderState::Failed | LoaderState::Done => {
                return Err(LoadError::Transaction {
                    rows_committed: self.rows_committed,
                    source: BackendError::new(None, "no open transaction"),
                });
            }
        }

        self.rows_processed += 1;
        let row_number = self.rows_processed;
        trace!(row = row_number, line = row.line, "Inserting row");

        let sink = &mut self.sink;
        let inserted = LocationRecord::from_fields(&row.fields).and_then(|record| sink.insert(&record));
        if let Err(source) = inserted {
            let err = LoadError::Insert {
                row: row_number,
                rows_committed: self.rows_committed,
                source,
                rollback: None,
            };
            return Err(self.abort(err));
        }

        self.pending += 1;
        if self.pending >= self.batch_size {
            self.commit_batch()?;
            self.begin()?;
        }
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<()> {
        if let Err(source) = self.sink.commit() {
            let err = LoadError::Commit {
                row: self.rows_processed,
                rows_committed: self.rows_committed,
                source,
                rollback: None,
            };
            return Err(self.abort(err));
        }

        self.rows_committed += self.pending as u64;
        self.batches_committed += 1;
        self.pending = 0;
        self.state = LoaderState::Idle;
        info!(
            rows_processed = self.rows_processed,
            batch = self.batches_committed,
            "Committed batch"
        );
        Ok(())
    }

    // Roll back whatever the open transaction holds; a failed rollback rides along on the original error
    fn abort(&mut self, err: LoadError) -> LoadError {
        let discarded = self.pending;
        self.pending = 0;
        self.state = LoaderState::Failed;

        match self.sink.rollback() {
            Ok(()) => {
                warn!(rows_discarded = discarded, "Rolled back open transaction");
                err
            }
            Err(failure) => {
                error!(error = %failure, "Rollback failed");
                err.with_rollback_failure(failure)
            }
        }
    }

    /// Record a source failure, rolling back the open transaction if there is one.
    pub fn fail_source(&mut self, malformed: MalformedRowError) -> LoadError {
        let err = LoadError::MalformedRow {
            line: malformed.line,
            reason: malformed.reason,
            rows_processed: self.rows_processed,
            rows_committed: self.rows_committed,
            rollback: None,
        };
        if self.state == LoaderState::TransactionOpen {
            self.abort(err)
        } else {
            self.state = LoaderState::Failed;
            err
        }
    }

    /// Commit the final partial batch.
    pub fn finish(&mut self) -> Result<LoadSummary> {
        if self.state == LoaderState::TransactionOpen {
            if self.pending > 0 {
                self.commit_batch()?;
            } else if let Err(failure) = self.sink.rollback() {
                // Nothing was written in this transaction, so the data is unaffected
                warn!(error = %failure, "Could not release empty transaction");
            }
        }
        self.state = LoaderState::Done;

        Ok(LoadSummary {
            rows_loaded: self.rows_committed,
            batches_committed: self.batches_committed,
            elapsed: self.started.elapsed(),
        })
    }

    /// Drive a whole row sequence through the loader.
    pub fn load<I>(mut self, rows: I) -> Result<LoadSummary>
    where
        I: IntoIterator<Item = std::result::Result<RawRow, MalformedRowError>>,
    {
        self.start()?;
        for row in rows {
            match row {
                Ok(row) => self.insert_row(&row)?,
                Err(malformed) => return Err(self.fail_source(malformed)),
            }
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Begin,
        Insert(i32),
        Commit,
        Rollback,
    }

    // Simulates transaction visibility and can be told to fail at a given step
    #[derive(Default)]
    struct ScriptedSink {
        events: Vec<Event>,
        pending: Vec<i32>,
        visible: Vec<i32>,
        max_pending: usize,
        fail_insert_of: Option<i32>,
        fail_commit_number: Option<usize>,
        fail_begin_number: Option<usize>,
        fail_rollback: bool,
        begins: usize,
        commits: usize,
    }

    impl LocationSink for ScriptedSink {
        fn begin(&mut self) -> std::result::Result<(), BackendError> {
            self.begins += 1;
            if self.fail_begin_number == Some(self.begins) {
                return Err(BackendError::new(None, "cannot begin"));
            }
            self.events.push(Event::Begin);
            Ok(())
        }

        fn insert(&mut self, record: &LocationRecord) -> std::result::Result<(), BackendError> {
            if self.fail_insert_of == Some(record.location_id) {
                return Err(BackendError::new(Some("Constraint".into()), "insert rejected"));
            }
            self.events.push(Event::Insert(record.location_id));
            self.pending.push(record.location_id);
            self.max_pending = self.max_pending.max(self.pending.len());
            Ok(())
        }

        fn commit(&mut self) -> std::result::Result<(), BackendError> {
            self.commits += 1;
            if self.fail_commit_number == Some(self.commits) {
                return Err(BackendError::new(None, "commit rejected"));
            }
            self.events.push(Event::Commit);
            self.visible.append(&mut self.pending);
            Ok(())
        }

        fn rollback(&mut self) -> std::result::Result<(), BackendError> {
            self.events.push(Event::Rollback);
            self.pending.clear();
            if self.fail_rollback {
                return Err(BackendError::new(None, "rollback rejected"));
            }
            Ok(())
        }
    }

    fn row(id: i32) -> std::result::Result<RawRow, MalformedRowError> {
        Ok(RawRow {
            line: id as u64 + 2,
            fields: vec![
                id.to_string(),
                "US".into(),
                "CA".into(),
                "Springfield".into(),
                "12345".into(),
                "37.7".into(),
                "-122.4".into(),
                "0".into(),
                "0".into(),
            ],
        })
    }

    fn rows(count: i32) -> impl Iterator<Item = std::result::Result<RawRow, MalformedRowError>> {
        (1..=count).map(row)
    }

    #[test]
    fn test_commits_every_batch_and_the_remainder() {
        let mut sink = ScriptedSink::default();
        let summary = BatchLoader::new(&mut sink, 2).load(rows(3)).unwrap();

        assert_eq!(summary.rows_loaded, 3);
        assert_eq!(summary.batches_committed, 2);
        assert_eq!(sink.visible, vec![1, 2, 3]);
        assert_eq!(
            sink.events,
            vec![
                Event::Begin,
                Event::Insert(1),
                Event::Insert(2),
                Event::Commit,
                Event::Begin,
                Event::Insert(3),
                Event::Commit,
            ]
        );
    }

    #[test]
    fn test_empty_input_commits_nothing() {
        let mut sink = ScriptedSink::default();
        let summary = BatchLoader::new(&mut sink, 10).load(rows(0)).unwrap();

        assert_eq!(summary.rows_loaded, 0);
        assert_eq!(summary.batches_committed, 0);
        assert_eq!(sink.commits, 0);
        assert_eq!(sink.events, vec![Event::Begin, Event::Rollback]);
    }

    #[test]
    fn test_input_ending_on_a_boundary_releases_the_empty_transaction() {
        let mut sink = ScriptedSink::default();
        let summary = BatchLoader::new(&mut sink, 2).load(rows(4)).unwrap();

        assert_eq!(summary.batches_committed, 2);
        assert_eq!(sink.events.last(), Some(&Event::Rollback));
        assert_eq!(sink.visible, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_failure_rolls_back_the_current_batch() {
        let mut sink = ScriptedSink {
            fail_insert_of: Some(4),
            ..ScriptedSink::default()
        };
        let err = BatchLoader::new(&mut sink, 3).load(rows(6)).unwrap_err();

        match err {
            LoadError::Insert {
                row,
                rows_committed,
                rollback,
                ..
            } => {
                assert_eq!(row, 4);
                assert_eq!(rows_committed, 3);
                assert!(rollback.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.visible, vec![1, 2, 3]);
        assert_eq!(sink.events.last(), Some(&Event::Rollback));
    }

    #[test]
    fn test_commit_failure_attempts_rollback_without_retry() {
        let mut sink = ScriptedSink {
            fail_commit_number: Some(2),
            ..ScriptedSink::default()
        };
        let err = BatchLoader::new(&mut sink, 2).load(rows(5)).unwrap_err();

        assert_eq!(err.exit_code(), 8);
        assert_eq!(err.rows_processed(), Some(4));
        assert_eq!(err.rows_committed(), Some(2));
        assert_eq!(sink.commits, 2);
        assert_eq!(sink.visible, vec![1, 2]);
        assert_eq!(sink.events.last(), Some(&Event::Rollback));
    }

    #[test]
    fn test_begin_failure_is_a_transaction_error() {
        let mut sink = ScriptedSink {
            fail_begin_number: Some(2),
            ..ScriptedSink::default()
        };
        let err = BatchLoader::new(&mut sink, 2).load(rows(5)).unwrap_err();

        assert!(matches!(err, LoadError::Transaction { rows_committed: 2, .. }));
        assert_eq!(sink.visible, vec![1, 2]);
    }

    #[test]
    fn test_rollback_failure_is_attached_not_substituted() {
        let mut sink = ScriptedSink {
            fail_insert_of: Some(1),
            fail_rollback: true,
            ..ScriptedSink::default()
        };
        let err = BatchLoader::new(&mut sink, 2).load(rows(2)).unwrap_err();

        assert_eq!(err.exit_code(), 7);
        assert_eq!(
            err.rollback_failure().map(|e| e.message.as_str()),
            Some("rollback rejected")
        );
    }

    #[test]
    fn test_malformed_value_is_an_insert_error() {
        let mut sink = ScriptedSink::default();
        let bad = Ok(RawRow {
            line: 4,
            fields: vec!["x".into(); 9],
        });
        let err = BatchLoader::new(&mut sink, 5)
            .load(vec![row(1), bad, row(3)])
            .unwrap_err();

        assert!(matches!(err, LoadError::Insert { row: 2, .. }));
        assert!(sink.visible.is_empty());
    }

    #[test]
    fn test_malformed_source_row_rolls_back_the_open_batch() {
        let mut sink = ScriptedSink::default();
        let broken = Err(MalformedRowError {
            line: 6,
            reason: "unterminated quoted field".into(),
        });
        let err = BatchLoader::new(&mut sink, 2)
            .load(vec![row(1), row(2), row(3), broken])
            .unwrap_err();

        match err {
            LoadError::MalformedRow {
                line,
                rows_processed,
                rows_committed,
                ..
            } => {
                assert_eq!(line, 6);
                assert_eq!(rows_processed, 3);
                assert_eq!(rows_committed, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.visible, vec![1, 2]);
    }

    #[test]
    fn test_pending_rows_never_exceed_batch_size() {
        let mut sink = ScriptedSink::default();
        let summary = BatchLoader::new(&mut sink, 100).load(rows(20_000)).unwrap();

        assert_eq!(summary.rows_loaded, 20_000);
        assert_eq!(summary.batches_committed, 200);
        assert_eq!(sink.max_pending, 100);
    }

    #[test]
    fn test_rows_after_failure_are_refused() {
        let mut sink = ScriptedSink {
            fail_insert_of: Some(1),
            ..ScriptedSink::default()
        };
        let mut loader = BatchLoader::new(&mut sink, 2);
        loader.start().unwrap();
        let first = row(1).unwrap();
        assert!(loader.insert_row(&first).is_err());
        assert_eq!(loader.state(), LoaderState::Failed);
        assert!(matches!(
            loader.insert_row(&row(2).unwrap()),
            Err(LoadError::Transaction { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_visible_rows_are_whole_batches(
            batch_size in 1usize..12,
            len in 0i32..60,
            fail_at in proptest::option::of(1i32..60),
        ) {
            let mut sink = ScriptedSink {
                fail_insert_of: fail_at,
                ..ScriptedSink::default()
            };
            let result = BatchLoader::new(&mut sink, batch_size).load(rows(len));

            let expected: Vec<i32> = match fail_at {
                Some(r) if r <= len => {
                    prop_assert!(result.is_err());
                    let batch_start = ((r - 1) as usize / batch_size) * batch_size;
                    (1..=batch_start as i32).collect()
                }
                _ => {
                    let summary = result.unwrap();
                    prop_assert_eq!(summary.rows_loaded, len as u64);
                    prop_assert_eq!(
                        summary.batches_committed,
                        (len as u64).div_ceil(batch_size as u64)
                    );
                    (1..=len).collect()
                }
            };
            prop_assert_eq!(sink.visible, expected);
            prop_assert!(sink.max_pending <= batch_size);
        }
    }
}
