//! Journal integration: success-hook queue, consumer task and replay

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use super::handler::Dispatcher;
use super::{CommandError, flag};
use crate::journal::{FileJournal, JournalError};
use crate::session::Session;
use crate::value::Value;

/// Queue depth between the success hook and the journal consumer.
pub const JOURNAL_QUEUE_CAPACITY: usize = 1000;

/// Flags that keep a command out of the journal.
pub const NON_JOURNALABLE: u8 = flag::TIME_DEPENDENT | flag::READ;

/// One successfully completed command, as handed to the success hook.
#[derive(Debug)]
pub struct JournalRecord {
    pub flags: u8,
    pub body: Vec<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    #[error("cannot restore command: {0}")]
    Command(CommandError),
}

/// Registers the journal's success hook on the dispatcher. Delivery is
/// fire-and-forget: a full or closed queue drops the record and the client
/// reply is unaffected.
pub fn attach_hook(dispatcher: &mut Dispatcher, tx: mpsc::Sender<JournalRecord>) {
    dispatcher.add_success_hook(Box::new(move |flags, body| {
        if flag::has(flags, NON_JOURNALABLE) {
            return;
        }
        let record = JournalRecord {
            flags,
            body: body.iter().map(|v| v.as_bytes().to_vec()).collect(),
        };
        if let Err(e) = tx.try_send(record) {
            warn!("cannot queue journal record: {}", e);
        }
    }));
}

/// Replays every committed record through the dispatcher before the server
/// accepts traffic. Any command failure aborts startup.
pub fn restore(
    journal: &mut FileJournal,
    dispatcher: &Dispatcher,
    session: &Session,
) -> Result<usize, RestoreError> {
    let mut restored = 0usize;
    loop {
        match journal.next_entry() {
            Ok(entry) => {
                let body: Vec<Value> = entry.into_iter().map(Value::new).collect();
                dispatcher
                    .dispatch(session, &body)
                    .map_err(RestoreError::Command)?;
                restored += 1;
            }
            Err(JournalError::Empty) => return Ok(restored),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Single consumer owning the journal file: drains the hook queue in order
/// and appends write-flagged records with a commit per record. Journal
/// failures are logged and skipped.
pub struct JournalTask {
    journal: FileJournal,
    rx: mpsc::Receiver<JournalRecord>,
}

impl JournalTask {
    pub fn new(journal: FileJournal, rx: mpsc::Receiver<JournalRecord>) -> Self {
        Self { journal, rx }
    }

    pub async fn run(mut self, mut quit: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = quit.changed() => {
                    debug!("journal consumer shutting down");
                    return;
                }
                record = self.rx.recv() => {
                    let Some(record) = record else { return };
                    self.append(record);
                }
            }
        }
    }

    fn append(&mut self, record: JournalRecord) {
        if flag::has(record.flags, NON_JOURNALABLE) {
            return;
        }
        if let Err(e) = self.journal.write(&record.body) {
            error!("cannot write to journal: {}", e);
            return;
        }
        if let Err(e) = self.journal.commit() {
            error!("cannot commit the journal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::registry::RegistryOptions;
    use crate::commands::build_registry;
    use crate::store::Storage;
    use crate::wire::Payload;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_path() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "cachette_adapter_{}_{}.dat",
            std::process::id(),
            n
        ))
    }

    fn drained(path: &PathBuf) -> FileJournal {
        let mut journal = FileJournal::open(path).unwrap();
        while !matches!(journal.next_entry(), Err(JournalError::Empty)) {}
        journal
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(build_registry(&RegistryOptions::default()).unwrap())
    }

    fn body(parts: &[&str]) -> Vec<Value> {
        parts.iter().map(|s| Value::from(*s)).collect()
    }

    #[tokio::test]
    async fn test_mutations_survive_a_restart() {
        let path = temp_path();
        let _cleanup = Cleanup(path.clone());

        // first life: journal two writes, a read must not be journaled
        {
            let mut d = dispatcher();
            let (tx, rx) = mpsc::channel(JOURNAL_QUEUE_CAPACITY);
            attach_hook(&mut d, tx);
            let session = Session::new(Arc::new(Storage::new()));

            d.dispatch(&session, &body(&["SET", "k", "v"])).unwrap();
            d.dispatch(&session, &body(&["HSET", "h", "f", "x"])).unwrap();
            d.dispatch(&session, &body(&["GET", "k"])).unwrap();
            drop(d);

            let mut task = JournalTask::new(drained(&path), rx);
            while let Some(record) = task.rx.recv().await {
                task.append(record);
            }
        }

        // second life: replay into a fresh storage
        {
            let d = dispatcher();
            let storage = Arc::new(Storage::new());
            let session = Session::privileged(storage.clone());
            let mut journal = FileJournal::open(&path).unwrap();
            let restored = restore(&mut journal, &d, &session).unwrap();
            assert_eq!(restored, 2);

            let conn = Session::new(storage);
            assert_eq!(
                d.dispatch(&conn, &body(&["GET", "k"])).unwrap(),
                Payload::Value(Value::from("v"))
            );
            assert_eq!(
                d.dispatch(&conn, &body(&["HGET", "h", "f"])).unwrap(),
                Payload::Value(Value::from("x"))
            );
        }
    }

    #[tokio::test]
    async fn test_restore_aborts_on_bad_record() {
        let path = temp_path();
        let _cleanup = Cleanup(path.clone());
        {
            let mut journal = drained(&path);
            journal.write(&[b"BOGUS".to_vec()]).unwrap();
            journal.commit().unwrap();
        }

        let d = dispatcher();
        let session = Session::privileged(Arc::new(Storage::new()));
        let mut journal = FileJournal::open(&path).unwrap();
        assert!(matches!(
            restore(&mut journal, &d, &session),
            Err(RestoreError::Command(CommandError::UnknownCommand))
        ));
    }

    struct Cleanup(PathBuf);

    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}
