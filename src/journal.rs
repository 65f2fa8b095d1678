//! Crash-safe append-only command journal
//!
//! Every record is guarded by a leading status byte that moves through
//! initiated → progress → committed (or rolled-back). Only committed
//! records are visible on replay; a crash anywhere before the committed
//! overwrite leaves the record invisible, and the next append overwrites
//! the torn tail.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

const STATUS_NOT_CREATED: u8 = 0;
const STATUS_INITIATED: u8 = 1;
const STATUS_PROGRESS: u8 = 2;
const STATUS_COMMITTED: u8 = 3;
const STATUS_ROLLED_BACK: u8 = 4;

const STATUS_LEN: u64 = 1;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// Replay sentinel: no further committed records. Not a failure.
    #[error("empty journal")]
    Empty,

    #[error("the journal is not empty")]
    NotEmpty,
}

/// File-backed journal. Single-writer: replay must be drained (one `Empty`
/// observed) before the first append, which then starts exactly where the
/// reader stopped.
pub struct FileJournal {
    file: File,
    pos: u64,
    status_pos: u64,
    end_pos: u64,
    replay_done: bool,
}

impl FileJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file,
            pos: 0,
            status_pos: 0,
            end_pos: 0,
            replay_done: false,
        })
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_item(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_u64()?;
        let mut item = Vec::new();
        let n = (&mut self.file).take(len).read_to_end(&mut item)?;
        self.pos += n as u64;
        if (n as u64) < len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(item)
    }

    fn read_entry(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let count = self.read_u64()?;
        let mut entry = Vec::new();
        for _ in 0..count {
            entry.push(self.read_item()?);
        }
        Ok(entry)
    }

    /// Replay iterator step. Yields the next committed entry; anything else
    /// — a non-committed status, end of file, or a committed record whose
    /// body is torn — ends replay with the `Empty` sentinel and parks the
    /// write position on that record's status byte.
    pub fn next_entry(&mut self) -> Result<Vec<Vec<u8>>, JournalError> {
        let record_start = self.pos;

        let mut status = [STATUS_NOT_CREATED];
        let read = match self.read_exact(&mut status) {
            Ok(()) => Some(status[0]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => return Err(e.into()),
        };

        if read == Some(STATUS_COMMITTED) {
            match self.read_entry() {
                Ok(entry) => return Ok(entry),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.finish_replay(record_start)?;
        Err(JournalError::Empty)
    }

    fn finish_replay(&mut self, at: u64) -> io::Result<()> {
        self.seek_to(at)?;
        self.status_pos = at;
        self.end_pos = at;
        self.replay_done = true;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn write_u64(&mut self, v: u64) -> io::Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn update_status(&mut self, status: u8) -> io::Result<()> {
        self.seek_to(self.status_pos)?;
        self.write_bytes(&[status])
    }

    /// Appends one record, leaving it in the progress state. An empty entry
    /// is a no-op. Fails while replay has not been drained.
    pub fn write(&mut self, entry: &[Vec<u8>]) -> Result<(), JournalError> {
        if !self.replay_done {
            return Err(JournalError::NotEmpty);
        }
        if entry.is_empty() {
            return Ok(());
        }

        self.status_pos = self.pos;
        self.write_bytes(&[STATUS_INITIATED])?;
        self.write_u64(entry.len() as u64)?;
        for item in entry {
            self.write_u64(item.len() as u64)?;
            self.write_bytes(item)?;
        }

        // pre-claim the next record's status slot
        self.write_bytes(&[STATUS_NOT_CREATED])?;
        self.end_pos = self.pos - STATUS_LEN;

        self.update_status(STATUS_PROGRESS)?;
        Ok(())
    }

    /// Makes the in-progress record durable and visible, then parks the
    /// position on the next record's status slot.
    pub fn commit(&mut self) -> Result<(), JournalError> {
        self.update_status(STATUS_COMMITTED)?;
        self.file.sync_all()?;
        self.seek_to(self.end_pos)?;
        Ok(())
    }

    /// Marks the in-progress record rolled back; the next write reuses its
    /// slot.
    pub fn rollback(&mut self) -> Result<(), JournalError> {
        self.update_status(STATUS_ROLLED_BACK)?;
        self.seek_to(self.status_pos)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct TempJournal {
        path: PathBuf,
    }

    impl TempJournal {
        fn new() -> Self {
            let n = COUNTER.fetch_add(1, Ordering::SeqCst);
            let path = std::env::temp_dir().join(format!(
                "cachette_journal_{}_{}.dat",
                std::process::id(),
                n
            ));
            let _ = std::fs::remove_file(&path);
            Self { path }
        }

        fn open(&self) -> FileJournal {
            FileJournal::open(&self.path).unwrap()
        }

        fn drain(&self) -> FileJournal {
            let mut journal = self.open();
            loop {
                match journal.next_entry() {
                    Ok(_) => continue,
                    Err(JournalError::Empty) => break,
                    Err(e) => panic!("drain failed: {}", e),
                }
            }
            journal
        }
    }

    impl Drop for TempJournal {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn entry(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    fn replay(journal: &mut FileJournal) -> Vec<Vec<Vec<u8>>> {
        let mut entries = Vec::new();
        loop {
            match journal.next_entry() {
                Ok(e) => entries.push(e),
                Err(JournalError::Empty) => return entries,
                Err(e) => panic!("replay failed: {}", e),
            }
        }
    }

    #[test]
    fn test_write_requires_drained_replay() {
        let temp = TempJournal::new();
        let mut journal = temp.open();
        assert!(matches!(
            journal.write(&entry(&[b"SET"])),
            Err(JournalError::NotEmpty)
        ));
        assert!(matches!(journal.next_entry(), Err(JournalError::Empty)));
        assert!(journal.write(&entry(&[b"SET"])).is_ok());
    }

    #[test]
    fn test_committed_records_replay_byte_for_byte() {
        let temp = TempJournal::new();
        let first = entry(&[b"SET", b"k", &[0u8, 1, 255, b'\r', b'\n']]);
        let second = entry(&[b"DEL", b"k"]);
        {
            let mut journal = temp.drain();
            journal.write(&first).unwrap();
            journal.commit().unwrap();
            journal.write(&second).unwrap();
            journal.commit().unwrap();
        }

        let mut reopened = temp.open();
        assert_eq!(replay(&mut reopened), vec![first.clone(), second.clone()]);

        // and the journal keeps accepting appends after replay
        journal_roundtrip_append(&mut reopened, &temp, vec![first, second]);
    }

    fn journal_roundtrip_append(
        journal: &mut FileJournal,
        temp: &TempJournal,
        mut expected: Vec<Vec<Vec<u8>>>,
    ) {
        let third = entry(&[b"SET", b"x", b"y"]);
        journal.write(&third).unwrap();
        journal.commit().unwrap();
        expected.push(third);

        let mut reopened = temp.open();
        assert_eq!(replay(&mut reopened), expected);
    }

    #[test]
    fn test_uncommitted_record_is_invisible() {
        let temp = TempJournal::new();
        {
            let mut journal = temp.drain();
            journal.write(&entry(&[b"SET", b"a", b"1"])).unwrap();
            journal.commit().unwrap();
            // written but never committed: stays in progress state
            journal.write(&entry(&[b"SET", b"b", b"2"])).unwrap();
        }

        let mut reopened = temp.open();
        assert_eq!(replay(&mut reopened), vec![entry(&[b"SET", b"a", b"1"])]);
    }

    #[test]
    fn test_rollback_reuses_the_slot() {
        let temp = TempJournal::new();
        {
            let mut journal = temp.drain();
            journal.write(&entry(&[b"SET", b"a", b"1"])).unwrap();
            journal.rollback().unwrap();
            journal.write(&entry(&[b"SET", b"b", b"2"])).unwrap();
            journal.commit().unwrap();
        }

        let mut reopened = temp.open();
        assert_eq!(replay(&mut reopened), vec![entry(&[b"SET", b"b", b"2"])]);
    }

    #[test]
    fn test_crash_mid_body_truncates_to_the_torn_record() {
        let temp = TempJournal::new();
        let first = entry(&[b"SET", b"a", b"1"]);
        let second_status_pos;
        {
            let mut journal = temp.drain();
            journal.write(&first).unwrap();
            journal.commit().unwrap();
            second_status_pos = std::fs::metadata(&temp.path).unwrap().len() - 1;
            journal.write(&entry(&[b"SET", b"bb", b"22"])).unwrap();
            journal.commit().unwrap();
        }

        // simulate the crash: cut the file one byte into the second
        // record's body (status + count + first item length + 1)
        let cut = second_status_pos + 1 + 8 + 8 + 1;
        let file = OpenOptions::new().write(true).open(&temp.path).unwrap();
        file.set_len(cut).unwrap();

        let mut reopened = temp.open();
        assert_eq!(replay(&mut reopened), vec![first.clone()]);

        // the next append overwrites the torn record's status position
        let third = entry(&[b"SET", b"c", b"3"]);
        reopened.write(&third).unwrap();
        reopened.commit().unwrap();

        let mut again = temp.open();
        assert_eq!(replay(&mut again), vec![first, third]);
    }

    #[test]
    fn test_empty_entry_write_is_a_noop() {
        let temp = TempJournal::new();
        let mut journal = temp.drain();
        journal.write(&[]).unwrap();
        let mut reopened = temp.open();
        assert!(replay(&mut reopened).is_empty());
    }
}
