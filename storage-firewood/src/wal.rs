use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Logical sequence identifier assigned to every appended record.
pub type SequenceNumber = u64;

const WAL_FILE_NAME: &str = "firewood.wal";
const RECORD_HEADER_LEN: usize = 8 + 4 + 4;

/// Errors produced by the file backed write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt wal record at sequence {0}")]
    Corrupt(SequenceNumber),
}

/// Abstraction over the write-ahead log used to guarantee durability and ordering.
pub trait WriteAheadLog {
    /// Error type emitted by the WAL implementation.
    type Error;

    /// Append a raw record to the log, returning the assigned sequence number.
    fn append(&mut self, record: &[u8]) -> Result<SequenceNumber, Self::Error>;

    /// Force buffered log data to be persisted.
    fn sync(&mut self) -> Result<(), Self::Error>;

    /// Replay the log starting at `sequence`, yielding each record payload in order.
    fn replay_from(
        &self,
        sequence: SequenceNumber,
    ) -> Result<Vec<(SequenceNumber, Vec<u8>)>, Self::Error>;

    /// Discard all log entries with sequence numbers strictly lower than `sequence`.
    fn truncate_before(&mut self, sequence: SequenceNumber) -> Result<(), Self::Error>;

    /// Replace the whole log with `records` in one step. The records receive
    /// fresh sequence numbers, which are returned in order. Either the old or
    /// the new log survives a crash, never a mix of both.
    fn rewrite(&mut self, records: &[Vec<u8>]) -> Result<Vec<SequenceNumber>, Self::Error>;
}

/// Append-only log stored in a single file. Each record is framed as
/// `sequence (u64 LE) | length (u32 LE) | checksum (u32 LE) | payload`.
#[derive(Debug)]
pub struct FileWal {
    path: PathBuf,
    file: File,
    next_sequence: SequenceNumber,
}

impl FileWal {
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, WalError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let path = directory.join(WAL_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut wal = FileWal {
            path,
            file,
            next_sequence: 0,
        };
        wal.next_sequence = wal
            .read_all()?
            .last()
            .map(|(sequence, _)| sequence + 1)
            .unwrap_or(0);
        Ok(wal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<(SequenceNumber, Vec<u8>)>, WalError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        loop {
            let mut header = [0u8; RECORD_HEADER_LEN];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let sequence = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
            let len = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default()) as usize;
            let checksum = u32::from_le_bytes(header[12..16].try_into().unwrap_or_default());
            let mut payload = vec![0u8; len];
            reader
                .read_exact(&mut payload)
                .map_err(|_| WalError::Corrupt(sequence))?;
            if record_checksum(&payload) != checksum {
                return Err(WalError::Corrupt(sequence));
            }
            records.push((sequence, payload));
        }
        Ok(records)
    }
}

impl WriteAheadLog for FileWal {
    type Error = WalError;

    fn append(&mut self, record: &[u8]) -> Result<SequenceNumber, WalError> {
        let sequence = self.next_sequence;
        self.file.write_all(&encode_frame(sequence, record))?;
        self.next_sequence += 1;
        Ok(sequence)
    }

    fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn replay_from(
        &self,
        sequence: SequenceNumber,
    ) -> Result<Vec<(SequenceNumber, Vec<u8>)>, WalError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|(seq, _)| *seq >= sequence)
            .collect())
    }

    fn truncate_before(&mut self, sequence: SequenceNumber) -> Result<(), WalError> {
        let retained = self.replay_from(sequence)?;
        self.replace_file(&retained)
    }

    fn rewrite(&mut self, records: &[Vec<u8>]) -> Result<Vec<SequenceNumber>, WalError> {
        let framed: Vec<(SequenceNumber, Vec<u8>)> = records
            .iter()
            .zip(self.next_sequence..)
            .map(|(payload, seq)| (seq, payload.clone()))
            .collect();
        self.replace_file(&framed)?;
        let sequences: Vec<SequenceNumber> = framed.iter().map(|(seq, _)| *seq).collect();
        self.next_sequence += sequences.len() as SequenceNumber;
        Ok(sequences)
    }
}

impl FileWal {
    /// Write `records` to a sibling file, sync it and rename it over the log.
    fn replace_file(&mut self, records: &[(SequenceNumber, Vec<u8>)]) -> Result<(), WalError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (seq, payload) in records {
                tmp.write_all(&encode_frame(*seq, payload))?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        if let Some(directory) = self.path.parent() {
            File::open(directory)?.sync_all()?;
        }
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

fn encode_frame(sequence: SequenceNumber, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&record_checksum(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn record_checksum(payload: &[u8]) -> u32 {
    let digest = blake3::hash(payload);
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
