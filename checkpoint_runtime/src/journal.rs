//! Append-only run journal — binary protobuf log of run summaries.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][protobuf bytes][4-byte LE length][protobuf bytes]...
//!
//! Rules:
//!   - Strict append only: no mutation, no deletion, no reordering
//!   - fsync after every write
//!   - Sequence numbers start at 1 and increase by exactly one
//!
//! The journal is an audit trail. It is never read back into a checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;

use crate::proto_bridge::{proto_to_summary, summary_to_proto};
use crate::proto_types::ProtoJournalEntry;
use crate::summary::RunSummary;

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub struct RunJournal {
    path: PathBuf,
    last_sequence: u64,
}

impl RunJournal {
    /// Open or create a journal, reading existing frames to recover the
    /// last sequence number.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_sequence = if path.exists() {
            Self::read_frames(path)?
                .last()
                .map(|e| e.sequence)
                .unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Append one summary under the next sequence number and fsync.
    pub fn append(&mut self, summary: &RunSummary) -> io::Result<u64> {
        let entry = ProtoJournalEntry {
            sequence: self.last_sequence + 1,
            summary: Some(summary_to_proto(summary)),
        };
        let buf = entry.encode_to_vec();
        if buf.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("journal frame too large: {} bytes", buf.len()),
            ));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&(buf.len() as u32).to_le_bytes())?;
            writer.write_all(&buf)?;
            writer.flush()?;
        }
        file.sync_all()?;

        self.last_sequence = entry.sequence;
        Ok(entry.sequence)
    }

    /// All journaled summaries in sequence order.
    pub fn load_all(&self) -> io::Result<Vec<RunSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Self::read_frames(&self.path)?
            .iter()
            .map(|entry| {
                let proto = entry.summary.as_ref().ok_or_else(|| {
                    invalid_data(format!("journal entry {} has no summary", entry.sequence))
                })?;
                proto_to_summary(proto).map_err(|e| {
                    invalid_data(format!("journal entry {}: {}", entry.sequence, e))
                })
            })
            .collect()
    }

    /// Read every frame, validating length, decode and sequence order.
    fn read_frames(path: &Path) -> io::Result<Vec<ProtoJournalEntry>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut entries: Vec<ProtoJournalEntry> = Vec::new();
        let mut len_buf = [0u8; 4];

        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(invalid_data(format!("invalid frame length: {}", len)));
            }

            let mut frame = vec![0u8; len];
            reader
                .read_exact(&mut frame)
                .map_err(|e| invalid_data(format!("truncated frame: {}", e)))?;

            let entry = ProtoJournalEntry::decode(frame.as_slice())
                .map_err(|e| invalid_data(format!("protobuf decode error: {}", e)))?;

            let expected = entries.last().map(|e| e.sequence).unwrap_or(0) + 1;
            if entry.sequence != expected {
                return Err(invalid_data(format!(
                    "sequence violation in run journal: expected {}, got {}",
                    expected, entry.sequence
                )));
            }
            entries.push(entry);
        }

        Ok(entries)
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
