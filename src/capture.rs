//! Capture file of published messages
//!
//! A capture starts with the magic `BNCAP1\n` followed by one record per
//! published message:
//!
//! ```text
//! u16 LE  topic length
//! [u8]    topic (UTF-8)
//! u32 LE  payload length
//! [u8]    payload (one CBOR map)
//! ```
//!
//! Files are appended to across cycles, so a long-running node produces a
//! single capture the analyzer can read back.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{NodeError, Result};
use crate::publish::MessageSink;

/// Leading bytes of every capture file
pub const CAPTURE_MAGIC: &[u8; 7] = b"BNCAP1\n";

/// One captured message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Appends records to a capture file
pub struct CaptureWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    records: usize,
}

impl CaptureWriter {
    /// Open `path` for appending, creating it (with the magic) if needed
    ///
    /// # Returns
    /// * `Err(NodeError::Capture)` - The file exists but is not a capture
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| NodeError::Capture(format!("{}: {}", path.display(), e)))?;

        let len = file
            .metadata()
            .map_err(|e| NodeError::Capture(format!("{}: {}", path.display(), e)))?
            .len();
        if len == 0 {
            file.write_all(CAPTURE_MAGIC)
                .map_err(|e| NodeError::Capture(format!("{}: {}", path.display(), e)))?;
        } else {
            let mut magic = [0u8; 7];
            file.seek(SeekFrom::Start(0))
                .and_then(|_| file.read_exact(&mut magic))
                .map_err(|_| NodeError::Capture(format!("{} is not a capture file", path.display())))?;
            if &magic != CAPTURE_MAGIC {
                return Err(NodeError::Capture(format!("{} is not a capture file", path.display())));
            }
        }

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            records: 0,
        })
    }

    /// Append one record and flush it to disk
    pub fn write_record(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let topic_len = u16::try_from(topic.len())
            .map_err(|_| NodeError::Capture(format!("topic too long: {} bytes", topic.len())))?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| NodeError::Capture(format!("payload too long: {} bytes", payload.len())))?;

        let io = |e: std::io::Error| NodeError::Capture(format!("{}: {}", self.path.display(), e));
        self.writer.write_all(&topic_len.to_le_bytes()).map_err(io)?;
        self.writer.write_all(topic.as_bytes()).map_err(io)?;
        self.writer.write_all(&payload_len.to_le_bytes()).map_err(io)?;
        self.writer.write_all(payload).map_err(io)?;
        self.writer.flush().map_err(io)?;
        self.records += 1;
        Ok(())
    }

    /// Records written through this writer
    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Message sink that records every publish into a capture file
pub struct CaptureSink {
    path: PathBuf,
    writer: Option<CaptureWriter>,
}

impl CaptureSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    /// Records written since the sink connected
    pub fn records_written(&self) -> usize {
        self.writer.as_ref().map_or(0, |w| w.records_written())
    }
}

impl MessageSink for CaptureSink {
    fn connect(&mut self) -> Result<()> {
        let writer = CaptureWriter::open(&self.path).map_err(|e| NodeError::Transport(e.to_string()))?;
        tracing::info!(path = %self.path.display(), "capture opened");
        self.writer = Some(writer);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        match writer.write_record(topic, payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }
}

/// Sequential reader of a capture file
pub struct CaptureReader<R: Read> {
    reader: R,
    offset: u64,
}

impl CaptureReader<BufReader<File>> {
    /// Open a capture file and check its magic
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| NodeError::Capture(format!("{}: {}", path.display(), e)))?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> CaptureReader<R> {
    /// Wrap a reader positioned at the start of a capture
    pub fn new(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 7];
        reader
            .read_exact(&mut magic)
            .map_err(|_| NodeError::Capture("missing capture header".to_string()))?;
        if &magic != CAPTURE_MAGIC {
            return Err(NodeError::Capture("bad capture magic".to_string()));
        }
        Ok(Self {
            reader,
            offset: CAPTURE_MAGIC.len() as u64,
        })
    }

    fn read_exact_at(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            NodeError::Capture(format!("truncated record at byte {}: {}", self.offset, e))
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Next record, or `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>> {
        let mut len2 = [0u8; 2];
        match self.reader.read(&mut len2[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return self.next_record(),
            Err(e) => return Err(NodeError::Capture(e.to_string())),
        }
        self.offset += 1;
        self.read_exact_at(&mut len2[1..])?;

        let mut topic = vec![0u8; usize::from(u16::from_le_bytes(len2))];
        self.read_exact_at(&mut topic)?;
        let topic = String::from_utf8(topic)
            .map_err(|_| NodeError::Capture(format!("topic is not UTF-8 before byte {}", self.offset)))?;

        let mut len4 = [0u8; 4];
        self.read_exact_at(&mut len4)?;
        let len = u64::from(u32::from_le_bytes(len4));
        let mut payload = Vec::new();
        let read = (&mut self.reader)
            .take(len)
            .read_to_end(&mut payload)
            .map_err(|e| NodeError::Capture(format!("payload read failed at byte {}: {}", self.offset, e)))?;
        if read as u64 != len {
            return Err(NodeError::Capture(format!(
                "truncated record at byte {}: payload announces {} bytes, found {}",
                self.offset, len, read
            )));
        }
        self.offset += len;

        Ok(Some(CaptureRecord { topic, payload }))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<CaptureRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bursts.cap");

        let mut writer = CaptureWriter::open(&path).unwrap();
        writer.write_record("sensor/burst", &[0xA1, 0x61, 0x6E, 0x01]).unwrap();
        writer.write_record("sensor/burst", &[]).unwrap();
        assert_eq!(writer.records_written(), 2);
        drop(writer);

        let records: Vec<CaptureRecord> = CaptureReader::open(&path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic, "sensor/burst");
        assert_eq!(records[0].payload, vec![0xA1, 0x61, 0x6E, 0x01]);
        assert!(records[1].payload.is_empty());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bursts.cap");

        CaptureWriter::open(&path).unwrap().write_record("a", b"1").unwrap();
        CaptureWriter::open(&path).unwrap().write_record("b", b"2").unwrap();

        let topics: Vec<String> = CaptureReader::open(&path)
            .unwrap()
            .map(|r| r.unwrap().topic)
            .collect();
        assert_eq!(topics, vec!["a", "b"]);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world").unwrap();
        assert!(matches!(CaptureWriter::open(&path), Err(NodeError::Capture(_))));
        assert!(matches!(CaptureReader::open(&path), Err(NodeError::Capture(_))));
    }

    #[test]
    fn test_truncated_record() {
        let mut bytes = CAPTURE_MAGIC.to_vec();
        bytes.extend_from_slice(&[3, 0, b'a', b'b']);
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_oversized_payload_length_is_truncation() {
        let mut bytes = CAPTURE_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0, b't']);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0xA0, 0x00]);
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(err.to_string().contains("found 2"), "{}", err);
    }

    #[test]
    fn test_sink_requires_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CaptureSink::new(dir.path().join("c.cap"));
        assert!(!sink.publish("t", b"x"));
        sink.connect().unwrap();
        assert!(sink.publish("t", b"x"));
        assert_eq!(sink.records_written(), 1);
    }
}
