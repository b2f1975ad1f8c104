// Local crates
use crate::cursor::store::LogPosition;

// External crates
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// What the tailer saw on one read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// One complete line, with the position *after* it (the resume point).
    Line { text: String, position: LogPosition },
    /// Nothing new; wait for a nudge or a poll tick.
    Eof,
    /// The file shrank below our offset. The caller must rewind to start.
    Truncated,
    /// The path now points at a different file (or none). The caller must
    /// wait out the rotation and reopen from offset 0.
    Rotated,
}

#[cfg(unix)]
pub(crate) fn inode_of(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
pub(crate) fn inode_of(_metadata: &std::fs::Metadata) -> u64 {
    0
}

/// Line-oriented tail reader over one log file.
///
/// Only complete lines are delivered: a partial line at EOF is pushed back
/// (seek to the pre-read offset) until the client finishes writing it, so a
/// half-flushed mission boundary can never reach the parser.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    reader: BufReader<File>,
    inode: u64,
    offset: u64,
    line_number: u64,
}

impl Tailer {
    /// Open `path` and seek to `resume`, or to the start of the file.
    pub async fn open(path: &Path, resume: Option<LogPosition>) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        let metadata = file.metadata().await?;
        let inode = inode_of(&metadata);

        let position = resume.unwrap_or_default();
        file.seek(SeekFrom::Start(position.byte_offset)).await?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            inode,
            offset: position.byte_offset,
            line_number: position.line_number,
        })
    }

    /// Position after the last delivered line.
    pub fn position(&self) -> LogPosition {
        LogPosition {
            byte_offset: self.offset,
            line_number: self.line_number,
        }
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Read the next complete line, or report why there is none.
    pub async fn next_event(&mut self) -> std::io::Result<TailEvent> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line).await?;

        if bytes == 0 {
            return self.classify_eof().await;
        }

        if !line.ends_with('\n') {
            // Partial line at EOF: rewind and wait for the rest.
            self.reader.seek(SeekFrom::Start(self.offset)).await?;
            return Ok(TailEvent::Eof);
        }

        self.offset += bytes as u64;
        self.line_number += 1;
        let text = line
            .trim_end_matches(|c| c == '\n' || c == '\r')
            .to_string();

        Ok(TailEvent::Line {
            text,
            position: self.position(),
        })
    }

    /// At EOF, decide between plain idleness, truncation and rotation by
    /// re-statting the path we were asked to tail.
    async fn classify_eof(&self) -> std::io::Result<TailEvent> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => {
                if inode_of(&metadata) != self.inode {
                    return Ok(TailEvent::Rotated);
                }
                if metadata.len() < self.offset {
                    return Ok(TailEvent::Truncated);
                }
                Ok(TailEvent::Eof)
            }
            // Unlinked mid-rotation; the replacement has not landed yet.
            Err(_) => Ok(TailEvent::Rotated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_log(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("client.log");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn reads_lines_with_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "first\nsecond\n");

        let mut tailer = Tailer::open(&path, None).await.unwrap();

        match tailer.next_event().await.unwrap() {
            TailEvent::Line { text, position } => {
                assert_eq!(text, "first");
                assert_eq!(position.byte_offset, 6);
                assert_eq!(position.line_number, 1);
            }
            other => panic!("expected a line, got {other:?}"),
        }

        match tailer.next_event().await.unwrap() {
            TailEvent::Line { text, position } => {
                assert_eq!(text, "second");
                assert_eq!(position.byte_offset, 13);
                assert_eq!(position.line_number, 2);
            }
            other => panic!("expected a line, got {other:?}"),
        }

        assert_eq!(tailer.next_event().await.unwrap(), TailEvent::Eof);
    }

    #[tokio::test]
    async fn resumes_from_a_saved_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "first\nsecond\n");

        let resume = LogPosition {
            byte_offset: 6,
            line_number: 1,
        };
        let mut tailer = Tailer::open(&path, Some(resume)).await.unwrap();

        match tailer.next_event().await.unwrap() {
            TailEvent::Line { text, position } => {
                assert_eq!(text, "second");
                assert_eq!(position.line_number, 2);
            }
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn appended_data_shows_up_after_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "first\n");

        let mut tailer = Tailer::open(&path, None).await.unwrap();
        assert!(matches!(
            tailer.next_event().await.unwrap(),
            TailEvent::Line { .. }
        ));
        assert_eq!(tailer.next_event().await.unwrap(), TailEvent::Eof);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "second").unwrap();

        match tailer.next_event().await.unwrap() {
            TailEvent::Line { text, .. } => assert_eq!(text, "second"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_line_is_held_back_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "complete\npart");

        let mut tailer = Tailer::open(&path, None).await.unwrap();
        assert!(matches!(
            tailer.next_event().await.unwrap(),
            TailEvent::Line { .. }
        ));

        // The unterminated tail must not be delivered.
        assert_eq!(tailer.next_event().await.unwrap(), TailEvent::Eof);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "ial").unwrap();

        match tailer.next_event().await.unwrap() {
            TailEvent::Line { text, .. } => assert_eq!(text, "partial"),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncation_is_detected_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "first\nsecond\n");

        let mut tailer = Tailer::open(&path, None).await.unwrap();
        while matches!(tailer.next_event().await.unwrap(), TailEvent::Line { .. }) {}

        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(tailer.next_event().await.unwrap(), TailEvent::Truncated);
    }

    #[tokio::test]
    async fn rotation_is_detected_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "first\n");

        let mut tailer = Tailer::open(&path, None).await.unwrap();
        while matches!(tailer.next_event().await.unwrap(), TailEvent::Line { .. }) {}

        let rotated = dir.path().join("client.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        std::fs::write(&path, "fresh generation, plenty of new content\n").unwrap();

        assert_eq!(tailer.next_event().await.unwrap(), TailEvent::Rotated);
    }
}
