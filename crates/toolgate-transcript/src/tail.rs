//! Incremental tailing of a single JSONL transcript file.
//!
//! Tracks a byte offset between reads, buffers partial lines at EOF, and
//! detects rotation via the file's identity (inode plus creation time) and
//! a fingerprint of its leading bytes, so a replacement that reuses the
//! freed inode is still caught. New tails start at EOF so historical
//! entries never produce notifications.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// Identity of the file behind the path. Creation time disambiguates a
/// replacement file that reuses the freed inode; appends never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    inode: u64,
    created: Option<SystemTime>,
}

impl FileId {
    fn same_file(self, other: FileId) -> bool {
        if self.inode != other.inode {
            return false;
        }
        match (self.created, other.created) {
            (Some(a), Some(b)) => a == b,
            // Filesystem without birth times: inode is all we have.
            _ => true,
        }
    }
}

/// Bytes of the file head kept as a content fingerprint. Appends never
/// mutate them, so a change means the file was replaced.
const PREFIX_CAP: usize = 64;

#[derive(Debug)]
pub struct TranscriptTail {
    path: PathBuf,
    /// Byte offset of the next read.
    offset: u64,
    /// Identity at the last read, for rotation detection.
    id: Option<FileId>,
    /// Leading bytes at the last read, for rotation detection when the
    /// replacement reuses the inode.
    prefix: Vec<u8>,
    /// Partial line at EOF, carried to the next read.
    partial: String,
}

impl TranscriptTail {
    /// Open a tail positioned at the current end of the file.
    pub fn new(path: PathBuf) -> Self {
        let (offset, id) = match file_identity(&path) {
            Some((size, id)) => (size, Some(id)),
            None => (0, None),
        };
        let prefix = read_prefix(&path);
        Self {
            path,
            offset,
            id,
            prefix,
            partial: String::new(),
        }
    }

    /// Open a tail positioned at the start of the file (for tests).
    #[cfg(test)]
    pub fn from_start(path: PathBuf) -> Self {
        let id = file_identity(&path).map(|(_, id)| id);
        let prefix = read_prefix(&path);
        Self {
            path,
            offset: 0,
            id,
            prefix,
            partial: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read complete lines appended since the last call.
    ///
    /// A replaced file (identity or head-bytes change) or a truncated file
    /// (offset past EOF) resets the tail to the start of the current file.
    pub fn read_new_lines(&mut self) -> Vec<String> {
        if let Some((size, id)) = file_identity(&self.path) {
            let prefix = read_prefix(&self.path);
            let common = self.prefix.len().min(prefix.len());
            let rotated = self.id.is_some_and(|old| !old.same_file(id))
                || prefix[..common] != self.prefix[..common];
            let truncated = size < self.offset;
            if rotated || truncated {
                self.offset = 0;
                self.partial.clear();
            }
            self.id = Some(id);
            self.prefix = prefix;
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open transcript");
                return Vec::new();
            }
        };

        let mut reader = BufReader::new(file);
        if let Err(e) = reader.seek(SeekFrom::Start(self.offset)) {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                error = %e,
                "failed to seek in transcript"
            );
            return Vec::new();
        }

        let mut lines = Vec::new();
        let mut buf = String::new();

        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf.ends_with('\n') {
                        let mut line = std::mem::take(&mut self.partial);
                        line.push_str(buf.trim_end_matches('\n'));
                        if !line.is_empty() {
                            lines.push(line);
                        }
                    } else {
                        // Mid-write append, complete it on the next read.
                        self.partial.push_str(&buf);
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "error reading transcript");
                    break;
                }
            }
        }

        if let Ok(pos) = reader.stream_position() {
            self.offset = pos;
        }

        lines
    }
}

/// Leading bytes of the file, up to `PREFIX_CAP`.
fn read_prefix(path: &Path) -> Vec<u8> {
    use std::io::Read;
    let mut buf = Vec::new();
    if let Ok(file) = File::open(path) {
        let _ = file.take(PREFIX_CAP as u64).read_to_end(&mut buf);
    }
    buf
}

/// File size and identity, if the file exists.
fn file_identity(path: &Path) -> Option<(u64, FileId)> {
    let meta = fs::metadata(path).ok()?;
    #[cfg(unix)]
    let inode = {
        use std::os::unix::fs::MetadataExt;
        meta.ino()
    };
    #[cfg(not(unix))]
    let inode = 0;
    Some((
        meta.len(),
        FileId {
            inode,
            created: meta.created().ok(),
        },
    ))
}

// ─── Tests ──────────────────────────────────────────────────────────
