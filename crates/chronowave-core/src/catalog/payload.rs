use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{RadioError, Result};

/// Audio bytes of a local track.
///
/// Uploads and the in-memory catalog hold the bytes directly.  Records read
/// back from disk only carry the file location; bytes are read when the blob
/// server is asked for them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Arc<Vec<u8>>),
    File { path: PathBuf, len: u64 },
}

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(Arc::new(bytes))
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.as_ref().clone()),
            Self::File { path, .. } => Ok(tokio::fs::read(path).await?),
        }
    }

    /// Bytes `start..=end`.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        if end < start || end >= self.len() {
            return Err(RadioError::InvalidInput(format!(
                "range {}-{} outside payload of {} bytes",
                start,
                end,
                self.len()
            )));
        }
        let wanted = end - start + 1;
        match self {
            Self::Bytes(bytes) => Ok(bytes[start as usize..=end as usize].to_vec()),
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = Vec::with_capacity(wanted as usize);
                file.take(wanted).read_to_end(&mut buf).await?;
                if buf.len() as u64 != wanted {
                    return Err(RadioError::storage(format!(
                        "{} shrank while being read",
                        path.display()
                    )));
                }
                Ok(buf)
            }
        }
    }
}
