//! Output capture for sandboxed children.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Bytes captured from one child stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    /// Up to `max_bytes` of output.
    pub bytes: Vec<u8>,
    /// Whether output beyond `max_bytes` was discarded.
    pub truncated: bool,
}

impl CapturedStream {
    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Shared capture buffer filled by [`read_capped`].
///
/// The reader task and the supervisor hold clones. Bytes already read stay
/// visible through [`snapshot`](Self::snapshot) even if the reader task is
/// aborted before EOF.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<CapturedStream>>,
}

impl CapturedOutput {
    /// Create a new, empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out what has been captured so far.
    pub fn snapshot(&self) -> CapturedStream {
        self.lock().clone()
    }

    /// Record that output was lost, e.g. because reading was cut short.
    pub fn mark_truncated(&self) {
        self.lock().truncated = true;
    }

    fn append(&self, chunk: &[u8], max_bytes: usize) {
        let mut captured = self.lock();
        let room = max_bytes.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn lock(&self) -> MutexGuard<'_, CapturedStream> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read `reader` to EOF into `output`, keeping at most `max_bytes`.
///
/// The stream is drained past the ceiling so a chatty child never blocks on
/// a full pipe.
pub async fn read_capped<R>(
    mut reader: R,
    max_bytes: usize,
    output: CapturedOutput,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        output.append(&chunk[..n], max_bytes);
    }
}
