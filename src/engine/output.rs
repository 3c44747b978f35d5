//! Response body destinations: an in-memory buffer or a file on disk.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::RequestError;

/// Where a finished response body ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Body accumulated in memory.
    Memory(Bytes),
    /// Body written to this file.
    File(PathBuf),
}

/// Body sink for one logical request.
///
/// The file destination is created lazily when the first non-challenge
/// response starts streaming, so a challenge never truncates it.
#[derive(Debug)]
pub(crate) enum Output {
    Memory(BytesMut),
    File {
        path: PathBuf,
        writer: Option<BufWriter<File>>,
    },
}

impl Output {
    pub(crate) fn new(destination: Option<&Path>) -> Self {
        match destination {
            Some(path) => Self::File {
                path: path.to_path_buf(),
                writer: None,
            },
            None => Self::Memory(BytesMut::new()),
        }
    }

    /// Prepares the sink for a fresh body.
    pub(crate) async fn begin(&mut self) -> Result<(), RequestError> {
        match self {
            Self::Memory(buffer) => {
                buffer.clear();
                Ok(())
            }
            Self::File { path, writer } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| RequestError::output(path.clone(), e))?;
                }
                let file = File::create(&*path)
                    .await
                    .map_err(|e| RequestError::output(path.clone(), e))?;
                debug!(path = %path.display(), "opened download destination");
                *writer = Some(BufWriter::new(file));
                Ok(())
            }
        }
    }

    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), RequestError> {
        match self {
            Self::Memory(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            Self::File { path, writer } => match writer.as_mut() {
                Some(writer) => writer
                    .write_all(bytes)
                    .await
                    .map_err(|e| RequestError::output(path.clone(), e)),
                None => Err(RequestError::output(
                    path.clone(),
                    std::io::Error::other("destination not open"),
                )),
            },
        }
    }

    /// Flushes and closes the destination after a complete body.
    pub(crate) async fn finish(&mut self) -> Result<(), RequestError> {
        if let Self::File { path, writer } = self
            && let Some(mut open) = writer.take()
        {
            open.flush()
                .await
                .map_err(|e| RequestError::output(path.clone(), e))?;
        }
        Ok(())
    }

    /// Releases the destination after a failure or cancel. No further writes
    /// are possible afterwards; the partial file is left in place.
    pub(crate) async fn close(&mut self) {
        if let Self::File { path, writer } = self
            && let Some(mut open) = writer.take()
        {
            if let Err(e) = open.flush().await {
                warn!(path = %path.display(), error = %e, "failed to flush partial download");
            }
            debug!(path = %path.display(), "closed download destination");
        }
    }

    /// Whether a file handle is currently held.
    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        matches!(self, Self::File { writer: Some(_), .. })
    }

    pub(crate) fn into_body(self) -> ResponseBody {
        match self {
            Self::Memory(buffer) => ResponseBody::Memory(buffer.freeze()),
            Self::File { path, .. } => ResponseBody::File(path),
        }
    }
}
