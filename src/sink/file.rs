//! Per-track file sink implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::OverwritePolicy;
use crate::sink::TrackSink;
use crate::{SinkError, Track};

/// Subdirectory holding tracks that are still being written.
const INCOMPLETE_DIR: &str = "incomplete";

/// A sink that writes every track to its own file.
///
/// Tracks are written to `<dir>/incomplete/<name>` and moved to
/// `<dir>/<name>` when they end. When a file of that name already exists
/// the [`OverwritePolicy`] decides; a track that loses stays in
/// `incomplete/`.
///
/// # Example
///
/// ```no_run
/// use stream_rip::{FileSink, OverwritePolicy};
///
/// let sink = FileSink::new("rips").with_overwrite(OverwritePolicy::Always);
/// // Use with StreamRip builder...
/// ```
pub struct FileSink {
    name: String,
    dir: PathBuf,
    overwrite: OverwritePolicy,
    current: Option<OpenTrack>,
}

struct OpenTrack {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    /// Creates a file sink writing into `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", dir.as_ref().display()),
            dir: dir.as_ref().to_path_buf(),
            overwrite: OverwritePolicy::default(),
            current: None,
        }
    }

    /// Sets the policy for existing files.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Directory for tracks still being written.
    pub fn incomplete_dir(&self) -> PathBuf {
        self.dir.join(INCOMPLETE_DIR)
    }

    /// Moves a finished file into place unless the policy keeps the
    /// existing one. Returns the final location.
    fn complete(&self, from: &Path, track: &Track) -> Result<PathBuf, SinkError> {
        let to = self.dir.join(track.file_name());
        let keep_existing = match std::fs::metadata(&to) {
            Err(_) => false,
            Ok(existing) => match self.overwrite {
                OverwritePolicy::Always => false,
                OverwritePolicy::Never => true,
                OverwritePolicy::Larger => {
                    let new_len = std::fs::metadata(from)
                        .map_err(|e| SinkError::file_error(from, e))?
                        .len();
                    new_len <= existing.len()
                }
            },
        };

        if keep_existing {
            tracing::debug!(path = %to.display(), "keeping existing file");
            return Ok(from.to_path_buf());
        }
        std::fs::rename(from, &to).map_err(|e| SinkError::file_error(&to, e))?;
        Ok(to)
    }
}

impl TrackSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_track(&mut self, track: &Track) -> Result<(), SinkError> {
        let dir = self.incomplete_dir();
        std::fs::create_dir_all(&dir).map_err(|e| SinkError::file_error(&dir, e))?;

        let path = dir.join(track.file_name());
        let file = File::create(&path).map_err(|e| SinkError::file_error(&path, e))?;
        tracing::debug!(sink = %self.name, path = %path.display(), "track file opened");
        self.current = Some(OpenTrack {
            writer: BufWriter::new(file),
            path,
        });
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let open = self.current.as_mut().ok_or(SinkError::NotStarted)?;
        open.writer
            .write_all(bytes)
            .map_err(|e| SinkError::file_error(&open.path, e))
    }

    fn end_track(&mut self, track: &Track) -> Result<Option<PathBuf>, SinkError> {
        let Some(mut open) = self.current.take() else {
            return Ok(None);
        };
        open.writer
            .flush()
            .map_err(|e| SinkError::file_error(&open.path, e))?;
        drop(open.writer);
        self.complete(&open.path, track).map(Some)
    }
}
