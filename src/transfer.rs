use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::api::{ApiResponse, ApiSession};
use crate::error::MirrorError;

/// Result of one file fetch: `New` when bytes were written this run,
/// `Current` when the local copy was confirmed up to date via its sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    New,
    Current,
}

/// Sidecar holding the server's validation token, co-located with the
/// artifact as `.{filename}.etag`.
pub fn sidecar_path(dest_dir: &Utf8Path, filename: &str) -> Utf8PathBuf {
    dest_dir.join(format!(".{filename}.etag"))
}

pub trait FileFetcher {
    fn fetch_file(
        &self,
        request: &str,
        dest_dir: &Utf8Path,
        filename: &str,
        validate: bool,
    ) -> Result<DownloadOutcome, MirrorError>;
}

/// Conditional-download wrapper over an [`ApiSession`].
///
/// With `validate` set, a stored sidecar token turns the request into a
/// conditional GET: 304 confirms the local copy without a transfer, 200 means
/// the token went stale and the fresh body from that same response is
/// written. Without a sidecar (or without `validate`) the fetch is a plain
/// GET.
pub struct CachedFetcher<'a, S: ApiSession> {
    session: &'a S,
}

impl<'a, S: ApiSession> CachedFetcher<'a, S> {
    pub fn new(session: &'a S) -> Self {
        Self { session }
    }
}

impl<S: ApiSession> FileFetcher for CachedFetcher<'_, S> {
    fn fetch_file(
        &self,
        request: &str,
        dest_dir: &Utf8Path,
        filename: &str,
        validate: bool,
    ) -> Result<DownloadOutcome, MirrorError> {
        let sidecar = sidecar_path(dest_dir, filename);
        let mut response: Option<ApiResponse> = None;

        if validate && sidecar.as_std_path().is_file() {
            let token =
                fs::read_to_string(sidecar.as_std_path()).map_err(MirrorError::filesystem)?;
            let conditional =
                self.session
                    .get(request, &[("If-None-Match", token.as_str())], &[200, 304])?;
            if conditional.status == 304 {
                debug!(filename, "already downloaded, cache is current");
                return Ok(DownloadOutcome::Current);
            }
            // Mismatched token; the 200 body is reused below so the request
            // is not duplicated.
            fs::remove_file(sidecar.as_std_path()).map_err(MirrorError::filesystem)?;
            response = Some(conditional);
        }

        let response = match response {
            Some(response) => response,
            None => self.session.get(request, &[], &[200])?,
        };

        write_file_atomic(dest_dir, filename, &response.body)?;

        if validate {
            match &response.etag {
                Some(token) => {
                    fs::write(sidecar.as_std_path(), token).map_err(MirrorError::filesystem)?;
                }
                None => {
                    warn!(
                        filename,
                        "server sent no validation token, next run will re-download"
                    );
                }
            }
        }

        debug!(filename, "downloaded");
        Ok(DownloadOutcome::New)
    }
}

/// Writes the body through a temp file in the destination directory so a
/// crash mid-write never leaves a truncated artifact under its final name.
fn write_file_atomic(dest_dir: &Utf8Path, filename: &str, body: &[u8]) -> Result<(), MirrorError> {
    let mut temp = tempfile::Builder::new()
        .prefix(".loris-mirror-")
        .tempfile_in(dest_dir.as_std_path())
        .map_err(MirrorError::filesystem)?;
    temp.write_all(body).map_err(MirrorError::filesystem)?;
    temp.persist(dest_dir.join(filename).as_std_path())
        .map_err(MirrorError::filesystem)?;
    Ok(())
}
