//! Lifecycle of one torrent submission against the debrid service.
//!
//! A submission moves through
//! `Submitted → FilesPending → FilesSelected → Polling → LinksReady → Resolved`.
//! Every step is one call to [`SubmissionWorkflow::transition`]; any failure
//! ends the submission with a [`WorkflowError`] naming the stage. Nothing is
//! persisted: the debrid service owns the torrent and is re-queried each time.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    debrid::{DebridApi, FileSelection, RemoteTorrentHandle, TorrentStatus},
    error::{WorkflowError, error_chain},
    poll::{PollOutcome, PollPolicy, Probe, poll_until},
    resolver::LinkResolver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Magnet,
    File,
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionKind::Magnet => f.write_str("magnet"),
            SubmissionKind::File => f.write_str("file"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubmissionPayload {
    Magnet(String),
    TorrentFile { filename: String, bytes: Vec<u8> },
}

/// One user request. Lives for the duration of the HTTP call only.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub payload: SubmissionPayload,
}

impl Submission {
    pub fn magnet(magnet: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: SubmissionPayload::Magnet(magnet.into()),
        }
    }

    pub fn torrent_file(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: SubmissionPayload::TorrentFile {
                filename: filename.into(),
                bytes,
            },
        }
    }

    pub fn kind(&self) -> SubmissionKind {
        match self.payload {
            SubmissionPayload::Magnet(_) => SubmissionKind::Magnet,
            SubmissionPayload::TorrentFile { .. } => SubmissionKind::File,
        }
    }
}

#[derive(Debug)]
pub enum SubmissionState {
    Submitted(Submission),
    FilesPending {
        kind: SubmissionKind,
        handle: RemoteTorrentHandle,
    },
    FilesSelected {
        handle: RemoteTorrentHandle,
    },
    Polling {
        handle: RemoteTorrentHandle,
    },
    LinksReady {
        handle: RemoteTorrentHandle,
        links: Vec<String>,
    },
    Resolved(Vec<String>),
}

impl SubmissionState {
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionState::Submitted(_) => "submitted",
            SubmissionState::FilesPending { .. } => "files_pending",
            SubmissionState::FilesSelected { .. } => "files_selected",
            SubmissionState::Polling { .. } => "polling",
            SubmissionState::LinksReady { .. } => "links_ready",
            SubmissionState::Resolved(_) => "resolved",
        }
    }
}

pub struct SubmissionWorkflow {
    debrid: Arc<dyn DebridApi>,
    resolver: Arc<dyn LinkResolver>,
    poll_policy: PollPolicy,
    upload_settle: Duration,
}

impl SubmissionWorkflow {
    pub fn new(
        debrid: Arc<dyn DebridApi>,
        resolver: Arc<dyn LinkResolver>,
        poll_policy: PollPolicy,
        upload_settle: Duration,
    ) -> Self {
        Self {
            debrid,
            resolver,
            poll_policy,
            upload_settle,
        }
    }

    /// Drives a submission to `Resolved` and returns the final download URLs.
    pub async fn run(&self, submission: Submission) -> Result<Vec<String>, WorkflowError> {
        let span = info_span!(
            "submission",
            id = %submission.id,
            kind = %submission.kind()
        );

        async move {
            let mut state = SubmissionState::Submitted(submission);
            loop {
                let from = state.name();
                state = match self.transition(state).await {
                    Ok(SubmissionState::Resolved(items)) => {
                        info!(items = items.len(), "submission resolved");
                        return Ok(items);
                    }
                    Ok(next) => next,
                    Err(error) => {
                        warn!(
                            stage = error.stage().as_str(),
                            from,
                            "submission failed: {}",
                            error_chain(&error)
                        );
                        return Err(error);
                    }
                };
                debug!(from, to = state.name(), "state transition");
            }
        }
        .instrument(span)
        .await
    }

    /// Performs exactly one step of the state machine.
    pub async fn transition(&self, state: SubmissionState) -> Result<SubmissionState, WorkflowError> {
        match state {
            SubmissionState::Submitted(submission) => self.submit(submission).await,
            SubmissionState::FilesPending { kind, handle } => self.select_files(kind, handle).await,
            SubmissionState::FilesSelected { handle } => Ok(SubmissionState::Polling { handle }),
            SubmissionState::Polling { handle } => self.poll_links(handle).await,
            SubmissionState::LinksReady { links, .. } => self
                .resolver
                .resolve_links(&links)
                .await
                .map(SubmissionState::Resolved)
                .map_err(WorkflowError::Resolution),
            resolved @ SubmissionState::Resolved(_) => Ok(resolved),
        }
    }

    async fn submit(&self, submission: Submission) -> Result<SubmissionState, WorkflowError> {
        let kind = submission.kind();
        let handle = match submission.payload {
            SubmissionPayload::Magnet(magnet) => self.debrid.add_magnet(&magnet).await,
            SubmissionPayload::TorrentFile { filename, bytes } => {
                info!(filename = %filename, size = bytes.len(), "uploading torrent file");
                self.debrid.add_torrent(bytes).await
            }
        }
        .map_err(WorkflowError::Submission)?;

        info!(torrent_id = %handle.id, "torrent added");
        Ok(SubmissionState::FilesPending { kind, handle })
    }

    async fn select_files(
        &self,
        kind: SubmissionKind,
        handle: RemoteTorrentHandle,
    ) -> Result<SubmissionState, WorkflowError> {
        let selection = match kind {
            // The service already knows a magnet's file set.
            SubmissionKind::Magnet => FileSelection::All,
            SubmissionKind::File => {
                tokio::time::sleep(self.upload_settle).await;

                let info = self
                    .debrid
                    .torrent_info(&handle.id)
                    .await
                    .map_err(|source| WorkflowError::SelectFiles {
                        torrent_id: handle.id.clone(),
                        source,
                    })?;
                if info.files.is_empty() {
                    return Err(WorkflowError::NoFilesAvailable {
                        torrent_id: handle.id,
                    });
                }
                info!(
                    torrent_id = %handle.id,
                    files = info.files.len(),
                    total_bytes = info.files.iter().map(|file| file.bytes).sum::<u64>(),
                    "torrent files listed"
                );
                FileSelection::from_files(&info.files)
            }
        };

        debug!(torrent_id = %handle.id, ?selection, "selecting files");
        self.debrid
            .select_files(&handle.id, &selection)
            .await
            .map_err(|source| WorkflowError::SelectFiles {
                torrent_id: handle.id.clone(),
                source,
            })?;

        Ok(SubmissionState::FilesSelected { handle })
    }

    async fn poll_links(&self, handle: RemoteTorrentHandle) -> Result<SubmissionState, WorkflowError> {
        let debrid = &self.debrid;
        let torrent_id = handle.id.as_str();

        let outcome = poll_until(self.poll_policy, |attempt| async move {
            let info = debrid
                .torrent_info(torrent_id)
                .await
                .map_err(|source| WorkflowError::Poll {
                    torrent_id: torrent_id.to_string(),
                    source,
                })?;
            info!(
                torrent_id,
                attempt,
                filename = info.filename.as_deref().unwrap_or_default(),
                status = ?info.status,
                "polled torrent status"
            );

            Ok::<_, WorkflowError>(if !info.links.is_empty() {
                Probe::Ready(info.links)
            } else if info.status == TorrentStatus::Error {
                Probe::Failed
            } else {
                Probe::Pending
            })
        })
        .await?;

        match outcome {
            PollOutcome::Ready { value, .. } => Ok(SubmissionState::LinksReady {
                handle,
                links: value,
            }),
            PollOutcome::Failed { .. } => Err(WorkflowError::RemoteProcessing {
                torrent_id: handle.id,
            }),
            PollOutcome::Exhausted { attempts } => Err(WorkflowError::PollTimeout {
                torrent_id: handle.id,
                attempts,
            }),
        }
    }
}
