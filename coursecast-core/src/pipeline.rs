//! High-level pipeline: delivers a scanned course, phase by phase.
//!
//! # Phases
//!   - Archive: loose assets are zipped into `<work_dir>/Files.zip`, chunked at
//!     the unit ceiling and sent as documents
//!   - Videos: module by module, each video is segmented if needed, probed,
//!     thumbnailed and sent part by part
//!   - Index: the course menu listing every tag is sent and pinned
//!   - Chat: invite link, chat description and the course card
//!
//! # Major Types
//! - [`Pipeline`]: holds the collaborators (transport, media tool, ledger)
//! - [`DeliveryReport`]: what was sent, skipped and measured
//!
//! # Error Handling
//! Archive creation, chunk I/O, exhausted retries, rejected units and
//! cancellation abort the run. A video that cannot be segmented is skipped
//! with a warning. Everything after the videos (index, pin, chat updates) is
//! best-effort.
//!
//! # Resuming
//! Ledger keys are artifact paths, so `work_dir` must be stable between runs.
//! Every generated file (archive, parts, thumbnails) lives under `work_dir`;
//! the course folder is only ever read.
//! Already delivered units are skipped without touching the transport.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::captions::{
    archive_caption, assets_size, chat_description, course_card, video_caption, videos_size, IndexBuilder,
};
use crate::chunker::split_file;
use crate::config::PipelineConfig;
use crate::contract::{CancelSignal, Destination, MediaKind, ProgressObserver, SilentObserver, Transport};
use crate::error::{DeliveryError, PipelineError};
use crate::ledger::ProgressLedger;
use crate::media::{collect_meta, probe_meta, MediaTool};
use crate::model::{Course, Split, Video};
use crate::orchestrator::{UnitOutcome, UploadOrchestrator};
use crate::packager::AssetPackager;
use crate::segmenter::segment_video;

pub const ARCHIVE_NAME: &str = "Files.zip";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoReport {
    pub id: String,
    pub title: String,
    pub module: String,
    pub parts: usize,
    /// Parts found in the ledger and not re-sent.
    pub resumed_parts: usize,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Archive parts delivered or found already delivered.
    pub archive_parts: usize,
    pub videos: Vec<VideoReport>,
    /// Ids of videos that could not be segmented.
    pub skipped_videos: Vec<String>,
    pub total_bytes: u64,
    pub total_duration_secs: u64,
    pub index_message_id: Option<i64>,
    pub invite_link: Option<String>,
}

pub struct Pipeline {
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaTool>,
    ledger: Arc<ProgressLedger>,
    destination: Destination,
    config: PipelineConfig,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancelSignal,
}

impl Pipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaTool>,
        ledger: Arc<ProgressLedger>,
        destination: Destination,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transport,
            media,
            ledger,
            destination,
            config,
            observer: Arc::new(SilentObserver),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn archive_path(&self) -> PathBuf {
        self.config.work_dir.join(ARCHIVE_NAME)
    }

    /// Scratch directory for the segments and thumbnails of one video.
    /// Keyed by id so equal file names in different modules never collide.
    pub fn video_dir(&self, video: &Video) -> PathBuf {
        self.config.work_dir.join(&video.id)
    }

    pub async fn run(&self, course: &mut Course) -> Result<DeliveryReport, PipelineError> {
        info!(course = %course.name, destination = %self.destination.id(), "[PIPELINE] Starting delivery");

        let mut report = DeliveryReport::default();
        if course.is_empty() {
            warn!(course = %course.name, "[PIPELINE] Nothing to send");
            return Ok(report);
        }
        report.total_bytes = assets_size(&course.assets) + videos_size(&course.modules);

        let orchestrator = UploadOrchestrator::new(
            self.transport.clone(),
            self.ledger.clone(),
            self.destination.clone(),
            self.config.retry.clone(),
        )
        .with_observer(self.observer.clone())
        .with_cancel(self.cancel.clone());
        let mut index = IndexBuilder::new();

        // --- Phase 1: support material ---
        if !course.assets.is_empty() {
            report.archive_parts = self.deliver_archive(course, &orchestrator, &mut index).await?;
        }

        // --- Phase 2: videos ---
        for module in course.modules.iter_mut() {
            info!(module = %module.name, videos = module.videos.len(), "[PIPELINE] Module");
            index.start_module(&module.name);

            for video in module.videos.iter_mut() {
                match self.deliver_video(video, &orchestrator).await? {
                    Some(video_report) => {
                        index.add_video(video);
                        report.total_duration_secs += video_report.duration_secs;
                        report.videos.push(video_report);
                    }
                    None => report.skipped_videos.push(video.id.clone()),
                }
            }
        }

        // --- Phase 3: index ---
        if index.has_videos() {
            report.index_message_id = self.publish_index(&orchestrator, &index).await?;
        }

        // --- Phase 4: chat details ---
        report.invite_link = self.publish_chat_details(course, &orchestrator, &report).await?;

        info!(
            course = %course.name,
            archive_parts = report.archive_parts,
            videos = report.videos.len(),
            skipped = report.skipped_videos.len(),
            "[PIPELINE] Delivery complete"
        );
        Ok(report)
    }

    async fn deliver_archive(
        &self,
        course: &Course,
        orchestrator: &UploadOrchestrator,
        index: &mut IndexBuilder,
    ) -> Result<usize, PipelineError> {
        info!(assets = course.assets.len(), "[PIPELINE] Packaging support material");
        let archive = self.archive_path();
        let root = course.root.clone();
        let assets = course.assets.clone();
        let ceiling = self.config.max_unit_size;
        let target = archive.clone();

        let split = blocking("archive", move || -> Result<Option<Split>, PipelineError> {
            match AssetPackager::new(&root).package(&assets, &target)? {
                Some(packed) => Ok(Some(split_file(&packed, ceiling)?)),
                None => Ok(None),
            }
        })
        .await?;
        let Some(split) = split else {
            return Ok(0);
        };

        let mut delivered = 0;
        for unit in split.into_units(true) {
            let caption = archive_caption(unit.index, unit.count);
            orchestrator.deliver(&unit, &caption, MediaKind::Document).await?;
            index.add_doc(unit.index);
            delivered += 1;
        }

        remove_quietly(&archive).await;
        Ok(delivered)
    }

    /// Sends every part of `video`. `None` means the video was skipped.
    async fn deliver_video(
        &self,
        video: &mut Video,
        orchestrator: &UploadOrchestrator,
    ) -> Result<Option<VideoReport>, PipelineError> {
        let media = self.media.clone();
        let path = video.path.clone();
        let ceiling = self.config.max_unit_size;
        let out_dir = self.video_dir(video);
        let seg_dir = out_dir.clone();
        let segmented = blocking("segment", move || {
            Ok(segment_video(media.as_ref(), &path, ceiling, &seg_dir))
        })
        .await?;
        let split = match segmented {
            Ok(split) => split,
            Err(e) => {
                warn!(video = %video.id, file = %video.path.display(), error = %e, "[PIPELINE] Skipping video");
                remove_dir_quietly(&out_dir).await;
                return Ok(None);
            }
        };

        let mut video_report = VideoReport {
            id: video.id.clone(),
            title: video.title.clone(),
            module: video.module.clone(),
            parts: split.len(),
            ..Default::default()
        };

        for unit in split.into_units(false) {
            let already = self.ledger.is_delivered(&unit.ledger_key());
            let media = self.media.clone();
            let part = unit.path.clone();
            let thumb_dir = out_dir.clone();
            // Delivered parts are probed for totals only; no thumbnail is needed.
            let meta = blocking("metadata", move || {
                Ok(if already {
                    probe_meta(media.as_ref(), &part).unwrap_or_default()
                } else {
                    collect_meta(media.as_ref(), &part, &thumb_dir)
                })
            })
            .await?;
            video_report.duration_secs += meta.duration_secs;
            let thumbnail = meta.thumbnail.clone();

            let caption = video_caption(video, unit.index, unit.count);
            let outcome = orchestrator.deliver(&unit, &caption, MediaKind::Video(meta)).await;
            if let Some(thumb) = thumbnail {
                remove_quietly(&thumb).await;
            }
            if outcome? == UnitOutcome::Skipped {
                video_report.resumed_parts += 1;
            }
        }

        remove_dir_quietly(&out_dir).await;
        video.duration_secs = Some(video_report.duration_secs);
        debug!(video = %video.id, secs = video_report.duration_secs, "[PIPELINE] Video done");
        Ok(Some(video_report))
    }

    async fn publish_index(
        &self,
        orchestrator: &UploadOrchestrator,
        index: &IndexBuilder,
    ) -> Result<Option<i64>, PipelineError> {
        let sent = match best_effort("send index", orchestrator.send_text_with_backoff(&index.render()).await)? {
            Some(sent) => sent,
            None => return Ok(None),
        };
        info!(message_id = sent.message_id, "[PIPELINE] Index sent");
        if best_effort("pin index", orchestrator.pin_with_backoff(sent.message_id).await)?.is_some() {
            info!(message_id = sent.message_id, "[PIPELINE] Index pinned");
        }
        Ok(Some(sent.message_id))
    }

    async fn publish_chat_details(
        &self,
        course: &Course,
        orchestrator: &UploadOrchestrator,
        report: &DeliveryReport,
    ) -> Result<Option<String>, PipelineError> {
        let dest = orchestrator.destination();
        let invite = best_effort(
            "export invite link",
            orchestrator
                .call_with_backoff("export invite link", || self.transport.export_invite_link(dest))
                .await,
        )?;
        let logo = self.config.logo.as_deref();

        let description = chat_description(report.total_bytes, report.total_duration_secs, invite.as_deref(), logo);
        best_effort(
            "set description",
            orchestrator
                .call_with_backoff("set description", || self.transport.set_description(dest, &description))
                .await,
        )?;

        let card = course_card(
            &course.name,
            report.total_bytes,
            report.total_duration_secs,
            logo,
            invite.as_deref(),
        );
        if best_effort("send course card", orchestrator.send_text_with_backoff(&card).await)?.is_some() {
            info!("[PIPELINE] Course card posted");
        }
        Ok(invite)
    }
}

/// Turns a failure into a warning, except cancellation which still aborts.
fn best_effort<T>(what: &str, result: Result<T, DeliveryError>) -> Result<Option<T>, PipelineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DeliveryError::Cancelled) => {
            error!(step = what, "[PIPELINE] Cancelled");
            Err(DeliveryError::Cancelled.into())
        }
        Err(e) => {
            warn!(step = what, error = %e, "[PIPELINE] Best-effort step failed");
            Ok(None)
        }
    }
}

async fn blocking<T, F>(stage: &str, f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Task {
            stage: stage.to_string(),
            reason: e.to_string(),
        })?
}

/// Removes an emptied scratch directory; anything still inside keeps it.
async fn remove_dir_quietly(path: &Path) {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => debug!(path = %path.display(), "[PIPELINE] Removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "[PIPELINE] Scratch directory kept"),
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "[PIPELINE] Removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "[PIPELINE] Could not remove"),
    }
}
