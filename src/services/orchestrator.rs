//! Transcode job orchestration.
//!
//! One job per asset hash holds the state of every quality. Each requested
//! quality runs as its own background task that encodes the source one
//! segment at a time; the gap between segments is the checkpoint where a
//! stop request is honored. Committed segments survive a stop and are not
//! encoded again on resume.
//!
//! Locking is per job. `run` serializes the control operations (trigger,
//! stop, resume, remove) for one asset; `record` guards the per-quality map
//! and is only held for short updates. Readers never take either lock: every
//! change is published through a `watch` channel and `status` reads the
//! latest value.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{watch, Mutex, OnceCell, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::quality::Quality;
use crate::models::status::{derive_overall, JobSnapshot, OverallStatus, QualityState, QualityStatus};
use crate::services::blob::{
    master_playlist_key, playlist_key, segment_key, segment_name, source_key, BlobStore,
};
use crate::services::encoder::{Encoder, SegmentRequest, SourceInfo};
use crate::services::job_store::JobStore;
use crate::services::manifest::{master_playlist, media_playlist, segment_plan};
use crate::services::upload::local_source_path;

type QualityMap = BTreeMap<Quality, QualityState>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_parallel_encodes: usize,
    pub segment_ms: u64,
    pub work_dir: PathBuf,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel_encodes: config.max_parallel_encodes,
            segment_ms: config.segment_secs * 1000,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Concurrent encodes for a job with `requested` qualities to run.
    pub fn fan_out(&self, requested: usize) -> usize {
        self.max_parallel_encodes.min(requested).max(1)
    }
}

struct RunControl {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    removed: bool,
}

struct JobHandle {
    hash: String,
    run: Mutex<RunControl>,
    record: Mutex<QualityMap>,
    snapshot: watch::Sender<JobSnapshot>,
    source: OnceCell<(PathBuf, SourceInfo)>,
}

impl JobHandle {
    fn new(hash: &str, states: QualityMap) -> Self {
        let (snapshot, _) = watch::channel(JobSnapshot::from_states(hash, &states));
        Self {
            hash: hash.to_string(),
            run: Mutex::new(RunControl {
                token: CancellationToken::new(),
                tasks: Vec::new(),
                removed: false,
            }),
            record: Mutex::new(states),
            snapshot,
            source: OnceCell::new(),
        }
    }

    /// Must be called with `record` held so snapshots are published in
    /// mutation order.
    fn publish(&self, states: &QualityMap) -> JobSnapshot {
        let snapshot = JobSnapshot::from_states(&self.hash, states);
        self.snapshot.send_replace(snapshot.clone());
        snapshot
    }
}

fn is_active(states: &QualityMap) -> bool {
    states.values().any(|s| s.status.is_active())
}

async fn drain(tasks: &mut Vec<JoinHandle<()>>) {
    for task in tasks.drain(..) {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!("transcode task panicked: {}", e);
            }
        }
    }
}

struct Shared {
    store: JobStore,
    encoder: Arc<dyn Encoder>,
    blobs: Arc<dyn BlobStore>,
    settings: OrchestratorSettings,
}

impl Shared {
    async fn persist(&self, hash: &str, quality: Quality, state: &QualityState) {
        if let Err(e) = self.store.save(hash, quality, state).await {
            tracing::warn!(hash = %hash, quality = %quality, "failed to persist quality state: {}", e);
        }
    }

    /// Local source file for `hash`, fetched from the blob store when the
    /// work dir does not have it, plus its probed properties.
    async fn prepare_source(&self, hash: &str) -> AppResult<(PathBuf, SourceInfo)> {
        let path = local_source_path(&self.settings.work_dir, hash);
        if !fs::try_exists(&path).await? {
            tracing::info!(hash = %hash, "fetching source from blob store");
            let partial = path.with_extension("partial");
            self.blobs.fetch_to_file(&source_key(hash), &partial).await?;
            fs::rename(&partial, &path).await?;
        }
        let info = self.encoder.probe(&path).await?;
        Ok((path, info))
    }

    fn segment_dir(&self, hash: &str, quality: Quality) -> PathBuf {
        self.settings.work_dir.join(hash).join(quality.label())
    }
}

/// Everything a quality task needs; one per dispatch.
#[derive(Clone)]
struct Dispatch {
    shared: Arc<Shared>,
    job: Arc<JobHandle>,
    token: CancellationToken,
    permits: Arc<Semaphore>,
    source: PathBuf,
}

impl Dispatch {
    async fn run_quality(self, quality: Quality) {
        let hash = self.job.hash.clone();
        let _permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return,
            },
        };

        let (start, plan) = {
            let mut states = self.job.record.lock().await;
            if self.token.is_cancelled() {
                return;
            }
            let Some(state) = states.get_mut(&quality) else { return };
            if state.status != QualityStatus::Pending {
                return;
            }
            state.status = QualityStatus::Running;
            state.message = None;
            let snapshot = state.clone();
            self.shared.persist(&hash, quality, &snapshot).await;
            self.job.publish(&states);
            (
                snapshot.segments_done,
                segment_plan(snapshot.duration_ms, snapshot.segment_ms),
            )
        };
        tracing::info!(hash = %hash, quality = %quality, from_segment = start, segments = plan.len(), "encode started");

        let segment_ms = self.shared.settings.segment_ms;
        let dir = self.shared.segment_dir(&hash, quality);

        for index in start..plan.len() as u32 {
            if self.token.is_cancelled() {
                tracing::info!(hash = %hash, quality = %quality, index, "encode halted at checkpoint");
                return;
            }

            let output = dir.join(segment_name(index));
            let request = SegmentRequest {
                source: &self.source,
                quality,
                index,
                start_ms: index as u64 * segment_ms,
                duration_ms: plan[index as usize],
                output: &output,
            };

            let encoded = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    let _ = fs::remove_file(&output).await;
                    tracing::info!(hash = %hash, quality = %quality, index, "in-flight segment abandoned");
                    return;
                }
                result = self.shared.encoder.encode_segment(request) => result,
            };

            let stored = match encoded {
                Ok(()) => {
                    self.shared
                        .blobs
                        .put_file(&segment_key(&hash, quality, index), &output, "video/mp2t")
                        .await
                }
                Err(e) => Err(e),
            };
            let _ = fs::remove_file(&output).await;
            if let Err(e) = stored {
                self.fail(quality, e).await;
                return;
            }

            let mut states = self.job.record.lock().await;
            if self.token.is_cancelled() {
                return;
            }
            let Some(state) = states.get_mut(&quality) else { return };
            state.segments_done = index + 1;
            state.progress = state.progress.max(state.segment_progress());
            let snapshot = state.clone();
            self.shared.persist(&hash, quality, &snapshot).await;
            self.job.publish(&states);
        }

        let playlist = media_playlist(&plan);
        if let Err(e) = self
            .shared
            .blobs
            .put_bytes(&playlist_key(&hash, quality), playlist.into_bytes(), "application/vnd.apple.mpegurl")
            .await
        {
            self.fail(quality, e).await;
            return;
        }

        let finished = {
            let mut states = self.job.record.lock().await;
            if self.token.is_cancelled() {
                return;
            }
            let Some(state) = states.get_mut(&quality) else { return };
            state.status = QualityStatus::Ok;
            state.progress = 100;
            let snapshot = state.clone();
            self.shared.persist(&hash, quality, &snapshot).await;
            let published = self.job.publish(&states);
            (published.overall == OverallStatus::Ok).then(|| {
                states
                    .iter()
                    .filter(|(q, s)| s.status == QualityStatus::Ok && q.dimensions().is_some())
                    .map(|(q, _)| *q)
                    .collect::<Vec<_>>()
            })
        };
        tracing::info!(hash = %hash, quality = %quality, "encode finished");

        if let Some(renditions) = finished {
            let master = master_playlist(&renditions);
            match self
                .shared
                .blobs
                .put_bytes(&master_playlist_key(&hash), master.into_bytes(), "application/vnd.apple.mpegurl")
                .await
            {
                Ok(()) => tracing::info!(hash = %hash, renditions = renditions.len(), "transcode job complete"),
                Err(e) => tracing::error!(hash = %hash, "failed to write master playlist: {}", e),
            }
        }
    }

    async fn fail(&self, quality: Quality, error: AppError) {
        let mut states = self.job.record.lock().await;
        if self.token.is_cancelled() {
            return;
        }
        let Some(state) = states.get_mut(&quality) else { return };
        tracing::error!(hash = %self.job.hash, quality = %quality, "encode failed: {}", error);
        state.status = QualityStatus::Error;
        state.message = Some(error.to_string());
        let snapshot = state.clone();
        self.shared.persist(&self.job.hash, quality, &snapshot).await;
        self.job.publish(&states);
    }
}

pub struct TranscodeOrchestrator {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    shared: Arc<Shared>,
}

impl TranscodeOrchestrator {
    pub fn new(
        store: JobStore,
        encoder: Arc<dyn Encoder>,
        blobs: Arc<dyn BlobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            shared: Arc::new(Shared {
                store,
                encoder,
                blobs,
                settings,
            }),
        }
    }

    /// Reloads persisted jobs. Qualities a crash left pending or running
    /// become interrupted, so the job reads as stopped until resumed.
    pub async fn recover(&self) -> AppResult<usize> {
        let stored = self.shared.store.load_all().await?;
        let count = stored.len();
        let mut jobs = self.jobs.write().await;

        for (hash, mut states) in stored {
            for (quality, state) in states.iter_mut() {
                if state.status.is_active() {
                    state.status = QualityStatus::Interrupted;
                    self.shared.persist(&hash, *quality, state).await;
                }
            }
            tracing::info!(
                hash = %hash,
                overall = ?derive_overall(states.values().map(|s| s.status)),
                "recovered transcode job"
            );
            jobs.insert(hash.clone(), Arc::new(JobHandle::new(&hash, states)));
        }
        Ok(count)
    }

    async fn job(&self, hash: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(hash).cloned()
    }

    async fn job_or_insert(&self, hash: &str) -> Arc<JobHandle> {
        if let Some(job) = self.job(hash).await {
            return job;
        }
        self.jobs
            .write()
            .await
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(JobHandle::new(hash, QualityMap::new())))
            .clone()
    }

    /// Current snapshot; an empty pending one if no job ever ran.
    pub async fn status(&self, hash: &str) -> JobSnapshot {
        match self.job(hash).await {
            Some(job) => job.snapshot.borrow().clone(),
            None => JobSnapshot::empty(hash),
        }
    }

    /// Push channel of snapshots for `hash`.
    pub async fn subscribe(&self, hash: &str) -> watch::Receiver<JobSnapshot> {
        self.job_or_insert(hash).await.snapshot.subscribe()
    }

    /// True while any quality of the job is pending or running.
    pub async fn is_active(&self, hash: &str) -> bool {
        match self.job(hash).await {
            Some(job) => is_active(&*job.record.lock().await),
            None => false,
        }
    }

    fn dispatch(&self, job: &Arc<JobHandle>, run: &mut RunControl, source: PathBuf, pending: Vec<Quality>) {
        run.token = CancellationToken::new();
        let fan_out = self.shared.settings.fan_out(pending.len());
        tracing::debug!(hash = %job.hash, qualities = pending.len(), fan_out, "dispatching encodes");

        let dispatch = Dispatch {
            shared: self.shared.clone(),
            job: job.clone(),
            token: run.token.clone(),
            permits: Arc::new(Semaphore::new(fan_out)),
            source,
        };
        for quality in pending {
            run.tasks.push(tokio::spawn(dispatch.clone().run_quality(quality)));
        }
    }

    /// Starts a job for `hash`. `Original` in `requested` is ignored; it is
    /// always tracked as done. Qualities not smaller than the source, or not
    /// requested, are skipped.
    pub async fn trigger(&self, hash: &str, requested: &[Quality]) -> AppResult<JobSnapshot> {
        let wanted: Vec<Quality> = requested
            .iter()
            .copied()
            .filter(|q| *q != Quality::Original)
            .collect();
        if wanted.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one encodable quality must be requested".to_string(),
            ));
        }

        let job = self.job_or_insert(hash).await;
        let mut run = job.run.lock().await;
        if run.removed {
            return Err(AppError::Conflict(format!("video {} is being deleted", hash)));
        }
        if !self.shared.store.asset_exists(hash).await? {
            return Err(AppError::NotFound(format!("video {} not found", hash)));
        }
        if is_active(&*job.record.lock().await) {
            return Err(AppError::Conflict(format!(
                "a transcode job for {} is already running",
                hash
            )));
        }

        let (source, info) = job
            .source
            .get_or_try_init(|| self.shared.prepare_source(hash))
            .await?
            .clone();

        drain(&mut run.tasks).await;

        let segment_ms = self.shared.settings.segment_ms;
        let segments_total = segment_plan(info.duration_ms, segment_ms).len() as u32;
        let mut states = QualityMap::new();
        states.insert(Quality::Original, QualityState::original());
        for quality in Quality::LADDER {
            let state = if wanted.contains(&quality) && quality.fits_source(info.height) {
                QualityState {
                    segments_total,
                    segment_ms,
                    duration_ms: info.duration_ms,
                    ..QualityState::pending()
                }
            } else {
                QualityState::skipped()
            };
            states.insert(quality, state);
        }
        let pending: Vec<Quality> = states
            .iter()
            .filter(|(_, s)| s.status == QualityStatus::Pending)
            .map(|(q, _)| *q)
            .collect();

        self.shared.store.delete_for_asset(hash).await?;
        self.shared.store.save_all(hash, &states).await?;

        let snapshot = {
            let mut record = job.record.lock().await;
            *record = states;
            job.publish(&record)
        };
        tracing::info!(hash = %hash, pending = pending.len(), source_height = info.height, "transcode triggered");

        self.dispatch(&job, &mut run, source, pending);
        Ok(snapshot)
    }

    /// Halts every pending or running quality at its next checkpoint.
    /// Finished qualities are untouched.
    pub async fn stop(&self, hash: &str) -> AppResult<JobSnapshot> {
        let job = self
            .job(hash)
            .await
            .ok_or_else(|| AppError::NotFound(format!("no transcode job for {}", hash)))?;
        let run = job.run.lock().await;
        let mut states = job.record.lock().await;
        if states.is_empty() {
            return Err(AppError::NotFound(format!("no transcode job for {}", hash)));
        }
        if !is_active(&states) {
            return Err(AppError::precondition(format!(
                "transcode job for {} is not running",
                hash
            )));
        }

        // Cancel while holding the record so no task commits after this.
        run.token.cancel();
        for (quality, state) in states.iter_mut() {
            if state.status.is_active() {
                state.status = QualityStatus::Interrupted;
                self.shared.persist(hash, *quality, state).await;
            }
        }
        let snapshot = job.publish(&states);
        tracing::info!(hash = %hash, "transcode job stopped");
        Ok(snapshot)
    }

    /// Re-dispatches interrupted qualities from their first uncommitted
    /// segment.
    pub async fn resume(&self, hash: &str) -> AppResult<JobSnapshot> {
        let no_stopped_job = || AppError::precondition(format!("no stopped transcode job for {}", hash));

        let job = self.job(hash).await.ok_or_else(no_stopped_job)?;
        let mut run = job.run.lock().await;
        if run.removed {
            return Err(no_stopped_job());
        }
        let overall = derive_overall(job.record.lock().await.values().map(|s| s.status));
        if overall != OverallStatus::Stopped {
            return Err(no_stopped_job());
        }

        let (source, _) = job
            .source
            .get_or_try_init(|| self.shared.prepare_source(hash))
            .await?
            .clone();

        drain(&mut run.tasks).await;

        let (snapshot, pending) = {
            let mut states = job.record.lock().await;
            let mut pending = Vec::new();
            for (quality, state) in states.iter_mut() {
                if state.status == QualityStatus::Interrupted {
                    state.status = QualityStatus::Pending;
                    self.shared.persist(hash, *quality, state).await;
                    pending.push(*quality);
                }
            }
            (job.publish(&states), pending)
        };
        tracing::info!(hash = %hash, qualities = pending.len(), "transcode job resumed");

        self.dispatch(&job, &mut run, source, pending);
        Ok(snapshot)
    }

    /// Forgets the job for `hash` and deletes its rows and scratch files.
    /// Refused with `Conflict` while the job is active.
    ///
    /// `finish` runs while the job's control lock is held and the job is
    /// marked removed, so no trigger or resume can start until the caller
    /// has dropped the asset itself. If `finish` fails the job is kept.
    pub async fn remove<F, Fut>(&self, hash: &str, finish: F) -> AppResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<()>>,
    {
        let job = self.job_or_insert(hash).await;
        let mut run = job.run.lock().await;
        if run.removed {
            return Err(AppError::NotFound(format!("video {} not found", hash)));
        }
        if is_active(&*job.record.lock().await) {
            return Err(AppError::Conflict(format!(
                "video {} has an active transcode job",
                hash
            )));
        }
        run.token.cancel();
        drain(&mut run.tasks).await;

        run.removed = true;
        if let Err(e) = finish().await {
            run.removed = false;
            return Err(e);
        }

        job.record.lock().await.clear();
        job.snapshot.send_replace(JobSnapshot::empty(hash));
        {
            let mut jobs = self.jobs.write().await;
            if jobs.get(hash).is_some_and(|j| Arc::ptr_eq(j, &job)) {
                jobs.remove(hash);
            }
        }

        self.shared.store.delete_for_asset(hash).await?;
        match fs::remove_dir_all(self.shared.settings.work_dir.join(hash)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_is_bounded() {
        let settings = OrchestratorSettings {
            max_parallel_encodes: 3,
            segment_ms: 6000,
            work_dir: PathBuf::from("w"),
        };
        assert_eq!(settings.fan_out(2), 2);
        assert_eq!(settings.fan_out(4), 3);
        assert_eq!(settings.fan_out(0), 1);
    }
}
