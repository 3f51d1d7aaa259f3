//! Pipeline execution: one worker per task up to `PUSH_COMPLETE`, then a
//! shared watcher that follows every pushed job through the summary
//! endpoint.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use pow_core::{Cid, Codec, JobId, JobStatus, JobsSummary, StorageConfig, StorageJob};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use super::backend::PipelineBackend;
use super::budget::StagingLimit;
use super::results::ResultsFile;
use super::task::{merge, scan_folder, Task, TaskStage};
use super::{PipelineConfig, PipelineError};

/// Outcome counts of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PipelineReport {
    pub total: usize,
    pub complete: usize,
    pub dry_run: usize,
    pub errored: usize,
}

impl PipelineReport {
    fn from_tasks(tasks: &[Task]) -> Self {
        let mut report = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            if task.is_errored() {
                report.errored += 1;
            } else if task.stage == TaskStage::Complete {
                report.complete += 1;
            } else if task.stage == TaskStage::DryRunComplete {
                report.dry_run += 1;
            }
        }
        report
    }
}

pub struct Pipeline<B: PipelineBackend> {
    inner: Arc<Inner<B>>,
}

struct Inner<B> {
    backend: B,
    config: PipelineConfig,
    limit: StagingLimit,
    results: ResultsFile,
    state: Mutex<State>,
    wake: Notify,
}

struct State {
    tasks: Vec<Task>,
    /// Tasks holding staging budget.
    reserved: HashSet<usize>,
    workers: usize,
}

impl<B: PipelineBackend> Pipeline<B> {
    /// A pipeline over `tasks`, persisting progress to `results`.
    pub fn new(
        backend: B,
        config: PipelineConfig,
        results: ResultsFile,
        tasks: Vec<Task>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let limit = StagingLimit::new(config.max_staged_bytes);
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                config,
                limit,
                results,
                state: Mutex::new(State {
                    tasks,
                    reserved: HashSet::new(),
                    workers: 0,
                }),
                wake: Notify::new(),
            }),
        })
    }

    /// Tasks for every top-level entry of `root`, merged with a previous
    /// run's results file.
    pub fn for_folder(
        backend: B,
        config: PipelineConfig,
        results: ResultsFile,
        root: &Path,
        include_hidden: bool,
    ) -> Result<Self, PipelineError> {
        let mut known = results.load()?;
        for task in &mut known {
            task.rewind(false);
        }
        let tasks = merge(known, scan_folder(root, include_hidden)?);
        Self::new(backend, config, results, tasks)
    }

    /// Continue a previous run from its results file. Configs are applied
    /// with the hot tier disabled.
    pub fn resume(
        backend: B,
        mut config: PipelineConfig,
        results: ResultsFile,
        retry_errors: bool,
    ) -> Result<Self, PipelineError> {
        let mut tasks = results.load()?;
        for task in &mut tasks {
            task.rewind(retry_errors);
        }
        config.disable_hot = true;
        Self::new(backend, config, results, tasks)
    }

    /// Snapshot of the task list.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().tasks.clone()
    }

    pub fn staging_limit(&self) -> &StagingLimit {
        &self.inner.limit
    }

    /// Process every pending task to a final stage or an error.
    pub async fn run(self) -> Result<PipelineReport, PipelineError> {
        let inner = self.inner;
        let order = {
            let state = inner.state.lock();
            inner.results.save(&state.tasks)?;
            let mut order: Vec<(usize, TaskStage)> = state
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_pending())
                .map(|(i, t)| (i, t.stage))
                .collect();
            order.sort_by_key(|(_, stage)| Reverse(*stage));
            order
        };
        tracing::info!(pending = order.len(), dry_run = inner.config.dry_run, "pipeline starting");

        let mut workers = JoinSet::new();
        for (idx, stage) in order {
            if stage >= TaskStage::PushComplete {
                if inner.config.dry_run {
                    inner.update(idx, |t| t.stage = TaskStage::DryRunComplete);
                } else {
                    inner.hold(idx);
                }
                continue;
            }
            inner.state.lock().workers += 1;
            workers.spawn(worker(inner.clone(), idx));
        }

        let watcher = watch(inner.clone());
        let joined = async {
            while let Some(res) = workers.join_next().await {
                if let Err(err) = res {
                    tracing::error!(error = %err, "pipeline worker panicked");
                }
            }
        };
        tokio::join!(watcher, joined);

        let state = inner.state.lock();
        inner.results.save(&state.tasks)?;
        let report = PipelineReport::from_tasks(&state.tasks);
        tracing::info!(?report, "pipeline finished");
        Ok(report)
    }
}

/// Decrements the worker count when a worker ends, panics included.
struct WorkerGuard<B: PipelineBackend>(Arc<Inner<B>>);

impl<B: PipelineBackend> Drop for WorkerGuard<B> {
    fn drop(&mut self) {
        self.0.state.lock().workers -= 1;
        self.0.wake.notify_one();
    }
}

async fn worker<B: PipelineBackend>(inner: Arc<Inner<B>>, idx: usize) {
    let _guard = WorkerGuard(inner.clone());
    if let Err(err) = inner.push(idx).await {
        inner.fail(idx, err.to_string());
    }
}

async fn watch<B: PipelineBackend>(inner: Arc<Inner<B>>) {
    let backoff = inner.config.watch_backoff;
    let mut interval = backoff.initial;
    loop {
        let watched = inner.watched();
        if watched.is_empty() {
            if inner.state.lock().workers == 0 {
                return;
            }
            inner.wake.notified().await;
            continue;
        }

        let mut cids: Vec<Cid> = Vec::new();
        for (_, cid, _) in &watched {
            if !cids.contains(cid) {
                cids.push(cid.clone());
            }
        }
        let progressed = match inner.backend.summary(&cids).await {
            Ok(summary) => inner.apply_summary(&watched, &summary),
            Err(err) => {
                tracing::warn!(error = %err, "fetching job summary failed");
                false
            }
        };
        interval = if progressed {
            backoff.initial
        } else {
            backoff.next(interval)
        };
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = inner.wake.notified() => {}
        }
    }
}

impl<B: PipelineBackend> Inner<B> {
    fn task(&self, idx: usize) -> Task {
        self.state.lock().tasks[idx].clone()
    }

    /// Mutate one task and rewrite the results file.
    fn update(&self, idx: usize, f: impl FnOnce(&mut Task)) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let task = &mut state.tasks[idx];
        f(task);
        tracing::debug!(task = %task.name, stage = ?task.stage, "task updated");
        self.persist(&state.tasks);
    }

    fn persist(&self, tasks: &[Task]) {
        if let Err(err) = self.results.save(tasks) {
            tracing::warn!(error = %err, "writing results file failed");
        }
    }

    /// Count a resumed, already pushed task against the budget until the
    /// watcher sees its job finish.
    fn hold(&self, idx: usize) {
        let mut state = self.state.lock();
        if state.reserved.insert(idx) {
            self.limit.hold(state.tasks[idx].bytes);
        }
    }

    fn release(&self, idx: usize) {
        let mut state = self.state.lock();
        if state.reserved.remove(&idx) {
            self.limit.done(state.tasks[idx].bytes);
        }
    }

    fn fail(&self, idx: usize, message: String) {
        self.update(idx, |t| {
            tracing::warn!(task = %t.name, stage = ?t.stage, error = %message, "task failed");
            t.error = Some(message);
        });
        self.release(idx);
    }

    /// Wait for staging budget, backing off while it is full.
    async fn admit(&self, idx: usize, bytes: u64) -> Result<(), PipelineError> {
        let backoff = self.config.ready_backoff;
        let mut delay = backoff.initial;
        loop {
            if self.limit.ready(bytes)? {
                self.state.lock().reserved.insert(idx);
                return Ok(());
            }
            tokio::time::sleep(delay).await;
            delay = backoff.next(delay);
        }
    }

    async fn storage_config(&self, task: &Task) -> Result<Option<StorageConfig>, PipelineError> {
        let config = task
            .config
            .clone()
            .or_else(|| self.config.storage_config.clone());
        if !self.config.disable_hot || self.config.dry_run {
            return Ok(config);
        }
        let mut config = match config {
            Some(config) => config,
            None => self.backend.default_config().await?,
        };
        config.hot.enabled = false;
        Ok(Some(config))
    }

    /// Stage and apply one task, leaving it for the watcher.
    async fn push(&self, idx: usize) -> Result<(), PipelineError> {
        let task = self.task(idx);
        if task.bytes > self.config.max_deal_bytes {
            return Err(PipelineError::TooLarge {
                bytes: task.bytes,
                max: self.config.max_deal_bytes,
            });
        }
        self.admit(idx, task.bytes).await?;

        self.update(idx, |t| t.stage = TaskStage::Staging);
        let cid = if self.config.dry_run {
            Cid::for_content(Codec::Raw, task.path.to_string_lossy().as_bytes())
        } else {
            self.backend.stage(&task.path, task.is_dir).await?
        };
        self.update(idx, |t| {
            t.cid = Some(cid.clone());
            t.stage = TaskStage::StagingComplete;
        });

        let config = self.storage_config(&task).await?;
        self.update(idx, |t| t.stage = TaskStage::Pushing);
        let job_id = if self.config.dry_run {
            JobId::new()
        } else {
            self.backend.apply(&cid, config).await?
        };
        self.update(idx, |t| {
            t.job_id = Some(job_id);
            t.jobs.push(job_id);
            t.stage = TaskStage::PushComplete;
        });

        if self.config.dry_run {
            self.update(idx, |t| t.stage = TaskStage::DryRunComplete);
            self.release(idx);
            return Ok(());
        }
        self.update(idx, |t| t.stage = TaskStage::DealStarting);
        tracing::info!(task = %task.name, cid = %cid, job_id = %job_id, "task pushed");
        self.wake.notify_one();
        Ok(())
    }

    fn watched(&self) -> Vec<(usize, Cid, JobId)> {
        self.state
            .lock()
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_errored() && t.stage.is_watched())
            .filter_map(|(i, t)| Some((i, t.cid.clone()?, t.job_id?)))
            .collect()
    }

    /// Move watched tasks forward from a summary. Returns whether any task
    /// changed.
    fn apply_summary(&self, watched: &[(usize, Cid, JobId)], summary: &JobsSummary) -> bool {
        let jobs: HashMap<JobId, &StorageJob> = summary
            .queued
            .iter()
            .chain(&summary.executing)
            .chain(&summary.latest_final)
            .map(|job| (job.id, job))
            .collect();

        let mut finished = Vec::new();
        let mut changed = false;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            for (idx, _, job_id) in watched {
                let Some(job) = jobs.get(job_id) else {
                    continue;
                };
                let task = &mut state.tasks[*idx];
                match job.status {
                    JobStatus::Queued if task.stage < TaskStage::DealQueued => {
                        task.stage = TaskStage::DealQueued;
                        changed = true;
                    }
                    JobStatus::Executing if task.stage < TaskStage::DealExecuting => {
                        task.stage = TaskStage::DealExecuting;
                        changed = true;
                    }
                    JobStatus::Success => {
                        task.stage = TaskStage::DealComplete;
                        self.persist(&state.tasks);
                        let task = &mut state.tasks[*idx];
                        task.stage = TaskStage::Complete;
                        tracing::info!(task = %task.name, job_id = %job_id, "task complete");
                        finished.push(*idx);
                        changed = true;
                    }
                    JobStatus::Failed | JobStatus::Canceled => {
                        let cause = job
                            .error_cause
                            .clone()
                            .unwrap_or_else(|| format!("job ended {:?}", job.status));
                        tracing::warn!(task = %task.name, job_id = %job_id, error = %cause, "task deal failed");
                        task.error = Some(cause);
                        finished.push(*idx);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if changed {
                self.persist(&state.tasks);
            }
        }
        for idx in finished {
            self.release(idx);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::pipeline::Backoff;
    use async_trait::async_trait;
    use pow_core::{ErrorKind, ProfileId};
    use std::time::Duration;

    const MIB: u64 = 1 << 20;

    /// Jobs succeed on the first summary after apply. Tracks the bytes
    /// between stage and success to check the budget from outside.
    #[derive(Default)]
    struct FakeBackend {
        inner: Mutex<Fake>,
        fail_cids: Vec<String>,
    }

    #[derive(Default)]
    struct Fake {
        sizes: HashMap<String, u64>,
        applied: Vec<(Cid, JobId, Option<StorageConfig>)>,
        staged: Vec<String>,
        in_flight: u64,
        peak: u64,
        done: HashSet<JobId>,
        /// Jobs from an earlier run with the summaries left before success.
        earlier: Vec<(String, Cid, JobId, u32)>,
        log: Vec<String>,
    }

    #[async_trait]
    impl PipelineBackend for FakeBackend {
        async fn stage(&self, path: &Path, _is_dir: bool) -> Result<Cid, ClientError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let mut guard = self.inner.lock();
            let fake = &mut *guard;
            let bytes = *fake.sizes.get(&name).unwrap_or(&0);
            fake.in_flight += bytes;
            fake.peak = fake.peak.max(fake.in_flight);
            fake.staged.push(name.clone());
            fake.log.push(format!("stage {name}"));
            Ok(Cid::for_content(Codec::Raw, name.as_bytes()))
        }

        async fn apply(
            &self,
            cid: &Cid,
            config: Option<StorageConfig>,
        ) -> Result<JobId, ClientError> {
            let id = JobId::new();
            self.inner.lock().applied.push((cid.clone(), id, config));
            Ok(id)
        }

        async fn default_config(&self) -> Result<StorageConfig, ClientError> {
            Ok(StorageConfig::default())
        }

        async fn summary(&self, cids: &[Cid]) -> Result<JobsSummary, ClientError> {
            let mut guard = self.inner.lock();
            let fake = &mut *guard;
            let mut finals = Vec::new();
            let mut executing = Vec::new();
            for (name, cid, id, polls) in &mut fake.earlier {
                if !cids.contains(cid) || fake.done.contains(id) {
                    continue;
                }
                let mut job = StorageJob::new(ProfileId::new(), cid.clone(), StorageConfig::default());
                job.id = *id;
                if *polls > 0 {
                    *polls -= 1;
                    job.status = JobStatus::Executing;
                    executing.push(job);
                } else {
                    job.status = JobStatus::Success;
                    fake.done.insert(*id);
                    fake.log.push(format!("done {name}"));
                    finals.push(job);
                }
            }
            let applied = fake.applied.clone();
            for (cid, id, _) in applied {
                if !cids.contains(&cid) || fake.done.contains(&id) {
                    continue;
                }
                let name = fake
                    .sizes
                    .keys()
                    .find(|n| Cid::for_content(Codec::Raw, n.as_bytes()) == cid)
                    .cloned()
                    .unwrap_or_default();
                let mut job = StorageJob::new(ProfileId::new(), cid.clone(), StorageConfig::default());
                job.id = id;
                if self.fail_cids.contains(&name) {
                    job.status = JobStatus::Failed;
                    job.error_cause = Some(ErrorKind::PartialColdReplication.to_string());
                } else {
                    job.status = JobStatus::Success;
                }
                let bytes = fake.sizes.get(&name).copied().unwrap_or(0);
                fake.in_flight -= bytes;
                fake.done.insert(id);
                finals.push(job);
            }
            Ok(JobsSummary::new(Vec::new(), executing, finals, Vec::new()))
        }
    }

    fn fast(max_staged: u64, max_deal: u64) -> PipelineConfig {
        let tick = Backoff::new(Duration::from_millis(5), Duration::from_millis(20));
        PipelineConfig {
            max_staged_bytes: max_staged,
            max_deal_bytes: max_deal,
            ready_backoff: tick,
            watch_backoff: tick,
            ..PipelineConfig::default()
        }
    }

    fn backend(sizes: &[(&str, u64)]) -> FakeBackend {
        let fake = FakeBackend::default();
        fake.inner.lock().sizes = sizes.iter().map(|(n, b)| (n.to_string(), *b)).collect();
        fake
    }

    fn tasks(sizes: &[(&str, u64)]) -> Vec<Task> {
        sizes
            .iter()
            .map(|(n, b)| Task::new(*n, format!("/data/{n}"), *b, false))
            .collect()
    }

    #[tokio::test]
    async fn runs_every_task_to_complete_within_budget() {
        let sizes = [("a", 10 * MIB), ("b", 10 * MIB), ("c", 10 * MIB)];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));
        let pipeline =
            Pipeline::new(backend(&sizes), fast(15 * MIB, 10 * MIB), results.clone(), tasks(&sizes))
                .unwrap();
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.complete, 3);
        assert_eq!(report.errored, 0);

        let fake = inner.backend.inner.lock();
        assert!(fake.peak <= 15 * MIB, "peak {} over budget", fake.peak);
        assert_eq!(fake.applied.len(), 3);
        assert_eq!(inner.limit.cached(), 0);

        let saved = results.load().unwrap();
        assert!(saved.iter().all(|t| t.stage == TaskStage::Complete));
        assert!(saved.iter().all(|t| t.jobs.len() == 1 && t.cid.is_some()));
    }

    #[tokio::test]
    async fn resume_skips_complete_and_restarts_staging() {
        let sizes = [("one", 10 * MIB), ("two", 10 * MIB), ("three", 10 * MIB)];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));

        let mut previous = tasks(&sizes);
        previous[0].stage = TaskStage::Complete;
        previous[0].cid = Some(Cid::for_content(Codec::Raw, b"one"));
        previous[0].job_id = Some(JobId::new());
        previous[1].stage = TaskStage::Staging;
        results.save(&previous).unwrap();

        let pipeline =
            Pipeline::resume(backend(&sizes), fast(15 * MIB, 10 * MIB), results.clone(), false)
                .unwrap();
        let resumed = pipeline.tasks();
        assert_eq!(resumed[0].stage, TaskStage::Complete);
        assert_eq!(resumed[1].stage, TaskStage::Init);
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.complete, 3);

        let fake = inner.backend.inner.lock();
        assert_eq!(fake.staged.len(), 2);
        assert!(!fake.staged.contains(&"one".to_string()));
        assert!(fake.peak <= 15 * MIB);
        // Resumed runs apply with the hot tier off.
        for (_, _, config) in &fake.applied {
            assert!(!config.as_ref().unwrap().hot.enabled);
        }
    }

    #[tokio::test]
    async fn resumed_deal_keeps_its_budget_until_done() {
        let sizes = [("one", 10 * MIB), ("two", 10 * MIB)];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));

        let one_cid = Cid::for_content(Codec::Raw, b"one");
        let one_job = JobId::new();
        let mut previous = tasks(&sizes);
        previous[0].stage = TaskStage::DealExecuting;
        previous[0].cid = Some(one_cid.clone());
        previous[0].job_id = Some(one_job);
        previous[0].jobs = vec![one_job];
        results.save(&previous).unwrap();

        let fake = backend(&sizes);
        fake.inner.lock().earlier = vec![("one".into(), one_cid, one_job, 3)];
        let pipeline = Pipeline::resume(fake, fast(15 * MIB, 10 * MIB), results, false).unwrap();
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.complete, 2);
        let fake = inner.backend.inner.lock();
        assert_eq!(fake.log, vec!["done one".to_string(), "stage two".to_string()]);
        assert_eq!(inner.limit.cached(), 0);
    }

    #[tokio::test]
    async fn oversized_task_errors_without_staging() {
        let sizes = [("big", 20 * MIB), ("small", MIB)];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));
        let pipeline =
            Pipeline::new(backend(&sizes), fast(15 * MIB, 10 * MIB), results, tasks(&sizes))
                .unwrap();
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.errored, 1);
        assert_eq!(report.complete, 1);
        let tasks = inner.state.lock().tasks.clone();
        assert_eq!(tasks[0].stage, TaskStage::Init);
        assert!(tasks[0].error.as_deref().unwrap().contains("exceeds"));
        assert_eq!(inner.backend.inner.lock().staged, vec!["small".to_string()]);
    }

    #[tokio::test]
    async fn failed_job_marks_task_errored_and_frees_budget() {
        let sizes = [("ok", MIB), ("bad", MIB)];
        let mut fake = backend(&sizes);
        fake.fail_cids = vec!["bad".into()];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));
        let pipeline = Pipeline::new(fake, fast(4 * MIB, 2 * MIB), results, tasks(&sizes)).unwrap();
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.complete, 1);
        assert_eq!(report.errored, 1);
        let tasks = inner.state.lock().tasks.clone();
        assert_eq!(tasks[1].error.as_deref(), Some("PARTIAL_COLD_REPLICATION"));
        assert_eq!(inner.limit.cached(), 0);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let sizes = [("a", MIB), ("b", MIB)];
        let dir = tempfile::tempdir().unwrap();
        let results = ResultsFile::new(dir.path().join("results.json"));
        let config = PipelineConfig {
            dry_run: true,
            ..fast(4 * MIB, 2 * MIB)
        };
        let pipeline = Pipeline::new(backend(&sizes), config, results.clone(), tasks(&sizes)).unwrap();
        let inner = pipeline.inner.clone();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.dry_run, 2);
        let fake = inner.backend.inner.lock();
        assert!(fake.staged.is_empty());
        assert!(fake.applied.is_empty());
        assert!(results
            .load()
            .unwrap()
            .iter()
            .all(|t| t.stage == TaskStage::DryRunComplete && t.job_id.is_some()));
    }
}
