//! Job view controller.
//!
//! A [`JobView`] shows one selected job (or the upload prompt when nothing is
//! selected) next to a page of recent jobs. While the selected job is not in
//! a final status a [`Poller`] re-fetches it on a fixed period. Every change
//! is published as a [`ViewSnapshot`] on a `watch` channel.

pub mod render;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::job::{page_count, sort_newest_first, Job};
use crate::services::api::{ApiError, JobApi, DEFAULT_PAGE_LIMIT};
use crate::services::upload::UploadFile;

/// Default period between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    NotFound,
    /// No job selected: the upload prompt is shown.
    Empty,
    Viewing(Job),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub state: ViewState,
    /// Recent jobs, newest first.
    pub recent: Vec<Job>,
    /// 1-based page of the recent jobs list.
    pub page: u64,
    pub total_pages: u64,
    pub uploading: bool,
    pub polling: bool,
}

impl Default for ViewSnapshot {
    fn default() -> Self {
        Self {
            state: ViewState::Loading,
            recent: Vec::new(),
            page: 1,
            total_pages: 0,
            uploading: false,
            polling: false,
        }
    }
}

impl ViewSnapshot {
    pub fn job(&self) -> Option<&Job> {
        match &self.state {
            ViewState::Viewing(job) => Some(job),
            _ => None,
        }
    }

    /// Nothing further will change without user input.
    pub fn is_settled(&self) -> bool {
        !self.polling && !self.uploading && self.state != ViewState::Loading
    }
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub poll_interval: Duration,
    pub page_size: u64,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// State shared between the view and its poll task.
struct Shared {
    tx: watch::Sender<ViewSnapshot>,
    /// Bumped whenever the selected job changes or the view unmounts.
    view_generation: AtomicU64,
    /// Bumped whenever the recent jobs list is re-requested.
    list_generation: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(ViewSnapshot::default());
        Self {
            tx,
            view_generation: AtomicU64::new(0),
            list_generation: AtomicU64::new(0),
        }
    }

    fn bump_view(&self) -> u64 {
        self.view_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn bump_list(&self) -> u64 {
        self.list_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn view_is_current(&self, generation: u64) -> bool {
        self.view_generation.load(Ordering::SeqCst) == generation
    }

    fn list_is_current(&self, generation: u64) -> bool {
        self.list_generation.load(Ordering::SeqCst) == generation
    }

    /// Replace the displayed job and patch its entry in the recent list.
    /// Returns false when `generation` is stale.
    ///
    /// Generation checks run inside the channel's write lock so a load that
    /// has already published `Loading` cannot be overwritten afterwards.
    fn apply_job(&self, generation: u64, job: Job) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if !self.view_is_current(generation) {
                return false;
            }
            patch_recent(&mut snapshot.recent, &job);
            snapshot.state = ViewState::Viewing(job);
            true
        })
    }

    fn apply_list(&self, generation: u64, mut jobs: Vec<Job>, total: u64, limit: u64) {
        sort_newest_first(&mut jobs);
        self.tx.send_if_modified(|snapshot| {
            if !self.list_is_current(generation) {
                return false;
            }
            if let ViewState::Viewing(current) = &snapshot.state {
                patch_recent(&mut jobs, current);
            }
            snapshot.recent = jobs;
            snapshot.total_pages = page_count(total, limit);
            true
        });
    }

    fn set_polling(&self, generation: u64, polling: bool) {
        self.tx.send_if_modified(|snapshot| {
            if !self.view_is_current(generation) || snapshot.polling == polling {
                return false;
            }
            snapshot.polling = polling;
            true
        });
    }
}

/// Replace the entry with the same id, keeping the list newest first.
pub fn patch_recent(recent: &mut [Job], job: &Job) -> bool {
    match recent.iter_mut().find(|entry| entry.id == job.id) {
        Some(entry) => {
            *entry = job.clone();
            sort_newest_first(recent);
            true
        }
        None => false,
    }
}

/// Owned handle on the poll task. Dropping it stops polling.
struct Poller {
    job_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    fn spawn(
        api: Arc<dyn JobApi>,
        shared: Arc<Shared>,
        job_id: String,
        generation: u64,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        shared.set_polling(generation, true);
        let handle = tokio::spawn(poll_job(
            api,
            shared,
            job_id.clone(),
            generation,
            period,
            cancel.clone(),
        ));
        Self {
            job_id,
            cancel,
            handle,
        }
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        tracing::debug!(job_id = %self.job_id, "Stopping job poller");
        self.cancel.cancel();
    }
}

async fn poll_job(
    api: Arc<dyn JobApi>,
    shared: Arc<Shared>,
    job_id: String,
    generation: u64,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(job_id = %job_id, period_ms = period.as_millis() as u64, "Polling job");

    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        metrics::counter!("job_poll_ticks_total").increment(1);

        // Dropping the fetch on cancel abandons the in-flight request.
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = api.fetch_one(&job_id) => fetched,
        };

        match fetched {
            Ok(job) => {
                let status = job.status;
                if !shared.apply_job(generation, job) {
                    tracing::debug!(
                        job_id = %job_id,
                        "Discarding poll result for a view that moved on"
                    );
                    return;
                }
                if status.is_final() {
                    tracing::info!(
                        job_id = %job_id,
                        status = %status,
                        "Job reached a final status"
                    );
                    break;
                }
                tracing::debug!(job_id = %job_id, status = %status, "Job still running");
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "Poll failed, no further polling for this job"
                );
                break;
            }
        }
    }

    shared.set_polling(generation, false);
}

/// Controller for the job page.
pub struct JobView {
    api: Arc<dyn JobApi>,
    shared: Arc<Shared>,
    options: ViewOptions,
    selected: Option<String>,
    mounted: bool,
    poller: Option<Poller>,
}

impl JobView {
    pub fn new(api: Arc<dyn JobApi>, options: ViewOptions) -> Self {
        Self {
            api,
            shared: Arc::new(Shared::new()),
            options,
            selected: None,
            mounted: false,
            poller: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// True while a poll task for the selected job is live.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::is_running)
    }

    /// Show `id` (or the upload prompt for `None`), loading it and the
    /// current page of recent jobs together.
    pub async fn mount(&mut self, id: Option<String>) {
        self.mounted = true;
        self.load(id).await;
    }

    /// Like [`JobView::mount`], starting the recent jobs list at `page`.
    pub async fn mount_at(&mut self, id: Option<String>, page: u64) {
        let page = page.max(1);
        self.shared.tx.send_modify(|snapshot| snapshot.page = page);
        self.mount(id).await;
    }

    /// Switch to another job. Does nothing when `id` is already shown.
    pub async fn select(&mut self, id: Option<String>) {
        if self.mounted && self.selected == id {
            return;
        }
        self.mount(id).await;
    }

    /// Load another page of recent jobs without touching the selected job.
    pub async fn set_page(&mut self, page: u64) {
        if !self.mounted {
            return;
        }
        let page = page.max(1);
        let generation = self.shared.bump_list();
        self.shared.tx.send_modify(|snapshot| snapshot.page = page);
        self.load_recent(generation, page).await;
    }

    /// Submit an image. On success the view moves to the new job and its id
    /// is returned; on failure the upload control is re-enabled.
    pub async fn upload(&mut self, file: UploadFile) -> Result<String, ApiError> {
        self.shared.tx.send_modify(|snapshot| snapshot.uploading = true);
        let submitted = self.api.submit(file).await;
        self.shared.tx.send_modify(|snapshot| snapshot.uploading = false);

        match submitted {
            Ok(job) => {
                let id = job.id.clone();
                self.select(Some(id.clone())).await;
                Ok(id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error uploading file");
                Err(e)
            }
        }
    }

    /// Stop polling and ignore anything still in flight.
    pub fn unmount(&mut self) {
        self.poller = None;
        self.mounted = false;
        self.shared.bump_view();
        self.shared.bump_list();
        self.shared.tx.send_if_modified(|snapshot| {
            let changed = snapshot.polling;
            snapshot.polling = false;
            changed
        });
    }

    async fn load(&mut self, id: Option<String>) {
        self.poller = None;
        let view_generation = self.shared.bump_view();
        let list_generation = self.shared.bump_list();
        self.selected = id.clone();

        let mut page = 1;
        self.shared.tx.send_modify(|snapshot| {
            snapshot.state = ViewState::Loading;
            snapshot.polling = false;
            page = snapshot.page;
        });

        let fetched = match id.as_deref() {
            Some(id) => {
                let (job, ()) = tokio::join!(
                    self.api.fetch_one(id),
                    self.load_recent(list_generation, page)
                );
                Some(job)
            }
            None => {
                self.load_recent(list_generation, page).await;
                None
            }
        };

        if !self.shared.view_is_current(view_generation) {
            return;
        }

        let job = match fetched {
            None => {
                self.shared.tx.send_modify(|snapshot| snapshot.state = ViewState::Empty);
                return;
            }
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                match &e {
                    ApiError::NotFound(_) => tracing::warn!(job_id = ?id, "Job not found"),
                    _ => tracing::error!(job_id = ?id, error = %e, "Error fetching job"),
                }
                self.shared.tx.send_modify(|snapshot| snapshot.state = ViewState::NotFound);
                return;
            }
        };

        let job_id = job.id.clone();
        let finished = job.is_final();
        self.shared.apply_job(view_generation, job);

        if !finished {
            self.poller = Some(Poller::spawn(
                Arc::clone(&self.api),
                Arc::clone(&self.shared),
                job_id,
                view_generation,
                self.options.poll_interval,
            ));
        }
    }

    async fn load_recent(&self, generation: u64, page: u64) {
        let limit = self.options.page_size;
        let offset = (page - 1).saturating_mul(limit);
        match self.api.fetch_page(limit, offset).await {
            Ok(jobs) => {
                let per_page = if jobs.limit == 0 { limit } else { jobs.limit };
                self.shared.apply_list(generation, jobs.items, jobs.total, per_page);
            }
            Err(e) => tracing::error!(page, error = %e, "Error fetching recent jobs"),
        }
    }
}

impl Drop for JobView {
    fn drop(&mut self) {
        self.unmount();
    }
}
