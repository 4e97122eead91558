//! A single network fetch shared by any number of subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::domain::entities::{
    DownloadOutcome, DownloadProgress, DownloadRequest, DownloadState, DownloadToken,
};
use crate::domain::errors::DownloadError;
use crate::domain::ports::TransportPort;

/// Receives progress updates; may be called many times.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;
/// Receives the final outcome exactly once.
pub type CompletionCallback = Box<dyn FnOnce(DownloadOutcome) + Send>;

type TerminalHook = Box<dyn FnOnce() + Send>;

/// Callbacks registered under one token.
pub struct Subscription {
    progress: Option<ProgressCallback>,
    completion: Option<CompletionCallback>,
}

impl Subscription {
    /// Bundles the callbacks of one subscriber.
    #[must_use]
    pub fn new(progress: Option<ProgressCallback>, completion: Option<CompletionCallback>) -> Self {
        Self {
            progress,
            completion,
        }
    }
}

enum Phase {
    Pending,
    Running,
    Finished(DownloadOutcome),
    Cancelled,
}

impl Phase {
    const fn state(&self) -> DownloadState {
        match self {
            Self::Pending => DownloadState::Pending,
            Self::Running => DownloadState::Running,
            Self::Finished(_) => DownloadState::Finished,
            Self::Cancelled => DownloadState::Cancelled,
        }
    }
}

struct Inner {
    phase: Phase,
    subscriptions: HashMap<DownloadToken, Subscription>,
    task: Option<AbortHandle>,
    last_delivered: Option<f64>,
    terminal_hook: Option<TerminalHook>,
}

/// One in-flight fetch multiplexed to many subscribers.
///
/// Each subscriber holds a [`DownloadToken`]. Cancelling a token withdraws
/// only that subscriber; the fetch itself is aborted once no subscribers
/// remain. On completion every registered subscriber receives the same outcome.
pub struct DownloadOperation {
    id: Uuid,
    request: DownloadRequest,
    transport: Arc<dyn TransportPort>,
    permits: Option<Arc<Semaphore>>,
    minimum_progress_interval: f64,
    inner: Mutex<Inner>,
}

impl DownloadOperation {
    /// Creates an operation without a concurrency limit.
    #[must_use]
    pub fn new(request: DownloadRequest, transport: Arc<dyn TransportPort>) -> Arc<Self> {
        Self::with_limits(request, transport, None, 0.0)
    }

    /// Creates an operation that waits for a permit from `permits` before fetching and
    /// delivers progress only when the completed fraction advanced by `minimum_progress_interval`.
    #[must_use]
    pub fn with_limits(
        request: DownloadRequest,
        transport: Arc<dyn TransportPort>,
        permits: Option<Arc<Semaphore>>,
        minimum_progress_interval: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            request,
            transport,
            permits,
            minimum_progress_interval: minimum_progress_interval.clamp(0.0, 1.0),
            inner: Mutex::new(Inner {
                phase: Phase::Pending,
                subscriptions: HashMap::new(),
                task: None,
                last_delivered: None,
                terminal_hook: None,
            }),
        })
    }

    /// Unique id of this operation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the request being fetched.
    #[must_use]
    pub const fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.inner.lock().phase.state()
    }

    /// Returns the number of live tokens.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Adds a subscriber.
    ///
    /// After the fetch finished, `completion` runs immediately with the stored outcome.
    ///
    /// # Errors
    /// Returns `DownloadError::Cancelled` if the operation was already cancelled.
    pub fn register(
        &self,
        progress: Option<ProgressCallback>,
        completion: Option<CompletionCallback>,
    ) -> Result<DownloadToken, DownloadError> {
        self.try_register(Subscription::new(progress, completion))
            .map_err(|_| DownloadError::Cancelled)
    }

    /// Like [`register`](Self::register), but hands the subscription back on rejection.
    pub(crate) fn try_register(
        &self,
        subscription: Subscription,
    ) -> Result<DownloadToken, Subscription> {
        let token = DownloadToken::generate();
        let mut inner = self.inner.lock();
        match &inner.phase {
            Phase::Cancelled => Err(subscription),
            Phase::Finished(outcome) => {
                let outcome = outcome.clone();
                drop(inner);
                trace!(url = %self.request.url, %token, "Late subscriber, delivering stored outcome");
                if let Some(completion) = subscription.completion {
                    completion(outcome);
                }
                Ok(token)
            }
            Phase::Pending | Phase::Running => {
                inner.subscriptions.insert(token, subscription);
                trace!(
                    url = %self.request.url,
                    %token,
                    subscribers = inner.subscriptions.len(),
                    "Registered download subscriber"
                );
                Ok(token)
            }
        }
    }

    /// Withdraws one subscriber. Returns false if `token` is not registered.
    ///
    /// Withdrawing the last subscriber cancels the fetch.
    pub fn cancel(&self, token: DownloadToken) -> bool {
        let abort = {
            let mut inner = self.inner.lock();
            if inner.subscriptions.remove(&token).is_none() {
                return false;
            }
            if !inner.subscriptions.is_empty() {
                debug!(url = %self.request.url, %token, "Subscriber withdrew from download");
                return true;
            }
            inner.phase = Phase::Cancelled;
            (inner.task.take(), inner.terminal_hook.take())
        };

        info!(url = %self.request.url, "Download cancelled, no subscribers left");
        let (task, hook) = abort;
        if let Some(task) = task {
            task.abort();
        }
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    /// Cancels the fetch for everyone; each subscriber receives `DownloadError::Cancelled`.
    pub fn cancel_all(&self) {
        let (subscriptions, task, hook) = {
            let mut inner = self.inner.lock();
            if matches!(inner.phase, Phase::Finished(_) | Phase::Cancelled) {
                return;
            }
            inner.phase = Phase::Cancelled;
            (
                std::mem::take(&mut inner.subscriptions),
                inner.task.take(),
                inner.terminal_hook.take(),
            )
        };

        info!(url = %self.request.url, subscribers = subscriptions.len(), "Download cancelled");
        if let Some(task) = task {
            task.abort();
        }
        for (_, subscription) in subscriptions {
            if let Some(completion) = subscription.completion {
                completion(Err(DownloadError::Cancelled));
            }
        }
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Spawns the fetch on the current tokio runtime. Later calls do nothing.
    pub fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Pending) || inner.task.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(url = %self.request.url, "No tokio runtime, download not started");
            return;
        };
        let this = Arc::clone(self);
        let task = runtime.spawn(async move { this.run().await });
        inner.task = Some(task.abort_handle());
    }

    /// Runs `hook` once the operation reaches a terminal state.
    pub(crate) fn set_terminal_hook(&self, hook: TerminalHook) {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, Phase::Finished(_) | Phase::Cancelled) {
            drop(inner);
            hook();
            return;
        }
        inner.terminal_hook = Some(hook);
    }

    async fn run(self: Arc<Self>) {
        let _permit = match &self.permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.finish(Err(DownloadError::Cancelled));
                    return;
                }
            },
            None => None,
        };

        {
            let mut inner = self.inner.lock();
            if !matches!(inner.phase, Phase::Pending) {
                return;
            }
            inner.phase = Phase::Running;
        }

        debug!(url = %self.request.url, "Starting download");
        let outcome = self
            .transport
            .fetch(&self.request, &|progress| self.report_progress(progress))
            .await
            .and_then(|bytes| {
                if bytes.is_empty() {
                    Err(DownloadError::EmptyResponse)
                } else {
                    Ok(bytes)
                }
            });
        self.finish(outcome);
    }

    fn report_progress(&self, progress: DownloadProgress) {
        let callbacks: Vec<ProgressCallback> = {
            let mut inner = self.inner.lock();
            if !matches!(inner.phase, Phase::Running) {
                return;
            }
            if let Some(fraction) = progress.fraction() {
                if let Some(last) = inner.last_delivered
                    && fraction < 1.0
                    && fraction - last < self.minimum_progress_interval
                {
                    return;
                }
                inner.last_delivered = Some(fraction);
            }
            inner
                .subscriptions
                .values()
                .filter_map(|s| s.progress.clone())
                .collect()
        };
        for callback in callbacks {
            callback(progress);
        }
    }

    fn finish(&self, outcome: DownloadOutcome) {
        let (subscriptions, hook) = {
            let mut inner = self.inner.lock();
            if matches!(inner.phase, Phase::Finished(_) | Phase::Cancelled) {
                return;
            }
            inner.phase = Phase::Finished(outcome.clone());
            inner.task = None;
            (
                std::mem::take(&mut inner.subscriptions),
                inner.terminal_hook.take(),
            )
        };

        match &outcome {
            Ok(bytes) => debug!(
                url = %self.request.url,
                size = bytes.len(),
                subscribers = subscriptions.len(),
                "Download finished"
            ),
            Err(e) => warn!(
                url = %self.request.url,
                error = %e,
                subscribers = subscriptions.len(),
                "Download failed"
            ),
        }

        for (_, subscription) in subscriptions {
            if let Some(completion) = subscription.completion {
                completion(outcome.clone());
            }
        }
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOperation")
            .field("id", &self.id)
            .field("url", &self.request.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
