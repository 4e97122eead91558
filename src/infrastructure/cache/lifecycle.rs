//! Process lifecycle notifications delivered to caches.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::io_queue::IoQueue;
use crate::domain::ports::MemoryCachePort;

const CHANNEL_CAPACITY: usize = 16;

/// Host-process events a cache reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The host is short on memory; decoded images are dropped.
    MemoryWarning,
    /// The host moved to the background; expired files may be swept.
    DidEnterBackground,
    /// The host is about to exit; expired files are swept.
    WillTerminate,
}

/// Broadcasts lifecycle events to every subscribed cache.
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleNotifier {
    /// Creates a notifier with no listeners.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Sends `event` to all listeners and returns how many received it.
    pub fn notify(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns a raw receiver for events sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live receivers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener task owned by a cache; aborted on drop.
#[derive(Debug)]
pub struct LifecycleSubscription {
    task: JoinHandle<()>,
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a listener that applies lifecycle events to one cache's tiers.
///
/// Returns `None` outside a tokio runtime.
pub(crate) fn spawn_listener(
    notifier: &LifecycleNotifier,
    memory: Arc<dyn MemoryCachePort>,
    io: Arc<IoQueue>,
    sweep_on_background: bool,
) -> Option<LifecycleSubscription> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No tokio runtime, lifecycle events will be ignored");
        return None;
    };
    let mut receiver = notifier.subscribe();

    let task = runtime.spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Lifecycle listener lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                LifecycleEvent::MemoryWarning => {
                    info!("Memory warning, clearing memory cache");
                    memory.remove_all();
                }
                LifecycleEvent::DidEnterBackground if !sweep_on_background => {}
                LifecycleEvent::DidEnterBackground | LifecycleEvent::WillTerminate => {
                    match io.run(|disk| disk.remove_expired_data()).await {
                        Ok(report) => debug!(
                            ?event,
                            removed = report.removed.len(),
                            bytes = report.removed_bytes,
                            "Expired disk entries swept"
                        ),
                        Err(e) => warn!(?event, error = %e, "Disk sweep skipped"),
                    }
                }
            }
        }
        debug!("Lifecycle listener stopped");
    });

    Some(LifecycleSubscription { task })
}
