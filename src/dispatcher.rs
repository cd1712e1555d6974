//! The async call dispatcher (§5): caps how many calls run concurrently,
//! overall and per host, without blocking a thread per in-flight call.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::config::DispatcherConfig;

/// Holds the two semaphores a running call checked out; dropping it frees
/// both slots (§5: "a finished call immediately makes room for a queued
/// one").
pub(crate) struct DispatchPermit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

/// Gates concurrent execution by a global cap and a per-host cap (§5,
/// grounded on the teacher's bounded worker-pool pattern, reexpressed over
/// `tokio::sync::Semaphore` instead of a thread pool since calls here are
/// async tasks, not blocking threads).
pub(crate) struct Dispatcher {
    config: DispatcherConfig,
    global: Arc<Semaphore>,
    per_host: AsyncMutex<HashMap<String, Arc<Semaphore>>>,
}

impl Dispatcher {
    pub(crate) fn new(config: DispatcherConfig) -> Self {
        Dispatcher {
            global: Arc::new(Semaphore::new(config.max_in_flight)),
            per_host: AsyncMutex::new(HashMap::new()),
            config,
        }
    }

    /// Waits for both a global slot and a per-`host` slot to be free. Never
    /// fails: the semaphores backing this are never closed.
    pub(crate) async fn acquire(&self, host: &str) -> DispatchPermit {
        let global = self.global.clone().acquire_owned().await.expect("dispatcher semaphore never closed");
        let host_sem = {
            let mut map = self.per_host.lock().await;
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_in_flight_per_host)))
                .clone()
        };
        let host_permit = host_sem.acquire_owned().await.expect("dispatcher semaphore never closed");
        DispatchPermit { _global: global, _host: host_permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn per_host_cap_serializes_excess_callers() {
        let dispatcher = Dispatcher::new(DispatcherConfig { max_in_flight: 10, max_in_flight_per_host: 1 });
        let _first = dispatcher.acquire("a.test").await;
        let second = tokio::time::timeout(Duration::from_millis(20), dispatcher.acquire("a.test")).await;
        assert!(second.is_err(), "second caller for the same host should have been blocked");
    }

    #[tokio::test]
    async fn distinct_hosts_do_not_contend() {
        let dispatcher = Dispatcher::new(DispatcherConfig { max_in_flight: 10, max_in_flight_per_host: 1 });
        let _first = dispatcher.acquire("a.test").await;
        let second = tokio::time::timeout(Duration::from_millis(20), dispatcher.acquire("b.test")).await;
        assert!(second.is_ok());
    }
}
