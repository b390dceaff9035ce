//! Dispatch pool: a dedicated tokio runtime per bus instance.
//!
//! Transport workers run as async tasks on it and pooled handler calls run
//! on its blocking threads, so a slow or panicking handler never holds up
//! the sender, a sibling handler, or socket I/O.

use crate::error::BusError;
use crate::event::SharedEvent;
use crate::registry::Registration;
use bus_telemetry::{BUS_EVENTS_DISPATCHED, BUS_HANDLER_PANICS};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) struct DispatchPool {
    threads: usize,
    runtime: Mutex<Option<Runtime>>,
}

impl DispatchPool {
    pub(crate) fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            runtime: Mutex::new(None),
        }
    }

    /// Start the runtime if needed and return its handle.
    pub(crate) fn open(&self) -> Result<Handle, BusError> {
        let mut runtime = self.runtime.lock();
        if let Some(rt) = runtime.as_ref() {
            return Ok(rt.handle().clone());
        }

        let rt = Builder::new_multi_thread()
            .worker_threads(self.threads)
            .thread_name("control-bus")
            .enable_all()
            .build()
            .map_err(|e| BusError::Pool(e.to_string()))?;
        let handle = rt.handle().clone();
        *runtime = Some(rt);
        debug!(threads = self.threads, "Dispatch pool opened");
        Ok(handle)
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.runtime.lock().as_ref().map(|rt| rt.handle().clone())
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Spawn an async task. Returns `None` when the pool is closed.
    pub(crate) fn spawn<F>(&self, future: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle().map(|handle| handle.spawn(future))
    }

    /// Run a registration's `handle` on a blocking thread.
    ///
    /// Skips the call if the registration was removed in the meantime.
    /// Returns `false` when the pool is closed.
    pub(crate) fn invoke(&self, registration: Arc<Registration>, event: SharedEvent) -> bool {
        let Some(handle) = self.handle() else {
            return false;
        };

        handle.spawn_blocking(move || {
            if !registration.is_active() {
                return;
            }
            let kind = event.descriptor().name();
            let handler = Arc::clone(registration.handler());
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
            match outcome {
                Ok(()) => {
                    BUS_EVENTS_DISPATCHED
                        .with_label_values(&[kind, "pooled"])
                        .inc();
                }
                Err(_) => {
                    BUS_HANDLER_PANICS.inc();
                    warn!(kind = kind, handler = handler.kind(), "Event handler panicked");
                }
            }
        });
        true
    }

    /// Shut the runtime down without waiting for running tasks.
    pub(crate) fn close(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!("Dispatch pool closed");
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.close();
    }
}
