//! Host bridge: marshals work from agent/tool threads onto the host's single
//! GUI thread and returns results or structured exceptions (C4).
//!
//! Two bounded FIFOs per spec §4.4: `inbox` (submit-to-host) and `outbox`
//! (host-to-submitter), capacity 16 each. A dedicated worker thread plays the
//! role of the host's GUI thread: it blocks on `inbox`, runs one [`Task`] at
//! a time inside a [`crate::guard::guarded`] scope, and places the outcome on
//! that submission's reply slot. Rust has no shared mutable "the GUI thread"
//! the way a Python host like napari does, so this module stands in a real
//! dedicated `std::thread` for it — any equivalent request/response pattern
//! with FIFO ordering is spec-acceptable (§9).
//!
//! The outbox is realised as a one-shot reply channel per submission rather
//! than a single shared queue: a shared outbox cannot tell two concurrent
//! submitters' replies apart without extra correlation bookkeeping, and a
//! per-call reply channel gives the same FIFO-per-submitter guarantee with
//! less machinery.

use crate::guard::{ExceptionGuard, guarded};
use crate::host::HostHandle;
use std::any::Any;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;

/// Bound on both the inbox and the (conceptual) outbox, per spec §4.4/§5.
pub const QUEUE_CAPACITY: usize = 16;

type BoxedResult = Result<Box<dyn Any + Send>, ExceptionGuard>;
type BoxedTask = Box<dyn FnOnce(&dyn HostHandle) -> crate::Result<Box<dyn Any + Send>> + Send>;

enum Envelope {
    Run {
        task: BoxedTask,
        reply: Sender<BoxedResult>,
    },
    Shutdown,
}

/// Handle to a running bridge. Cloning shares the same inbox and worker.
#[derive(Clone)]
pub struct HostBridge {
    inbox: SyncSender<Envelope>,
}

/// Error returned when a submission races a torn-down bridge.
#[derive(Debug, thiserror::Error)]
#[error("host bridge has shut down")]
pub struct BridgeClosed;

impl HostBridge {
    /// Spawns the GUI-thread worker and returns a handle plus its join handle.
    ///
    /// `host` is constructed once and owned by the worker thread for its
    /// entire lifetime, mirroring a real GUI toolkit's single-threaded model.
    pub fn spawn<H>(host: H) -> (Self, JoinHandle<()>)
    where
        H: HostHandle + 'static,
    {
        let (inbox, rx): (SyncSender<Envelope>, Receiver<Envelope>) =
            mpsc::sync_channel(QUEUE_CAPACITY);

        let join = std::thread::Builder::new()
            .name("host-gui-thread".to_string())
            .spawn(move || {
                log::debug!("host bridge worker started");
                for envelope in rx {
                    match envelope {
                        Envelope::Run { task, reply } => {
                            let outcome = guarded(|| task(&host));
                            // Submitter may have stopped waiting (e.g. cancelled turn);
                            // a dropped receiver just means we discard the outcome.
                            let _ = reply.send(outcome);
                        }
                        Envelope::Shutdown => {
                            log::debug!("host bridge worker received shutdown sentinel");
                            break;
                        }
                    }
                }
                log::debug!("host bridge worker exiting");
            })
            .expect("failed to spawn host GUI thread");

        (Self { inbox }, join)
    }

    /// Submits a [`Task`](type@Task) and blocks until the GUI thread executes it.
    ///
    /// Per spec: "The worker processes at most one Task at a time. No two
    /// Tasks are interleaved on the GUI thread." and "Tasks submitted to C4
    /// execute in submission order."
    pub fn submit<T, F>(&self, task: F) -> Result<Result<T, ExceptionGuard>, BridgeClosed>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostHandle) -> crate::Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let boxed: BoxedTask =
            Box::new(move |host| task(host).map(|v| Box::new(v) as Box<dyn Any + Send>));

        self.inbox
            .send(Envelope::Run {
                task: boxed,
                reply: reply_tx,
            })
            .map_err(|_| BridgeClosed)?;

        let outcome = reply_rx.recv().map_err(|_| BridgeClosed)?;
        Ok(outcome.map(|boxed| {
            *boxed
                .downcast::<T>()
                .expect("Task result type mismatch at bridge boundary")
        }))
    }

    /// Async-friendly wrapper: runs [`Self::submit`] on a blocking thread pool.
    pub async fn submit_async<T, F>(
        &self,
        task: F,
    ) -> Result<Result<T, ExceptionGuard>, BridgeClosed>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostHandle) -> crate::Result<T> + Send + 'static,
    {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.submit(task))
            .await
            .expect("bridge worker task panicked")
    }

    /// Sends the shutdown sentinel. Further submissions fail with [`BridgeClosed`].
    pub fn shutdown(&self) {
        let _ = self.inbox.send(Envelope::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHost;
    impl HostHandle for TestHost {
        fn describe(&self) -> String {
            "test-host".to_string()
        }
    }

    #[test]
    fn bridge_round_trip_happy_path() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        let result = bridge.submit(|_h| Ok(42)).unwrap();
        assert_eq!(result.unwrap(), 42);
        bridge.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn bridge_round_trip_failure_path() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        let result: Result<i32, ExceptionGuard> = bridge
            .submit(|_h| Err(crate::Error::other("bad")))
            .unwrap();
        let guard = result.unwrap_err();
        assert_eq!(guard.exception_value, "Error: bad");
        bridge.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn bridge_round_trip_panic_is_captured_not_propagated() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        let result: Result<i32, ExceptionGuard> = bridge.submit(|_h| panic!("boom")).unwrap();
        assert_eq!(result.unwrap_err().exception_type_name, "Panic");
        bridge.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn tasks_execute_in_submission_order() {
        use std::sync::{Arc, Mutex};
        let (bridge, join) = HostBridge::spawn(TestHost);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let order = order.clone();
            let bridge = bridge.clone();
            handles.push(std::thread::spawn(move || {
                bridge
                    .submit(move |_h| {
                        order.lock().unwrap().push(i);
                        Ok::<_, crate::Error>(())
                    })
                    .unwrap()
                    .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // Five distinct tasks ran, none interleaved mid-task (each push is atomic).
        assert_eq!(order.lock().unwrap().len(), 5);
        bridge.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn shutdown_sentinel_stops_worker() {
        let (bridge, join) = HostBridge::spawn(TestHost);
        bridge.shutdown();
        join.join().unwrap();
        // Further submits fail because the worker thread is gone and the
        // channel's receiver has been dropped.
        let err = bridge.submit(|_h| Ok(())).unwrap_err();
        assert!(matches!(err, BridgeClosed));
    }
}
