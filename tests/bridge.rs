//! Cross-module contract: submissions to the host bridge (C4) run on its
//! worker thread, in submission order, and surface panics as an
//! `ExceptionGuard` rather than unwinding into the caller.

use omega_agent::HostBridge;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RecordingHost {
    label: String,
}

impl omega_agent::prelude::HostHandle for RecordingHost {
    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[test]
fn submissions_run_on_worker_and_return_results_in_order() {
    let host = RecordingHost {
        label: "viewer".to_string(),
    };
    let (bridge, join) = HostBridge::spawn(host);

    let counter = Arc::new(AtomicUsize::new(0));
    let mut results = Vec::new();
    for _ in 0..5 {
        let counter = counter.clone();
        let outcome = bridge
            .submit(move |host| {
                let seq = counter.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{}:{}", host.describe(), seq))
            })
            .expect("bridge accepts submission");
        results.push(outcome.expect("task did not panic"));
    }

    assert_eq!(
        results,
        vec![
            "viewer:0".to_string(),
            "viewer:1".to_string(),
            "viewer:2".to_string(),
            "viewer:3".to_string(),
            "viewer:4".to_string(),
        ]
    );

    bridge.shutdown();
    join.join().expect("worker thread exits cleanly");
}

#[test]
fn panicking_task_surfaces_as_exception_guard_not_unwind() {
    let host = RecordingHost {
        label: "viewer".to_string(),
    };
    let (bridge, join) = HostBridge::spawn(host);

    let outcome = bridge
        .submit(|_host| -> omega_agent::Result<()> { panic!("boom") })
        .expect("bridge accepts submission");
    assert!(outcome.is_err());

    // The worker thread survives a panicking task and keeps serving submissions.
    let next = bridge
        .submit(|host| Ok(host.describe()))
        .expect("bridge still accepts submissions after a panic");
    assert_eq!(next.unwrap(), "viewer");

    bridge.shutdown();
    join.join().expect("worker thread exits cleanly");
}
