//! QueryQueue ordering, cancellation and shadow file refresh.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use modquery_session::{
    DocumentSet, NoDocuments, OpenDocument, QueryOutcome, QueryQueue, ToolError, bridge,
};

use crate::common::{StubTool, path_str, wait_for};

fn symbol_name(outcome: QueryOutcome<modquery_session::SymbolInfo>) -> String {
    match outcome {
        QueryOutcome::Completed(Ok(info)) => info.definition_text(),
        other => panic!("expected a symbol, got {other:?}"),
    }
}

#[test]
fn queries_run_in_enqueue_order() {
    let stub = StubTool::new();
    let queue = QueryQueue::new(stub.project(), stub.settings(), Arc::new(NoDocuments)).unwrap();
    let source = stub.source();

    let first = queue.find_symbol(&source, "one");
    let second = queue.type_at(&source, 4, 2);
    let third = queue.find_symbol(&source, "three");

    assert_eq!(symbol_name(third.wait()), "three :: Int");
    assert_eq!(symbol_name(first.wait()), "one :: Int");
    assert_eq!(
        second.wait(),
        QueryOutcome::Completed(Ok(format!("{}:4:3", path_str(&source))))
    );
    assert_eq!(
        stub.commands(),
        [
            format!("info {} one", path_str(&source)),
            format!("type {} 4 3", path_str(&source)),
            format!("info {} three", path_str(&source)),
        ]
    );
}

#[test]
fn cancelled_query_never_reaches_tool() {
    let stub = StubTool::new();
    let queue = QueryQueue::new(stub.project(), stub.settings(), Arc::new(NoDocuments)).unwrap();
    let source = stub.source();

    let slow = queue.find_symbol(&source, "slow");
    let mut skipped = queue.find_symbol(&source, "skipped");
    let last = queue.find_symbol(&source, "last");
    skipped.cancel();

    assert_eq!(symbol_name(last.wait()), "last :: Int");
    assert_eq!(symbol_name(slow.wait()), "slow :: Int");
    assert!(skipped.is_cancelled());
    assert!(
        !stub.commands().iter().any(|c| c.ends_with(" skipped")),
        "{:?}",
        stub.commands()
    );
}

#[test]
fn cancelling_running_query_discards_result() {
    let stub = StubTool::new();
    let queue = QueryQueue::new(stub.project(), stub.settings(), Arc::new(NoDocuments)).unwrap();
    let source = stub.source();

    let mut slow = queue.find_symbol(&source, "slow");
    assert!(wait_for(Duration::from_secs(5), || {
        stub.commands().iter().any(|c| c.ends_with(" slow"))
    }));
    slow.cancel();
    assert_eq!(slow.wait(), QueryOutcome::Cancelled);

    // The round-trip still finished; the session stays usable.
    let next = queue.find_symbol(&source, "next");
    assert_eq!(symbol_name(next.wait()), "next :: Int");
    assert_eq!(stub.starts().len(), 1);
}

#[test]
fn dropping_queue_cancels_pending_queries() {
    let stub = StubTool::new();
    let queue = QueryQueue::new(stub.project(), stub.settings(), Arc::new(NoDocuments)).unwrap();
    let source = stub.source();

    let _slow = queue.find_symbol(&source, "slow");
    assert!(wait_for(Duration::from_secs(5), || !stub.commands().is_empty()));
    let pending = queue.type_at(&source, 1, 0);
    drop(queue);

    assert_eq!(pending.wait(), QueryOutcome::Cancelled);
    assert_eq!(stub.commands().len(), 1);
}

#[test]
fn unsaved_documents_are_mapped_to_shadow_files() {
    let stub = StubTool::new();
    let documents = Arc::new(DocumentSet::new());
    let host: Arc<dyn modquery_session::DocumentHost> = documents.clone();
    let queue = QueryQueue::new(stub.project(), stub.settings(), host).unwrap();
    let source = stub.source();

    documents.open(
        OpenDocument::new(&source, "module A where\nfrob = 1\n")
            .modified(true)
            .with_revision(2),
    );
    queue.find_symbol(&source, "frob").wait();

    let starts = stub.starts();
    assert_eq!(starts.len(), 1);
    let mapping = starts[0]
        .strip_prefix("--map-file ")
        .and_then(|rest| rest.strip_suffix(" legacy-interactive"))
        .unwrap();
    let (original, shadow) = mapping.split_once('=').unwrap();
    assert_eq!(original, path_str(&source));
    assert!(shadow.ends_with("-A.hs"), "{shadow}");
    assert_eq!(
        std::fs::read_to_string(shadow).unwrap(),
        "module A where\nfrob = 1\n"
    );

    // Same revision: same map, same process.
    queue.find_symbol(&source, "frob").wait();
    assert_eq!(stub.starts().len(), 1);

    // Closing the document drops the mirror and restarts without a map.
    documents.close(&source);
    queue.find_symbol(&source, "frob").wait();
    let starts = stub.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1], "legacy-interactive");
    assert!(!Path::new(shadow).exists());
}

#[test]
fn documents_outside_root_are_not_mapped() {
    let stub = StubTool::new();
    let documents = Arc::new(DocumentSet::new());
    documents.open(OpenDocument::new("/elsewhere/B.hs", "b = 1").modified(true));
    let queue = QueryQueue::new(stub.project(), stub.settings(), documents).unwrap();

    queue.find_symbol(stub.source(), "x").wait();
    assert_eq!(stub.starts(), ["legacy-interactive"]);
}

#[test]
fn host_bridge_is_served_while_waiting() {
    let stub = StubTool::new();
    let (host, mut pump) = bridge();
    let queue = QueryQueue::new(stub.project(), stub.settings(), Arc::new(host)).unwrap();
    let source = stub.source();

    let handle = queue.type_at(&source, 2, 0);
    let mut served = 0;
    let outcome = pump
        .pump_until(handle, || {
            served += 1;
            vec![OpenDocument::new(&source, "module A where\n").with_revision(1)]
        })
        .unwrap();

    assert_eq!(served, 1);
    assert!(matches!(outcome, QueryOutcome::Completed(Ok(_))));
    assert!(stub.starts()[0].starts_with("--map-file "));
}

#[test]
fn dropping_queue_on_pump_thread_abandons_refresh() {
    let stub = StubTool::new();
    let project = stub.project();
    let settings = stub.settings();
    let source = stub.source();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let owner = std::thread::spawn(move || {
        let (host, mut pump) = bridge();
        let queue = QueryQueue::new(project, settings, Arc::new(host)).unwrap();

        let first = queue.find_symbol(&source, "one");
        let outcome = pump.pump_until(first, Vec::new).unwrap();
        assert_eq!(symbol_name(outcome), "one :: Int");

        // The worker takes this one and waits for this thread to answer.
        let pending = queue.find_symbol(&source, "two");
        assert!(wait_for(Duration::from_secs(5), || queue.pending_len() == 0));
        std::thread::sleep(Duration::from_millis(100));

        drop(queue);
        let _ = done_tx.send(pending.wait());
        drop(pump);
    });

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("dropping the queue returned");
    assert_eq!(outcome, QueryOutcome::Cancelled);
    owner.join().unwrap();
    assert_eq!(stub.commands().len(), 1);
}

#[test]
fn failed_start_is_reported_distinctly() {
    let stub = StubTool::new();
    let settings = stub.settings();
    settings.set_executable("/nonexistent/bin/stack");
    let queue = QueryQueue::new(stub.project(), settings, Arc::new(NoDocuments)).unwrap();

    match queue.find_symbol(stub.source(), "x").wait() {
        QueryOutcome::Completed(Err(err @ ToolError::FailedToStart { .. })) => {
            assert!(err.to_string().contains("/nonexistent/bin/stack"));
        }
        other => panic!("expected FailedToStart, got {other:?}"),
    }
}
