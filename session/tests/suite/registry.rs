//! SessionRegistry sharing and executable switching.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use modquery_session::{NoDocuments, QueryOutcome, SessionRegistry};

use crate::common::StubTool;

#[test]
fn files_in_one_project_share_a_session() {
    let stub = StubTool::new();
    let registry = SessionRegistry::new(stub.config(), Arc::new(NoDocuments));

    let a = registry.session_for(&stub.source()).unwrap();
    let b = registry.session_for(&stub.project().join("stack.yaml")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.root(), stub.project());

    let other = StubTool::new();
    let c = registry.session_for(&other.source()).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.live_sessions(), 2);
}

#[test]
fn file_outside_projects_uses_empty_root() {
    let stub = StubTool::new();
    let registry = SessionRegistry::new(stub.config(), Arc::new(NoDocuments));
    let loose = tempfile::tempdir().unwrap();
    let file = loose.path().join("Scratch.hs");
    std::fs::write(&file, "main = pure ()\n").unwrap();

    let session = registry.session_for(&file).unwrap();
    assert_eq!(session.root(), Path::new(""));
    assert!(matches!(
        session.find_symbol(&file, "main").wait(),
        QueryOutcome::Completed(Ok(_))
    ));
}

#[test]
fn set_executable_restarts_existing_sessions() {
    let stub = StubTool::new();
    let registry = SessionRegistry::new(stub.config(), Arc::new(NoDocuments));
    let session = registry.session_for(&stub.source()).unwrap();

    session.find_symbol(stub.source(), "a").wait();
    registry.set_executable(stub.alternate_shell());
    session.find_symbol(stub.source(), "b").wait();

    assert_eq!(stub.starts().len(), 2);
}

#[test]
fn released_session_is_replaced() {
    let stub = StubTool::new();
    let registry = SessionRegistry::new(stub.config(), Arc::new(NoDocuments));

    let first = registry.session_for(&stub.source()).unwrap();
    first.find_symbol(stub.source(), "a").wait();
    let weak = Arc::downgrade(&first);
    drop(first);
    assert!(weak.upgrade().is_none());

    let second = registry.session_for(&stub.source()).unwrap();
    assert!(matches!(
        second.find_symbol(stub.source(), "b").wait(),
        QueryOutcome::Completed(Ok(_))
    ));
    assert_eq!(stub.starts().len(), 2);
}
