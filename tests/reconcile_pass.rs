mod common;

use branchenv::{
    BranchId, BranchOutcome, DescriptorStore, InactivePolicy, InitSettings, Initializer,
    MemoryStore, ReconcileError, Reconciler, StatusMarker, TemplateSet, ENV_FILE, MANIFEST_FILE,
    STATUS_FILE,
};
use common::{trigger, RecordingEffector};

fn seeded(branches: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    let templates = TemplateSet::builtin();
    let init = Initializer::new(&store, &templates, InitSettings::default());
    for b in branches {
        let out = init
            .initialize(&trigger(&[("branch", b), ("project", "7")]))
            .expect("seed");
        assert_eq!(out.label(), "created");
    }
    store
}

fn id(raw: &str) -> BranchId {
    BranchId::from_raw(raw).unwrap()
}

#[test]
fn test_one_malformed_descriptor_does_not_stop_the_pass() {
    let store = seeded(&["feature/a", "feature/b", "feature/c"]);
    store.put_raw(&id("feature/b"), STATUS_FILE, vec![0xff, 0xfe, b'\n']);
    let effector = RecordingEffector::new();

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .expect("pass");

    assert_eq!(effector.projects("up"), vec!["featurea", "featurec"]);
    let c = report.counts();
    assert_eq!((c.started, c.errored, c.skipped), (2, 1, 0));
    assert!(report.has_errors());
    assert!(matches!(
        report.get("featureb").unwrap().outcome,
        BranchOutcome::Errored { .. }
    ));
}

#[test]
fn test_malformed_manifest_and_env_file_are_errors() {
    let store = seeded(&["a", "b", "c"]);
    store.put_raw(&id("a"), MANIFEST_FILE, "services: [\n");
    store.put_raw(&id("b"), ENV_FILE, "URL='unterminated\n");
    let effector = RecordingEffector::new();

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();

    assert_eq!(effector.projects("up"), vec!["c"]);
    assert_eq!(report.counts().errored, 2);
    match &report.get("a").unwrap().outcome {
        BranchOutcome::Errored { reason } => assert!(reason.contains(MANIFEST_FILE), "{reason}"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_incomplete_or_unknown_marker_is_skipped() {
    let store = seeded(&["a", "b", "c"]);
    store.remove_file(&id("a"), ENV_FILE);
    store.put_raw(&id("b"), STATUS_FILE, "Active\n");
    // A directory with only a status file, e.g. a half-copied descriptor.
    store.put_raw(&id("d"), STATUS_FILE, "active\n");
    let effector = RecordingEffector::new();

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();

    assert_eq!(effector.projects("up"), vec!["c"]);
    let c = report.counts();
    assert_eq!((c.started, c.skipped, c.errored), (1, 3, 0));
    assert!(!report.has_errors());
    match &report.get("a").unwrap().outcome {
        BranchOutcome::Skipped { reason } => assert!(reason.contains(ENV_FILE), "{reason}"),
        other => panic!("{other:?}"),
    }
    assert_eq!(report.get("b").unwrap().status, None);
}

#[test]
fn test_inactive_never_brought_up() {
    let store = seeded(&["a", "b"]);
    store.put_raw(&id("b"), STATUS_FILE, "inactive\n");
    let effector = RecordingEffector::new();

    let reconciler = Reconciler::new(&store, &effector, InactivePolicy::Ignore);
    for _ in 0..3 {
        let report = reconciler.reconcile_all().unwrap();
        assert_eq!(
            report.get("b").unwrap().outcome,
            BranchOutcome::Skipped {
                reason: "inactive".to_string()
            }
        );
        assert_eq!(report.get("b").unwrap().status, Some(StatusMarker::Inactive));
    }
    // Exactly one bring-up per active descriptor per pass.
    assert_eq!(effector.projects("up"), vec!["a", "a", "a"]);
    assert!(effector.projects("down").is_empty());
}

#[test]
fn test_stop_policy_brings_inactive_down() {
    let store = seeded(&["a", "b"]);
    store.put_raw(&id("b"), STATUS_FILE, "  inactive  \n");
    let effector = RecordingEffector::new();

    let report = Reconciler::new(&store, &effector, InactivePolicy::Stop)
        .reconcile_all()
        .unwrap();

    assert_eq!(effector.projects("up"), vec!["a"]);
    assert_eq!(effector.projects("down"), vec!["b"]);
    assert_eq!(report.get("b").unwrap().outcome, BranchOutcome::Stopped);
    let down = &effector.calls()[1];
    assert_eq!(down.manifest, store.paths(&id("b")).manifest);
    assert_eq!(down.env_file, store.paths(&id("b")).env_file);
}

#[test]
fn test_effector_failure_is_per_branch() {
    let store = seeded(&["a", "b", "c"]);
    let effector = RecordingEffector::new().failing_for("b");

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();

    assert_eq!(effector.projects("up"), vec!["a", "b", "c"]);
    let c = report.counts();
    assert_eq!((c.started, c.errored), (2, 1));
    match &report.get("b").unwrap().outcome {
        BranchOutcome::Errored { reason } => assert!(reason.contains("no such image"), "{reason}"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_effector_timeout_is_per_branch() {
    let store = seeded(&["a", "b", "c"]);
    let effector = RecordingEffector::new().timing_out_for("a");

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();

    assert_eq!(effector.projects("up"), vec!["a", "b", "c"]);
    let c = report.counts();
    assert_eq!((c.started, c.errored), (2, 1));
    assert_eq!(report.get("b").unwrap().outcome, BranchOutcome::Started);
    assert_eq!(report.get("c").unwrap().outcome, BranchOutcome::Started);
    match &report.get("a").unwrap().outcome {
        BranchOutcome::Errored { reason } => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn test_malformed_files_only_matter_when_compose_would_run() {
    let store = seeded(&["a", "b"]);
    store.put_raw(&id("b"), STATUS_FILE, "inactive\n");
    store.put_raw(&id("b"), MANIFEST_FILE, "services: [\n");
    let effector = RecordingEffector::new();

    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();
    assert!(!report.has_errors());
    assert_eq!(
        report.get("b").unwrap().outcome,
        BranchOutcome::Skipped {
            reason: "inactive".to_string()
        }
    );

    // With the stop policy compose would read the manifest, so it is an error again.
    let report = Reconciler::new(&store, &effector, InactivePolicy::Stop)
        .reconcile_all()
        .unwrap();
    assert!(report.has_errors());
    assert!(matches!(
        report.get("b").unwrap().outcome,
        BranchOutcome::Errored { .. }
    ));
    assert!(effector.projects("down").is_empty());
}

#[test]
fn test_missing_effector_is_fatal() {
    let store = seeded(&["a"]);
    let effector = RecordingEffector::missing();

    let err = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap_err();

    assert!(matches!(err, ReconcileError::EffectorNotFound(_)), "{err}");
    assert_eq!(branchenv::exit_code_for_reconcile_error(&err), 127);
}

#[test]
fn test_pass_does_not_write_to_store() {
    let store = seeded(&["a", "b"]);
    store.put_raw(&id("b"), STATUS_FILE, "inactive\n");
    let before = store.snapshot();
    let effector = RecordingEffector::new();

    Reconciler::new(&store, &effector, InactivePolicy::Stop)
        .reconcile_all()
        .unwrap();

    assert_eq!(store.snapshot(), before);
    assert_eq!(store.refreshes(), 2, "only the seeding initializations refresh");
}

#[test]
fn test_empty_store_is_an_empty_report() {
    let store = MemoryStore::new();
    let effector = RecordingEffector::new();
    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();
    assert!(report.branches.is_empty());
    assert!(effector.calls().is_empty());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["policy"], "ignore");
}
