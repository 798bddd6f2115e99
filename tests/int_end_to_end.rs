mod common;

use branchenv::{
    snapshot, Config, DescriptorStore, FsStore, InactivePolicy, InitOutcome, Initializer,
    Reconciler, StatusMarker, TemplateSet,
};
use common::{trigger, RecordingEffector};

#[test]
fn test_trigger_to_running_environment() {
    let td = tempfile::tempdir().expect("tmpdir");
    let root = td.path().join("environments");
    let store = FsStore::new(&root);
    let templates = TemplateSet::builtin();
    let cfg = Config::default();
    let init = Initializer::new(&store, &templates, cfg.init_settings());

    let out = init
        .initialize(&trigger(&[("branch", "feature/42-pay"), ("project", "7")]))
        .expect("initialize");
    match &out {
        InitOutcome::Created { id, url } => {
            assert_eq!(id.as_str(), "feature42pay");
            assert_eq!(url, "feature42pay.testserver.example.internal");
        }
        other => panic!("expected Created, got {other:?}"),
    }

    let dir = root.join("feature42pay");
    let manifest = std::fs::read_to_string(dir.join("docker-compose.yml")).unwrap();
    assert!(
        manifest.contains("Host(`feature42pay.testserver.example.internal`)"),
        "{manifest}"
    );
    let env = std::fs::read_to_string(dir.join(".env")).unwrap();
    assert!(env.contains("URL=feature42pay.testserver.example.internal\n"), "{env}");
    assert!(env.contains("BRANCH=feature/42-pay\n"), "{env}");
    assert!(env.contains("PROJECT_ID=7\n"), "{env}");
    assert_eq!(std::fs::read_to_string(dir.join("status")).unwrap().trim(), "active");

    let effector = RecordingEffector::new();
    let report = Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .expect("pass");
    let calls = effector.calls();
    assert_eq!(calls.len(), 1, "{calls:?}");
    assert_eq!(calls[0].action, "up");
    assert_eq!(calls[0].project, "feature42pay");
    assert_eq!(calls[0].manifest, dir.join("docker-compose.yml"));
    assert_eq!(calls[0].env_file, dir.join(".env"));
    assert_eq!(report.counts().started, 1);
}

#[test]
fn test_extra_variables_reach_env_file_and_manifest() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = FsStore::new(td.path());
    let templates = TemplateSet::builtin();
    let init = Initializer::new(&store, &templates, Config::default().init_settings());

    init.initialize(&trigger(&[
        ("branch", "feature/flags"),
        ("project", "shop"),
        ("FEATURE_FLAGS", "checkout,search"),
        ("GREETING", "hello world"),
    ]))
    .unwrap();

    let id = branchenv::BranchId::from_raw("feature/flags").unwrap();
    let env = store.read_file(&id, ".env").unwrap().unwrap();
    assert!(env.contains("FEATURE_FLAGS=checkout,search\n"), "{env}");
    assert!(env.contains("GREETING='hello world'\n"), "{env}");

    let manifest = store.read_file(&id, "docker-compose.yml").unwrap().unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&manifest).expect("valid yaml");
    let environment = &doc["services"]["featureflags"]["environment"];
    assert_eq!(environment["FEATURE_FLAGS"].as_str(), Some("checkout,search"));
    assert_eq!(environment["GREETING"].as_str(), Some("hello world"));
}

#[test]
fn test_dollar_in_extra_value_is_not_interpolated_by_compose() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = FsStore::new(td.path());
    let templates = TemplateSet::builtin();
    Initializer::new(&store, &templates, Config::default().init_settings())
        .initialize(&trigger(&[
            ("branch", "feature/db"),
            ("project", "7"),
            ("DB_PASS", "pa$word"),
        ]))
        .unwrap();

    let id = branchenv::BranchId::from_raw("feature/db").unwrap();
    let manifest = store.read_file(&id, "docker-compose.yml").unwrap().unwrap();
    assert!(manifest.contains("DB_PASS: \"pa$$word\""), "{manifest}");
    let env = store.read_file(&id, ".env").unwrap().unwrap();
    assert!(env.contains("DB_PASS='pa$word'\n"), "{env}");
}

#[test]
fn test_snapshot_of_empty_and_missing_store() {
    let td = tempfile::tempdir().expect("tmpdir");
    let missing = FsStore::new(td.path().join("nope"));
    assert!(snapshot(&missing).unwrap().is_empty());

    // Stray entries are not descriptors.
    std::fs::write(td.path().join("README.md"), "store\n").unwrap();
    std::fs::create_dir(td.path().join(".git")).unwrap();
    std::fs::create_dir(td.path().join("Not-Normalized")).unwrap();
    let store = FsStore::new(td.path());
    assert!(snapshot(&store).unwrap().is_empty());
}

#[test]
fn test_initial_status_inactive_is_not_started() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = FsStore::new(td.path());
    let templates = TemplateSet::builtin();
    let cfg = Config::from_yaml_str("initial_status: inactive\n").unwrap();
    Initializer::new(&store, &templates, cfg.init_settings())
        .initialize(&trigger(&[("branch", "hotfix/1"), ("project", "7")]))
        .unwrap();

    let entries = snapshot(&store).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, Ok(StatusMarker::Inactive));

    let effector = RecordingEffector::new();
    Reconciler::new(&store, &effector, InactivePolicy::Ignore)
        .reconcile_all()
        .unwrap();
    assert!(effector.calls().is_empty());
}

#[test]
fn test_custom_template_dir() {
    let td = tempfile::tempdir().expect("tmpdir");
    let tpl = td.path().join("templates");
    std::fs::create_dir(&tpl).unwrap();
    std::fs::write(
        tpl.join("docker-compose.yml.tpl"),
        "services:\n  {{ SERVICE_NAME }}:\n    image: {{ IMAGE }}:{{ IMAGE_TAG }}\n",
    )
    .unwrap();
    std::fs::write(tpl.join(".env.tpl"), "URL={{ URL }}\n").unwrap();
    std::fs::write(tpl.join("status.tpl"), "{{ INITIAL_STATUS }}\n").unwrap();
    std::fs::write(tpl.join("notes.txt"), "not a template\n").unwrap();

    let templates = TemplateSet::load_dir(&tpl).expect("load");
    assert_eq!(templates.templates().len(), 3);

    let store = FsStore::new(td.path().join("envs"));
    let settings = Config::from_yaml_str("base_domain: review.example.org\n")
        .unwrap()
        .init_settings();
    Initializer::new(&store, &templates, settings)
        .initialize(&trigger(&[("branch", "feature/x"), ("project", "7")]))
        .unwrap();
    let id = branchenv::BranchId::from_raw("feature/x").unwrap();
    assert_eq!(
        store.read_file(&id, ".env").unwrap().as_deref(),
        Some("URL=featurex.review.example.org\n")
    );
}
