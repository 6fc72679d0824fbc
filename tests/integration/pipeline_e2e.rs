//! The style-guide tasks against a scratch project.
//!
//! Tools are shell stand-ins configured by [`TestSite`], so these tests
//! check orchestration and file placement, not real compilation.

use pipewright::config::Config;
use pipewright::core::{Step, TaskRegistry, TaskStatus};
use pipewright::orchestration::SchedulerEvent;
use pipewright::pipeline::{register_pipeline, Collaborators};

use crate::fixtures::{SchedulerHarness, TestSite};

fn harness_for(config: &Config) -> SchedulerHarness {
    let mut registry = TaskRegistry::new();
    register_pipeline(&mut registry, config, Collaborators::headless()).unwrap();
    SchedulerHarness::with_registry(registry.freeze().unwrap())
}

/// Test: sass compiles entry stylesheets only
/// Given an entry stylesheet and a partial under a frontend folder
/// When sass runs
/// Then the entry is compiled through all three tools and the partial is skipped
#[tokio::test]
async fn test_sass_compiles_prefixes_and_minifies() {
    let site = TestSite::new().with_sources();
    let harness = harness_for(&site.config);

    let result = harness.scheduler.run_tasks(&["sass"]).await.unwrap();
    assert!(result.is_success(), "{}", result.summary());

    assert_eq!(
        site.read("static/css/shop/frontend/css/main.css"),
        "/* sass */a { color: red; }/* last 3 versions */"
    );
    assert!(!site.exists("static/css/shop/frontend/css/_vars.css"));
}

/// Test: a compile error is reported, not fatal
/// Given sass exits non-zero with a located error
/// When sass runs
/// Then the task fails with the tool's message and one notification is sent
#[tokio::test]
async fn test_sass_error_is_notified() {
    let mut site = TestSite::new().with_sources();
    site.config.tools.sass = vec![
        "sh".into(),
        "-c".into(),
        "echo 'Error: Undefined variable.' >&2; echo \"  $0 1:12  root stylesheet\" >&2; exit 65".into(),
        "{file}".into(),
    ];
    let harness = harness_for(&site.config);

    let result = harness.scheduler.run_tasks(&["sass"]).await.unwrap();
    let Some(TaskStatus::Failed { error }) = result.status("sass") else {
        panic!("sass should fail: {:?}", result.status("sass"));
    };
    assert!(error.starts_with("sh: Undefined variable."), "got {}", error);
    assert!(error.contains("main.scss:1:12"), "got {}", error);

    let notifications = harness.notifier.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].task, "sass");
    assert!(notifications[0].message.contains("Undefined variable."));
}

/// Test: imgmin cleans first, then optimises by extension
/// Given a stale optimised image, a png, and an unknown image type
/// When imgmin runs
/// Then clean-img removed the stale file, the png is optimised and the other copied
#[tokio::test]
async fn test_imgmin_after_clean_img() {
    let site = TestSite::new().with_sources();
    site.write("static/img/stale.png", "old");
    let harness = harness_for(&site.config);

    let result = harness.scheduler.run_tasks(&["imgmin"]).await.unwrap();
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.status("clean-img"), Some(&TaskStatus::Succeeded));

    assert!(!site.exists("static/img/stale.png"));
    assert_eq!(site.read("static/img/shop/frontend/img/logo.png"), "optimised");
    assert_eq!(site.read("static/img/shop/frontend/img/icons/cart.ico"), "raw-ico");
}

/// Test: build-doc runs its phases in order
/// Given optimised images and a stale style guide
/// When imgmin then build-doc run as a sequence
/// Then the guide is regenerated with styles and images, and generator
/// stylesheets are removed
#[tokio::test]
async fn test_build_doc_end_to_end() {
    let site = TestSite::new().with_sources();
    site.write("sass-doc/old.html", "stale");
    let harness = harness_for(&site.config);

    let result = harness
        .scheduler
        .run_sequence(&[Step::from("imgmin"), Step::from("build-doc")])
        .await
        .unwrap();
    assert!(result.is_success(), "{}", result.summary());

    assert!(!site.exists("sass-doc/old.html"), "clean-doc should run first");
    assert_eq!(site.read("sass-doc/index.html"), "<h1>My Styleguide</h1>");
    assert!(site.read("sass-doc/scss/site.css").contains("body { margin: 0; }"));
    assert_eq!(site.read("sass-doc/static/shop/frontend/img/logo.png"), "optimised");
    assert!(!site.exists("sass-doc/kss.scss"), "remove-doc-scss should run last");
}

/// Test: a failing generator halts build-doc
/// Given the style-guide generator fails
/// When build-doc runs
/// Then build-doc fails, its steps show up in the result and the generator
/// failure is notified once
#[tokio::test]
async fn test_build_doc_stops_on_generator_failure() {
    let mut site = TestSite::new().with_sources();
    site.config.tools.styleguide = vec!["sh".into(), "-c".into(), "echo 'kss: no sources' >&2; exit 1".into()];
    site.write("sass-doc/leftover.scss", "x");
    let mut harness = harness_for(&site.config);

    let result = harness.scheduler.run_tasks(&["build-doc"]).await.unwrap();
    assert!(result.status("build-doc").unwrap().is_failed());
    assert!(!site.exists("sass-doc/leftover.scss"), "clean-doc still ran");
    assert!(!site.exists("sass-doc/index.html"));

    assert!(result.status("clean-doc").unwrap().is_success());
    assert!(result.status("styleguide:generate").unwrap().is_failed());
    assert!(matches!(
        result.status("remove-doc-scss"),
        Some(TaskStatus::Skipped { .. })
    ));
    assert!(result.unsuccessful().contains(&"styleguide:generate".to_string()));

    let sent = harness.notifier.notifications();
    assert_eq!(sent.iter().filter(|n| n.task == "styleguide:generate").count(), 1);
    assert!(sent.iter().all(|n| n.task != "build-doc"));

    let finished = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SchedulerEvent::RunFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

/// Test: the default task is a no-op
#[tokio::test]
async fn test_default_task_succeeds() {
    let site = TestSite::new();
    let harness = harness_for(&site.config);
    let result = harness
        .scheduler
        .run_tasks(&[site.config.default_task.as_str()])
        .await
        .unwrap();
    tokio_test::assert_ok!(result.report("default").ok_or("missing report"));
    assert!(result.is_success());
}

/// Test: configuration loads from a file next to the project
#[tokio::test]
async fn test_config_file_drives_pipeline() {
    let site = TestSite::new().with_sources();
    let toml = r#"
root = "."
dest = "build"

[tools]
sass = ["cat", "{file}"]
autoprefix = ["cat"]
minify = ["cat"]

[notify]
desktop = false
"#;
    let path = site.write("pipewright.toml", toml);

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.root, site.root);
    let harness = harness_for(&config);

    let result = harness.scheduler.run_tasks(&["sass"]).await.unwrap();
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(
        site.read("build/css/shop/frontend/css/main.css"),
        "a { color: red; }\n"
    );
}
