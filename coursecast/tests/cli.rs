use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

fn touch(path: &Path, bytes: usize) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![0u8; bytes]).unwrap();
}

fn course(root: &Path) {
    touch(&root.join("02 - Next/b.mp4"), 10);
    touch(&root.join("01 - Intro/a.mp4"), 10);
    touch(&root.join("slides.pdf"), 5);
}

#[test]
fn scan_prints_the_plan() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("My Course");
    course(&root);

    let mut cmd = Command::cargo_bin("coursecast").expect("Binary exists");
    cmd.current_dir(dir.path()).arg("scan").arg(&root);
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("Course: My Course")
                .and(predicate::str::contains("📁 01 - Intro"))
                .and(predicate::str::contains("#F001 a.mp4"))
                .and(predicate::str::contains("#F002 b.mp4"))
                .and(predicate::str::contains("Assets: 1 file(s)")),
        );
}

#[test]
fn scan_flags_videos_over_the_ceiling() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("course");
    touch(&root.join("M/big.mkv"), 500);
    let config = dir.path().join("config.yaml");
    fs::write(&config, "max_unit_size: 100\n").unwrap();

    let mut cmd = Command::cargo_bin("coursecast").expect("Binary exists");
    cmd.current_dir(dir.path())
        .arg("scan")
        .arg(&root)
        .arg("--config")
        .arg(&config);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("big.mkv").and(predicate::str::contains("(will be split)")));
}

#[test]
fn scan_of_missing_folder_fails() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("coursecast").expect("Binary exists");
    cmd.current_dir(dir.path()).arg("scan").arg(dir.path().join("nope"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn upload_without_token_fails_before_any_network_call() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("course");
    course(&root);

    let mut cmd = Command::cargo_bin("coursecast").expect("Binary exists");
    cmd.current_dir(dir.path())
        .env_remove("BOT_TOKEN")
        .arg("upload")
        .arg(&root);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("BOT_TOKEN"));
    assert!(!dir.path().join("session").exists());
}

#[test]
fn status_reads_the_ledger() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Status Course");
    course(&root);
    let state = dir.path().join("state");
    fs::create_dir_all(&state).unwrap();
    let key = root.join("01 - Intro/a.mp4").to_string_lossy().into_owned();
    let mut processed = serde_json::Map::new();
    processed.insert(key, serde_json::Value::Bool(true));
    let ledger = serde_json::json!({ "target_chat_id": "-100777", "processed": processed });
    fs::write(state.join("progress_Status_Course.json"), ledger.to_string()).unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(&config, format!("state_dir: {}\n", state.display())).unwrap();

    let mut cmd = Command::cargo_bin("coursecast").expect("Binary exists");
    cmd.current_dir(dir.path())
        .arg("status")
        .arg(&root)
        .arg("--config")
        .arg(&config);
    cmd.assert().success().stdout(
        predicate::str::contains("Target chat: -100777")
            .and(predicate::str::contains("Delivered units: 1"))
            .and(predicate::str::contains("Unsplit videos delivered: 1/2")),
    );
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_and_exit_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use coursecast::cli::{run, Cli, Commands};

    let dir = tempdir().unwrap();
    let root = dir.path().join("course");
    course(&root);
    let cli = Cli {
        command: Commands::Scan {
            course_dir: root,
            config: None,
        },
    };

    run(cli).await.expect("scan should succeed");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
    assert!(
        event_msgs.iter().any(|msg| msg.contains("exit")),
        "Expected an 'exit' trace event, got: {:?}",
        event_msgs
    );
}
