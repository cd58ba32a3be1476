use async_trait::async_trait;
use sdep::build::{BuildStage, TarballBuilder};
use sdep::config::{Config, EnvMap};
use sdep::error::{BuildFailedDetails, Error, ErrorCode, Result};
use sdep::runner::TaskRunner;
use sdep::session::Session;
use sdep::summary::{Summary, SummaryMap};
use sdep::task::{DeployTaskArgs, Task, TaskList, TaskProducer};
use sdep::tasks::ProducerRegistry;
use sdep::Orchestrator;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct RunnerCall {
    list: String,
    hosts: Vec<String>,
    started: Instant,
    finished: Instant,
    bundle_present: bool,
}

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<RunnerCall>>,
    delay: HashMap<String, Duration>,
    failing: HashSet<String>,
    failing_users: HashSet<String>,
}

impl RecordingRunner {
    fn delayed(mut self, host: &str, delay: Duration) -> Self {
        self.delay.insert(host.to_string(), delay);
        self
    }

    fn failing(mut self, host: &str) -> Self {
        self.failing.insert(host.to_string());
        self
    }

    fn failing_user(mut self, username: &str) -> Self {
        self.failing_users.insert(username.to_string());
        self
    }

    fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn hosts_called(&self) -> Vec<String> {
        self.calls().into_iter().flat_map(|c| c.hosts).collect()
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    async fn run(&self, tasks: &TaskList, sessions: &[Arc<Session>]) -> SummaryMap {
        let started = Instant::now();
        let bundle_present = tasks.tasks.iter().any(|t| match t {
            Task::Upload { local, .. } => local.exists(),
            _ => false,
        });

        let delay = sessions
            .iter()
            .filter_map(|s| self.delay.get(s.host()))
            .max()
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let summaries = sessions
            .iter()
            .map(|s| {
                let summary = if self.failing.contains(s.host())
                    || self.failing_users.contains(s.username())
                {
                    Summary::failed(Error::internal_unexpected("stubbed failure"), Vec::new())
                } else {
                    Summary::succeeded(Vec::new())
                };
                (s.roster_index(), s.host().to_string(), summary)
            })
            .collect();

        self.calls.lock().unwrap().push(RunnerCall {
            list: tasks.name.clone(),
            hosts: sessions.iter().map(|s| s.host().to_string()).collect(),
            started,
            finished: Instant::now(),
            bundle_present,
        });
        summaries
    }
}

#[derive(Default, Clone)]
struct ProducerLog {
    deploys: Arc<Mutex<Vec<DeployTaskArgs>>>,
    reconfigs: Arc<Mutex<Vec<EnvMap>>>,
}

struct RecordingProducer {
    os: String,
    log: ProducerLog,
}

impl TaskProducer for RecordingProducer {
    fn os(&self) -> &str {
        &self.os
    }

    fn setup(&self, _config: &Config) -> TaskList {
        TaskList::new(format!("setup:{}", self.os))
    }

    fn deploy(&self, args: &DeployTaskArgs) -> TaskList {
        self.log.deploys.lock().unwrap().push(args.clone());
        TaskList::new(format!("deploy:{}", self.os))
            .sequential()
            .upload("Uploading bundle", &args.bundle_path, "/tmp/bundle.tar.gz", false)
    }

    fn reconfig(&self, env: &EnvMap, _app_name: &str) -> TaskList {
        self.log.reconfigs.lock().unwrap().push(env.clone());
        TaskList::new(format!("reconfig:{}", self.os)).sequential()
    }

    fn restart(&self, _app_name: &str) -> TaskList {
        TaskList::new(format!("restart:{}", self.os))
    }

    fn stop(&self, _app_name: &str) -> TaskList {
        TaskList::new(format!("stop:{}", self.os))
    }

    fn start(&self, _app_name: &str) -> TaskList {
        TaskList::new(format!("start:{}", self.os))
    }
}

fn registry(oses: &[&str], log: &ProducerLog) -> ProducerRegistry {
    let mut registry = ProducerRegistry::empty();
    for os in oses {
        registry.register(Arc::new(RecordingProducer {
            os: os.to_string(),
            log: log.clone(),
        }));
    }
    registry
}

/// Writes a bundle into the build directory, then succeeds or fails.
#[derive(Default)]
struct StubBuilder {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl BuildStage for StubBuilder {
    async fn build(&self, app_path: &Path, build_dir: &Path, bundle_path: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir(build_dir).unwrap();
        std::fs::write(bundle_path, "partial bundle").unwrap();

        if self.fail {
            return Err(Error::build_failed(BuildFailedDetails {
                app_path: app_path.to_string_lossy().to_string(),
                bundle_path: bundle_path.to_string_lossy().to_string(),
                error: "stream closed early".to_string(),
            }));
        }
        Ok(())
    }
}

fn config(servers: serde_json::Value, app: &Path) -> Config {
    serde_json::from_value(json!({
        "servers": servers,
        "appName": "shop",
        "app": app,
        "env": {"A": "1", "B": "2"},
        "deployCheckWaitTime": 3,
        "enableUploadProgressBar": false
    }))
    .unwrap()
}

fn server(host: &str, os: &str) -> serde_json::Value {
    json!({"host": host, "username": "deploy", "password": "pw", "os": os})
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

struct Fixture {
    _app: TempDir,
    build_root: TempDir,
    runner: Arc<RecordingRunner>,
    builder: Arc<StubBuilder>,
    log: ProducerLog,
    orchestrator: Orchestrator,
}

fn fixture(
    servers: serde_json::Value,
    oses: &[&str],
    runner: RecordingRunner,
    builder: StubBuilder,
) -> Fixture {
    let app = TempDir::new().unwrap();
    let build_root = TempDir::new().unwrap();
    let runner = Arc::new(runner);
    let builder = Arc::new(builder);
    let log = ProducerLog::default();

    let orchestrator = Orchestrator::new(
        config(servers, app.path()),
        app.path(),
        &registry(oses, &log),
        runner.clone(),
        builder.clone(),
    )
    .unwrap()
    .with_build_root(build_root.path());

    Fixture {
        _app: app,
        build_root,
        runner,
        builder,
        log,
        orchestrator,
    }
}

#[test]
fn roster_is_grouped_by_os_in_first_seen_order() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os2"), server("c", "os1")]),
        &["os1", "os2"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );

    let groups = f.orchestrator.groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].os(), "os1");
    let hosts: Vec<&str> = groups[0].sessions().iter().map(|s| s.host()).collect();
    assert_eq!(hosts, vec!["a", "c"]);
    assert!(groups[1].sessions().iter().all(|s| s.os() == "os2"));
}

#[tokio::test]
async fn parallel_dispatch_calls_each_group_once_and_waits_for_stragglers() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os2"), server("c", "os3"), server("d", "os1")]),
        &["os1", "os2", "os3"],
        RecordingRunner::default()
            .delayed("a", Duration::from_millis(300))
            .delayed("b", Duration::from_millis(300))
            .delayed("c", Duration::from_millis(300)),
        StubBuilder::default(),
    );

    let started = Instant::now();
    let report = f.orchestrator.restart().await;
    let elapsed = started.elapsed();

    let calls = f.runner.calls();
    assert_eq!(calls.len(), 3);
    let mut lists: Vec<&str> = calls.iter().map(|c| c.list.as_str()).collect();
    lists.sort();
    assert_eq!(lists, vec!["restart:os1", "restart:os2", "restart:os3"]);

    // Every group, slow ones included, is in the report.
    assert_eq!(report.hosts.len(), 4);
    assert!(report.success);

    // Groups overlapped rather than running back to back.
    assert!(elapsed < Duration::from_millis(800), "took {:?}", elapsed);
}

#[tokio::test]
async fn failing_group_does_not_cancel_siblings() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os2")]),
        &["os1", "os2"],
        RecordingRunner::default()
            .failing("a")
            .delayed("b", Duration::from_millis(100)),
        StubBuilder::default(),
    );

    let report = f.orchestrator.stop().await;

    assert_eq!(f.runner.calls().len(), 2);
    assert!(!report.success);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.failed_hosts().collect::<Vec<_>>(), vec!["a"]);
}

#[tokio::test]
async fn same_host_sessions_report_separately() {
    let f = fixture(
        json!([
            {"host": "10.0.0.5", "username": "a", "password": "pw", "os": "os1",
             "sshOptions": {"port": 22}},
            {"host": "10.0.0.5", "username": "b", "password": "pw", "os": "os1",
             "sshOptions": {"port": 2222}},
            server("web2", "os2")
        ]),
        &["os1", "os2"],
        RecordingRunner::default().failing_user("a"),
        StubBuilder::default(),
    );

    let report = f.orchestrator.setup().await;

    assert!(!report.success);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.hosts.len(), 3);

    let same_host: Vec<(usize, bool)> = report
        .hosts
        .iter()
        .filter(|h| h.host == "10.0.0.5")
        .map(|h| (h.roster_index, h.success))
        .collect();
    assert_eq!(same_host, vec![(0, false), (1, true)]);
}

#[tokio::test]
async fn empty_roster_succeeds() {
    let f = fixture(json!([]), &["os1"], RecordingRunner::default(), StubBuilder::default());

    let report = f.orchestrator.setup().await;
    assert!(report.success);
    assert_eq!(report.exit_code(), 0);
    assert!(f.runner.calls().is_empty());
}

#[tokio::test]
async fn deploy_follows_roster_order_across_groups() {
    let f = fixture(
        json!([server("A", "os1"), server("B", "os2"), server("C", "os1")]),
        &["os1", "os2"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );

    let report = f.orchestrator.deploy().await.unwrap();

    assert!(report.success);
    assert_eq!(f.runner.hosts_called(), vec!["A", "B", "C"]);
    let lists: Vec<String> = f.runner.calls().into_iter().map(|c| c.list).collect();
    assert_eq!(lists, vec!["deploy:os1", "deploy:os2", "deploy:os1"]);
}

#[tokio::test]
async fn deploy_calls_never_overlap() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os1"), server("c", "os2"), server("d", "os1")]),
        &["os1", "os2"],
        RecordingRunner::default()
            .delayed("a", Duration::from_millis(40))
            .delayed("b", Duration::from_millis(10))
            .delayed("c", Duration::from_millis(30))
            .delayed("d", Duration::from_millis(10)),
        StubBuilder::default(),
    );

    f.orchestrator.deploy().await.unwrap();

    let calls = f.runner.calls();
    assert_eq!(calls.len(), 4);
    for call in &calls {
        assert_eq!(call.hosts.len(), 1);
    }
    for pair in calls.windows(2) {
        assert!(pair[0].finished <= pair[1].started);
    }
}

#[tokio::test]
async fn deploy_env_prefers_host_values() {
    let mut host = server("a", "os1");
    host["env"] = json!({"B": "9"});

    let f = fixture(
        json!([host, server("b", "os1")]),
        &["os1"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );
    f.orchestrator.deploy().await.unwrap();

    let deploys = f.log.deploys.lock().unwrap().clone();
    let expected_a: EnvMap = [("A", "1"), ("B", "9")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let expected_b: EnvMap = [("A", "1"), ("B", "2")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    assert_eq!(deploys[0].env, expected_a);
    assert_eq!(deploys[1].env, expected_b);
    assert_eq!(deploys[0].app_name, "shop");
    assert_eq!(deploys[0].deploy_check_wait_time, 3);
    assert!(!deploys[0].enable_upload_progress_bar);

    // The global map itself is untouched.
    assert_eq!(f.orchestrator.config().env.get("B").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn deploy_removes_build_directory_after_success() {
    let f = fixture(
        json!([server("a", "os1")]),
        &["os1"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );

    f.orchestrator.deploy().await.unwrap();

    let deploys = f.log.deploys.lock().unwrap().clone();
    assert!(deploys[0].bundle_path.starts_with(f.build_root.path()));
    assert!(f.runner.calls()[0].bundle_present);
    assert!(!deploys[0].bundle_path.exists());
    assert!(is_empty_dir(f.build_root.path()));
}

#[tokio::test]
async fn deploy_removes_build_directory_after_host_failure() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os1")]),
        &["os1"],
        RecordingRunner::default().failing("a"),
        StubBuilder::default(),
    );

    let report = f.orchestrator.deploy().await.unwrap();

    assert!(!report.success);
    assert!(is_empty_dir(f.build_root.path()));
}

#[tokio::test]
async fn build_failure_skips_dispatch_and_cleans_up() {
    let f = fixture(
        json!([server("a", "os1"), server("b", "os1")]),
        &["os1"],
        RecordingRunner::default(),
        StubBuilder {
            fail: true,
            ..Default::default()
        },
    );

    let err = f.orchestrator.deploy().await.unwrap_err();

    assert_eq!(err.code, ErrorCode::BuildFailed);
    assert_eq!(f.builder.calls.load(Ordering::SeqCst), 1);
    assert!(f.runner.calls().is_empty());
    assert!(f.log.deploys.lock().unwrap().is_empty());
    assert!(is_empty_dir(f.build_root.path()));
}

#[tokio::test]
async fn one_failing_host_fails_deploy_but_others_still_deploy() {
    let f = fixture(
        json!([server("h1", "os1"), server("h2", "os1"), server("h3", "os1")]),
        &["os1"],
        RecordingRunner::default().failing("h2"),
        StubBuilder::default(),
    );

    let report = f.orchestrator.deploy().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(f.runner.hosts_called(), vec!["h1", "h2", "h3"]);

    let outcomes: HashMap<&str, bool> = report
        .hosts
        .iter()
        .map(|h| (h.host.as_str(), h.success))
        .collect();
    assert!(outcomes["h1"]);
    assert!(!outcomes["h2"]);
    assert!(outcomes["h3"]);
}

#[tokio::test]
async fn tarball_deploy_ships_a_real_bundle() {
    let app = TempDir::new().unwrap();
    std::fs::write(app.path().join("main.js"), "require('http')").unwrap();
    let build_root = TempDir::new().unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let log = ProducerLog::default();

    let orchestrator = Orchestrator::new(
        config(json!([server("a", "os1")]), app.path()),
        app.path(),
        &registry(&["os1"], &log),
        runner.clone(),
        Arc::new(TarballBuilder),
    )
    .unwrap()
    .with_build_root(build_root.path());

    let report = orchestrator.deploy().await.unwrap();

    assert!(report.success);
    assert!(runner.calls()[0].bundle_present);
    assert!(is_empty_dir(build_root.path()));
}

#[tokio::test]
async fn reconfig_walks_roster_with_merged_env() {
    let mut host = server("b", "os2");
    host["env"] = json!({"A": "override"});

    let f = fixture(
        json!([server("a", "os1"), host, server("c", "os1")]),
        &["os1", "os2"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );

    let report = f.orchestrator.reconfig().await;

    assert!(report.success);
    assert_eq!(f.runner.hosts_called(), vec!["a", "b", "c"]);
    let envs = f.log.reconfigs.lock().unwrap().clone();
    assert_eq!(envs[1].get("A").map(String::as_str), Some("override"));
    assert_eq!(envs[0].get("A").map(String::as_str), Some("1"));
}

#[test]
fn unsupported_os_fails_construction_before_any_call() {
    let app = TempDir::new().unwrap();
    let runner = Arc::new(RecordingRunner::default());

    let result = Orchestrator::new(
        config(
            json!([server("web1", "linux"), server("web2", "windows")]),
            app.path(),
        ),
        app.path(),
        &ProducerRegistry::default(),
        runner.clone(),
        Arc::new(StubBuilder::default()),
    );

    let err = result.err().unwrap();
    assert_eq!(err.code, ErrorCode::ConfigUnsupportedOs);
    assert!(err.code.is_config());
    assert!(runner.calls().is_empty());
}

#[test]
fn unresolved_auth_fails_construction() {
    let app = TempDir::new().unwrap();
    let result = Orchestrator::new(
        config(
            json!([{"host": "web1", "username": "deploy", "os": "linux"}]),
            app.path(),
        ),
        app.path(),
        &ProducerRegistry::default(),
        Arc::new(RecordingRunner::default()),
        Arc::new(StubBuilder::default()),
    );

    assert_eq!(result.err().unwrap().code, ErrorCode::ConfigAuthUnresolved);
}

#[tokio::test]
async fn logs_reject_os_without_tail_command() {
    let f = fixture(
        json!([server("a", "os1")]),
        &["os1"],
        RecordingRunner::default(),
        StubBuilder::default(),
    );

    let err = f.orchestrator.logs(&["-f".to_string()]).err().unwrap();
    assert_eq!(err.code, ErrorCode::ConfigUnsupportedOs);
}
