//! Config, jobs, history and task runner working together

use async_trait::async_trait;
use lanscan::{
    enrichment::NullBrowser,
    history::HistoryDiff,
    tasks::{TaskRunner, EXIT_INVALID},
    CommandOutput, HistoryLog, JobRegistry, JobState, Platform, ScanConfig, ScanEngine, ScanMethod, ScanRequest,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every odd host answers on the first scan, every host afterwards
#[derive(Default)]
struct WakingNetwork {
    sweeps: AtomicUsize,
}

#[async_trait]
impl Platform for WakingNetwork {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        (program == "ping").then(|| PathBuf::from("/bin/ping"))
    }

    async fn run(&self, _program: &str, args: &[String], _limit: Duration) -> lanscan::Result<CommandOutput> {
        let ip: Ipv4Addr = args.last().and_then(|a| a.parse().ok()).unwrap_or(Ipv4Addr::UNSPECIFIED);
        let late = self.sweeps.load(Ordering::SeqCst) > 0;
        let success = late || ip.octets()[3] % 2 == 1;
        Ok(CommandOutput { success, ..Default::default() })
    }

    async fn reverse_dns(&self, _ip: Ipv4Addr) -> Option<String> {
        None
    }

    async fn hostname_address(&self) -> Option<Ipv4Addr> {
        None
    }
}

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn test_config_file_env_and_query_layering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanscan.toml");
    std::fs::write(&path, "default_method = \"scan-discovery\"\ndeep_default = true\nping_timeout_ms = 1500\n").unwrap();

    let mut config = ScanConfig::from_toml_file(&path).unwrap();
    config.apply_env_from(|key| match key {
        "LANSCAN_INCLUDE_OFFLINE_DEFAULT" => Some("on".to_string()),
        _ => None,
    });
    config.validate().unwrap();

    let defaults = ScanRequest::from_query(&HashMap::new(), &config).unwrap();
    assert_eq!(defaults.method, ScanMethod::ScanDiscovery);
    assert!(defaults.deep);
    assert!(defaults.include_offline);
    assert_eq!(defaults.timeout_per_host, Duration::from_millis(1500));

    let overridden = ScanRequest::from_query(&query(&[("method", "ping"), ("deep", "false")]), &config).unwrap();
    assert_eq!(overridden.method, ScanMethod::Ping);
    assert!(!overridden.deep);
}

#[tokio::test]
async fn test_jobs_record_history_and_diff() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ScanConfig::default();
    config.data_dir = dir.path().to_path_buf();

    let platform = Arc::new(WakingNetwork::default());
    let engine = ScanEngine::with_platform(config.clone(), platform.clone(), Arc::new(NullBrowser));
    let registry = JobRegistry::new(Arc::new(engine), Some(HistoryLog::new(config.history_path())));

    let request = ScanRequest::from_query(&query(&[("subnet", "192.0.2.0/29"), ("method", "ping")]), &config).unwrap();

    let (first, handle) = registry.start(request.clone()).await;
    handle.await.unwrap();
    platform.sweeps.fetch_add(1, Ordering::SeqCst);
    let (second, handle) = registry.start(request).await;
    handle.await.unwrap();

    let first = registry.status(&first).await.unwrap();
    let second = registry.status(&second).await.unwrap();
    assert_eq!(first.state, JobState::Completed);
    assert_eq!(first.result.as_ref().unwrap().len(), 3);
    assert_eq!(second.result.as_ref().unwrap().len(), 6);
    assert_eq!(registry.list().await.len(), 2);

    let entries = HistoryLog::new(config.history_path()).tail(10).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].params["method"], "ping");

    let diff = HistoryDiff::between(&entries[0], &entries[1]);
    let appeared: Vec<String> = diff.appeared.iter().map(|ip| ip.to_string()).collect();
    assert_eq!(appeared, vec!["192.0.2.2", "192.0.2.4", "192.0.2.6"]);
    assert!(diff.disappeared.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_task_runner_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("approved.yml");
    let second = dir.path().join("extra.yml");
    std::fs::write(
        &first,
        "tasks:\n  - id: greet\n    command: echo hello {who}\n    params:\n      - name: who\n",
    )
    .unwrap();
    std::fs::write(
        &second,
        "tasks:\n  - id: greet\n    command: echo shadowed\n  - id: here\n    command: pwd\n",
    )
    .unwrap();

    let mut config = ScanConfig::default();
    config.tasks_enabled = true;
    config.task_files = vec![first, dir.path().join("missing.yml"), second];
    config.task_timeout_secs = 10;
    let runner = TaskRunner::from_config(&config);

    let ids: Vec<String> = runner.list().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["greet", "here"]);

    let outcome = runner.run("greet", &query(&[("who", "lan")]), Some(dir.path())).await.unwrap();
    assert_eq!(outcome.code, 0);
    assert!(outcome.output.contains("hello lan"));

    let rejected = runner
        .run("greet", &query(&[("who", "x; reboot")]), Some(dir.path()))
        .await
        .unwrap();
    assert_eq!(rejected.code, EXIT_INVALID);

    assert!(runner.run("nope", &HashMap::new(), None).await.is_err());
}
