//! Background scan jobs tracked in memory

use crate::device::DeviceRecord;
use crate::discovery::ScanEngine;
use crate::history::{HistoryEntry, HistoryLog};
use crate::request::ScanRequest;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Snapshot of one job
#[derive(Debug, Clone, Serialize)]
pub struct ScanJob {
    pub id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub params: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub result: Option<Vec<DeviceRecord>>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl ScanJob {
    fn queued(id: JobId, params: HashMap<String, String>) -> Self {
        Self {
            id,
            state: JobState::Queued,
            progress: 0,
            params,
            created_at: Utc::now(),
            result: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}

/// Process-lifetime registry of scan jobs
pub struct JobRegistry {
    engine: Arc<ScanEngine>,
    history: Option<Arc<HistoryLog>>,
    jobs: Arc<RwLock<HashMap<JobId, ScanJob>>>,
}

impl JobRegistry {
    pub fn new(engine: Arc<ScanEngine>, history: Option<HistoryLog>) -> Self {
        Self {
            engine,
            history: history.map(Arc::new),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queue a scan and run it in the background
    pub async fn start(&self, request: ScanRequest) -> (JobId, JoinHandle<()>) {
        let id = Uuid::new_v4();
        let params = request.to_params();
        self.jobs.write().await.insert(id, ScanJob::queued(id, params.clone()));
        info!("Queued scan job {}", id);

        let engine = Arc::clone(&self.engine);
        let jobs = Arc::clone(&self.jobs);
        let history = self.history.clone();

        let handle = tokio::spawn(async move {
            update(&jobs, id, |job| {
                job.state = JobState::Running;
                job.progress = 5;
            })
            .await;

            let report = engine.scan_report(&request).await;

            if report.no_subnet() {
                update(&jobs, id, |job| {
                    job.state = JobState::Failed;
                    job.error = Some("no subnet could be determined".to_string());
                    job.duration_ms = Some(report.duration_ms);
                })
                .await;
                return;
            }

            if let Some(history) = history {
                let entry = HistoryEntry::new(params, report.devices.clone());
                match tokio::task::spawn_blocking(move || history.append(&entry)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Could not record job {} in history: {}", id, e),
                    Err(e) => warn!("History write for job {} did not finish: {}", id, e),
                }
            }

            update(&jobs, id, |job| {
                job.state = JobState::Completed;
                job.progress = 100;
                job.duration_ms = Some(report.duration_ms);
                job.result = Some(report.devices);
            })
            .await;
            info!("Scan job {} completed", id);
        });

        (id, handle)
    }

    pub async fn status(&self, id: &JobId) -> Option<ScanJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ScanJob> {
        let mut jobs: Vec<ScanJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }
}

async fn update<F>(jobs: &RwLock<HashMap<JobId, ScanJob>>, id: JobId, apply: F)
where
    F: FnOnce(&mut ScanJob),
{
    if let Some(job) = jobs.write().await.get_mut(&id) {
        apply(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::discovery::ScanMethod;
    use crate::enrichment::NullBrowser;
    use crate::platform::{CommandOutput, Platform};
    use crate::request::SubnetSpec;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use std::time::Duration;

    struct AllUp;

    #[async_trait]
    impl Platform for AllUp {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            (program == "ping").then(|| PathBuf::from("/bin/ping"))
        }

        async fn run(&self, _program: &str, _args: &[String], _limit: Duration) -> crate::Result<CommandOutput> {
            Ok(CommandOutput { success: true, ..Default::default() })
        }

        async fn reverse_dns(&self, _ip: Ipv4Addr) -> Option<String> {
            None
        }

        async fn hostname_address(&self) -> Option<Ipv4Addr> {
            None
        }
    }

    fn registry(history: Option<HistoryLog>) -> JobRegistry {
        let engine = ScanEngine::with_platform(ScanConfig::default(), Arc::new(AllUp), Arc::new(NullBrowser));
        JobRegistry::new(Arc::new(engine), history)
    }

    fn request(subnet: Option<SubnetSpec>) -> ScanRequest {
        ScanRequest {
            subnet,
            method: ScanMethod::Ping,
            include_offline: false,
            deep: false,
            timeout_per_host: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_job_completes_and_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(Some(HistoryLog::in_dir(dir.path())));

        let cidr = "192.0.2.0/30".parse().unwrap();
        let (id, handle) = registry.start(request(Some(SubnetSpec::Cidr(cidr)))).await;
        handle.await.unwrap();

        let job = registry.status(&id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result.as_ref().unwrap().len(), 2);

        let history = HistoryLog::in_dir(dir.path()).tail(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].params["subnet"], "192.0.2.0/30");
    }

    #[tokio::test]
    async fn test_unwritable_history_does_not_fail_job() {
        // The log path is a directory, so every append fails
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(Some(HistoryLog::new(dir.path())));

        let cidr = "192.0.2.0/30".parse().unwrap();
        let (id, handle) = registry.start(request(Some(SubnetSpec::Cidr(cidr)))).await;
        handle.await.unwrap();

        let job = registry.status(&id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result.as_ref().unwrap().len(), 2);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_job_without_subnet_fails() {
        let registry = registry(None);
        let (id, handle) = registry.start(request(None)).await;
        handle.await.unwrap();

        let job = registry.status(&id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.is_some());
        assert!(job.is_finished());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let registry = registry(None);
        assert!(registry.status(&Uuid::new_v4()).await.is_none());
        assert!(registry.list().await.is_empty());
    }
}
