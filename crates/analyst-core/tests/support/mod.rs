#![allow(dead_code)]

use analyst_core::job::JobContext;
use analyst_core::{
    BlobError, BlobStore, Broker, BrokerError, Bundle, CallbackRegistry, Listing,
    MemoryBlobStore, Orchestrator, PointFeature, PointSet, QueueManager, StaticCatalog,
    StaticPointSets, TransportScenario,
};
use analyst_kernel::{JobConfig, JobRecord, Ledger};
use analyst_protocol::{JobStatus, Location, ResultEnvelope, UnitRequest};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-process broker that records submissions and answers status queries
/// from a table the test controls.
#[derive(Default)]
pub struct FakeBroker {
    pub enqueued: Mutex<Vec<UnitRequest>>,
    pub statuses: Mutex<HashMap<String, JobStatus>>,
    pub cancelled: Mutex<Vec<(String, String, String)>>,
    pub fail_enqueue: AtomicBool,
    /// Number of upcoming status calls to fail.
    pub fail_statuses: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakeBroker {
    pub fn set_status(&self, job_id: &str, total: u32, complete: u32) {
        self.statuses
            .lock()
            .insert(job_id.to_string(), JobStatus::new(job_id, total, complete));
    }

    pub fn enqueued_count(&self) -> usize {
        self.enqueued.lock().len()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn enqueue(&self, requests: &[UnitRequest]) -> Result<(), BrokerError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("enqueue returned 503".into()));
        }
        self.enqueued.lock().extend_from_slice(requests);
        Ok(())
    }

    async fn enqueue_priority(&self, request: &UnitRequest) -> Result<ResultEnvelope, BrokerError> {
        Ok(ResultEnvelope {
            unit_id: request.unit_id.clone(),
            job_id: None,
            payload: Default::default(),
        })
    }

    async fn statuses(&self, job_ids: &[String]) -> Result<Vec<JobStatus>, BrokerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_statuses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Unavailable("status returned 502".into()));
        }
        let table = self.statuses.lock();
        Ok(job_ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn cancel(
        &self,
        project_id: &str,
        graph_id: &str,
        job_id: &str,
    ) -> Result<(), BrokerError> {
        self.cancelled
            .lock()
            .push((project_id.into(), graph_id.into(), job_id.into()));
        Ok(())
    }
}

/// Memory blob store that counts calls and can fail a number of listings.
pub struct TestBlobs {
    pub inner: MemoryBlobStore,
    pub lists: AtomicUsize,
    pub gets: AtomicUsize,
    pub fail_lists: AtomicUsize,
}

impl TestBlobs {
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: MemoryBlobStore::new(page_size),
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            fail_lists: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst) + self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for TestBlobs {
    async fn list(&self, prefix: &str, marker: Option<&str>) -> Result<Listing, BlobError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BlobError::Backend("listing timed out".into()));
        }
        self.inner.list(prefix, marker).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
}

pub fn gz_envelope(job_id: &str, unit_id: &str) -> Vec<u8> {
    let env = ResultEnvelope::new(job_id, unit_id)
        .with_field("avgCase", serde_json::json!({"histograms": {}}));
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&serde_json::to_vec(&env).unwrap()).unwrap();
    enc.finish().unwrap()
}

/// Write one result object per unit under the job prefix.
pub fn seed_results(blobs: &TestBlobs, job_id: &str, unit_ids: &[String]) {
    for id in unit_ids {
        blobs
            .inner
            .insert(format!("{job_id}/{id}.json.gz"), gz_envelope(job_id, id));
    }
}

pub fn points(id: &str, n: usize) -> PointSet {
    PointSet::new(
        id,
        (0..n)
            .map(|i| PointFeature {
                id: format!("pt-{i}"),
                location: Location::new(40.70 + i as f64 * 0.001, -73.95),
            })
            .collect(),
    )
}

pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_bundle(Bundle {
            id: "nyc".into(),
            time_zone: "America/New_York".into(),
        })
        .with_scenario(TransportScenario {
            id: "baseline".into(),
            bundle_id: "nyc".into(),
            banned_routes: vec![],
            modifications: vec![],
        })
}

pub fn scenario_job(point_set_id: &str) -> JobRecord {
    JobRecord::new(
        "proj",
        point_set_id,
        JobConfig::Scenario {
            scenario_id: "baseline".into(),
            mode: "WALK,TRANSIT".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2015, 6, 9).unwrap(),
            from_time: 25_200,
            to_time: 32_400,
            boarding_assumption: None,
        },
    )
    .with_name("morning peak")
}

pub struct Harness {
    pub broker: Arc<FakeBroker>,
    pub blobs: Arc<TestBlobs>,
    pub queue: Arc<QueueManager>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// Wire an orchestrator over `state_dir` with the given point sets.
    pub fn new(state_dir: &Path, sets: Vec<PointSet>, page_size: usize) -> Self {
        let broker = Arc::new(FakeBroker::default());
        let blobs = Arc::new(TestBlobs::new(page_size));
        let ledger = Ledger::open(state_dir).unwrap();
        let catalog = Arc::new(catalog());
        let queue = Arc::new(QueueManager::new(
            broker.clone(),
            Arc::new(CallbackRegistry::new()),
            ledger.clone(),
            catalog.clone(),
        ));
        let mut point_sets = StaticPointSets::new();
        for set in sets {
            point_sets = point_sets.with(set);
        }
        let ctx = Arc::new(JobContext {
            ledger,
            queue: queue.clone(),
            blobs: blobs.clone(),
            point_sets: Arc::new(point_sets),
            catalog,
            results_dir: state_dir.join("results"),
            fetch_concurrency: 4,
        });
        Self {
            broker,
            blobs,
            queue,
            orchestrator: Orchestrator::new(ctx),
        }
    }

    /// Run one poll cycle and wait for every dispatched callback.
    pub async fn poll(&self) -> usize {
        let handles = self.queue.poll_once().await.unwrap();
        let n = handles.len();
        for h in handles {
            h.await.unwrap();
        }
        n
    }
}
