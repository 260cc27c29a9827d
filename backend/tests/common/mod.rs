//! Hand-written fakes for the detection workflow's collaborators. Each fake
//! counts its calls so tests can assert which stages ran.
#![allow(dead_code)]

use async_trait::async_trait;
use shared::{ClassProbabilities, InferenceResultItem, ItemStatus, PestClass};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use leafguard::access::directory::FarmDirectory;
use leafguard::access::guard::AccessGuard;
use leafguard::access::models::{FarmId, FarmRole, Plot, PlotId, Task, TaskId, TaskType};
use leafguard::config::DetectionConfig;
use leafguard::db::detection_store::{CommitSummary, DetectionStore, DetectionUnit};
use leafguard::db::models::{DetectionRecord, MonitoringSession, SessionDetails};
use leafguard::detection::model::{ArchivedImage, ImageUpload};
use leafguard::detection::service::DetectionService;
use leafguard::error::{DetectionError, Result};
use leafguard::inference::gateway::InferenceGateway;
use leafguard::storage::s3_service::ImageArchiver;

pub const MONITORING_TASK: i64 = 7;
pub const IRRIGATION_TASK: i64 = 8;
pub const ORPHAN_TASK: i64 = 9;
pub const FARM: i64 = 2;

pub fn jpeg(name: &str) -> ImageUpload {
    ImageUpload::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, name.len() as u8])
}

pub fn success_item(class: PestClass, confidence: f64) -> InferenceResultItem {
    InferenceResultItem {
        status: ItemStatus::Success,
        filename: None,
        predicted_class: Some(class),
        confidence: Some(confidence),
        probabilities: Some(ClassProbabilities {
            healthy: 1.0 - confidence,
            pest: confidence,
            disease: 0.0,
        }),
        error: None,
    }
}

pub fn error_item(reason: &str) -> InferenceResultItem {
    InferenceResultItem {
        status: ItemStatus::Error,
        filename: None,
        predicted_class: None,
        confidence: None,
        probabilities: None,
        error: Some(reason.to_string()),
    }
}

type Responder = Box<dyn Fn(&[ImageUpload]) -> Result<Vec<InferenceResultItem>> + Send + Sync>;

pub struct FakeGateway {
    responder: Responder,
    pub calls: AtomicUsize,
}

impl FakeGateway {
    /// Answers with the given statuses; the batch must have the same length.
    pub fn with_statuses(statuses: Vec<ItemStatus>) -> Self {
        Self::new(move |images| {
            assert_eq!(images.len(), statuses.len(), "fake gateway misconfigured");
            Ok(statuses
                .iter()
                .enumerate()
                .map(|(i, status)| match status {
                    ItemStatus::Success => success_item(PestClass::Pest, 0.5 + i as f64 / 100.0),
                    ItemStatus::Error => error_item("image could not be decoded"),
                })
                .collect())
        })
    }

    pub fn all_success() -> Self {
        Self::new(|images| {
            Ok(images
                .iter()
                .map(|_| success_item(PestClass::Healthy, 0.97))
                .collect())
        })
    }

    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ImageUpload]) -> Result<Vec<InferenceResultItem>> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceGateway for FakeGateway {
    async fn predict(&self, images: &[ImageUpload]) -> Result<Vec<InferenceResultItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(images)
    }
}

pub struct FakeDirectory {
    tasks: HashMap<i64, Task>,
    plots: HashMap<i64, Plot>,
    admins: Vec<Uuid>,
}

impl FakeDirectory {
    /// Task 7 is a monitoring task on plot 1 of farm 2, task 8 is an
    /// irrigation task on the same plot, task 9 points at a missing plot.
    pub fn standard(admin: Uuid) -> Self {
        let task = |id: i64, plot: i64, task_type: TaskType| Task {
            id: TaskId::new(id).unwrap(),
            plot_id: PlotId::new(plot).unwrap(),
            task_type,
        };
        let mut tasks = HashMap::new();
        tasks.insert(MONITORING_TASK, task(MONITORING_TASK, 1, TaskType::PhytosanitaryMonitoring));
        tasks.insert(IRRIGATION_TASK, task(IRRIGATION_TASK, 1, TaskType::parse("irrigation")));
        tasks.insert(ORPHAN_TASK, task(ORPHAN_TASK, 404, TaskType::PhytosanitaryMonitoring));

        let mut plots = HashMap::new();
        plots.insert(
            1,
            Plot {
                id: PlotId::new(1).unwrap(),
                farm_id: FarmId::new(FARM).unwrap(),
            },
        );
        Self {
            tasks,
            plots,
            admins: vec![admin],
        }
    }
}

#[async_trait]
impl FarmDirectory for FakeDirectory {
    async fn find_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(&task_id.get()).cloned())
    }

    async fn find_plot(&self, plot_id: PlotId) -> Result<Option<Plot>> {
        Ok(self.plots.get(&plot_id.get()).cloned())
    }

    async fn farm_role(&self, farm_id: FarmId, user_id: Uuid) -> Result<Option<FarmRole>> {
        if farm_id.get() == FARM && self.admins.contains(&user_id) {
            Ok(Some(FarmRole::Admin))
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
pub struct FakeArchiver {
    fail_on_call: Option<usize>,
    pub uploads: Mutex<Vec<(String, String)>>,
    pub calls: AtomicUsize,
}

impl FakeArchiver {
    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (file name, folder) for every successful upload, in upload order.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageArchiver for FakeArchiver {
    async fn archive(&self, image: &ImageUpload, folder: &str) -> Result<ArchivedImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(DetectionError::Storage("bucket unavailable".to_string()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((image.file_name.clone(), folder.to_string()));
        let storage_id = format!("{}/{}", folder, image.file_name);
        Ok(ArchivedImage {
            url: format!("https://images.test/{}", storage_id),
            storage_id,
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    fail_commit: bool,
    sessions: Mutex<Vec<MonitoringSession>>,
    detections: Mutex<Vec<DetectionRecord>>,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl MemoryStore {
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    pub fn sessions(&self) -> Vec<MonitoringSession> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn detections(&self) -> Vec<DetectionRecord> {
        self.detections.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty() && self.detections().is_empty()
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionStore for MemoryStore {
    async fn commit(&self, unit: DetectionUnit) -> Result<CommitSummary> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit {
            return Err(DetectionError::Persistence(
                "transaction cancelled".to_string(),
            ));
        }
        let (session, detections) = unit.into_parts();
        let summary = CommitSummary {
            session_id: session.as_ref().map(|s| s.id),
            detections: detections.len(),
        };
        let mut sessions = self.sessions.lock().unwrap();
        let mut stored = self.detections.lock().unwrap();
        sessions.extend(session);
        stored.extend(detections);
        Ok(summary)
    }

    fn rollback(&self, _unit: DetectionUnit) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionDetails>> {
        let session = self
            .sessions()
            .into_iter()
            .find(|s| s.id == session_id);
        Ok(session.map(|session| SessionDetails {
            detections: self
                .detections()
                .into_iter()
                .filter(|d| d.session_id == session.id)
                .collect(),
            session,
        }))
    }
}

pub struct Harness {
    pub service: DetectionService,
    pub gateway: Arc<FakeGateway>,
    pub archiver: Arc<FakeArchiver>,
    pub store: Arc<MemoryStore>,
    pub admin: Uuid,
}

impl Harness {
    pub fn new(gateway: FakeGateway, archiver: FakeArchiver, store: MemoryStore) -> Self {
        let admin = Uuid::new_v4();
        let gateway = Arc::new(gateway);
        let archiver = Arc::new(archiver);
        let store = Arc::new(store);
        let service = DetectionService::new(
            gateway.clone(),
            AccessGuard::new(Arc::new(FakeDirectory::standard(admin))),
            archiver.clone(),
            store.clone(),
            DetectionConfig {
                environment: "test".to_string(),
                pest_category: "leaf-pests".to_string(),
            },
        );
        Self {
            service,
            gateway,
            archiver,
            store,
            admin,
        }
    }

    pub fn with_gateway(gateway: FakeGateway) -> Self {
        Self::new(gateway, FakeArchiver::default(), MemoryStore::default())
    }
}
