//! Distributed job orchestration: fan-out of analysis jobs into unit
//! requests, broker status polling, and result aggregation.

pub mod aggregate;
pub mod blob;
pub mod broker;
pub mod config;
pub mod error;
pub mod fanout;
pub mod job;
pub mod points;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod scenario;
pub mod service;

pub use blob::{BlobStore, FsBlobStore, Listing, MemoryBlobStore, ObjectSummary};
pub use broker::{Broker, HttpBroker};
pub use config::{load_config, ClusterSettings, Config};
pub use error::{AggregateError, BlobError, BrokerError, ConfigError, JobError};
pub use job::{Job, JobContext};
pub use points::{GeoJsonPointSets, PointFeature, PointSet, PointSetSource, StaticPointSets};
pub use queue::QueueManager;
pub use registry::{callback, CallbackId, CallbackOutcome, CallbackRegistry, StatusCallback};
pub use scenario::{Bundle, RouteRef, ScenarioCatalog, StaticCatalog, TransportScenario};
pub use service::{JobProgress, Orchestrator};
