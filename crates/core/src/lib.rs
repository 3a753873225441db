pub mod config;
pub mod entities;
pub mod error;
pub mod repo;

pub use config::Config;
pub use entities::{
    DatasetId, DatasetRecord, DeploymentStatus, EvaluationStatus, ModelId, ModelRecord,
    NewScore, ScoreRecord, TaskId, TaskRecord,
};
pub use error::CoreError;
pub use repo::{DatasetRepo, MemoryStore, ModelRepo, ScoreRepo, TaskRepo};
