//! `kitforge-cloud`: everything that talks to systems outside the process.
//!
//! ```text
//! GeneratedPackage (archive on disk)
//!     │
//!     ▼
//! ArchiveStorage   ← object storage (S3-compatible) or local disk
//!     │
//!     ▼
//! Deployer         ← tracked background job per tenant
//!     ├── SourceControl  (GitHub: repository + single-commit push)
//!     └── CloudPlatform  (Render: database, services, env vars, health)
//! ```
//!
//! The ledger in `kitforge-core` is the only channel back to callers: jobs
//! report completion by writing tenant state, and status reads come from
//! there plus live health checks.

pub mod builds;
pub mod deploy;
pub mod error;
pub mod github;
pub mod ports;
pub mod render;
pub mod storage;

pub use builds::{BuildService, StoredBuild};
pub use deploy::{DeployAck, DeployOptions, DeployStatus, Deployer, OverallStatus};
pub use error::{BuildError, BuildResult, DeployError, DeployResult, StorageError, StorageResult};
pub use ports::{CloudPlatform, ServiceHealth, SourceControl};
pub use storage::{create_storage, ArchiveStorage, LocalStorage, ObjectStorage};
