pub mod applylist;
pub mod config;
pub mod controller;
pub mod error;
pub mod exec;
pub mod model;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod secrets;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod worker;

pub use applylist::{build_apply_list, filter_apply_list, FileBlacklist, PruneBlacklist};
pub use config::{load_settings, load_settings_from_str, Settings, TargetConfig};
pub use controller::{Controller, RunningController};
pub use error::{
    ApplierError, ConfigError, ExecError, QueueError, Result, SourceError,
};
pub use exec::{ApplyExecutor, ApplyOutput, ApplyRequest, KubectlExecutor, PruneRequest};
pub use model::{
    ApplyOutcome, ObjectRef, PruneOutcome, PruneStatus, RunKind, RunRequest, RunResult, Target,
};
pub use queue::{RunLease, RunQueue};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use secrets::{resolve_secret_optional, SecretError};
pub use shutdown::Shutdown;
pub use sink::{FanoutSink, HistoryStats, ResultBroadcaster, ResultSink, RunHistory};
pub use source::{
    GitManifestSource, ManifestSnapshot, ManifestSource, StaticTargetSource, TargetSource,
};
pub use worker::{RunExecutor, WorkerPool};
