pub mod run;
pub mod target;

pub use run::{
    ApplyOutcome, ObjectRef, PruneOutcome, PruneStatus, Run, RunKind, RunRequest, RunResult,
};
pub use target::Target;
