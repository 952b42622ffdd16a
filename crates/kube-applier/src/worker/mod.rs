pub mod pool;
pub mod run;

pub use pool::WorkerPool;
pub use run::RunExecutor;
