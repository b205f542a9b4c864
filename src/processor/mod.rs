pub mod job;
pub mod worker;

pub use self::job::SymbolJob;
pub use self::worker::{enrich, recompute, JobOutcome, MacroWorker, RunSummary, SeriesFetcher, Worker, WorkerConfig};
