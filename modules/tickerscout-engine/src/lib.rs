pub mod analyzer;
pub mod backend;
pub mod batcher;
pub mod cache;
pub mod export;
pub mod fetcher;
pub mod normalizer;
pub mod parser;
pub mod scan;
pub mod scheduler;
pub mod store;

pub use backend::{BackendClient, ScanBackend};
pub use cache::{AnalysisCache, RemoteCache};
pub use export::{export_result, import_result};
pub use scan::ScanEngine;
pub use store::{JsonFileStore, MemoryStore, SignalStore};
