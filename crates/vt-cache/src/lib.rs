//! Shell-origin content cache: asset lists, the file store, and routing.

pub mod assets;
pub mod store;
pub mod worker;

pub use assets::AssetEntry;
pub use assets::AssetList;
pub use store::ActivationReport;
pub use store::AssetCache;
pub use store::CachedAsset;
pub use worker::CacheWorker;
pub use worker::FetchDecision;
pub use worker::RouteRules;
pub use worker::WorkerState;
