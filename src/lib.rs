pub mod cli;
pub mod config;
pub mod enrich;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod source;
pub mod store;
pub mod views;
pub mod window;

pub use config::Config;
pub use merge::PlayHistory;
pub use model::{ArtistMetadata, CanonicalPlay};
pub use source::{HistorySource, RawBatch, SourceRegistry};
pub use store::HistoryStore;
