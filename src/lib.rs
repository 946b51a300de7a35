//! Find the keg that's right for you.
//!
//! kegfinder crawls a paginated keg catalog breadth-first, fills in
//! each keg's alcohol percentage from a local reference table or, when
//! that misses, from a web search across distinct-domain result pages,
//! then ranks everything by gallons of alcohol per dollar and keeps
//! the top K.

pub mod crawl;
pub mod extract;
pub mod fetcher;
pub mod pipeline;
pub mod reference;
pub mod resolver;
pub mod topk;
pub mod types;

pub use fetcher::{FetchError, FetcherConfig, PageFetcher};
pub use pipeline::{PipelineConfig, PipelineStats, RankingPipeline};
pub use resolver::{AbvResolver, ResolverConfig};
pub use topk::{ScoredItem, TopKSelector};
pub use types::{Item, ItemAttrs};
