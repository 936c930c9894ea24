pub mod cache;
pub mod dispatcher;
pub mod quotes;
pub mod rate_limit;
pub mod resolver;

pub use cache::{CacheEntry, QuoteCache, TtlCache};
pub use dispatcher::FetchDispatcher;
pub use quotes::QuoteService;
pub use rate_limit::RateLimitGate;
pub use resolver::{InstrumentMetadataCache, ResolvedTicker, TickerResolver};
