pub mod broker;
pub mod decode;
pub mod quote;
pub mod request;
pub mod stooq;

pub use broker::{
    sort_positions, AccountSummary, BrokerClient, Cash, InstrumentMetadata, Investments,
    Position, PositionInstrument, PositionSort, WalletImpact,
};
pub use quote::{Quote, QuoteSource};
pub use request::{
    HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use stooq::StooqClient;

/// Upper bound on concurrent primary quote workers.
pub const PRIMARY_CONCURRENCY_LIMIT: usize = 4;

/// Symbols per outbound stooq call.
pub const SECONDARY_BATCH_SIZE: usize = 25;

/// Maximum number of watchlist rows kept in a persisted snapshot.
pub const SNAPSHOT_CAP: usize = 300;

/// Worker count for the primary queue, between 1 and [`PRIMARY_CONCURRENCY_LIMIT`].
#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.clamp(1, PRIMARY_CONCURRENCY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_clamped_to_primary_limit() {
        assert_eq!(ensure_concurrency_limit(0), 1);
        assert_eq!(ensure_concurrency_limit(2), 2);
        assert_eq!(ensure_concurrency_limit(10), PRIMARY_CONCURRENCY_LIMIT);
    }
}
