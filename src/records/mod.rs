pub mod snapshot;
pub mod watchlist;

pub use snapshot::{CustomWatchlist, SnapshotStore};
pub use watchlist::{has_quote_data, merge, merge_with_previous, WatchlistItem};
