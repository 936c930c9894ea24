pub mod bootstrap;
pub mod controller;
pub mod coordinator;
pub mod state;

pub use controller::WatchlistController;
pub use coordinator::{AccountSnapshot, LoadCoordinator};
pub use state::Engine;
