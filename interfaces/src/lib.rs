//! Contracts for the collaborators the News core talks to but does not own:
//! the profile preference store and the browsing history service.

pub mod baseline;
pub mod defs;
pub mod empty;
pub mod state;

pub use baseline::StaticHistory;
pub use defs::{HistoryEntry, HistoryQuerier, HistoryQuery, PrefService};
pub use empty::EmptyHistory;
pub use state::InMemoryPrefService;
