//! Investigation state.
//!
//! - [`Investigation`]: the shared record for one request
//! - [`Delta`]: the incremental update every stage emits
//! - [`StateStore`]: the bounded registry of investigations

mod store;
mod types;


pub use store::StateStore;
pub use types::*;
