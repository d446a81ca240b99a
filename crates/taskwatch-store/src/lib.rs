//! Storage layer: the versioned `config.json` holding credentials and the order ledger.

mod error;
pub use error::StoreError;

mod state;
pub use state::{CONFIG_VERSION, NotifyChannel, PersistedState, StateStore};

pub use taskwatch_core::AccountCredentials;
