//! The node that holds the live device connection.

mod actor;
mod context;

pub use actor::{spawn_master, LocalMaster};
pub use context::MasterTxContext;
