//! Call-home gateway: accepts device connections over WebSocket, binds
//! them to device identities and exposes the live session view.

pub mod api;
pub mod bootstrap;
pub mod callhome;
pub mod cli;
pub mod state;
