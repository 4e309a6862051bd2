pub mod proof;
pub mod ws;
