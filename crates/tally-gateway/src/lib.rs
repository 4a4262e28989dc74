pub mod clock;
pub mod commands;
pub mod connection;
pub mod gate;
pub mod projection;
pub mod registry;
pub mod store;
pub mod sync;
