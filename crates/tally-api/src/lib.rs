pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod router;
pub mod timers;
