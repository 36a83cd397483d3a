pub mod assignments;
pub mod auth;
pub mod chat;
pub mod classes;
pub mod core;
pub mod forum;
pub mod live;
pub mod resources;
pub mod session;
pub mod setup;
