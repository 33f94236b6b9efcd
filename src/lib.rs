//! Pong Game Server - authoritative real-time Pong sessions and
//! four-player tournaments

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod results;
pub mod store;
pub mod tournament;
pub mod util;
pub mod ws;
