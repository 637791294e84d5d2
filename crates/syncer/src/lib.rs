//! Graph syncer service: HTTP surface and configuration

pub mod api;
pub mod config;
