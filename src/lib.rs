#![forbid(unsafe_code)]

//! `uta-catalog`: incremental extraction of song setlists from a
//! video-platform channel's uploads into a canonical, publishable
//! catalog.

pub mod catalog;
pub mod confidence;
pub mod config;
pub mod error;
pub mod fslock;
pub mod genre;
pub mod normalize;
pub mod orchestrator;
pub mod platform_client;
pub mod publisher;
pub mod security;
pub mod setlist_selector;
pub mod timefmt;
pub mod timestamp_parser;
pub mod watermark;
