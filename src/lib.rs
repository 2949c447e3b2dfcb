//! Catalogue browsing and a categorised local library.
//!
//! - [`source`] - remote catalogue sources and page-by-page browsing
//! - [`library`] - reconciling listed entries into the local store
//! - [`category`] - user categories and their management screen
//! - [`storage`] - SQLite persistence

pub mod category;
pub mod config;
pub mod library;
pub mod source;
pub mod storage;
pub mod util;
