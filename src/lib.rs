//! Chat channel archiver library.
//!
//! A service that scrapes messages from remote chat channels through a
//! persisted authenticated browser session, batches them, and durably
//! uploads each batch to object storage with at-least-once delivery.

pub mod alert;
pub mod automation;
pub mod captcha;
pub mod config;
pub mod control;
pub mod cursor;
pub mod error;
pub mod model;
pub mod session;
pub mod storage;
pub mod upload;
pub mod worker;
