//! HTTP handlers for lorekeep-api.

pub mod collections;
pub mod library;
pub mod uploads;
