//! This crate implements a calendar proxy merging several upstream iCalendar resources into one.
//!
//! The upstream exposes an index document listing the child calendars.
//! Each listed calendar is fetched with the same credentials, parsed and merged into a single
//! iCalendar which is rendered back to text.

pub use ical;

pub mod aggregate;
pub mod config;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod index;
pub mod metrics;
pub mod pipeline;
pub mod render;

pub use error::{Error, Result};
pub use pipeline::Pipeline;
