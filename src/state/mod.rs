//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `LinkStatus`: lifecycle status of one frontier key (pending, in progress, completed, failed)
//! - `LinkRecord`: response metadata kept per frontier key
//! - `ScrapeParams`: the parameter bag a URL is fetched with

mod link_record;
mod link_status;

// Re-export main types
pub use link_record::{LinkRecord, ScrapeParams, Timing};
pub use link_status::LinkStatus;
