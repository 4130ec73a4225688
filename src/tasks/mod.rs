//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a bucket is alive.
//!
//! # Tasks
//! - Sweeper: Removes idle entries and trims a bucket to its size bound

mod sweeper;

pub(crate) use sweeper::spawn_sweeper;
