//! # Reddit Module
//!
//! Thread fetching, subreddit search for automation, and the on-disk record
//! of threads that already have a video.

pub mod fetch;
pub mod search;
pub mod tracker;
pub mod types;

pub use fetch::{extract_thread_id, RedditClient};
pub use search::{first_unproduced, is_valid_subreddit, listing_path, SearchCriteria};
pub use tracker::ProducedVideosTracker;
pub use types::{Comment, RedditPost, Thread};
