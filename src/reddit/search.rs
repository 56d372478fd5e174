use tracing::{debug, error, info, warn};

use crate::config::{AutomationConfig, SortBy};
use crate::error::Result;
use crate::reddit::types::Listing;
use crate::reddit::{ProducedVideosTracker, RedditClient, RedditPost};

const TIME_FILTERS: [&str; 6] = ["hour", "day", "week", "month", "year", "all"];
const SEARCH_LIMIT: usize = 25;

/// Criteria a listing entry has to meet
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub sort_by: SortBy,
    pub time_filter: String,
    pub min_score: i64,
    pub min_comments: i64,
    pub limit: usize,
}

impl SearchCriteria {
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            sort_by: config.sort_by,
            time_filter: config.time_filter.clone(),
            min_score: config.min_score,
            min_comments: config.min_comments,
            limit: SEARCH_LIMIT,
        }
    }
}

/// Letters, digits, `_` and `-` only
pub fn is_valid_subreddit(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Unknown time filters fall back to `day`
pub fn normalize_time_filter(filter: &str) -> &str {
    if TIME_FILTERS.contains(&filter) {
        filter
    } else {
        warn!("Invalid time filter '{}', using 'day'", filter);
        "day"
    }
}

/// Listing path for a subreddit, relative to the API host
pub fn listing_path(subreddit: &str, criteria: &SearchCriteria) -> String {
    match criteria.sort_by {
        SortBy::Top => format!(
            "/r/{}/top.json?t={}&limit={}",
            subreddit,
            normalize_time_filter(&criteria.time_filter),
            criteria.limit
        ),
        SortBy::New => format!("/r/{}/new.json?limit={}", subreddit, criteria.limit),
        SortBy::Hot => format!("/r/{}/hot.json?limit={}", subreddit, criteria.limit),
    }
}

/// Self posts from a listing that meet the score and comment thresholds
pub(crate) fn filter_posts(listing: Listing, fallback_subreddit: &str, criteria: &SearchCriteria) -> Vec<RedditPost> {
    listing
        .data
        .children
        .into_iter()
        .filter_map(|child| {
            let data = child.data;
            // link posts have nothing to narrate
            if data.is_self == Some(false) {
                return None;
            }
            let id = data.id.unwrap_or_default();
            let title = data.title.unwrap_or_default().trim().to_string();
            let score = data.score.unwrap_or(0.0) as i64;
            let num_comments = data.num_comments.unwrap_or(0.0) as i64;
            if id.is_empty() || title.is_empty() || score < criteria.min_score || num_comments < criteria.min_comments {
                return None;
            }
            Some(RedditPost {
                id,
                subreddit: data.subreddit.unwrap_or_else(|| fallback_subreddit.to_string()),
                title,
                score,
                num_comments,
                url: format!("https://www.reddit.com{}", data.permalink.unwrap_or_default()),
            })
        })
        .collect()
}

/// First post, in list order, that the tracker has not seen
pub fn first_unproduced<'a>(posts: &'a [RedditPost], tracker: &ProducedVideosTracker) -> Option<&'a RedditPost> {
    posts.iter().find(|post| {
        let seen = tracker.is_produced(&post.id);
        if seen {
            debug!("Skipping already produced: {}", post.title);
        }
        !seen
    })
}

impl RedditClient {
    /// Posts in `subreddit` meeting `criteria`
    ///
    /// Request failures are logged and yield an empty list so a search can
    /// move on to the next subreddit.
    pub async fn search_posts(&self, subreddit: &str, criteria: &SearchCriteria) -> Vec<RedditPost> {
        if !is_valid_subreddit(subreddit) {
            error!("Invalid subreddit name: {}", subreddit);
            return Vec::new();
        }

        let url = format!("{}{}", self.base_url(), listing_path(subreddit, criteria));
        match self.get_json::<Listing>(&url).await {
            Ok(listing) => filter_posts(listing, subreddit, criteria),
            Err(e) => {
                error!("Error fetching posts from r/{}: {}", subreddit, e);
                Vec::new()
            }
        }
    }

    /// Walk `subreddits` in order and return the first post not yet produced
    pub async fn find_suitable_post(
        &self,
        subreddits: &[String],
        criteria: &SearchCriteria,
        tracker: &ProducedVideosTracker,
    ) -> Result<Option<RedditPost>> {
        for subreddit in subreddits {
            info!("🔎 Searching r/{}...", subreddit);
            let posts = self.search_posts(subreddit, criteria).await;
            if let Some(post) = first_unproduced(&posts, tracker) {
                info!("Found suitable post: {} ({} points, {} comments)", post.title, post.score, post.num_comments);
                return Ok(Some(post.clone()));
            }
        }
        warn!("No suitable posts found that haven't been produced");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn criteria() -> SearchCriteria {
        SearchCriteria::from_config(&AutomationConfig::default())
    }

    fn listing() -> Listing {
        serde_json::from_value(json!({"data": {"children": [
            {"kind": "t3", "data": {"id": "aaaaa1", "title": "Popular question", "score": 5000,
                "num_comments": 800, "is_self": true, "subreddit": "AskReddit",
                "permalink": "/r/AskReddit/comments/aaaaa1/popular/"}},
            {"kind": "t3", "data": {"id": "bbbbb2", "title": "A link", "score": 9000,
                "num_comments": 900, "is_self": false}},
            {"kind": "t3", "data": {"id": "ccccc3", "title": "Quiet one", "score": 20,
                "num_comments": 3, "is_self": true}},
            {"kind": "t3", "data": {"id": "ddddd4", "title": "  ", "score": 5000,
                "num_comments": 800, "is_self": true}},
            {"kind": "t3", "data": {"id": "eeeee5", "title": "Second question", "score": 1000,
                "num_comments": 50}}
        ]}}))
        .unwrap()
    }

    #[test]
    fn test_subreddit_validation() {
        assert!(is_valid_subreddit("AskReddit"));
        assert!(is_valid_subreddit("no_sleep-2"));
        assert!(!is_valid_subreddit(""));
        assert!(!is_valid_subreddit("ask/../reddit"));
        assert!(!is_valid_subreddit("a b"));
    }

    #[test]
    fn test_listing_paths() {
        let mut c = criteria();
        assert_eq!(listing_path("AskReddit", &c), "/r/AskReddit/hot.json?limit=25");

        c.sort_by = SortBy::Top;
        c.time_filter = "fortnight".to_string();
        assert_eq!(listing_path("AskReddit", &c), "/r/AskReddit/top.json?t=day&limit=25");

        c.time_filter = "week".to_string();
        assert_eq!(listing_path("AskReddit", &c), "/r/AskReddit/top.json?t=week&limit=25");

        c.sort_by = SortBy::New;
        assert_eq!(listing_path("AskReddit", &c), "/r/AskReddit/new.json?limit=25");
    }

    #[test]
    fn test_filter_posts() {
        let posts = filter_posts(listing(), "AskReddit", &criteria());
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaa1", "eeeee5"]);
        assert_eq!(posts[0].url, "https://www.reddit.com/r/AskReddit/comments/aaaaa1/popular/");
        assert_eq!(posts[1].subreddit, "AskReddit");
    }

    #[test]
    fn test_first_unproduced_skips_tracked_ids() {
        let dir = tempdir().unwrap();
        let mut tracker = ProducedVideosTracker::load(dir.path().join("db.json"));
        let posts = filter_posts(listing(), "AskReddit", &criteria());

        assert_eq!(first_unproduced(&posts, &tracker).map(|p| p.id.as_str()), Some("aaaaa1"));
        tracker.mark_produced("aaaaa1").unwrap();
        assert_eq!(first_unproduced(&posts, &tracker).map(|p| p.id.as_str()), Some("eeeee5"));
        tracker.mark_produced("eeeee5").unwrap();
        assert!(first_unproduced(&posts, &tracker).is_none());
    }

    #[tokio::test]
    async fn test_invalid_subreddit_makes_no_request() {
        let client = RedditClient::new(&Default::default())
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert!(client.search_posts("bad name", &criteria()).await.is_empty());
    }
}
