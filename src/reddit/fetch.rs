use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::RedditConfig;
use crate::error::{RedditError, Result};
use crate::reddit::types::{Child, Listing};
use crate::reddit::{Comment, Thread};

const REDDIT_BASE: &str = "https://www.reddit.com";

/// Comments shorter than this are noise ("this", "lol")
const MIN_COMMENT_CHARS: usize = 5;

fn thread_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/comments/([a-z0-9]{5,10})").expect("thread url pattern compiles"))
}

fn bare_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[a-z0-9]{5,10}$").expect("thread id pattern compiles"))
}

/// Thread id from a `/comments/<id>` URL or a bare id
pub fn extract_thread_id(url_or_id: &str) -> Result<String> {
    let input = url_or_id.trim();
    if let Some(caps) = thread_url_re().captures(input) {
        return Ok(caps[1].to_string());
    }
    if bare_id_re().is_match(input) {
        return Ok(input.to_string());
    }
    Err(RedditError::InvalidThreadId {
        input: url_or_id.to_string(),
    }
    .into())
}

/// Async client for Reddit's public JSON endpoints
pub struct RedditClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl RedditClient {
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| RedditError::RequestFailed {
                attempts: 0,
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: REDDIT_BASE.to_string(),
            max_retries: config.max_retries.max(1),
        })
    }

    /// Point the client at another host (mirrors, local fixtures)
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a thread and its usable top-level comments
    pub async fn fetch_thread(&self, thread_id: &str, max_comments: usize, prefer_top: bool) -> Result<Thread> {
        let url = format!("{}/comments/{}.json", self.base_url, thread_id);
        debug!("Fetching thread {} (max_comments={}, prefer_top={})", thread_id, max_comments, prefer_top);

        let listings: Vec<Listing> = self.get_json(&url).await?;
        let thread = parse_thread(thread_id, listings, max_comments, prefer_top)?;

        info!(
            "📥 Fetched r/{}: {} comments kept",
            thread.subreddit,
            thread.comments.len()
        );
        Ok(thread)
    }

    /// GET with linear backoff on transport errors, 429 and 5xx
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            RedditError::UnexpectedShape {
                                reason: e.to_string(),
                            }
                            .into()
                        });
                    }

                    let body = response.text().await.unwrap_or_default();
                    let body: String = body.chars().take(200).collect();
                    if !is_retryable(status) || attempt == self.max_retries {
                        return Err(RedditError::BadStatus {
                            status: status.as_u16(),
                            body,
                        }
                        .into());
                    }
                    last_error = format!("status {}", status);
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < self.max_retries {
                warn!("Retry {}/{} for {}: {}", attempt, self.max_retries, url, last_error);
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
        }

        Err(RedditError::RequestFailed {
            attempts: self.max_retries,
            reason: last_error,
        }
        .into())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Build a [`Thread`] from the `[post listing, comment listing]` pair
pub(crate) fn parse_thread(
    thread_id: &str,
    listings: Vec<Listing>,
    max_comments: usize,
    prefer_top: bool,
) -> Result<Thread> {
    let mut listings = listings.into_iter();
    let (Some(post), Some(comments)) = (listings.next(), listings.next()) else {
        return Err(RedditError::UnexpectedShape {
            reason: "expected a post listing and a comment listing".to_string(),
        }
        .into());
    };

    let post = post
        .data
        .children
        .into_iter()
        .next()
        .ok_or_else(|| RedditError::UnexpectedShape {
            reason: "post listing is empty".to_string(),
        })?
        .data;

    let title = post.title.unwrap_or_default().trim().to_string();
    let title = if title.is_empty() {
        format!("Reddit Thread {}", thread_id)
    } else {
        title
    };

    let mut kept: Vec<Comment> = comments
        .data
        .children
        .into_iter()
        .filter_map(usable_comment)
        .collect();
    if prefer_top {
        // stable, so equal scores keep thread order
        kept.sort_by(|a, b| b.score.cmp(&a.score));
    }
    kept.truncate(max_comments);

    Ok(Thread {
        id: post.id.unwrap_or_else(|| thread_id.to_string()),
        subreddit: post.subreddit.unwrap_or_else(|| "unknown".to_string()),
        title,
        comments: kept,
    })
}

fn usable_comment(child: Child) -> Option<Comment> {
    if child.kind != "t1" {
        return None;
    }
    let data = child.data;
    let body = data.body.unwrap_or_default().trim().to_string();
    if body.is_empty() || body == "[deleted]" || body == "[removed]" || body.chars().count() < MIN_COMMENT_CHARS {
        return None;
    }
    let author = data
        .author
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    Some(Comment {
        author,
        body,
        score: data.score.unwrap_or(0.0) as i64,
    })
}
