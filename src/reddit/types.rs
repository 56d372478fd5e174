use serde::{Deserialize, Serialize};

/// A comment that survived filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub score: i64,
}

/// A fetched discussion thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub comments: Vec<Comment>,
}

/// A listing entry that passed the automation filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub score: i64,
    pub num_comments: i64,
    pub url: String,
}

// Wire shapes of Reddit's public JSON API. Fields are defaulted because
// Reddit omits or nulls them freely.

#[derive(Debug, Deserialize)]
pub(crate) struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Child {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub data: ChildData,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChildData {
    pub id: Option<String>,
    pub subreddit: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub score: Option<f64>,
    pub num_comments: Option<f64>,
    pub is_self: Option<bool>,
    pub permalink: Option<String>,
}
