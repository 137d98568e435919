//! Twitter search through the RapidAPI `twitter241` endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;

use super::{RunContext, SocialProvider};
use crate::cache::{Fetched, RawResponse};
use crate::gateway::http;
use crate::gateway::usage::ProviderCallRecord;
use crate::gateway::{
    with_retries, ErrorContext, GatewayConfig, NoopUsageSink, Provider, ProviderError, UsageSink,
};
use crate::model::{Engagement, SocialPost};

pub const DEFAULT_TWITTER_HOST: &str = "twitter241.p.rapidapi.com";

const PROVIDER: &str = Provider::RapidApi.as_str();
const TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

pub struct RapidApiTwitter {
    client: reqwest::Client,
    base_url: String,
    count: u32,
    search_type: String,
    retry: GatewayConfig,
    usage_sink: Arc<dyn UsageSink>,
}

impl RapidApiTwitter {
    /// Client from `RAPIDAPI_KEY`, `RAPIDAPI_TWITTER_HOST` and `RAPIDAPI_BASE_URL`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("RAPIDAPI_KEY")
            .map_err(|_| ProviderError::config("RAPIDAPI_KEY not set"))?;
        let host =
            std::env::var("RAPIDAPI_TWITTER_HOST").unwrap_or_else(|_| DEFAULT_TWITTER_HOST.into());
        let base_url =
            std::env::var("RAPIDAPI_BASE_URL").unwrap_or_else(|_| format!("https://{host}"));
        Self::new(api_key, host, base_url)
    }

    pub fn new(
        api_key: impl AsRef<str>,
        host: impl AsRef<str>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert("x-rapidapi-key", http::header_value("RapidAPI key", api_key.as_ref())?);
        headers.insert("x-rapidapi-host", http::header_value("RapidAPI host", host.as_ref())?);
        let client = http::build_client(TIMEOUT, headers)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            count: 20,
            search_type: "Top".to_string(),
            retry: GatewayConfig::default(),
            usage_sink: Arc::new(NoopUsageSink),
        })
    }

    pub fn with_retry(mut self, retry: GatewayConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_usage_sink(mut self, usage_sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = usage_sink;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    fn search_url(&self) -> String {
        format!("{}/search-v2", self.base_url.trim_end_matches('/'))
    }

    async fn fetch_once(&self, query: &str) -> Result<Vec<u8>, ProviderError> {
        let count = self.count.to_string();
        let mut response = self
            .client
            .get(self.search_url())
            .query(&[
                ("type", self.search_type.as_str()),
                ("count", count.as_str()),
                ("query", query),
            ])
            .send()
            .await
            .map_err(|e| http::send_error(PROVIDER, TIMEOUT, e))?;

        let status = response.status();
        let context = ErrorContext::from_response(status, response.headers());
        let body = http::read_body(PROVIDER, TIMEOUT, &mut response, MAX_RESPONSE_BYTES).await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(
                PROVIDER,
                format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    http::preview(&http::body_text(&body))
                ),
                context,
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl SocialProvider for RapidApiTwitter {
    async fn search_posts(
        &self,
        query: &str,
        ctx: &RunContext,
    ) -> Result<Fetched<SocialPost>, ProviderError> {
        let attribution = ctx.attribution("agents::social");
        let body = with_retries(&self.retry, PROVIDER, |_| {
            let attribution = &attribution;
            async move {
                let start = Instant::now();
                let result = self.fetch_once(query).await;
                let record =
                    ProviderCallRecord::new(Provider::RapidApi, "search-v2", "", attribution)
                        .latency(start.elapsed());
                let record = match &result {
                    Ok(_) => record,
                    Err(err) => record.failed(err),
                };
                self.usage_sink.record(record).await;
                result
            }
        })
        .await?;

        let posts = {
            let text = http::body_text(&body);
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| ProviderError::malformed(PROVIDER, format!("invalid JSON: {e}")))?;
            let posts = extract_posts(&parsed);
            if posts.is_empty() {
                tracing::warn!(
                    query,
                    preview = %http::preview(&text),
                    "no tweets found in response"
                );
            }
            posts
        };
        Ok(Fetched::new(posts, RawResponse::json(body)))
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// Tweets from a `search-v2` response.
///
/// The timeline layout (`result.timeline.instructions`) is tried first; the
/// legacy `globalObjects` layout is used only when the timeline yields
/// nothing. Tweets without an id or author are skipped.
pub fn extract_posts(response: &Value) -> Vec<SocialPost> {
    let from_timeline: Vec<SocialPost> = timeline_items(response)
        .into_iter()
        .filter_map(tweet_result)
        .filter_map(post_from_tweet_result)
        .collect();
    if !from_timeline.is_empty() {
        return from_timeline;
    }
    posts_from_global_objects(response)
}

/// Entries from `TimelineAddEntries` and items from `TimelineModule`.
fn timeline_items(response: &Value) -> Vec<&Value> {
    let Some(instructions) = response
        .pointer("/result/timeline/instructions")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for instruction in instructions {
        match instruction.get("type").and_then(Value::as_str) {
            Some("TimelineAddEntries") => {
                if let Some(entries) = instruction.get("entries").and_then(Value::as_array) {
                    items.extend(entries);
                }
            }
            Some("TimelineModule") => {
                if let Some(module_items) = instruction.get("items").and_then(Value::as_array) {
                    items.extend(
                        module_items
                            .iter()
                            .filter_map(|m| m.get("item"))
                            .filter(|item| item.get("itemContent").is_some()),
                    );
                }
            }
            _ => {}
        }
    }
    items
}

fn tweet_result(item: &Value) -> Option<&Value> {
    const PATHS: [&str; 4] = [
        "/itemContent/tweet_results/result",
        "/content/itemContent/tweet_results/result",
        "/content/tweet_results/result",
        "/content/tweet/tweet_results/result",
    ];
    PATHS.iter().find_map(|p| item.pointer(p))
}

fn post_from_tweet_result(tweet: &Value) -> Option<SocialPost> {
    if tweet.get("__typename").and_then(Value::as_str) != Some("Tweet") {
        return None;
    }
    let legacy = tweet.get("legacy")?;
    let user = tweet
        .pointer("/core/user_results/result/legacy")
        .or_else(|| tweet.pointer("/user/result/legacy"))?;

    let id = legacy.get("id_str").and_then(Value::as_str)?;
    let handle = user.get("screen_name").and_then(Value::as_str)?;

    Some(SocialPost {
        url: status_url(handle, id),
        snippet: text_field(legacy, "full_text").unwrap_or_default(),
        handle: handle.to_string(),
        metrics: engagement(legacy, user),
        posted_at: text_field(legacy, "created_at"),
    })
}

fn posts_from_global_objects(response: &Value) -> Vec<SocialPost> {
    let Some(tweets) = response
        .pointer("/globalObjects/tweets")
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    let users = response.pointer("/globalObjects/users");

    tweets
        .iter()
        .filter_map(|(tweet_id, tweet)| {
            let user = tweet
                .get("user_id_str")
                .and_then(Value::as_str)
                .and_then(|uid| users?.get(uid))?;
            let handle = user.get("screen_name").and_then(Value::as_str)?;
            Some(SocialPost {
                url: status_url(handle, tweet_id),
                snippet: text_field(tweet, "full_text")
                    .or_else(|| text_field(tweet, "text"))
                    .unwrap_or_default(),
                handle: handle.to_string(),
                metrics: engagement(tweet, user),
                posted_at: text_field(tweet, "created_at"),
            })
        })
        .collect()
}

fn status_url(handle: &str, id: &str) -> String {
    format!("https://twitter.com/{handle}/status/{id}")
}

fn text_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn count(obj: &Value, key: &str) -> i64 {
    obj.get(key).and_then(Value::as_i64).unwrap_or(0).max(0)
}

fn engagement(tweet: &Value, user: &Value) -> Engagement {
    Engagement {
        followers: count(user, "followers_count"),
        likes: count(tweet, "favorite_count"),
        quotes: count(tweet, "quote_count"),
        replies: count(tweet, "reply_count"),
        reposts: count(tweet, "retweet_count"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tweet(id: &str, handle: &str, text: &str) -> Value {
        json!({
            "__typename": "Tweet",
            "core": {"user_results": {"result": {"__typename": "User", "legacy": {
                "screen_name": handle, "followers_count": 1200
            }}}},
            "legacy": {
                "id_str": id, "full_text": text, "created_at": "Mon Jun 02 10:00:00 +0000 2025",
                "favorite_count": 15, "quote_count": 1, "reply_count": 3, "retweet_count": 4
            }
        })
    }

    #[test]
    fn parses_timeline_entries_and_modules() {
        let response = json!({"result": {"timeline": {"instructions": [
            {"type": "TimelineClearCache"},
            {"type": "TimelineAddEntries", "entries": [
                {"content": {"itemContent": {"tweet_results": {"result": tweet("1", "alice", "notes are hard")}}}},
                {"content": {"cursorType": "Bottom"}}
            ]},
            {"type": "TimelineModule", "items": [
                {"item": {"itemContent": {"tweet_results": {"result": tweet("2", "bob", "so many tabs")}}}}
            ]}
        ]}}});

        let posts = extract_posts(&response);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].url, "https://twitter.com/alice/status/1");
        assert_eq!(posts[0].metrics.followers, 1200);
        assert_eq!(posts[0].metrics.likes, 15);
        assert_eq!(posts[0].metrics.reposts, 4);
        assert_eq!(posts[1].handle, "bob");
        assert_eq!(posts[1].snippet, "so many tabs");
    }

    #[test]
    fn skips_non_tweets_and_missing_authors() {
        let mut no_user = tweet("3", "carol", "x");
        no_user["core"] = json!({});
        let response = json!({"result": {"timeline": {"instructions": [
            {"type": "TimelineAddEntries", "entries": [
                {"content": {"itemContent": {"tweet_results": {"result": {"__typename": "TweetTombstone"}}}}},
                {"content": {"itemContent": {"tweet_results": {"result": no_user}}}}
            ]}
        ]}}});
        assert!(extract_posts(&response).is_empty());
    }

    #[test]
    fn falls_back_to_global_objects() {
        let response = json!({"globalObjects": {
            "tweets": {"99": {"user_id_str": "u1", "text": "legacy layout", "favorite_count": 2}},
            "users": {"u1": {"screen_name": "dave", "followers_count": 7}}
        }});
        let posts = extract_posts(&response);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://twitter.com/dave/status/99");
        assert_eq!(posts[0].snippet, "legacy layout");
        assert_eq!(posts[0].metrics.followers, 7);
        assert_eq!(posts[0].posted_at, None);
    }

    #[test]
    fn negative_counts_clamped() {
        let mut t = tweet("5", "erin", "hi");
        t["legacy"]["favorite_count"] = json!(-3);
        let response = json!({"result": {"timeline": {"instructions": [
            {"type": "TimelineAddEntries", "entries": [
                {"content": {"itemContent": {"tweet_results": {"result": t}}}}
            ]}
        ]}}});
        assert_eq!(extract_posts(&response)[0].metrics.likes, 0);
    }
}
