//! Client for the paginated, quota-limited catalog API.
//!
//! Every request carries the API key, `maxResults` and `prettyPrint`. Three
//! request shapes exist:
//! - **batched by id**: the id list is cut into groups of at most
//!   [`ID_BATCH_SIZE`], one request per group, items concatenated in input
//!   order. Used whenever the request has an id list.
//! - **page following**: the continuation token of each response is fed into
//!   the next request until none is returned.
//! - **single shot**: one request; its continuation token is handed back so
//!   callers can page manually.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};

/// The catalog API refuses more than 50 ids per request.
pub const ID_BATCH_SIZE: usize = 50;

pub type QueryPairs = [(String, String)];

/// Sends one GET request and returns the decoded JSON body, whatever the
/// HTTP status. Envelope checks happen in [`RemoteClient`].
pub trait Transport {
    fn get(&self, endpoint: &str, query: &QueryPairs) -> impl Future<Output = Result<Value>> + Send;
}

/// Blocking `ureq` agent, driven from a blocking worker thread.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Transport for UreqTransport {
    fn get(&self, endpoint: &str, query: &QueryPairs) -> impl Future<Output = Result<Value>> + Send {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base_url, endpoint);
        let query = query.to_vec();
        async move {
            tokio::task::spawn_blocking(move || fetch_json(&agent, &url, &query))
                .await
                .map_err(|err| CatalogError::Transport(err.to_string()))?
        }
    }
}

fn fetch_json(agent: &ureq::Agent, url: &str, query: &QueryPairs) -> Result<Value> {
    let mut request = agent.get(url);
    for (key, value) in query {
        request = request.query(key, value);
    }
    let response = match request.call() {
        Ok(response) => response,
        // Error statuses still carry the JSON error envelope.
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => return Err(CatalogError::Transport(err.to_string())),
    };
    response
        .into_json::<Value>()
        .map_err(|err| CatalogError::RemoteApi(format!("malformed response body: {err}")))
}

/// Concatenated items of one logical request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub items: Vec<Value>,
    /// Token of the page after the last one fetched, if any.
    pub next_page_token: Option<String>,
}

/// One logical request against a list endpoint.
#[derive(Debug, Clone)]
pub struct Request {
    endpoint: &'static str,
    params: Vec<(String, String)>,
    ids: Option<Vec<String>>,
    page_token: Option<String>,
    follow_pages: bool,
}

impl Request {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            params: Vec::new(),
            ids: None,
            page_token: None,
            follow_pages: false,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// Switches the request to the batched-by-id shape.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn page_token(mut self, token: Option<&str>) -> Self {
        self.page_token = token.map(str::to_string);
        self
    }

    /// Follow continuation tokens until the last page. Ignored for id lists.
    pub fn follow_pages(mut self, follow: bool) -> Self {
        self.follow_pages = follow;
        self
    }
}

/// How a channel is looked up.
#[derive(Debug, Clone)]
pub enum ChannelLookup {
    Ids(Vec<String>),
    Username(String),
}

/// Related-video search parameters.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub related_to: Option<String>,
    pub query: Option<String>,
    pub page_token: Option<String>,
}

pub struct RemoteClient<T> {
    transport: T,
    api_key: String,
    max_results: u32,
    pretty_print: bool,
}

impl<T: Transport> RemoteClient<T> {
    pub fn new(transport: T, api_key: impl Into<String>, max_results: u32) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            max_results,
            pretty_print: false,
        }
    }

    /// Runs `request` in whichever shape it calls for.
    pub async fn fetch(&self, request: Request) -> Result<Feed> {
        let Request {
            endpoint,
            mut params,
            ids,
            page_token,
            follow_pages,
        } = request;

        if let Some(ids) = ids {
            return self.fetch_batched(endpoint, params, &ids).await;
        }

        if let Some(token) = page_token {
            params.push(("pageToken".into(), token));
        }
        let mut response = self.send(endpoint, &params).await?;
        let mut feed = Feed {
            items: take_items(&mut response)?,
            next_page_token: take_next_token(&mut response),
        };

        while follow_pages && let Some(token) = feed.next_page_token.take() {
            set_param(&mut params, "pageToken", token.clone());
            let mut response = self.send(endpoint, &params).await?;
            feed.items.extend(take_items(&mut response)?);
            feed.next_page_token = take_next_token(&mut response);
            if feed.next_page_token.as_deref() == Some(token.as_str()) {
                warn!("{endpoint} repeated page token {token}, stopping");
                feed.next_page_token = None;
            }
        }
        Ok(feed)
    }

    async fn fetch_batched(
        &self,
        endpoint: &str,
        mut params: Vec<(String, String)>,
        ids: &[String],
    ) -> Result<Feed> {
        let mut feed = Feed::default();
        for chunk in ids.chunks(ID_BATCH_SIZE) {
            set_param(&mut params, "id", chunk.join(","));
            debug!("requesting {} ids from {endpoint}", chunk.len());
            let mut response = self.send(endpoint, &params).await?;
            feed.items.extend(take_items(&mut response)?);
        }
        Ok(feed)
    }

    async fn send(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        let mut query = Vec::with_capacity(params.len() + 3);
        query.push(("key".to_string(), self.api_key.clone()));
        query.push(("maxResults".to_string(), self.max_results.to_string()));
        query.push(("prettyPrint".to_string(), self.pretty_print.to_string()));
        query.extend(params.iter().cloned());

        let response = self.transport.get(endpoint, &query).await?;
        check_envelope(response)
    }

    pub async fn channels(&self, lookup: ChannelLookup) -> Result<Feed> {
        let request = Request::new("channels")
            .param("hl", "en")
            .param("part", "contentDetails,brandingSettings,snippet")
            .param(
                "fields",
                "items(id,brandingSettings/image/bannerTvMediumImageUrl,\
                 contentDetails/relatedPlaylists/uploads,snippet/localized)",
            );
        let request = match lookup {
            ChannelLookup::Ids(ids) => request.ids(ids),
            ChannelLookup::Username(name) => request.param("forUsername", name),
        };
        self.fetch(request).await
    }

    /// Category names for `ids`, or every category of `region` when `ids` is
    /// empty.
    pub async fn video_categories(&self, ids: &[String], region: &str) -> Result<Feed> {
        let request = Request::new("videoCategories")
            .param("fields", "items(id,snippet/title)")
            .param("part", "snippet")
            .param("hl", "en")
            .param("regionCode", region);
        if ids.is_empty() {
            self.fetch(request).await
        } else {
            self.fetch(request.ids(ids.iter().cloned())).await
        }
    }

    pub async fn videos(&self, ids: &[String]) -> Result<Feed> {
        let request = Request::new("videos")
            .param("part", "contentDetails,statistics,snippet,status")
            .param("hl", "en")
            .param(
                "fields",
                "items(id,snippet(publishedAt,channelId,thumbnails/medium/url,channelTitle,\
                 categoryId,localized),contentDetails(duration,definition),statistics/viewCount,\
                 status/uploadStatus)",
            )
            .ids(ids.iter().cloned());
        self.fetch(request).await
    }

    pub async fn playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        follow_pages: bool,
    ) -> Result<Feed> {
        let request = Request::new("playlistItems")
            .param(
                "fields",
                "nextPageToken,items(snippet(channelId,resourceId/videoId),status/privacyStatus)",
            )
            .param("playlistId", playlist_id)
            .param("part", "snippet,status")
            .page_token(page_token)
            .follow_pages(follow_pages);
        self.fetch(request).await
    }

    pub async fn playlists(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        follow_pages: bool,
    ) -> Result<Feed> {
        let request = Request::new("playlists")
            .param("part", "snippet,contentDetails")
            .param("channelId", channel_id)
            .param(
                "fields",
                "nextPageToken,items(id,contentDetails/itemCount,\
                 snippet(publishedAt,localized,thumbnails/medium/url))",
            )
            .page_token(page_token)
            .follow_pages(follow_pages);
        self.fetch(request).await
    }

    pub async fn search(&self, search: SearchParams) -> Result<Feed> {
        let mut request = Request::new("search")
            .param("relevanceLanguage", "en")
            .param("safeSearch", "none")
            .param("part", "snippet")
            .param("type", "video")
            .param("fields", "nextPageToken,items(id/videoId,snippet/channelId)")
            .page_token(search.page_token.as_deref());
        if let Some(video_id) = search.related_to {
            request = request.param("relatedToVideoId", video_id);
        }
        if let Some(query) = search.query {
            request = request.param("q", query);
        }
        self.fetch(request).await
    }
}

fn set_param(params: &mut Vec<(String, String)>, key: &str, value: String) {
    match params.iter_mut().find(|(existing, _)| existing == key) {
        Some(entry) => entry.1 = value,
        None => params.push((key.to_string(), value)),
    }
}

/// Fails when the response carries an error envelope.
fn check_envelope(response: Value) -> Result<Value> {
    let Some(error) = response.get("error") else {
        return Ok(response);
    };
    let message = error
        .pointer("/errors/0/message")
        .and_then(Value::as_str)
        .map(|message| format!("upstream said: {message}"))
        .unwrap_or_else(|| "unexpected error envelope".to_string());
    Err(CatalogError::RemoteApi(message))
}

fn take_items(response: &mut Value) -> Result<Vec<Value>> {
    match response.get_mut("items").map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(CatalogError::RemoteApi(format!(
            "`items` is not a list: {other}"
        ))),
    }
}

fn take_next_token(response: &mut Value) -> Option<String> {
    match response.get_mut("nextPageToken").map(Value::take) {
        Some(Value::String(token)) if !token.is_empty() => Some(token),
        _ => None,
    }
}
