//! In-memory catalog API used by the unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::Result;
use crate::remote::{QueryPairs, Transport};

/// One request as seen by the fake.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn ids(&self) -> Vec<String> {
        self.param("id")
            .map(|ids| ids.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }
}

type Handler = Box<dyn Fn(&RecordedCall) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct State {
    handlers: HashMap<String, Handler>,
    calls: Vec<RecordedCall>,
}

/// Answers each endpoint from a registered closure and records every call.
/// Clones share state, so a test keeps one clone to inspect the call log.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        self,
        endpoint: &str,
        handler: impl Fn(&RecordedCall) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.state
            .lock()
            .handlers
            .insert(endpoint.to_string(), Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl Transport for FakeTransport {
    fn get(&self, endpoint: &str, query: &QueryPairs) -> impl Future<Output = Result<Value>> + Send {
        let call = RecordedCall {
            endpoint: endpoint.to_string(),
            query: query.to_vec(),
        };
        let mut state = self.state.lock();
        let response = match state.handlers.get(endpoint) {
            Some(handler) => handler(&call),
            None => panic!("no fake handler registered for `{endpoint}`"),
        };
        state.calls.push(call);
        async move { response }
    }
}

pub(crate) fn video_item(id: &str, channel_id: &str, published_at: &str, category_id: &str) -> Value {
    json!({
        "id": id,
        "snippet": {
            "publishedAt": published_at,
            "channelId": channel_id,
            "channelTitle": format!("{channel_id} title"),
            "categoryId": category_id,
            "localized": {"title": format!("video {id}"), "description": ""}
        },
        "contentDetails": {"duration": "PT4M2S", "definition": "hd"},
        "statistics": {"viewCount": "10"},
        "status": {"uploadStatus": "processed"}
    })
}

pub(crate) fn channel_item(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "brandingSettings": {"image": {"bannerTvMediumImageUrl": format!("https://img/{id}.jpg")}},
        "contentDetails": {"relatedPlaylists": {"uploads": uploads_for(id)}},
        "snippet": {"localized": {"title": title, "description": format!("about {title}")}}
    })
}

/// `UCxyz` -> `UUxyz`, the way the catalog names uploads lists.
pub(crate) fn uploads_for(channel_id: &str) -> String {
    format!("UU{}", channel_id.trim_start_matches("UC"))
}

/// Serves `videos` requests from a fixed set of items, echoing only the
/// requested ids that exist.
pub(crate) fn serve_videos(items: Vec<Value>) -> impl Fn(&RecordedCall) -> Result<Value> + Send + Sync {
    move |call: &RecordedCall| {
        let found: Vec<&Value> = call
            .ids()
            .iter()
            .filter_map(|id| items.iter().find(|item| item["id"] == id.as_str()))
            .collect();
        Ok(json!({"items": found}))
    }
}

/// Serves `channels` requests by id or by `forUsername`.
pub(crate) fn serve_channels(
    items: Vec<Value>,
    usernames: Vec<(&'static str, &'static str)>,
) -> impl Fn(&RecordedCall) -> Result<Value> + Send + Sync {
    move |call: &RecordedCall| {
        let wanted: Vec<String> = match call.param("forUsername") {
            Some(name) => usernames
                .iter()
                .filter(|(username, _)| *username == name)
                .map(|(_, id)| id.to_string())
                .collect(),
            None => call.ids(),
        };
        let found: Vec<&Value> = wanted
            .iter()
            .filter_map(|id| items.iter().find(|item| item["id"] == id.as_str()))
            .collect();
        Ok(json!({"items": found}))
    }
}

pub(crate) fn serve_categories(
    categories: Vec<(&'static str, &'static str)>,
) -> impl Fn(&RecordedCall) -> Result<Value> + Send + Sync {
    move |_: &RecordedCall| {
        let items: Vec<Value> = categories
            .iter()
            .map(|(id, title)| json!({"id": id, "snippet": {"title": title}}))
            .collect();
        Ok(json!({"items": items}))
    }
}
