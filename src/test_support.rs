//! In-memory fakes shared by unit tests.
use crate::api::{ApiFailure, ApiReply, AppStoreApi};
use crate::poller::Clock;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub(crate) method: &'static str,
    pub(crate) path: String,
    pub(crate) body: Option<Value>,
}

struct Route<T> {
    prefix: String,
    replies: VecDeque<T>,
}

/// Fake API answering by path prefix.
///
/// Each route replays its queued replies in order and then keeps repeating
/// the last one. GETs without a route fail; writes without a route succeed
/// with an empty body.
pub(crate) struct ScriptedApi {
    gets: RefCell<Vec<Route<Option<Value>>>>,
    posts: RefCell<Vec<Route<ApiReply>>>,
    patches: RefCell<Vec<Route<ApiReply>>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self {
            gets: RefCell::new(Vec::new()),
            posts: RefCell::new(Vec::new()),
            patches: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn on_get(&self, prefix: &str, doc: Value) {
        push_reply(&self.gets, prefix, Some(doc));
    }

    pub(crate) fn on_get_failure(&self, prefix: &str) {
        push_reply(&self.gets, prefix, None);
    }

    pub(crate) fn on_post(&self, prefix: &str, reply: ApiReply) {
        push_reply(&self.posts, prefix, reply);
    }

    pub(crate) fn on_patch(&self, prefix: &str, reply: ApiReply) {
        push_reply(&self.patches, prefix, reply);
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub(crate) fn requested_paths(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|call| call.path.clone())
            .collect()
    }

    pub(crate) fn writes_to(&self, prefix: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.method != "GET" && call.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, method: &'static str, path: &str, body: Option<&Value>) {
        self.calls.borrow_mut().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
    }
}

fn push_reply<T>(routes: &RefCell<Vec<Route<T>>>, prefix: &str, reply: T) {
    let mut routes = routes.borrow_mut();
    match routes.iter_mut().find(|route| route.prefix == prefix) {
        Some(route) => route.replies.push_back(reply),
        None => routes.push(Route {
            prefix: prefix.to_string(),
            replies: VecDeque::from([reply]),
        }),
    }
}

fn next_reply<T: Clone>(routes: &RefCell<Vec<Route<T>>>, path: &str) -> Option<T> {
    let mut routes = routes.borrow_mut();
    let route = routes
        .iter_mut()
        .find(|route| path.starts_with(&route.prefix))?;
    if route.replies.len() > 1 {
        route.replies.pop_front()
    } else {
        route.replies.front().cloned()
    }
}

impl AppStoreApi for ScriptedApi {
    fn get(&self, path: &str) -> Option<Value> {
        self.record("GET", path, None);
        next_reply(&self.gets, path).flatten()
    }

    fn post(&self, path: &str, body: &Value) -> ApiReply {
        self.record("POST", path, Some(body));
        next_reply(&self.posts, path).unwrap_or(Ok(None))
    }

    fn patch(&self, path: &str, body: &Value) -> ApiReply {
        self.record("PATCH", path, Some(body));
        next_reply(&self.patches, path).unwrap_or(Ok(None))
    }
}

pub(crate) fn http_failure(status: u16, body: &str) -> ApiReply {
    Err(ApiFailure {
        status: Some(status),
        body: body.to_string(),
    })
}

/// Simulated clock: `sleep` advances time instantly.
pub(crate) struct FakeClock {
    origin: Instant,
    elapsed: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

pub(crate) fn build_json(
    id: &str,
    version: &str,
    platform: &str,
    state: &str,
    uses_non_exempt_encryption: Option<bool>,
) -> Value {
    json!({
        "type": "builds",
        "id": id,
        "attributes": {
            "version": version,
            "platform": platform,
            "processingState": state,
            "usesNonExemptEncryption": uses_non_exempt_encryption,
        }
    })
}

pub(crate) fn builds_doc(builds: Vec<Value>) -> Value {
    json!({ "data": builds })
}

pub(crate) fn groups_doc(groups: &[(&str, &str, bool)]) -> Value {
    let data: Vec<Value> = groups
        .iter()
        .map(|(id, name, public)| {
            json!({
                "type": "betaGroups",
                "id": id,
                "attributes": { "name": name, "publicLinkEnabled": public }
            })
        })
        .collect();
    json!({ "data": data })
}
