// src/services/paginate.rs

//! Paginated fetcher: drives the request engine over pages 1, 2, 3, ...
//! of one listing until it runs dry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Value};

use super::request::{RequestEngine, RetryPolicy};
use super::signature::Signer;
use super::transport::ApiRequest;
use crate::error::FetchError;
use crate::models::{PauseRange, extract_items};

/// Why a sweep stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// A page came back with an empty list.
    Exhausted,
    /// A page parsed but held no list where any known shape puts it.
    PartialData,
    /// The request engine gave up on a page.
    Failed(FetchError),
    /// The page ceiling was reached.
    Ceiling,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("exhausted"),
            Self::PartialData => f.write_str("partial data"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Ceiling => f.write_str("page ceiling reached"),
        }
    }
}

/// How page parameters travel to upstream.
#[derive(Debug, Clone)]
enum Encoding {
    /// POST with the parameters as a JSON body.
    JsonBody,
    /// GET with sorted query parameters plus a signature parameter.
    SignedQuery {
        signer: Option<Signer>,
        param: String,
    },
}

/// One paginated listing: endpoint plus the payload shapes to try.
#[derive(Debug, Clone)]
pub struct PageSource {
    name: String,
    url: String,
    encoding: Encoding,
    variants: Vec<Map<String, Value>>,
}

impl PageSource {
    /// A POST listing; `payload` must not carry `page`/`size`.
    pub fn post(name: impl Into<String>, url: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            encoding: Encoding::JsonBody,
            variants: vec![as_object(payload)],
        }
    }

    /// A signed GET listing. Without a signer the signature is sent empty.
    pub fn signed_get(
        name: impl Into<String>,
        url: impl Into<String>,
        params: Value,
        signer: Option<Signer>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            encoding: Encoding::SignedQuery {
                signer,
                param: param.into(),
            },
            variants: vec![as_object(params)],
        }
    }

    /// Add an alternate payload shape, tried when earlier ones yield nothing.
    pub fn or_variant(mut self, payload: Value) -> Self {
        self.variants.push(as_object(payload));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the request for `page` from payload `variant`.
    pub fn request(&self, variant: usize, page: u32, size: u32) -> ApiRequest {
        let mut payload = self.variants.get(variant).cloned().unwrap_or_default();
        payload.insert("page".to_string(), Value::from(page));
        payload.insert("size".to_string(), Value::from(size));

        match &self.encoding {
            Encoding::JsonBody => ApiRequest::post_json(&self.url, Value::Object(payload)),
            Encoding::SignedQuery { signer, param } => {
                let mut params: BTreeMap<String, String> = payload
                    .into_iter()
                    .map(|(k, v)| (k, query_value(v)))
                    .collect();
                params.remove(param);
                let signature = signer
                    .as_ref()
                    .map(|s| s.sign(&params))
                    .unwrap_or_default();
                ApiRequest::get(&self.url)
                    .with_query(params)
                    .with_query([(param.clone(), signature)])
            }
        }
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn query_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lazy, finite, non-restartable page iterator.
pub struct Paginator {
    engine: Arc<RequestEngine>,
    source: PageSource,
    page_size: u32,
    page_ceiling: u32,
    policy: RetryPolicy,
    pause: PauseRange,
    list_keys: Vec<String>,
    next: u32,
    termination: Option<Termination>,
}

impl Paginator {
    pub fn new(
        engine: Arc<RequestEngine>,
        source: PageSource,
        page_size: u32,
        page_ceiling: u32,
    ) -> Self {
        Self {
            engine,
            source,
            page_size,
            page_ceiling,
            policy: RetryPolicy::new(3, std::time::Duration::from_secs(2)),
            pause: PauseRange::millis(0, 0),
            list_keys: vec!["item".to_string(), "items".to_string()],
            next: 1,
            termination: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause between consecutive pages.
    pub fn with_pause(mut self, pause: PauseRange) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_list_keys(mut self, list_keys: Vec<String>) -> Self {
        self.list_keys = list_keys;
        self
    }

    /// Why the sweep stopped; `None` while pages remain.
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Pages fetched successfully so far.
    pub fn pages_fetched(&self) -> u32 {
        self.next - 1
    }

    /// Fetch the next non-empty page, or `None` once terminated.
    pub async fn next_page(&mut self) -> Option<Vec<Value>> {
        if self.termination.is_some() {
            return None;
        }
        if self.next > self.page_ceiling {
            log::info!(
                "{}: stopping at page ceiling {}",
                self.source.name,
                self.page_ceiling
            );
            self.termination = Some(Termination::Ceiling);
            return None;
        }
        if self.next > 1 {
            if let Err(e) = self.engine.pause(self.pause).await {
                self.termination = Some(Termination::Failed(e));
                return None;
            }
        }

        let page = self.next;
        match self.fetch(page).await {
            Ok(items) => {
                log::info!(
                    "{}: page {} returned {} items",
                    self.source.name,
                    page,
                    items.len()
                );
                self.next += 1;
                Some(items)
            }
            Err(termination) => {
                match &termination {
                    Termination::Failed(e) => {
                        log::warn!("{}: page {} failed: {}", self.source.name, page, e)
                    }
                    other => log::info!("{}: page {} {}", self.source.name, page, other),
                }
                self.termination = Some(termination);
                None
            }
        }
    }

    /// Try each payload variant in order; the first non-empty list wins.
    async fn fetch(&self, page: u32) -> Result<Vec<Value>, Termination> {
        let mut saw_empty = false;
        let mut saw_partial = false;
        let mut failure = None;

        for variant in 0..self.source.variants.len() {
            let request = self.source.request(variant, page, self.page_size);
            match self.engine.execute(&request, self.policy).await {
                Ok(body) => match extract_items(&body, &self.list_keys) {
                    Some(items) if !items.is_empty() => {
                        if variant > 0 {
                            log::debug!(
                                "{}: page {} served by payload variant {}",
                                self.source.name,
                                page,
                                variant + 1
                            );
                        }
                        return Ok(items);
                    }
                    Some(_) => saw_empty = true,
                    None => saw_partial = true,
                },
                Err(FetchError::Cancelled) => {
                    return Err(Termination::Failed(FetchError::Cancelled));
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        Err(if saw_empty {
            Termination::Exhausted
        } else if saw_partial {
            Termination::PartialData
        } else {
            match failure {
                Some(e) => Termination::Failed(e),
                None => Termination::Exhausted,
            }
        })
    }

    /// Drain every page into one list.
    pub async fn collect_all(mut self) -> Sweep {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            items.extend(page);
        }
        Sweep {
            pages: self.pages_fetched(),
            termination: self.termination.unwrap_or(Termination::Exhausted),
            items,
        }
    }

    /// Raw items, page after page, fetched only as the stream is polled.
    pub fn into_stream(self) -> impl Stream<Item = Value> {
        stream::unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Some((stream::iter(page), paginator))
        })
        .flatten()
    }
}

/// Result of a full sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    pub items: Vec<Value>,
    pub pages: u32,
    pub termination: Termination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Config, EmptyParams};
    use crate::services::replay::{Matcher, ReplayTransport, Reply};
    use serde_json::json;
    use std::time::Duration;

    const API: &str = "https://api.example/web/api/";

    fn engine(transport: &Arc<ReplayTransport>) -> Arc<RequestEngine> {
        let mut config = Config::default();
        config.backoff.jitter_ratio = 0.0;
        Arc::new(RequestEngine::new(Arc::clone(transport) as Arc<dyn crate::services::transport::Transport>, &config))
    }

    fn listing() -> PageSource {
        PageSource::post("schools", API, json!({"uri": "school/lists", "keyword": ""}))
    }

    fn page(n: usize) -> Reply {
        let items: Vec<Value> = (0..n).map(|i| json!({"school_id": i})).collect();
        Reply::json(json!({"code": "0000", "data": {"item": items}}))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_empty_page() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(Matcher::url("/web/api").param("page", 1), page(20))
            .add(Matcher::url("/web/api").param("page", 2), page(5))
            .add(Matcher::url("/web/api").param("page", 3), page(0));

        let sweep = Paginator::new(engine(&transport), listing(), 20, 200)
            .with_policy(policy())
            .collect_all()
            .await;

        assert_eq!(sweep.items.len(), 25);
        assert_eq!(sweep.pages, 2);
        assert_eq!(sweep.termination, Termination::Exhausted);
        assert_eq!(transport.count("/web/api"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_bounds_request_count() {
        let transport = Arc::new(ReplayTransport::new());
        transport.add(Matcher::url("/web/api"), page(3));

        let sweep = Paginator::new(engine(&transport), listing(), 3, 5)
            .with_policy(policy())
            .collect_all()
            .await;

        assert_eq!(sweep.termination, Termination::Ceiling);
        assert_eq!(sweep.items.len(), 15);
        assert_eq!(transport.count("/web/api"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn injects_page_and_size() {
        let transport = Arc::new(ReplayTransport::new());
        transport.add(Matcher::url("/web/api"), page(0));

        let mut paginator = Paginator::new(engine(&transport), listing(), 30, 10);
        assert!(paginator.next_page().await.is_none());

        let sent = transport.requests();
        let body = sent[0].body.as_ref().unwrap();
        assert_eq!(body["page"], 1);
        assert_eq!(body["size"], 30);
        assert_eq!(body["uri"], "school/lists");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_list_is_partial_data() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(Matcher::url("/web/api").param("page", 1), page(2))
            .add(
                Matcher::url("/web/api").param("page", 2),
                Reply::json(json!({"code": 0, "data": {"numFound": 40}})),
            );

        let sweep = Paginator::new(engine(&transport), listing(), 2, 200)
            .collect_all()
            .await;
        assert_eq!(sweep.items.len(), 2);
        assert_eq!(sweep.termination, Termination::PartialData);
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_alternate_list_shapes() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(
                Matcher::url("/web/api").param("page", 1),
                Reply::json(json!({"code": 0, "data": {"items": [{"id": 1}]}})),
            )
            .add(
                Matcher::url("/web/api").param("page", 2),
                Reply::json(json!({"code": 0, "data": [{"id": 2}]})),
            )
            .add(
                Matcher::url("/web/api").param("page", 3),
                Reply::json(json!([{"id": 3}])),
            )
            .add(
                Matcher::url("/web/api").param("page", 4),
                Reply::json(json!({"code": "0000", "data": "{\"item\": [{\"id\": 4}]}"})),
            )
            .add(Matcher::url("/web/api").param("page", 5), page(0));

        let items: Vec<Value> = Paginator::new(engine(&transport), listing(), 1, 200)
            .into_stream()
            .collect()
            .await;
        let ids: Vec<i64> = items.iter().filter_map(|i| i["id"].as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_terminates_sweep() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(Matcher::url("/web/api").param("page", 1), page(2))
            .add(
                Matcher::url("/web/api").param("page", 2),
                Reply::text(200, "<html>"),
            );

        let sweep = Paginator::new(engine(&transport), listing(), 2, 200)
            .collect_all()
            .await;
        assert_eq!(sweep.items.len(), 2);
        assert!(matches!(
            sweep.termination,
            Termination::Failed(FetchError::MalformedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn later_variant_serves_page() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(Matcher::url("/web/api").param("uri", "special/lists"), page(0))
            .add(
                Matcher::url("/web/api")
                    .param("uri", "special/page")
                    .param("page", 1),
                page(4),
            )
            .add(
                Matcher::url("/web/api")
                    .param("uri", "special/page")
                    .param("page", 2),
                page(0),
            );

        let source = PageSource::post("majors", API, json!({"uri": "special/lists"}))
            .or_variant(json!({"uri": "special/page"}));
        let sweep = Paginator::new(engine(&transport), source, 30, 200)
            .collect_all()
            .await;

        assert_eq!(sweep.items.len(), 4);
        assert_eq!(sweep.termination, Termination::Exhausted);
        // Page 1: two variants; page 2: both variants come back empty.
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_pages_only() {
        let transport = Arc::new(ReplayTransport::new());
        transport
            .add(Matcher::url("/web/api").param("page", 1), page(1))
            .add(Matcher::url("/web/api").param("page", 2), page(0));

        let start = tokio::time::Instant::now();
        Paginator::new(engine(&transport), listing(), 1, 200)
            .with_pause(PauseRange::millis(1000, 1000))
            .collect_all()
            .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[test]
    fn signed_query_appends_signature_last() {
        let signer = Signer::new("s3cret", "api-gaokao.zjzw.cn/apidata/web?", EmptyParams::Include)
            .unwrap();
        let source = PageSource::signed_get(
            "enhanced",
            "https://enhanced.example/apidata/web",
            json!({"keyword": "", "uri": "v1/school/lists", "signsafe": ""}),
            Some(signer.clone()),
            "signsafe",
        );

        let request = source.request(0, 1, 20);
        let keys: Vec<&str> = request.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["keyword", "page", "size", "uri", "signsafe"]);

        let expected: BTreeMap<String, String> = [
            ("keyword", ""),
            ("page", "1"),
            ("size", "20"),
            ("uri", "v1/school/lists"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(request.param("signsafe"), Some(signer.sign(&expected)));
    }

    #[test]
    fn unsigned_query_sends_empty_signature() {
        let source = PageSource::signed_get(
            "enhanced",
            "https://enhanced.example/apidata/web",
            json!({"uri": "v1/school/lists"}),
            None,
            "signsafe",
        );
        assert_eq!(source.request(0, 2, 20).param("signsafe"), Some(String::new()));
    }
}
