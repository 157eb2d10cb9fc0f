//! OpenSearch adapter.
//!
//! - `POST {host}/{index}/_search`: one page per call (`from`/`size`)
//! - `GET {host}/_cluster/health`: liveness
//!
//! Literal queries become a phrase/term clause over `content` and `commands`.
//! Regex queries are rewritten into a term-level `regexp` clause, or into an
//! ngram prefilter when the pattern has no term-level form. Highlighting is
//! requested on the whole `content` field with the engine's marker sentinels,
//! and the adapter cuts an excerpt around the first match.
//!
//! Hits that matched through `commands` or the ngram prefilter carry no
//! `content` highlight. For those the adapter finds the match in the stored
//! `content` itself and drops the hit when there is none.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    config::OpenSearchConfig,
    error_handler::{ConfigError, ProviderError},
    pagination::{Continuation, PaginationKind},
    providers::{
        ProviderCapabilities, RawHit, RawPage, SearchProvider,
        lucene_regex::{ngram_prefilter, to_term_regexp},
        status_error,
    },
    query::{SearchMode, SearchQuery},
    snippets::{MARK_CLOSE, MARK_OPEN, Needle, excerpt, mark_spans},
};

/// `index.max_result_window` default: `from + size` may not exceed it.
pub const MAX_RESULT_WINDOW: u64 = 10_000;

/// Automaton size cap passed with every `regexp` clause.
const MAX_DETERMINIZED_STATES: u32 = 10_000;

const SOURCE_FIELDS: [&str; 4] = ["file_id", "path", "url", "content"];

const CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    supports_regex: true,
    supports_filters: true,
    pagination_kind: PaginationKind::PageNumber,
    exact_totals: true,
};

#[derive(Debug, Clone)]
pub struct OpenSearchProvider {
    client: reqwest::Client,
    cfg: OpenSearchConfig,
    base: String,
    url_search: String,
    url_health: String,
}

impl OpenSearchProvider {
    /// # Errors
    /// [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(cfg: OpenSearchConfig) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder().timeout(cfg.timeout).gzip(true);
        if cfg.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        let base = cfg.host.trim().trim_end_matches('/').to_string();
        let url_search = format!("{}/{}/_search", base, cfg.index);
        let url_health = format!("{}/_cluster/health", base);

        Ok(Self {
            client,
            cfg,
            base,
            url_search,
            url_health,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.username {
            Some(user) => req.basic_auth(user, self.cfg.password.as_deref()),
            None => req,
        }
    }

    /// `GET /_cluster/health`; any 2xx counts as alive.
    #[instrument(skip_all)]
    pub async fn ping(&self) -> Result<(), ProviderError> {
        debug!("GET {}", self.url_health);
        let resp = self
            .authorized(self.client.get(&self.url_health))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &self.url_health).await);
        }
        Ok(())
    }
}

impl SearchProvider for OpenSearchProvider {
    fn name(&self) -> &'static str {
        "opensearch"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        CAPABILITIES
    }

    fn max_result_window(&self) -> Option<u64> {
        Some(MAX_RESULT_WINDOW)
    }

    #[instrument(skip_all, fields(index = %self.cfg.index, mode = query.mode.as_str()))]
    async fn execute(
        &self,
        query: &SearchQuery,
        from: &Continuation,
    ) -> Result<RawPage, ProviderError> {
        let page = match from {
            Continuation::Page(page) if *page >= 1 => *page,
            other => {
                return Err(ProviderError::InvalidContinuation(format!(
                    "expected a page number, got {other:?}"
                )));
            }
        };

        let body = build_search_body(query, page);
        debug!("POST {}", self.url_search);
        let resp = self
            .authorized(self.client.post(&self.url_search))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp, &self.url_search).await);
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("search response: {e}")))?;

        let needle = Needle::for_query(query);
        Ok(into_raw_page(
            parsed,
            page,
            query.page_size,
            self.cfg.snippet_lines,
            needle.as_ref(),
        ))
    }
}

/* ------------------------------------------------------------------------- */
/* Request body                                                              */
/* ------------------------------------------------------------------------- */

/// Full `_search` body for one page of `query`.
pub fn build_search_body(query: &SearchQuery, page: u32) -> Value {
    let size = u64::from(query.page_size);
    let from = u64::from(page.saturating_sub(1)) * size;
    let clause = match query.mode {
        SearchMode::Literal => literal_clause(&query.text),
        SearchMode::Regex => regex_clause(&query.text),
    };

    json!({
        "from": from,
        "size": size,
        "track_total_hits": true,
        "_source": SOURCE_FIELDS,
        "query": {
            "bool": {
                "must": [clause],
                "filter": filter_clauses(&query.filters),
            }
        },
        "highlight": highlight_definition(),
    })
}

/// Matches the literal in `content` (as typed and with the leading backslash
/// toggled) or as a macro name in `commands`.
fn literal_clause(literal: &str) -> Value {
    let norm = literal.strip_prefix('\\').unwrap_or(literal);
    let toggled = if literal.starts_with('\\') {
        norm.to_string()
    } else {
        format!("\\{norm}")
    };

    let mut should = vec![json!({ "match_phrase": { "content": { "query": literal } } })];
    if toggled != literal {
        should.push(json!({ "match_phrase": { "content": { "query": toggled } } }));
    }
    should.push(json!({ "term": { "commands": norm } }));
    should.push(json!({
        "match": { "commands.prefix": { "query": norm, "operator": "and" } }
    }));

    json!({ "bool": { "should": should, "minimum_should_match": 1 } })
}

fn regex_clause(pattern: &str) -> Value {
    match to_term_regexp(pattern) {
        Ok(value) => json!({
            "regexp": {
                "content": {
                    "value": value,
                    "flags": "NONE",
                    "max_determinized_states": MAX_DETERMINIZED_STATES,
                }
            }
        }),
        Err(reason) => {
            debug!(%reason, "regex has no term-level form; using ngram prefilter");
            ngram_prefilter(pattern)
        }
    }
}

/// Exact-match `term` filters; numeric values (e.g. `year`) stay numeric.
fn filter_clauses(filters: &BTreeMap<String, String>) -> Vec<Value> {
    filters
        .iter()
        .map(|(key, value)| {
            let value = value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(value.as_str()));
            json!({ "term": { key: value } })
        })
        .collect()
}

fn highlight_definition() -> Value {
    json!({
        "pre_tags": [MARK_OPEN.to_string()],
        "post_tags": [MARK_CLOSE.to_string()],
        "fields": {
            "content": { "type": "fvh", "number_of_fragments": 0 }
        }
    })
}

/* ------------------------------------------------------------------------- */
/* Response                                                                  */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: Option<u64>,
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Object {
        value: u64,
        #[serde(default)]
        relation: Option<String>,
    },
    Count(u64),
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_source", default)]
    source: HitSource,
    #[serde(default)]
    highlight: Option<Highlight>,
}

#[derive(Debug, Default, Deserialize)]
struct HitSource {
    file_id: Option<String>,
    path: Option<String>,
    url: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Highlight {
    #[serde(default)]
    content: Vec<String>,
}

fn into_raw_page(
    resp: SearchResponse,
    page: u32,
    size: u32,
    snippet_lines: usize,
    needle: Option<&Needle>,
) -> RawPage {
    let (total, total_is_approximate) = match resp.hits.total {
        Some(TotalHits::Object { value, relation }) => (value, relation.as_deref() == Some("gte")),
        Some(TotalHits::Count(value)) => (value, false),
        None => (resp.hits.hits.len() as u64, true),
    };

    let returned = resp.hits.hits.len();
    let hits: Vec<RawHit> = resp
        .hits
        .hits
        .into_iter()
        .filter_map(|hit| into_raw_hit(hit, snippet_lines, needle))
        .collect();
    if hits.len() < returned {
        debug!(dropped = returned - hits.len(), "hits without a local match dropped");
    }

    let size = u64::from(size);
    let seen = u64::from(page) * size;
    let next = (seen < total && seen + size <= MAX_RESULT_WINDOW && returned > 0)
        .then(|| Continuation::Page(page + 1));

    RawPage {
        hits,
        total,
        total_is_approximate,
        next,
        took_ms: resp.took,
        page,
    }
}

/// `None` when the hit has no highlight and its stored content has no match.
fn into_raw_hit(hit: Hit, snippet_lines: usize, needle: Option<&Needle>) -> Option<RawHit> {
    let highlighted = hit
        .highlight
        .and_then(|h| h.content.into_iter().next())
        .filter(|h| !h.is_empty());

    let marked = match (highlighted, hit.source.content, needle) {
        (Some(highlighted), _, _) => Some(highlighted),
        (None, Some(content), Some(needle)) => {
            let spans = needle.spans(&content);
            if spans.is_empty() {
                debug!(id = %hit.id, "no local match in stored content");
                return None;
            }
            Some(mark_spans(&content, spans))
        }
        _ => None,
    };

    let (raw_snippet, line_number) = match marked {
        None => (String::new(), 1),
        Some(marked) => match excerpt(&marked, snippet_lines) {
            Ok(ex) => (ex.raw_snippet, ex.line_number),
            Err(err) => {
                warn!(id = %hit.id, %err, "highlight markers malformed; passing fragment through");
                (marked, 1)
            }
        },
    };

    Some(RawHit {
        document_id: hit.source.file_id.unwrap_or(hit.id),
        path: hit.source.path.unwrap_or_default(),
        line_number,
        raw_snippet,
        external_url: hit.source.url.filter(|u| !u.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippets::mark;

    fn query(mode: SearchMode, text: &str) -> SearchQuery {
        match mode {
            SearchMode::Literal => SearchQuery::literal(text, 20),
            SearchMode::Regex => SearchQuery::regex(text, 20),
        }
    }

    fn parse(v: Value) -> SearchResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn literal_body_toggles_leading_backslash() {
        let body = build_search_body(&query(SearchMode::Literal, r"\frac"), 3);
        assert_eq!(body["from"], 40);
        assert_eq!(body["size"], 20);
        assert_eq!(body["track_total_hits"], true);

        let should = &body["query"]["bool"]["must"][0]["bool"]["should"];
        assert_eq!(should[0]["match_phrase"]["content"]["query"], r"\frac");
        assert_eq!(should[1]["match_phrase"]["content"]["query"], "frac");
        assert_eq!(should[2]["term"]["commands"], "frac");
        assert_eq!(should[3]["match"]["commands.prefix"]["operator"], "and");
        assert_eq!(
            body["query"]["bool"]["must"][0]["bool"]["minimum_should_match"],
            1
        );
    }

    #[test]
    fn regex_body_uses_term_level_regexp() {
        let body = build_search_body(&query(SearchMode::Regex, r"\\sec.*"), 1);
        let re = &body["query"]["bool"]["must"][0]["regexp"]["content"];
        assert_eq!(re["value"], r".*(\\sec.*).*");
        assert_eq!(re["flags"], "NONE");
        assert_eq!(re["max_determinized_states"], MAX_DETERMINIZED_STATES);
        assert_eq!(body["from"], 0);
        assert_eq!(body["_source"], json!(["file_id", "path", "url", "content"]));
    }

    #[test]
    fn regex_without_term_form_uses_ngram_prefilter() {
        let body = build_search_body(&query(SearchMode::Regex, r"\\frac\{1\} \d"), 1);
        let must = &body["query"]["bool"]["must"][0];
        assert!(must.get("regexp").is_none());
        assert_eq!(
            must["bool"]["must"][0]["term"]["content.ngram"],
            r"\frac{1}"
        );
    }

    #[test]
    fn filters_and_highlight_are_requested() {
        let mut q = query(SearchMode::Literal, "lemma");
        q.filters.insert("year".into(), "2021".into());
        q.filters.insert("source".into(), "arxiv".into());
        let body = build_search_body(&q, 1);

        let filters = body["query"]["bool"]["filter"].as_array().unwrap();
        assert!(filters.contains(&json!({ "term": { "year": 2021 } })));
        assert!(filters.contains(&json!({ "term": { "source": "arxiv" } })));

        let hl = &body["highlight"];
        assert_eq!(hl["pre_tags"][0], MARK_OPEN.to_string());
        assert_eq!(hl["post_tags"][0], MARK_CLOSE.to_string());
        assert_eq!(hl["fields"]["content"]["number_of_fragments"], 0);
    }

    #[test]
    fn response_maps_hits_and_next_page() {
        let content = format!("l1\nl2\nsee {} here\nl4", mark("lemma"));
        let resp = parse(json!({
            "took": 7,
            "hits": {
                "total": { "value": 45, "relation": "eq" },
                "hits": [
                    {
                        "_id": "doc-1",
                        "_source": { "file_id": "f1", "path": "a/b.tex", "url": "https://x/1" },
                        "highlight": { "content": [content] }
                    },
                    { "_id": "doc-2", "_source": { "path": "c.tex", "url": "" } }
                ]
            }
        }));
        let page = into_raw_page(resp, 1, 20, 1, None);

        assert_eq!(page.total, 45);
        assert!(!page.total_is_approximate);
        assert_eq!(page.took_ms, Some(7));
        assert_eq!(page.next, Some(Continuation::Page(2)));

        assert_eq!(page.hits[0].document_id, "f1");
        assert_eq!(page.hits[0].line_number, 3);
        assert_eq!(
            page.hits[0].raw_snippet,
            format!("l2\nsee {} here\nl4", mark("lemma"))
        );
        assert_eq!(page.hits[0].external_url.as_deref(), Some("https://x/1"));

        assert_eq!(page.hits[1].document_id, "doc-2");
        assert_eq!(page.hits[1].raw_snippet, "");
        assert_eq!(page.hits[1].line_number, 1);
        assert_eq!(page.hits[1].external_url, None);
    }

    #[test]
    fn last_page_and_lower_bound_totals() {
        let resp = parse(json!({
            "hits": { "total": { "value": 45, "relation": "gte" }, "hits": [ { "_id": "x" } ] }
        }));
        let page = into_raw_page(resp, 3, 20, 8, None);
        assert!(page.total_is_approximate);
        assert_eq!(page.next, None);
    }

    #[test]
    fn next_page_stops_at_result_window() {
        let resp = parse(json!({
            "hits": { "total": 50_000, "hits": [ { "_id": "x" } ] }
        }));
        let page = into_raw_page(resp, 100, 100, 8, None);
        assert_eq!(page.next, None);
    }

    #[test]
    fn unhighlighted_hit_is_located_in_stored_content() {
        let resp = parse(json!({
            "hits": {
                "total": { "value": 2, "relation": "eq" },
                "hits": [{
                    "_id": "d1",
                    "_source": { "path": "p.tex", "content": "a\nb\nwe use $\\frac{1}{2}$ here\nc" }
                }]
            }
        }));
        let needle = Needle::literal("frac");
        let page = into_raw_page(resp, 1, 20, 0, Some(&needle));

        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].line_number, 3);
        assert_eq!(
            page.hits[0].raw_snippet,
            format!("we use $\\{}{{1}}{{2}}$ here", mark("frac"))
        );
    }

    #[test]
    fn hit_without_any_match_is_dropped_but_paging_continues() {
        let resp = parse(json!({
            "hits": {
                "total": { "value": 45, "relation": "eq" },
                "hits": [
                    { "_id": "miss", "_source": { "content": "nothing relevant" } },
                    { "_id": "hit", "_source": { "content": "x lemma y" } }
                ]
            }
        }));
        let needle = Needle::pattern("lem+a").unwrap();
        let page = into_raw_page(resp, 1, 20, 8, Some(&needle));

        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].document_id, "hit");
        assert_eq!(page.hits[0].raw_snippet, format!("x {} y", mark("lemma")));
        assert_eq!(page.next, Some(Continuation::Page(2)));
    }

    #[tokio::test]
    async fn cursor_continuation_is_refused() {
        let provider =
            OpenSearchProvider::new(OpenSearchConfig::new("http://127.0.0.1:9", "tex")).unwrap();
        let err = provider
            .execute(
                &query(SearchMode::Literal, "x"),
                &Continuation::Cursor("abc".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidContinuation(_)));
    }
}
