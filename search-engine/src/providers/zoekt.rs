//! Zoekt-style literal sidecar adapter.
//!
//! - `POST {url}/api/search`: substring search with `num`/`offset`
//! - `GET {url}/api/file`: whole file, for snippets
//! - `GET {url}/healthz`: liveness
//!
//! Snippets are cut from the whole document when it is available (inline
//! `Content` or `/api/file`), so math regions that run past the sidecar's
//! context lines stay intact. Otherwise `Before` + `Line` + `After` is used.
//!
//! The sidecar has no regex and no structured filters. Its native position is
//! an offset, optionally accompanied by an opaque `NextCursor`; both travel
//! inside the continuation string as `"{offset}"` or `"{offset}:{cursor}"`.

use std::ops::Range;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    config::ZoektConfig,
    error_handler::{ConfigError, ProviderError},
    pagination::{Continuation, PaginationKind},
    providers::{ProviderCapabilities, RawHit, RawPage, SearchProvider, status_error},
    query::{SearchMode, SearchQuery},
    snippets::{Needle, excerpt, mark_spans},
};

const CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    supports_regex: false,
    supports_filters: false,
    pagination_kind: PaginationKind::Cursor,
    exact_totals: false,
};

#[derive(Debug, Clone)]
pub struct ZoektProvider {
    client: reqwest::Client,
    cfg: ZoektConfig,
    base: String,
    url_search: String,
    url_file: String,
    url_health: String,
}

impl ZoektProvider {
    /// # Errors
    /// [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(cfg: ZoektConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .gzip(true)
            .build()?;
        let base = cfg.url.trim().trim_end_matches('/').to_string();
        let url_search = format!("{}/api/search", base);
        let url_file = format!("{}/api/file", base);
        let url_health = format!("{}/healthz", base);
        Ok(Self {
            client,
            cfg,
            base,
            url_search,
            url_file,
            url_health,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    #[instrument(skip_all)]
    pub async fn ping(&self) -> Result<(), ProviderError> {
        debug!("GET {}", self.url_health);
        let resp = self.client.get(&self.url_health).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &self.url_health).await);
        }
        Ok(())
    }

    /// Loads `/api/file` for files on this page that came without `Content`.
    /// A failed fetch leaves the file on the line-context path.
    async fn attach_contents(&self, resp: &mut SidecarResponse, limit: usize) {
        let mut remaining = limit;
        for file in resp.file_matches.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            remaining = remaining.saturating_sub(file.line_matches.as_ref().map_or(0, Vec::len));
            if file.content.is_some() {
                continue;
            }
            let (Some(repo), Some(name)) = (file.repository.as_deref(), file.file_name.as_deref())
            else {
                continue;
            };
            if repo.is_empty() || name.is_empty() {
                continue;
            }
            match self.fetch_file(repo, name).await {
                Ok(text) => file.content = Some(text),
                Err(err) => warn!(%err, file = name, "file fetch failed; using line context"),
            }
        }
    }

    #[instrument(skip_all, fields(file = name))]
    async fn fetch_file(&self, repo: &str, name: &str) -> Result<String, ProviderError> {
        debug!("GET {}", self.url_file);
        let resp = self
            .client
            .get(&self.url_file)
            .query(&[("Repository", repo), ("File", name)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &self.url_file).await);
        }
        Ok(resp.text().await?)
    }
}

impl SearchProvider for ZoektProvider {
    fn name(&self) -> &'static str {
        "zoekt"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        CAPABILITIES
    }

    #[instrument(skip_all, fields(size = query.page_size))]
    async fn execute(
        &self,
        query: &SearchQuery,
        from: &Continuation,
    ) -> Result<RawPage, ProviderError> {
        if query.mode == SearchMode::Regex {
            return Err(ProviderError::UnsupportedMode);
        }
        if let Some(key) = query.filters.keys().next() {
            return Err(ProviderError::UnsupportedFilter(key.clone()));
        }

        let position = Position::resolve(from, query.page_size)?;
        let body = build_search_body(query, &position, self.cfg.context_lines);

        debug!(offset = position.offset, "POST {}", self.url_search);
        let resp = self.client.post(&self.url_search).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &self.url_search).await);
        }

        let mut parsed: SidecarResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("sidecar response: {e}")))?;

        if self.cfg.fetch_content {
            self.attach_contents(&mut parsed, query.page_size as usize).await;
        }

        Ok(into_raw_page(
            parsed,
            &query.text,
            &position,
            query.page_size,
            self.cfg.context_lines,
        ))
    }
}

/* ------------------------------------------------------------------------- */
/* Position                                                                  */
/* ------------------------------------------------------------------------- */

/// Where a sidecar page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    offset: u64,
    cursor: Option<String>,
}

impl Position {
    fn resolve(from: &Continuation, size: u32) -> Result<Self, ProviderError> {
        match from {
            Continuation::Page(page) => Ok(Self {
                offset: u64::from(page.saturating_sub(1)) * u64::from(size),
                cursor: None,
            }),
            Continuation::Cursor(raw) if raw.is_empty() => Ok(Self {
                offset: 0,
                cursor: None,
            }),
            Continuation::Cursor(raw) => {
                let (offset, cursor) = match raw.split_once(':') {
                    Some((offset, cursor)) => (offset, Some(cursor.to_string())),
                    None => (raw.as_str(), None),
                };
                let offset = offset.parse::<u64>().map_err(|_| {
                    ProviderError::InvalidContinuation(format!("bad sidecar offset `{offset}`"))
                })?;
                Ok(Self { offset, cursor })
            }
        }
    }

    fn encode(&self) -> String {
        match &self.cursor {
            Some(cursor) => format!("{}:{}", self.offset, cursor),
            None => self.offset.to_string(),
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Request body                                                              */
/* ------------------------------------------------------------------------- */

fn build_search_body(query: &SearchQuery, position: &Position, context_lines: usize) -> Value {
    let mut body = json!({
        "query": {
            "type": "substring",
            "pattern": query.text,
            "caseSensitive": true,
        },
        "num": query.page_size,
        "offset": position.offset,
        "contextLines": context_lines,
    });
    if let Some(cursor) = &position.cursor {
        body["cursor"] = Value::from(cursor.as_str());
    }
    body
}

/* ------------------------------------------------------------------------- */
/* Response                                                                  */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SidecarResponse {
    stats: Option<Stats>,
    file_matches: Option<Vec<FileMatch>>,
    next_cursor: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Stats {
    match_count: Option<u64>,
    file_count: Option<u64>,
    /// Seconds.
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FileMatch {
    file_name: Option<String>,
    repository: Option<String>,
    checksum: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    /// Whole file, when the sidecar inlines it.
    content: Option<String>,
    line_matches: Option<Vec<LineMatch>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LineMatch {
    line: Option<String>,
    line_number: Option<u32>,
    before: Option<String>,
    after: Option<String>,
    line_fragments: Option<Vec<LineFragment>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LineFragment {
    line_offset: usize,
    match_length: usize,
}

fn into_raw_page(
    resp: SidecarResponse,
    needle: &str,
    position: &Position,
    size: u32,
    context_lines: usize,
) -> RawPage {
    let limit = size as usize;
    let mut hits = Vec::new();

    'files: for file in resp.file_matches.unwrap_or_default() {
        let path = file.file_name.unwrap_or_default();
        let document_id = document_id(file.checksum, file.repository.as_deref(), &path);
        let url = file.url.filter(|u| !u.is_empty());
        let content = file.content;

        for line in file.line_matches.unwrap_or_default() {
            if hits.len() >= limit {
                break 'files;
            }
            let (raw_snippet, line_number) = content
                .as_deref()
                .and_then(|doc| document_snippet(doc, &line, needle, context_lines))
                .unwrap_or_else(|| {
                    (
                        line_snippet(&line, needle),
                        line.line_number.filter(|&n| n > 0).unwrap_or(1),
                    )
                });
            hits.push(RawHit {
                document_id: document_id.clone(),
                path: path.clone(),
                line_number,
                raw_snippet,
                external_url: url.clone(),
            });
        }
    }

    let stats = resp.stats.unwrap_or_default();
    let total = stats
        .match_count
        .filter(|&n| n > 0)
        .or(stats.file_count.filter(|&n| n > 0))
        .unwrap_or(hits.len() as u64);
    let took_ms = stats
        .duration
        .or(resp.duration)
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|secs| (secs * 1000.0) as u64);

    let next_offset = position.offset + u64::from(size);
    let next = match resp.next_cursor.filter(|c| !c.is_empty()) {
        Some(cursor) => Some(Position {
            offset: next_offset,
            cursor: Some(cursor),
        }),
        None if next_offset < total && hits.len() == limit => Some(Position {
            offset: next_offset,
            cursor: None,
        }),
        None => None,
    }
    .map(|p| Continuation::Cursor(p.encode()));

    RawPage {
        hits,
        total,
        total_is_approximate: true,
        next,
        took_ms,
        page: u32::try_from(position.offset / u64::from(size.max(1)) + 1).unwrap_or(u32::MAX),
    }
}

fn document_id(checksum: Option<String>, repository: Option<&str>, path: &str) -> String {
    match (checksum.filter(|c| !c.is_empty()), repository) {
        (Some(checksum), _) => checksum,
        (None, Some(repo)) if !repo.is_empty() => format!("{repo}:{path}"),
        _ => path.to_string(),
    }
}

/// Marks the match on line `LineNumber` of the whole document and cuts a
/// math-aware excerpt around it. `None` when the line cannot be found or has
/// no match.
fn document_snippet(
    content: &str,
    line: &LineMatch,
    needle: &str,
    context_lines: usize,
) -> Option<(String, u32)> {
    let number = line.line_number.filter(|&n| n > 0)? as usize;
    let start = match number {
        1 => 0,
        n => content.match_indices('\n').nth(n - 2)?.0 + 1,
    };
    let end = content[start..]
        .find('\n')
        .map_or(content.len(), |at| start + at);
    let text = &content[start..end];

    let spans = if text == preview(line) {
        line_spans(line, text, needle)
    } else {
        Needle::literal(needle).spans(text)
    };
    if spans.is_empty() {
        return None;
    }

    let shifted = spans.into_iter().map(|r| start + r.start..start + r.end);
    let marked = mark_spans(content, shifted);
    let ex = excerpt(&marked, context_lines).ok()?;
    Some((ex.raw_snippet, ex.line_number))
}

/// `Before` + marked `Line` + `After`.
fn line_snippet(line: &LineMatch, needle: &str) -> String {
    let text = preview(line);
    let spans = line_spans(line, text, needle);

    let mut out = String::new();
    if let Some(before) = line.before.as_deref().filter(|b| !b.is_empty()) {
        out.push_str(before);
        if !before.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(&mark_spans(text, spans));
    if let Some(after) = line.after.as_deref().filter(|a| !a.is_empty()) {
        if !after.starts_with('\n') {
            out.push('\n');
        }
        out.push_str(after.strip_suffix('\n').unwrap_or(after));
    }
    out
}

fn preview(line: &LineMatch) -> &str {
    let text = line.line.as_deref().unwrap_or_default();
    text.strip_suffix('\n').unwrap_or(text)
}

/// Match ranges within the line: the sidecar's fragments, or the needle's
/// occurrences when there are none.
fn line_spans(line: &LineMatch, text: &str, needle: &str) -> Vec<Range<usize>> {
    match &line.line_fragments {
        Some(fragments) if !fragments.is_empty() => fragments
            .iter()
            .map(|f| f.line_offset..f.line_offset + f.match_length)
            .filter(|r| text.get(r.clone()).is_some())
            .collect(),
        _ => Needle::literal(needle).spans(text),
    }
}
