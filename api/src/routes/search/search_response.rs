use search_engine::{NormalizedHit, SearchResult, SnippetSegment, snippets::render_html};
use serde::Serialize;

/// Response payload for `POST /api/search`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<HitDto>,
    pub total: u64,
    pub total_is_approximate: bool,
    pub provider_latency_ms: u64,
    pub end_to_end_latency_ms: u64,
    pub page: u32,
    pub size: u32,
    /// `null` at the end of the results.
    pub next_cursor: Option<String>,
    pub degraded_hits: usize,
}

#[derive(Debug, Serialize)]
pub struct HitDto {
    pub file_id: String,
    pub path: String,
    pub line: u32,
    pub snippet_segments: Vec<SegmentDto>,
    /// Pre-rendered form for clients that do not consume segments.
    pub snippet_html: String,
    pub url: Option<String>,
    pub degraded: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SegmentDto {
    Text {
        text: String,
        marked: bool,
    },
    Math {
        /// Body with highlight directives, ready for the typesetter.
        tex: String,
        /// Original source including delimiters.
        source: String,
        display: bool,
        marked: bool,
    },
}

impl From<&SnippetSegment> for SegmentDto {
    fn from(segment: &SnippetSegment) -> Self {
        match segment {
            SnippetSegment::PlainUnmarked(text) => SegmentDto::Text {
                text: text.clone(),
                marked: false,
            },
            SnippetSegment::PlainMarked(text) => SegmentDto::Text {
                text: text.clone(),
                marked: true,
            },
            SnippetSegment::Math(math) => SegmentDto::Math {
                tex: math.tex(),
                source: math.source(),
                display: math.display(),
                marked: math.is_marked(),
            },
        }
    }
}

impl From<NormalizedHit> for HitDto {
    fn from(hit: NormalizedHit) -> Self {
        Self {
            snippet_segments: hit.snippet.iter().map(SegmentDto::from).collect(),
            snippet_html: render_html(&hit.snippet),
            file_id: hit.document_id,
            path: hit.path,
            line: hit.line_number,
            url: hit.external_url,
            degraded: hit.degraded,
        }
    }
}

impl From<SearchResult> for SearchResponse {
    fn from(result: SearchResult) -> Self {
        Self {
            hits: result.hits.into_iter().map(HitDto::from).collect(),
            total: result.total,
            total_is_approximate: result.total_is_approximate,
            provider_latency_ms: result.provider_latency_ms,
            end_to_end_latency_ms: result.end_to_end_latency_ms,
            page: result.page,
            size: result.size,
            next_cursor: result.next_token.map(|t| t.into_string()),
            degraded_hits: result.degraded_hits,
        }
    }
}
