use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::config::HarvestSettings;
use crate::domain::{PageRequest, SourceRecord};
use crate::error::SeqError;

pub const URI_BINDING: &str = "uri";
pub const ELEMENTS_BINDING: &str = "elements";
pub const CREATED_BINDING: &str = "created";

/// Paginated query source. Pages must be ordered ascending by creation time
/// so that offsets stay stable while new records are appended upstream.
pub trait UpstreamSource: Send + Sync {
    /// Returns the raw SPARQL XML result document for one page.
    fn fetch_page(&self, request: PageRequest) -> Result<String, SeqError>;
}

/// Component definitions with their sequence elements, oldest first.
pub fn render_query(request: PageRequest) -> String {
    format!(
        r#"PREFIX dcterms: <http://purl.org/dc/terms/>
PREFIX sbol: <http://sbols.org/v2#>

SELECT
	?uri
	?elements
	?created
WHERE {{
	{{
		SELECT
			?uri
			?elements
			?created
		WHERE {{
			?uri a sbol:ComponentDefinition .
			?uri sbol:sequence ?sequenceUri .
			?sequenceUri sbol:elements ?elements .
			?uri dcterms:created ?created .
		}} ORDER BY ASC(str(?created))
	}}
}}
LIMIT {limit} OFFSET {offset}
"#,
        limit = request.limit,
        offset = request.offset,
    )
}

#[derive(Clone)]
pub struct SparqlHttpSource {
    client: Client,
    url: String,
    graph: String,
}

impl SparqlHttpSource {
    pub fn new(settings: &HarvestSettings) -> Result<Self, SeqError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqdedup/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SeqError::UpstreamUnavailable(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| SeqError::UpstreamUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            url: settings.upstream_url.clone(),
            graph: settings.graph.clone(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, SeqError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(status, attempt, "upstream returned retryable status");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(error = %err, attempt, "upstream request failed, retrying");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SeqError::UpstreamUnavailable(err.to_string()));
                }
            }
        }
    }
}

impl UpstreamSource for SparqlHttpSource {
    fn fetch_page(&self, request: PageRequest) -> Result<String, SeqError> {
        let query = render_query(request);
        debug!(limit = request.limit, offset = request.offset, url = %self.url, "querying upstream");
        let response = self.send_with_retries(|| {
            self.client
                .post(&self.url)
                .form(&[("query", query.as_str()), ("graph", self.graph.as_str())])
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "upstream request failed".to_string());
            return Err(SeqError::UpstreamStatus { status, message });
        }
        response
            .text()
            .map_err(|err| SeqError::UpstreamUnavailable(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Decodes a SPARQL XML result document into records, in document order.
///
/// A document that is not well-formed is an upstream failure; a result row
/// lacking `uri`, `elements` or `created` fails the whole page.
pub fn parse_results(xml: &str) -> Result<Vec<SourceRecord>, SeqError> {
    // No text trimming: sequence literals are hashed exactly as received.
    let mut reader = Reader::from_str(xml);

    let mut records = Vec::new();
    let mut saw_root = false;
    let mut row: Option<HashMap<String, String>> = None;
    let mut binding: Option<String> = None;
    let mut in_value = false;
    let mut value = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"sparql" => saw_root = true,
                b"result" => row = Some(HashMap::new()),
                b"binding" => binding = binding_name(e)?,
                b"uri" | b"literal" | b"bnode" => {
                    in_value = true;
                    value.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if matches!(e.name().as_ref(), b"literal" | b"uri")
                    && let (Some(bindings), Some(name)) = (row.as_mut(), binding.as_ref())
                {
                    bindings.insert(name.clone(), String::new());
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_value {
                    let text = e.unescape().map_err(|err| {
                        SeqError::UpstreamUnavailable(format!("invalid SPARQL XML text: {err}"))
                    })?;
                    value.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if in_value {
                    value.push_str(&String::from_utf8_lossy(&e[..]));
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"uri" | b"literal" | b"bnode" => {
                    in_value = false;
                    if let (Some(bindings), Some(name)) = (row.as_mut(), binding.as_ref()) {
                        bindings.insert(name.clone(), std::mem::take(&mut value));
                    }
                }
                b"binding" => binding = None,
                b"result" => {
                    if let Some(bindings) = row.take() {
                        records.push(record_from_bindings(records.len(), bindings)?);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(SeqError::UpstreamUnavailable(format!(
                    "invalid SPARQL XML at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(SeqError::UpstreamUnavailable(
            "response is not a SPARQL result document".to_string(),
        ));
    }
    Ok(records)
}

fn binding_name(element: &BytesStart<'_>) -> Result<Option<String>, SeqError> {
    let attr = element
        .try_get_attribute("name")
        .map_err(|err| SeqError::UpstreamUnavailable(format!("invalid binding: {err}")))?;
    match attr {
        Some(attr) => {
            let name = attr
                .unescape_value()
                .map_err(|err| SeqError::UpstreamUnavailable(format!("invalid binding: {err}")))?;
            Ok(Some(name.into_owned()))
        }
        None => Ok(None),
    }
}

fn record_from_bindings(
    position: usize,
    mut bindings: HashMap<String, String>,
) -> Result<SourceRecord, SeqError> {
    let mut required = |name: &str| {
        bindings.remove(name).ok_or_else(|| {
            SeqError::MalformedRecord(format!("result {position} is missing binding `{name}`"))
        })
    };
    let identifier = required(URI_BINDING)?;
    let raw_sequence = required(ELEMENTS_BINDING)?;
    let created = required(CREATED_BINDING)?;

    let created_at = DateTime::parse_from_rfc3339(created.trim())
        .map_err(|err| {
            SeqError::MalformedRecord(format!(
                "result {position} ({identifier}) has invalid created timestamp {created:?}: {err}"
            ))
        })?
        .with_timezone(&Utc);

    Ok(SourceRecord {
        identifier,
        raw_sequence,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_limit_and_offset() {
        let query = render_query(PageRequest {
            limit: 100,
            offset: 2300,
        });
        assert!(query.contains("LIMIT 100 OFFSET 2300"));
        assert!(query.contains("ORDER BY ASC(str(?created))"));
    }

    #[test]
    fn parses_result_rows() {
        let xml = r#"<?xml version="1.0"?>
<sparql xmlns="http://www.w3.org/2005/sparql-results#">
  <head><variable name="uri"/><variable name="elements"/><variable name="created"/></head>
  <results distinct="false" ordered="true">
    <result>
      <binding name="uri"><uri>https://synbiohub.org/public/igem/BBa_B0034/1</uri></binding>
      <binding name="elements"><literal>AAAGAGGAGAAA</literal></binding>
      <binding name="created"><literal datatype="http://www.w3.org/2001/XMLSchema#string">2017-03-06T15:00:00.000Z</literal></binding>
    </result>
  </results>
</sparql>"#;
        let records = parse_results(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].identifier,
            "https://synbiohub.org/public/igem/BBa_B0034/1"
        );
        assert_eq!(records[0].raw_sequence, "AAAGAGGAGAAA");
        assert_eq!(records[0].created_at.to_rfc3339(), "2017-03-06T15:00:00+00:00");
    }

    #[test]
    fn sequence_literal_keeps_surrounding_whitespace() {
        let xml = "<sparql><results><result>\n\
            <binding name=\"uri\"><uri>https://synbiohub.org/public/igem/BBa_E0040/1</uri></binding>\n\
            <binding name=\"elements\"><literal>\n  ACGT \n</literal></binding>\n\
            <binding name=\"created\"><literal> 2017-03-06T15:00:00Z </literal></binding>\n\
            </result></results></sparql>";
        let records = parse_results(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw_sequence, "\n  ACGT \n");
        assert_eq!(
            records[0].identifier,
            "https://synbiohub.org/public/igem/BBa_E0040/1"
        );
    }

    #[test]
    fn empty_results_parse_to_empty_page() {
        let xml = r#"<sparql><head/><results></results></sparql>"#;
        assert!(parse_results(xml).unwrap().is_empty());
    }

    #[test]
    fn non_sparql_document_is_upstream_failure() {
        let err = parse_results("<html><body>gateway timeout</body></html>").unwrap_err();
        assert!(matches!(err, SeqError::UpstreamUnavailable(_)));
    }
}
