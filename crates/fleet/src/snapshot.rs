use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http::Method;
use http::header::{ACCEPT, CACHE_CONTROL};
use realtime::{Error, HttpRequest, Result, bad_gateway};

use crate::model::{FleetSnapshot, UpdateBatch};

/// Retrieves the fleet changes since `cursor`, or a full snapshot when no
/// cursor is given.
///
/// # Errors
///
/// Returns an error when the request fails, the endpoint answers with a
/// non-success status, or the body cannot be deserialized.
pub async fn fetch<P>(url: &str, cursor: Option<DateTime<Utc>>, provider: &P) -> Result<UpdateBatch>
where
    P: HttpRequest,
{
    let uri = cursor.map_or_else(
        || url.to_string(),
        |since| {
            let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}since={}", urlencoding::encode(&since))
        },
    );

    let request = http::Request::builder()
        .method(Method::GET)
        .uri(&uri)
        .header(CACHE_CONTROL, "no-cache")
        .header(ACCEPT, "application/json")
        .body(Bytes::new())
        .context("building fleet snapshot request")?;

    let response =
        HttpRequest::fetch(provider, request).await.context("fleet snapshot request failed")?;

    let status = response.status();
    if !status.is_success() {
        return Err(bad_gateway!("fleet snapshot returned {}", status));
    }

    let snapshot: FleetSnapshot = serde_json::from_slice(response.body()).map_err(Error::from)?;
    Ok(snapshot.into())
}
