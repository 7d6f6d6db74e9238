//! Conduit notifications from the configuration-distribution service
//!
//! The service exposes a long-lived watch endpoint that writes one JSON
//! object per line, each holding the complete conduit list of the trench:
//!
//! ```text
//! GET {base}/api/v1/trenches/{trench}/conduits/watch
//! {"conduits":[{"name":"load-balancer-a"},{"name":"load-balancer-b"}]}
//! ```

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use ipam_core::{ConduitSource, ConduitStream, IpamError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Longest unterminated event buffered before the stream is failed
const MAX_EVENT_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ConduitEvent {
    #[serde(default)]
    conduits: Vec<ConduitEntry>,
}

#[derive(Debug, Deserialize)]
struct ConduitEntry {
    name: String,
}

/// [`ConduitSource`] reading the watch endpoint over HTTP
#[derive(Clone)]
pub struct HttpConduitSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConduitSource {
    /// Create a source for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(source_error)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a source using an existing client
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL watched for `trench`
    pub fn watch_url(&self, trench: &str) -> String {
        format!("{}/api/v1/trenches/{}/conduits/watch", self.base_url, trench)
    }
}

#[async_trait]
impl ConduitSource for HttpConduitSource {
    async fn watch(&self, trench: &str) -> Result<ConduitStream> {
        let url = self.watch_url(trench);
        debug!(url = %url, "Opening conduit watch");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(source_error)?
            .error_for_status()
            .map_err(source_error)?;
        Ok(decode_lines(response.bytes_stream().boxed(), MAX_EVENT_LENGTH).boxed())
    }
}

fn source_error(e: reqwest::Error) -> IpamError {
    IpamError::Source(e.to_string())
}

fn parse_event(line: &[u8]) -> Result<Vec<String>> {
    let event: ConduitEvent = serde_json::from_slice(line)
        .map_err(|e| IpamError::Source(format!("invalid conduit event: {}", e)))?;
    Ok(event.conduits.into_iter().map(|c| c.name).collect())
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Split a chunked body into newline-delimited conduit events
///
/// A transport error ends the stream after being yielded, as does more than
/// `max_len` bytes without a newline.
fn decode_lines(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    max_len: usize,
) -> impl futures::Stream<Item = Result<Vec<String>>> + Send + 'static {
    stream::unfold(
        (body, BytesMut::new(), false),
        move |(mut body, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    if is_blank(&line) {
                        continue;
                    }
                    return Some((parse_event(&line), (body, buf, done)));
                }
                if buf.len() > max_len {
                    buf.clear();
                    let e = IpamError::Source(format!(
                        "conduit event exceeds {} bytes without a newline",
                        max_len
                    ));
                    return Some((Err(e), (body, buf, true)));
                }
                if done {
                    if is_blank(&buf) {
                        return None;
                    }
                    let line = buf.split();
                    return Some((parse_event(&line), (body, buf, done)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buf.clear();
                        return Some((Err(source_error(e)), (body, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    )
}
