use super::udp::UdpTracker;
use super::{TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{BittorrentError, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for communicating with BitTorrent trackers
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Announce to the first tracker in `urls` that answers
    pub async fn announce_any(
        &self,
        urls: &[String],
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        let mut last_error = None;

        for url in urls {
            match self.announce(url, request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("Tracker {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BittorrentError::TrackerError("No trackers to announce to".to_string())
        }))
    }

    /// Send a request to a tracker and get the peer list
    pub async fn announce(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let url = reqwest::Url::parse(tracker_url)?;
        match url.scheme() {
            "http" | "https" => self.announce_http(url, request).await,
            "udp" => {
                let mut tracker = UdpTracker::connect(&url).await?;
                tracker.announce(request).await
            }
            scheme => Err(BittorrentError::TrackerError(format!(
                "Unsupported tracker scheme: {}",
                scheme
            ))),
        }
    }

    async fn announce_http(
        &self,
        mut url: reqwest::Url,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => {
                format!("{}&{}", existing, request.to_query_string())
            }
            _ => request.to_query_string(),
        };
        url.set_query(Some(&query));

        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(BittorrentError::TrackerError(format!(
                "HTTP error: {}",
                status
            )));
        }

        let decoded = decode(&body)?;
        let tracker_response = TrackerResponse::from_bencode(&decoded)?;

        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );

        Ok(tracker_response)
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}
