//! Upstream live-match feed client and wire-format decode.

use std::time::Duration;

use anyhow::Context;
use lmn_core::{MatchSnapshot, MatchStatus, Score, ScoreDuration, ScorePair};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "lmn-provider";

pub const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";

/// The notifier tracks exactly one competition.
pub const COMPETITION: &str = "WC";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    /// Pause held after every fetch to respect upstream rate limits.
    pub politeness: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            politeness: Duration::from_secs(2),
        }
    }
}

/// Read-only client for the match feed. Every call is a single fail-fast
/// attempt; outbound requests carry no timeout, so a stalled upstream stalls
/// the run.
#[derive(Debug)]
pub struct MatchProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl MatchProvider {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    /// Lists the competition's currently live matches.
    pub async fn live_matches(&self) -> Result<Vec<MatchSnapshot>, ProviderError> {
        let url = format!(
            "{}/competitions/{}/matches?status=LIVE",
            self.config.base_url, COMPETITION
        );
        let (final_url, body) = self.get_text(&url).await?;
        let matches = decode_live_payload(&body).map_err(|source| ProviderError::Decode {
            url: final_url,
            source,
        })?;
        debug!(count = matches.len(), "live matches fetched");
        Ok(matches)
    }

    /// Fetches one match by id, used for matches that left the live set.
    pub async fn match_by_id(&self, id: u64) -> Result<MatchSnapshot, ProviderError> {
        let url = format!("{}/matches/{}", self.config.base_url, id);
        let (final_url, body) = self.get_text(&url).await?;
        decode_match(&body).map_err(|source| ProviderError::Decode {
            url: final_url,
            source,
        })
    }

    async fn get_text(&self, url: &str) -> Result<(String, String), ProviderError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.config.auth_token {
            request = request.header("X-Auth-Token", token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.text().await?;
        tokio::time::sleep(self.config.politeness).await;
        Ok((final_url, body))
    }
}

/// Decodes the live-matches payload into domain snapshots.
pub fn decode_live_payload(body: &str) -> Result<Vec<MatchSnapshot>, serde_json::Error> {
    let payload: MatchesPayload = serde_json::from_str(body)?;
    Ok(payload.matches.into_iter().map(MatchSnapshot::from).collect())
}

/// Decodes a single-match payload into a domain snapshot.
pub fn decode_match(body: &str) -> Result<MatchSnapshot, serde_json::Error> {
    let wire: WireMatch = serde_json::from_str(body)?;
    Ok(wire.into())
}

#[derive(Debug, Deserialize)]
struct MatchesPayload {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatch {
    id: u64,
    status: MatchStatus,
    #[serde(default)]
    stage: String,
    group: Option<String>,
    matchday: Option<u32>,
    home_team: WireTeam,
    away_team: WireTeam,
    score: WireScore,
}

#[derive(Debug, Default, Deserialize)]
struct WireTeam {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireScore {
    #[serde(default)]
    duration: ScoreDuration,
    #[serde(default)]
    full_time: WirePair,
    #[serde(default)]
    penalties: WirePair,
}

/// Score pair as the feed reports it. Counts are null before play starts
/// and, for penalties, until a shootout begins.
#[derive(Debug, Default, Deserialize)]
struct WirePair {
    home: Option<u32>,
    away: Option<u32>,
}

impl WirePair {
    fn or_zero(&self) -> ScorePair {
        ScorePair {
            home: self.home.unwrap_or(0),
            away: self.away.unwrap_or(0),
        }
    }

    fn both(&self) -> Option<ScorePair> {
        match (self.home, self.away) {
            (Some(home), Some(away)) => Some(ScorePair { home, away }),
            _ => None,
        }
    }
}

impl From<WireMatch> for MatchSnapshot {
    fn from(wire: WireMatch) -> Self {
        MatchSnapshot {
            id: wire.id,
            status: wire.status,
            stage: wire.stage,
            group: wire.group,
            matchday: wire.matchday,
            home_team: wire.home_team.name.unwrap_or_default(),
            away_team: wire.away_team.name.unwrap_or_default(),
            score: Score {
                duration: wire.score.duration,
                full_time: wire.score.full_time.or_zero(),
                penalties: wire.score.penalties.both(),
            },
        }
    }
}
