//! Notification formatting and outbound webhook delivery.

use anyhow::Context;
use async_trait::async_trait;
use lmn_core::{MatchSnapshot, Score};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "lmn-notify";

/// Chat glyph for a national team, looked up by the exact name the feed
/// uses. Unknown names render with no glyph.
pub fn team_flag(name: &str) -> &'static str {
    match name {
        "Argentina" => ":flag-ar:",
        "Australia" => ":flag-au:",
        "Belgium" => ":flag-be:",
        "Brazil" => ":flag-br:",
        "Cameroon" => ":flag-cm:",
        "Canada" => ":flag-ca:",
        "Costa Rica" => ":flag-cr:",
        "Croatia" => ":flag-hr:",
        "Denmark" => ":flag-dk:",
        "Ecuador" => ":flag-ec:",
        "England" => ":flag-england:",
        "France" => ":flag-fr:",
        "Germany" => ":flag-de:",
        "Ghana" => ":flag-gh:",
        "Iran" | "IR Iran" => ":flag-ir:",
        "Japan" => ":flag-jp:",
        "Mexico" => ":flag-mx:",
        "Morocco" => ":flag-ma:",
        "Netherlands" => ":flag-nl:",
        "Poland" => ":flag-pl:",
        "Portugal" => ":flag-pt:",
        "Qatar" => ":flag-qa:",
        "Saudi Arabia" => ":flag-sa:",
        "Senegal" => ":flag-sn:",
        "Serbia" => ":flag-rs:",
        "South Korea" | "Korea Republic" => ":flag-kr:",
        "Spain" => ":flag-es:",
        "Switzerland" => ":flag-ch:",
        "Tunisia" => ":flag-tn:",
        "USA" | "United States" => ":flag-us:",
        "Uruguay" => ":flag-uy:",
        "Wales" => ":flag-wales:",
        _ => "",
    }
}

/// One-line headline for a match. Non-empty segments are joined with single
/// spaces, so a missing glyph never leaves stray whitespace.
pub fn make_title(snapshot: &MatchSnapshot, hide_score: bool) -> String {
    let score = score_text(&snapshot.score, hide_score);
    let segments = [
        team_flag(&snapshot.home_team),
        snapshot.home_team.as_str(),
        score.as_str(),
        snapshot.away_team.as_str(),
        team_flag(&snapshot.away_team),
    ];
    segments
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn score_text(score: &Score, hide: bool) -> String {
    if hide {
        return "-".to_string();
    }
    match score.penalties {
        Some(pens) => format!(
            "{} ({}) - ({}) {}",
            score.full_time.home, pens.home, pens.away, score.full_time.away
        ),
        None => format!("{} - {}", score.full_time.home, score.full_time.away),
    }
}

/// Subtitle for a newly live match: group and matchday when both are known,
/// otherwise the normalized stage name.
pub fn kickoff_subtitle(snapshot: &MatchSnapshot) -> String {
    match (&snapshot.group, snapshot.matchday) {
        (Some(group), Some(matchday)) => format!("Kickoff - {group} Matchday {matchday}"),
        _ => format!("Kickoff - {}", normalize_stage(&snapshot.stage)),
    }
}

fn normalize_stage(stage: &str) -> String {
    let lower = stage.replace('_', " ").to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

/// Outcome of comparing consecutive scores for one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreChange {
    Scored(Side),
    Disallowed(Side),
    /// Both sides moved, a count jumped by more than one, or there was no
    /// comparable pair. The change is reported without attribution.
    Indeterminate,
}

/// Attributes a score delta to one side. Penalty counts are compared once
/// the live snapshot carries them, otherwise full-time counts.
pub fn classify_score_change(live: &Score, stored: &Score) -> ScoreChange {
    let pair = match live.penalties {
        Some(live_pens) => stored.penalties.map(|stored_pens| (live_pens, stored_pens)),
        None => Some((live.full_time, stored.full_time)),
    };
    let Some((live_pair, stored_pair)) = pair else {
        return ScoreChange::Indeterminate;
    };

    if live_pair.home == stored_pair.home {
        if live_pair.away == stored_pair.away + 1 {
            return ScoreChange::Scored(Side::Away);
        }
        if live_pair.away + 1 == stored_pair.away {
            return ScoreChange::Disallowed(Side::Away);
        }
    }
    if live_pair.away == stored_pair.away {
        if live_pair.home == stored_pair.home + 1 {
            return ScoreChange::Scored(Side::Home);
        }
        if live_pair.home + 1 == stored_pair.home {
            return ScoreChange::Disallowed(Side::Home);
        }
    }
    ScoreChange::Indeterminate
}

/// Subtitle for a score change. An indeterminate delta yields an empty
/// subtitle; the notification still goes out.
pub fn score_change_subtitle(live: &MatchSnapshot, stored: &MatchSnapshot) -> String {
    match classify_score_change(&live.score, &stored.score) {
        ScoreChange::Scored(side) => format!(":soccer: {} scored!", side_name(live, side)),
        ScoreChange::Disallowed(side) => {
            format!(":x: {} goal disallowed!!", side_name(live, side))
        }
        ScoreChange::Indeterminate => String::new(),
    }
}

fn side_name(snapshot: &MatchSnapshot, side: Side) -> &str {
    match side {
        Side::Home => &snapshot.home_team,
        Side::Away => &snapshot.away_team,
    }
}

/// Chat body for a notification. The subtitle line is omitted when empty.
pub fn chat_text(title: &str, subtitle: &str) -> String {
    if subtitle.is_empty() {
        format!("*{title}*")
    } else {
        format!("*{title}*\n> {subtitle}")
    }
}

/// Destination for flushed notifications.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn deliver(&self, title: &str, subtitle: &str) -> anyhow::Result<()>;
}

/// Posts the chat payload to every configured destination. A destination
/// that fails is logged and skipped; delivery stays fire-and-forget.
pub struct WebhookSink {
    client: reqwest::Client,
    destinations: Vec<String>,
}

impl WebhookSink {
    pub fn new(destinations: Vec<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building webhook client")?;
        Ok(Self {
            client,
            destinations,
        })
    }
}

#[async_trait]
impl NotifySink for WebhookSink {
    async fn deliver(&self, title: &str, subtitle: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "text": chat_text(title, subtitle) });
        for url in &self.destinations {
            match self.client.post(url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url, "notification delivered");
                }
                Ok(resp) => {
                    warn!(
                        url,
                        status = resp.status().as_u16(),
                        "destination rejected notification"
                    );
                }
                Err(err) => {
                    warn!(url, error = %err, "notification delivery failed");
                }
            }
        }
        Ok(())
    }
}

/// Dry-run sink that prints instead of posting.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl NotifySink for ConsoleSink {
    async fn deliver(&self, title: &str, subtitle: &str) -> anyhow::Result<()> {
        println!("{}", chat_text(title, subtitle));
        Ok(())
    }
}
