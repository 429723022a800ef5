//! State-diff engine and single-pass pipeline for live match notifications.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lmn_core::{
    EventKind, EventLedger, MatchSnapshot, MatchStatus, NotificationJob, ScoreDuration, StateDoc,
};
use lmn_notify::{
    kickoff_subtitle, make_title, score_change_subtitle, ConsoleSink, NotifySink, WebhookSink,
};
use lmn_provider::{MatchProvider, ProviderConfig};
use lmn_store::StateStore;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lmn-engine";

/// One in-play status transition the engine knows how to announce.
///
/// Rules are evaluated in order and the first one whose predicate holds
/// *and* whose flag is still unset wins. A rule whose predicate holds but
/// whose flag is already recorded does not stop the scan, which is what
/// lets the paused-state rules ladder through regulation and both extra
/// time periods using the same PAUSED status.
struct TransitionRule {
    kind: EventKind,
    subtitle: &'static str,
    applies: fn(&MatchSnapshot, &EventLedger) -> bool,
}

static TRANSITION_RULES: &[TransitionRule] = &[
    TransitionRule {
        kind: EventKind::EndOfFirst,
        subtitle: "End of first half",
        applies: |live, _| live.status == MatchStatus::Paused,
    },
    TransitionRule {
        kind: EventKind::EndOfEt1,
        subtitle: "End of first period of extra time",
        applies: |live, ledger| {
            live.status == MatchStatus::Paused
                && ledger.has(EventKind::StartOfEt1)
                && !ledger.has(EventKind::StartOfEt2)
        },
    },
    TransitionRule {
        kind: EventKind::EndOfEt2,
        subtitle: "End of second period of extra time",
        applies: |live, ledger| {
            live.status == MatchStatus::Paused && ledger.has(EventKind::StartOfEt2)
        },
    },
    TransitionRule {
        kind: EventKind::StartOfSecond,
        subtitle: "Second half begins",
        applies: |live, _| {
            live.status == MatchStatus::InPlay && live.score.duration == ScoreDuration::Regular
        },
    },
    TransitionRule {
        kind: EventKind::StartOfEt1,
        subtitle: "First period of extra time begins",
        applies: |live, _| {
            live.status == MatchStatus::InPlay && live.score.duration == ScoreDuration::ExtraTime
        },
    },
    TransitionRule {
        kind: EventKind::StartOfEt2,
        subtitle: "Second period of extra time begins",
        applies: |live, ledger| {
            live.status == MatchStatus::InPlay
                && live.score.duration == ScoreDuration::ExtraTime
                && ledger.has(EventKind::StartOfEt1)
        },
    },
    TransitionRule {
        kind: EventKind::StartOfPk,
        subtitle: "Penalty shootout begins",
        applies: |live, _| {
            live.status == MatchStatus::InPlay
                && live.score.duration == ScoreDuration::PenaltyShootout
        },
    },
];

/// An event the reconciler decided to announce during one pass.
///
/// `kind` is `None` for plain score changes: goals repeat, so they carry no
/// ledger flag and are deduplicated by the snapshot replacement instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub match_id: u64,
    pub kind: Option<EventKind>,
    pub title: String,
    pub subtitle: String,
}

/// Diffs the live snapshot list against the stored document.
///
/// Emits at most one event per match per pass, records ledger flags for
/// flagged events, queues one notification job per event, and finally
/// replaces the stored snapshot list with the live one wholesale.
pub fn reconcile(
    mut doc: StateDoc,
    live: &[MatchSnapshot],
    delay_mins: i64,
    now: DateTime<Utc>,
) -> (StateDoc, Vec<ScheduledEvent>) {
    let mut events = Vec::new();
    let empty = EventLedger::new();

    for snapshot in live {
        let stored = doc.latest.iter().find(|m| m.id == snapshot.id);
        let ledger = doc.scheduled.get(&snapshot.id).unwrap_or(&empty);

        let decision = match stored {
            None => {
                if ledger.has(EventKind::Kickoff) {
                    None
                } else {
                    // The score is hidden on kickoff titles: a late first
                    // sighting of a match should not spoil the opening goal.
                    Some((
                        Some(EventKind::Kickoff),
                        make_title(snapshot, true),
                        kickoff_subtitle(snapshot),
                    ))
                }
            }
            Some(stored) if stored.status == snapshot.status => {
                if stored.score == snapshot.score {
                    None
                } else {
                    Some((
                        None,
                        make_title(snapshot, false),
                        score_change_subtitle(snapshot, stored),
                    ))
                }
            }
            Some(_) => transition_decision(snapshot, ledger),
        };

        let Some((kind, title, subtitle)) = decision else {
            continue;
        };
        if let Some(kind) = kind {
            doc.scheduled.entry(snapshot.id).or_default().record(kind);
        }
        schedule_job(&mut doc.queue, &title, &subtitle, delay_mins, now);
        debug!(match_id = snapshot.id, %title, %subtitle, "event scheduled");
        events.push(ScheduledEvent {
            match_id: snapshot.id,
            kind,
            title,
            subtitle,
        });
    }

    doc.latest = live.to_vec();
    (doc, events)
}

/// Picks the first transition rule that applies and has not fired yet.
pub fn transition_decision(
    live: &MatchSnapshot,
    ledger: &EventLedger,
) -> Option<(Option<EventKind>, String, String)> {
    let rule = TRANSITION_RULES
        .iter()
        .find(|rule| !ledger.has(rule.kind) && (rule.applies)(live, ledger))?;
    Some((
        Some(rule.kind),
        make_title(live, false),
        rule.subtitle.to_string(),
    ))
}

/// Decides the completion event for a match that left the live feed.
///
/// Whatever status the detail fetch reports becomes the event, so a match
/// that went straight to POSTPONED is announced just like a FINISHED one.
pub fn departed_decision(
    detail: &MatchSnapshot,
    ledger: &EventLedger,
) -> Option<(EventKind, String, String)> {
    let kind = EventKind::Ended(detail.status);
    if ledger.has(kind) {
        return None;
    }
    Some((
        kind,
        make_title(detail, false),
        format!("Game {}", detail.status.ledger_key()),
    ))
}

/// Queues a notification job due `delay_mins` minutes from `now`.
///
/// The due time is shaved by one second so that a zero-minute delay flushes
/// within the same pass instead of slipping to the next invocation.
pub fn schedule_job(
    queue: &mut Vec<NotificationJob>,
    title: &str,
    subtitle: &str,
    delay_mins: i64,
    now: DateTime<Utc>,
) {
    queue.push(NotificationJob {
        post_on_or_after: now + Duration::seconds(delay_mins * 60 - 1),
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        posted: false,
    });
}

/// Delivers every due job through the sink and drops it from the queue.
///
/// Jobs not yet due are retained untouched. Returns the surviving queue and
/// the number of notifications handed to the sink.
pub async fn flush(
    mut queue: Vec<NotificationJob>,
    now: DateTime<Utc>,
    sink: &dyn NotifySink,
) -> Result<(Vec<NotificationJob>, usize)> {
    let mut delivered = 0usize;
    for job in &mut queue {
        if job.post_on_or_after <= now {
            sink.deliver(&job.title, &job.subtitle).await?;
            job.posted = true;
            delivered += 1;
            debug!(title = %job.title, "notification flushed");
        }
    }
    queue.retain(|job| !job.posted);
    Ok((queue, delivered))
}

/// Settings for one notifier pass.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub auth_token: Option<String>,
    pub destinations: Vec<String>,
    pub politeness_secs: u64,
    pub notify_delay_mins: i64,
    pub db_path: PathBuf,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            destinations: Vec::new(),
            politeness_secs: 2,
            notify_delay_mins: 3,
            db_path: PathBuf::from("./db.json"),
            dry_run: false,
        }
    }
}

impl RunConfig {
    /// Reads settings from `LMN_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auth_token: std::env::var("LMN_AUTH_TOKEN").ok().filter(|v| !v.is_empty()),
            destinations: std::env::var("LMN_WEBHOOK_URLS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            politeness_secs: std::env::var("LMN_POLITENESS_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.politeness_secs),
            notify_delay_mins: std::env::var("LMN_NOTIFY_DELAY_MINS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.notify_delay_mins),
            db_path: std::env::var("LMN_DB_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            dry_run: false,
        }
    }

    /// Rejects configurations that cannot run. Dry runs are exempt from the
    /// credential and destination requirements.
    pub fn validate(&self) -> Result<()> {
        if self.notify_delay_mins < 0 {
            bail!("notify delay must be zero or more minutes");
        }
        if self.dry_run {
            return Ok(());
        }
        match &self.auth_token {
            Some(token) if !token.is_empty() => {}
            _ => bail!("an auth token is required unless running with --dry-run"),
        }
        if self.destinations.is_empty() {
            bail!("at least one webhook destination is required unless running with --dry-run");
        }
        Ok(())
    }
}

/// Source of live match data, kept behind a trait so tests can stub it.
#[async_trait]
pub trait MatchSource: Send + Sync {
    async fn live_matches(&self) -> Result<Vec<MatchSnapshot>>;
    async fn match_by_id(&self, id: u64) -> Result<MatchSnapshot>;
}

#[async_trait]
impl MatchSource for MatchProvider {
    async fn live_matches(&self) -> Result<Vec<MatchSnapshot>> {
        Ok(MatchProvider::live_matches(self).await?)
    }

    async fn match_by_id(&self, id: u64) -> Result<MatchSnapshot> {
        Ok(MatchProvider::match_by_id(self, id).await?)
    }
}

/// What one pass did, in a shape that serializes cleanly into logs.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub live_matches: usize,
    pub departed_matches: usize,
    pub events_scheduled: usize,
    pub notifications_sent: usize,
    pub jobs_pending: usize,
    pub dry_run: bool,
}

/// Summary plus the final computed document, which dry runs print instead
/// of persisting.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub document: StateDoc,
}

/// The whole notifier wired together: source, store, diff engine, sink.
pub struct NotifierPipeline {
    config: RunConfig,
    source: Box<dyn MatchSource>,
    store: StateStore,
    sink: Box<dyn NotifySink>,
}

impl NotifierPipeline {
    /// Wires the production collaborators from a validated config. Dry runs
    /// swap the webhook sink for stdout.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let provider = MatchProvider::new(ProviderConfig {
            auth_token: config.auth_token.clone(),
            politeness: StdDuration::from_secs(config.politeness_secs),
            ..ProviderConfig::default()
        })?;
        let sink: Box<dyn NotifySink> = if config.dry_run {
            Box::new(ConsoleSink)
        } else {
            Box::new(WebhookSink::new(config.destinations.clone())?)
        };
        let store = StateStore::new(config.db_path.clone());
        Ok(Self {
            config,
            source: Box::new(provider),
            store,
            sink,
        })
    }

    /// Assembles a pipeline from explicit collaborators.
    pub fn with_parts(
        config: RunConfig,
        source: Box<dyn MatchSource>,
        store: StateStore,
        sink: Box<dyn NotifySink>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            sink,
        }
    }

    /// One full pass: load state, fetch live matches, reconcile, chase
    /// departed matches, flush due notifications, persist.
    ///
    /// Any transport or decode failure aborts before the save, so the prior
    /// document survives a bad pass untouched.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let doc = self.store.load().await?;
        let live = self
            .source
            .live_matches()
            .await
            .context("fetching live matches")?;
        info!(%run_id, live = live.len(), "live snapshot fetched");

        // Departure is judged against the stored list before it is replaced.
        let departed: Vec<u64> = doc
            .latest
            .iter()
            .map(|m| m.id)
            .filter(|id| !live.iter().any(|m| m.id == *id))
            .collect();

        let now = Utc::now();
        let (mut doc, mut events) = reconcile(doc, &live, self.config.notify_delay_mins, now);

        let empty = EventLedger::new();
        for id in &departed {
            let detail = self
                .source
                .match_by_id(*id)
                .await
                .with_context(|| format!("fetching departed match {id}"))?;
            let ledger = doc.scheduled.get(id).unwrap_or(&empty);
            if let Some((kind, title, subtitle)) = departed_decision(&detail, ledger) {
                doc.scheduled.entry(*id).or_default().record(kind);
                schedule_job(
                    &mut doc.queue,
                    &title,
                    &subtitle,
                    self.config.notify_delay_mins,
                    now,
                );
                debug!(match_id = *id, %title, %subtitle, "departed match event scheduled");
                events.push(ScheduledEvent {
                    match_id: *id,
                    kind: Some(kind),
                    title,
                    subtitle,
                });
            }
        }

        let (retained, delivered) =
            flush(std::mem::take(&mut doc.queue), Utc::now(), self.sink.as_ref()).await?;
        doc.queue = retained;

        if self.config.dry_run {
            info!(%run_id, "dry run, skipping state save");
        } else {
            self.store.save(&doc).await?;
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            live_matches: live.len(),
            departed_matches: departed.len(),
            events_scheduled: events.len(),
            notifications_sent: delivered,
            jobs_pending: doc.queue.len(),
            dry_run: self.config.dry_run,
        };
        info!(
            %run_id,
            live = summary.live_matches,
            departed = summary.departed_matches,
            scheduled = summary.events_scheduled,
            sent = summary.notifications_sent,
            pending = summary.jobs_pending,
            "pass complete"
        );
        Ok(RunOutcome {
            summary,
            document: doc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use lmn_core::{Score, ScorePair};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 14, 18, 0, 0).unwrap()
    }

    fn mk_match(id: u64, home: &str, away: &str, status: MatchStatus) -> MatchSnapshot {
        MatchSnapshot {
            id,
            status,
            stage: "GROUP_STAGE".to_string(),
            group: Some("A".to_string()),
            matchday: Some(1),
            home_team: home.to_string(),
            away_team: away.to_string(),
            score: Score::default(),
        }
    }

    fn with_goals(mut m: MatchSnapshot, home: u32, away: u32) -> MatchSnapshot {
        m.score.full_time = ScorePair { home, away };
        m
    }

    fn with_duration(mut m: MatchSnapshot, duration: ScoreDuration) -> MatchSnapshot {
        m.score.duration = duration;
        m
    }

    fn ledger_with(kinds: &[EventKind]) -> EventLedger {
        let mut ledger = EventLedger::new();
        for kind in kinds {
            ledger.record(*kind);
        }
        ledger
    }

    struct StubSource {
        live: Vec<MatchSnapshot>,
        by_id: BTreeMap<u64, MatchSnapshot>,
    }

    #[async_trait]
    impl MatchSource for StubSource {
        async fn live_matches(&self) -> Result<Vec<MatchSnapshot>> {
            Ok(self.live.clone())
        }

        async fn match_by_id(&self, id: u64) -> Result<MatchSnapshot> {
            self.by_id
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no stub match {id}"))
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        delivered: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn deliver(&self, title: &str, subtitle: &str) -> Result<()> {
            self.delivered
                .lock()
                .expect("sink lock")
                .push((title.to_string(), subtitle.to_string()));
            Ok(())
        }
    }

    fn test_config(db_path: PathBuf, dry_run: bool) -> RunConfig {
        RunConfig {
            auth_token: Some("test-token".to_string()),
            destinations: vec!["https://hooks.example.test/T000/B000".to_string()],
            politeness_secs: 0,
            notify_delay_mins: 3,
            db_path,
            dry_run,
        }
    }

    #[test]
    fn kickoff_is_scheduled_once_per_match() {
        let live = vec![mk_match(42, "France", "Germany", MatchStatus::InPlay)];
        let (doc, events) = reconcile(StateDoc::default(), &live, 3, t0());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Some(EventKind::Kickoff));
        assert_eq!(events[0].title, ":flag-fr: France - Germany :flag-de:");
        assert_eq!(events[0].subtitle, "Kickoff - A Matchday 1");
        assert!(doc.scheduled[&42].has(EventKind::Kickoff));
        assert_eq!(doc.queue.len(), 1);
        assert_eq!(doc.queue[0].post_on_or_after, t0() + Duration::seconds(179));

        // the flag blocks a second kickoff even if the stored list lost the match
        let mut wiped = doc.clone();
        wiped.latest.clear();
        let (doc, events) = reconcile(wiped, &live, 3, t0());
        assert!(events.is_empty());
        assert_eq!(doc.queue.len(), 1);
    }

    #[test]
    fn identical_snapshots_change_nothing() {
        let live = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            1,
            0,
        )];
        let mut doc = StateDoc::default();
        doc.latest = live.clone();

        let (doc, events) = reconcile(doc, &live, 3, t0());
        assert!(events.is_empty());
        assert!(doc.queue.is_empty());
        assert!(doc.scheduled.is_empty());
    }

    #[test]
    fn score_changes_carry_no_ledger_flag() {
        let mut doc = StateDoc::default();
        doc.latest = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            1,
            0,
        )];
        let live = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            1,
            1,
        )];

        let (doc, events) = reconcile(doc, &live, 3, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, None);
        assert_eq!(events[0].title, ":flag-es: Spain 1 - 1 Japan :flag-jp:");
        assert_eq!(events[0].subtitle, ":soccer: Japan scored!");
        assert!(doc.scheduled.is_empty());

        // the replaced snapshot is what silences the repeat, not a flag
        let (doc, events) = reconcile(doc, &live, 3, t0());
        assert!(events.is_empty());
        assert_eq!(doc.queue.len(), 1);
    }

    #[test]
    fn disallowed_goal_is_reported() {
        let mut doc = StateDoc::default();
        doc.latest = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            2,
            1,
        )];
        let live = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            2,
            0,
        )];

        let (_doc, events) = reconcile(doc, &live, 3, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subtitle, ":x: Japan goal disallowed!!");
    }

    #[test]
    fn indeterminate_delta_still_notifies_with_blank_subtitle() {
        let mut doc = StateDoc::default();
        doc.latest = vec![mk_match(7, "Spain", "Japan", MatchStatus::InPlay)];
        let live = vec![with_goals(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            2,
            1,
        )];

        let (doc, events) = reconcile(doc, &live, 3, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subtitle, "");
        assert_eq!(doc.queue.len(), 1);
    }

    #[test]
    fn half_time_pause_fires_end_of_first_once() {
        let mut doc = StateDoc::default();
        doc.latest = vec![mk_match(7, "Spain", "Japan", MatchStatus::InPlay)];
        let live = vec![mk_match(7, "Spain", "Japan", MatchStatus::Paused)];

        let (doc, events) = reconcile(doc, &live, 3, t0());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, Some(EventKind::EndOfFirst));
        assert_eq!(events[0].subtitle, "End of first half");
        assert!(doc.scheduled[&7].has(EventKind::EndOfFirst));

        // replaying the same transition is silenced by the ledger
        let mut replay = doc.clone();
        replay.latest = vec![mk_match(7, "Spain", "Japan", MatchStatus::InPlay)];
        let (_doc, events) = reconcile(replay, &live, 3, t0());
        assert!(events.is_empty());
    }

    #[test]
    fn pause_ladder_tracks_extra_time_periods() {
        let paused = mk_match(7, "Spain", "Japan", MatchStatus::Paused);

        let after_et1 = ledger_with(&[
            EventKind::EndOfFirst,
            EventKind::StartOfSecond,
            EventKind::StartOfEt1,
        ]);
        let decision = transition_decision(&paused, &after_et1).expect("event");
        assert_eq!(decision.0, Some(EventKind::EndOfEt1));
        assert_eq!(decision.2, "End of first period of extra time");

        let after_et2 = ledger_with(&[
            EventKind::EndOfFirst,
            EventKind::StartOfSecond,
            EventKind::StartOfEt1,
            EventKind::EndOfEt1,
            EventKind::StartOfEt2,
        ]);
        let decision = transition_decision(&paused, &after_et2).expect("event");
        assert_eq!(decision.0, Some(EventKind::EndOfEt2));
        assert_eq!(decision.2, "End of second period of extra time");
    }

    #[test]
    fn resume_ladder_tracks_periods_by_duration() {
        let second_half = mk_match(7, "Spain", "Japan", MatchStatus::InPlay);
        let decision = transition_decision(&second_half, &ledger_with(&[EventKind::EndOfFirst]))
            .expect("event");
        assert_eq!(decision.0, Some(EventKind::StartOfSecond));
        assert_eq!(decision.2, "Second half begins");

        let extra_time = with_duration(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            ScoreDuration::ExtraTime,
        );
        let decision = transition_decision(
            &extra_time,
            &ledger_with(&[EventKind::EndOfFirst, EventKind::StartOfSecond]),
        )
        .expect("event");
        assert_eq!(decision.0, Some(EventKind::StartOfEt1));

        let decision = transition_decision(
            &extra_time,
            &ledger_with(&[
                EventKind::EndOfFirst,
                EventKind::StartOfSecond,
                EventKind::StartOfEt1,
            ]),
        )
        .expect("event");
        assert_eq!(decision.0, Some(EventKind::StartOfEt2));
        assert_eq!(decision.2, "Second period of extra time begins");

        let shootout = with_duration(
            mk_match(7, "Spain", "Japan", MatchStatus::InPlay),
            ScoreDuration::PenaltyShootout,
        );
        let decision = transition_decision(&shootout, &EventLedger::new()).expect("event");
        assert_eq!(decision.0, Some(EventKind::StartOfPk));
        assert_eq!(decision.2, "Penalty shootout begins");
    }

    #[test]
    fn untracked_status_change_is_silent() {
        let suspended = mk_match(7, "Spain", "Japan", MatchStatus::Suspended);
        assert!(transition_decision(&suspended, &EventLedger::new()).is_none());
    }

    #[test]
    fn departed_match_reports_terminal_status_once() {
        let detail = with_goals(
            mk_match(9, "England", "Australia", MatchStatus::Finished),
            2,
            0,
        );
        let (kind, title, subtitle) =
            departed_decision(&detail, &EventLedger::new()).expect("event");
        assert_eq!(kind, EventKind::Ended(MatchStatus::Finished));
        assert_eq!(title, ":flag-england: England 2 - 0 Australia :flag-au:");
        assert_eq!(subtitle, "Game finished");

        let recorded = ledger_with(&[EventKind::Ended(MatchStatus::Finished)]);
        assert!(departed_decision(&detail, &recorded).is_none());
    }

    #[test]
    fn departed_match_uses_the_status_it_reports() {
        let detail = mk_match(9, "England", "Australia", MatchStatus::Postponed);
        let (kind, _title, subtitle) =
            departed_decision(&detail, &EventLedger::new()).expect("event");
        assert_eq!(kind, EventKind::Ended(MatchStatus::Postponed));
        assert_eq!(subtitle, "Game postponed");
    }

    #[tokio::test]
    async fn jobs_flush_only_after_their_delay() {
        let mut queue = Vec::new();
        schedule_job(
            &mut queue,
            "France 1 - 0 Germany",
            ":soccer: France scored!",
            3,
            t0(),
        );
        assert_eq!(queue[0].post_on_or_after, t0() + Duration::seconds(179));

        let sink = RecordingSink::default();
        let (queue, delivered) = flush(queue, t0() + Duration::seconds(60), &sink)
            .await
            .expect("flush");
        assert_eq!(delivered, 0);
        assert_eq!(queue.len(), 1);

        let (queue, delivered) = flush(queue, t0() + Duration::seconds(180), &sink)
            .await
            .expect("flush");
        assert_eq!(delivered, 1);
        assert!(queue.is_empty());
        assert_eq!(
            sink.delivered.lock().expect("sink lock").as_slice(),
            &[(
                "France 1 - 0 Germany".to_string(),
                ":soccer: France scored!".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn zero_delay_fires_on_the_next_flush() {
        let mut queue = Vec::new();
        schedule_job(&mut queue, "title", "", 0, t0());
        let sink = RecordingSink::default();
        let (queue, delivered) = flush(queue, t0(), &sink).await.expect("flush");
        assert_eq!(delivered, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pipeline_schedules_kickoff_and_persists() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("db.json");
        let live = vec![mk_match(42, "France", "Germany", MatchStatus::InPlay)];
        let source = StubSource {
            live: live.clone(),
            by_id: BTreeMap::new(),
        };
        let sink = RecordingSink::default();

        let pipeline = NotifierPipeline::with_parts(
            test_config(db_path.clone(), false),
            Box::new(source),
            StateStore::new(db_path.clone()),
            Box::new(sink.clone()),
        );

        let outcome = pipeline.run_once().await.expect("run");
        assert_eq!(outcome.summary.live_matches, 1);
        assert_eq!(outcome.summary.events_scheduled, 1);
        assert_eq!(outcome.summary.notifications_sent, 0);
        assert_eq!(outcome.summary.jobs_pending, 1);
        assert_eq!(outcome.document.queue[0].subtitle, "Kickoff - A Matchday 1");

        let saved = StateStore::new(db_path).load().await.expect("load");
        assert_eq!(saved, outcome.document);

        // a second identical pass schedules nothing new
        let outcome = pipeline.run_once().await.expect("run again");
        assert_eq!(outcome.summary.events_scheduled, 0);
        assert_eq!(outcome.summary.jobs_pending, 1);
        assert!(sink.delivered.lock().expect("sink lock").is_empty());
    }

    #[tokio::test]
    async fn pipeline_reports_departed_matches() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("db.json");

        let mut seeded = StateDoc::default();
        seeded.latest = vec![with_goals(
            mk_match(9, "England", "Australia", MatchStatus::InPlay),
            1,
            0,
        )];
        StateStore::new(db_path.clone())
            .save(&seeded)
            .await
            .expect("seed");

        let detail = with_goals(
            mk_match(9, "England", "Australia", MatchStatus::Finished),
            2,
            0,
        );
        let source = StubSource {
            live: Vec::new(),
            by_id: BTreeMap::from([(9, detail)]),
        };
        let sink = RecordingSink::default();

        let pipeline = NotifierPipeline::with_parts(
            test_config(db_path.clone(), false),
            Box::new(source),
            StateStore::new(db_path),
            Box::new(sink.clone()),
        );

        let outcome = pipeline.run_once().await.expect("run");
        assert_eq!(outcome.summary.departed_matches, 1);
        assert_eq!(outcome.summary.events_scheduled, 1);
        assert_eq!(outcome.document.queue[0].subtitle, "Game finished");
        assert!(outcome.document.latest.is_empty());
        assert!(outcome.document.scheduled[&9].has(EventKind::Ended(MatchStatus::Finished)));
    }

    #[tokio::test]
    async fn dry_run_computes_but_never_saves() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("db.json");
        let live = vec![mk_match(42, "France", "Germany", MatchStatus::InPlay)];
        let source = StubSource {
            live,
            by_id: BTreeMap::new(),
        };
        let sink = RecordingSink::default();

        let pipeline = NotifierPipeline::with_parts(
            test_config(db_path.clone(), true),
            Box::new(source),
            StateStore::new(db_path.clone()),
            Box::new(sink.clone()),
        );

        let outcome = pipeline.run_once().await.expect("run");
        assert!(outcome.summary.dry_run);
        assert_eq!(outcome.summary.events_scheduled, 1);
        assert_eq!(outcome.document.queue.len(), 1);
        assert!(!db_path.exists());
    }

    #[tokio::test]
    async fn due_jobs_from_a_previous_pass_are_delivered() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("db.json");

        let mut seeded = StateDoc::default();
        seeded.queue.push(NotificationJob {
            post_on_or_after: t0(),
            title: "France 1 - 0 Germany".to_string(),
            subtitle: ":soccer: France scored!".to_string(),
            posted: false,
        });
        StateStore::new(db_path.clone())
            .save(&seeded)
            .await
            .expect("seed");

        let source = StubSource {
            live: Vec::new(),
            by_id: BTreeMap::new(),
        };
        let sink = RecordingSink::default();

        let pipeline = NotifierPipeline::with_parts(
            test_config(db_path.clone(), false),
            Box::new(source),
            StateStore::new(db_path.clone()),
            Box::new(sink.clone()),
        );

        let outcome = pipeline.run_once().await.expect("run");
        assert_eq!(outcome.summary.notifications_sent, 1);
        assert_eq!(outcome.summary.jobs_pending, 0);
        assert_eq!(
            sink.delivered.lock().expect("sink lock").as_slice(),
            &[(
                "France 1 - 0 Germany".to_string(),
                ":soccer: France scored!".to_string()
            )]
        );

        let saved = StateStore::new(db_path).load().await.expect("load");
        assert!(saved.queue.is_empty());
    }

    #[test]
    fn dry_run_needs_no_token_or_destinations() {
        let config = RunConfig {
            dry_run: true,
            ..RunConfig::default()
        };
        assert!(NotifierPipeline::new(config).is_ok());
    }

    #[test]
    fn live_runs_require_token_and_destinations() {
        let mut config = RunConfig::default();
        assert!(config.validate().is_err());

        config.auth_token = Some("tok".to_string());
        assert!(config.validate().is_err());

        config.destinations = vec!["https://hooks.example.test/T/B".to_string()];
        assert!(config.validate().is_ok());

        config.notify_delay_mins = -1;
        assert!(config.validate().is_err());
    }
}
