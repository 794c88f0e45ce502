//! Campaign dispatch loop.
//!
//! One sequential worker: each pass loads the eligible campaigns and, for
//! each one, either applies a rate limit, finishes or re-arms an empty
//! queue, or sends to exactly one recipient. All state lives in storage so
//! a restarted worker resumes where the last one stopped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::attachments::{document_attachment, file_attachment};
use crate::clock::Clock;
use crate::config::Config;
use crate::db;
use crate::delivery::{Backends, OutgoingMessage};
use crate::models::{Campaign, CampaignStatus, LogStatus, NewSendLog, Recipient};
use crate::template::render_at;

/// Trailing window a send cap is counted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Day,
    Hour,
    Minute,
}

impl RateWindow {
    pub fn span(self) -> chrono::Duration {
        match self {
            RateWindow::Day => chrono::Duration::days(1),
            RateWindow::Hour => chrono::Duration::hours(1),
            RateWindow::Minute => chrono::Duration::minutes(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RateWindow::Day => "day",
            RateWindow::Hour => "hour",
            RateWindow::Minute => "minute",
        }
    }
}

/// Caps that apply to a campaign, checked in order.
///
/// The daily cap always applies when set. The minute cap only applies
/// when there is no hourly cap.
pub fn rate_windows(campaign: &Campaign) -> Vec<(RateWindow, i64)> {
    let mut windows = Vec::with_capacity(2);
    if campaign.daily_limit > 0 {
        windows.push((RateWindow::Day, campaign.daily_limit));
    }
    if campaign.hourly_limit > 0 {
        windows.push((RateWindow::Hour, campaign.hourly_limit));
    } else if campaign.minute_limit > 0 {
        windows.push((RateWindow::Minute, campaign.minute_limit));
    }
    windows
}

/// What happened to one campaign during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignOutcome {
    RateLimited(RateWindow),
    /// One-shot campaign ran out of recipients
    Completed,
    /// Recurring campaign ran out of recipients and was re-armed
    Rescheduled {
        next_send_time: DateTime<Utc>,
        reset: u64,
    },
    /// One delivery attempt was made and logged
    Attempted(LogStatus),
}

/// Uniform whole-second delay between the campaign's bounds.
fn pacing_delay(min_secs: i64, max_secs: i64) -> Duration {
    let lo = min_secs.max(0);
    let hi = max_secs.max(lo);
    Duration::from_secs(rand::thread_rng().gen_range(lo..=hi) as u64)
}

pub struct Dispatcher {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    backends: Backends,
    pass_delay_secs: (u64, u64),
    post_send_pause: Duration,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, backends: Backends, config: &Config) -> Self {
        Self {
            pool,
            clock,
            backends,
            pass_delay_secs: config.pass_delay_secs,
            post_send_pause: Duration::from_secs(config.post_send_pause_secs),
        }
    }

    /// Run passes until `shutdown` resolves. A pending wait or send is
    /// abandoned on shutdown; storage commits are per recipient so nothing
    /// is left half written.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("dispatch_loop_started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("dispatch_loop_stopping");
                    break;
                }
                _ = self.pass_then_wait() => {}
            }
        }
    }

    async fn pass_then_wait(&self) {
        self.run_pass().await;

        let (lo, hi) = self.pass_delay_secs;
        let delay = Duration::from_secs(rand::thread_rng().gen_range(lo..=hi.max(lo)));
        self.clock.sleep(delay).await;
    }

    /// One pass over every eligible campaign. Returns how many were handled
    /// without error.
    pub async fn run_pass(&self) -> usize {
        let now = self.clock.now();
        let campaigns = match db::eligible_campaigns(&self.pool, now).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "eligible_campaigns_query_failed");
                return 0;
            }
        };

        let mut handled = 0;
        for campaign in &campaigns {
            match self.process_campaign(campaign).await {
                Ok(outcome) => {
                    handled += 1;
                    info!(campaign_uid = %campaign.uid, outcome = ?outcome, "campaign_processed");
                }
                Err(e) => {
                    error!(
                        campaign_uid = %campaign.uid,
                        error = %format!("{e:#}"),
                        "campaign_processing_failed"
                    );
                }
            }
        }
        handled
    }

    /// Advance one campaign by at most one recipient.
    pub async fn process_campaign(&self, campaign: &Campaign) -> Result<CampaignOutcome> {
        if let Some(window) = self.exceeded_window(campaign).await? {
            info!(campaign_uid = %campaign.uid, window = window.as_str(), "rate_limit_reached");
            return Ok(CampaignOutcome::RateLimited(window));
        }

        let Some(recipient) = db::next_unsent_recipient(&self.pool, campaign.id)
            .await
            .context("selecting next recipient")?
        else {
            return self.finish_queue(campaign).await;
        };

        let status = self.send_one(campaign, &recipient).await?;
        Ok(CampaignOutcome::Attempted(status))
    }

    async fn exceeded_window(&self, campaign: &Campaign) -> Result<Option<RateWindow>> {
        let now = self.clock.now();
        for (window, limit) in rate_windows(campaign) {
            let count = db::count_logs_since(&self.pool, campaign.id, now - window.span())
                .await
                .context("counting recent sends")?;
            if count >= limit {
                return Ok(Some(window));
            }
        }
        Ok(None)
    }

    async fn finish_queue(&self, campaign: &Campaign) -> Result<CampaignOutcome> {
        match campaign.schedule_type.period() {
            None => {
                db::set_campaign_status(&self.pool, campaign.id, CampaignStatus::Completed)
                    .await
                    .context("completing campaign")?;
                info!(campaign_uid = %campaign.uid, "campaign_completed");
                Ok(CampaignOutcome::Completed)
            }
            Some(period) => {
                let base = campaign.next_send_time.unwrap_or_else(|| self.clock.now());
                let next_send_time = base + period;
                let reset = db::advance_schedule(&self.pool, campaign.id, next_send_time)
                    .await
                    .context("advancing schedule")?;
                info!(
                    campaign_uid = %campaign.uid,
                    next_send_time = %next_send_time,
                    recipients_reset = reset,
                    "campaign_rescheduled"
                );
                Ok(CampaignOutcome::Rescheduled {
                    next_send_time,
                    reset,
                })
            }
        }
    }

    async fn send_one(&self, campaign: &Campaign, recipient: &Recipient) -> Result<LogStatus> {
        self.clock
            .sleep(pacing_delay(campaign.min_delay, campaign.max_delay))
            .await;

        let now = self.clock.now();
        let subject_template = campaign
            .subject_lines()
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let mut message = OutgoingMessage {
            to: recipient.email.clone(),
            subject: render_at(&subject_template, &recipient.email, now),
            body_plain: render_at(&campaign.body_plain, &recipient.email, now),
            body_html: render_at(&campaign.body_html, &recipient.email, now),
            attachments: Vec::new(),
        };
        message
            .attachments
            .extend(document_attachment(campaign, &recipient.email, now));
        message
            .attachments
            .extend(file_attachment(campaign, &recipient.email, now).await);

        let attachment_name = message
            .attachments_for(campaign)
            .map(|a| a.filename.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let result = self.backends.for_campaign(campaign).send(campaign, &message).await;
        let (status, text) = match result {
            Ok(sent) => (LogStatus::Sent, sent.message),
            Err(e) => {
                warn!(
                    campaign_uid = %campaign.uid,
                    recipient = %recipient.email,
                    error = %e,
                    "delivery_failed"
                );
                (LogStatus::Failed, e.to_string())
            }
        };

        db::record_send(
            &self.pool,
            recipient.id,
            &NewSendLog {
                campaign_id: campaign.id,
                recipient: recipient.email.clone(),
                subject: message.subject,
                attachment_name,
                status,
                message: text,
                timestamp: self.clock.now(),
            },
        )
        .await
        .context("recording send")?;

        info!(
            campaign_uid = %campaign.uid,
            recipient = %recipient.email,
            status = ?status,
            "recipient_processed"
        );

        let pause = self.post_send_pause + pacing_delay(campaign.min_delay, campaign.max_delay);
        self.clock.sleep(pause).await;

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delivery::{Deliver, SendError, SentInfo};
    use crate::models::{DeliveryBackend, NewCampaign, ScheduleType};
    use crate::testing;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    /// Backend that records every message and answers with a fixed result.
    #[derive(Default)]
    struct RecordingBackend {
        fail_with: Option<String>,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl RecordingBackend {
        fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Deliver for RecordingBackend {
        async fn send(
            &self,
            _campaign: &Campaign,
            message: &OutgoingMessage,
        ) -> Result<SentInfo, SendError> {
            self.sent.lock().unwrap().push(message.clone());
            match &self.fail_with {
                Some(text) => Err(SendError::Transport(text.clone())),
                None => Ok(SentInfo {
                    message: "Sent".to_string(),
                }),
            }
        }
    }

    struct Harness {
        pool: SqlitePool,
        clock: ManualClock,
        direct: Arc<RecordingBackend>,
        relay: Arc<RecordingBackend>,
        dispatcher: Dispatcher,
    }

    async fn harness_with(direct: RecordingBackend) -> Harness {
        let pool = db::connect_in_memory().await.unwrap();
        let clock = ManualClock::new(testing::t0());
        let direct = Arc::new(direct);
        let relay = Arc::new(RecordingBackend::default());
        let config = Config {
            pass_delay_secs: (1, 1),
            post_send_pause_secs: 60,
            ..Config::default()
        };
        let dispatcher = Dispatcher::new(
            pool.clone(),
            Arc::new(clock.clone()),
            Backends::new(relay.clone(), direct.clone()),
            &config,
        );
        Harness {
            pool,
            clock,
            direct,
            relay,
            dispatcher,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingBackend::default()).await
    }

    fn new_campaign() -> NewCampaign {
        NewCampaign {
            uid: "5550001111".to_string(),
            name: "June Update".to_string(),
            sender_name: "Acme Updates".to_string(),
            sender_email: "updates@acme.test".to_string(),
            subjects_raw: "Hi #email#".to_string(),
            body_plain: "Hello #email#".to_string(),
            body_html: "<p>Hello #email#</p>".to_string(),
            min_delay: 0,
            max_delay: 0,
            status: CampaignStatus::Running,
            hourly_limit: 0,
            daily_limit: 0,
            minute_limit: 0,
            smtp_host: Some("smtp.acme.test".to_string()),
            next_send_time: Some(testing::t0()),
            ..NewCampaign::default()
        }
    }

    fn emails(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("user{i}@example.org")).collect()
    }

    async fn reload(pool: &SqlitePool, id: i64) -> Campaign {
        db::get_campaign(pool, id).await.unwrap().unwrap()
    }

    #[test]
    fn test_rate_windows_minute_only_without_hourly() {
        let mut c = testing::campaign();
        c.daily_limit = 100;
        c.hourly_limit = 10;
        c.minute_limit = 2;
        assert_eq!(
            rate_windows(&c),
            vec![(RateWindow::Day, 100), (RateWindow::Hour, 10)]
        );

        c.hourly_limit = 0;
        assert_eq!(
            rate_windows(&c),
            vec![(RateWindow::Day, 100), (RateWindow::Minute, 2)]
        );

        c.daily_limit = 0;
        c.minute_limit = 0;
        assert!(rate_windows(&c).is_empty());
    }

    #[test]
    fn test_pacing_delay_bounds() {
        for _ in 0..50 {
            let d = pacing_delay(2, 4);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4));
        }
        assert_eq!(pacing_delay(5, 1), Duration::from_secs(5));
        assert_eq!(pacing_delay(-3, 0), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sends_one_recipient_per_pass() {
        let h = harness().await;
        let c = db::create_campaign(&h.pool, &new_campaign(), &emails(2), testing::t0())
            .await
            .unwrap();

        assert_eq!(h.dispatcher.run_pass().await, 1);

        let sent = h.direct.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "user1@example.org");
        assert_eq!(sent[0].subject, "Hi user1@example.org");
        assert_eq!(sent[0].body_plain, "Hello user1@example.org");
        assert_eq!(sent[0].body_html, "<p>Hello user1@example.org</p>");
        assert_eq!(h.relay.count(), 0);

        let recipients = db::list_recipients(&h.pool, c.id).await.unwrap();
        assert!(recipients[0].sent);
        assert!(!recipients[1].sent);

        let logs = db::logs_for_campaign(&h.pool, c.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Sent);
        assert_eq!(logs[0].message, "Sent");
        assert_eq!(logs[0].subject, "Hi user1@example.org");

        // Pacing 0s, then the fixed 60s post-send pause.
        assert_eq!(h.clock.sleeps(), vec![Duration::ZERO, Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_relay_campaign_uses_relay_backend() {
        let h = harness().await;
        let mut new = new_campaign();
        new.backend = DeliveryBackend::Relay;
        db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;

        assert_eq!(h.relay.count(), 1);
        assert_eq!(h.direct.count(), 0);
    }

    #[tokio::test]
    async fn test_daily_cap_holds_over_trailing_day() {
        let h = harness().await;
        let mut new = new_campaign();
        new.daily_limit = 3;
        let c = db::create_campaign(&h.pool, &new, &emails(10), testing::t0())
            .await
            .unwrap();

        for _ in 0..8 {
            h.dispatcher.run_pass().await;
        }
        assert_eq!(h.direct.count(), 3);

        let c = reload(&h.pool, c.id).await;
        assert_eq!(
            h.dispatcher.process_campaign(&c).await.unwrap(),
            CampaignOutcome::RateLimited(RateWindow::Day)
        );

        // A day later the window has emptied.
        h.clock.advance(chrono::Duration::days(1));
        h.dispatcher.run_pass().await;
        assert_eq!(h.direct.count(), 4);

        let since = h.clock.now() - chrono::Duration::days(1);
        assert!(db::count_logs_since(&h.pool, c.id, since).await.unwrap() <= 3);
    }

    #[tokio::test]
    async fn test_minute_cap_applies_without_hourly() {
        let h = harness().await;
        let mut new = new_campaign();
        new.minute_limit = 1;
        let c = db::create_campaign(&h.pool, &new, &emails(3), testing::t0())
            .await
            .unwrap();

        let c = reload(&h.pool, c.id).await;
        assert_eq!(
            h.dispatcher.process_campaign(&c).await.unwrap(),
            CampaignOutcome::Attempted(LogStatus::Sent)
        );
        // The 60s pause lands exactly on the window edge: still limited.
        assert_eq!(
            h.dispatcher.process_campaign(&c).await.unwrap(),
            CampaignOutcome::RateLimited(RateWindow::Minute)
        );

        h.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(
            h.dispatcher.process_campaign(&c).await.unwrap(),
            CampaignOutcome::Attempted(LogStatus::Sent)
        );
    }

    #[tokio::test]
    async fn test_hourly_cap_overrides_minute_cap() {
        let h = harness().await;
        let mut new = new_campaign();
        new.hourly_limit = 5;
        new.minute_limit = 1;
        let c = db::create_campaign(&h.pool, &new, &emails(10), testing::t0())
            .await
            .unwrap();
        let c = reload(&h.pool, c.id).await;

        // Two sends inside one minute would trip the minute cap if it applied.
        h.dispatcher.process_campaign(&c).await.unwrap();
        h.clock.advance(chrono::Duration::seconds(-59));
        assert_eq!(
            h.dispatcher.process_campaign(&c).await.unwrap(),
            CampaignOutcome::Attempted(LogStatus::Sent)
        );
    }

    #[tokio::test]
    async fn test_daily_schedule_rearms_when_queue_empties() {
        let h = harness().await;
        let mut new = new_campaign();
        new.status = CampaignStatus::Scheduled;
        new.schedule_type = ScheduleType::Daily;
        new.schedule_time = Some(testing::t0());
        let c = db::create_campaign(&h.pool, &new, &emails(2), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;
        h.dispatcher.run_pass().await;
        assert_eq!(h.direct.count(), 2);

        let c = reload(&h.pool, c.id).await;
        let outcome = h.dispatcher.process_campaign(&c).await.unwrap();
        assert_eq!(
            outcome,
            CampaignOutcome::Rescheduled {
                next_send_time: testing::t0() + chrono::Duration::hours(24),
                reset: 2,
            }
        );
        assert_eq!(h.direct.count(), 2);

        let c = reload(&h.pool, c.id).await;
        assert_eq!(c.status, CampaignStatus::Scheduled);
        assert_eq!(c.next_send_time, Some(testing::t0() + chrono::Duration::hours(24)));
        let recipients = db::list_recipients(&h.pool, c.id).await.unwrap();
        assert!(recipients.iter().all(|r| !r.sent));

        // Not due again until the cursor comes round.
        h.dispatcher.run_pass().await;
        assert_eq!(h.direct.count(), 2);
    }

    #[tokio::test]
    async fn test_weekly_schedule_advances_seven_days() {
        let h = harness().await;
        let mut new = new_campaign();
        new.status = CampaignStatus::Scheduled;
        new.schedule_type = ScheduleType::Weekly;
        let c = db::create_campaign(&h.pool, &new, &[], testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;

        let c = reload(&h.pool, c.id).await;
        assert_eq!(c.next_send_time, Some(testing::t0() + chrono::Duration::days(7)));
        assert_eq!(c.status, CampaignStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_once_schedule_completes() {
        let h = harness().await;
        let mut new = new_campaign();
        new.schedule_type = ScheduleType::Once;
        let c = db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;
        h.dispatcher.run_pass().await;

        let c = reload(&h.pool, c.id).await;
        assert_eq!(c.status, CampaignStatus::Completed);
        assert_eq!(c.next_send_time, Some(testing::t0()));
        assert_eq!(h.direct.count(), 1);

        // Completed campaigns are no longer eligible.
        assert_eq!(h.dispatcher.run_pass().await, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_logged_and_not_retried() {
        let h = harness_with(RecordingBackend::failing("connection refused")).await;
        let c = db::create_campaign(&h.pool, &new_campaign(), &emails(2), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;
        h.dispatcher.run_pass().await;
        h.dispatcher.run_pass().await;

        assert_eq!(h.direct.count(), 2);
        let recipients = db::list_recipients(&h.pool, c.id).await.unwrap();
        assert!(recipients.iter().all(|r| r.sent));
        assert_eq!(recipients[0].last_error.as_deref(), Some("connection refused"));

        let logs = db::logs_for_campaign(&h.pool, c.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == LogStatus::Failed));
        assert_eq!(reload(&h.pool, c.id).await.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_future_schedule_is_skipped() {
        let h = harness().await;
        let mut new = new_campaign();
        new.status = CampaignStatus::Scheduled;
        new.schedule_type = ScheduleType::Once;
        new.next_send_time = Some(testing::t0() + chrono::Duration::hours(2));
        db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        assert_eq!(h.dispatcher.run_pass().await, 0);
        assert_eq!(h.direct.count(), 0);

        h.clock.advance(chrono::Duration::hours(2));
        assert_eq!(h.dispatcher.run_pass().await, 1);
        assert_eq!(h.direct.count(), 1);
    }

    #[tokio::test]
    async fn test_paused_campaign_is_skipped() {
        let h = harness().await;
        let mut new = new_campaign();
        new.status = CampaignStatus::Paused;
        db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        assert_eq!(h.dispatcher.run_pass().await, 0);
        assert_eq!(h.direct.count(), 0);
    }

    #[tokio::test]
    async fn test_attachment_names_are_logged() {
        let h = harness().await;
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "terms").unwrap();

        let mut new = new_campaign();
        new.attach_pdf = true;
        new.pdf_html_template = "<p>Statement for #email#</p>".to_string();
        new.manual_attachment_path = Some(file.path().to_string_lossy().to_string());
        let c = db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;

        let sent = h.direct.sent.lock().unwrap().clone();
        assert_eq!(sent[0].attachments.len(), 2);

        let logs = db::logs_for_campaign(&h.pool, c.id).await.unwrap();
        assert_eq!(
            logs[0].attachment_name,
            "20240603-June_Update-user1.pdf, 20240603-June_Update-user1.txt"
        );
    }

    #[tokio::test]
    async fn test_unreadable_attachment_still_sends() {
        let h = harness().await;
        let mut new = new_campaign();
        new.manual_attachment_path = Some("/no/such/file.pdf".to_string());
        let c = db::create_campaign(&h.pool, &new, &emails(1), testing::t0())
            .await
            .unwrap();

        h.dispatcher.run_pass().await;

        assert_eq!(h.direct.count(), 1);
        let logs = db::logs_for_campaign(&h.pool, c.id).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Sent);
        assert_eq!(logs[0].attachment_name, "");
    }

    #[tokio::test]
    async fn test_storage_error_does_not_stop_the_pass() {
        let h = harness().await;
        db::create_campaign(&h.pool, &new_campaign(), &emails(1), testing::t0())
            .await
            .unwrap();
        let mut other = new_campaign();
        other.uid = "5550002222".to_string();
        db::create_campaign(&h.pool, &other, &emails(1), testing::t0())
            .await
            .unwrap();

        // Logs can no longer be written: both campaigns fail, the pass survives.
        sqlx::query("DROP TABLE send_logs")
            .execute(&h.pool)
            .await
            .unwrap();
        assert_eq!(h.dispatcher.run_pass().await, 0);
        assert_eq!(h.direct.count(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness().await;
        db::create_campaign(&h.pool, &new_campaign(), &emails(1), testing::t0())
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let dispatcher = h.dispatcher;
        let direct = h.direct.clone();
        let task = tokio::spawn(async move {
            dispatcher
                .run(async {
                    let _ = rx.await;
                })
                .await;
        });

        while direct.count() == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
