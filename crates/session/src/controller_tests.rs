// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::*;
use crate::cookie::{CookieOptions, CookieStore};
use crate::test_support::{
    fast_config, lifetime_token, memory_store, FlakyJar, PausedClock, RecordingHandler,
    ScriptedClient,
};

const NOW: u64 = 1_760_000_000;
const HOUR: u64 = 3600;

struct Harness {
    controller: Arc<SessionController>,
    client: Arc<ScriptedClient>,
    handler: Arc<RecordingHandler>,
}

fn harness(
    config: SessionConfig,
    access: Option<BearerToken>,
    refresh: Option<&str>,
    client: Arc<ScriptedClient>,
) -> anyhow::Result<Harness> {
    let (_jar, store) = memory_store(&config);
    if let Some(token) = access {
        store.set_access_token(&token)?;
    }
    if let Some(refresh) = refresh {
        store.set_refresh_token(refresh)?;
    }
    let handler = RecordingHandler::new();
    let controller =
        SessionController::new(&config, store, client.clone(), handler.clone(), PausedClock::new(NOW));
    Ok(Harness { controller, client, handler })
}

/// Controller over a jar that stops accepting writes once seeded.
fn read_only_harness(client: Arc<ScriptedClient>) -> anyhow::Result<(Harness, Arc<FlakyJar>)> {
    let config = fast_config();
    let jar = FlakyJar::new();
    let store =
        TokenStore::new(CookieStore::new(jar.clone(), CookieOptions::default(), vec![]), &config);
    store.set_refresh_token("refresh-1")?;
    jar.fail_writes(true);

    let handler = RecordingHandler::new();
    let controller =
        SessionController::new(&config, store, client.clone(), handler.clone(), PausedClock::new(NOW));
    Ok((Harness { controller, client, handler }, jar))
}

fn stored(h: &Harness) -> anyhow::Result<Option<BearerToken>> {
    Ok(h.controller.store().access_token()?)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn healthy_token_is_refreshed_when_it_runs_out() -> anyhow::Result<()> {
    let fresh = lifetime_token(NOW + 10 * HOUR, 24 * HOUR, 24 * HOUR);
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 10 * HOUR)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(fresh.clone())]),
    )?;
    let mut events = h.controller.subscribe();

    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.client.calls(), 0);
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    sleep(secs(10 * HOUR - 10)).await;
    assert_eq!(h.client.calls(), 0);

    sleep(secs(20)).await;
    assert_eq!(h.client.calls(), 1);
    assert_eq!(h.client.tokens_seen(), vec!["refresh-1".to_owned()]);
    assert!(stored(&h)? == Some(fresh));
    assert!(matches!(events.try_recv()?, SessionEvent::Refreshed { expires_in_secs: 86400 }));
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn past_half_life_at_wake_refreshes() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 11 * HOUR)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(lifetime_token(NOW + 11 * HOUR, 24 * HOUR, 24 * HOUR))]),
    )?;

    h.controller.start();
    sleep(secs(11 * HOUR - 10)).await;
    assert_eq!(h.client.calls(), 0);

    sleep(secs(20)).await;
    assert_eq!(h.client.calls(), 1);

    // Next check is half of the new 24h window away.
    sleep(secs(11 * HOUR)).await;
    assert_eq!(h.client.calls(), 1);

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn near_expiry_refreshes_right_after_init_delay() -> anyhow::Result<()> {
    let fresh = lifetime_token(NOW + 1, 24 * HOUR, 24 * HOUR);
    let h = harness(
        SessionConfig::default(),
        Some(lifetime_token(NOW, 24 * HOUR, 120)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(fresh.clone())]),
    )?;

    h.controller.start();
    sleep(Duration::from_millis(900)).await;
    assert_eq!(h.client.calls(), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.client.calls(), 1);
    assert!(stored(&h)? == Some(fresh));

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_access_token_refreshes_at_start() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        None,
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(lifetime_token(NOW, HOUR, HOUR))]),
    )?;

    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.client.calls(), 1);
    assert!(stored(&h)?.is_some());

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_token_logs_out_once_and_stops() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Err(RefreshError::Unauthorized("HTTP 401".to_owned()))]),
    )?;
    let mut events = h.controller.subscribe();

    h.controller.start();
    sleep(secs(1)).await;

    assert_eq!(h.client.calls(), 1);
    assert_eq!(
        h.handler.calls(),
        vec![(LogoutReason::RefreshTokenExpired, "HTTP 401".to_owned())]
    );
    assert_eq!(h.controller.state(), SchedulerState::Stopped);
    assert!(matches!(events.try_recv()?, SessionEvent::Unauthorized { .. }));
    assert!(matches!(events.try_recv()?, SessionEvent::Stopped { .. }));

    // No further attempts, scheduled or manual.
    sleep(secs(48 * HOUR)).await;
    assert_eq!(h.controller.refresh_now().await, RefreshOutcome::Halted);
    assert_eq!(h.client.calls(), 1);
    assert_eq!(h.handler.calls().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_refresh_token_stops_without_calls() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        None,
        ScriptedClient::new(vec![]),
    )?;

    h.controller.start();
    sleep(secs(HOUR)).await;

    assert_eq!(h.client.calls(), 0);
    assert!(h.handler.calls().is_empty());
    assert_eq!(h.controller.state(), SchedulerState::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_token_removed_while_armed_stops_at_next_check() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 2 * HOUR)),
        Some("refresh-1"),
        ScriptedClient::new(vec![]),
    )?;

    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    h.controller.store().clear()?;
    sleep(secs(3 * HOUR)).await;

    assert_eq!(h.client.calls(), 0);
    assert!(h.handler.calls().is_empty());
    assert_eq!(h.controller.state(), SchedulerState::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn overlapping_triggers_make_one_call() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        Some("refresh-1"),
        ScriptedClient::with_latency(
            vec![Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR))],
            Duration::from_millis(100),
        ),
    )?;

    let (a, b, c) = tokio::join!(
        h.controller.refresh_now(),
        h.controller.refresh_now(),
        h.controller.refresh_now()
    );

    let outcomes = [a, b, c];
    let refreshed = outcomes.iter().filter(|o| **o == RefreshOutcome::Refreshed).count();
    let skipped = outcomes.iter().filter(|o| **o == RefreshOutcome::Skipped).count();
    assert_eq!((refreshed, skipped), (1, 2));
    assert_eq!(h.client.calls(), 1);
    assert_eq!(h.client.max_in_flight(), 1);
    assert!(!h.controller.is_refreshing());
    assert_eq!(h.controller.state(), SchedulerState::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_during_scheduled_refresh_is_skipped() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        Some("refresh-1"),
        ScriptedClient::with_latency(
            vec![Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR))],
            secs(5),
        ),
    )?;

    h.controller.start();
    sleep(secs(1)).await;
    assert!(h.controller.is_refreshing());
    assert_eq!(h.controller.state(), SchedulerState::Refreshing);

    assert_eq!(h.controller.refresh_now().await, RefreshOutcome::Skipped);
    sleep(secs(10)).await;
    assert_eq!(h.client.calls(), 1);
    assert_eq!(h.client.max_in_flight(), 1);
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_discards_in_flight_result() -> anyhow::Result<()> {
    let old = lifetime_token(NOW, 24 * HOUR, 60);
    let h = harness(
        fast_config(),
        Some(old.clone()),
        Some("refresh-1"),
        ScriptedClient::with_latency(
            vec![Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR))],
            secs(5),
        ),
    )?;

    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.client.calls(), 1);

    h.controller.stop();
    sleep(secs(48 * HOUR)).await;

    assert!(stored(&h)? == Some(old));
    assert_eq!(h.client.calls(), 1);
    assert_eq!(h.controller.state(), SchedulerState::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_before_init_delay_prevents_any_call() -> anyhow::Result<()> {
    let h = harness(
        SessionConfig::default(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        Some("refresh-1"),
        ScriptedClient::new(vec![]),
    )?;

    h.controller.start();
    sleep(Duration::from_millis(500)).await;
    h.controller.stop();
    sleep(secs(HOUR)).await;

    assert_eq!(h.client.calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failure_at_start_retries_shortly() -> anyhow::Result<()> {
    let transient = || Err(RefreshError::Transient("HTTP 503".to_owned()));
    let fresh = lifetime_token(NOW + 37, 24 * HOUR, 24 * HOUR);
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 300)),
        Some("refresh-1"),
        ScriptedClient::new(vec![transient(), transient(), transient(), transient(), Ok(fresh.clone())]),
    )?;
    let mut events = h.controller.subscribe();

    h.controller.start();
    // One call plus three retries at 1s, 2s and 4s.
    sleep(secs(20)).await;
    assert_eq!(h.client.calls(), 4);
    assert!(matches!(events.try_recv()?, SessionEvent::RefreshFailed { .. }));
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    sleep(secs(20)).await;
    assert_eq!(h.client.calls(), 5);
    assert!(stored(&h)? == Some(fresh));
    assert!(matches!(events.try_recv()?, SessionEvent::Refreshed { .. }));
    assert!(h.handler.calls().is_empty());

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn out_of_band_token_is_used_for_next_interval() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 10 * HOUR)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(lifetime_token(NOW + 22 * HOUR, 24 * HOUR, 24 * HOUR))]),
    )?;

    h.controller.start();
    sleep(secs(HOUR)).await;
    // Another tab stored a fresh 24h token.
    h.controller.store().set_access_token(&lifetime_token(NOW + HOUR, 24 * HOUR, 24 * HOUR))?;

    // Wake at 10h finds 15h left: not due, re-armed for 12h.
    sleep(secs(10 * HOUR)).await;
    assert_eq!(h.client.calls(), 0);
    assert_eq!(h.controller.state(), SchedulerState::Armed);

    sleep(secs(12 * HOUR)).await;
    assert_eq!(h.client.calls(), 1);

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_resumes_scheduling() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 60)),
        Some("refresh-1"),
        ScriptedClient::new(vec![
            Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR)),
            Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR)),
        ]),
    )?;

    h.controller.start();
    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.client.calls(), 1);

    h.controller.stop();
    h.controller.store().set_access_token(&lifetime_token(NOW, 24 * HOUR, 60))?;
    h.controller.start();
    sleep(secs(1)).await;
    assert_eq!(h.client.calls(), 2);

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unwritable_jar_fails_the_refresh() -> anyhow::Result<()> {
    let (h, _jar) = read_only_harness(ScriptedClient::new(vec![Ok(lifetime_token(
        NOW,
        24 * HOUR,
        24 * HOUR,
    ))]))?;
    let mut events = h.controller.subscribe();

    let outcome = h.controller.refresh_now().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(RefreshError::Transient(_))), "{outcome:?}");
    assert_eq!(stored(&h)?, None);
    assert!(matches!(events.try_recv()?, SessionEvent::RefreshFailed { .. }));
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unwritable_jar_backs_off_instead_of_spinning() -> anyhow::Result<()> {
    let fresh = || Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR));
    let (h, jar) =
        read_only_harness(ScriptedClient::new(vec![fresh(), fresh(), fresh(), fresh()]))?;

    h.controller.start();
    // Attempts at 0s and 30s only.
    sleep(secs(59)).await;
    assert_eq!(h.client.calls(), 2);
    assert_eq!(stored(&h)?, None);

    jar.fail_writes(false);
    sleep(secs(2)).await;
    assert_eq!(h.client.calls(), 3);
    assert!(stored(&h)?.is_some());

    h.controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_after_stop_makes_no_call() -> anyhow::Result<()> {
    let h = harness(
        fast_config(),
        Some(lifetime_token(NOW, 24 * HOUR, 10 * HOUR)),
        Some("refresh-1"),
        ScriptedClient::new(vec![Ok(lifetime_token(NOW, 24 * HOUR, 24 * HOUR))]),
    )?;

    h.controller.start();
    sleep(secs(1)).await;
    h.controller.stop();

    assert_eq!(h.controller.refresh_now().await, RefreshOutcome::Halted);
    assert_eq!(h.client.calls(), 0);
    assert_eq!(h.controller.state(), SchedulerState::Idle);
    Ok(())
}

#[test]
fn closures_are_logout_handlers() -> anyhow::Result<()> {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Arc<dyn UnauthorizedHandler> =
        Arc::new(move |reason: LogoutReason, details: &str| {
            sink.lock().push(format!("{reason}: {details}"));
        });

    handler.handle_unauthorized(LogoutReason::RefreshTokenExpired, "HTTP 403");

    assert_eq!(*seen.lock(), vec!["refresh token expired: HTTP 403".to_owned()]);
    Ok(())
}

#[test]
fn events_serialize_with_tag() -> anyhow::Result<()> {
    let json = serde_json::to_value(SessionEvent::Unauthorized {
        reason: LogoutReason::RefreshTokenExpired,
    })?;
    assert_eq!(
        json,
        serde_json::json!({ "event": "unauthorized", "reason": "refresh_token_expired" })
    );
    Ok(())
}
