mod common;

use std::time::Duration;

use common::{ac, harness, harness_with_tick, start_time};
use tornado_ac::{DeviceId, Error, ExpiryOutcome, TimerAction, TimerStatus, params_of};

const MINUTE: Duration = Duration::from_secs(60);

async fn settled(engine: &tornado_ac::TimerEngine<common::FakeClient>) -> TimerStatus {
    let mut rx = engine.subscribe();
    let status = rx
        .wait_for(|s| {
            s.last_expiry
                .as_ref()
                .is_some_and(|r| r.outcome != ExpiryOutcome::Pending)
        })
        .await
        .expect("engine alive")
        .clone();
    status
}

#[tokio::test]
async fn five_minute_turn_off_fires_once() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    h.coordinator.refresh().await.unwrap();
    let id = DeviceId::from("dev1");
    let engine = h.coordinator.timer_engine(&id);

    engine.arm(5, TimerAction::TurnOff).unwrap();
    let status = engine.status();
    assert!(status.active);
    assert_eq!(status.remaining_minutes, 5);
    assert_eq!(status.duration_minutes, Some(5));
    assert_eq!(status.started_at, Some(start_time()));
    assert_eq!(status.ends_at, Some(start_time() + chrono::Duration::minutes(5)));

    h.scheduler.advance(MINUTE);
    let status = engine.status();
    assert!(status.active);
    assert_eq!(status.remaining_minutes, 4);

    h.scheduler.advance(4 * MINUTE);
    let status = engine.status();
    assert!(!status.active);
    assert_eq!(status.remaining_minutes, 0);
    assert!(!engine.is_armed());

    let status = settled(&engine).await;
    assert_eq!(status.last_expiry.unwrap().outcome, ExpiryOutcome::Confirmed);
    assert_eq!(h.client.set_calls(), vec![(id, params_of([("pwr", 0)]))]);

    assert_eq!(h.scheduler.live_registrations(), 0);
    assert_eq!(h.scheduler.total_created(), 1);
    assert_eq!(h.scheduler.total_cancelled(), 1);

    // Nothing left to fire.
    h.scheduler.advance(60 * MINUTE);
    tokio::task::yield_now().await;
    assert_eq!(h.client.set_calls().len(), 1);
}

#[tokio::test]
async fn zero_duration_only_cancels() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));

    engine.arm(0, TimerAction::TurnOff).unwrap();
    assert!(!engine.is_armed());
    assert_eq!(h.scheduler.total_created(), 0);

    engine.arm(30, TimerAction::TurnOff).unwrap();
    engine.arm(0, TimerAction::TurnOff).unwrap();
    assert!(!engine.status().active);
    assert_eq!(h.scheduler.total_created(), 1);
    assert_eq!(h.scheduler.total_cancelled(), 1);
    assert_eq!(h.scheduler.live_registrations(), 0);
}

#[tokio::test]
async fn failed_expiry_action_still_goes_idle() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    h.coordinator.refresh().await.unwrap();
    h.client.fail_set(true);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));

    engine.arm(2, TimerAction::TurnOff).unwrap();
    h.scheduler.advance(2 * MINUTE);

    assert!(!engine.is_armed());
    assert_eq!(h.scheduler.live_registrations(), 0);

    let status = settled(&engine).await;
    assert!(!status.active);
    let report = status.last_expiry.unwrap();
    assert_eq!(report.action, TimerAction::TurnOff);
    assert!(matches!(report.outcome, ExpiryOutcome::Failed(ref msg) if msg.contains("sdkcontrol")));
}

#[tokio::test]
async fn sleep_mode_action_sets_sleep_flag() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    h.coordinator.refresh().await.unwrap();
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));

    engine.arm(1, TimerAction::EnableSleepMode).unwrap();
    assert_eq!(engine.status().target_action, TimerAction::EnableSleepMode);
    h.scheduler.advance(MINUTE);
    settled(&engine).await;

    let calls = h.client.set_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, params_of([("ac_slp", 1)]));
}

#[tokio::test]
async fn rearm_replaces_registration() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));

    engine.arm(10, TimerAction::TurnOff).unwrap();
    h.scheduler.advance(3 * MINUTE);
    engine.arm(60, TimerAction::EnableSleepMode).unwrap();

    assert_eq!(h.scheduler.live_registrations(), 1);
    assert_eq!(h.scheduler.total_created(), 2);
    assert_eq!(h.scheduler.total_cancelled(), 1);

    let status = engine.status();
    assert_eq!(status.remaining_minutes, 60);
    assert_eq!(status.duration_minutes, Some(60));
    assert_eq!(status.started_at, Some(start_time() + chrono::Duration::minutes(3)));

    // The first deadline passing must not fire anything.
    h.scheduler.advance(10 * MINUTE);
    assert!(engine.is_armed());
    assert!(h.client.set_calls().is_empty());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));

    engine.cancel();
    engine.arm(15, TimerAction::TurnOff).unwrap();
    engine.cancel();
    let once = engine.status();
    engine.cancel();

    assert_eq!(engine.status(), once);
    assert!(!once.active);
    assert_eq!(h.scheduler.total_cancelled(), 1);
    assert_eq!(h.scheduler.live_registrations(), 0);

    h.scheduler.advance(30 * MINUTE);
    assert!(h.client.set_calls().is_empty());
}

#[tokio::test]
async fn out_of_range_duration_changes_nothing() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));
    engine.arm(20, TimerAction::TurnOff).unwrap();
    let before = engine.status();

    for bad in [-1, 481, i64::MAX] {
        let err = engine.arm(bad, TimerAction::EnableSleepMode).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration(n) if n == bad));
        assert!(!err.is_transport());
    }

    assert_eq!(engine.status(), before);
    assert_eq!(h.scheduler.total_created(), 1);
    assert_eq!(h.scheduler.live_registrations(), 1);

    engine.arm(480, TimerAction::TurnOff).unwrap();
    assert_eq!(engine.status().remaining_minutes, 480);
}

#[tokio::test]
async fn remaining_minutes_never_increase() {
    let h = harness_with_tick(vec![ac("dev1", "Bedroom")], Duration::from_secs(20));
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));
    engine.arm(3, TimerAction::TurnOff).unwrap();

    let mut rx = engine.subscribe();
    let mut seen = vec![rx.borrow_and_update().remaining_minutes];
    for _ in 0..8 {
        h.scheduler.advance(Duration::from_secs(20));
        seen.push(rx.borrow_and_update().remaining_minutes);
    }

    assert!(seen.windows(2).all(|w| w[1] <= w[0]), "{seen:?}");
    assert_eq!(seen, vec![3, 2, 2, 2, 1, 1, 1, 0, 0]);
    assert!(engine.is_armed());

    h.scheduler.advance(Duration::from_secs(20));
    assert!(!engine.is_armed());
}

#[tokio::test]
async fn teardown_without_timer_is_safe() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let engine = h.coordinator.timer_engine(&DeviceId::from("dev1"));
    engine.teardown();
    engine.teardown();
    assert!(!engine.is_armed());
    assert_eq!(h.scheduler.total_cancelled(), 0);
}

#[tokio::test]
async fn arming_after_teardown_creates_nothing() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    h.coordinator.refresh().await.unwrap();
    let id = DeviceId::from("dev1");
    let engine = h.coordinator.timer_engine(&id);
    engine.arm(30, TimerAction::TurnOff).unwrap();
    h.coordinator.remove_timer(&id);
    assert!(engine.is_torn_down());

    for minutes in [5, 0] {
        assert!(matches!(
            engine.arm(minutes, TimerAction::TurnOff),
            Err(Error::TimerTornDown(_))
        ));
    }
    assert!(!engine.is_armed());
    assert!(!engine.status().active);
    assert_eq!(h.scheduler.live_registrations(), 0);
    assert_eq!(h.scheduler.total_created(), 1);

    h.scheduler.advance(60 * MINUTE);
    tokio::task::yield_now().await;
    assert!(h.client.set_calls().is_empty());
}

#[tokio::test]
async fn new_engine_after_removal_is_the_only_one() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let id = DeviceId::from("dev1");
    let old = h.coordinator.timer_engine(&id);
    h.coordinator.remove_timer(&id);

    let current = h.coordinator.timer_engine(&id);
    assert!(!std::sync::Arc::ptr_eq(&old, &current));
    assert!(old.arm(10, TimerAction::TurnOff).is_err());
    h.coordinator.arm_timer(&id, 10, TimerAction::TurnOff).unwrap();

    assert!(current.is_armed());
    assert_eq!(h.scheduler.live_registrations(), 1);
}

#[test]
fn arming_without_runtime_is_an_error() {
    let coordinator = tornado_ac::Coordinator::builder(common::FakeClient::new(vec![ac("dev1", "Bedroom")]))
        .build()
        .unwrap();
    let engine = coordinator.timer_engine(&DeviceId::from("dev1"));

    let err = engine.arm(5, TimerAction::TurnOff).unwrap_err();
    assert!(matches!(err, Error::NoRuntime));
    assert!(!engine.is_armed());
    assert!(!engine.status().active);
}

#[test]
fn arming_from_plain_thread_uses_builder_runtime() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let coordinator = tornado_ac::Coordinator::builder(common::FakeClient::new(vec![ac("dev1", "Bedroom")]))
        .runtime(rt.handle().clone())
        .build()
        .unwrap();
    let id = DeviceId::from("dev1");
    let engine = coordinator.timer_engine(&id);

    engine.arm(5, TimerAction::TurnOff).unwrap();
    assert!(engine.is_armed());
    assert_eq!(engine.status().remaining_minutes, 5);

    coordinator.cancel_timer(&id).unwrap();
    assert!(!engine.is_armed());
}

#[tokio::test]
async fn removing_timer_releases_registration() {
    let h = harness(vec![ac("dev1", "Bedroom")]);
    let id = DeviceId::from("dev1");
    h.coordinator.timer_engine(&id).arm(45, TimerAction::TurnOff).unwrap();
    assert_eq!(h.scheduler.live_registrations(), 1);

    h.coordinator.remove_timer(&id);
    assert_eq!(h.scheduler.live_registrations(), 0);
    assert!(h.coordinator.find_timer(&id).is_none());
    assert!(matches!(
        h.coordinator.cancel_timer(&id),
        Err(Error::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn dropping_coordinator_tears_down_timers() {
    let h = harness(vec![ac("dev1", "Bedroom"), ac("dev2", "Office")]);
    h.coordinator
        .timer_engine(&DeviceId::from("dev1"))
        .arm(30, TimerAction::TurnOff)
        .unwrap();
    h.coordinator
        .timer_engine(&DeviceId::from("dev2"))
        .arm(90, TimerAction::TurnOff)
        .unwrap();
    assert_eq!(h.scheduler.live_registrations(), 2);

    let scheduler = h.scheduler.clone();
    drop(h);
    assert_eq!(scheduler.live_registrations(), 0);
}

#[tokio::test]
async fn timers_are_independent_per_device() {
    let h = harness(vec![ac("dev1", "Bedroom"), ac("dev2", "Office")]);
    h.coordinator.refresh().await.unwrap();
    let one = h.coordinator.timer_engine(&DeviceId::from("dev1"));
    let two = h.coordinator.timer_engine(&DeviceId::from("dev2"));

    one.arm(2, TimerAction::TurnOff).unwrap();
    two.arm(10, TimerAction::TurnOff).unwrap();
    h.scheduler.advance(2 * MINUTE);
    settled(&one).await;

    assert!(!one.is_armed());
    assert!(two.is_armed());
    assert_eq!(two.status().remaining_minutes, 8);
    assert_eq!(h.client.set_calls(), vec![(DeviceId::from("dev1"), params_of([("pwr", 0)]))]);
}
