//! End-to-end session scenarios against the simulated device.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;

use acelink_core::protocol::{CommandError, Session, SessionConfig};
use acelink_core::sim::SimDevice;

fn test_config() -> SessionConfig {
    SessionConfig {
        command_timeout: Duration::from_millis(200),
        settle_delay: Duration::ZERO,
        write_guard: Duration::from_millis(1),
        poll_interval: Duration::from_millis(2),
        ..SessionConfig::default()
    }
}

fn session_over(device: &SimDevice) -> Session {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let session = Session::new(Box::new(device.clone()), test_config());
    session.connect().expect("sim connect cannot fail");
    session
}

#[test]
fn feed_encodes_expected_payload_and_succeeds() {
    let device = SimDevice::new();
    let session = session_over(&device);

    session.feed(0, 100.0, 50).expect("feed should succeed");

    let requests = device.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "feed");
    assert_eq!(
        requests[0].params,
        json!({"index": 0, "len": 100, "speed": 50})
            .as_object()
            .cloned()
    );
}

#[test]
fn facade_clamps_speed_and_drops_retract_sign() {
    let device = SimDevice::new();
    let session = session_over(&device);

    session.feed(2, 10.4, 500).unwrap();
    session.retract(1, -25.4, 5).unwrap();

    let requests = device.requests();
    assert_eq!(
        requests[0].params,
        json!({"index": 2, "len": 10, "speed": 80}).as_object().cloned()
    );
    assert_eq!(requests[1].method, "back");
    assert_eq!(
        requests[1].params,
        json!({"index": 1, "len": 25, "speed": 10}).as_object().cloned()
    );
}

#[test]
fn get_info_deserializes_identity() {
    let device = SimDevice::new();
    device.set_identity("ACE Pro", "v2.1.0", Some("SN-77"), Some("aa:bb:cc:dd:ee:ff"));
    let session = session_over(&device);

    let info = session.get_info().unwrap();
    assert_eq!(info.model.as_deref(), Some("ACE Pro"));
    assert_eq!(info.firmware.as_deref(), Some("v2.1.0"));
    assert_eq!(info.serial_number.as_deref(), Some("SN-77"));
    assert_eq!(info.mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
}

#[test]
fn get_status_reports_per_slot_states() {
    let device = SimDevice::new();
    let session = session_over(&device);

    let status = session.get_status().unwrap();
    assert_eq!(status["slots"][0]["status"], json!("ready"));
    assert_eq!(status["slots"][1]["status"], json!("empty"));
    assert_eq!(status["slots"].as_array().map(Vec::len), Some(4));
}

#[test]
fn feed_assist_methods_and_params() {
    let device = SimDevice::new();
    let session = session_over(&device);

    session.set_feed_assist(3, true).unwrap();
    session.set_feed_assist(3, false).unwrap();

    let requests = device.requests();
    assert_eq!(requests[0].method, "feed_assist");
    assert_eq!(
        requests[0].params,
        json!({"index": 3}).as_object().cloned()
    );
    assert_eq!(requests[1].method, "feed_assist_off");
    assert_eq!(requests[1].params, None);
}

#[test]
fn dryer_defaults_to_240_minutes() {
    let device = SimDevice::new();
    let session = session_over(&device);

    session.start_dryer(55, None).unwrap();
    session.start_dryer(45, Some(90)).unwrap();
    session.stop_dryer().unwrap();

    let requests = device.requests();
    assert_eq!(
        requests[0].params,
        json!({"temp": 55, "time": 240}).as_object().cloned()
    );
    assert_eq!(
        requests[1].params,
        json!({"temp": 45, "time": 90}).as_object().cloned()
    );
    assert_eq!(requests[2].method, "dryer_stop");
}

#[test]
fn silent_device_times_out_within_budget() {
    let device = SimDevice::new();
    device.set_mute(true);
    let session = session_over(&device);

    let start = Instant::now();
    let result = session.send_command("get_status", None);
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(CommandError::Timeout { .. })));
    // Bounded by the 200ms budget, not hanging
    assert!(elapsed >= Duration::from_millis(190), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(900), "blocked too long: {elapsed:?}");
}

#[test]
fn transport_error_reconnects_and_retries_once() {
    let device = SimDevice::new();
    let session = session_over(&device);
    assert_eq!(device.connect_count(), 1);

    device.fail_writes(1);
    session.feed(0, 50.0, 30).expect("retry after reconnect should succeed");

    assert_eq!(device.connect_count(), 2);
    let requests = device.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "feed");
}

#[test]
fn second_transport_failure_gives_up() {
    let device = SimDevice::new();
    let session = session_over(&device);

    device.fail_writes(2);
    let result = session.send_command("get_status", None);

    assert!(matches!(result, Err(CommandError::Transport(_))));
    // Initial connect plus exactly one reconnect, no third attempt
    assert_eq!(device.connect_count(), 2);
    assert!(device.requests().is_empty());

    // The reconnected link is healthy for the next command
    session.get_status().expect("link should be usable again");
}

#[test]
fn corrupt_frame_is_discarded_and_wait_continues() {
    let device = SimDevice::new();
    device.corrupt_next_response();
    let session = session_over(&device);

    let status = session.get_status().expect("intact copy should be decoded");
    assert_eq!(status["slots"][0]["status"], json!("ready"));
}

#[test]
fn mismatched_response_id_is_discarded() {
    let device = SimDevice::new();
    device.respond_with_wrong_id();
    let session = session_over(&device);

    let result = session.send_command("get_status", None);
    assert!(matches!(result, Err(CommandError::Timeout { .. })));
    assert_eq!(device.requests().len(), 1);
}

#[test]
fn device_error_payload_is_a_tagged_failure() {
    let device = SimDevice::new();
    let session = session_over(&device);

    let result = session.send_command("bogus_method", None);
    match result {
        Err(CommandError::Device(error)) => assert_eq!(error, json!("unknown method")),
        other => panic!("expected device error, got {other:?}"),
    }
}

#[test]
fn disconnect_is_idempotent_and_commands_need_a_link() {
    let device = SimDevice::new();
    let session = session_over(&device);
    assert!(session.is_open());

    session.disconnect();
    session.disconnect();
    assert!(!session.is_open());

    let result = session.get_status();
    assert!(matches!(result, Err(CommandError::NotConnected)));
}

#[test]
fn request_ids_increase_across_commands() {
    let device = SimDevice::new();
    let session = session_over(&device);

    session.get_status().unwrap();
    session.get_status().unwrap();
    session.get_status().unwrap();

    let ids: Vec<u32> = device.requests().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
