//! End-to-end exercises of the concrete scenarios in spec.md §8, wiring
//! together components the way `Gateway` does rather than testing them
//! in isolation.

use chrono::{DateTime, Utc};
use ramses_gateway::cfg::config::{FilterConfig, QosConfig};
use ramses_gateway::dispatcher::qos::{Action, QosDispatcher};
use ramses_gateway::entity::store::EntityStore;
use ramses_gateway::filter::FilterGate;
use ramses_gateway::model::address::DeviceId;
use ramses_gateway::model::message::MessageDecoder;
use ramses_gateway::model::packet;
use ramses_gateway::model::payload::DecodedPayload;
use ramses_gateway::model::{opcode::Code, verb::Verb};
use ramses_gateway::queue::command::Command;
use ramses_gateway::transport::line_source::LineSource;

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid")
}

fn qos_config() -> QosConfig {
    QosConfig {
        reply_deadline_initial_ms: 2_500,
        reply_deadline_retry_ms: 1_000,
        backoff_base_ms: 100,
        backoff_ceiling_ms: 5_000,
        max_retries_default: 3,
        duty_cycle_ceiling: 1.0,
        bytes_overhead_per_byte: 1.3,
        fragment_expiry_secs: 30,
        queue_capacity: 10,
    }
}

/// Scenario 1: one line decodes through FrameCodec -> FilterGate ->
/// MessageDecoder -> EntityStore, admitting the controller that sent it.
#[test]
fn scenario_1_line_flows_through_the_whole_pipeline() {
    let line = "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF073F";
    let pkt = packet::decode(line, ts(0)).expect("decodes");

    let filter = FilterGate::new(&FilterConfig::default());
    assert!(filter.admit(&pkt.addresses));

    let mut decoder = MessageDecoder::new(std::time::Duration::from_secs(30));
    let msg = decoder.decode(&pkt).expect("decodes").expect("message present");
    assert_eq!(msg.payload, DecodedPayload::SystemSync { period_ms: 0x073F * 10 });

    let mut store = EntityStore::new(12);
    store.ingest(&msg, ramses_gateway::cfg::enums::RawOutputTier::Full).expect("ingested");
    assert!(store.device(&"01:145038".parse().unwrap()).is_some());
    assert_eq!(store.primary_controller(), Some("01:145038".parse().unwrap()));
}

/// Scenario 2: two equal-priority requests to the same `(dest, code)`;
/// the dispatcher sends the first, holds the second back until the
/// first is acked, then dispatches it in turn.
#[test]
fn scenario_2_second_command_waits_for_the_firsts_reply() {
    let mut dispatcher = QosDispatcher::new(qos_config());
    let dest: DeviceId = "01:145038".parse().expect("valid address");
    let a = Command::new(Verb::RQ, dest, Code::RELAY_DEMAND, vec![0x00, 0x00]);
    let b = Command::new(Verb::RQ, dest, Code::RELAY_DEMAND, vec![0x00, 0x01]);
    dispatcher.queue_mut().enqueue(a).expect("fits");
    dispatcher.queue_mut().enqueue(b).expect("fits");

    let first = match dispatcher.poll(ts(0)) {
        Action::Transmit(cmd) => cmd,
        Action::Idle => panic!("expected the first command"),
    };
    assert_eq!(first.payload, vec![0x00, 0x00]);
    dispatcher.on_transmitted(first, ts(0));

    assert!(matches!(dispatcher.poll(ts(0)), Action::Idle), "second must wait for the reply");

    let unrelated = ramses_gateway::model::message::Message {
        recv_ts: ts(1),
        verb: Verb::RP,
        src: dest,
        dest: DeviceId::NONE,
        code: Code::SYSTEM_SYNC,
        payload: DecodedPayload::SystemSync { period_ms: 0 },
        zone_idx: None,
        domain: None,
    };
    assert!(dispatcher.on_message(&unrelated).is_none(), "reply code does not match the outstanding RELAY_DEMAND request");

    let ack = ramses_gateway::model::message::Message {
        recv_ts: ts(1),
        verb: Verb::RP,
        src: dest,
        dest: DeviceId::NONE,
        code: Code::RELAY_DEMAND,
        payload: DecodedPayload::RelayDemand {
            scope: ramses_gateway::model::payload::Scope::System,
            demand_pct: 0,
        },
        zone_idx: None,
        domain: None,
    };
    assert!(dispatcher.on_message(&ack).is_some());

    let second = match dispatcher.poll(ts(1)) {
        Action::Transmit(cmd) => cmd,
        Action::Idle => panic!("expected the second command now that the first is acked"),
    };
    assert_eq!(second.payload, vec![0x00, 0x01]);
}

/// Scenario 2 continued: two retries, then both commands give up with
/// `Timeout` once the reply deadline is exhausted.
#[test]
fn scenario_2_gives_up_with_timeout_after_two_retries() {
    let mut dispatcher = QosDispatcher::new(qos_config());
    let dest: DeviceId = "01:145038".parse().expect("valid address");
    let cmd = Command::new(Verb::RQ, dest, Code::RELAY_DEMAND, vec![0x00]).with_retries(2);
    dispatcher.on_transmitted(cmd, ts(0));

    let mut now = ts(0);
    let mut given_up = Vec::new();
    for _ in 0..6 {
        now += chrono::Duration::seconds(3);
        let just_given_up = dispatcher.sweep_timeouts(now);
        given_up.extend(just_given_up);
        dispatcher.requeue_ready_retries(now);
        if let Action::Transmit(cmd) = dispatcher.poll(now) {
            dispatcher.on_transmitted(cmd, now);
        }
        if !given_up.is_empty() {
            break;
        }
    }
    assert_eq!(given_up.len(), 1, "command should have exhausted its two retries");
}

/// Scenario 3: a replay line whose timestamp lacks microseconds is
/// silently dropped; the line after it is processed normally.
#[tokio::test]
async fn scenario_3_replay_drops_a_malformed_timestamp_line() {
    let path = std::env::temp_dir().join(format!("ramses-replay-test-{}.log", std::process::id()));
    let contents = concat!(
        "2023-11-05T12:30:00 045  I --- 01:145038 --:------ 01:145038 1F09 003 FF073F\n",
        "2023-11-05T12:30:01.000000 045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0740\n",
    );
    tokio::fs::write(&path, contents).await.expect("writes fixture");

    let mut source = LineSource::open_replay(&path).await.expect("opens replay");
    let (line, _ts) = source.next_line().await.expect("reads").expect("one line survives");
    assert_eq!(line, "045  I --- 01:145038 --:------ 01:145038 1F09 003 FF0740");
    assert!(source.next_line().await.expect("reads").is_none());

    let _ = tokio::fs::remove_file(&path).await;
}

/// Scenario 4: an address outside the enforced known-list is dropped
/// before it ever reaches the decoder.
#[test]
fn scenario_4_known_list_filters_unknown_addresses() {
    let mut known = std::collections::HashMap::new();
    known.insert("01:145038".to_string(), Default::default());
    let cfg = FilterConfig { enforce_known_list: true, known_list: known, block_list: Default::default() };
    let filter = FilterGate::new(&cfg);

    let admitted = packet::decode(
        "045  I --- 01:145038 --:------ 04:000001 1F09 003 FF073F",
        ts(0),
    )
    .expect("decodes");
    assert!(filter.admit(&admitted.addresses));

    let rejected =
        packet::decode("045  I --- 30:111111 --:------ 30:222222 1F09 003 FF073F", ts(0))
            .expect("decodes");
    assert!(!filter.admit(&rejected.addresses));
}
