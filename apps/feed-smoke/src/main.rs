use std::{env, time::Duration};

use tracing::info;

use feed_client::{FeedClient, FeedConfig, ProbeConfig};
use feed_core::{BackoffPolicy, DomainEvent, ErrorCategory, EventKind, StreamEndpoint};
use feed_transport::{
    ProbeReport, ProbeTarget,
    scripted::{ConnectionScript, ScriptedProbe, ScriptedTransport},
};

mod logging;

const DEFAULT_RUN_MS: u64 = 1_500;

#[tokio::main]
async fn main() {
    logging::init();

    let run_for = Duration::from_millis(
        env::var("SYNCFEED_RUN_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_RUN_MS),
    );

    let transport = scripted_transport();
    let probe = scripted_probe();

    let config = FeedConfig::new(
        vec![
            StreamEndpoint::new("permissions", "/events/permissions"),
            StreamEndpoint::new("groups", "/events/groups"),
            StreamEndpoint::new("users", "/events/users"),
        ],
        ProbeConfig::new(ProbeTarget::new("sync-server", "/health"))
            .with_period(Duration::from_millis(400))
            .with_backoff(BackoffPolicy::fixed(Duration::from_millis(50), 2)),
    )
    .with_stream_backoff(BackoffPolicy::exponential(
        Duration::from_millis(100),
        2.0,
        Duration::from_secs(2),
        5,
    ));

    let client = match FeedClient::start(config, transport, probe) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    for kind in [
        EventKind::LogBroadcast,
        EventKind::PreSync,
        EventKind::PostSync,
        EventKind::PreNetworkSync,
        EventKind::PostNetworkSync,
        EventKind::CustomMessage,
    ] {
        client.register_consumer(kind, |event| {
            println!("event: {event:?}");
            Ok(())
        });
    }
    client.register_consumer(EventKind::ConnectionStateChanged, |event| {
        if let DomainEvent::ConnectionStateChanged {
            stream,
            state,
            message,
            ..
        } = event
        {
            println!("state: {stream} -> {state:?} ({message})");
        }
        Ok(())
    });

    info!(run_ms = run_for.as_millis() as u64, "smoke run started");
    tokio::time::sleep(run_for).await;
    client.shutdown().await;

    let stats = client.all_connection_stats();
    println!(
        "connection stats: {}",
        serde_json::to_string_pretty(&stats).expect("stats serialize")
    );
    println!(
        "health status: {}",
        serde_json::to_string_pretty(&client.health_status()).expect("health serialize")
    );
}

/// Three streams: one clean, one that drops and recovers, one that keeps
/// failing so the retry path shows up in the output.
fn scripted_transport() -> ScriptedTransport {
    let transport = ScriptedTransport::new();

    transport.push_script(
        "permissions",
        ConnectionScript::new()
            .open()
            .frame("pre_sync", br#"{"cause":"startup"}"#.to_vec())
            .delay(Duration::from_millis(120))
            .frame(
                "post_sync",
                br#"{"cause":"startup","didSyncOccur":true}"#.to_vec(),
            )
            .frame("log_broadcast", br#"{"message":"permission cache warm"}"#.to_vec()),
    );

    transport.push_script(
        "groups",
        ConnectionScript::new()
            .open()
            .frame(
                "pre_network_sync",
                br#"{"syncId":"run-1","syncType":"full"}"#.to_vec(),
            )
            .delay(Duration::from_millis(200))
            .fail(ErrorCategory::Network, "socket_reset", "connection reset"),
    );
    transport.push_script(
        "groups",
        ConnectionScript::new()
            .open()
            .frame(
                "post_network_sync",
                br#"{"syncId":"run-1","syncType":"full","didSyncOccur":true}"#.to_vec(),
            )
            .frame(
                "custom_message",
                br#"{"channel":"ops","message":"resynced after drop"}"#.to_vec(),
            ),
    );

    // "users" never gets a script, so every open fails and the stream walks
    // its backoff schedule into Failed.
    transport
}

/// One failing probe cycle before steady healthy reports.
fn scripted_probe() -> ScriptedProbe {
    let probe = ScriptedProbe::new();
    probe.push_report(ProbeReport::transport_failure(45, "connect refused"));
    probe.push_report(ProbeReport::transport_failure(51, "connect refused"));
    probe
}
