//! End-to-end pipeline test: catalog a device, connect, reconcile its
//! punches, and deliver the canonical batch to a stubbed backend.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use pdks_bridge::api::token::TokenManager;
use pdks_bridge::config::ConfigStore;
use pdks_bridge::events::{LogSink, NullSink};
use pdks_bridge::scheduler::{RecordSource, SyncScheduler};
use pdks_bridge::terminal::{
    MockConnector, MockTerminal, RawAttendance, RemoteUser, TerminalConnector, TerminalLink,
    PRIVILEGE_USER,
};
use pdks_bridge::{Device, DeviceId, Fleet, Reconciler};

fn door_a() -> Device {
    Device {
        id: DeviceId(0),
        name: "Door A".to_string(),
        ip: "10.0.0.5".to_string(),
        port: 4370,
        protocol: "TCP".to_string(),
        timeout: 30,
        password: 0,
        force_udp: false,
    }
}

fn jane_terminal() -> MockTerminal {
    MockTerminal {
        name: Some("Door A".to_string()),
        users: vec![RemoteUser {
            uid: 7,
            name: "Jane".to_string(),
            privilege: PRIVILEGE_USER,
            password: String::new(),
            group_id: String::new(),
            user_id: "7".to_string(),
            card: String::new(),
        }],
        attendance: vec![RawAttendance {
            uid: 7,
            user_id: Some("7".to_string()),
            timestamp: NaiveDate::from_ymd_opt(2025, 1, 1)
                .and_then(|d| d.and_hms_opt(8, 0, 0)),
            status: 0,
        }],
        ..MockTerminal::default()
    }
}

/// Serves one HTTP response per accepted connection, then stops.
async fn serve_responses(listener: TcpListener, responses: Vec<String>) {
    for body in responses {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = vec![0u8; 65536];
        let mut total = 0usize;
        loop {
            let Ok(n) = stream.read(&mut buf[total..]).await else {
                return;
            };
            if n == 0 {
                break;
            }
            total += n;
            let text = String::from_utf8_lossy(&buf[..total]).to_string();
            if let Some(idx) = text.find("\r\n\r\n") {
                let content_length = text[..idx]
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        line.strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if total - (idx + 4) >= content_length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

#[tokio::test]
async fn punch_flows_from_device_to_backend() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(serve_responses(
        listener,
        vec![
            r#"{"access_token":"tok1","expires_in":3600}"#.to_string(),
            r#"[{"Sonuc":true}]"#.to_string(),
        ],
    ));

    let dir = tempfile::tempdir().unwrap();
    let config = ConfigStore::load(dir.path().join("config.json")).into_shared();
    {
        let mut store = config.lock().unwrap();
        let mut api = store.api_settings();
        api.enabled = true;
        api.username = "hr-sync".to_string();
        api.password = "secret".to_string();
        api.token_url = format!("{}/Token", base_url);
        api.data_url = format!("{}/api/attendance", base_url);
        api.clear_device_on_success = true;
        store.update_api_settings(api);
    }

    let connector = Arc::new(MockConnector::new());
    connector.add_terminal("10.0.0.5", jane_terminal());

    let sink = Arc::new(NullSink) as Arc<dyn LogSink>;
    let link = Arc::new(TerminalLink::new(
        connector.clone() as Arc<dyn TerminalConnector>,
        sink.clone(),
    ));
    let fleet = Fleet::new(
        config.clone(),
        link.clone(),
        connector.clone() as Arc<dyn TerminalConnector>,
    );

    let id = fleet.add_device(door_a());
    assert!(fleet.connect_device(id).await);

    let reconciler = Arc::new(Reconciler::new(link.clone()));

    // Reconciled view: identity resolved, status decoded.
    let entries = reconciler.collect_entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.device_name, "Door A");
    assert_eq!(entry.personnel_id, "7");
    assert_eq!(entry.user_name, "Jane");
    assert_eq!(entry.status_text, "check-in");

    // Canonical batch carries the template keys the backend expects.
    let records = RecordSource::collect(reconciler.as_ref()).await;
    assert_eq!(records.len(), 1);
    let json = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(json["CihazID"], "Door A");
    assert_eq!(json["CihazLogID"], "7");
    assert_eq!(json["CihazPersonelID"], "7");
    assert_eq!(json["Tarih"], "2025-01-01 08:00:00");

    // Deliver; confirmed processing clears the device.
    let token = TokenManager::new(config.clone(), sink.clone());
    let scheduler = SyncScheduler::new(
        config,
        token,
        reconciler.clone() as Arc<dyn RecordSource>,
        sink,
    );
    let result = scheduler.push_now(&records).await;
    assert!(result.success, "push failed: {}", result.message);
    assert_eq!(result.message, "1 records sent and processed");

    let cleared = connector.terminal("10.0.0.5").unwrap();
    assert!(cleared.attendance.is_empty());
    assert_eq!(cleared.users.len(), 1);

    server.await.unwrap();
}
