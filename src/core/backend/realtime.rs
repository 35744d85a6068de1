use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{BackendError, Change, ChangeFeed, ChangeKind, Row};

const HEARTBEAT: Duration = Duration::from_secs(30);

pub(crate) fn socket_url(base_url: &str, api_key: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base,
        urlencoding::encode(api_key)
    )
}

pub(crate) fn topic(table: &str) -> String {
    format!("realtime:public:{}", table)
}

pub(crate) fn join_message(table: &str, api_key: &str) -> Value {
    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": {"self": false},
                "presence": {"key": ""},
                "postgres_changes": [
                    {"event": "*", "schema": "public", "table": table}
                ]
            },
            "access_token": api_key
        },
        "ref": "1"
    })
}

fn heartbeat_message(seq: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": seq.to_string()
    })
}

fn as_row(value: Option<&Value>) -> Option<Row> {
    value
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .cloned()
}

fn kind_of(raw: &str) -> Option<ChangeKind> {
    match raw {
        "INSERT" => Some(ChangeKind::Insert),
        "UPDATE" => Some(ChangeKind::Update),
        "DELETE" => Some(ChangeKind::Delete),
        _ => None,
    }
}

/// Decodes one server frame into a row change. Handles both the
/// `postgres_changes` envelope and the older per-event frames.
pub(crate) fn parse_change(table: &str, frame: &Value) -> Option<Change> {
    let event = frame.get("event")?.as_str()?;
    let payload = frame.get("payload")?;
    let (kind, data) = if event == "postgres_changes" {
        let data = payload.get("data")?;
        (kind_of(data.get("type")?.as_str()?)?, data)
    } else {
        (kind_of(event)?, payload)
    };
    if let Some(frame_table) = data.get("table").and_then(Value::as_str)
        && frame_table != table
    {
        return None;
    }
    Some(Change {
        table: table.to_string(),
        kind,
        new: as_row(data.get("record")),
        old: as_row(data.get("old_record")),
    })
}

/// Opens one websocket per table. The feed ends when the socket errors or
/// closes; there is no reconnect.
pub(crate) async fn subscribe(
    base_url: &str,
    api_key: &str,
    table: &str,
) -> Result<ChangeFeed, BackendError> {
    let url = socket_url(base_url, api_key);
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| BackendError::Realtime(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Text(join_message(table, api_key).to_string()))
        .await
        .map_err(|e| BackendError::Realtime(e.to_string()))?;
    info!("Subscribed to realtime changes on {}", table);

    let (tx, rx) = mpsc::channel(256);
    let table = table.to_string();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT);
        ticker.tick().await;
        let mut seq: u64 = 1;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    seq += 1;
                    if let Err(e) = sink.send(Message::Text(heartbeat_message(seq).to_string())).await {
                        error!("Realtime heartbeat for {} failed: {}", table, e);
                        break;
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("Realtime socket for {} closed", table);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            error!("Realtime socket for {} failed: {}", table, e);
                            break;
                        }
                    };
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        debug!("Ignoring non-JSON realtime frame");
                        continue;
                    };
                    if let Some(change) = parse_change(&table, &value)
                        && tx.send(change).await.is_err()
                    {
                        break;
                    }
                }
            }
        }
    });
    Ok(ChangeFeed::new(rx, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme() {
        assert_eq!(
            socket_url("https://abc.supabase.co", "k"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
        assert!(socket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn join_targets_public_table() {
        let msg = join_message("programs", "k");
        assert_eq!(msg["topic"], "realtime:public:programs");
        assert_eq!(msg["event"], "phx_join");
        assert_eq!(msg["payload"]["config"]["postgres_changes"][0]["table"], "programs");
    }

    #[test]
    fn parses_postgres_changes_envelope() {
        let frame = json!({
            "topic": "realtime:public:programs",
            "event": "postgres_changes",
            "payload": {"data": {
                "table": "programs",
                "type": "UPDATE",
                "record": {"id": 4, "status": "MA中"},
                "old_record": {"id": 4}
            }}
        });
        let change = parse_change("programs", &frame).unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.new.unwrap()["status"], "MA中");
        assert_eq!(change.old.unwrap()["id"], 4);
    }

    #[test]
    fn parses_legacy_delete_and_ignores_replies() {
        let frame = json!({
            "event": "DELETE",
            "payload": {"table": "team_dashboard", "record": {}, "old_record": {"id": "u1"}}
        });
        let change = parse_change("team_dashboard", &frame).unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.new.is_none());

        let reply = json!({"event": "phx_reply", "payload": {"status": "ok"}});
        assert!(parse_change("team_dashboard", &reply).is_none());

        let other = json!({"event": "INSERT", "payload": {"table": "programs", "record": {"id": 1}}});
        assert!(parse_change("team_dashboard", &other).is_none());
    }
}
