//! WebSocket feed: subscriptions, heartbeat, reconnect.
//!
//! One connection carries every subscription. The read loop never touches
//! engine state; parsed events are forwarded over a channel and handled on
//! the engine task in arrival order. A reconnect is itself an event so the
//! engine can force a reconciliation after any gap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::types::{parse_f64, OrderUpdate, SpotBalance, UserFills, WsEnvelope, WsEvent};

/// Application-level heartbeat; the venue drops quiet connections.
const PING_INTERVAL: Duration = Duration::from_secs(50);

/// No frame for this long means the connection is dead even if the socket
/// has not errored.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

pub struct WsFeed {
    url: String,
    user: String,
    coin: String,
    mids: RwLock<HashMap<String, f64>>,
}

impl WsFeed {
    /// Spawn the feed worker. Events arrive on `events_tx`; the returned
    /// handle also serves informational mid lookups.
    pub fn spawn(url: &str, user: &str, coin: &str, events_tx: mpsc::Sender<WsEvent>) -> Arc<Self> {
        let feed = Arc::new(Self {
            url: url.to_string(),
            user: user.to_string(),
            coin: coin.to_string(),
            mids: RwLock::new(HashMap::new()),
        });

        let worker = feed.clone();
        tokio::spawn(async move {
            worker.run(events_tx).await;
        });

        feed
    }

    /// Latest mid for a coin, informational only.
    pub fn mid_for(&self, coin: &str) -> Option<f64> {
        self.mids.read().get(coin).copied()
    }

    async fn run(self: Arc<Self>, events_tx: mpsc::Sender<WsEvent>) {
        let mut reconnect_delay = Duration::from_secs(1);
        let mut first_connection = true;

        loop {
            match self.connect_and_stream(&events_tx, first_connection).await {
                Ok(_) => {
                    // Channel closed: the engine is gone, stop quietly.
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "websocket feed dropped; reconnecting");
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
            first_connection = false;
            // A full connect+subscribe cycle counts as recovery.
        }
    }

    async fn connect_and_stream(
        &self,
        events_tx: &mpsc::Sender<WsEvent>,
        first_connection: bool,
    ) -> Result<()> {
        info!(url = %self.url, "connecting websocket feed");
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .context("websocket connect failed")?;
        let (mut write, mut read) = ws_stream.split();

        for sub in self.subscriptions() {
            let msg = json!({"method": "subscribe", "subscription": sub});
            write
                .send(Message::Text(msg.to_string()))
                .await
                .context("failed to send subscription")?;
        }
        info!("websocket feed connected and subscribed");

        if !first_connection && events_tx.send(WsEvent::Reconnected).await.is_err() {
            return Ok(());
        }

        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut idle_deadline = Instant::now() + IDLE_TIMEOUT;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write
                        .send(Message::Text(json!({"method": "ping"}).to_string()))
                        .await;
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    return Err(anyhow!("no frames for {IDLE_TIMEOUT:?}"));
                }
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        return Err(anyhow!("websocket stream ended"));
                    };
                    idle_deadline = Instant::now() + IDLE_TIMEOUT;

                    match ws_msg {
                        Ok(Message::Text(text)) => {
                            if let Some(event) = self.handle_text(&text) {
                                if events_tx.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            return Err(anyhow!("websocket closed: {frame:?}"));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(anyhow!("websocket error: {e}"));
                        }
                    }
                }
            }
        }
    }

    fn subscriptions(&self) -> Vec<serde_json::Value> {
        vec![
            json!({"type": "allMids"}),
            json!({"type": "l2Book", "coin": self.coin}),
            json!({"type": "orderUpdates", "user": self.user}),
            json!({"type": "userFills", "user": self.user}),
            json!({"type": "webData2", "user": self.user}),
        ]
    }

    fn handle_text(&self, text: &str) -> Option<WsEvent> {
        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!(error = %e, "unparseable websocket frame");
                return None;
            }
        };

        match envelope.channel.as_str() {
            "orderUpdates" => {
                match serde_json::from_value::<Vec<OrderUpdate>>(envelope.data) {
                    Ok(updates) => Some(WsEvent::OrderUpdates(updates)),
                    Err(e) => {
                        warn!(error = %e, "bad orderUpdates payload");
                        None
                    }
                }
            }
            "userFills" => match serde_json::from_value::<UserFills>(envelope.data) {
                Ok(fills) => Some(WsEvent::Fills(fills)),
                Err(e) => {
                    warn!(error = %e, "bad userFills payload");
                    None
                }
            },
            "webData2" => {
                let balances = envelope
                    .data
                    .pointer("/spotState/balances")
                    .and_then(|b| serde_json::from_value::<Vec<SpotBalance>>(b.clone()).ok());
                balances.map(WsEvent::Balances)
            }
            "allMids" => {
                let mids: HashMap<String, String> = envelope
                    .data
                    .get("mids")
                    .and_then(|m| serde_json::from_value(m.clone()).ok())
                    .unwrap_or_default();
                {
                    let mut cache = self.mids.write();
                    for (coin, px) in &mids {
                        cache.insert(coin.clone(), parse_f64(px));
                    }
                }
                Some(WsEvent::Mids(mids))
            }
            "l2Book" => {
                let best_bid = envelope.data.pointer("/levels/0/0/px").and_then(|v| v.as_str());
                let best_ask = envelope.data.pointer("/levels/1/0/px").and_then(|v| v.as_str());
                debug!(coin = %self.coin, ?best_bid, ?best_ask, "book top");
                None
            }
            "subscriptionResponse" | "pong" => None,
            other => {
                debug!(channel = %other, "ignoring websocket channel");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn feed() -> WsFeed {
        WsFeed {
            url: "wss://example.invalid/ws".to_string(),
            user: "0xabc".to_string(),
            coin: "PURR/USDC".to_string(),
            mids: RwLock::new(HashMap::new()),
        }
    }

    #[test]
    fn order_updates_roundtrip() {
        let f = feed();
        let text = r#"{"channel":"orderUpdates","data":[
            {"order":{"coin":"PURR/USDC","side":"A","limitPx":"1.006","sz":"10.0","oid":91},
             "status":"open","statusTimestamp":1}]}"#;
        match f.handle_text(text) {
            Some(WsEvent::OrderUpdates(updates)) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].status, "open");
                assert_eq!(Side::from_wire(&updates[0].order.side), Some(Side::Sell));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fills_carry_tids() {
        let f = feed();
        let text = r#"{"channel":"userFills","data":{"isSnapshot":true,"user":"0xabc","fills":[
            {"coin":"PURR/USDC","px":"1.006","sz":"4.0","side":"A","oid":91,"tid":555}]}}"#;
        match f.handle_text(text) {
            Some(WsEvent::Fills(fills)) => {
                assert!(fills.is_snapshot);
                assert_eq!(fills.fills[0].tid, 555);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn mids_update_cache() {
        let f = feed();
        let text = r#"{"channel":"allMids","data":{"mids":{"PURR/USDC":"1.0045"}}}"#;
        assert!(matches!(f.handle_text(text), Some(WsEvent::Mids(_))));
        assert_eq!(f.mid_for("PURR/USDC"), Some(1.0045));
    }

    #[test]
    fn webdata2_extracts_balances() {
        let f = feed();
        let text = r#"{"channel":"webData2","data":{"spotState":{"balances":[
            {"coin":"PURR","total":"120.5","hold":"0.0"},
            {"coin":"USDC","total":"950.0","hold":"10.0"}]}}}"#;
        match f.handle_text(text) {
            Some(WsEvent::Balances(balances)) => {
                assert_eq!(balances.len(), 2);
                assert_eq!(balances[0].coin, "PURR");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn noise_channels_are_dropped() {
        let f = feed();
        assert!(f.handle_text(r#"{"channel":"pong"}"#).is_none());
        assert!(f
            .handle_text(r#"{"channel":"subscriptionResponse","data":{}}"#)
            .is_none());
        assert!(f.handle_text("not json").is_none());
    }
}
