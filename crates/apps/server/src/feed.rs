//! WebSocket activity feed: one JSON frame per committed stamp.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use stamps::StampPipeline;
use streaming::{FeedMessage, StampSummary, TextureVersion};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn serve_feed(socket: WebSocket, pipeline: StampPipeline) {
    let session_id = Uuid::new_v4().to_string();
    // Subscribe before reading the version so no commit falls in between.
    let mut commits = pipeline.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = FeedMessage::Hello {
        session_id: session_id.clone(),
        texture_version: pipeline.current_version(),
    };
    if send(&mut ws_tx, &hello).await.is_err() {
        return;
    }
    info!(session_id = %session_id, "feed session connected");

    loop {
        tokio::select! {
            commit = commits.recv() => {
                let Some(msg) = feed_message(commit, pipeline.current_version()) else {
                    break;
                };
                if let FeedMessage::Resync { .. } = msg {
                    warn!(session_id = %session_id, "feed subscriber lagged; asking for resync");
                }
                if send(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id = %session_id, "feed receive error: {e}");
                    break;
                }
            },
        }
    }

    info!(session_id = %session_id, "feed session disconnected");
}

/// Frame for one broadcast result; `None` once the pipeline is gone.
fn feed_message(
    commit: Result<StampSummary, RecvError>,
    current_version: TextureVersion,
) -> Option<FeedMessage> {
    match commit {
        Ok(stamp) => Some(FeedMessage::StampCommitted { stamp }),
        Err(RecvError::Lagged(_)) => Some(FeedMessage::Resync {
            texture_version: current_version,
        }),
        Err(RecvError::Closed) => None,
    }
}

async fn send(tx: &mut SplitSink<WebSocket, Message>, msg: &FeedMessage) -> Result<(), ()> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to serialize feed message: {e}");
            return Ok(());
        }
    };
    tx.send(Message::Text(text)).await.map_err(|e| {
        warn!("feed send failed: {e}");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(version: TextureVersion) -> StampSummary {
        StampSummary {
            id: format!("s-{version}"),
            latitude: 0.0,
            longitude: 0.0,
            zoom_level: 5.0,
            user_id: "ana".to_string(),
            created_at_ms: 0,
            texture_version: version,
            tiles: Vec::new(),
        }
    }

    #[test]
    fn commits_lag_and_close_map_to_frames() {
        assert_eq!(
            feed_message(Ok(summary(3)), 3),
            Some(FeedMessage::StampCommitted { stamp: summary(3) })
        );
        assert_eq!(
            feed_message(Err(RecvError::Lagged(12)), 40),
            Some(FeedMessage::Resync { texture_version: 40 })
        );
        assert_eq!(feed_message(Err(RecvError::Closed), 40), None);
    }
}
