use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use tracing::{debug, error, warn};

use crate::detections::{self, StreamMessage};
use crate::detector::{Detect, DetectorHandle, InferOptions};
use crate::frame;

/// Outcome of processing one transport frame.
///
/// The decision table is explicit: `Drop` is the per-frame-recoverable class
/// (the connection stays open), `Fatal` tears the session down.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Send this JSON message back to the peer and keep going.
    Reply(String),
    /// Skip the frame silently; expected on noisy input.
    Drop,
    /// Close the connection with an internal-error signal.
    Fatal(String),
}

/// How the session ends once the loop exits.
enum CloseSignal {
    Clean,
    InternalError,
}

/// Decode, downsample, infer and serialize a single frame.
///
/// Runs at streaming thresholds in the low-cost execution mode, on a frame
/// shrunk to a quarter of its linear dimensions; returned coordinates are in
/// the downsampled space.
pub fn process_frame(detector: &dyn Detect, text: &str) -> FrameOutcome {
    let image = match frame::decode_transport_frame(text) {
        Ok(image) => image,
        Err(err) => {
            debug!("dropping undecodable frame: {err}");
            return FrameOutcome::Drop;
        }
    };

    let Some(downsampled) = frame::quarter_downsample(&image) else {
        debug!(
            width = image.width(),
            height = image.height(),
            "dropping frame too small to downsample"
        );
        return FrameOutcome::Drop;
    };

    let raw = match detector.infer(&downsampled.to_rgb8(), InferOptions::STREAMING) {
        Ok(raw) => raw,
        Err(err) => return FrameOutcome::Fatal(err.to_string()),
    };

    let result = detections::normalize(detector, &raw);
    match serde_json::to_string(&StreamMessage::from(&result)) {
        Ok(json) => FrameOutcome::Reply(json),
        Err(err) => FrameOutcome::Fatal(format!("failed to serialize detections: {err}")),
    }
}

/// Drive one accepted WebSocket connection until it closes.
///
/// Frames are processed strictly sequentially; the next frame is not read
/// until the current reply has been sent. Teardown always runs, even when the
/// close handshake itself fails.
pub async fn run_session(mut socket: WebSocket, detector: DetectorHandle) {
    let signal = match detector.get() {
        Ok(model) => frame_loop(&mut socket, model.clone()).await,
        Err(_) => {
            // Never accept frames against an unusable detector.
            warn!("streaming session refused: detector not ready");
            CloseSignal::InternalError
        }
    };

    let close_frame = match signal {
        CloseSignal::Clean => None,
        CloseSignal::InternalError => Some(CloseFrame {
            code: close_code::ERROR,
            reason: "internal error".into(),
        }),
    };
    if let Err(err) = socket.send(Message::Close(close_frame)).await {
        debug!("best-effort close failed: {err}");
    }
}

async fn frame_loop(socket: &mut WebSocket, model: Arc<dyn Detect>) -> CloseSignal {
    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            Err(err) => {
                debug!("peer connection lost: {err}");
                return CloseSignal::Clean;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return CloseSignal::Clean,
            // Ping/pong is handled by the transport; binary frames carry no image.
            _ => continue,
        };

        let worker_model = model.clone();
        let outcome = match tokio::task::spawn_blocking(move || {
            process_frame(worker_model.as_ref(), text.as_str())
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => FrameOutcome::Fatal(format!("frame task failed: {err}")),
        };

        match outcome {
            FrameOutcome::Reply(json) => {
                if let Err(err) = socket.send(Message::Text(json.into())).await {
                    debug!("peer went away mid-send: {err}");
                    return CloseSignal::Clean;
                }
            }
            FrameOutcome::Drop => continue,
            FrameOutcome::Fatal(reason) => {
                error!("closing streaming session: {reason}");
                return CloseSignal::InternalError;
            }
        }
    }
    CloseSignal::Clean
}
