//! Status and level event types.
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `StatusEvent` | `ParleyEngine::subscribe_status` |
//! | `LevelEvent` | `ParleyEngine::subscribe_levels` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// The single human-readable status signal. Every failure updates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message, close reason).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine running, session not yet open.
    Idle,
    /// Session open; inbound audio will play.
    Connected,
    /// Waiting on the input device (permission prompt, device open).
    Requesting,
    /// Microphone blocks are being forwarded.
    Recording,
    /// Recording stopped; session may still be open.
    Stopped,
    /// Something failed; see `detail`. The engine keeps running.
    Error,
    /// Session closed by the remote side or the adapter.
    Closed,
}

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelDirection {
    Input,
    Output,
}

/// RMS of one forwarded capture block or one scheduled playback chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelEvent {
    /// Monotonically increasing per engine.
    pub seq: u64,
    pub direction: LevelDirection,
    /// Root-mean-square level in [0.0, 1.0].
    pub rms: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = StatusEvent {
            status: EngineStatus::Closed,
            detail: Some("going away".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "closed");
        assert_eq!(json["detail"], "going away");

        let back: StatusEvent = serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(back, event);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<EngineStatus>(r#""Recording""#).is_err());
    }

    #[test]
    fn level_event_uses_camel_case_and_lowercase_direction() {
        let event = LevelEvent {
            seq: 4,
            direction: LevelDirection::Output,
            rms: 0.25,
        };
        let json = serde_json::to_value(&event).expect("serialize level event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["direction"], "output");
        let rms = json["rms"].as_f64().expect("rms should serialize as number");
        assert!((rms - 0.25).abs() < 1e-6);
    }
}
