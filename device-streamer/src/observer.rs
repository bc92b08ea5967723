use crate::types::{PlaybackState, SessionState};
use tracing::{debug, info};

/// Notifications a hosting application receives from a running session.
///
/// All methods default to no-ops. They are called from the session and
/// playback tasks, so implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_session_state_changed(&self, _state: SessionState) {}

    fn on_playback_state_changed(&self, _state: PlaybackState) {}

    /// Output started after the warm-up threshold was reached
    fn on_playback_started(&self) {}

    fn on_playback_chunk(&self, _sequence_number: u64) {}
}

/// Observer that logs every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_session_state_changed(&self, state: SessionState) {
        info!("Session state: {:?}", state);
    }

    fn on_playback_state_changed(&self, state: PlaybackState) {
        info!("Playback state: {:?}", state);
    }

    fn on_playback_started(&self) {
        info!("▶️ Playback started");
    }

    fn on_playback_chunk(&self, sequence_number: u64) {
        debug!("Played chunk #{}", sequence_number);
    }
}
