//! Channel type definitions for inter-task communication

use tokio::sync::{broadcast, mpsc};

use super::types::FrameTrace;
use crate::zenith::messages::TopicUpdate;

/// Buffer size of the debug frame tap
pub const FRAME_TAP_CAPACITY: usize = 1024;

/// Create the per-caller channel behind a subscription stream
///
/// Unbounded so that delivery from the session task never waits on a slow reader.
pub fn create_update_channel() -> (
    mpsc::UnboundedSender<TopicUpdate>,
    mpsc::UnboundedReceiver<TopicUpdate>,
) {
    mpsc::unbounded_channel()
}

/// Create the broadcast channel frames are published on in debug mode
pub fn create_frame_tap() -> broadcast::Sender<FrameTrace> {
    let (tx, _rx) = broadcast::channel(FRAME_TAP_CAPACITY);
    tx
}
