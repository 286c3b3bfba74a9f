//! Sensory cues (haptics, sounds) played on session transitions.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCue {
    Paused,
    Resumed,
    /// The user stopped the session.
    Ended,
    /// The plan ran out.
    Completed,
}

/// Plays cues for the host. Must not block.
pub trait SessionFeedback: Send {
    fn cue(&mut self, cue: FeedbackCue);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

impl SessionFeedback for NoFeedback {
    fn cue(&mut self, _cue: FeedbackCue) {}
}

/// Collects cues; clones share the list.
#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    cues: Arc<Mutex<Vec<FeedbackCue>>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cues(&self) -> Vec<FeedbackCue> {
        self.cues.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SessionFeedback for RecordingFeedback {
    fn cue(&mut self, cue: FeedbackCue) {
        self.cues.lock().unwrap_or_else(|e| e.into_inner()).push(cue);
    }
}
