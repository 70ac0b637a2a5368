//! Translates push frames into store transitions.

use std::sync::Arc;

use shared::{domain::MessageKind, frame::PushFrame, protocol::PushEvent};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::store::{Store, Transition};

pub struct EventRouter;

impl EventRouter {
    /// Transitions for one frame, in dispatch order. Unknown event names and
    /// malformed payloads yield nothing.
    pub fn route(frame: PushFrame) -> Vec<Transition> {
        match PushEvent::decode(&frame.name, frame.payload) {
            Ok(Some(event)) => Self::translate(event),
            Ok(None) => {
                debug!(event = %frame.name, "router: ignoring unknown push event");
                Vec::new()
            }
            Err(err) => {
                warn!(event = %frame.name, error = %err, "router: dropping malformed push event");
                Vec::new()
            }
        }
    }

    pub fn translate(event: PushEvent) -> Vec<Transition> {
        match event {
            PushEvent::SystemStatus(payload) => {
                vec![Transition::message(MessageKind::Info, payload.message)]
            }
            PushEvent::SystemError(payload) => vec![
                Transition::SetError(payload.error.clone()),
                Transition::message(MessageKind::Error, payload.error),
            ],
            PushEvent::CuesUpdated(body) => vec![Transition::ReplaceCues(body.cues)],
            PushEvent::TranscriptionDetected(transcription) => {
                let text = format!("Detected: \"{}\"", transcription.text);
                vec![
                    Transition::PrependTranscription(transcription),
                    Transition::message(MessageKind::Transcription, text),
                ]
            }
            PushEvent::CueMatched(payload) => vec![Transition::message(
                MessageKind::Success,
                format!("Matched cue {}: \"{}\"", payload.cue.id, payload.cue.text),
            )],
            PushEvent::AudioPlaying(payload) => {
                let text = format!("Playing: {}", payload.file);
                vec![
                    Transition::SetPlaying(Some(payload.file)),
                    Transition::message(MessageKind::Info, text),
                ]
            }
            PushEvent::AudioFinished => vec![Transition::SetPlaying(None)],
        }
    }

    /// Routes every frame received on `frames` into `store` until the
    /// returned handle is dropped or the sender goes away.
    pub fn attach(mut frames: broadcast::Receiver<PushFrame>, store: Arc<Store>) -> RouterHandle {
        let task = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => store.dispatch_all(Self::route(frame)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "router: fell behind, push events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("router: frame stream closed");
        });
        RouterHandle::new("events", task)
    }

    /// Mirrors transport connectivity into the store's `connected` slot.
    pub fn bridge_connectivity(
        mut connectivity: watch::Receiver<bool>,
        store: Arc<Store>,
    ) -> RouterHandle {
        let task = tokio::spawn(async move {
            let initial = *connectivity.borrow_and_update();
            store.dispatch(Transition::SetConnected(initial));
            while connectivity.changed().await.is_ok() {
                let connected = *connectivity.borrow_and_update();
                store.dispatch(Transition::SetConnected(connected));
            }
        });
        RouterHandle::new("connectivity", task)
    }
}

/// A running routing task. Dropping it stops routing.
pub struct RouterHandle {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl RouterHandle {
    fn new(name: &'static str, task: JoinHandle<()>) -> Self {
        Self {
            name,
            task: Some(task),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn detach(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(router = self.name, "router: detached");
        }
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
