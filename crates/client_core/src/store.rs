//! Canonical client state and the single reducer that mutates it.
//!
//! Every change, whether it comes from a REST response or a push event, is a
//! [`Transition`] passed to [`Store::dispatch`]. Reductions are applied one at
//! a time under the store lock. Observers are called outside the lock, one
//! snapshot at a time, in the order the reductions were applied.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{CueId, MessageId, MessageKind},
    protocol::{Cue, StatusPatch, SystemStatus, Transcription},
};
use tracing::{debug, warn};

pub const TRANSCRIPTION_LIMIT: usize = 100;
pub const MESSAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub status: SystemStatus,
    pub cues: Vec<Cue>,
    /// Newest first, at most [`TRANSCRIPTION_LIMIT`].
    pub transcriptions: Vec<Transcription>,
    pub currently_playing: Option<String>,
    /// Newest first, at most [`MESSAGE_LIMIT`].
    pub messages: Vec<SystemMessage>,
    pub loading: bool,
    pub error: Option<String>,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub enum Transition {
    ReplaceStatus(StatusPatch),
    ReplaceCues(Vec<Cue>),
    /// Appends without checking for an existing entry with the same id.
    AddCue(Cue),
    UpdateCue(Cue),
    DeleteCue(CueId),
    /// Server order is oldest first; the store keeps newest first.
    ReplaceTranscriptions(Vec<Transcription>),
    PrependTranscription(Transcription),
    SetPlaying(Option<String>),
    PrependMessage {
        kind: MessageKind,
        text: String,
    },
    SetError(String),
    ClearError,
    SetLoading(bool),
    SetConnected(bool),
}

impl Transition {
    pub fn message(kind: MessageKind, text: impl Into<String>) -> Self {
        Transition::PrependMessage {
            kind,
            text: text.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::ReplaceStatus(_) => "replace_status",
            Transition::ReplaceCues(_) => "replace_cues",
            Transition::AddCue(_) => "add_cue",
            Transition::UpdateCue(_) => "update_cue",
            Transition::DeleteCue(_) => "delete_cue",
            Transition::ReplaceTranscriptions(_) => "replace_transcriptions",
            Transition::PrependTranscription(_) => "prepend_transcription",
            Transition::SetPlaying(_) => "set_playing",
            Transition::PrependMessage { .. } => "prepend_message",
            Transition::SetError(_) => "set_error",
            Transition::ClearError => "clear_error",
            Transition::SetLoading(_) => "set_loading",
            Transition::SetConnected(_) => "set_connected",
        }
    }
}

/// Identity and receipt time minted by the store for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub id: MessageId,
    pub at: DateTime<Utc>,
}

pub fn reduce(state: &AppState, transition: Transition, receipt: Receipt) -> AppState {
    let mut next = state.clone();
    match transition {
        Transition::ReplaceStatus(patch) => {
            patch.apply_to(&mut next.status);
            let stats = &mut next.status.stats;
            let reported = stats.successful_matches;
            if stats.clamp_matches() {
                warn!(
                    successful_matches = reported,
                    total_detections = stats.total_detections,
                    "store: clamped successful matches to total detections"
                );
            }
        }
        Transition::ReplaceCues(cues) => next.cues = cues,
        Transition::AddCue(cue) => next.cues.push(cue),
        Transition::UpdateCue(cue) => {
            for slot in next.cues.iter_mut().filter(|c| c.id == cue.id) {
                *slot = cue.clone();
            }
        }
        Transition::DeleteCue(id) => next.cues.retain(|c| c.id != id),
        Transition::ReplaceTranscriptions(mut transcriptions) => {
            transcriptions.reverse();
            transcriptions.truncate(TRANSCRIPTION_LIMIT);
            next.transcriptions = transcriptions;
        }
        Transition::PrependTranscription(transcription) => {
            next.transcriptions.insert(0, transcription);
            next.transcriptions.truncate(TRANSCRIPTION_LIMIT);
        }
        Transition::SetPlaying(path) => next.currently_playing = path,
        Transition::PrependMessage { kind, text } => {
            next.messages.insert(
                0,
                SystemMessage {
                    id: receipt.id,
                    timestamp: receipt.at,
                    kind,
                    text,
                },
            );
            next.messages.truncate(MESSAGE_LIMIT);
        }
        Transition::SetError(message) => {
            next.error = Some(message);
            next.loading = false;
        }
        Transition::ClearError => next.error = None,
        Transition::SetLoading(loading) => next.loading = loading,
        Transition::SetConnected(connected) => next.connected = connected,
    }
    next
}

type Observer = Arc<dyn Fn(&Arc<AppState>) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: BTreeMap<u64, Observer>,
}

struct Cell {
    state: Arc<AppState>,
    next_message_id: u64,
    /// Applied but not yet delivered to observers, oldest first.
    pending: VecDeque<Arc<AppState>>,
    /// Set while some dispatcher is draining `pending`.
    publishing: bool,
}

pub struct Store {
    cell: Mutex<Cell>,
    registry: Arc<Mutex<Registry>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_state(AppState::default())
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            cell: Mutex::new(Cell {
                state: Arc::new(state),
                next_message_id: 1,
                pending: VecDeque::new(),
                publishing: false,
            }),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        Arc::clone(&lock(&self.cell).state)
    }

    /// Applies `transition` and returns the resulting snapshot.
    ///
    /// If another dispatch (on this thread or another) is already delivering
    /// snapshots, this one is queued behind it and delivered by that caller,
    /// so observers may not have seen it yet when this returns.
    pub fn dispatch(&self, transition: Transition) -> Arc<AppState> {
        let name = transition.name();
        let (snapshot, publisher) = {
            let mut cell = lock(&self.cell);
            let receipt = Receipt {
                id: MessageId(cell.next_message_id),
                at: Utc::now(),
            };
            cell.next_message_id += 1;
            cell.state = Arc::new(reduce(&cell.state, transition, receipt));
            let snapshot = Arc::clone(&cell.state);
            cell.pending.push_back(Arc::clone(&snapshot));
            let publisher = !std::mem::replace(&mut cell.publishing, true);
            (snapshot, publisher)
        };
        debug!(transition = name, "store: applied transition");

        if publisher {
            self.publish();
        }
        snapshot
    }

    fn publish(&self) {
        let _reset = PublishReset(&self.cell);
        loop {
            let next = {
                let mut cell = lock(&self.cell);
                match cell.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        cell.publishing = false;
                        return;
                    }
                }
            };
            let observers: Vec<Observer> =
                lock(&self.registry).observers.values().cloned().collect();
            for observer in observers {
                observer(&next);
            }
        }
    }

    pub fn dispatch_all(&self, transitions: impl IntoIterator<Item = Transition>) {
        for transition in transitions {
            self.dispatch(transition);
        }
    }

    /// Registers `observer` for every later dispatch. Dropping the returned
    /// [`Subscription`] deregisters it.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Arc<AppState>) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.insert(id, Arc::new(observer));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.registry).observers.len()
    }

    /// Drops every observer. Outstanding subscriptions become no-ops.
    pub fn close(&self) {
        let removed = std::mem::take(&mut lock(&self.registry).observers);
        debug!(observers = removed.len(), "store: closed");
    }
}

pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).observers.remove(&self.id);
        }
    }
}

/// Hands publishing back if an observer panics mid-delivery, so later
/// dispatches are not queued forever.
struct PublishReset<'a>(&'a Mutex<Cell>);

impl Drop for PublishReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).publishing = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
