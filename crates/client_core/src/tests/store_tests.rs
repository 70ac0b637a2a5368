use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use chrono::TimeZone;
use serde_json::json;
use shared::{domain::TranscriptionId, protocol::DetectionStats};

use super::*;

fn cue(id: i64, text: &str, token: &str, audio: &str) -> Cue {
    Cue {
        id: CueId(id),
        text: text.to_string(),
        trigger_tokens: vec![token.to_string()],
        audio_path: audio.to_string(),
    }
}

fn transcription(id: usize) -> Transcription {
    Transcription {
        id: TranscriptionId::new(id.to_string()),
        text: format!("line {id}"),
        timestamp: Utc
            .timestamp_opt(1_700_000_000 + id as i64, 0)
            .single()
            .expect("timestamp"),
        matched_cue: None,
        played_audio_path: None,
    }
}

#[test]
fn transcriptions_are_capped_newest_first() {
    let store = Store::new();
    for id in 1..=101 {
        store.dispatch(Transition::PrependTranscription(transcription(id)));
        assert!(store.snapshot().transcriptions.len() <= TRANSCRIPTION_LIMIT);
    }

    let state = store.snapshot();
    assert_eq!(state.transcriptions.len(), 100);
    assert_eq!(state.transcriptions[0].id.as_str(), "101");
    assert_eq!(state.transcriptions[99].id.as_str(), "2");
    for pair in state.transcriptions.windows(2) {
        assert!(pair[0].timestamp > pair[1].timestamp);
    }
}

#[test]
fn messages_are_capped_newest_first_with_unique_ids() {
    let store = Store::new();
    for n in 0..60 {
        store.dispatch(Transition::message(MessageKind::Info, format!("msg {n}")));
    }

    let state = store.snapshot();
    assert_eq!(state.messages.len(), MESSAGE_LIMIT);
    assert_eq!(state.messages[0].text, "msg 59");
    assert_eq!(state.messages[49].text, "msg 10");
    for pair in state.messages.windows(2) {
        assert!(pair[0].id > pair[1].id);
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
}

#[test]
fn replacing_cues_twice_with_same_list_is_idempotent() {
    let store = Store::new();
    let cues = vec![cue(1, "a", "a", "x"), cue(2, "b", "b", "y")];

    let once = store.dispatch(Transition::ReplaceCues(cues.clone()));
    let twice = store.dispatch(Transition::ReplaceCues(cues));
    assert_eq!(*once, *twice);
}

#[test]
fn replacing_cues_discards_previous_entries() {
    let store = Store::new();
    store.dispatch(Transition::AddCue(cue(9, "old", "old", "o")));
    let state = store.dispatch(Transition::ReplaceCues(vec![cue(1, "a", "a", "x")]));
    assert_eq!(state.cues, vec![cue(1, "a", "a", "x")]);
}

// Duplicate ids are kept on purpose: the server owns uniqueness.
#[test]
fn add_cue_with_existing_id_keeps_both_entries() {
    let store = Store::new();
    store.dispatch(Transition::AddCue(cue(1, "a", "a", "x")));
    let state = store.dispatch(Transition::AddCue(cue(1, "dup", "dup", "z")));

    assert_eq!(state.cues.len(), 2);
    assert!(state.cues.iter().all(|c| c.id == CueId(1)));
    assert_eq!(state.cues[1].text, "dup");
}

#[test]
fn deleting_unknown_cue_changes_nothing() {
    let store = Store::new();
    let before = store.dispatch(Transition::ReplaceCues(vec![cue(1, "a", "a", "x")]));
    let after = store.dispatch(Transition::DeleteCue(CueId(42)));
    assert_eq!(before.cues, after.cues);
}

#[test]
fn delete_removes_matching_cue() {
    let store = Store::new();
    store.dispatch(Transition::ReplaceCues(vec![
        cue(1, "a", "a", "x"),
        cue(2, "b", "b", "y"),
    ]));
    let state = store.dispatch(Transition::DeleteCue(CueId(1)));
    assert_eq!(state.cues, vec![cue(2, "b", "b", "y")]);
}

#[test]
fn add_then_update_leaves_single_updated_cue() {
    let store = Store::new();
    store.dispatch(Transition::AddCue(cue(1, "a", "a", "x")));
    let state = store.dispatch(Transition::UpdateCue(cue(1, "b", "b", "y")));
    assert_eq!(state.cues, vec![cue(1, "b", "b", "y")]);
}

#[test]
fn update_of_absent_cue_is_noop() {
    let store = Store::new();
    let before = store.dispatch(Transition::AddCue(cue(1, "a", "a", "x")));
    let after = store.dispatch(Transition::UpdateCue(cue(2, "b", "b", "y")));
    assert_eq!(before.cues, after.cues);
}

#[test]
fn status_error_then_clear_leaves_status_and_no_error() {
    let store = Store::new();
    let patch: StatusPatch = serde_json::from_value(json!({
        "is_system_running": false,
        "stats": {"total_detections": 0, "successful_matches": 0}
    }))
    .expect("patch");

    store.dispatch(Transition::ReplaceStatus(patch));
    store.dispatch(Transition::SetError("boom".into()));
    assert_eq!(store.snapshot().error.as_deref(), Some("boom"));
    let state = store.dispatch(Transition::ClearError);

    assert!(!state.status.is_system_running);
    assert_eq!(state.error, None);
}

#[test]
fn status_patch_merges_shallowly() {
    let store = Store::new();
    store.dispatch(Transition::ReplaceStatus(StatusPatch::from(SystemStatus {
        is_recording: true,
        is_system_running: true,
        current_cue_index: 3,
        uptime_seconds: 40,
        ..SystemStatus::default()
    })));
    let patch: StatusPatch =
        serde_json::from_value(json!({"is_recording": false})).expect("patch");
    let state = store.dispatch(Transition::ReplaceStatus(patch));

    assert!(!state.status.is_recording);
    assert!(state.status.is_system_running);
    assert_eq!(state.status.current_cue_index, 3);
    assert_eq!(state.status.uptime_seconds, 40);
}

#[test]
fn status_stats_never_report_more_matches_than_detections() {
    let store = Store::new();
    let state = store.dispatch(Transition::ReplaceStatus(StatusPatch {
        stats: Some(DetectionStats {
            total_detections: 2,
            successful_matches: 5,
            start_time: None,
        }),
        ..StatusPatch::default()
    }));
    assert_eq!(state.status.stats.successful_matches, 2);
}

#[test]
fn set_error_ends_loading() {
    let store = Store::new();
    store.dispatch(Transition::SetLoading(true));
    let state = store.dispatch(Transition::SetError("nope".into()));
    assert!(!state.loading);
}

#[test]
fn replace_transcriptions_reorders_server_history_newest_first() {
    let store = Store::new();
    let history: Vec<_> = (1..=120).map(transcription).collect();
    let state = store.dispatch(Transition::ReplaceTranscriptions(history));

    assert_eq!(state.transcriptions.len(), TRANSCRIPTION_LIMIT);
    assert_eq!(state.transcriptions[0].id.as_str(), "120");
    assert_eq!(state.transcriptions[99].id.as_str(), "21");
}

#[test]
fn playback_is_replaced_wholesale() {
    let store = Store::new();
    store.dispatch(Transition::SetPlaying(Some("audio/1.mp3".into())));
    assert_eq!(
        store.snapshot().currently_playing.as_deref(),
        Some("audio/1.mp3")
    );
    let state = store.dispatch(Transition::SetPlaying(None));
    assert_eq!(state.currently_playing, None);
}

#[test]
fn connectivity_flaps_leave_other_state_untouched() {
    let store = Store::new();
    store.dispatch(Transition::ReplaceCues(vec![cue(1, "a", "a", "x")]));
    store.dispatch(Transition::PrependTranscription(transcription(1)));
    let before = store.dispatch(Transition::SetConnected(true));

    store.dispatch(Transition::SetConnected(false));
    let after = store.dispatch(Transition::SetConnected(true));

    assert_eq!(*before, *after);
}

#[test]
fn observers_see_every_dispatch_until_unsubscribed() {
    let store = Store::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let subscription = store.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    store.dispatch(Transition::SetLoading(true));
    store.dispatch(Transition::SetLoading(false));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    subscription.unsubscribe();
    store.dispatch(Transition::ClearError);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.observer_count(), 0);
}

#[test]
fn observer_receives_post_transition_snapshot() {
    let store = Store::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = store.subscribe(move |state| {
        sink.lock().expect("lock").push(state.currently_playing.clone());
    });

    store.dispatch(Transition::SetPlaying(Some("a.mp3".into())));
    store.dispatch(Transition::SetPlaying(None));

    assert_eq!(
        *seen.lock().expect("lock"),
        vec![Some("a.mp3".to_string()), None]
    );
}

#[test]
fn observer_may_dispatch_from_its_callback() {
    let store = Arc::new(Store::new());
    let inner = Arc::downgrade(&store);
    let _subscription = store.subscribe(move |state| {
        if state.error.is_some() {
            if let Some(store) = inner.upgrade() {
                store.dispatch(Transition::ClearError);
            }
        }
    });

    store.dispatch(Transition::SetError("transient".into()));
    assert_eq!(store.snapshot().error, None);
}

#[test]
fn observers_see_snapshots_in_apply_order_across_threads() {
    let store = Arc::new(Store::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, entered_rx) = mpsc::channel();
    let entered_tx = Mutex::new(entered_tx);
    let sink = Arc::clone(&seen);
    let _subscription = store.subscribe(move |state| {
        let playing = state.currently_playing.clone();
        if playing.as_deref() == Some("a") {
            // Hold the first delivery open while the other thread dispatches.
            let _ = entered_tx.lock().expect("lock").send(());
            thread::sleep(Duration::from_millis(100));
        }
        sink.lock().expect("lock").push(playing);
    });

    let first = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.dispatch(Transition::SetPlaying(Some("a".into())));
        })
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first observer call");
    let second = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.dispatch(Transition::SetPlaying(Some("b".into())));
        })
    };
    second.join().expect("second dispatcher");
    first.join().expect("first dispatcher");

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen, vec![Some("a".to_string()), Some("b".to_string())]);
    assert_eq!(
        seen.last().cloned().flatten(),
        store.snapshot().currently_playing
    );
}

#[test]
fn panicking_observer_does_not_stall_later_dispatches() {
    let store = Store::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&calls);
    let _subscription = store.subscribe(move |state| {
        count.fetch_add(1, Ordering::SeqCst);
        if state.error.is_some() {
            panic!("observer failure");
        }
    });

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        store.dispatch(Transition::SetError("boom".into()));
    }));
    assert!(outcome.is_err());

    store.dispatch(Transition::ClearError);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn close_drops_all_observers() {
    let store = Store::new();
    let _a = store.subscribe(|_| {});
    let b = store.subscribe(|_| {});
    assert_eq!(store.observer_count(), 2);

    store.close();
    assert_eq!(store.observer_count(), 0);
    drop(b);
    assert_eq!(store.observer_count(), 0);
}
