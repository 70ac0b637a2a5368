//! Read-only values derived from an [`AppState`](crate::store::AppState) snapshot.

use std::cmp::Reverse;

use shared::{
    domain::CueId,
    protocol::{Cue, SystemStatus, Transcription},
};

/// Rounded percentage of detections that matched a cue, `None` before the first detection.
pub fn match_rate(status: &SystemStatus) -> Option<u8> {
    let stats = &status.stats;
    if stats.total_detections == 0 {
        return None;
    }
    let matches = stats.successful_matches.min(stats.total_detections);
    Some(rounded_percent(matches, stats.total_detections))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptionStats {
    pub matched: usize,
    pub total: usize,
    pub percentage: u8,
}

pub fn transcription_stats(transcriptions: &[Transcription]) -> TranscriptionStats {
    let total = transcriptions.len();
    let matched = transcriptions
        .iter()
        .filter(|t| t.matched_cue.is_some())
        .count();
    let percentage = if total == 0 {
        0
    } else {
        rounded_percent(matched as u64, total as u64)
    };
    TranscriptionStats {
        matched,
        total,
        percentage,
    }
}

/// Suggested id for a new cue: one past the highest id in use.
pub fn next_cue_id(cues: &[Cue]) -> CueId {
    cues.iter()
        .map(|cue| cue.id)
        .max()
        .map_or(CueId(1), |CueId(max)| CueId(max.saturating_add(1)))
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_uptime(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TranscriptionFilter {
    #[default]
    All,
    Matched,
    Unmatched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptionQuery {
    /// Case-insensitive substring of the text or of the matched cue's text.
    pub search: Option<String>,
    pub filter: TranscriptionFilter,
    pub order: SortOrder,
}

pub fn filter_transcriptions<'a>(
    transcriptions: &'a [Transcription],
    query: &TranscriptionQuery,
) -> Vec<&'a Transcription> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut out: Vec<&Transcription> = transcriptions
        .iter()
        .filter(|t| match query.filter {
            TranscriptionFilter::All => true,
            TranscriptionFilter::Matched => t.matched_cue.is_some(),
            TranscriptionFilter::Unmatched => t.matched_cue.is_none(),
        })
        .filter(|t| match &needle {
            None => true,
            Some(needle) => {
                t.text.to_lowercase().contains(needle.as_str())
                    || t
                        .matched_cue
                        .as_ref()
                        .is_some_and(|cue| cue.text.to_lowercase().contains(needle.as_str()))
            }
        })
        .collect();

    match query.order {
        SortOrder::NewestFirst => out.sort_by_key(|t| Reverse(t.timestamp)),
        SortOrder::OldestFirst => out.sort_by_key(|t| t.timestamp),
    }
    out
}

/// Half-up; widened so counts near `u64::MAX` cannot overflow.
fn rounded_percent(part: u64, whole: u64) -> u8 {
    let (part, whole) = (u128::from(part), u128::from(whole));
    let percent = (part * 200 + whole) / (whole * 2);
    percent.min(100) as u8
}
