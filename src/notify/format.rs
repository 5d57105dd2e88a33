use std::fmt::Write;

use crate::db::prelude::Score;
use crate::reconcile::{ChangeKind, ScoreChangeEvent};

/// One announcement line for a change event.
pub fn render(event: &ScoreChangeEvent) -> String {
    let mut out = event.player.display();

    match &event.kind {
        ChangeKind::NewLeader {
            previous: Some(previous),
        } => {
            let _ = write!(
                out,
                " beat {}'s high score of {} with a new high score of {}",
                previous.player.display(),
                previous.value,
                event.score.score
            );
        }
        ChangeKind::NewLeader { previous: None } | ChangeKind::PersonalBest { .. } => {
            let _ = write!(out, " set a new high score of {}", event.score.score);
        }
    }

    out.push_str(" on ");
    push_song(&mut out, &event.score);

    if let Some(url) = &event.score.map_url {
        let _ = write!(out, " {url}");
    }

    out
}

/// `Song by Artist [map by Mapper] (Difficulty): value`
pub fn format_score(score: &Score) -> String {
    let mut out = String::new();
    push_song(&mut out, score);
    let _ = write!(out, ": {}", score.score);

    out
}

fn push_song(out: &mut String, score: &Score) {
    out.push_str(&score.song_name);

    if !score.song_artist.is_empty() {
        let _ = write!(out, " by {}", score.song_artist);
    }

    if !score.song_mapper.is_empty() {
        let _ = write!(out, " [map by {}]", score.song_mapper);
    }

    let _ = write!(out, " ({})", score.difficulty);
}

/// Reply text for a manual update.
///
/// Lists every event on its own line, or just the count when `quiet` is set or the list would
/// not fit in `max_chars`.
pub fn summarize(events: &[ScoreChangeEvent], quiet: bool, max_chars: usize) -> String {
    if events.is_empty() {
        return "No new high scores.".to_string();
    }

    let listed = events.iter().map(render).collect::<Vec<_>>().join("\n");
    if quiet || listed.chars().count() > max_chars {
        return format!("{} new high scores.", events.len());
    }

    listed
}
