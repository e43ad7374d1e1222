//! Voice feature helpers
//!
//! Derives lexical and pacing statistics from a transcript, and pause
//! statistics from per-frame voice activity flags. Audio decoding, speech
//! recognition and voice activity detection happen upstream.

use crate::types::{Lexical, PauseStats, VoiceFeatures};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Single-word fillers
pub const FILLER_WORDS: [&str; 11] = [
    "um", "uh", "er", "ah", "erm", "hmm", "like", "so", "actually", "basically", "right",
];

/// Two-word filler, matched before single words
pub const FILLER_BIGRAM: (&str, &str) = ("you", "know");

const EPSILON: f64 = 1e-9;

/// Lowercased word tokens (letters, digits and apostrophes)
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Statistics computed from one transcript
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptStats {
    pub word_count: u32,
    pub wpm: f64,
    pub filler_count: u32,
    /// Fillers per word, in [0, 1]
    pub filler_ratio: f64,
    pub most_common_filler: Option<String>,
    pub vocab_size: u32,
    pub type_token_ratio: f64,
}

impl TranscriptStats {
    /// Compute statistics for `text` spoken over `duration_sec` seconds.
    ///
    /// An empty transcript yields all zeros.
    pub fn from_transcript(text: &str, duration_sec: f64) -> Self {
        let words = tokenize(text);
        let word_count = words.len();

        // filler -> count, in order of first occurrence
        let mut fillers: Vec<(String, u32)> = Vec::new();
        let mut bump = |filler: &str| match fillers.iter_mut().find(|(f, _)| f == filler) {
            Some((_, n)) => *n += 1,
            None => fillers.push((filler.to_string(), 1)),
        };

        let mut i = 0;
        while i < words.len() {
            let next = words.get(i + 1).map(String::as_str);
            if words[i] == FILLER_BIGRAM.0 && next == Some(FILLER_BIGRAM.1) {
                bump("you know");
                i += 2;
                continue;
            }
            if FILLER_WORDS.contains(&words[i].as_str()) {
                bump(&words[i]);
            }
            i += 1;
        }

        let filler_count: u32 = fillers.iter().map(|(_, n)| n).sum();
        let most_common_filler = fillers
            .iter()
            .fold(None, |best: Option<&(String, u32)>, entry| match best {
                Some(b) if b.1 >= entry.1 => Some(b),
                _ => Some(entry),
            })
            .map(|(f, _)| f.clone());

        let mut vocab: Vec<&str> = words.iter().map(String::as_str).collect();
        vocab.sort_unstable();
        vocab.dedup();

        let minutes = duration_sec.max(0.0) / 60.0;
        Self {
            word_count: word_count as u32,
            wpm: word_count as f64 / (minutes + EPSILON),
            filler_count,
            filler_ratio: filler_count as f64 / (word_count as f64 + EPSILON),
            most_common_filler,
            vocab_size: vocab.len() as u32,
            type_token_ratio: vocab.len() as f64 / (word_count as f64 + EPSILON),
        }
    }
}

impl PauseStats {
    /// Pause statistics from voice activity flags of fixed-length frames.
    ///
    /// Every maximal run of unvoiced frames is one pause, including leading
    /// and trailing silence.
    pub fn from_voiced_frames(voiced: &[bool], frame_ms: u32) -> Self {
        let frame_sec = f64::from(frame_ms) / 1000.0;
        let mut stats = PauseStats::default();
        let mut run = 0u32;

        let close = |run: &mut u32, stats: &mut PauseStats| {
            if *run > 0 {
                let secs = f64::from(*run) * frame_sec;
                stats.count += 1;
                stats.total += secs;
                stats.longest = stats.longest.max(secs);
                *run = 0;
            }
        };

        for &v in voiced {
            if v {
                close(&mut run, &mut stats);
            } else {
                run += 1;
            }
        }
        close(&mut run, &mut stats);
        stats
    }
}

impl VoiceFeatures {
    /// Populate absent pace, filler and lexical fields from the transcript.
    ///
    /// Pace needs `audio_duration_sec`; fields already present are kept.
    pub fn fill_from_transcript(&mut self) {
        let Some(text) = self.transcript.as_deref() else {
            return;
        };
        let duration = self.audio_duration_sec.unwrap_or(0.0);
        let stats = TranscriptStats::from_transcript(text, duration);

        if self.speech_pace_wpm.is_none() && self.audio_duration_sec.is_some() {
            self.speech_pace_wpm = Some(stats.wpm);
        }
        if self.filler_ratio.is_none() {
            self.filler_ratio = Some(stats.filler_ratio);
        }
        if self.filler_count.is_none() {
            self.filler_count = Some(stats.filler_count);
        }
        if self.lexical.is_none() {
            self.lexical = Some(Lexical {
                type_token_ratio: Some(stats.type_token_ratio),
                vocab_size: Some(stats.vocab_size),
                total_words: Some(stats.word_count),
            });
        }
        debug!(
            words = stats.word_count,
            fillers = stats.filler_count,
            "voice features filled from transcript"
        );
    }
}
