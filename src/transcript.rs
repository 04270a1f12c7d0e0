use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{Dialog, Envelope, Role};

/// One appended turn as it lands in the daily JSONL transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TranscriptEntry {
    pub(crate) ts_utc: i64,
    pub(crate) channel: String,
    pub(crate) role: Role,
    pub(crate) user: String,
    pub(crate) dialog: Dialog,
    pub(crate) text: String,
}

impl TranscriptEntry {
    pub(crate) fn new(channel: &str, envelope: &Envelope) -> Self {
        Self {
            ts_utc: Utc::now().timestamp(),
            channel: channel.to_string(),
            role: envelope.role,
            user: envelope.user.clone(),
            dialog: envelope.dialog,
            text: envelope.text.clone(),
        }
    }
}

fn is_transcript_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("transcript-") && n.ends_with(".jsonl"))
        .unwrap_or(false)
}

pub(crate) fn append_transcript(dir: &Path, entry: &TranscriptEntry) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("transcript-{}.jsonl", Utc::now().format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", serde_json::to_string(entry)?)?;
    Ok(())
}

/// Most recent `limit` turns of a channel, oldest first. Only the last week of
/// files is scanned; unreadable lines are skipped.
pub(crate) fn load_transcript(dir: &Path, channel: &str, limit: usize) -> Vec<TranscriptEntry> {
    if limit == 0 {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_transcript_file(p))
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    files.truncate(7);

    let mut collected = Vec::new();
    for path in &files {
        let Ok(file) = fs::File::open(path) else {
            continue;
        };
        let mut day: Vec<TranscriptEntry> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str::<TranscriptEntry>(&line).ok())
            .filter(|entry| entry.channel == channel)
            .collect();
        day.reverse();
        for entry in day {
            collected.push(entry);
            if collected.len() >= limit {
                collected.reverse();
                return collected;
            }
        }
    }
    collected.reverse();
    collected
}
