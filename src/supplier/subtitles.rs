//! Subtitle tracks: a sorted interval index plus the SRT file parser.

use std::path::Path;

use log::{error, warn};

use crate::error::Result;

/// One subtitle: text shown over `[start_time, start_time + duration)`.
#[derive(Debug, Clone, Default)]
pub struct SubTitle {
    pub text: String,
    /// Optional display position; `None` leaves placement to the sink.
    pub placement: Option<(f32, f32)>,
    /// Start time in microseconds.
    pub start_time: i64,
    /// Duration in microseconds.
    pub duration: i64,
}

/// A subtitle track, sorted by start time. No two entries share a start
/// time; on a collision the later insertion wins.
pub struct SubTitles {
    name: String,
    entries: Vec<SubTitle>,
}

impl SubTitles {
    pub fn new(name: &str) -> SubTitles {
        SubTitles {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Parses an SRT file. Parsing is forgiving the way players have to be:
    /// out-of-order sequence numbers warn, a malformed time code ends the
    /// parse with whatever was collected so far.
    pub fn from_srt_file(path: &Path, name: &str) -> Result<SubTitles> {
        let bytes = std::fs::read(path)?;
        Ok(SubTitles::from_srt_bytes(&bytes, name))
    }

    pub fn from_srt_bytes(bytes: &[u8], name: &str) -> SubTitles {
        let mut subtitles = SubTitles::new(name);

        enum State {
            ExpectSequenceNumber,
            ExpectTimeCode,
            ExpectText,
        }

        // The encoding is guessed once, from the first text line, and then
        // applied to every following line.
        let mut decoder: Option<&'static encoding_rs::Encoding> = None;
        let mut state = State::ExpectSequenceNumber;
        let mut last_sequence_number: i64 = 0;
        let mut current = SubTitle::default();

        for (line_number, raw_line) in bytes.split(|&byte| byte == b'\n').enumerate() {
            let raw_line = strip_line_endings(raw_line);
            match state {
                State::ExpectSequenceNumber => {
                    if raw_line.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(raw_line);
                    let sequence_number: i64 = line.trim().parse().unwrap_or(0);
                    if sequence_number != last_sequence_number + 1 {
                        warn!(
                            "wrong sequence number in SRT file: {}, expected: {}, \
                             line {}",
                            sequence_number,
                            last_sequence_number + 1,
                            line_number
                        );
                    }
                    last_sequence_number = sequence_number;
                    state = State::ExpectTimeCode;
                }
                State::ExpectTimeCode => {
                    let line = String::from_utf8_lossy(raw_line);
                    let line = line.trim();
                    let Some(separator) = line.find(" --> ") else {
                        error!(
                            "time code expected on line {}, got '{}'",
                            line_number, line
                        );
                        return subtitles;
                    };
                    if separator != 12 {
                        warn!("time code broken on line {} ({})?", line_number, line);
                    }
                    let Some(start_time) = parse_time_code(&line[..separator]) else {
                        error!("failed to parse start time on line {}", line_number);
                        return subtitles;
                    };
                    let Some(end_time) = parse_time_code(&line[separator + 5..]) else {
                        error!("failed to parse end time on line {}", line_number);
                        return subtitles;
                    };
                    current.start_time = start_time;
                    current.duration = end_time - start_time;
                    state = State::ExpectText;
                }
                State::ExpectText => {
                    if raw_line.is_empty() {
                        subtitles.insert(std::mem::take(&mut current));
                        state = State::ExpectSequenceNumber;
                    } else {
                        let encoding = *decoder.get_or_insert_with(|| detect_encoding(raw_line));
                        let (text, _, _) = encoding.decode(raw_line);
                        current.text.push_str(&text);
                        current.text.push('\n');
                    }
                }
            }
        }
        if matches!(state, State::ExpectText) && !current.text.is_empty() {
            subtitles.insert(current);
        }
        subtitles
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Inserts sorted by start time; an entry with an equal start time
    /// replaces the existing one.
    pub fn insert(&mut self, subtitle: SubTitle) {
        let index = self.index_for(subtitle.start_time);
        if index > 0 && self.entries[index - 1].start_time == subtitle.start_time {
            self.entries[index - 1] = subtitle;
        } else {
            self.entries.insert(index, subtitle);
        }
    }

    /// The unique subtitle visible at `time`, if any: the greatest start
    /// time at or before `time` whose duration still covers it.
    pub fn sub_title_at(&self, time: i64) -> Option<&SubTitle> {
        let index = self.index_for(time);
        if index == 0 {
            return None;
        }
        let subtitle = &self.entries[index - 1];
        if subtitle.start_time <= time && subtitle.start_time + subtitle.duration > time {
            Some(subtitle)
        } else {
            None
        }
    }

    /// Index of the first entry with a start time greater than `time`.
    fn index_for(&self, time: i64) -> usize {
        let mut lower = 0;
        let mut upper = self.entries.len();
        while lower < upper {
            let mid = (lower + upper) / 2;
            if time < self.entries[mid].start_time {
                upper = mid;
            } else {
                lower = mid + 1;
            }
        }
        lower
    }
}

fn strip_line_endings(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\r' || last == b'\n' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Parses `HH:MM:SS,mmm` into microseconds.
fn parse_time_code(text: &str) -> Option<i64> {
    let text = text.trim();
    let (clock, millis) = text.split_once(',')?;
    let mut parts = clock.splitn(3, ':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: i64 = parts.next()?.trim().parse().ok()?;
    let millis: i64 = millis.trim().parse().ok()?;
    Some(((hours * 60 + minutes) * 60 + seconds) * 1_000_000 + millis * 1_000)
}

/// Guesses the file encoding from the first text line: valid UTF-8 is taken
/// at face value, anything else is treated as Windows-1252.
fn detect_encoding(line: &[u8]) -> &'static encoding_rs::Encoding {
    if std::str::from_utf8(line).is_ok() {
        encoding_rs::UTF_8
    } else {
        encoding_rs::WINDOWS_1252
    }
}
