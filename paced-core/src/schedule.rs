//! Open-model schedule grammar.
//!
//! A schedule is a whitespace separated sequence of segments:
//!
//! ```text
//! rate(10/sec) random_arrivals(1 min) rate(20/sec) even_arrivals(30s) pause(5s)
//! ```
//!
//! `rate` sets the arrival rate at that point of the timeline. An arrivals
//! segment between two rates ramps linearly from the first to the second; one
//! without a following rate keeps the current rate. `/* */` and `//` comments
//! are ignored.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("unexpected `{found}` at offset {pos}, expected {expected}")]
    Unexpected {
        pos: usize,
        found: String,
        expected: &'static str,
    },

    #[error("unknown segment `{name}` at offset {pos}")]
    UnknownSegment { pos: usize, name: String },

    #[error("unknown {kind} unit `{unit}` at offset {pos}")]
    UnknownUnit {
        pos: usize,
        kind: &'static str,
        unit: String,
    },

    #[error("invalid number `{text}` at offset {pos}")]
    InvalidNumber { pos: usize, text: String },

    #[error("unterminated comment starting at offset {pos}")]
    UnterminatedComment { pos: usize },

    #[error("schedule lasts {secs} seconds, more than the longest supported duration")]
    TooLong { secs: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ArrivalsKind {
    Random,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    Rate { per_sec: f64 },
    Arrivals { kind: ArrivalsKind, secs: f64 },
    Pause { secs: f64 },
}

impl Segment {
    pub fn duration_secs(&self) -> f64 {
        match self {
            Self::Rate { .. } => 0.0,
            Self::Arrivals { secs, .. } | Self::Pause { secs } => *secs,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate { per_sec } => write!(f, "rate({per_sec}/sec)"),
            Self::Arrivals { kind, secs } => write!(f, "{kind}_arrivals({secs}s)"),
            Self::Pause { secs } => write!(f, "pause({secs}s)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreadSchedule {
    segments: Vec<Segment>,
}

impl ThreadSchedule {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_secs(&self) -> f64 {
        self.segments.iter().map(Segment::duration_secs).sum()
    }

    /// Saturates at [`Duration::MAX`]; parsed schedules always fit.
    pub fn total_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.total_secs()).unwrap_or(Duration::MAX)
    }
}

impl fmt::Display for ThreadSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

impl FromStr for ThreadSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser { src: s, pos: 0 }.parse()
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(mut self) -> Result<ThreadSchedule, ScheduleError> {
        let mut segments = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.pos >= self.src.len() {
                break;
            }

            let name_pos = self.pos;
            let name = self.take_while(|c| c.is_ascii_alphabetic() || c == '_');
            if name.is_empty() {
                return Err(self.unexpected("segment name"));
            }
            self.skip_trivia()?;
            self.expect('(')?;

            let segment = match name {
                "rate" => Segment::Rate {
                    per_sec: self.rate()?,
                },
                "random_arrivals" => Segment::Arrivals {
                    kind: ArrivalsKind::Random,
                    secs: self.duration()?,
                },
                "even_arrivals" => Segment::Arrivals {
                    kind: ArrivalsKind::Even,
                    secs: self.duration()?,
                },
                "pause" => Segment::Pause {
                    secs: self.duration()?,
                },
                other => {
                    return Err(ScheduleError::UnknownSegment {
                        pos: name_pos,
                        name: other.to_string(),
                    });
                }
            };

            self.skip_trivia()?;
            self.expect(')')?;
            segments.push(segment);
        }

        let schedule = ThreadSchedule { segments };
        let secs = schedule.total_secs();
        if Duration::try_from_secs_f64(secs).is_err() {
            return Err(ScheduleError::TooLong {
                secs: secs.to_string(),
            });
        }
        Ok(schedule)
    }

    fn rate(&mut self) -> Result<f64, ScheduleError> {
        self.skip_trivia()?;
        let value = self.number()?;
        self.skip_trivia()?;
        self.expect('/')?;
        self.skip_trivia()?;

        let unit_pos = self.pos;
        let unit = self.take_while(|c| c.is_ascii_alphabetic());
        let secs = unit_secs(unit).ok_or_else(|| ScheduleError::UnknownUnit {
            pos: unit_pos,
            kind: "rate",
            unit: unit.to_string(),
        })?;
        Ok(value / secs)
    }

    /// One or more `<number><unit>` terms, summed (`1m 30s`).
    fn duration(&mut self) -> Result<f64, ScheduleError> {
        let mut total = 0.0;
        let mut terms = 0;
        loop {
            self.skip_trivia()?;
            if !self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                break;
            }
            let value = self.number()?;
            self.skip_trivia()?;

            let unit_pos = self.pos;
            let unit = self.take_while(|c| c.is_ascii_alphabetic());
            if unit.is_empty() {
                return Err(self.unexpected("time unit"));
            }
            let secs = unit_secs(unit).ok_or_else(|| ScheduleError::UnknownUnit {
                pos: unit_pos,
                kind: "time",
                unit: unit.to_string(),
            })?;
            total += value * secs;
            terms += 1;
        }

        if terms == 0 {
            return Err(self.unexpected("duration"));
        }
        Ok(total)
    }

    fn number(&mut self) -> Result<f64, ScheduleError> {
        let start = self.pos;
        let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
        if text.is_empty() {
            return Err(self.unexpected("number"));
        }
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ScheduleError::InvalidNumber {
                pos: start,
                text: text.to_string(),
            })
    }

    fn skip_trivia(&mut self) -> Result<(), ScheduleError> {
        loop {
            let rest = &self.src[self.pos..];
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("/*") {
                let start = self.pos;
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += 2 + end + 2,
                    None => return Err(ScheduleError::UnterminatedComment { pos: start }),
                }
            } else if trimmed.starts_with("//") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else {
                return Ok(());
            }
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ScheduleError> {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            return Ok(());
        }
        Err(self.unexpected(match ch {
            '(' => "`(`",
            ')' => "`)`",
            '/' => "`/`",
            _ => "punctuation",
        }))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let src = self.src;
        let rest = &src[self.pos..];
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn unexpected(&self, expected: &'static str) -> ScheduleError {
        let found = match self.peek() {
            Some(c) => c.to_string(),
            None => "end of input".to_string(),
        };
        ScheduleError::Unexpected {
            pos: self.pos,
            found,
            expected,
        }
    }
}

fn unit_secs(unit: &str) -> Option<f64> {
    Some(match unit {
        "ms" => 0.001,
        "s" | "sec" => 1.0,
        "m" | "min" => 60.0,
        "h" | "hour" => 3600.0,
        "d" | "day" => 86_400.0,
        _ => return None,
    })
}
