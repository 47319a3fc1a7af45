//! Parser for worker log lines
//!
//! Extracts the elapsed-time triple and the labeled block counter from the
//! last line of the worker's log. Parsing is a two-stage contract: terminal
//! escape sequences are stripped first (idempotently), then the selected
//! grammar is matched against the cleaned text.
//!
//! Historical log formats are a small closed set. Each one is a distinct
//! [`LineGrammar`] selected explicitly at parser construction; there is no
//! inline format sniffing.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Metrics;

/// Errors that can occur while parsing a log line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The line does not contain the expected grammar
    #[error("log line does not match the {grammar} grammar")]
    NoMatch {
        /// The grammar that was tried
        grammar: LineGrammar,
    },
    /// The same label appeared more than once with conflicting counts
    #[error("ambiguous counters for label `{label}`: {first} vs {second}")]
    AmbiguousMatch {
        /// The conflicting label
        label: CounterLabel,
        /// First count seen
        first: u64,
        /// Conflicting count seen later in the line
        second: u64,
    },
    /// A numeric component does not fit the target integer type
    #[error("numeric component `{value}` overflows")]
    NumericOverflow {
        /// The offending digit run
        value: String,
    },
}

/// Labels the worker uses for its block counter, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterLabel {
    /// Regular blocks
    Normal,
    /// Xuni blocks
    Xuni,
}

impl CounterLabel {
    /// Fixed precedence over the label set, highest first
    pub const PRECEDENCE: [Self; 2] = [Self::Normal, Self::Xuni];

    /// The label text as it appears in log lines
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Xuni => "xuni",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "xuni" => Some(Self::Xuni),
            _ => None,
        }
    }
}

impl std::fmt::Display for CounterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log-line grammar versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineGrammar {
    /// Current format: `Details=<label>:<count>` tokens
    #[default]
    Canonical,
    /// Historical format: bare `<label>:<count>` tokens without the
    /// `Details=` prefix
    LegacyBare,
}

impl std::fmt::Display for LineGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canonical => f.write_str("canonical"),
            Self::LegacyBare => f.write_str("legacy-bare"),
        }
    }
}

/// A successfully parsed log line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// The extracted metrics
    pub metrics: Metrics,
    /// Which counter label supplied the block count
    pub label: CounterLabel,
    /// True when more than one label matched and precedence decided; the
    /// chosen label is logged so the resolution is auditable
    pub ambiguous: bool,
}

/// Stateless parser for one log-line grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineParser {
    grammar: LineGrammar,
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSI sequences (ESC [ ... final byte) and OSC sequences (ESC ] ... BEL
    // or ESC \). Removing a whole sequence cannot create a new one, which
    // makes stripping idempotent.
    RE.get_or_init(|| {
        Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\))")
            .expect("ANSI regex is valid")
    })
}

fn elapsed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The elapsed triple sits at the start of the progress bracket, so anchor
    // on `[` to avoid matching wall-clock timestamps elsewhere in the line.
    RE.get_or_init(|| {
        Regex::new(r"Mining:.*?\[(\d+):(\d+):(\d+)[,\]]").expect("elapsed regex is valid")
    })
}

fn canonical_counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Details=([A-Za-z]+):(\d+)").expect("counter regex is valid"))
}

fn legacy_counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(normal|xuni):(\d+)").expect("counter regex is valid"))
}

/// Removes terminal control/escape sequences from a line.
///
/// Idempotent: stripping an already-clean line returns it unchanged, and
/// ordinary text is never altered.
#[must_use]
pub fn strip_ansi(line: &str) -> String {
    ansi_re().replace_all(line, "").into_owned()
}

impl LogLineParser {
    /// Creates a parser for the given grammar version
    #[must_use]
    pub const fn new(grammar: LineGrammar) -> Self {
        Self { grammar }
    }

    /// Parses one raw log line into [`ParsedLine`].
    ///
    /// The line is ANSI-stripped first, then matched against the selected
    /// grammar. When several labeled counters are present, the fixed label
    /// precedence (`normal` before `xuni`) picks the winner and the result
    /// is flagged ambiguous.
    ///
    /// # Errors
    ///
    /// - [`ParseError::NoMatch`] when the elapsed triple or counter token is
    ///   missing or malformed (including `M >= 60` / `S >= 60`)
    /// - [`ParseError::AmbiguousMatch`] when one label carries conflicting counts
    /// - [`ParseError::NumericOverflow`] when a digit run exceeds `u64`
    pub fn parse(&self, raw_line: &str) -> Result<ParsedLine, ParseError> {
        let clean = strip_ansi(raw_line);

        let elapsed_hours = self.parse_elapsed(&clean)?;
        let counters = self.collect_counters(&clean)?;
        let (label, block_count, ambiguous) = self.resolve_counters(&counters)?;

        if ambiguous {
            tracing::warn!(
                label = %label,
                count = block_count,
                line = %clean,
                "Multiple counter labels matched; resolved by precedence"
            );
        }

        Ok(ParsedLine {
            metrics: Metrics {
                elapsed_hours,
                block_count,
                raw_line: raw_line.to_string(),
            },
            label,
            ambiguous,
        })
    }

    /// Extracts the `H:MM:SS` triple and converts it to fractional hours.
    ///
    /// No truncation happens here; display rounding belongs to the report
    /// layer.
    fn parse_elapsed(&self, clean: &str) -> Result<f64, ParseError> {
        let caps = elapsed_re().captures(clean).ok_or(ParseError::NoMatch {
            grammar: self.grammar,
        })?;

        let component = |i: usize| -> Result<u64, ParseError> {
            let digits = &caps[i];
            digits.parse().map_err(|_| ParseError::NumericOverflow {
                value: digits.to_string(),
            })
        };

        let hours = component(1)?;
        let minutes = component(2)?;
        let seconds = component(3)?;

        if minutes >= 60 || seconds >= 60 {
            return Err(ParseError::NoMatch {
                grammar: self.grammar,
            });
        }

        Ok(hours as f64 + minutes as f64 / 60.0 + seconds as f64 / 3600.0)
    }

    /// Collects every recognized `<label>:<count>` token in grammar order.
    ///
    /// Unrecognized labels are not part of the closed set and are ignored.
    fn collect_counters(&self, clean: &str) -> Result<Vec<(CounterLabel, u64)>, ParseError> {
        let re = match self.grammar {
            LineGrammar::Canonical => canonical_counter_re(),
            LineGrammar::LegacyBare => legacy_counter_re(),
        };

        let mut counters = Vec::new();
        for caps in re.captures_iter(clean) {
            let Some(label) = CounterLabel::from_str(&caps[1]) else {
                continue;
            };
            let digits = &caps[2];
            let count: u64 = digits.parse().map_err(|_| ParseError::NumericOverflow {
                value: digits.to_string(),
            })?;
            counters.push((label, count));
        }
        Ok(counters)
    }

    /// Resolves the collected counters to a single `(label, count)` pair.
    ///
    /// Distinct labels resolve by [`CounterLabel::PRECEDENCE`]; the same
    /// label with conflicting counts has no defensible resolution.
    fn resolve_counters(
        &self,
        counters: &[(CounterLabel, u64)],
    ) -> Result<(CounterLabel, u64, bool), ParseError> {
        let mut per_label: [Option<u64>; 2] = [None, None];
        let mut distinct_labels = 0usize;

        for &(label, count) in counters {
            let slot = &mut per_label[label as usize];
            match slot {
                None => {
                    *slot = Some(count);
                    distinct_labels += 1;
                }
                Some(existing) if *existing != count => {
                    return Err(ParseError::AmbiguousMatch {
                        label,
                        first: *existing,
                        second: count,
                    });
                }
                Some(_) => {}
            }
        }

        for label in CounterLabel::PRECEDENCE {
            if let Some(count) = per_label[label as usize] {
                return Ok((label, count, distinct_labels > 1));
            }
        }

        Err(ParseError::NoMatch {
            grammar: self.grammar,
        })
    }
}
