//! Rule-based parsing of console input into [`Command`]s.
//!
//! Parameters may be written `key=value` or `key:value`. Interval tokens
//! (`5min`, `1h`, `2d`) may also appear bare, e.g. `aggregate time 5min`.

use std::path::PathBuf;

use regex::Regex;
use thiserror::Error;

use crate::core::time::Interval;
use crate::session::{Command, PlotOptions};

/// Column plotted or mapped when the input names none.
pub const DEFAULT_VALUE_COLUMN: &str = "backscatter";

/// Highest hex grid resolution.
const MAX_RESOLUTION: u8 = 15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unrecognised command '{0}' (type 'help')")]
    Unknown(String),

    #[error("missing {0}")]
    MissingParameter(&'static str),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Parameters found in one input line.
struct Params {
    pairs: Vec<(String, String)>,
    /// Input with all `key=value` tokens removed
    bare: String,
}

impl Params {
    fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| {
            self.pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        })
    }

    fn list(&self, keys: &[&str]) -> Vec<String> {
        self.get(keys)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn bare_words(&self) -> impl Iterator<Item = &str> {
        self.bare.split_whitespace()
    }
}

pub struct CommandInterpreter {
    param: Regex,
    interval: Regex,
}

impl CommandInterpreter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            param: Regex::new(r"(?i)\b([a-z_]+)\s*[=:]\s*(\S+)")?,
            interval: Regex::new(r"(?i)\b(\d+(?:min|h|d))\b")?,
        })
    }

    fn params(&self, input: &str) -> Params {
        let pairs = self
            .param
            .captures_iter(input)
            .map(|c| (c[1].to_lowercase(), c[2].to_string()))
            .collect();
        let bare = self.param.replace_all(input, " ").into_owned();
        Params { pairs, bare }
    }

    fn find_interval(&self, params: &Params) -> Option<String> {
        params
            .get(&["interval", "every"])
            .map(str::to_string)
            .or_else(|| {
                self.interval
                    .captures(&params.bare)
                    .map(|c| c[1].to_lowercase())
            })
    }

    fn plot_options(&self, params: &Params) -> PlotOptions {
        PlotOptions {
            interval: self.find_interval(params),
            smooth: params.get(&["smooth", "smoothing"]).map(str::to_lowercase),
            frac: params.get(&["frac"]).and_then(|f| f.parse().ok()),
            outliers: params.get(&["outliers", "outlier"]).map(str::to_lowercase),
        }
    }

    fn value_column(params: &Params) -> String {
        params
            .get(&["y", "column", "value"])
            .unwrap_or(DEFAULT_VALUE_COLUMN)
            .to_lowercase()
    }

    /// Map one input line to a command.
    pub fn parse(&self, input: &str) -> Result<Command, ParseError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        let lower = text.to_lowercase();
        let first = lower.split_whitespace().next().unwrap_or("");
        let params = self.params(text);

        let command = match first {
            "exit" | "quit" => Command::Exit,
            "help" | "?" => Command::Help,
            "coords" | "crs" => Command::CoordsInfo,
            "set" => Command::Set(params.pairs),
            "load" => Command::Load {
                dir: params.get(&["dir", "from"]).map(PathBuf::from),
                pattern: params.get(&["pattern"]).map(str::to_string),
                positions: params.get(&["positions", "pos"]).map(PathBuf::from),
            },
            "cache" => self.parse_cache(&params)?,
            "aggregate" => Command::AggregateTime {
                interval: self.find_interval(&params).unwrap_or_default(),
                columns: params.list(&["columns", "cols"]),
                reduction: params.get(&["reduction", "func", "how"]).map(str::to_lowercase),
            },
            "stats" | "statistics" if lower.contains("by time") => Command::StatsByTime {
                interval: self.find_interval(&params).unwrap_or_default(),
                columns: params.list(&["columns", "cols"]),
            },
            "stats" | "statistics" => Command::ComputeStats {
                columns: params.list(&["columns", "cols"]),
            },
            "map" | "hex" => Command::HexMap {
                y: Self::value_column(&params),
                resolution: params
                    .get(&["res", "resolution"])
                    .map(|r| {
                        r.parse().map_err(|_| ParseError::InvalidValue {
                            key: "resolution".to_string(),
                            value: r.to_string(),
                        })
                    })
                    .transpose()?,
            },
            _ if lower.contains("scatter") => Command::ScatterPlot {
                y: Self::value_column(&params),
                x: params.get(&["x"]).map(str::to_lowercase),
                options: self.plot_options(&params),
            },
            _ if lower.contains("plot") => Command::TimeSeriesPlot {
                y: Self::value_column(&params),
                options: self.plot_options(&params),
            },
            _ => return Err(ParseError::Unknown(text.to_string())),
        };

        Ok(command)
    }

    fn parse_cache(&self, params: &Params) -> Result<Command, ParseError> {
        let words: Vec<&str> = params.bare_words().skip(1).collect();
        let key = params
            .get(&["key", "name"])
            .or_else(|| words.get(1).copied())
            .unwrap_or("")
            .to_string();

        match words.first().map(|w| w.to_lowercase()).as_deref() {
            Some("save") => Ok(Command::CacheSave { key }),
            Some("load") => Ok(Command::CacheLoad { key }),
            Some("clear") => {
                let older_than_hours = params
                    .get(&["older", "older_than", "hours"])
                    .map(|h| {
                        h.parse().map_err(|_| ParseError::InvalidValue {
                            key: "older".to_string(),
                            value: h.to_string(),
                        })
                    })
                    .transpose()?;
                Ok(Command::CacheClear { older_than_hours })
            }
            _ => Err(ParseError::MissingParameter("cache action (save, load or clear)")),
        }
    }

    /// Reject commands that lack a required parameter or carry a malformed one.
    pub fn validate(&self, command: &Command) -> Result<(), ParseError> {
        match command {
            Command::Set(params) if params.is_empty() => {
                Err(ParseError::MissingParameter("key=value to set"))
            }
            Command::AggregateTime { interval, .. } | Command::StatsByTime { interval, .. } => {
                check_interval(Some(interval))
            }
            Command::TimeSeriesPlot { y, options } | Command::ScatterPlot { y, options, .. } => {
                if y.is_empty() {
                    return Err(ParseError::MissingParameter("y/column for plotting"));
                }
                check_interval(options.interval.as_ref())
            }
            Command::HexMap { y, resolution } => {
                if y.is_empty() {
                    return Err(ParseError::MissingParameter("value column for map"));
                }
                match resolution {
                    Some(r) if *r > MAX_RESOLUTION => Err(ParseError::InvalidValue {
                        key: "resolution".to_string(),
                        value: r.to_string(),
                    }),
                    _ => Ok(()),
                }
            }
            Command::CacheSave { key } | Command::CacheLoad { key } if key.is_empty() => {
                Err(ParseError::MissingParameter("cache key"))
            }
            _ => Ok(()),
        }
    }
}

fn check_interval(interval: Option<&String>) -> Result<(), ParseError> {
    match interval {
        None => Ok(()),
        Some(i) if i.is_empty() => Err(ParseError::MissingParameter("interval")),
        Some(i) => i.parse::<Interval>().map(|_| ()).map_err(|_| ParseError::InvalidValue {
            key: "interval".to_string(),
            value: i.clone(),
        }),
    }
}
