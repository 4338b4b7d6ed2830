use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use tickerscout_common::{Signal, TickerAction, TickerMention};

/// Tolerant extraction of signals from raw model output. Never fails:
/// unrecoverable input yields an empty list.
///
/// Strategy: strip code fences, pull out the first top-level array literal
/// by bracket matching, try a strict parse, then apply progressively more
/// permissive repairs (trailing commas, bad escapes, control characters),
/// re-parsing after each. All repairs exhausted means give up.
pub fn parse_signals(raw: &str) -> Vec<Signal> {
    let stripped = strip_code_fences(raw);
    let Some(array) = extract_array(&stripped) else {
        debug!("No array literal found in model output");
        return Vec::new();
    };

    if let Some(signals) = try_parse(&array) {
        return signals;
    }

    let repairs: [fn(&str) -> String; 3] = [
        remove_trailing_commas,
        fix_bad_escapes,
        strip_control_chars,
    ];
    let mut candidate = array;
    for repair in repairs {
        candidate = repair(&candidate);
        if let Some(signals) = try_parse(&candidate) {
            debug!("Parsed model output after repair");
            return signals;
        }
    }

    warn!(chars = raw.len(), "Model output unparseable after all repairs");
    Vec::new()
}

/// Loose wire shape: every field optional so one malformed item never sinks
/// the rest of the array.
#[derive(Debug, Deserialize)]
struct RawSignal {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    tickers: Vec<RawTicker>,
    #[serde(default)]
    post_url: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    post_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    action: String,
}

fn try_parse(candidate: &str) -> Option<Vec<Signal>> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(candidate).ok()?;
    let signals = raw
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawSignal>(item).ok())
        .filter_map(convert)
        .collect();
    Some(signals)
}

fn convert(raw: RawSignal) -> Option<Signal> {
    // A signal without a title or summary is noise from a confused model.
    if raw.title.trim().is_empty() && raw.summary.trim().is_empty() {
        return None;
    }
    let tickers = raw
        .tickers
        .into_iter()
        .filter(|t| !t.symbol.trim().is_empty())
        .map(|t| TickerMention {
            symbol: t.symbol.trim().to_string(),
            action: parse_action(&t.action),
        })
        .collect();
    let post_time = raw
        .post_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(Signal {
        title: raw.title.trim().to_string(),
        summary: raw.summary.trim().to_string(),
        category: raw.category.trim().to_string(),
        source: raw.source.trim().to_string(),
        tickers,
        post_url: raw.post_url.filter(|u| !u.trim().is_empty()),
        links: raw.links,
        post_time,
    })
}

/// Map loose action strings to the fixed set. Unknown actions become `watch`
/// rather than dropping the ticker.
fn parse_action(action: &str) -> TickerAction {
    match action.trim().to_lowercase().as_str() {
        "buy" | "long" | "accumulate" | "bullish" => TickerAction::Buy,
        "sell" | "short" | "exit" | "bearish" => TickerAction::Sell,
        "hold" => TickerAction::Hold,
        "mixed" | "neutral" => TickerAction::Mixed,
        _ => TickerAction::Watch,
    }
}

fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the first top-level `[...]` literal, tracking string and escape
/// state so brackets inside strings don't confuse the depth count. Falls back
/// to the widest `[`..`]` span when brackets never balance (truncated
/// output), giving the repair passes something to chew on.
fn extract_array(text: &str) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();
    let start = bytes.iter().position(|&c| c == '[')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(bytes[start..=i].iter().collect());
                }
            }
            _ => {}
        }
    }

    // Unbalanced; take through the last closing bracket if any.
    let end = bytes.iter().rposition(|&c| c == ']')?;
    if end > start {
        Some(bytes[start..=end].iter().collect())
    } else {
        None
    }
}

fn remove_trailing_commas(text: &str) -> String {
    let re = regex::Regex::new(r",\s*([\]}])").expect("valid regex");
    re.replace_all(text, "$1").into_owned()
}

/// Escape lone backslashes that precede characters JSON does not allow after
/// a backslash.
fn fix_bad_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    out.push(c);
                }
                _ => out.push_str("\\\\"),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Drop raw control characters. Newlines between tokens are legal JSON
/// whitespace but illegal inside strings; removing them entirely fixes the
/// broken case and is harmless in the legal one.
fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}
