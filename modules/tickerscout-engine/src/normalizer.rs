use std::collections::HashMap;

use tickerscout_common::{Signal, TickerAction, TickerMention};

/// Ticker spellings the models produce that map to one canonical symbol.
/// Canonical symbols never appear as keys, which keeps normalization
/// idempotent.
const TICKER_ALIASES: &[(&str, &str)] = &[
    ("BRK.A", "BRK-A"),
    ("BRK.B", "BRK-B"),
    ("BRKA", "BRK-A"),
    ("BRKB", "BRK-B"),
    ("BF.B", "BF-B"),
    ("GOOGLE", "GOOGL"),
    ("ALPHABET", "GOOGL"),
    ("NVIDIA", "NVDA"),
    ("TESLA", "TSLA"),
    ("APPLE", "AAPL"),
    ("MICROSOFT", "MSFT"),
    ("AMAZON", "AMZN"),
    ("META PLATFORMS", "META"),
    ("FACEBOOK", "META"),
    ("BITCOIN", "BTC"),
    ("ETHEREUM", "ETH"),
    ("S&P500", "SPX"),
    ("S&P 500", "SPX"),
    ("SP500", "SPX"),
    ("NASDAQ", "NDX"),
];

/// Entities the models sometimes split across two adjacent ticker entries.
/// `(first token, second token, canonical, text spelling to rewrite)`.
const SPLIT_ENTITIES: &[(&str, &str, &str, &str)] = &[
    ("BRK", "A", "BRK-A", "BRK A"),
    ("BRK", "B", "BRK-B", "BRK B"),
    ("BF", "B", "BF-B", "BF B"),
    ("S&P", "500", "SPX", "S&P 500"),
];

/// Normalize a signal list: canonicalize tickers, merge split entities,
/// de-duplicate tickers per signal (conflicting actions become `mixed`),
/// rewrite split-entity mentions in free text, then de-duplicate across the
/// full set.
///
/// Pure and idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(signals: Vec<Signal>) -> Vec<Signal> {
    let normalized: Vec<Signal> = signals.into_iter().map(normalize_signal).collect();
    dedup_signals(normalized)
}

fn normalize_signal(mut signal: Signal) -> Signal {
    let canonical: Vec<TickerMention> = signal
        .tickers
        .into_iter()
        .map(|t| TickerMention {
            symbol: canonical_symbol(&t.symbol),
            action: t.action,
        })
        .collect();
    let merged = merge_split_entities(canonical);
    signal.tickers = dedup_tickers(merged);
    signal.title = rewrite_split_mentions(&signal.title);
    signal.summary = rewrite_split_mentions(&signal.summary);
    signal
}

fn canonical_symbol(symbol: &str) -> String {
    let cleaned = symbol
        .trim()
        .trim_start_matches('$')
        .trim_end_matches('.')
        .to_uppercase();
    for (alias, canonical) in TICKER_ALIASES {
        if cleaned == *alias {
            return (*canonical).to_string();
        }
    }
    cleaned
}

/// Collapse adjacent ticker pairs that are really one split entity.
fn merge_split_entities(tickers: Vec<TickerMention>) -> Vec<TickerMention> {
    let mut out: Vec<TickerMention> = Vec::with_capacity(tickers.len());
    let mut iter = tickers.into_iter().peekable();
    while let Some(current) = iter.next() {
        let merged = iter.peek().and_then(|next| {
            SPLIT_ENTITIES
                .iter()
                .find(|(a, b, _, _)| current.symbol == *a && next.symbol == *b)
                .map(|(_, _, canonical, _)| {
                    let action = if current.action == next.action {
                        current.action
                    } else {
                        TickerAction::Mixed
                    };
                    TickerMention {
                        symbol: (*canonical).to_string(),
                        action,
                    }
                })
        });
        match merged {
            Some(m) => {
                iter.next(); // consume the second half
                out.push(m);
            }
            None => out.push(current),
        }
    }
    out
}

/// De-duplicate tickers within one signal, first occurrence keeps its slot;
/// conflicting actions on the same symbol merge to `mixed`.
fn dedup_tickers(tickers: Vec<TickerMention>) -> Vec<TickerMention> {
    let mut out: Vec<TickerMention> = Vec::with_capacity(tickers.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for ticker in tickers {
        match index.get(&ticker.symbol) {
            Some(&i) => {
                if out[i].action != ticker.action {
                    out[i].action = TickerAction::Mixed;
                }
            }
            None => {
                index.insert(ticker.symbol.clone(), out.len());
                out.push(ticker);
            }
        }
    }
    out
}

fn rewrite_split_mentions(text: &str) -> String {
    let mut out = text.to_string();
    for (_, _, canonical, spelling) in SPLIT_ENTITIES {
        if out.contains(spelling) {
            out = out.replace(spelling, canonical);
        }
    }
    out
}

/// De-duplicate across the full result set. Composite key: `(post_url,
/// title)` when a post URL is present, else `(title, summary)`. The first
/// occurrence wins; later duplicates fold their tickers and links into it.
fn dedup_signals(signals: Vec<Signal>) -> Vec<Signal> {
    let mut out: Vec<Signal> = Vec::with_capacity(signals.len());
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    for signal in signals {
        let key = match &signal.post_url {
            Some(url) => (url.clone(), signal.title.trim().to_lowercase()),
            None => (
                signal.title.trim().to_lowercase(),
                signal.summary.trim().to_lowercase(),
            ),
        };
        match index.get(&key) {
            Some(&i) => {
                let merged_tickers = dedup_tickers(
                    out[i]
                        .tickers
                        .iter()
                        .cloned()
                        .chain(signal.tickers)
                        .collect(),
                );
                out[i].tickers = merged_tickers;
                for link in signal.links {
                    if !out[i].links.contains(&link) {
                        out[i].links.push(link);
                    }
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(signal);
            }
        }
    }
    out
}
