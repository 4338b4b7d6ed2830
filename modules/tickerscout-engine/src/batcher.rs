use tracing::{debug, warn};

use tickerscout_common::{AccountResult, Batch, EngineSettings};

/// Pack account content into as few size-bounded batches as possible.
///
/// First-fit decreasing: format each account's posts into one text block,
/// sort blocks descending by size, place each into the first batch with
/// spare capacity, else open a new batch seeded with `prompt_len` reserved
/// headroom. Inference calls are the dominant cost and latency driver, so
/// minimizing batch count wins over perfect packing.
///
/// Capacity is the full character budget while a batch is image-free and the
/// reduced budget as soon as images are involved (images consume model
/// context). The descending sort happens once and is not revisited when an
/// image-bearing batch shrinks its effective budget mid-pack.
pub fn build_batches(
    account_results: &[AccountResult],
    prompt_len: usize,
    settings: &EngineSettings,
) -> Vec<Batch> {
    let mut entries: Vec<AccountEntry> = account_results
        .iter()
        .filter(|r| r.error.is_none() && !r.posts.is_empty())
        .map(AccountEntry::format)
        .collect();
    entries.sort_by(|a, b| b.text.len().cmp(&a.text.len()));

    let mut batches: Vec<Batch> = Vec::new();
    for entry in entries {
        let slot = batches.iter().position(|batch| {
            let limit = effective_limit(batch, &entry, settings);
            batch.size_chars + entry.text.len() <= limit
        });
        match slot {
            Some(i) => place(&mut batches[i], entry, settings),
            None => batches.push(open_batch(entry, prompt_len, settings)),
        }
    }

    debug!(batches = batches.len(), "Batches packed");
    batches
}

fn effective_limit(batch: &Batch, entry: &AccountEntry, settings: &EngineSettings) -> usize {
    if batch.image_urls.is_empty() && entry.image_urls.is_empty() {
        settings.batch_char_limit
    } else {
        settings.batch_char_limit_with_images
    }
}

fn place(batch: &mut Batch, entry: AccountEntry, settings: &EngineSettings) {
    batch.size_chars += entry.text.len();
    batch.text.push_str(&entry.text);
    batch.accounts.push(entry.account);
    batch.post_urls.extend(entry.post_urls);
    for url in entry.image_urls {
        if batch.image_urls.len() >= settings.max_images_per_batch {
            break;
        }
        if !batch.image_urls.contains(&url) {
            batch.image_urls.push(url);
        }
    }
}

fn open_batch(mut entry: AccountEntry, prompt_len: usize, settings: &EngineSettings) -> Batch {
    let limit = if entry.image_urls.is_empty() {
        settings.batch_char_limit
    } else {
        settings.batch_char_limit_with_images
    };
    let budget = limit.saturating_sub(prompt_len);
    if entry.text.len() > budget {
        // One account alone over the limit: truncate rather than emit a
        // batch the provider is guaranteed to reject.
        warn!(
            account = entry.account.as_str(),
            chars = entry.text.len(),
            budget,
            "Account content exceeds batch budget, truncating"
        );
        entry.text = truncate_at_char_boundary(&entry.text, budget);
    }
    let mut batch = Batch {
        text: String::new(),
        image_urls: Vec::new(),
        post_urls: Vec::new(),
        accounts: Vec::new(),
        size_chars: prompt_len,
    };
    place(&mut batch, entry, settings);
    batch
}

fn truncate_at_char_boundary(text: &str, mut end: usize) -> String {
    if end >= text.len() {
        return text.to_string();
    }
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

struct AccountEntry {
    account: String,
    text: String,
    post_urls: Vec<String>,
    image_urls: Vec<String>,
}

impl AccountEntry {
    fn format(result: &AccountResult) -> Self {
        let mut text = format!("=== @{} ===\n", result.account);
        let mut post_urls = Vec::with_capacity(result.posts.len());
        let mut image_urls = Vec::new();
        for (i, post) in result.posts.iter().enumerate() {
            text.push_str(&format!(
                "--- Post {} | {} | {} ---\n{}\n",
                i + 1,
                post.created_at.to_rfc3339(),
                post.url,
                post.text,
            ));
            if let Some(quoted) = &post.quoted_text {
                text.push_str(&format!("> quoting: {quoted}\n"));
            }
            text.push('\n');
            post_urls.push(post.url.clone());
            for url in &post.media_urls {
                if !image_urls.contains(url) {
                    image_urls.push(url.clone());
                }
            }
        }
        Self {
            account: result.account.clone(),
            text,
            post_urls,
            image_urls,
        }
    }
}
