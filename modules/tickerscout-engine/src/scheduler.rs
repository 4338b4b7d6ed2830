use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::join_all;
use tracing::{debug, warn};

use tickerscout_common::{Batch, CancelToken, ScanError, Signal};

/// Run one inference per batch across a bounded worker pool, preserving batch
/// order in the merged output.
///
/// Workers claim batch indices from a shared counter, so there are never more
/// than `concurrency` inference calls in flight and no batch runs twice. The
/// first error stops further claims; already-running batches finish, then the
/// error is surfaced. External cancellation surfaces as a single `Cancelled`.
pub async fn run_all<F, Fut>(
    batches: Vec<Batch>,
    concurrency: usize,
    cancel: &CancelToken,
    run: F,
) -> Result<Vec<Signal>, ScanError>
where
    F: Fn(usize, Batch) -> Fut,
    Fut: Future<Output = Result<Vec<Signal>, ScanError>>,
{
    if batches.is_empty() {
        return Ok(Vec::new());
    }

    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let first_error: Mutex<Option<ScanError>> = Mutex::new(None);
    let slots: Mutex<Vec<Option<Vec<Signal>>>> = Mutex::new(vec![None; batches.len()]);
    let run = &run;
    let batches = &batches;

    let workers = (0..concurrency.min(batches.len()).max(1)).map(|worker| {
        let next = &next;
        let stop = &stop;
        let first_error = &first_error;
        let slots = &slots;
        async move {
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if cancel.is_cancelled() {
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= batches.len() {
                    break;
                }
                debug!(worker, batch = i, "Worker claimed batch");
                match run(i, batches[i].clone()).await {
                    Ok(signals) => {
                        slots.lock().expect("slots poisoned")[i] = Some(signals);
                    }
                    Err(e) => {
                        warn!(batch = i, error = %e, "Batch failed, stopping further claims");
                        let mut guard = first_error.lock().expect("error slot poisoned");
                        if guard.is_none() {
                            *guard = Some(e);
                        }
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
    });
    join_all(workers).await;

    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    if let Some(e) = first_error.into_inner().expect("error slot poisoned") {
        return Err(e);
    }

    let merged = slots
        .into_inner()
        .expect("slots poisoned")
        .into_iter()
        .flatten()
        .flatten()
        .collect();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tickerscout_common::TickerAction;
    use tickerscout_common::TickerMention;

    fn batch(tag: &str) -> Batch {
        Batch {
            text: tag.to_string(),
            image_urls: vec![],
            post_urls: vec![],
            accounts: vec![tag.to_string()],
            size_chars: 10,
        }
    }

    fn signal(title: &str) -> Signal {
        Signal {
            title: title.to_string(),
            summary: "s".to_string(),
            category: String::new(),
            source: String::new(),
            tickers: vec![TickerMention {
                symbol: "NVDA".to_string(),
                action: TickerAction::Watch,
            }],
            post_url: None,
            links: vec![],
            post_time: None,
        }
    }

    #[tokio::test]
    async fn merges_in_batch_order_despite_completion_order() {
        let batches = vec![batch("0"), batch("1"), batch("2")];
        let merged = run_all(batches, 3, &CancelToken::new(), |i, b| async move {
            // Earlier batches finish later.
            tokio::time::sleep(Duration::from_millis(30 - 10 * i as u64)).await;
            Ok(vec![signal(&b.text)])
        })
        .await
        .unwrap();
        let titles: Vec<&str> = merged.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn concurrency_bound_is_respected() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let batches: Vec<Batch> = (0..6).map(|i| batch(&i.to_string())).collect();
        run_all(batches, 2, &CancelToken::new(), |_, _| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![])
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn no_batch_runs_twice() {
        let runs = Mutex::new(vec![0u32; 5]);
        let batches: Vec<Batch> = (0..5).map(|i| batch(&i.to_string())).collect();
        run_all(batches, 3, &CancelToken::new(), |i, _| {
            let runs = &runs;
            async move {
                runs.lock().unwrap()[i] += 1;
                Ok(vec![])
            }
        })
        .await
        .unwrap();
        assert_eq!(*runs.lock().unwrap(), vec![1, 1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn first_error_stops_further_claims() {
        let ran = AtomicUsize::new(0);
        let batches: Vec<Batch> = (0..10).map(|i| batch(&i.to_string())).collect();
        let err = run_all(batches, 1, &CancelToken::new(), |i, _| {
            let ran = &ran;
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    Err(ScanError::Auth("bad key".to_string()))
                } else {
                    Ok(vec![])
                }
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Auth(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn external_cancel_surfaces_once() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let batches = vec![batch("0"), batch("1")];
        let err = run_all(batches, 2, &cancel, |_, _| async move {
            Ok(vec![signal("never")])
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn empty_batch_list_yields_empty() {
        let merged = run_all(vec![], 3, &CancelToken::new(), |_, _| async move {
            Ok(vec![signal("never")])
        })
        .await
        .unwrap();
        assert!(merged.is_empty());
    }
}
