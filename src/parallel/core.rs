use anyhow::Result;
use crossbeam::channel::{Receiver, Sender, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::sink::ReportSink;

/// One item that did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the item in the input list
    pub index: usize,
    /// Rendered error chain (or panic payload)
    pub message: String,
}

/// Aggregate status of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Number of items the batch was given
    pub items: usize,
    /// Failed items, sorted by input index
    pub failures: Vec<ItemFailure>,
}

impl BatchResult {
    /// True when every item succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.items - self.failures.len()
    }
}

/// Outcome message sent from a worker back to the collector
struct ItemOutcome {
    index: usize,
    failure: Option<String>,
}

/// Everything a worker thread needs, bundled to keep `worker_thread` readable
struct WorkerContext<'scope, T, S: ?Sized, F> {
    worker_id: usize,
    work_rx: Receiver<(usize, &'scope T)>,
    result_tx: Sender<ItemOutcome>,
    sink: &'scope S,
    work: &'scope F,
}

/// Fixed-size pool of worker threads for one batch
///
/// Items are fed through a bounded channel in input order and each idle
/// worker takes the next one, so slow items never hold back a whole static
/// partition of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with exactly `workers` threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    pub fn new(workers: usize) -> Self {
        assert!(workers >= 1, "worker pool needs at least one thread");
        Self { workers }
    }

    /// Create a pool sized by [`resolve_limit`].
    pub fn with_limit(requested: usize, item_count: usize, default_workers: usize) -> Self {
        Self::new(resolve_limit(requested, item_count, default_workers))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` once for every item and wait for all of them.
    ///
    /// `work` receives the item index, the item and a private buffer for the
    /// item's report block. Whatever ends up in the buffer is handed to
    /// `sink` when the worker returns, whether it succeeded or not. An error
    /// or a panic inside `work` marks only that item as failed; every other
    /// item still runs.
    ///
    /// Returns an error only when the pool machinery itself breaks down.
    pub fn run<T, S, F>(&self, items: &[T], sink: &S, work: F) -> Result<BatchResult>
    where
        T: Sync,
        S: ReportSink + ?Sized,
        F: Fn(usize, &T, &mut Vec<u8>) -> Result<()> + Sync,
    {
        let total_items = items.len();
        if total_items == 0 {
            return Ok(BatchResult::default());
        }

        let actual_workers = self.workers.min(total_items);
        let (work_tx, work_rx) = bounded::<(usize, &T)>(actual_workers);
        let (result_tx, result_rx) = bounded::<ItemOutcome>(actual_workers * 2);

        tracing::debug!(
            workers = actual_workers,
            items = total_items,
            "starting worker pool"
        );

        let work = &work;
        crossbeam::thread::scope(|s| -> Result<BatchResult> {
            for worker_id in 0..actual_workers {
                let ctx = WorkerContext {
                    worker_id,
                    work_rx: work_rx.clone(),
                    result_tx: result_tx.clone(),
                    sink,
                    work,
                };

                s.builder()
                    .name(format!("alignscan-worker-{worker_id}"))
                    .spawn(move |_| worker_thread(ctx))?;
            }

            // Producer thread: feed items in input order
            s.spawn(move |_| {
                for (index, item) in items.iter().enumerate() {
                    if work_tx.send((index, item)).is_err() {
                        break; // Workers dropped
                    }
                }
            });

            // Drop our copies so the channels close when the threads finish
            drop(work_rx);
            drop(result_tx);

            Ok(collect_results(result_rx, total_items))
        })
        .map_err(|_| anyhow::anyhow!("Thread panic occurred during parallel execution"))?
    }
}

fn worker_thread<T, S, F>(ctx: WorkerContext<'_, T, S, F>)
where
    S: ReportSink + ?Sized,
    F: Fn(usize, &T, &mut Vec<u8>) -> Result<()>,
{
    while let Ok((index, item)) = ctx.work_rx.recv() {
        tracing::trace!(worker = ctx.worker_id, index, "picked up item");

        let mut block = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (ctx.work)(index, item, &mut block)));

        let mut failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(format!("worker panicked: {}", panic_message(&*payload))),
        };

        // Always submit, even an empty block, so an ordered sink can move past us
        if let Err(e) = ctx.sink.submit(index, block)
            && failure.is_none()
        {
            failure = Some(format!("writing report: {e}"));
        }

        if ctx.result_tx.send(ItemOutcome { index, failure }).is_err() {
            break; // Collector dropped
        }
    }
}

fn collect_results(result_rx: Receiver<ItemOutcome>, total_items: usize) -> BatchResult {
    let mut failures = Vec::new();
    let mut items_processed = 0;

    while let Ok(outcome) = result_rx.recv() {
        if let Some(message) = outcome.failure {
            failures.push(ItemFailure {
                index: outcome.index,
                message,
            });
        }
        items_processed += 1;

        if items_processed >= total_items {
            break;
        }
    }

    debug_assert_eq!(items_processed, total_items, "worker pool lost items");
    failures.sort_by_key(|f| f.index);

    BatchResult {
        items: total_items,
        failures,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Effective thread count for a batch.
///
/// `requested == 0` selects `default_workers`. The result is always within
/// `[1, item_count]` (or exactly 1 for an empty batch).
pub fn resolve_limit(requested: usize, item_count: usize, default_workers: usize) -> usize {
    let wanted = if requested == 0 {
        default_workers
    } else {
        requested
    };
    wanted.clamp(1, item_count.max(1))
}

/// Default thread count from available cores and configuration limits.
///
/// ```text
/// 1. cores = num_cpus::get()
/// 2. by_percentage = max(1, cores * thread_percentage / 100)
/// 3. min(max_threads, by_percentage) when max_threads > 0
/// ```
pub fn default_workers(max_threads: usize, thread_percentage: u8) -> usize {
    let available_cores = num_cpus::get();
    let by_percentage = std::cmp::max(1, (available_cores * thread_percentage as usize) / 100);

    if max_threads > 0 {
        std::cmp::min(max_threads, by_percentage)
    } else {
        by_percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::{CompletionSink, OrderedSink, Reduction};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn write_block(block: &mut Vec<u8>, text: &str) {
        block.extend_from_slice(text.as_bytes());
    }

    #[test]
    fn test_run_accepts_trait_object_sink() {
        let ordered = OrderedSink::new(Vec::new());
        let sink: &dyn ReportSink = &ordered;

        let batch = WorkerPool::new(2)
            .run(&[1u32, 2, 3], sink, |_, item, block| {
                write_block(block, &format!("{item}\n"));
                Ok(())
            })
            .unwrap();

        assert!(batch.is_success());
        assert_eq!(ordered.into_inner(), b"1\n2\n3\n");
    }

    fn names(output: Vec<u8>) -> Vec<String> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(0, 10, 4), 4);
        assert_eq!(resolve_limit(0, 2, 8), 2);
        assert_eq!(resolve_limit(3, 10, 8), 3);
        assert_eq!(resolve_limit(50, 10, 8), 10);
        assert_eq!(resolve_limit(0, 10, 0), 1);
        assert_eq!(resolve_limit(5, 0, 8), 1);
    }

    #[test]
    fn test_default_workers_respects_max_threads() {
        assert!(default_workers(0, 100) >= 1);
        assert!(default_workers(1, 100) == 1);
        assert!(default_workers(0, 1) >= 1);
    }

    #[test]
    #[should_panic(expected = "at least one thread")]
    fn test_zero_workers_is_a_defect() {
        WorkerPool::new(0);
    }

    #[test]
    fn test_every_item_processed_exactly_once() {
        let items: Vec<usize> = (0..37).collect();

        for limit in 1..=items.len() {
            let seen = Mutex::new(Vec::new());
            let sink = OrderedSink::new(Vec::new());
            let batch = WorkerPool::new(limit)
                .run(&items, &sink, |index, item, _| {
                    assert_eq!(index, *item);
                    seen.lock().unwrap().push(*item);
                    Ok(())
                })
                .unwrap();

            let mut seen = seen.into_inner().unwrap();
            seen.sort_unstable();
            assert_eq!(seen, items, "limit {limit}");
            assert_eq!(batch.items, items.len());
            assert!(batch.is_success());
        }
    }

    #[test]
    fn test_empty_batch() {
        let items: Vec<u32> = Vec::new();
        let sink = OrderedSink::new(Vec::new());
        let batch = WorkerPool::new(4)
            .run(&items, &sink, |_, _, _| panic!("no items to run"))
            .unwrap();

        assert!(batch.is_success());
        assert_eq!(batch.items, 0);
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn test_output_in_input_order_despite_delays() {
        // A is slowest, B fastest: B and C finish first but must wait for A.
        let items = [("A", 30u64), ("B", 10), ("C", 20)];
        let finished = Mutex::new(Vec::new());
        let sink = OrderedSink::new(Vec::new());

        let batch = WorkerPool::new(2)
            .run(&items, &sink, |_, (name, delay), block| {
                thread::sleep(Duration::from_millis(*delay));
                finished.lock().unwrap().push(*name);
                write_block(block, &format!("{name}\n"));
                Ok(())
            })
            .unwrap();

        assert!(batch.is_success());
        assert_eq!(names(sink.into_inner()), vec!["A", "B", "C"]);
        assert_eq!(finished.into_inner().unwrap().first(), Some(&"B"));
    }

    #[test]
    fn test_multi_line_blocks_stay_contiguous() {
        let items: Vec<usize> = (0..12).collect();
        let sink = OrderedSink::new(Vec::new());

        WorkerPool::new(4)
            .run(&items, &sink, |_, item, block| {
                for line in 0..3 {
                    write_block(block, &format!("{item}:{line}\n"));
                    thread::sleep(Duration::from_millis(((item * 7) % 5) as u64));
                }
                Ok(())
            })
            .unwrap();

        let expected: Vec<String> = items
            .iter()
            .flat_map(|item| (0..3).map(move |line| format!("{item}:{line}")))
            .collect();
        assert_eq!(names(sink.into_inner()), expected);
    }

    #[test]
    fn test_failure_is_isolated() {
        let items = ["A", "B", "C"];
        let sink = OrderedSink::new(Vec::new());

        let batch = WorkerPool::new(2)
            .run(&items, &sink, |_, name, block| {
                if *name == "B" {
                    anyhow::bail!("cannot open {name}");
                }
                write_block(block, &format!("{name}\n"));
                Ok(())
            })
            .unwrap();

        assert!(!batch.is_success());
        assert_eq!(batch.succeeded(), 2);
        assert_eq!(
            batch.failures,
            vec![ItemFailure {
                index: 1,
                message: "cannot open B".to_string()
            }]
        );
        assert_eq!(names(sink.into_inner()), vec!["A", "C"]);
    }

    #[test]
    fn test_partial_block_of_failed_item_is_kept() {
        let items = ["A", "B"];
        let sink = OrderedSink::new(Vec::new());

        let batch = WorkerPool::new(2)
            .run(&items, &sink, |_, name, block| {
                write_block(block, &format!("{name}\n"));
                if *name == "A" {
                    anyhow::bail!("second device failed");
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(batch.failures.len(), 1);
        assert_eq!(names(sink.into_inner()), vec!["A", "B"]);
    }

    #[test]
    fn test_panic_is_isolated() {
        let items: Vec<usize> = (0..6).collect();
        let ran = AtomicUsize::new(0);
        let sink = OrderedSink::new(Vec::new());

        let batch = WorkerPool::new(3)
            .run(&items, &sink, |_, item, block| {
                ran.fetch_add(1, Ordering::SeqCst);
                if *item == 2 {
                    panic!("boom on {item}");
                }
                write_block(block, &format!("{item}\n"));
                Ok(())
            })
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 6);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].index, 2);
        assert!(batch.failures[0].message.contains("boom on 2"));
        assert_eq!(names(sink.into_inner()), vec!["0", "1", "3", "4", "5"]);
    }

    #[test]
    fn test_concurrency_never_exceeds_limit_and_fills_slots() {
        let items: Vec<u64> = vec![40, 5, 5, 5, 5, 5, 5, 5, 5, 40];
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let sink = CompletionSink::new(Vec::new());

        WorkerPool::new(4)
            .run(&items, &sink, |_, delay, _| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(*delay));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency {peak}");
        assert!(peak >= 2, "pool never ran items concurrently");
    }

    #[test]
    fn test_greedy_dispatch_keeps_workers_busy() {
        // Item 0 is long; with two workers the other worker should drain the rest.
        let items: Vec<u64> = vec![200, 1, 1, 1, 1, 1];
        let workers_seen = Mutex::new(HashSet::new());
        let sink = CompletionSink::new(Vec::new());

        WorkerPool::new(2)
            .run(&items, &sink, |index, delay, _| {
                thread::sleep(Duration::from_millis(*delay));
                if index > 0 {
                    workers_seen
                        .lock()
                        .unwrap()
                        .insert(thread::current().name().map(str::to_string));
                }
                Ok(())
            })
            .unwrap();

        // Only the second worker was free while item 0 ran.
        assert_eq!(workers_seen.into_inner().unwrap().len(), 1);
    }

    #[test]
    fn test_results_identical_across_limits() {
        let contributions: Vec<u32> = vec![31, 12, 9, 20, 17, 9, 40, 11];
        let mut runs = Vec::new();

        for requested in [0, 1, 3, contributions.len(), 100] {
            let pool = WorkerPool::with_limit(requested, contributions.len(), 4);
            let worst = Reduction::minimum(u32::MAX);
            let sink = OrderedSink::new(Vec::new());

            let batch = pool
                .run(&contributions, &sink, |index, value, block| {
                    thread::sleep(Duration::from_millis(((index * 13) % 7) as u64));
                    worst.update(*value);
                    write_block(block, &format!("{index}={value}\n"));
                    if *value == 40 {
                        anyhow::bail!("too large");
                    }
                    Ok(())
                })
                .unwrap();

            runs.push((batch, worst.into_inner(), sink.into_inner()));
        }

        let first = &runs[0];
        assert_eq!(first.1, 9);
        for run in &runs[1..] {
            assert_eq!(run, first);
        }
    }
}
