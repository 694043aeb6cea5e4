use rayon::ThreadPoolBuilder;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Fans independent tasks out over a bounded rayon pool and collects one
/// result per task, in task order. A panicking task aborts the whole batch;
/// callers that need partial progress must encode failure into the result
/// value instead.
pub fn run_tasks<T, R, F>(tasks: Vec<T>, workers: usize, job: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    if tasks.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, tasks.len());
    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| tasks.into_par_iter().map(&job).collect()),
        Err(err) => {
            tracing::warn!(error = %err, "thread pool unavailable, running tasks inline");
            tasks.into_iter().map(job).collect()
        }
    }
}

/// Worker count when the configuration does not pin one.
pub fn available_workers() -> usize {
    rayon::current_num_threads()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn one_result_per_task_in_task_order() {
        let tasks: Vec<u64> = (0..100).collect();
        let results = run_tasks(tasks, 4, |n| n * 2);
        let expected: Vec<u64> = (0..100).map(|n| n * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn worker_count_is_bounded() {
        let peak = AtomicUsize::new(0);
        let active = AtomicUsize::new(0);
        let tasks: Vec<usize> = (0..32).collect();
        run_tasks(tasks, 3, |n| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
            n
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let results: Vec<u32> = run_tasks(Vec::<u32>::new(), 8, |n| n);
        assert!(results.is_empty());
    }

    #[test]
    fn errors_travel_as_values() {
        let results = run_tasks(vec![1u32, 0, 3], 2, |n| {
            if n == 0 {
                Err("zero".to_string())
            } else {
                Ok(n)
            }
        });
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    #[should_panic]
    fn panicking_task_aborts_the_batch() {
        run_tasks(vec![1u32, 2, 3], 2, |n| {
            if n == 2 {
                panic!("boom");
            }
            n
        });
    }
}
