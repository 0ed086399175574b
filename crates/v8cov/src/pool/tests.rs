#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use crate::convert::ConvertTask;
use crate::v8::{V8Function, V8Range};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn doubling_pool(max_workers: usize) -> WorkerPool<u64, u64> {
    WorkerPool::new("test-pool", max_workers, Arc::new(|x: u64| x * 2))
}

mod inline_tests {
    use super::*;

    #[test]
    fn test_zero_workers_runs_inline() {
        let pool = doubling_pool(0);
        let results: Vec<_> = (0..5)
            .map(|i| pool.run_task(i).unwrap().wait().unwrap())
            .collect();
        assert_eq!(results, vec![0, 2, 4, 6, 8]);
        assert_eq!(pool.spawned_total(), 0);
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_zero_workers_runs_on_caller_thread() {
        let caller = thread::current().id();
        let pool: WorkerPool<(), bool> =
            WorkerPool::new("inline", 0, Arc::new(move |()| thread::current().id() == caller));
        assert!(pool.run_task(()).unwrap().wait().unwrap());
    }

    #[test]
    fn test_inline_panic_is_reported() {
        let pool: WorkerPool<u64, u64> =
            WorkerPool::new("inline", 0, Arc::new(|_: u64| -> u64 { panic!("boom") }));
        let err = pool.run_task(1).unwrap().wait().unwrap_err();
        assert!(matches!(err, CovError::WorkerCrashed { message, .. } if message == "boom"));
    }
}

mod limit_tests {
    use super::*;

    #[test]
    fn test_never_exceeds_max_workers() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let pool: WorkerPool<u64, u64> = WorkerPool::new(
            "limit",
            2,
            Arc::new(move |x: u64| {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                r.fetch_sub(1, Ordering::SeqCst);
                x + 1
            }),
        );

        let handles: Vec<_> = (0..10).map(|i| pool.run_task(i).unwrap()).collect();
        assert!(pool.live_workers() <= 2);
        let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();

        assert_eq!(results, (1..=10).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(pool.spawned_total() <= 2);
        assert!(pool.live_workers() <= 2);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_workers_are_reused() {
        let pool = doubling_pool(4);
        for i in 0..20 {
            assert_eq!(pool.run_task(i).unwrap().wait().unwrap(), i * 2);
        }
        // sequential submissions find an idle worker after the first spawn
        assert!(pool.spawned_total() <= 2);
        assert!(pool.live_workers() >= 1);
    }

    #[test]
    fn test_idle_plus_busy_equals_live() {
        let pool = doubling_pool(3);
        let handles: Vec<_> = (0..6).map(|i| pool.run_task(i).unwrap()).collect();
        for h in handles {
            h.wait().unwrap();
        }
        // give finishing workers a moment to park as idle
        for _ in 0..100 {
            if pool.idle_workers() == pool.live_workers() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.idle_workers(), pool.live_workers());
        assert!(pool.live_workers() <= 3);
    }

    #[test]
    fn test_default_max_workers_range() {
        let n = default_max_workers();
        assert!((2..=8).contains(&n));
    }
}

mod crash_tests {
    use super::*;

    #[test]
    fn test_crash_rejects_only_that_task() {
        let pool: WorkerPool<u64, u64> = WorkerPool::new(
            "crash",
            2,
            Arc::new(|x: u64| {
                if x == 3 {
                    panic!("bad input {x}");
                }
                x * 10
            }),
        );
        let handles: Vec<_> = (0..8).map(|i| pool.run_task(i).unwrap()).collect();
        let results: Vec<_> = handles.into_iter().map(TaskHandle::wait).collect();

        for (i, result) in results.iter().enumerate() {
            if i == 3 {
                assert!(matches!(
                    result,
                    Err(CovError::WorkerCrashed { message, .. }) if message == "bad input 3"
                ));
            } else {
                assert_eq!(result.as_ref().unwrap(), &(i as u64 * 10));
            }
        }
        assert!(pool.live_workers() <= 2);

        // the pool keeps serving after the eviction
        assert_eq!(pool.run_task(5).unwrap().wait().unwrap(), 50);
    }

    #[test]
    fn test_single_worker_crash_does_not_stall_queue() {
        let pool: WorkerPool<u64, u64> = WorkerPool::new(
            "crash-one",
            1,
            Arc::new(|x: u64| {
                if x == 0 {
                    panic!("first");
                }
                x
            }),
        );
        let handles: Vec<_> = (0..4).map(|i| pool.run_task(i).unwrap()).collect();
        let results: Vec<_> = handles.into_iter().map(TaskHandle::wait).collect();
        assert!(results[0].is_err());
        assert_eq!(
            results[1..].iter().map(|r| *r.as_ref().unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(pool.spawned_total(), 2);
    }
}

mod terminate_tests {
    use super::*;

    #[test]
    fn test_terminate_rejects_queued_and_later_tasks() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let pool: WorkerPool<u64, u64> = WorkerPool::new(
            "term",
            1,
            Arc::new(move |x: u64| {
                if x == 0 {
                    let _ = started_tx.send(());
                    let _ = gate_rx.recv();
                }
                x
            }),
        );

        let in_flight = pool.run_task(0).unwrap();
        started_rx.recv().unwrap();
        let queued: Vec<_> = (1..3).map(|i| pool.run_task(i).unwrap()).collect();
        assert_eq!(pool.queued(), 2);

        pool.terminate();
        assert!(pool.is_terminated());
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(pool.queued(), 0);
        assert!(matches!(pool.run_task(9), Err(CovError::PoolTerminated)));

        for handle in queued {
            assert!(matches!(handle.wait(), Err(CovError::PoolTerminated)));
        }

        gate_tx.send(()).unwrap();
        assert!(matches!(in_flight.wait(), Err(CovError::PoolTerminated)));
    }

    #[test]
    fn test_terminate_is_idempotent_and_drop_is_safe() {
        let pool = doubling_pool(2);
        assert_eq!(pool.run_task(1).unwrap().wait().unwrap(), 2);
        pool.terminate();
        pool.terminate();
        drop(pool);
    }
}

mod executor_tests {
    use super::*;

    fn task(i: u32) -> ConvertTask {
        let code = format!("f{i}();");
        let len = code.len() as u32;
        ConvertTask::new(
            format!("s{i}.js"),
            code,
            vec![V8Function {
                function_name: String::new(),
                is_block_coverage: true,
                ranges: vec![V8Range::new(0, len, u64::from(i))],
            }],
        )
    }

    #[test]
    fn test_pooled_and_inline_agree() {
        let tasks: Vec<_> = (1..6).map(task).collect();
        let pooled = executor_for(2).execute_all(tasks.clone());
        let inline = executor_for(0).execute_all(tasks);
        let strip = |results: Vec<CovResult<crate::convert::ConvertOutput>>| {
            results
                .into_iter()
                .map(|r| r.unwrap().files)
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(pooled), strip(inline));
    }

    #[test]
    fn test_executor_selection() {
        assert_eq!(executor_for(0).max_workers(), 0);
        assert_eq!(executor_for(3).max_workers(), 3);
    }

    #[test]
    fn test_shutdown_rejects_later_work() {
        let executor = PooledExecutor::new(1);
        executor.shutdown();
        let results = executor.execute_all(vec![task(1)]);
        assert!(matches!(results[0], Err(CovError::PoolTerminated)));
        assert!(executor.pool().is_terminated());
    }

    #[test]
    fn test_global_init_get_shutdown() {
        let first = global::init(1);
        assert_eq!(global::get().unwrap().max_workers(), 1);
        let second = global::init(0);
        assert_eq!(global::get().unwrap().max_workers(), 0);
        // the replaced executor was shut down
        assert!(matches!(
            first.execute_all(vec![task(1)])[0],
            Err(CovError::PoolTerminated)
        ));
        assert!(global::shutdown());
        assert!(global::get().is_none());
        assert!(!global::shutdown());
        // handles outlive the registry but not the shutdown
        assert!(matches!(
            second.execute_all(vec![task(2)])[0],
            Err(CovError::PoolTerminated)
        ));
    }

    #[test]
    fn test_inline_shutdown_rejects_later_work() {
        let executor = InlineExecutor::new();
        assert!(executor.execute_all(vec![task(1)])[0].is_ok());
        executor.shutdown();
        assert!(executor.is_terminated());
        assert!(matches!(
            executor.execute_all(vec![task(1)])[0],
            Err(CovError::PoolTerminated)
        ));

        let selected = executor_for(0);
        selected.shutdown();
        assert!(selected.execute_all(vec![task(3)])[0].is_err());
    }

    #[test]
    fn test_deeply_nested_script_does_not_take_down_workers() {
        let levels = 2000;
        let deep = ConvertTask::new(
            "deep.js",
            format!("x = {}a{};", "a && (".repeat(levels), ")".repeat(levels)),
            Vec::new(),
        );
        for executor in [executor_for(2), executor_for(0)] {
            let results = executor.execute_all(vec![deep.clone(), task(1)]);
            let output = results[0].as_ref().unwrap();
            assert!(output.success, "{:?}", output.error);
            assert_eq!(output.files[0].b[&0].len(), levels + 1);
            assert!(results[1].as_ref().unwrap().success);
            executor.shutdown();
        }
    }
}
