use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use scx_simple::*;

mod common;

use common::ConcurrentHost;

const NR_CPUS: u32 = 4;
const PER_CPU: i32 = 500;

type Sched = SimpleScheduler<Arc<ConcurrentHost>>;

/// Pull everything `cpu` can get from the shared DSQ and run it briefly.
fn drain(sched: &Sched, host: &ConcurrentHost, tasks: &[Mutex<Task>], cpu: CpuId, seen: &mut Vec<Pid>) {
    sched.dispatch(cpu, None);
    while let Some(pid) = host.pop_local(cpu) {
        seen.push(pid);
        let mut p = tasks[(pid.0 - 1) as usize].lock().unwrap();
        sched.running(&p);
        p.slice /= 2;
        sched.stopping(&mut p, false);
    }
}

/// CPUs enqueue and dispatch against the shared DSQ at the same time; every
/// task comes out exactly once, and each CPU sees the clock move forward.
#[test]
fn test_concurrent_no_loss_no_duplication() {
    common::setup_test();
    for mode in [SchedMode::Fifo, SchedMode::Vtime] {
        let host = Arc::new(ConcurrentHost::new(NR_CPUS));
        let sched: Sched =
            SimpleScheduler::new(host.clone(), &SchedConfig::new(mode, NR_CPUS)).unwrap();
        sched.init().unwrap();

        let total = NR_CPUS as i32 * PER_CPU;
        let tasks: Vec<Mutex<Task>> = (1..=total)
            .map(|pid| Mutex::new(Task::new(Pid(pid), 50 + (pid as u32 % 4) * 50)))
            .collect();

        let per_cpu: Vec<Vec<Pid>> = thread::scope(|s| {
            let handles: Vec<_> = (0..NR_CPUS)
                .map(|i| {
                    let (sched, host, tasks) = (&sched, &host, &tasks);
                    s.spawn(move || {
                        let cpu = CpuId(i);
                        ConcurrentHost::bind(cpu);
                        let mut seen = Vec::new();
                        let mut last = sched.vtime_now();
                        for j in 0..PER_CPU {
                            let pid = i as i32 * PER_CPU + j + 1;
                            {
                                let mut p = tasks[(pid - 1) as usize].lock().unwrap();
                                sched.enable(&mut p);
                                let selected = sched.select_cpu(&mut p, cpu, WakeFlags::TTWU);
                                assert_eq!(selected, cpu);
                                sched.enqueue(&mut p, EnqFlags::WAKEUP);
                            }
                            if j % 3 == 0 {
                                drain(sched, host, tasks, cpu, &mut seen);
                            }
                            let now = sched.vtime_now();
                            assert!(!now.before(last), "cpu {i}: clock went back");
                            last = now;
                        }
                        while host.nr_queued(SHARED_DSQ) > 0 {
                            drain(sched, host, tasks, cpu, &mut seen);
                        }
                        seen
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut seen: Vec<Pid> = per_cpu.into_iter().flatten().collect();
        ConcurrentHost::bind(CpuId(0));
        drain(&sched, &host, &tasks, CpuId(0), &mut seen);

        assert_eq!(seen.len(), total as usize, "{mode:?}: lost or duplicated tasks");
        let unique: HashSet<Pid> = seen.iter().copied().collect();
        assert_eq!(unique.len(), total as usize, "{mode:?}: duplicated tasks");
        assert_eq!(host.nr_queued(SHARED_DSQ), 0);

        // Every CPU was busy, so everything went through enqueue.
        assert_eq!(sched.stats().read(), [0, total as u64]);
        if mode == SchedMode::Fifo {
            assert_eq!(sched.vtime_now(), Vtime(0));
        } else {
            assert!(sched.vtime_now() > Vtime(0));
        }
    }
}

/// Racing clock advances from many CPUs settle on the largest vtime.
#[test]
fn test_concurrent_running_advances_to_max() {
    common::setup_test();
    let host = Arc::new(ConcurrentHost::new(NR_CPUS));
    let sched: Sched = SimpleScheduler::new(host, &SchedConfig::vtime(NR_CPUS)).unwrap();

    thread::scope(|s| {
        for i in 0..NR_CPUS {
            let sched = &sched;
            s.spawn(move || {
                ConcurrentHost::bind(CpuId(i));
                for k in 0..1000u64 {
                    let mut p = Task::new(Pid(i as i32 + 1), 100);
                    p.dsq_vtime = Vtime(k * NR_CPUS as u64 + i as u64);
                    sched.running(&p);
                }
            });
        }
    });

    assert_eq!(sched.vtime_now(), Vtime(999 * NR_CPUS as u64 + NR_CPUS as u64 - 1));
}
