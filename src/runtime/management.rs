//! Background housekeeping shared by every stream in the process.
//!
//! Two threads run while at least one reference is held: one logs stream
//! statistics, the other sweeps expired results. Both sleep on a shared
//! condition variable so that release wakes and joins them promptly.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::stream::StreamStats;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Something the management threads look after.
pub trait Maintained: Send + Sync {
    fn name(&self) -> &str;

    fn stats(&self) -> StreamStats;

    /// Periodic cleanup; returns the number of items removed.
    fn maintain(&self) -> usize;
}

/// Lifecycle of the pool's threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct Control {
    state: PoolState,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Signal {
    stop: Mutex<bool>,
    wake: Condvar,
}

type WatchList = Arc<Mutex<Vec<Weak<dyn Maintained>>>>;

/// Reference-counted set of housekeeping threads.
///
/// The first [`acquire`](Self::acquire) starts the threads and the matching
/// last [`release`](Self::release) stops and joins them.
pub struct ManagementThreadPool {
    control: Mutex<Control>,
    refs: AtomicUsize,
    signal: Arc<Signal>,
    watched: WatchList,
    stats_interval: Duration,
    sweep_interval: Duration,
}

static GLOBAL: OnceLock<Arc<ManagementThreadPool>> = OnceLock::new();

impl ManagementThreadPool {
    pub fn new(stats_interval: Duration, sweep_interval: Duration) -> Self {
        Self {
            control: Mutex::new(Control {
                state: PoolState::Uninitialized,
                handles: Vec::new(),
            }),
            refs: AtomicUsize::new(0),
            signal: Arc::new(Signal::default()),
            watched: Arc::new(Mutex::new(Vec::new())),
            stats_interval,
            sweep_interval,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.stats_interval(), config.sweep_interval())
    }

    /// The process-wide pool. Its intervals come from the first caller's config.
    pub fn global(config: &RuntimeConfig) -> Arc<Self> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::from_config(config)))
            .clone()
    }

    pub fn state(&self) -> PoolState {
        self.lock_control().state
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Take a reference, starting the threads on the first one.
    pub fn acquire(&self) -> Result<()> {
        let mut control = self.lock_control();
        if self.refs.load(Ordering::SeqCst) > 0 {
            self.refs.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        control.state = PoolState::Starting;
        *self.lock_stop() = false;
        match self.spawn_workers() {
            Ok(handles) => {
                control.handles = handles;
                control.state = PoolState::Running;
                self.refs.store(1, Ordering::SeqCst);
                tracing::info!(
                    stats_interval = ?self.stats_interval,
                    sweep_interval = ?self.sweep_interval,
                    "management threads started"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to start management threads");
                control.state = PoolState::Stopped;
                Err(err.into())
            }
        }
    }

    /// Drop a reference, stopping the threads on the last one.
    ///
    /// # Panics
    /// If no reference is held.
    pub fn release(&self) {
        let mut control = self.lock_control();
        let refs = self.refs.load(Ordering::SeqCst);
        if refs == 0 {
            panic!("management thread pool released more times than acquired");
        }
        self.refs.store(refs - 1, Ordering::SeqCst);
        if refs > 1 {
            return;
        }

        control.state = PoolState::Stopping;
        let handles = std::mem::take(&mut control.handles);
        self.stop_and_join(handles);
        control.state = PoolState::Stopped;
        tracing::info!("management threads stopped");
    }

    /// Add a stream to the housekeeping rounds. Dropped streams fall out on their own.
    pub fn watch(&self, item: Weak<dyn Maintained>) {
        let mut watched = lock_watched(&self.watched);
        watched.retain(|w| w.strong_count() > 0);
        watched.push(item);
    }

    pub fn watched_count(&self) -> usize {
        lock_watched(&self.watched)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn spawn_workers(&self) -> std::io::Result<Vec<JoinHandle<()>>> {
        let workers: [(&str, Duration, fn(&dyn Maintained)); 2] = [
            ("streamrs-stats", self.stats_interval, report),
            ("streamrs-maintenance", self.sweep_interval, sweep),
        ];

        let mut handles = Vec::with_capacity(workers.len());
        for (name, interval, task) in workers {
            let (signal, watched) = (self.signal.clone(), self.watched.clone());
            let spawned = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run_periodic(&signal, interval, &watched, task));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.stop_and_join(handles);
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    fn stop_and_join(&self, handles: Vec<JoinHandle<()>>) {
        *self.lock_stop() = true;
        self.signal.wake.notify_all();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("management thread panicked");
            }
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stop(&self) -> MutexGuard<'_, bool> {
        self.signal.stop.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_watched(watched: &WatchList) -> MutexGuard<'_, Vec<Weak<dyn Maintained>>> {
    watched.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run `task` every `interval` until the stop flag is set.
fn run_periodic(
    signal: &Signal,
    interval: Duration,
    watched: &WatchList,
    task: fn(&dyn Maintained),
) {
    loop {
        let stop = signal.stop.lock().unwrap_or_else(|e| e.into_inner());
        let (stop, _) = signal
            .wake
            .wait_timeout_while(stop, interval, |stop| !*stop)
            .unwrap_or_else(|e| e.into_inner());
        if *stop {
            return;
        }
        drop(stop);

        let live: Vec<Arc<dyn Maintained>> = {
            let mut watched = lock_watched(watched);
            watched.retain(|w| w.strong_count() > 0);
            watched.iter().filter_map(Weak::upgrade).collect()
        };
        for item in live {
            task(item.as_ref());
        }
    }
}

fn report(item: &dyn Maintained) {
    let stats = item.stats();
    tracing::info!(
        stream = item.name(),
        submitted = stats.submitted,
        delivered = stats.delivered,
        claimed = stats.claimed,
        abandoned = stats.abandoned,
        discarded = stats.discarded,
        overflowed = stats.overflowed,
        expired = stats.expired,
        pending = stats.pending,
        "stream statistics"
    );
}

fn sweep(item: &dyn Maintained) {
    item.maintain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct Probe {
        sweeps: AtomicUsize,
    }

    impl Maintained for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn stats(&self) -> StreamStats {
            StreamStats::default()
        }

        fn maintain(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn fast_pool() -> ManagementThreadPool {
        ManagementThreadPool::new(Duration::from_millis(5), Duration::from_millis(5))
    }

    #[test]
    fn test_refcounted_start_stop() {
        let pool = fast_pool();
        assert_eq!(pool.state(), PoolState::Uninitialized);

        pool.acquire().unwrap();
        pool.acquire().unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        assert_eq!(pool.ref_count(), 2);

        pool.release();
        assert_eq!(pool.state(), PoolState::Running);
        pool.release();
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.ref_count(), 0);

        // Restartable after a full stop.
        pool.acquire().unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        pool.release();
    }

    #[test]
    fn test_release_is_prompt() {
        let pool = ManagementThreadPool::new(Duration::from_secs(60), Duration::from_secs(60));
        pool.acquire().unwrap();
        let start = Instant::now();
        pool.release();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[should_panic(expected = "released more times than acquired")]
    fn test_unbalanced_release_panics() {
        fast_pool().release();
    }

    #[test]
    fn test_watched_items_are_maintained() {
        let pool = fast_pool();
        let probe = Arc::new(Probe::default());
        let weak: Weak<dyn Maintained> = Arc::downgrade(&(probe.clone() as Arc<dyn Maintained>));
        pool.watch(weak);
        assert_eq!(pool.watched_count(), 1);

        pool.acquire().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while probe.sweeps.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.release();
        assert!(probe.sweeps.load(Ordering::SeqCst) > 0);

        drop(probe);
        assert_eq!(pool.watched_count(), 0);
    }
}
