//! Single-threaded UI dispatcher.
//!
//! One thread runs the pump and owns every native UI object. Other threads
//! hand work to it with [`Dispatcher::post`] (fire and forget) or
//! [`Dispatcher::invoke`] (block for the result). The pump alternates between
//! draining native messages and draining the work queue, and sleeps in the
//! [`MessagePump`] when both are empty.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::{panic_message, DispatchError};

/// Exit code reported by `run()` when a posted work item panics.
pub const FATAL_EXIT_CODE: i32 = -1;

/// Maximum number of queued items before logging a warning.
/// Items are still accepted to avoid silently dropping operations.
const MAX_QUEUED_WORK: usize = 10_000;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Native side of the message loop.
pub trait MessagePump: Send + Sync {
    /// Dispatch every native message currently queued without blocking.
    /// Returns the exit code if the native layer asked the loop to quit.
    fn pump_pending(&self) -> Option<i32>;

    /// Block until a native message arrives or [`MessagePump::wake`] is called.
    fn wait(&self);

    /// Wake a thread blocked in [`MessagePump::wait`]. Callable from any thread.
    /// A wake with no waiter is remembered for the next wait.
    fn wake(&self);
}

/// Pump with no native message source; it only sleeps until woken.
#[derive(Default)]
pub struct HeadlessPump {
    woken: Mutex<bool>,
    signal: Condvar,
}

impl HeadlessPump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessagePump for HeadlessPump {
    fn pump_pending(&self) -> Option<i32> {
        None
    }

    fn wait(&self) {
        let mut woken = lock(&self.woken);
        while !*woken {
            woken = self
                .signal
                .wait(woken)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *woken = false;
    }

    fn wake(&self) {
        *lock(&self.woken) = true;
        self.signal.notify_one();
    }
}

struct Inner {
    queue: Mutex<VecDeque<Job>>,
    owner: Mutex<ThreadId>,
    running: AtomicBool,
    stopped: AtomicBool,
    quit_code: Mutex<Option<i32>>,
    failure: Mutex<Option<String>>,
    pump: Box<dyn MessagePump>,
}

/// Cloneable handle to the UI dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher whose provisional UI thread is the current thread.
    /// `run()` rebinds it to whichever thread calls it.
    pub fn new(pump: Box<dyn MessagePump>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                owner: Mutex::new(thread::current().id()),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                quit_code: Mutex::new(None),
                failure: Mutex::new(None),
                pump,
            }),
        }
    }

    pub fn headless() -> Self {
        Self::new(Box::new(HeadlessPump::new()))
    }

    pub fn is_ui_thread(&self) -> bool {
        *lock(&self.inner.owner) == thread::current().id()
    }

    /// Queue `work` for the UI thread and return immediately.
    ///
    /// Items posted from one thread run in submission order.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(work), false);
    }

    /// Queue a job. With `only_while_live` the job is refused once a run has
    /// ended; the stop check and the push share the queue lock, so a job is
    /// either run, dropped by the ending run, or refused here.
    fn push(&self, job: Job, only_while_live: bool) -> bool {
        {
            let mut queue = lock(&self.inner.queue);
            if only_while_live && self.inner.stopped.load(Ordering::SeqCst) {
                return false;
            }
            if queue.len() >= MAX_QUEUED_WORK {
                tracing::warn!(
                    queued = queue.len(),
                    limit = MAX_QUEUED_WORK,
                    "UI work queue is backing up; is the pump running?"
                );
            }
            queue.push_back(job);
        }
        self.inner.pump.wake();
        true
    }

    /// Run `work` on the UI thread and wait for its result.
    ///
    /// Called on the UI thread the closure runs inline, so a work item may
    /// invoke without deadlocking. A panic inside `work` is returned to the
    /// caller as [`DispatchError::InvokePanicked`] and does not stop the pump.
    pub fn invoke<F, R>(&self, work: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_ui_thread() {
            return catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
                DispatchError::InvokePanicked {
                    message: panic_message(payload.as_ref()),
                }
            });
        }
        let (tx, rx) = mpsc::sync_channel(1);
        let queued = self.push(
            Box::new(move || {
                let outcome = catch_unwind(AssertUnwindSafe(work))
                    .map_err(|payload| panic_message(payload.as_ref()));
                let _ = tx.send(outcome);
            }),
            true,
        );
        if !queued {
            return Err(DispatchError::Stopped);
        }

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(DispatchError::InvokePanicked { message }),
            // The job was dropped unrun: the loop ended first.
            Err(_) => Err(DispatchError::Stopped),
        }
    }

    /// Ask the running loop to exit with `code`. Callable from any thread,
    /// including before `run()` starts; the first request wins.
    pub fn quit(&self, code: i32) {
        {
            let mut quit_code = lock(&self.inner.quit_code);
            if quit_code.is_none() {
                *quit_code = Some(code);
            }
        }
        self.inner.pump.wake();
    }

    /// Nudge the loop so it re-runs its tick without queueing work.
    pub fn wake(&self) {
        self.inner.pump.wake();
    }

    pub fn run(&self) -> Result<i32, DispatchError> {
        self.run_with(&mut || {})
    }

    /// Take over the calling thread as the UI thread until `quit` is called.
    ///
    /// Each turn drains native messages, then queued work, then calls `tick`,
    /// then sleeps. Returns the quit code, or the panic of a posted work item.
    pub fn run_with(&self, tick: &mut dyn FnMut()) -> Result<i32, DispatchError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyRunning);
        }
        *lock(&self.inner.owner) = thread::current().id();
        self.inner.stopped.store(false, Ordering::SeqCst);
        tracing::debug!("UI dispatcher running");

        let code = loop {
            if let Some(code) = self.inner.pump.pump_pending() {
                self.quit(code);
            }
            self.drain_queue();
            if let Some(code) = self.pending_quit() {
                break code;
            }
            tick();
            if let Some(code) = self.pending_quit() {
                break code;
            }
            self.inner.pump.wait();
        };

        // Mark the stop and empty the queue in one critical section so no
        // invoke can slip a job in between and wait on it forever.
        let abandoned: Vec<Job> = {
            let mut queue = lock(&self.inner.queue);
            self.inner.stopped.store(true, Ordering::SeqCst);
            queue.drain(..).collect()
        };
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "dropping UI work left after quit");
        }
        // Dropping the jobs disconnects any waiting invoke callers.
        drop(abandoned);

        *lock(&self.inner.quit_code) = None;
        self.inner.running.store(false, Ordering::SeqCst);
        tracing::debug!(code, "UI dispatcher stopped");

        match lock(&self.inner.failure).take() {
            Some(message) => Err(DispatchError::WorkItemPanicked { message }),
            None => Ok(code),
        }
    }

    /// Run until a full turn finds the queue empty, then stop with code 0.
    /// Settles chains of posted work without a native event source.
    pub fn run_until_idle(&self) -> Result<i32, DispatchError> {
        self.run_until_idle_with(&mut || false)
    }

    /// [`run_until_idle`](Self::run_until_idle) with a tick of its own.
    /// `tick` returns `true` while it has outstanding work that will wake
    /// the loop when it lands.
    pub fn run_until_idle_with(
        &self,
        tick: &mut dyn FnMut() -> bool,
    ) -> Result<i32, DispatchError> {
        let this = self.clone();
        let mut idle_turns = 0;
        self.run_with(&mut || {
            if tick() {
                idle_turns = 0;
                return;
            }
            if lock(&this.inner.queue).is_empty() {
                idle_turns += 1;
            } else {
                idle_turns = 0;
            }
            if idle_turns >= 2 {
                this.quit(0);
            } else {
                this.wake();
            }
        })
    }

    fn pending_quit(&self) -> Option<i32> {
        *lock(&self.inner.quit_code)
    }

    /// Run the items queued at entry; items they post wait for the next turn.
    fn drain_queue(&self) {
        let budget = lock(&self.inner.queue).len();
        for _ in 0..budget {
            let Some(job) = lock(&self.inner.queue).pop_front() else {
                break;
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let message = panic_message(payload.as_ref());
                tracing::error!(%message, "UI work item panicked; stopping the dispatcher");
                lock(&self.inner.failure).get_or_insert(message);
                *lock(&self.inner.quit_code) = Some(FATAL_EXIT_CODE);
                self.inner.pump.wake();
                break;
            }
        }
        if !lock(&self.inner.queue).is_empty() {
            self.inner.pump.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn posted_items_run_in_submission_order() {
        let dispatcher = Dispatcher::headless();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            dispatcher.post(move || seen.lock().unwrap().push(i));
        }
        let d = dispatcher.clone();
        dispatcher.post(move || d.quit(0));
        assert_eq!(dispatcher.run(), Ok(0));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn invoke_on_ui_thread_runs_inline() {
        let dispatcher = Dispatcher::headless();
        let d = dispatcher.clone();
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        dispatcher.post(move || {
            let value = d.invoke(|| 21 * 2);
            *slot.lock().unwrap() = Some(value);
            d.quit(0);
        });
        dispatcher.run().unwrap();
        assert_eq!(*result.lock().unwrap(), Some(Ok(42)));
    }

    #[test]
    fn invoke_from_worker_thread_waits_for_ui_thread() {
        let dispatcher = Dispatcher::headless();
        let d = dispatcher.clone();
        let worker = thread::spawn(move || {
            let answer = d.invoke(|| thread::current().id());
            d.quit(7);
            answer
        });
        let ui_thread = thread::current().id();
        assert_eq!(dispatcher.run(), Ok(7));
        assert_eq!(worker.join().unwrap(), Ok(ui_thread));
    }

    #[test]
    fn second_run_is_rejected() {
        let dispatcher = Dispatcher::headless();
        let d = dispatcher.clone();
        let nested = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&nested);
        dispatcher.post(move || {
            *slot.lock().unwrap() = Some(d.run());
            d.quit(0);
        });
        assert_eq!(dispatcher.run(), Ok(0));
        assert_eq!(
            *nested.lock().unwrap(),
            Some(Err(DispatchError::AlreadyRunning))
        );
    }

    #[test]
    fn panicking_work_item_stops_the_loop_and_is_reraised() {
        let dispatcher = Dispatcher::headless();
        let after = Arc::new(AtomicUsize::new(0));
        dispatcher.post(|| panic!("window state corrupt"));
        let counter = Arc::clone(&after);
        dispatcher.post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let err = dispatcher.run().unwrap_err();
        assert_eq!(
            err,
            DispatchError::WorkItemPanicked {
                message: "window state corrupt".into()
            }
        );
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invoke_panic_is_scoped_to_the_caller() {
        let dispatcher = Dispatcher::headless();
        let d = dispatcher.clone();
        let worker = thread::spawn(move || {
            let outcome = d.invoke(|| -> u32 { panic!("bad call") });
            d.quit(3);
            outcome
        });
        assert_eq!(dispatcher.run(), Ok(3));
        assert!(matches!(
            worker.join().unwrap(),
            Err(DispatchError::InvokePanicked { .. })
        ));
    }

    #[test]
    fn quit_before_run_is_honored() {
        let dispatcher = Dispatcher::headless();
        dispatcher.quit(5);
        dispatcher.quit(9);
        assert_eq!(dispatcher.run(), Ok(5));
    }

    #[test]
    fn invoke_after_loop_ended_fails_fast() {
        let dispatcher = Dispatcher::headless();
        dispatcher.quit(0);
        dispatcher.run().unwrap();
        let d = dispatcher.clone();
        let outcome = thread::spawn(move || d.invoke(|| 1)).join().unwrap();
        assert_eq!(outcome, Err(DispatchError::Stopped));
    }

    #[test]
    fn invoke_racing_quit_never_hangs() {
        for _ in 0..50 {
            let dispatcher = Dispatcher::headless();
            let (done_tx, done_rx) = mpsc::channel();
            let d = dispatcher.clone();
            let caller = thread::spawn(move || {
                let mut answered = 0usize;
                let outcome = loop {
                    match d.invoke(|| ()) {
                        Ok(()) => answered += 1,
                        Err(err) => break err,
                    }
                };
                let _ = done_tx.send((answered, outcome));
            });
            let d = dispatcher.clone();
            let quitter = thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(1));
                d.quit(0);
            });

            assert_eq!(dispatcher.run(), Ok(0));
            quitter.join().unwrap();
            let (_, outcome) = done_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .expect("invoke returned after the loop stopped");
            assert_eq!(outcome, DispatchError::Stopped);
            caller.join().unwrap();
        }
    }

    #[test]
    fn tick_runs_every_turn() {
        let dispatcher = Dispatcher::headless();
        let d = dispatcher.clone();
        let mut ticks = 0;
        let code = dispatcher
            .run_with(&mut || {
                ticks += 1;
                if ticks == 3 {
                    d.quit(0);
                } else {
                    d.wake();
                }
            })
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(ticks, 3);
    }

    #[test]
    fn run_until_idle_follows_chains_of_posted_work() {
        let dispatcher = Dispatcher::headless();
        let depth = Arc::new(AtomicUsize::new(0));
        fn chain(dispatcher: Dispatcher, depth: Arc<AtomicUsize>, left: usize) {
            if left == 0 {
                return;
            }
            let d = dispatcher.clone();
            dispatcher.post(move || {
                depth.fetch_add(1, Ordering::SeqCst);
                chain(d, depth, left - 1);
            });
        }
        chain(dispatcher.clone(), Arc::clone(&depth), 6);
        assert_eq!(dispatcher.run_until_idle(), Ok(0));
        assert_eq!(depth.load(Ordering::SeqCst), 6);
    }
}
