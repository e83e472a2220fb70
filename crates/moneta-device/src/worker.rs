//! Per-device worker thread with synchronous cross-thread invocation.
//!
//! Every driver owns one [`WorkingThreadProxy`]. All device I/O runs on
//! its thread: control calls from the application are marshaled through
//! [`WorkingThreadProxy::invoke`], and the same thread drives the polling
//! timer, so commands and poll ticks can never interleave.
//!
//! The thread starts lazily on first use; the initiating call blocks
//! until the worker has signalled start-up, exactly once per proxy.
//! A call made from the worker thread itself executes inline, which lets
//! driver code invoked from a poll tick call back into the public API
//! without deadlocking.

use std::sync::{Mutex, mpsc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

enum Message {
    Invoke(Box<dyn FnOnce() + Send>),
    SetPollCallback(Box<dyn FnMut() + Send>),
    SetPollingInterval(Option<Duration>),
    Shutdown,
}

struct Started {
    tx: mpsc::Sender<Message>,
    thread_id: ThreadId,
    join: Option<JoinHandle<()>>,
}

pub struct WorkingThreadProxy {
    name: String,
    started: Mutex<Option<Started>>,
}

impl WorkingThreadProxy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: Mutex::new(None),
        }
    }

    /// Execute `f` on the worker thread and block until it completes.
    /// Executes inline when already called from the worker thread.
    pub fn invoke<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        let (tx, thread_id) = self.ensure_started();
        if thread::current().id() == thread_id {
            return f();
        }

        let (done_tx, done_rx) = mpsc::sync_channel(0);
        let task = Box::new(move || {
            let _ = done_tx.send(f());
        });
        if tx.send(Message::Invoke(task)).is_err() {
            panic!("worker thread '{}' is gone", self.name);
        }
        match done_rx.recv() {
            Ok(result) => result,
            Err(_) => panic!("worker thread '{}' dropped an invoked task", self.name),
        }
    }

    /// Install the routine the polling timer runs.
    pub fn set_poll_callback(&self, callback: impl FnMut() + Send + 'static) {
        self.send(Message::SetPollCallback(Box::new(callback)));
    }

    pub fn start_polling(&self, interval: Duration) {
        self.send(Message::SetPollingInterval(Some(interval)));
    }

    pub fn stop_polling(&self) {
        self.send(Message::SetPollingInterval(None));
    }

    /// True when the caller is already on the worker thread.
    pub fn is_working_thread(&self) -> bool {
        let guard = self.lock();
        matches!(&*guard, Some(started) if started.thread_id == thread::current().id())
    }

    fn send(&self, message: Message) {
        let (tx, _) = self.ensure_started();
        if tx.send(message).is_err() {
            panic!("worker thread '{}' is gone", self.name);
        }
    }

    fn ensure_started(&self) -> (mpsc::Sender<Message>, ThreadId) {
        let mut guard = self.lock();
        if let Some(started) = &*guard {
            return (started.tx.clone(), started.thread_id);
        }

        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _ = ready_tx.send(());
                run(rx);
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"));
        let thread_id = join.thread().id();

        // Block until the worker has actually come up.
        let _ = ready_rx.recv();
        debug!(name = %self.name, "worker thread started");

        *guard = Some(Started {
            tx: tx.clone(),
            thread_id,
            join: Some(join),
        });
        (tx, thread_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Started>> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for WorkingThreadProxy {
    fn drop(&mut self) {
        if let Some(mut started) = self.lock().take() {
            let _ = started.tx.send(Message::Shutdown);
            if let Some(join) = started.join.take() {
                let _ = join.join();
            }
        }
    }
}

fn run(rx: mpsc::Receiver<Message>) {
    let mut poll: Option<Box<dyn FnMut() + Send>> = None;
    let mut interval: Option<Duration> = None;
    let mut next_poll: Option<Instant> = None;

    loop {
        let message = match next_poll {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if let Some(callback) = poll.as_mut() {
                        callback();
                    }
                    if let Some(interval) = interval {
                        next_poll = Some(Instant::now() + interval);
                    }
                    continue;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(message) => message,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Invoke(task) => task(),
            Message::SetPollCallback(callback) => poll = Some(callback),
            Message::SetPollingInterval(Some(new_interval)) => {
                interval = Some(new_interval);
                next_poll = Some(Instant::now() + new_interval);
            }
            Message::SetPollingInterval(None) => {
                interval = None;
                next_poll = None;
            }
            Message::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_runs_on_the_worker_thread() {
        let proxy = WorkingThreadProxy::new("test-worker");
        let caller = thread::current().id();
        let worker = proxy.invoke(|| thread::current().id());
        assert_ne!(caller, worker);
    }

    #[test]
    fn worker_thread_is_started_once() {
        let proxy = WorkingThreadProxy::new("test-worker");
        let first = proxy.invoke(|| thread::current().id());
        let second = proxy.invoke(|| thread::current().id());
        assert_eq!(first, second);
    }

    #[test]
    fn invoke_returns_the_closure_result() {
        let proxy = WorkingThreadProxy::new("test-worker");
        assert_eq!(proxy.invoke(|| 6 * 7), 42);
    }

    #[test]
    fn nested_invoke_executes_inline() {
        let proxy = Arc::new(WorkingThreadProxy::new("test-worker"));
        let inner = proxy.clone();
        let (outer_id, inner_id) = proxy.invoke(move || {
            let outer = thread::current().id();
            let inner_id = inner.invoke(|| thread::current().id());
            (outer, inner_id)
        });
        assert_eq!(outer_id, inner_id);
    }

    #[test]
    fn polling_ticks_until_stopped() {
        let proxy = WorkingThreadProxy::new("test-worker");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        proxy.set_poll_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        proxy.start_polling(Duration::from_millis(2));
        thread::sleep(Duration::from_millis(60));
        proxy.stop_polling();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "expected ticks, got {after_stop}");

        thread::sleep(Duration::from_millis(20));
        // A queued tick may still land right around the stop.
        assert!(ticks.load(Ordering::SeqCst) <= after_stop + 1);
    }

    #[test]
    fn commands_and_ticks_share_one_thread() {
        let proxy = WorkingThreadProxy::new("test-worker");
        let tick_thread = Arc::new(Mutex::new(None));
        let recorded = tick_thread.clone();
        proxy.set_poll_callback(move || {
            *recorded.lock().unwrap() = Some(thread::current().id());
        });
        proxy.start_polling(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(20));
        let invoke_thread = proxy.invoke(|| thread::current().id());
        assert_eq!(tick_thread.lock().unwrap().unwrap(), invoke_thread);
    }
}
