//! The client manager: one dedicated thread running the event loop that
//! drives every async call.
//!
//! Each pass of the loop:
//! 1. waits until an I/O step finishes, the nearest deadline passes, or a
//!    new call is submitted;
//! 2. applies the transitions for every finished step;
//! 3. fails calls whose deadline has passed;
//! 4. starts newly submitted calls.
//!
//! A call whose response completes in the same pass its deadline expires is
//! therefore delivered as a success. All per-call state lives on the loop
//! thread; other threads only touch the submission queue.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use futures_util::future::{AbortHandle, Abortable, Aborted, BoxFuture};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::Notify;
use tokio::time::Instant;

use wirecall_core::error::{ErrorCode, Result, TransportErrorKind, WireError};

use super::call::MethodCall;
use super::client::ClientShared;
use super::state::{transition, CallShape, CallState, Effect, Event};
use crate::obs::RpcMetrics;

/// Handle to the loop thread. Cloning shares the same loop.
#[derive(Clone)]
pub struct ClientManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    submit: Sender<MethodCall>,
    gate: Arc<Gate>,
    thread: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<RpcMetrics>,
}

/// Open/closed flag plus the loop's wakeup. Submissions and `stop` take the
/// lock, so nothing is queued after the loop has drained for the last time.
struct Gate {
    open: Mutex<bool>,
    wake: Notify,
}

impl Gate {
    fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientManager {
    pub fn new() -> Result<Self> {
        Self::with_metrics(Arc::new(RpcMetrics::default()))
    }

    pub fn with_metrics(metrics: Arc<RpcMetrics>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let gate = Arc::new(Gate {
            open: Mutex::new(true),
            wake: Notify::new(),
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let event_loop = EventLoop {
            pending: rx,
            gate: Arc::clone(&gate),
            metrics: Arc::clone(&metrics),
            calls: HashMap::new(),
            steps: FuturesUnordered::new(),
            timeouts: BTreeSet::new(),
        };
        let thread = thread::Builder::new()
            .name("wirecall-client-manager".into())
            .spawn(move || runtime.block_on(event_loop.run()))?;

        Ok(Self {
            inner: Arc::new(ManagerInner {
                submit: tx,
                gate,
                thread: Mutex::new(Some(thread)),
                metrics,
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.gate.is_open()
    }

    pub fn metrics(&self) -> Arc<RpcMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Stop the loop. Outstanding calls complete with an `ILLEGAL_STATE`
    /// error. Safe to call from a completion callback.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Queue a prepared call. On error the call is handed back untouched.
    pub(crate) fn submit(&self, call: MethodCall) -> std::result::Result<(), (WireError, MethodCall)> {
        let open = self
            .inner
            .gate
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err((stopped_error(), call));
        }
        self.inner
            .submit
            .send(call)
            .map_err(|e| (stopped_error(), e.into_inner()))?;
        drop(open);
        self.inner.gate.wake.notify_one();
        Ok(())
    }
}

impl ManagerInner {
    fn stop(&self) {
        *self.gate.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.gate.wake.notify_one();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stopped_error() -> WireError {
    WireError::IllegalState("client manager is stopped".into())
}

// --------------------
// Event loop
// --------------------

#[derive(Debug, Clone, Copy)]
enum Step {
    Connect,
    WriteRequestSize,
    WriteRequestBody,
    ReadResponseSize,
    ReadResponseBody(usize),
}

struct StepDone {
    seq_id: i64,
    event: Event,
    body: Option<Bytes>,
}

struct Slot {
    state: CallState,
    shape: CallShape,
    deadline: Option<Instant>,
    step: Option<AbortHandle>,
    response: Option<Bytes>,
    call: MethodCall,
}

struct EventLoop {
    pending: Receiver<MethodCall>,
    gate: Arc<Gate>,
    metrics: Arc<RpcMetrics>,
    calls: HashMap<i64, Slot>,
    steps: FuturesUnordered<Abortable<BoxFuture<'static, StepDone>>>,
    timeouts: BTreeSet<(Instant, i64)>,
}

impl EventLoop {
    async fn run(mut self) {
        tracing::debug!("client manager loop started");
        loop {
            let next_deadline = self.timeouts.first().map(|(at, _)| *at);
            let mut done: Vec<std::result::Result<StepDone, Aborted>> = Vec::new();

            tokio::select! {
                Some(step) = self.steps.next(), if !self.steps.is_empty() => done.push(step),
                _ = sleep_until(next_deadline) => {}
                _ = self.gate.wake.notified() => {}
            }
            while let Some(Some(step)) = self.steps.next().now_or_never() {
                done.push(step);
            }

            for step in done.into_iter().flatten() {
                self.on_step(step);
            }
            self.expire(Instant::now());

            if !self.gate.is_open() {
                break;
            }
            self.start_pending();
        }
        self.fail_all();
        tracing::debug!("client manager loop stopped");
    }

    fn start_pending(&mut self) {
        while let Ok(call) = self.pending.try_recv() {
            let seq_id = call.seq_id();
            let deadline = call.deadline();
            tracing::trace!(seq_id, method = call.method(), "starting call");
            self.calls.insert(
                seq_id,
                Slot {
                    state: CallState::Connecting,
                    shape: call.shape(),
                    deadline,
                    step: None,
                    response: None,
                    call,
                },
            );
            if let Some(at) = deadline {
                self.timeouts.insert((at, seq_id));
            }
            self.spawn_step(seq_id, Step::Connect);
        }
    }

    fn on_step(&mut self, done: StepDone) {
        let Some(slot) = self.calls.get_mut(&done.seq_id) else {
            return;
        };
        slot.step = None;
        if done.body.is_some() {
            slot.response = done.body;
        }
        self.advance(done.seq_id, done.event);
    }

    fn advance(&mut self, seq_id: i64, event: Event) {
        let Some(slot) = self.calls.get_mut(&seq_id) else {
            return;
        };
        let (next, effect) = transition(slot.state, event, slot.shape);
        tracing::trace!(seq_id, from = slot.state.as_str(), to = next.as_str(), "call transition");
        slot.state = next;

        match effect {
            Effect::Ignore => {}
            Effect::Complete => self.finish(seq_id, Ok(())),
            Effect::Fail(e) => self.finish(seq_id, Err(e)),
            Effect::WriteRequestSize => self.spawn_step(seq_id, Step::WriteRequestSize),
            Effect::WriteRequestBody => self.spawn_step(seq_id, Step::WriteRequestBody),
            Effect::ReadResponseSize => self.spawn_step(seq_id, Step::ReadResponseSize),
            Effect::ReadResponseBody(n) => self.spawn_step(seq_id, Step::ReadResponseBody(n)),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, seq_id)) = self.timeouts.first() {
            if at > now {
                break;
            }
            self.timeouts.pop_first();
            let Some(slot) = self.calls.get_mut(&seq_id) else {
                continue;
            };
            if let Some(step) = slot.step.take() {
                step.abort();
            }
            let elapsed = now.saturating_duration_since(slot.call.started());
            tracing::debug!(seq_id, method = slot.call.method(), ?elapsed, "call timed out");
            self.advance(seq_id, Event::TimedOut(elapsed));
        }
    }

    fn spawn_step(&mut self, seq_id: i64, step: Step) {
        let Some(slot) = self.calls.get_mut(&seq_id) else {
            return;
        };
        let fut = run_step(seq_id, step, slot.call.client(), slot.call.body()).boxed();
        let (fut, handle) = futures_util::future::abortable(fut);
        slot.step = Some(handle);
        self.steps.push(fut);
    }

    fn finish(&mut self, seq_id: i64, outcome: Result<()>) {
        let Some(slot) = self.calls.remove(&seq_id) else {
            return;
        };
        if let Some(at) = slot.deadline {
            self.timeouts.remove(&(at, seq_id));
        }
        if let Some(step) = slot.step {
            step.abort();
        }

        let label = match &outcome {
            Ok(()) => "complete",
            Err(e) => {
                tracing::debug!(seq_id, method = slot.call.method(), error = %e, "call failed");
                if e.code() == ErrorCode::Transport(TransportErrorKind::TimedOut) {
                    "timeout"
                } else {
                    "error"
                }
            }
        };
        self.metrics.async_calls.inc(&[("outcome", label)]);
        let response = slot.response;
        slot.call.complete(outcome.map(|()| response));
    }

    fn fail_all(&mut self) {
        let open: Vec<i64> = self.calls.keys().copied().collect();
        for seq_id in open {
            self.finish(seq_id, Err(stopped_error()));
        }
        while let Ok(call) = self.pending.try_recv() {
            call.complete(Err(stopped_error()));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_step(seq_id: i64, step: Step, client: Arc<ClientShared>, body: Bytes) -> StepDone {
    let mut channel = client.channel().lock().await;
    let mut response = None;

    let result = match step {
        Step::Connect => {
            client.close_if_stale(&mut channel).await;
            channel.connect().await.map(|()| Event::Connected)
        }
        Step::WriteRequestSize => {
            // Length was checked against the frame limit when the call was built.
            let size = (body.len() as u32).to_be_bytes();
            channel
                .write_all(&size)
                .await
                .map(|()| Event::RequestSizeWritten)
        }
        Step::WriteRequestBody => channel
            .write_all(&body)
            .await
            .map(|()| Event::RequestBodyWritten),
        Step::ReadResponseSize => {
            let mut size = [0u8; 4];
            channel
                .read_exact(&mut size)
                .await
                .map(|()| Event::ResponseSizeRead(i32::from_be_bytes(size)))
        }
        Step::ReadResponseBody(len) => {
            let mut buf = vec![0u8; len];
            match channel.read_exact(&mut buf).await {
                Ok(()) => {
                    response = Some(Bytes::from(buf));
                    Ok(Event::ResponseBodyRead)
                }
                Err(e) => Err(e),
            }
        }
    };

    StepDone {
        seq_id,
        event: result.unwrap_or_else(Event::Failed),
        body: response,
    }
}
