use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use glance_contracts::{DispatchError, DispatchRequest, NormalizedResponse, Outcome};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::provider::{build_provider, ClientOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("dispatcher for request {0} was already started")]
    AlreadyStarted(Uuid),
}

pub type OutcomeMessage = (Uuid, Outcome);

/// Runs exactly one request on a background thread and reports exactly one
/// [`Outcome`].
///
/// `Idle -> Running -> Succeeded | Failed`; a dispatcher is never restarted.
#[derive(Debug)]
pub struct Dispatcher {
    request: DispatchRequest,
    options: ClientOptions,
    state: Arc<Mutex<DispatchState>>,
}

impl Dispatcher {
    pub fn new(request: DispatchRequest) -> Self {
        Self::with_options(request, ClientOptions::from_env())
    }

    pub fn with_options(request: DispatchRequest, options: ClientOptions) -> Self {
        Self {
            request,
            options,
            state: Arc::new(Mutex::new(DispatchState::Idle)),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request.id()
    }

    pub fn request(&self) -> &DispatchRequest {
        &self.request
    }

    pub fn state(&self) -> DispatchState {
        read_state(&self.state)
    }

    /// Starts the worker and returns a handle owning the outcome channel.
    pub fn start(&mut self) -> Result<DispatchHandle, StartError> {
        let (tx, rx) = mpsc::channel();
        let worker = self.spawn(tx)?;
        Ok(DispatchHandle {
            request_id: self.request.id(),
            receiver: rx,
            state: Arc::clone(&self.state),
            worker,
        })
    }

    /// Starts the worker and posts `(request_id, outcome)` on a caller-owned
    /// channel, so one event loop can drain many dispatchers.
    pub fn start_with_sender(
        &mut self,
        sender: mpsc::Sender<OutcomeMessage>,
    ) -> Result<(), StartError> {
        self.spawn(sender).map(|_| ())
    }

    fn spawn(
        &mut self,
        sender: mpsc::Sender<OutcomeMessage>,
    ) -> Result<Option<thread::JoinHandle<()>>, StartError> {
        let request_id = self.request.id();
        {
            let mut state = lock_state(&self.state);
            if *state != DispatchState::Idle {
                return Err(StartError::AlreadyStarted(request_id));
            }
            *state = DispatchState::Running;
        }
        info!(
            request_id = %request_id,
            provider = %self.request.provider(),
            "dispatch started"
        );

        let request = self.request.clone();
        let options = self.options.clone();
        let state = Arc::clone(&self.state);
        let fallback_sender = sender.clone();
        let spawned = thread::Builder::new()
            .name(format!("glance-dispatch-{}", short_id(request_id)))
            .spawn(move || {
                let outcome = run_guarded(&request, &options);
                finish(&state, request_id, outcome, &sender);
            });

        match spawned {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                let outcome = Outcome::Failure(DispatchError::Internal(format!(
                    "dispatch worker spawn failed: {err}"
                )));
                finish(&self.state, request_id, outcome, &fallback_sender);
                Ok(None)
            }
        }
    }
}

/// Receiving side of a started [`Dispatcher`].
///
/// Methods that may deliver the outcome consume the handle, so an outcome
/// can be observed at most once.
#[derive(Debug)]
pub struct DispatchHandle {
    request_id: Uuid,
    receiver: mpsc::Receiver<OutcomeMessage>,
    state: Arc<Mutex<DispatchState>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DispatchHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> DispatchState {
        read_state(&self.state)
    }

    /// Non-blocking poll. Gives the handle back while the worker is running.
    pub fn try_outcome(self) -> Result<Outcome, Self> {
        match self.receiver.try_recv() {
            Ok((_, outcome)) => Ok(self.complete(outcome)),
            Err(mpsc::TryRecvError::Empty) => Err(self),
            Err(mpsc::TryRecvError::Disconnected) => Ok(self.complete(lost_outcome())),
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<Outcome, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok((_, outcome)) => Ok(self.complete(outcome)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(self),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(self.complete(lost_outcome())),
        }
    }

    pub fn wait(self) -> Outcome {
        let outcome = match self.receiver.recv() {
            Ok((_, outcome)) => outcome,
            Err(_) => lost_outcome(),
        };
        self.complete(outcome)
    }

    fn complete(mut self, outcome: Outcome) -> Outcome {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        outcome
    }
}

fn run_guarded(request: &DispatchRequest, options: &ClientOptions) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| run_request(request, options))) {
        Ok(result) => Outcome::from(result),
        Err(payload) => Outcome::Failure(DispatchError::Internal(format!(
            "dispatch worker panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn run_request(
    request: &DispatchRequest,
    options: &ClientOptions,
) -> Result<NormalizedResponse, DispatchError> {
    let image = request.image().read()?;
    debug!(
        request_id = %request.id(),
        image_bytes = image.len(),
        "image loaded"
    );
    let provider = build_provider(request.config(), options)?;
    provider.analyze(&image, request.prompt())
}

fn finish(
    state: &Mutex<DispatchState>,
    request_id: Uuid,
    outcome: Outcome,
    sender: &mpsc::Sender<OutcomeMessage>,
) {
    let terminal = if outcome.is_success() {
        DispatchState::Succeeded
    } else {
        DispatchState::Failed
    };
    *lock_state(state) = terminal;
    match &outcome {
        Outcome::Success(response) => info!(
            request_id = %request_id,
            chars = response.text.chars().count(),
            "dispatch succeeded"
        ),
        Outcome::Failure(err) => warn!(
            request_id = %request_id,
            category = err.category(),
            error = %err,
            "dispatch failed"
        ),
    }
    if sender.send((request_id, outcome)).is_err() {
        debug!(request_id = %request_id, "outcome receiver dropped; ignoring late outcome");
    }
}

fn lost_outcome() -> Outcome {
    Outcome::Failure(DispatchError::Internal(
        "dispatch worker exited without reporting an outcome".to_string(),
    ))
}

fn lock_state(state: &Mutex<DispatchState>) -> std::sync::MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_state(state: &Mutex<DispatchState>) -> DispatchState {
    *lock_state(state)
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string().chars().take(8).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
