use std::sync::{Arc, RwLock};

use super::session::{ModelLoadError, ModelSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Model not loaded")]
pub struct NotLoadedError;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Load(#[from] ModelLoadError),
    #[error("model initialization already {0}")]
    AlreadyInitialized(&'static str),
    #[error("model initialization previously failed: {0}")]
    PreviouslyFailed(String),
    #[error("lifecycle state lock poisoned")]
    Poisoned,
}

enum State {
    Unloaded,
    Loading,
    Ready(Arc<ModelSession>),
    Failed(String),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Unloaded => "unloaded",
            State::Loading => "in progress",
            State::Ready(_) => "completed",
            State::Failed(_) => "failed",
        }
    }
}

/// Owns the one-shot construction of the shared [`ModelSession`].
///
/// Probes only ever observe `Unloaded`, `Loading`, `Ready` or `Failed`; the
/// session is published after the loader has fully succeeded.
pub struct ModelLifecycle {
    state: RwLock<State>,
}

impl Default for ModelLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::Unloaded),
        }
    }

    /// Runs `loader` if and only if no load has been attempted yet. The lock
    /// is not held while the loader runs.
    pub fn initialize<F>(&self, loader: F) -> Result<Arc<ModelSession>, LifecycleError>
    where
        F: FnOnce() -> Result<ModelSession, ModelLoadError>,
    {
        {
            let mut state = self.state.write().map_err(|_| LifecycleError::Poisoned)?;
            match &*state {
                State::Unloaded => *state = State::Loading,
                State::Failed(reason) => {
                    return Err(LifecycleError::PreviouslyFailed(reason.clone()));
                }
                other => return Err(LifecycleError::AlreadyInitialized(other.name())),
            }
        }

        let outcome = loader();

        let mut state = self.state.write().map_err(|_| LifecycleError::Poisoned)?;
        match outcome {
            Ok(session) => {
                let session = Arc::new(session);
                *state = State::Ready(Arc::clone(&session));
                Ok(session)
            }
            Err(e) => {
                log::error!("Failed to load model: {}", e);
                *state = State::Failed(e.to_string());
                Err(LifecycleError::Load(e))
            }
        }
    }

    pub fn session(&self) -> Result<Arc<ModelSession>, NotLoadedError> {
        match &*self.state.read().map_err(|_| NotLoadedError)? {
            State::Ready(session) => Ok(Arc::clone(session)),
            _ => Err(NotLoadedError),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.session().is_ok()
    }

    /// Reason recorded by a failed load, if any.
    pub fn failure(&self) -> Option<String> {
        match &*self.state.read().ok()? {
            State::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}
