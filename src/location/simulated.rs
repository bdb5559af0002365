//! Scriptable position provider for tests and headless runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use crate::location::provider::{
    FixReceiver, FixRequest, PermissionStatus, PositionProvider, ProviderError, WatchOptions,
};
use crate::models::location::{GeoPoint, LocationFix};

#[derive(Debug, Clone)]
pub enum ScriptedFix {
    Fix(LocationFix),
    Fail(ProviderError),
    /// Never answers; the caller's timeout decides.
    Hang,
}

pub struct SimulatedProvider {
    permission: Mutex<PermissionStatus>,
    alternate_backend: bool,
    responses: Mutex<VecDeque<ScriptedFix>>,
    requests: Mutex<Vec<FixRequest>>,
    watchers: Mutex<Vec<mpsc::Sender<Result<LocationFix, ProviderError>>>>,
    watch_requests: Mutex<Vec<WatchOptions>>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(PermissionStatus::Granted),
            alternate_backend: false,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
            watch_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_alternate_backend(mut self) -> Self {
        self.alternate_backend = true;
        self
    }

    pub fn with_permission(self, status: PermissionStatus) -> Self {
        Self {
            permission: Mutex::new(status),
            ..self
        }
    }

    pub async fn set_permission(&self, status: PermissionStatus) {
        *self.permission.lock().await = status;
    }

    /// Queues the answer for the next single-shot request.
    pub async fn script(&self, response: ScriptedFix) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn script_fix_at(&self, point: GeoPoint) {
        self.script(ScriptedFix::Fix(LocationFix::at(point, Utc::now())))
            .await;
    }

    /// Single-shot requests received so far, in order.
    pub async fn requests(&self) -> Vec<FixRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn watch_requests(&self) -> Vec<WatchOptions> {
        self.watch_requests.lock().await.clone()
    }

    /// Feeds a fix to every live watch. Returns how many watches received it.
    pub async fn push_fix(&self, fix: LocationFix) -> usize {
        self.broadcast(Ok(fix)).await
    }

    pub async fn move_to(&self, point: GeoPoint) -> usize {
        self.push_fix(LocationFix::at(point, Utc::now())).await
    }

    pub async fn push_error(&self, err: ProviderError) -> usize {
        self.broadcast(Err(err)).await
    }

    pub async fn active_watches(&self) -> usize {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|tx| !tx.is_closed());
        watchers.len()
    }

    async fn broadcast(&self, event: Result<LocationFix, ProviderError>) -> usize {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|tx| !tx.is_closed());

        let mut delivered = 0;
        for tx in watchers.iter() {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl PositionProvider for SimulatedProvider {
    async fn request_permission(&self) -> PermissionStatus {
        *self.permission.lock().await
    }

    fn has_alternate_backend(&self) -> bool {
        self.alternate_backend
    }

    async fn current_position(&self, request: &FixRequest) -> Result<LocationFix, ProviderError> {
        self.requests.lock().await.push(request.clone());
        let next = self.responses.lock().await.pop_front();

        match next {
            Some(ScriptedFix::Fix(fix)) => Ok(fix),
            Some(ScriptedFix::Fail(err)) => Err(err),
            Some(ScriptedFix::Hang) => std::future::pending().await,
            None => Err(ProviderError::unavailable("no position available")),
        }
    }

    async fn watch_position(&self, options: &WatchOptions) -> Result<FixReceiver, ProviderError> {
        self.watch_requests.lock().await.push(options.clone());
        let (tx, rx) = mpsc::channel(64);
        self.watchers.lock().await.push(tx);
        Ok(rx)
    }
}
