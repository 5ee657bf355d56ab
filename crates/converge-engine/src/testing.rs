//! Scripted in-memory control plane for tests
//!
//! Each remote call pops the next scripted response. When a script runs dry
//! the last response is repeated, so "always running" needs a single entry.

use crate::error::RemoteError;
use crate::remote::{ControlPlane, FlowStatus, MutateResponse};
use crate::request::{OperationRequest, OperationToken};
use crate::state::ResourceState;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

type Reply<T> = Result<T, RemoteError>;

#[derive(Debug)]
struct Script<T> {
    queue: VecDeque<Reply<T>>,
    last: Option<Reply<T>>,
    calls: u32,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
            calls: 0,
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self, what: &str) -> Reply<T> {
        self.calls += 1;
        if let Some(reply) = self.queue.pop_front() {
            self.last = Some(reply.clone());
            return reply;
        }
        self.last.clone().unwrap_or_else(|| {
            Err(RemoteError::new(
                "InternalError.ScriptExhausted",
                format!("no {} response scripted", what),
            ))
        })
    }
}

#[derive(Debug, Default)]
struct Scripts {
    mutate: Script<MutateResponse>,
    status: Script<FlowStatus>,
    read: Script<Option<ResourceState>>,
    requests: Vec<OperationRequest>,
    queried_tokens: Vec<OperationToken>,
}

/// Control plane that replays scripted responses and records every call
#[derive(Debug, Default)]
pub struct ScriptedControlPlane {
    scripts: Mutex<Scripts>,
}

impl ScriptedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn scripts(&self) -> std::sync::MutexGuard<'_, Scripts> {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_mutate(&self, reply: Reply<MutateResponse>) -> &Self {
        self.scripts().mutate.queue.push_back(reply);
        self
    }

    pub fn push_status(&self, reply: Reply<FlowStatus>) -> &Self {
        self.scripts().status.queue.push_back(reply);
        self
    }

    pub fn push_read(&self, reply: Reply<Option<ResourceState>>) -> &Self {
        self.scripts().read.queue.push_back(reply);
        self
    }

    pub fn mutate_calls(&self) -> u32 {
        self.scripts().mutate.calls
    }

    pub fn status_calls(&self) -> u32 {
        self.scripts().status.calls
    }

    pub fn read_calls(&self) -> u32 {
        self.scripts().read.calls
    }

    /// Every request passed to `mutate`, in order
    pub fn requests(&self) -> Vec<OperationRequest> {
        self.scripts().requests.clone()
    }

    pub fn queried_tokens(&self) -> Vec<OperationToken> {
        self.scripts().queried_tokens.clone()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn mutate(&self, request: &OperationRequest) -> Result<MutateResponse, RemoteError> {
        let mut scripts = self.scripts();
        scripts.requests.push(request.clone());
        scripts.mutate.next("mutate")
    }

    async fn query_status(&self, token: &OperationToken) -> Result<FlowStatus, RemoteError> {
        let mut scripts = self.scripts();
        scripts.queried_tokens.push(token.clone());
        scripts.status.next("status")
    }

    async fn read(
        &self,
        _resource_type: &str,
        _resource_id: &str,
    ) -> Result<Option<ResourceState>, RemoteError> {
        self.scripts().read.next("read")
    }
}
