//! Per-model inference gates.
//!
//! llama-server cancels an in-flight evaluation when a second request lands
//! on the same slot, so the gateway runs at most one inference per model key.
//! Each gate pairs a single execution slot with a bounded admission counter:
//!
//! - [`InferenceGate::enter_queue`] admits a call or rejects it at once when
//!   `max_queue_depth` calls are already in flight. Admission never waits.
//! - The returned [`QueueTicket`] keeps the call counted until it is dropped.
//! - The slot is a one-permit semaphore; whoever holds the permit executes.
//!
//! Waiters are woken in whatever order the semaphore chooses. Callers must not
//! rely on arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{GatewayError, Result};

/// Concurrency gate for one model key.
#[derive(Debug)]
pub struct InferenceGate {
    model_key: String,
    slot: Arc<Semaphore>,
    max_queue_depth: usize,
    depth: Mutex<usize>,
}

impl InferenceGate {
    pub fn new(model_key: impl Into<String>, max_queue_depth: usize) -> Self {
        Self {
            model_key: model_key.into(),
            slot: Arc::new(Semaphore::new(1)),
            max_queue_depth,
            depth: Mutex::new(0),
        }
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    fn depth_lock(&self) -> MutexGuard<'_, usize> {
        // The counter is a plain integer; a poisoned lock still holds a valid value.
        self.depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Calls currently admitted (waiting or executing).
    pub fn depth(&self) -> usize {
        *self.depth_lock()
    }

    /// Admit a call, or reject it without side effects when the queue is full.
    pub fn enter_queue(self: &Arc<Self>) -> Result<QueueTicket> {
        let mut depth = self.depth_lock();
        if *depth >= self.max_queue_depth {
            tracing::warn!(
                model_key = %self.model_key,
                depth = *depth,
                "Queue full, rejecting request"
            );
            return Err(GatewayError::AdmissionRejected {
                model_key: self.model_key.clone(),
                depth: *depth,
            });
        }
        *depth += 1;
        tracing::debug!(model_key = %self.model_key, depth = *depth, "Request admitted");
        Ok(QueueTicket {
            gate: Arc::clone(self),
        })
    }

    fn leave_queue(&self) {
        let mut depth = self.depth_lock();
        *depth = depth.saturating_sub(1);
    }

    /// Take the execution slot if it is free right now.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slot).try_acquire_owned().ok()
    }

    /// Wait for the execution slot without a deadline.
    ///
    /// The future keeps its place among waiters while it is alive, so callers
    /// that need to do work between polls should pin it rather than recreate it.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.slot)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Internal(format!("execution slot for '{}' closed", self.model_key)))
    }

    /// Take the slot inline if free, otherwise wait for it up to `timeout`.
    pub async fn lease_within(&self, ticket: QueueTicket, timeout: Duration) -> Result<ExecutionLease> {
        if let Some(permit) = self.try_acquire() {
            return Ok(ExecutionLease::new(ticket, permit));
        }

        tracing::debug!(
            model_key = %self.model_key,
            depth = self.depth(),
            "Waiting for running inference to finish"
        );
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(permit) => Ok(ExecutionLease::new(ticket, permit?)),
            Err(_) => Err(GatewayError::UpstreamTimeout(format!(
                "model '{}' stayed busy for {}s",
                self.model_key,
                timeout.as_secs()
            ))),
        }
    }
}

/// Admission record for one call. Dropping it leaves the queue.
#[derive(Debug)]
pub struct QueueTicket {
    gate: Arc<InferenceGate>,
}

impl QueueTicket {
    pub fn gate(&self) -> &Arc<InferenceGate> {
        &self.gate
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.gate.leave_queue();
    }
}

/// Right to execute: the admission ticket plus the slot permit.
///
/// Both are released when the lease is dropped, on every exit path.
#[derive(Debug)]
pub struct ExecutionLease {
    _permit: OwnedSemaphorePermit,
    ticket: QueueTicket,
}

impl ExecutionLease {
    pub fn new(ticket: QueueTicket, permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: permit,
            ticket,
        }
    }

    pub fn model_key(&self) -> &str {
        self.ticket.gate.model_key()
    }
}

/// All gates, keyed by model key.
///
/// Gates are created on first use and live as long as the registry. The map
/// lock only guards insert-if-absent; gate state has its own locks.
#[derive(Debug)]
pub struct GateRegistry {
    gates: Mutex<HashMap<String, Arc<InferenceGate>>>,
    max_queue_depth: usize,
}

impl GateRegistry {
    pub fn new(max_queue_depth: usize) -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            max_queue_depth,
        }
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<String, Arc<InferenceGate>>> {
        self.gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gate for `model_key`, created if absent.
    pub fn gate(&self, model_key: &str) -> Arc<InferenceGate> {
        let mut gates = self.gates();
        if let Some(gate) = gates.get(model_key) {
            return Arc::clone(gate);
        }
        let gate = Arc::new(InferenceGate::new(model_key, self.max_queue_depth));
        gates.insert(model_key.to_string(), Arc::clone(&gate));
        gate
    }

    /// Queue depth for `model_key`; zero for keys never gated.
    pub fn depth(&self, model_key: &str) -> usize {
        self.gates().get(model_key).map(|g| g.depth()).unwrap_or(0)
    }
}
