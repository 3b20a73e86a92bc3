//! Reconnection cache: process-local terminal results keyed by request id.
//!
//! Lets a client that reconnects after a network blip get its result replayed
//! without repeating work. Never authoritative: a miss falls back to the
//! queue store. Bounded by capacity and TTL; nothing survives a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use coachgen_ai::GenerationOutput;
use coachgen_core::{Clock, RequestId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Started,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub status: CacheStatus,
    pub result_ref: Option<String>,
    pub payload: Option<JsonValue>,
    pub extras: Option<JsonValue>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub owner: Option<UserId>,
}

impl CachedResult {
    fn started(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            status: CacheStatus::Started,
            result_ref: None,
            payload: None,
            extras: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, CacheStatus::Started)
    }

    /// Slots written without a prior `start` have no known owner and never match.
    pub fn owned_by(&self, user_id: UserId) -> bool {
        self.owner == Some(user_id)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug)]
struct Slot {
    value: CachedResult,
    written_at: Instant,
}

/// Bounded, TTL-evicting map from request id to the latest known outcome.
pub struct ReconnectionCache {
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    slots: Mutex<HashMap<RequestId, Slot>>,
}

impl ReconnectionCache {
    pub fn new(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            clock,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Record first observation of a request id. Never downgrades a terminal slot.
    pub fn start(&self, request_id: &RequestId, owner: UserId) {
        self.write(request_id, CachedResult::started(owner), |existing| {
            !existing.is_terminal()
        });
    }

    /// Record success. Returns `false` when another executor already settled it.
    pub fn complete(&self, request_id: &RequestId, output: &GenerationOutput) -> bool {
        let value = CachedResult {
            status: CacheStatus::Complete,
            result_ref: Some(output.result_ref.clone()),
            payload: Some(output.payload.clone()),
            extras: output.extras.clone(),
            error_message: None,
            owner: None,
        };
        self.write(request_id, value, |existing| !existing.is_terminal())
    }

    /// Record failure with a user-facing message. First terminal write wins.
    pub fn error(&self, request_id: &RequestId, message: &str) -> bool {
        let value = CachedResult {
            status: CacheStatus::Error,
            result_ref: None,
            payload: None,
            extras: None,
            error_message: Some(message.to_string()),
            owner: None,
        };
        self.write(request_id, value, |existing| !existing.is_terminal())
    }

    pub fn get(&self, request_id: &RequestId) -> Option<CachedResult> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        match slots.get(request_id) {
            Some(slot) if self.expired(slot, now) => {
                slots.remove(request_id);
                None
            }
            Some(slot) => Some(slot.value.clone()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expired(&self, slot: &Slot, now: Instant) -> bool {
        now.saturating_duration_since(slot.written_at) >= self.config.ttl
    }

    /// Writes `value`, keeping the slot's owner when `value` carries none.
    fn write(
        &self,
        request_id: &RequestId,
        mut value: CachedResult,
        may_replace: impl FnOnce(&CachedResult) -> bool,
    ) -> bool {
        let now = self.clock.now();
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get_mut(request_id) {
            if !self.expired(slot, now) {
                if !may_replace(&slot.value) {
                    return false;
                }
                if value.owner.is_none() {
                    value.owner = slot.value.owner;
                }
                slot.value = value;
                slot.written_at = now;
                return true;
            }
        }

        slots.retain(|_, slot| !self.expired(slot, now));
        while slots.len() >= self.config.capacity.max(1) {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.written_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    tracing::debug!(request_id = %id, "evicting reconnection cache slot");
                    slots.remove(&id);
                }
                None => break,
            }
        }
        slots.insert(
            request_id.clone(),
            Slot {
                value,
                written_at: now,
            },
        );
        true
    }
}
