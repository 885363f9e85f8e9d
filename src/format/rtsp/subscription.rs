//! Request/response correlation by CSeq.
//!
//! An entry is registered before the request bytes are transmitted, so a
//! fast reply can never arrive unroutable. It is consumed exactly once: by
//! the steady-state poll path fulfilling the waiter's completion channel, or
//! by the pre-PLAY direct-read path taking its own entry back.

use super::message::{Method, RtspRequest, RtspResponse};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

#[derive(Debug)]
struct PendingEntry {
    method: Method,
    tx: oneshot::Sender<RtspResponse>,
}

/// One completion channel per in-flight CSeq. The lock only covers map
/// mutation, never a wait.
#[derive(Debug, Default)]
pub struct ResponseSubscriptions {
    pending: Mutex<HashMap<u32, PendingEntry>>,
}

impl ResponseSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending entry for `request` and returns the completion
    /// handle the caller can await.
    pub fn subscribe(&self, request: &RtspRequest) -> oneshot::Receiver<RtspResponse> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            method: request.method(),
            tx,
        };
        self.pending.lock().insert(request.cseq(), entry);
        rx
    }

    /// Removes the pending entry for `cseq`, if it is still unconsumed.
    pub fn unsubscribe(&self, cseq: u32) -> bool {
        self.pending.lock().remove(&cseq).is_some()
    }

    /// Routes a decoded response to its waiter. Returns false when no
    /// pending entry matches; late replies are the caller's to ignore.
    pub fn fulfill(&self, response: RtspResponse) -> bool {
        let Some(cseq) = response.cseq() else {
            warn!("Discarding response without CSeq (status {})", response.status);
            return false;
        };

        let Some(entry) = self.pending.lock().remove(&cseq) else {
            return false;
        };

        debug!(
            "Matched response for {} (CSeq {}, status {})",
            entry.method.as_str(),
            cseq,
            response.status
        );

        if entry.tx.send(response).is_err() {
            // The waiter already gave up on its timeout.
            debug!("Waiter for CSeq {} is gone", cseq);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
