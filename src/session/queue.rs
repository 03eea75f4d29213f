//! Pending call bookkeeping.

use std::collections::VecDeque;
use std::fmt;

use super::{AjaxCallback, AjaxRequest, AjaxResponse, Priority, ReplyKind};

/// A call waiting for, or holding, a slot on the link.
pub(crate) struct PendingCall {
    pub request: AjaxRequest,
    pub attempts_left: u32,
    callback: AjaxCallback,
}

impl PendingCall {
    pub fn new(request: AjaxRequest, callback: AjaxCallback, attempts: u32) -> Self {
        Self {
            request,
            attempts_left: attempts,
            callback,
        }
    }

    /// Deliver a response from the device.
    pub fn succeed(self, status: u16, body: bytes::Bytes) {
        let tag = self.request.tag;
        (self.callback)(AjaxResponse {
            body: Some(body),
            kind: ReplyKind::Success,
            status,
            tag,
        });
    }

    /// Deliver a synthetic failure.
    pub fn fail(self, status: u16) {
        let tag = self.request.tag;
        (self.callback)(AjaxResponse {
            body: None,
            kind: ReplyKind::Error,
            status,
            tag,
        });
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("tag", &self.request.tag)
            .field("method", &self.request.method)
            .field("url", &self.request.url)
            .field("attempts_left", &self.attempts_left)
            .finish()
    }
}

/// FIFO queue where high-priority calls jump to the front.
#[derive(Debug, Default)]
pub(crate) struct CallQueue {
    calls: VecDeque<PendingCall>,
}

impl CallQueue {
    pub fn push(&mut self, call: PendingCall) {
        match call.request.priority {
            Priority::High => self.calls.push_front(call),
            Priority::Normal => self.calls.push_back(call),
        }
    }

    pub fn pop(&mut self) -> Option<PendingCall> {
        self.calls.pop_front()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingCall> + '_ {
        self.calls.drain(..)
    }
}
