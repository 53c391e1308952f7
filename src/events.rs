//! Typed publish/subscribe shared by every stateful playback component.
//!
//! Dispatch is synchronous and single-threaded: `publish` runs every live
//! handler registered for the topic, in registration order, before it returns.
//! Handlers may publish, subscribe or unsubscribe re-entrantly; a handler
//! removed by an earlier handler in the same dispatch is not invoked, and a
//! handler added during a dispatch only sees later events.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

/// Error a handler may return; it is logged and does not stop the dispatch.
pub type HandlerError = Box<dyn std::error::Error>;

/// A registered callback. Identity (for `unsubscribe`) is the `Rc` allocation.
pub type Handler<P> = Rc<dyn Fn(&P) -> Result<(), HandlerError>>;

/// Wrap a closure as a [`Handler`].
pub fn handler<P, F>(f: F) -> Handler<P>
where
    F: Fn(&P) -> Result<(), HandlerError> + 'static,
{
    Rc::new(f)
}

/// Shared flag that retires every registration made with it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Drop the registration right before its first invocation.
    pub only_once: bool,
    /// Registration is ignored (and pruned) once this token is cancelled.
    pub cancel: Option<CancelToken>,
}

impl SubscribeOptions {
    pub fn once() -> Self {
        Self {
            only_once: true,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Registration<T, P> {
    id: SubscriptionId,
    topic: T,
    handler: Handler<P>,
    only_once: bool,
    cancel: Option<CancelToken>,
}

impl<T, P> Registration<T, P> {
    fn live(&self) -> bool {
        !self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

pub struct EventBus<T, P> {
    registrations: RefCell<Vec<Registration<T, P>>>,
    next_id: Cell<u64>,
}

impl<T, P> Default for EventBus<T, P> {
    fn default() -> Self {
        Self {
            registrations: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }
}

impl<T, P> fmt::Debug for EventBus<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("registrations", &self.registrations.borrow().len())
            .finish()
    }
}

impl<T, P> EventBus<T, P>
where
    T: Copy + PartialEq + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    ///
    /// The same handler may be registered several times; each registration is
    /// independent and is invoked once per publish. Subscribing with an
    /// already-cancelled token registers nothing.
    pub fn subscribe(
        &self,
        topic: T,
        handler: Handler<P>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let registration = Registration {
            id,
            topic,
            handler,
            only_once: options.only_once,
            cancel: options.cancel,
        };
        if registration.live() {
            let mut regs = self.registrations.borrow_mut();
            regs.retain(Registration::live);
            regs.push(registration);
        } else {
            debug!(?topic, "subscription token already cancelled, not registering");
        }
        id
    }

    /// Remove the earliest registration of `handler` for `topic`.
    ///
    /// Returns false (and does nothing) when there is no such registration.
    pub fn unsubscribe(&self, topic: T, handler: &Handler<P>) -> bool {
        let mut regs = self.registrations.borrow_mut();
        match regs
            .iter()
            .position(|r| r.topic == topic && Rc::ptr_eq(&r.handler, handler))
        {
            Some(pos) => {
                regs.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let mut regs = self.registrations.borrow_mut();
        match regs.iter().position(|r| r.id == id) {
            Some(pos) => {
                regs.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` to every live subscriber of `topic`.
    ///
    /// Events published with no subscriber are dropped, never queued.
    pub fn publish(&self, topic: T, payload: &P) -> PublishReport {
        let pending: Vec<(SubscriptionId, Handler<P>)> = {
            let mut regs = self.registrations.borrow_mut();
            regs.retain(Registration::live);
            regs.iter()
                .filter(|r| r.topic == topic)
                .map(|r| (r.id, r.handler.clone()))
                .collect()
        };

        let mut report = PublishReport::default();
        if pending.is_empty() {
            debug!(?topic, "no subscribers, event discarded");
            return report;
        }

        for (id, handler) in pending {
            if !self.claim(id) {
                continue;
            }
            match handler(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(?topic, error = %e, "event handler failed");
                }
            }
        }
        report
    }

    /// Live registrations for `topic`.
    pub fn listener_count(&self, topic: T) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|r| r.topic == topic && r.live())
            .count()
    }

    /// Stored registrations, including cancelled ones not yet pruned.
    #[cfg(test)]
    pub(crate) fn registration_count(&self) -> usize {
        self.registrations.borrow().len()
    }

    // A registration may have been removed or cancelled by an earlier handler
    // of the same dispatch; only still-live ones run. One-shot registrations
    // are removed before their handler is called.
    fn claim(&self, id: SubscriptionId) -> bool {
        let mut regs = self.registrations.borrow_mut();
        let Some(pos) = regs.iter().position(|r| r.id == id) else {
            return false;
        };
        if !regs[pos].live() {
            regs.remove(pos);
            return false;
        }
        if regs[pos].only_once {
            regs.remove(pos);
        }
        true
    }
}
