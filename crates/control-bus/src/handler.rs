//! Handler contract and closure-backed handlers.

use crate::event::{downcast, EventDescriptor, EventType, SharedEvent};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Receives events of a declared kind and all of its descendants.
pub trait EventHandler: Send + Sync + 'static {
    /// Declared kind name.
    fn kind(&self) -> &str;

    /// Local-only kinds are never subscribed on a remote server.
    fn local_only(&self) -> bool {
        false
    }

    /// Channel filter. `None` receives every channel.
    fn channel(&self) -> Option<&str> {
        None
    }

    /// Fast synchronous path on the dispatching thread.
    ///
    /// Return `true` if the event was fully handled; `handle` is then not
    /// scheduled for it.
    fn consume(&self, event: &SharedEvent) -> bool {
        let _ = event;
        false
    }

    /// Pooled path, run on the dispatch pool.
    fn handle(&self, event: SharedEvent);
}

/// Whether a handler with `filter` accepts an event on `channel`.
pub(crate) fn channel_matches(filter: Option<&str>, channel: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => channel == Some(wanted),
    }
}

/// Handler backed by a closure.
pub struct FnHandler<F> {
    descriptor: &'static EventDescriptor,
    channel: Option<String>,
    inline: bool,
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(SharedEvent) + Send + Sync + 'static,
{
    /// Handler for `descriptor` and its descendants, run on the pool.
    pub fn new(descriptor: &'static EventDescriptor, callback: F) -> Self {
        Self {
            descriptor,
            channel: None,
            inline: false,
            callback,
        }
    }

    /// Only receive events on `channel`.
    #[must_use]
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Run the callback on the dispatching thread instead of the pool.
    #[must_use]
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    #[must_use]
    pub fn into_handler(self) -> Arc<dyn EventHandler> {
        Arc::new(self)
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(SharedEvent) + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        self.descriptor.name()
    }

    fn local_only(&self) -> bool {
        self.descriptor.is_local_only()
    }

    fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    fn consume(&self, event: &SharedEvent) -> bool {
        if self.inline {
            (self.callback)(Arc::clone(event));
        }
        self.inline
    }

    fn handle(&self, event: SharedEvent) {
        (self.callback)(event);
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("kind", &self.descriptor.name())
            .field("channel", &self.channel)
            .field("inline", &self.inline)
            .finish()
    }
}

/// Handler narrowed to one concrete event type.
///
/// Events of descendant kinds that are a different Rust type are skipped;
/// use [`FnHandler`] on the ancestor kind to see those.
pub struct TypedHandler<E> {
    inner: FnHandler<Box<dyn Fn(SharedEvent) + Send + Sync>>,
    _marker: PhantomData<fn(E)>,
}

impl<E: EventType> TypedHandler<E> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        let narrowed: Box<dyn Fn(SharedEvent) + Send + Sync> =
            Box::new(move |event: SharedEvent| {
                if let Some(event) = downcast::<E>(event) {
                    callback(event);
                }
            });
        Self {
            inner: FnHandler::new(E::kind(), narrowed),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.inner = self.inner.on_channel(channel);
        self
    }

    #[must_use]
    pub fn inline(mut self) -> Self {
        self.inner = self.inner.inline();
        self
    }
}

impl<E: EventType> EventHandler for TypedHandler<E> {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn local_only(&self) -> bool {
        self.inner.local_only()
    }

    fn channel(&self) -> Option<&str> {
        self.inner.channel()
    }

    fn consume(&self, event: &SharedEvent) -> bool {
        self.inner.consume(event)
    }

    fn handle(&self, event: SharedEvent) {
        self.inner.handle(event);
    }
}

/// Pointer identity of two handler handles.
pub(crate) fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerEvent, TIMER_EVENT};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_channel_matching() {
        assert!(channel_matches(None, None));
        assert!(channel_matches(None, Some("a")));
        assert!(channel_matches(Some("a"), Some("a")));
        assert!(!channel_matches(Some("a"), Some("b")));
        assert!(!channel_matches(Some("a"), None));
    }

    #[test]
    fn test_inline_handler_consumes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = FnHandler::new(&TIMER_EVENT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .inline();

        let event: SharedEvent = Arc::new(TimerEvent::INSTANCE);
        assert!(handler.consume(&event));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handler.local_only());
    }

    #[test]
    fn test_pooled_handler_declines_fast_path() {
        let handler = FnHandler::new(&TIMER_EVENT, |_| {});
        let event: SharedEvent = Arc::new(TimerEvent::INSTANCE);
        assert!(!handler.consume(&event));
        assert_eq!(handler.kind(), "TimerEvent");
    }

    #[test]
    fn test_same_handler_is_pointer_identity() {
        let a = FnHandler::new(&TIMER_EVENT, |_| {}).into_handler();
        let b = FnHandler::new(&TIMER_EVENT, |_| {}).into_handler();
        assert!(same_handler(&a, &Arc::clone(&a)));
        assert!(!same_handler(&a, &b));
    }

    #[test]
    fn test_typed_handler_narrows() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = TypedHandler::new(move |_: Arc<TimerEvent>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handler.handle(Arc::new(TimerEvent::INSTANCE));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
