//! Correlation strategy: how ids are read and how events are narrowed.

use std::fmt;
use std::hash::Hash;

/// Pluggable id extraction and type narrowing for a [`ResponseStore`].
///
/// `Event` is the common event type a consumer receives, `Request` is what
/// the store keeps (and hands back on a match), `Answer` is the response
/// side.
///
/// [`ResponseStore`]: crate::ResponseStore
pub trait CorrelationStrategy: Send + Sync {
    /// Common supertype of requests and answers.
    type Event: ?Sized;
    /// Stored request type.
    type Request: Send + Sync;
    /// Response type.
    type Answer: ?Sized;
    /// Message id shared by a request and its answer.
    type Id: Eq + Hash + Clone + fmt::Debug + Send + Sync;

    /// Message id of an outgoing request, if it has one yet.
    fn request_id(&self, request: &Self::Request) -> Option<Self::Id>;

    /// Message id an answer refers to.
    fn answer_id(&self, answer: &Self::Answer) -> Option<Self::Id>;

    /// Narrow an event to a request, returning the value to store.
    fn as_request(&self, event: &Self::Event) -> Option<Self::Request>;

    /// Narrow an event to an answer.
    fn as_answer<'a>(&self, event: &'a Self::Event) -> Option<&'a Self::Answer>;

    /// Whether a matched answer reclaims the request.
    ///
    /// Strategies for multi-part answers return `false` until the final part.
    fn should_remove(&self, request: &Self::Request, answer: &Self::Answer) -> bool {
        let _ = (request, answer);
        true
    }
}
