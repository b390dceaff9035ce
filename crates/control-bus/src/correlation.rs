//! Request/response correlation over bus events.
//!
//! Binds the generic [`ResponseStore`] to the bus: requests are returnable
//! events keyed by the message id the bus stamped on them, answers are
//! response events carrying the same id.

use crate::event::{downcast, Event, SharedEvent};
use crate::ids::MessageId;
use response_store::{CorrelationStrategy, ResponseStore};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Correlates requests of type `Req` with answers of type `Ans`.
pub struct BusCorrelation<Req, Ans> {
    _marker: PhantomData<fn() -> (Req, Ans)>,
}

impl<Req, Ans> BusCorrelation<Req, Ans> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Ans> Default for BusCorrelation<Req, Ans> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Ans> fmt::Debug for BusCorrelation<Req, Ans> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusCorrelation")
            .field("request", &std::any::type_name::<Req>())
            .field("answer", &std::any::type_name::<Ans>())
            .finish()
    }
}

impl<Req: Event, Ans: Event> CorrelationStrategy for BusCorrelation<Req, Ans> {
    type Event = SharedEvent;
    type Request = Arc<Req>;
    type Answer = Ans;
    type Id = MessageId;

    fn request_id(&self, request: &Arc<Req>) -> Option<MessageId> {
        request.return_address().and_then(|address| address.message_id)
    }

    fn answer_id(&self, answer: &Ans) -> Option<MessageId> {
        answer.response_address().map(|address| address.message_id)
    }

    fn as_request(&self, event: &SharedEvent) -> Option<Arc<Req>> {
        downcast::<Req>(Arc::clone(event))
    }

    fn as_answer<'a>(&self, event: &'a SharedEvent) -> Option<&'a Ans> {
        (**event).downcast_ref::<Ans>()
    }
}

/// Response store for bus requests of type `Req` answered by `Ans`.
pub type BusResponseStore<Req, Ans> = ResponseStore<BusCorrelation<Req, Ans>>;
