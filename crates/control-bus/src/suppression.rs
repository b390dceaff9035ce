//! Per-kind opt-out from event logging.

use crate::event::Event;
use crate::timer::TIMER_EVENT;
use dashmap::DashSet;

/// Kind names whose events are not logged when sent or handled.
pub(crate) struct LogSuppression {
    suppressed: DashSet<String>,
}

impl LogSuppression {
    /// Suppression set with the timer tick and `extra` kinds excluded.
    pub(crate) fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suppressed = DashSet::new();
        suppressed.insert(TIMER_EVENT.name().to_string());
        for name in extra {
            suppressed.insert(name.into());
        }
        Self { suppressed }
    }

    pub(crate) fn disable(&self, kind: &str) {
        self.suppressed.insert(kind.to_string());
    }

    pub(crate) fn enable(&self, kind: &str) {
        self.suppressed.remove(kind);
    }

    /// Matches the concrete kind only, not its ancestors.
    pub(crate) fn shall_be_logged(&self, event: &dyn Event) -> bool {
        !self.suppressed.contains(event.descriptor().name())
    }
}
