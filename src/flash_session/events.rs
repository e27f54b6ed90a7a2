//! Events for the `otacom` connection state machine.
//!
//! This module is private and restricted to the
//! [`flash_session`](crate::flash_session) scope.
//!
//! A connection handler returns one of these events after each readiness
//! notification. Most notifications only move the connection along its phases
//! and produce [`Event::Idle`]; the other events ask the session to retire the
//! connection, and possibly to replace it.

use std::rc::Rc;

use super::outcomes::Outcome;
use crate::utils::Target;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// DoneEvent ===================================================================

/// Event fired when a connection reaches a terminal phase. The session must
/// unregister and close the connection, then record the outcome for its
/// target.
///
/// The outcome is always [`Outcome::Success`] or [`Outcome::Failure`].
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub target: Rc<Target>,
    pub outcome: Outcome,
}

// RebootEvent =================================================================

/// Event fired when the OTA server answers that it is rebooting into its
/// bootloader.
///
/// The current connection is useless from now on. The session closes it and
/// opens a brand new one for the same target, starting again from the request
/// frame. The outcome of the target stays unresolved.
#[derive(Debug)]
pub(crate) struct RebootEvent {
    pub target: Rc<Target>,
}

// Events enum ==================================================================

/// Events that can be triggered by the connection state machine.
#[derive(Debug)]
pub(crate) enum Event {
    /// Nothing for the session to do, the connection stays registered.
    Idle,
    Done(DoneEvent),
    Reboot(RebootEvent),
}
impl Event {
    /// `true` when the connection that produced the event must be retired.
    pub fn retires_connection(&self) -> bool {
        !matches!(self, Event::Idle)
    }
}
