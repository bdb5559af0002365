//! Ride request state machine.
//!
//! `pending -> accepted -> on_way -> arrived -> completed`, and
//! `pending -> cancelled`. Everything else is rejected.

use crate::error::AppError;
use crate::models::ride::RideStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Rider,
    Operator,
}

/// Timestamp a transition stamps with server time, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    AcceptedAt,
    CompletedAt,
}

impl Stamp {
    pub fn field(self) -> &'static str {
        match self {
            Stamp::AcceptedAt => "acceptedAt",
            Stamp::CompletedAt => "completedAt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RideStatus,
    pub to: RideStatus,
    pub actor: Actor,
    pub stamp: Option<Stamp>,
}

/// The single authoritative transition table.
pub fn transition(from: RideStatus, to: RideStatus) -> Result<Transition, AppError> {
    use RideStatus::*;

    let (actor, stamp) = match (from, to) {
        (Pending, Accepted) => (Actor::Operator, Some(Stamp::AcceptedAt)),
        (Pending, Cancelled) => (Actor::Rider, None),
        (Accepted, OnWay) => (Actor::Operator, None),
        (OnWay, Arrived) => (Actor::Operator, None),
        (Arrived, Completed) => (Actor::Operator, Some(Stamp::CompletedAt)),
        (Pending, _) | (Accepted, _) | (OnWay, _) | (Arrived, _) | (Completed, _) | (Cancelled, _) => {
            return Err(AppError::InvalidTransition { from, to });
        }
    };

    Ok(Transition {
        from,
        to,
        actor,
        stamp,
    })
}

pub fn can_transition(from: RideStatus, to: RideStatus) -> bool {
    transition(from, to).is_ok()
}

/// The next status an operator moves a claimed ride to.
pub fn next_operator_step(from: RideStatus) -> Option<RideStatus> {
    RideStatus::ALL.into_iter().find(|to| {
        matches!(transition(from, *to), Ok(Transition { actor: Actor::Operator, .. }))
    })
}
