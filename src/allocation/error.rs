use crate::quotation::{GatewayError, ItemId, PurchaseOrderId};
use std::fmt;
use thiserror::Error;

/// Why the round being built cannot be confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    RoundCountNotSet,
    AllRoundsConfirmed,
    RoundInFlight,
    EmptySelection,
    FinalRoundIncomplete { selected: usize, remaining: usize },
    OverLimit { selected: usize, max: usize },
    IncludesAllocatedItem(ItemId),
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::RoundCountNotSet => f.write_str("the number of partial orders is not set"),
            NotReady::AllRoundsConfirmed => f.write_str("every partial order has already been created"),
            NotReady::RoundInFlight => f.write_str("the previous partial order is still being saved"),
            NotReady::EmptySelection => f.write_str("no items are selected"),
            NotReady::FinalRoundIncomplete { selected, remaining } => write!(
                f,
                "the last partial order must take all {} remaining items, {} selected",
                remaining, selected
            ),
            NotReady::OverLimit { selected, max } => {
                write!(f, "{} items selected, at most {} allowed", selected, max)
            }
            NotReady::IncludesAllocatedItem(id) => {
                write!(f, "item {} already belongs to a partial order", id)
            }
        }
    }
}

/// A precondition of `finish_session` that does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmetCondition {
    RoundCountNotSet,
    RoundsOutstanding { confirmed: usize, target: usize },
    ItemsUnallocated { allocated: usize, total: usize },
}

impl fmt::Display for UnmetCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmetCondition::RoundCountNotSet => f.write_str("number of partial orders not set"),
            UnmetCondition::RoundsOutstanding { confirmed, target } => {
                write!(f, "{} of {} partial orders created", confirmed, target)
            }
            UnmetCondition::ItemsUnallocated { allocated, total } => {
                write!(f, "{} of {} items allocated", allocated, total)
            }
        }
    }
}

fn join_conditions(conditions: &[UnmetCondition]) -> String {
    conditions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("number of partial orders must be between 1 and {max}, got {requested}")]
    InvalidRoundCount { requested: usize, max: usize },

    #[error("number of partial orders cannot change after {confirmed} have been created")]
    RoundCountLocked { confirmed: usize },

    #[error("number of partial orders is not set")]
    RoundCountNotSet,

    #[error("item {0} is not part of this quotation")]
    UnknownItem(ItemId),

    #[error("item {0} already belongs to a partial order")]
    ItemAlreadyAllocated(ItemId),

    #[error("at most {max} items can be selected for this partial order")]
    SelectionLimitExceeded { max: usize },

    #[error("every partial order has already been created")]
    AllRoundsConfirmed,

    #[error("partial order cannot be created yet: {0}")]
    RoundNotReady(NotReady),

    #[error("partial order {round} is still being saved")]
    RoundInFlight { round: usize },

    #[error("failed to create partial order {round}: {source}")]
    PersistenceFailed {
        round: usize,
        /// The server may have created the order despite the error.
        outcome_unknown: bool,
        #[source]
        source: GatewayError,
    },

    #[error("session is incomplete: {}", join_conditions(.unmet))]
    SessionIncomplete { unmet: Vec<UnmetCondition> },

    #[error("session is already finished")]
    SessionClosed,

    #[error("conversion not allowed: {0}")]
    ConversionBlocked(String),

    #[error("partial order {round} is no longer in flight")]
    StaleRound { round: usize },

    #[error("partial order {round} was cancelled while its request was pending")]
    RoundCancelled {
        round: usize,
        /// Set when the server answered after the cancel and did create an order.
        purchase_order: Option<PurchaseOrderId>,
    },

    #[error("procurement api error: {0}")]
    Api(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_lists_every_condition() {
        let err = AllocationError::SessionIncomplete {
            unmet: vec![
                UnmetCondition::RoundsOutstanding { confirmed: 1, target: 3 },
                UnmetCondition::ItemsUnallocated { allocated: 2, total: 6 },
            ],
        };
        assert_eq!(
            err.to_string(),
            "session is incomplete: 1 of 3 partial orders created; 2 of 6 items allocated"
        );
    }

    #[test]
    fn test_persistence_failure_keeps_source() {
        let err = AllocationError::PersistenceFailed {
            round: 2,
            outcome_unknown: false,
            source: GatewayError::Status {
                status: 500,
                detail: "boom".to_string(),
            },
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
