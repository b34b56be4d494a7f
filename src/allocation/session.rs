//! Allocation session: partitions a quotation's line items into a fixed number
//! of disjoint, non-empty partial orders, one confirmed round at a time.
//!
//! The session is a plain state object. It never talks to the network; the
//! allocator drives `begin_round` / `complete_round` / `abort_round` around the
//! persistence call.

use super::error::{AllocationError, NotReady, UnmetCondition};
use crate::quotation::{ItemId, LineItem, PurchaseOrderId, PurchaseOrderRecord, Quotation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    Configuring,
    RoundInFlight,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Added,
    Removed,
}

/// A confirmed round. Never changes after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialOrder {
    pub round: usize,
    pub items: Vec<LineItem>,
    pub purchase_order: PurchaseOrderId,
    pub client_po_number: String,
    pub confirmed_at: DateTime<Utc>,
}

impl PartialOrder {
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.iter().map(|item| item.id)
    }
}

/// Handed out by `begin_round`; must be given back to exactly one of
/// `complete_round` or `abort_round`.
#[derive(Debug, Clone)]
pub struct RoundTicket {
    round: usize,
    attempt: Uuid,
    selection: BTreeSet<ItemId>,
    items: Vec<LineItem>,
    idempotency_key: Uuid,
}

impl RoundTicket {
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    round: usize,
    attempt: Uuid,
}

#[derive(Debug, Clone)]
pub struct AllocationSession {
    quotation: Quotation,
    target_round_count: Option<usize>,
    rounds: Vec<PartialOrder>,
    consumed_item_ids: BTreeSet<ItemId>,
    pending_selection: BTreeSet<ItemId>,
    in_flight: Option<InFlight>,
    retry_key: Option<(BTreeSet<ItemId>, Uuid)>,
    last_outcome_unknown: bool,
    complete: bool,
}

impl AllocationSession {
    pub fn new(quotation: Quotation) -> Self {
        Self {
            quotation,
            target_round_count: None,
            rounds: Vec::new(),
            consumed_item_ids: BTreeSet::new(),
            pending_selection: BTreeSet::new(),
            in_flight: None,
            retry_key: None,
            last_outcome_unknown: false,
            complete: false,
        }
    }

    pub fn quotation(&self) -> &Quotation {
        &self.quotation
    }

    pub fn state(&self) -> SessionState {
        if self.complete {
            SessionState::Complete
        } else if self.in_flight.is_some() {
            SessionState::RoundInFlight
        } else if self.target_round_count.is_some() {
            SessionState::Configuring
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn target_round_count(&self) -> Option<usize> {
        self.target_round_count
    }

    pub fn rounds(&self) -> &[PartialOrder] {
        &self.rounds
    }

    pub fn consumed_item_ids(&self) -> &BTreeSet<ItemId> {
        &self.consumed_item_ids
    }

    pub fn pending_selection(&self) -> &BTreeSet<ItemId> {
        &self.pending_selection
    }

    pub fn round_in_flight(&self) -> Option<usize> {
        self.in_flight.map(|f| f.round)
    }

    /// Set after a failed or cancelled round when the server may still have
    /// created the purchase order. Cleared by the next successful round.
    pub fn last_outcome_unknown(&self) -> bool {
        self.last_outcome_unknown
    }

    pub fn total_item_count(&self) -> usize {
        self.quotation.item_count()
    }

    pub fn remaining_item_count(&self) -> usize {
        self.total_item_count() - self.consumed_item_ids.len()
    }

    pub fn remaining_rounds(&self) -> Option<usize> {
        self.target_round_count
            .map(|target| target.saturating_sub(self.rounds.len()))
    }

    /// Ordinal of the round currently being built.
    pub fn current_round(&self) -> usize {
        self.rounds.len() + 1
    }

    pub fn is_final_round(&self) -> bool {
        self.remaining_rounds() == Some(1)
    }

    pub fn remaining_items(&self) -> impl DoubleEndedIterator<Item = &LineItem> + '_ {
        self.quotation
            .items()
            .iter()
            .filter(|item| !self.consumed_item_ids.contains(&item.id))
    }

    /// `total - (target - 1)`: the cap that reserves one item for every other round.
    ///
    /// This is the flat per-round figure. `selection_limit` is what toggling
    /// enforces, and it is tighter in later rounds.
    pub fn static_round_cap(&self) -> Option<usize> {
        self.target_round_count
            .map(|target| self.total_item_count() + 1 - target)
    }

    /// Most items the round being built may hold.
    ///
    /// The final round must take everything left. Earlier rounds are bounded by
    /// the static cap and by leaving at least one item for each later round.
    pub fn selection_limit(&self) -> Option<usize> {
        let remaining_rounds = self.remaining_rounds()?;
        let remaining_items = self.remaining_item_count();
        let limit = match remaining_rounds {
            0 => 0,
            1 => remaining_items,
            _ => {
                let feasible = remaining_items.saturating_sub(remaining_rounds - 1);
                self.static_round_cap().unwrap_or(0).min(feasible)
            }
        };
        Some(limit)
    }

    fn ensure_open(&self) -> Result<(), AllocationError> {
        if self.complete {
            return Err(AllocationError::SessionClosed);
        }
        if let Some(InFlight { round, .. }) = self.in_flight {
            return Err(AllocationError::RoundInFlight { round });
        }
        Ok(())
    }

    pub fn set_target_round_count(&mut self, n: usize) -> Result<(), AllocationError> {
        self.ensure_open()?;
        if !self.rounds.is_empty() {
            return Err(AllocationError::RoundCountLocked {
                confirmed: self.rounds.len(),
            });
        }
        let max = self.total_item_count();
        if n == 0 || n > max {
            return Err(AllocationError::InvalidRoundCount { requested: n, max });
        }

        self.target_round_count = Some(n);
        self.pending_selection.clear();
        self.consumed_item_ids.clear();
        self.rounds.clear();
        self.retry_key = None;
        debug!(quotation = %self.quotation.id(), target = n, "partial order count set");
        Ok(())
    }

    pub fn toggle_item_selection(&mut self, id: ItemId) -> Result<Selection, AllocationError> {
        self.ensure_open()?;
        let target = self
            .target_round_count
            .ok_or(AllocationError::RoundCountNotSet)?;
        if !self.quotation.contains(id) {
            return Err(AllocationError::UnknownItem(id));
        }
        if self.consumed_item_ids.contains(&id) {
            return Err(AllocationError::ItemAlreadyAllocated(id));
        }

        if self.pending_selection.remove(&id) {
            debug!(item = %id, round = self.current_round(), "item deselected");
            return Ok(Selection::Removed);
        }

        if self.rounds.len() >= target {
            return Err(AllocationError::AllRoundsConfirmed);
        }
        let max = self.selection_limit().unwrap_or(0);
        if self.pending_selection.len() + 1 > max {
            return Err(AllocationError::SelectionLimitExceeded { max });
        }

        self.pending_selection.insert(id);
        debug!(item = %id, round = self.current_round(), "item selected");
        Ok(Selection::Added)
    }

    pub fn confirm_readiness(&self) -> Result<(), NotReady> {
        let target = self.target_round_count.ok_or(NotReady::RoundCountNotSet)?;
        if self.rounds.len() >= target {
            return Err(NotReady::AllRoundsConfirmed);
        }
        if self.in_flight.is_some() {
            return Err(NotReady::RoundInFlight);
        }
        if let Some(id) = self
            .pending_selection
            .intersection(&self.consumed_item_ids)
            .next()
        {
            return Err(NotReady::IncludesAllocatedItem(*id));
        }

        let selected = self.pending_selection.len();
        if selected == 0 {
            return Err(NotReady::EmptySelection);
        }
        if self.is_final_round() {
            let remaining = self.remaining_item_count();
            if selected != remaining {
                return Err(NotReady::FinalRoundIncomplete { selected, remaining });
            }
        } else {
            let max = self.selection_limit().unwrap_or(0);
            if selected > max {
                return Err(NotReady::OverLimit { selected, max });
            }
        }
        Ok(())
    }

    pub fn can_confirm_round(&self) -> bool {
        self.confirm_readiness().is_ok()
    }

    /// Freeze the pending selection and mark the round in flight.
    pub fn begin_round(&mut self) -> Result<RoundTicket, AllocationError> {
        self.ensure_open()?;
        self.confirm_readiness()
            .map_err(AllocationError::RoundNotReady)?;

        let selection = self.pending_selection.clone();
        let idempotency_key = match &self.retry_key {
            Some((previous, key)) if *previous == selection => *key,
            _ => Uuid::new_v4(),
        };
        self.retry_key = Some((selection.clone(), idempotency_key));

        let round = self.current_round();
        let items = self
            .quotation
            .items()
            .iter()
            .filter(|item| selection.contains(&item.id))
            .cloned()
            .collect();
        let attempt = Uuid::new_v4();
        self.in_flight = Some(InFlight { round, attempt });

        Ok(RoundTicket {
            round,
            attempt,
            selection,
            items,
            idempotency_key,
        })
    }

    fn check_ticket(&self, ticket: &RoundTicket) -> Result<(), AllocationError> {
        let expected = InFlight {
            round: ticket.round,
            attempt: ticket.attempt,
        };
        if self.in_flight == Some(expected) {
            Ok(())
        } else {
            Err(AllocationError::StaleRound { round: ticket.round })
        }
    }

    pub fn complete_round(
        &mut self,
        ticket: RoundTicket,
        record: PurchaseOrderRecord,
    ) -> Result<&PartialOrder, AllocationError> {
        self.check_ticket(&ticket)?;

        self.consumed_item_ids.extend(ticket.selection.iter().copied());
        self.pending_selection.clear();
        self.in_flight = None;
        self.retry_key = None;
        self.last_outcome_unknown = false;

        info!(
            quotation = %self.quotation.id(),
            round = ticket.round,
            purchase_order = %record.id,
            items = ticket.items.len(),
            "partial order created"
        );
        self.rounds.push(PartialOrder {
            round: ticket.round,
            items: ticket.items,
            purchase_order: record.id,
            client_po_number: record.client_po_number,
            confirmed_at: record.created_at.unwrap_or_else(Utc::now),
        });
        Ok(&self.rounds[self.rounds.len() - 1])
    }

    /// Release an in-flight round without recording it. Selection and history are untouched.
    pub fn abort_round(&mut self, ticket: RoundTicket, outcome_unknown: bool) -> Result<(), AllocationError> {
        self.check_ticket(&ticket)?;
        self.in_flight = None;
        self.last_outcome_unknown = outcome_unknown;
        Ok(())
    }

    /// Clear a round whose persistence call was abandoned. The server may still
    /// have created the order, so the outcome is flagged as unknown.
    pub fn cancel_in_flight(&mut self) -> Option<usize> {
        let in_flight = self.in_flight.take()?;
        self.last_outcome_unknown = true;
        Some(in_flight.round)
    }

    pub fn finish_session(&mut self) -> Result<Vec<PartialOrder>, AllocationError> {
        self.ensure_open()?;

        let mut unmet = Vec::new();
        match self.target_round_count {
            None => unmet.push(UnmetCondition::RoundCountNotSet),
            Some(target) if self.rounds.len() != target => {
                unmet.push(UnmetCondition::RoundsOutstanding {
                    confirmed: self.rounds.len(),
                    target,
                });
            }
            Some(_) => {}
        }
        let total = self.total_item_count();
        if self.consumed_item_ids.len() != total {
            unmet.push(UnmetCondition::ItemsUnallocated {
                allocated: self.consumed_item_ids.len(),
                total,
            });
        }
        if !unmet.is_empty() {
            return Err(AllocationError::SessionIncomplete { unmet });
        }

        self.complete = true;
        info!(
            quotation = %self.quotation.id(),
            rounds = self.rounds.len(),
            "partial order allocation finished"
        );
        Ok(self.rounds.clone())
    }
}
