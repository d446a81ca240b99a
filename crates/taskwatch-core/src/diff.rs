//! Change detection between a fetched snapshot and the local ledger.
//!
//! Two independent signals come out of a comparison:
//!
//! - **New orders**: the snapshot's highest id exceeds the highest id ever
//!   announced. The whole snapshot is then reported, not only the ids above
//!   the previous maximum, so one notification carries everything currently
//!   listed.
//! - **Updated orders**: an order's points strictly exceed the recorded
//!   points for the same id. An unrecorded order counts as 0 points, so a
//!   fresh order with work already accrued is reported here as well.

use tracing::debug;

use crate::order::{OrderLedger, OrderSummary};

/// An order whose points increased since the last recorded observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PointsUpdate {
    pub order: OrderSummary,
    pub points_before: u64,
}

/// Outcome of comparing one snapshot against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    /// The full snapshot when a new highest id appeared, otherwise empty.
    pub new_orders: Vec<OrderSummary>,
    pub updated_orders: Vec<PointsUpdate>,
    /// Highest id in the snapshot.
    pub max_id: u64,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new_orders.is_empty() && self.updated_orders.is_empty()
    }

    pub fn has_new_orders(&self) -> bool {
        !self.new_orders.is_empty()
    }
}

/// Compare `fetched` against `previous` without modifying anything.
///
/// Returns `None` for an empty snapshot: nothing listed is not a change.
pub fn compute_diff(previous: &OrderLedger, fetched: &[OrderSummary]) -> Option<DiffResult> {
    let max_id = fetched.iter().map(|o| o.id).max()?;

    let new_orders = if max_id > previous.highest_id_seen {
        fetched.to_vec()
    } else {
        Vec::new()
    };

    let updated_orders: Vec<PointsUpdate> = fetched
        .iter()
        .filter_map(|order| {
            let points_before = previous.points_of(order.id);
            (order.points > points_before).then(|| PointsUpdate {
                order: order.clone(),
                points_before,
            })
        })
        .collect();

    debug!(
        max_id,
        highest_id_seen = previous.highest_id_seen,
        new = new_orders.len(),
        updated = updated_orders.len(),
        "computed diff"
    );

    Some(DiffResult {
        new_orders,
        updated_orders,
        max_id,
    })
}

impl OrderLedger {
    /// Fold a diff computed against this ledger back into it.
    ///
    /// Any points update rewrites every order of the snapshot, not just the
    /// changed ones. Returns whether the ledger changed.
    pub fn apply(&mut self, diff: &DiffResult, fetched: &[OrderSummary]) -> bool {
        let mut changed = false;
        if diff.has_new_orders() && diff.max_id > self.highest_id_seen {
            self.highest_id_seen = diff.max_id;
            changed = true;
        }
        if !diff.updated_orders.is_empty() {
            for order in fetched {
                self.orders.insert(order.id, order.clone());
            }
            changed = true;
        }
        changed
    }

    /// Compute the diff for `fetched` and apply it in one step.
    pub fn absorb(&mut self, fetched: &[OrderSummary]) -> Option<DiffResult> {
        let diff = compute_diff(self, fetched)?;
        self.apply(&diff, fetched);
        Some(diff)
    }
}
