//! Broker Entity Types
//!
//! Positions, working orders and account balances as reported by the
//! broker's user-data stream. Every field is optional because the broker
//! sends partial records on `Updated` events; fields this crate does not
//! model are kept verbatim in `extra` so nothing from the wire is lost.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broker-assigned numeric identifier.
pub type EntityId = i64;

// =============================================================================
// Position
// =============================================================================

/// Net position in one contract for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Position id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Owning account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<EntityId>,
    /// Contract id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<EntityId>,
    /// Signed net quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_pos: Option<i64>,
    /// Average entry price of the net position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_price: Option<Decimal>,
    /// Archived positions are closed and never part of the live set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    /// Wire fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Position {
    /// Whether the record carries an `id` or an `(accountId, contractId)` pair.
    #[must_use]
    pub const fn has_identity(&self) -> bool {
        self.id.is_some() || (self.account_id.is_some() && self.contract_id.is_some())
    }

    /// Whether `other` refers to the same position.
    ///
    /// Equal `id` wins; otherwise the `(accountId, contractId)` pair decides.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.id, other.id)
            && a == b
        {
            return true;
        }
        match (self.account_id, self.contract_id, other.account_id, other.contract_id) {
            (Some(a1), Some(c1), Some(a2), Some(c2)) => a1 == a2 && c1 == c2,
            _ => false,
        }
    }

    /// Overwrite every field present in `update`.
    pub fn merge_from(&mut self, update: Self) {
        merge_opt(&mut self.id, update.id);
        merge_opt(&mut self.account_id, update.account_id);
        merge_opt(&mut self.contract_id, update.contract_id);
        merge_opt(&mut self.net_pos, update.net_pos);
        merge_opt(&mut self.net_price, update.net_price);
        merge_opt(&mut self.archived, update.archived);
        self.extra.extend(update.extra);
    }

    /// Whether the position is archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived.unwrap_or(false)
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting at the exchange.
    Working,
    /// Submitted, not yet acknowledged.
    PendingNew,
    /// Modification in flight.
    PendingReplace,
    /// Cancel in flight.
    PendingCancel,
    /// Held by the broker.
    Suspended,
    /// Completely filled.
    Filled,
    /// Cancelled by user or broker.
    #[serde(alias = "Cancelled")]
    Canceled,
    /// Rejected by broker or exchange.
    Rejected,
    /// Expired at end of its time-in-force.
    Expired,
    /// Lifecycle finished.
    Completed,
    /// Any status this crate does not know.
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Terminal orders are removed from the live set.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired | Self::Completed
        )
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Working => "Working",
            Self::PendingNew => "PendingNew",
            Self::PendingReplace => "PendingReplace",
            Self::PendingCancel => "PendingCancel",
            Self::Suspended => "Suspended",
            Self::Filled => "Filled",
            Self::Canceled => "Canceled",
            Self::Rejected => "Rejected",
            Self::Expired => "Expired",
            Self::Completed => "Completed",
            Self::Unknown => "Unknown",
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
    /// Unrecognized side.
    #[serde(other)]
    Unknown,
}

/// A broker order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Owning account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<EntityId>,
    /// Contract id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<EntityId>,
    /// Buy or sell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OrderAction>,
    /// Current status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ord_status: Option<OrderStatus>,
    /// Status under its older field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    /// Limit or stop price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Last change time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Archived orders are never part of the live set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    /// Wire fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// Status, preferring `ordStatus` over the legacy field.
    #[must_use]
    pub const fn effective_status(&self) -> Option<OrderStatus> {
        match self.ord_status {
            Some(status) => Some(status),
            None => self.status,
        }
    }

    /// Overwrite every field present in `update`.
    pub fn merge_from(&mut self, update: Self) {
        merge_opt(&mut self.id, update.id);
        merge_opt(&mut self.account_id, update.account_id);
        merge_opt(&mut self.contract_id, update.contract_id);
        merge_opt(&mut self.action, update.action);
        merge_opt(&mut self.ord_status, update.ord_status);
        merge_opt(&mut self.status, update.status);
        merge_opt(&mut self.price, update.price);
        merge_opt(&mut self.timestamp, update.timestamp);
        merge_opt(&mut self.archived, update.archived);
        self.extra.extend(update.extra);
    }

    /// Whether the order belongs in the live set.
    #[must_use]
    pub fn is_live(&self) -> bool {
        if self.archived.unwrap_or(false) {
            return false;
        }
        !self.effective_status().is_some_and(OrderStatus::is_terminal)
    }
}

// =============================================================================
// Account Balance
// =============================================================================

/// Cash balance and account details keyed by account id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    /// Account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<EntityId>,
    /// Cash balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// Realized profit and loss for the session.
    #[serde(default, rename = "realizedPnL", skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
    /// Realized profit and loss for the week.
    #[serde(
        default,
        rename = "weekRealizedPnL",
        skip_serializing_if = "Option::is_none"
    )]
    pub week_realized_pnl: Option<Decimal>,
    /// Account display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Archived accounts are never part of the live set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    /// Wire fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountBalance {
    /// Identity key: `accountId`, falling back to the entity `id`.
    #[must_use]
    pub fn key(&self) -> Option<EntityId> {
        self.account_id
            .or_else(|| self.extra.get("id").and_then(Value::as_i64))
    }

    /// Apply a cash balance update: only the three balance figures move.
    pub fn merge_cash(&mut self, update: &Self) {
        merge_opt(&mut self.amount, update.amount);
        merge_opt(&mut self.realized_pnl, update.realized_pnl);
        merge_opt(&mut self.week_realized_pnl, update.week_realized_pnl);
    }

    /// Overwrite every field present in `update`.
    pub fn merge_from(&mut self, update: Self) {
        merge_opt(&mut self.account_id, update.account_id);
        merge_opt(&mut self.amount, update.amount);
        merge_opt(&mut self.realized_pnl, update.realized_pnl);
        merge_opt(&mut self.week_realized_pnl, update.week_realized_pnl);
        merge_opt(&mut self.name, update.name);
        merge_opt(&mut self.archived, update.archived);
        self.extra.extend(update.extra);
    }

    /// Whether the account is archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived.unwrap_or(false)
    }
}

fn merge_opt<T>(slot: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *slot = update;
    }
}

// =============================================================================
// Merged Snapshot
// =============================================================================

/// Positions, orders and balances from one or more connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedSnapshot {
    /// Live positions.
    pub positions: Vec<Position>,
    /// Live orders.
    pub orders: Vec<Order>,
    /// Account balances.
    pub accounts: Vec<AccountBalance>,
}

impl MergedSnapshot {
    /// Append another snapshot's entries.
    pub fn extend(&mut self, other: Self) {
        self.positions.extend(other.positions);
        self.orders.extend(other.orders);
        self.accounts.extend(other.accounts);
    }

    /// True when all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.orders.is_empty() && self.accounts.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn position_deserializes_wire_fields_and_keeps_extras() {
        let position: Position = serde_json::from_value(json!({
            "id": 1,
            "accountId": 100,
            "contractId": 55,
            "netPos": 2,
            "netPrice": 21000.25,
            "timestamp": "2024-03-01T14:30:00Z",
            "tradeDate": {"year": 2024, "month": 3, "day": 1}
        }))
        .unwrap();

        assert_eq!(position.id, Some(1));
        assert_eq!(position.net_pos, Some(2));
        assert_eq!(position.net_price, Some(Decimal::new(2_100_025, 2)));
        assert!(position.extra.contains_key("timestamp"));
        assert!(position.extra.contains_key("tradeDate"));
    }

    #[test]
    fn position_identity_falls_back_to_account_and_contract() {
        let a = Position {
            account_id: Some(100),
            contract_id: Some(55),
            ..Position::default()
        };
        let b = Position {
            id: Some(9),
            account_id: Some(100),
            contract_id: Some(55),
            ..Position::default()
        };
        let c = Position {
            id: Some(9),
            account_id: Some(100),
            contract_id: Some(56),
            ..Position::default()
        };
        assert!(a.same_identity(&b));
        assert!(b.same_identity(&c));
        assert!(!a.same_identity(&c));
        assert!(!Position::default().same_identity(&Position::default()));
    }

    #[test]
    fn position_merge_keeps_absent_fields() {
        let mut position = Position {
            id: Some(1),
            account_id: Some(100),
            contract_id: Some(55),
            net_pos: Some(2),
            net_price: Some(Decimal::from(21_000)),
            ..Position::default()
        };
        position.merge_from(Position {
            id: Some(1),
            net_pos: Some(3),
            ..Position::default()
        });
        assert_eq!(position.net_pos, Some(3));
        assert_eq!(position.net_price, Some(Decimal::from(21_000)));
        assert_eq!(position.contract_id, Some(55));
    }

    #[test_case("Working", OrderStatus::Working, false)]
    #[test_case("PendingNew", OrderStatus::PendingNew, false)]
    #[test_case("Filled", OrderStatus::Filled, true)]
    #[test_case("Canceled", OrderStatus::Canceled, true)]
    #[test_case("Cancelled", OrderStatus::Canceled, true)]
    #[test_case("Rejected", OrderStatus::Rejected, true)]
    #[test_case("Expired", OrderStatus::Expired, true)]
    #[test_case("Completed", OrderStatus::Completed, true)]
    #[test_case("SomethingNew", OrderStatus::Unknown, false)]
    fn order_status_parsing(wire: &str, expected: OrderStatus, terminal: bool) {
        let status: OrderStatus = serde_json::from_value(json!(wire)).unwrap();
        assert_eq!(status, expected);
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn order_effective_status_prefers_ord_status() {
        let order = Order {
            ord_status: Some(OrderStatus::Working),
            status: Some(OrderStatus::Filled),
            ..Order::default()
        };
        assert_eq!(order.effective_status(), Some(OrderStatus::Working));
        assert!(order.is_live());

        let legacy = Order {
            status: Some(OrderStatus::Filled),
            ..Order::default()
        };
        assert!(!legacy.is_live());
    }

    #[test]
    fn archived_order_is_not_live() {
        let order = Order {
            ord_status: Some(OrderStatus::Working),
            archived: Some(true),
            ..Order::default()
        };
        assert!(!order.is_live());
    }

    #[test]
    fn order_deserializes_timestamp_and_action() {
        let order: Order = serde_json::from_value(json!({
            "id": 7,
            "accountId": 100,
            "action": "Sell",
            "ordStatus": "Working",
            "timestamp": "2024-03-01T14:30:00.123Z"
        }))
        .unwrap();
        assert_eq!(order.action, Some(OrderAction::Sell));
        assert!(order.timestamp.is_some());
    }

    #[test]
    fn account_balance_uses_pnl_wire_names() {
        let balance: AccountBalance = serde_json::from_value(json!({
            "accountId": 100,
            "amount": 50000,
            "realizedPnL": 125.5,
            "weekRealizedPnL": -40
        }))
        .unwrap();
        assert_eq!(balance.realized_pnl, Some(Decimal::new(1255, 1)));
        assert_eq!(balance.week_realized_pnl, Some(Decimal::from(-40)));

        let out = serde_json::to_value(&balance).unwrap();
        assert!(out.get("realizedPnL").is_some());
        assert!(out.get("weekRealizedPnL").is_some());
    }

    #[test]
    fn account_key_falls_back_to_entity_id() {
        let account: AccountBalance =
            serde_json::from_value(json!({"id": 321, "name": "DEMO321"})).unwrap();
        assert_eq!(account.key(), Some(321));
    }

    #[test]
    fn merge_cash_touches_only_balance_figures() {
        let mut account = AccountBalance {
            account_id: Some(100),
            amount: Some(Decimal::from(1000)),
            name: Some("DEMO".to_string()),
            ..AccountBalance::default()
        };
        let update = AccountBalance {
            account_id: Some(100),
            amount: Some(Decimal::from(1200)),
            name: Some("ignored".to_string()),
            ..AccountBalance::default()
        };
        account.merge_cash(&update);
        assert_eq!(account.amount, Some(Decimal::from(1200)));
        assert_eq!(account.name.as_deref(), Some("DEMO"));
    }

    #[test]
    fn merged_snapshot_extend_concatenates() {
        let mut merged = MergedSnapshot::default();
        assert!(merged.is_empty());
        merged.extend(MergedSnapshot {
            positions: vec![Position::default(), Position::default()],
            ..MergedSnapshot::default()
        });
        merged.extend(MergedSnapshot {
            positions: vec![Position::default()],
            ..MergedSnapshot::default()
        });
        assert_eq!(merged.positions.len(), 3);
    }
}
