//! Entity Reconciler
//!
//! Turns a stream of `Created`/`Updated`/`Deleted` events into consistent
//! per-connection sets of live positions, orders and account balances.
//!
//! # Rules
//!
//! - Positions match on `id`, then on `(accountId, contractId)`; orders match
//!   on `id`; balances match on `accountId`.
//! - `Created`/`Updated` field-merge onto the matching record or insert a new
//!   one, then archived positions and archived or terminal orders are dropped.
//! - `cashBalance` events only move `amount`, `realizedPnL` and
//!   `weekRealizedPnL`.
//! - `Deleted` removes by identity.
//! - `marginSnapshot` and `auditUserAction` mutate nothing; they only ask
//!   subscribers to refresh.
//!
//! The reconciler is plain data. Callers wrap it in a lock and invoke their
//! update callback after `apply` returns, outside that lock.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::entities::{AccountBalance, EntityId, MergedSnapshot, Order, Position};

// =============================================================================
// Sync Events
// =============================================================================

/// Kind of entity carried by a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// Net position.
    Position,
    /// Order.
    Order,
    /// Account details.
    Account,
    /// Account cash balance.
    CashBalance,
    /// Margin snapshot (refresh only).
    MarginSnapshot,
    /// Audit record (refresh only).
    AuditUserAction,
}

impl EntityType {
    /// Parse the wire `entityType` value.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "position" => Some(Self::Position),
            "order" => Some(Self::Order),
            "account" => Some(Self::Account),
            "cashBalance" => Some(Self::CashBalance),
            "marginSnapshot" => Some(Self::MarginSnapshot),
            "auditUserAction" => Some(Self::AuditUserAction),
            _ => None,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Order => "order",
            Self::Account => "account",
            Self::CashBalance => "cashBalance",
            Self::MarginSnapshot => "marginSnapshot",
            Self::AuditUserAction => "auditUserAction",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// New entity.
    Created,
    /// Changed fields of an existing entity.
    Updated,
    /// Entity removed.
    Deleted,
}

impl EventType {
    /// Parse the wire `eventType` value.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Created" => Some(Self::Created),
            "Updated" => Some(Self::Updated),
            "Deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        }
    }
}

/// One entity change from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// Entity kind.
    pub entity_type: EntityType,
    /// Change kind.
    pub event_type: EventType,
    /// Raw entity object as received.
    pub entity: Map<String, Value>,
}

impl SyncEvent {
    /// Create an event.
    #[must_use]
    pub const fn new(
        entity_type: EntityType,
        event_type: EventType,
        entity: Map<String, Value>,
    ) -> Self {
        Self {
            entity_type,
            event_type,
            entity,
        }
    }

    /// Create a `Created` event, as produced for initial entity lists.
    #[must_use]
    pub const fn created(entity_type: EntityType, entity: Map<String, Value>) -> Self {
        Self::new(entity_type, EventType::Created, entity)
    }

    fn marks_removal(&self) -> bool {
        self.event_type == EventType::Deleted
            || self.entity.get("archived").and_then(Value::as_bool) == Some(true)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The set for this entity type was mutated.
    Changed(EntityType),
    /// Nothing matched (e.g. deleting an unknown id).
    Unchanged(EntityType),
    /// No mutation; subscribers should re-read.
    Refresh,
    /// The entity could not be interpreted and was skipped.
    Rejected {
        /// Entity kind.
        entity_type: EntityType,
        /// Why it was skipped.
        reason: String,
    },
}

impl ReconcileOutcome {
    /// Whether a set was mutated.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Live entity sets for one connection.
#[derive(Debug, Default, Clone)]
pub struct EntityReconciler {
    positions: Vec<Position>,
    orders: Vec<Order>,
    accounts: Vec<AccountBalance>,
}

impl EntityReconciler {
    /// Create an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, mutating at most one of the three sets.
    pub fn apply(&mut self, event: SyncEvent) -> ReconcileOutcome {
        let entity_type = event.entity_type;
        let result = match entity_type {
            EntityType::MarginSnapshot | EntityType::AuditUserAction => {
                return ReconcileOutcome::Refresh;
            }
            EntityType::Position => self.apply_position(event),
            EntityType::Order => self.apply_order(event),
            EntityType::CashBalance => self.apply_cash_balance(event),
            EntityType::Account => self.apply_account(event),
        };

        match result {
            Ok(true) => ReconcileOutcome::Changed(entity_type),
            Ok(false) => ReconcileOutcome::Unchanged(entity_type),
            Err(reason) => ReconcileOutcome::Rejected {
                entity_type,
                reason,
            },
        }
    }

    fn apply_position(&mut self, event: SyncEvent) -> Result<bool, String> {
        let deleted = event.event_type == EventType::Deleted;
        let position: Position = decode(event.entity)?;
        if !position.has_identity() {
            return Err("position without id or (accountId, contractId)".to_string());
        }

        if deleted {
            let before = self.positions.len();
            self.positions.retain(|p| !p.same_identity(&position));
            return Ok(self.positions.len() != before);
        }

        match self.position_index(&position) {
            Some(index) => self.positions[index].merge_from(position),
            None => self.positions.push(position),
        }
        self.positions.retain(|p| !p.is_archived());
        Ok(true)
    }

    fn position_index(&self, position: &Position) -> Option<usize> {
        position
            .id
            .and_then(|id| self.positions.iter().position(|p| p.id == Some(id)))
            .or_else(|| self.positions.iter().position(|p| p.same_identity(position)))
    }

    fn apply_order(&mut self, event: SyncEvent) -> Result<bool, String> {
        let deleted = event.event_type == EventType::Deleted;
        let order: Order = decode(event.entity)?;
        let id = order.id.ok_or_else(|| "order without id".to_string())?;

        if deleted {
            let before = self.orders.len();
            self.orders.retain(|o| o.id != Some(id));
            return Ok(self.orders.len() != before);
        }

        match self.orders.iter_mut().find(|o| o.id == Some(id)) {
            Some(existing) => existing.merge_from(order),
            None => self.orders.push(order),
        }
        self.orders.retain(Order::is_live);
        Ok(true)
    }

    fn apply_cash_balance(&mut self, event: SyncEvent) -> Result<bool, String> {
        let deleted = event.event_type == EventType::Deleted;
        let balance: AccountBalance = decode(event.entity)?;
        let account_id = balance
            .account_id
            .ok_or_else(|| "cashBalance without accountId".to_string())?;

        if deleted {
            return Ok(self.remove_account(account_id));
        }

        match self.account_mut(account_id) {
            Some(existing) => existing.merge_cash(&balance),
            None => self.accounts.push(AccountBalance {
                account_id: Some(account_id),
                amount: balance.amount,
                realized_pnl: balance.realized_pnl,
                week_realized_pnl: balance.week_realized_pnl,
                ..AccountBalance::default()
            }),
        }
        Ok(true)
    }

    fn apply_account(&mut self, event: SyncEvent) -> Result<bool, String> {
        let removal = event.marks_removal();
        let mut account: AccountBalance = decode(event.entity)?;
        let key = account
            .key()
            .ok_or_else(|| "account without accountId or id".to_string())?;

        if removal {
            return Ok(self.remove_account(key));
        }

        account.account_id = Some(key);
        match self.account_mut(key) {
            Some(existing) => existing.merge_from(account),
            None => self.accounts.push(account),
        }
        Ok(true)
    }

    fn account_mut(&mut self, account_id: EntityId) -> Option<&mut AccountBalance> {
        self.accounts
            .iter_mut()
            .find(|a| a.account_id == Some(account_id))
    }

    fn remove_account(&mut self, account_id: EntityId) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.account_id != Some(account_id));
        self.accounts.len() != before
    }

    /// Empty all three sets.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.orders.clear();
        self.accounts.clear();
    }

    /// Copy of all three sets.
    #[must_use]
    pub fn snapshot(&self) -> MergedSnapshot {
        MergedSnapshot {
            positions: self.positions.clone(),
            orders: self.orders.clone(),
            accounts: self.accounts.clone(),
        }
    }

    /// Live positions.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Live orders.
    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Account balances.
    #[must_use]
    pub fn accounts(&self) -> &[AccountBalance] {
        &self.accounts
    }

    /// True when all three sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.orders.is_empty() && self.accounts.is_empty()
    }
}

fn decode<T: serde::de::DeserializeOwned>(entity: Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(entity)).map_err(|e| e.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::domain::entities::OrderStatus;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn event(entity_type: EntityType, event_type: EventType, entity: Value) -> SyncEvent {
        SyncEvent::new(entity_type, event_type, object(entity))
    }

    #[test]
    fn position_created_then_archived() {
        let mut reconciler = EntityReconciler::new();

        let outcome = reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": 1, "accountId": 100, "contractId": 55, "netPos": 2, "netPrice": 21000}),
        ));
        assert_eq!(outcome, ReconcileOutcome::Changed(EntityType::Position));
        assert_eq!(reconciler.positions().len(), 1);
        assert_eq!(reconciler.positions()[0].net_pos, Some(2));
        assert_eq!(
            reconciler.positions()[0].net_price,
            Some(Decimal::from(21_000))
        );

        reconciler.apply(event(
            EntityType::Position,
            EventType::Updated,
            json!({"id": 1, "netPos": 0, "archived": true}),
        ));
        assert!(reconciler.positions().is_empty());
    }

    #[test]
    fn position_update_matches_on_account_and_contract() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"accountId": 100, "contractId": 55, "netPos": 1}),
        ));
        reconciler.apply(event(
            EntityType::Position,
            EventType::Updated,
            json!({"id": 4, "accountId": 100, "contractId": 55, "netPos": 3}),
        ));

        assert_eq!(reconciler.positions().len(), 1);
        assert_eq!(reconciler.positions()[0].id, Some(4));
        assert_eq!(reconciler.positions()[0].net_pos, Some(3));
    }

    #[test]
    fn position_id_match_takes_precedence() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": 1, "accountId": 100, "contractId": 55, "netPos": 1}),
        ));
        reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": 2, "accountId": 100, "contractId": 56, "netPos": 1}),
        ));
        reconciler.apply(event(
            EntityType::Position,
            EventType::Updated,
            json!({"id": 2, "accountId": 100, "contractId": 55, "netPos": 9}),
        ));

        let by_id: Vec<_> = reconciler
            .positions()
            .iter()
            .map(|p| (p.id, p.net_pos))
            .collect();
        assert_eq!(by_id, vec![(Some(1), Some(1)), (Some(2), Some(9))]);
    }

    #[test]
    fn position_deleted_removes_by_identity() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": 1, "accountId": 100, "contractId": 55, "netPos": 1}),
        ));
        let outcome = reconciler.apply(event(
            EntityType::Position,
            EventType::Deleted,
            json!({"id": 1}),
        ));
        assert_eq!(outcome, ReconcileOutcome::Changed(EntityType::Position));
        assert!(reconciler.positions().is_empty());

        let outcome = reconciler.apply(event(
            EntityType::Position,
            EventType::Deleted,
            json!({"id": 1}),
        ));
        assert_eq!(outcome, ReconcileOutcome::Unchanged(EntityType::Position));
    }

    #[test]
    fn filled_order_removed_after_working_update() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Order,
            EventType::Created,
            json!({"id": 77, "accountId": 100, "ordStatus": "PendingNew"}),
        ));
        reconciler.apply(event(
            EntityType::Order,
            EventType::Updated,
            json!({"id": 77, "ordStatus": "Working", "price": 21001.5}),
        ));
        assert_eq!(reconciler.orders().len(), 1);
        assert_eq!(reconciler.orders()[0].account_id, Some(100));

        reconciler.apply(event(
            EntityType::Order,
            EventType::Updated,
            json!({"id": 77, "ordStatus": "Filled"}),
        ));
        assert!(reconciler.orders().is_empty());
    }

    #[test]
    fn legacy_status_field_is_honoured() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Order,
            EventType::Created,
            json!({"id": 5, "status": "Cancelled"}),
        ));
        assert!(reconciler.orders().is_empty());
    }

    #[test]
    fn order_without_id_is_rejected() {
        let mut reconciler = EntityReconciler::new();
        let outcome = reconciler.apply(event(
            EntityType::Order,
            EventType::Created,
            json!({"ordStatus": "Working"}),
        ));
        assert!(matches!(outcome, ReconcileOutcome::Rejected { .. }));
        assert!(reconciler.is_empty());
    }

    #[test]
    fn position_without_identity_is_rejected() {
        let mut reconciler = EntityReconciler::new();
        for _ in 0..2 {
            let outcome = reconciler.apply(event(
                EntityType::Position,
                EventType::Updated,
                json!({"accountId": 100, "netPos": 1}),
            ));
            assert!(matches!(
                outcome,
                ReconcileOutcome::Rejected {
                    entity_type: EntityType::Position,
                    ..
                }
            ));
        }
        assert!(reconciler.positions().is_empty());
    }

    #[test]
    fn malformed_entity_is_rejected() {
        let mut reconciler = EntityReconciler::new();
        let outcome = reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": "not-a-number"}),
        ));
        assert!(matches!(
            outcome,
            ReconcileOutcome::Rejected {
                entity_type: EntityType::Position,
                ..
            }
        ));
    }

    #[test]
    fn cash_balance_merges_only_balance_fields() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Account,
            EventType::Created,
            json!({"id": 100, "name": "DEMO100", "active": true}),
        ));
        reconciler.apply(event(
            EntityType::CashBalance,
            EventType::Updated,
            json!({"id": 9001, "accountId": 100, "amount": 50000, "realizedPnL": 12.5,
                   "weekRealizedPnL": 40, "currencyId": 1}),
        ));

        assert_eq!(reconciler.accounts().len(), 1);
        let account = &reconciler.accounts()[0];
        assert_eq!(account.account_id, Some(100));
        assert_eq!(account.name.as_deref(), Some("DEMO100"));
        assert_eq!(account.amount, Some(Decimal::from(50_000)));
        assert_eq!(account.realized_pnl, Some(Decimal::new(125, 1)));
        assert!(!account.extra.contains_key("currencyId"));
    }

    #[test]
    fn cash_balance_inserts_unknown_account() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::CashBalance,
            EventType::Created,
            json!({"accountId": 200, "amount": 1000}),
        ));
        assert_eq!(reconciler.accounts().len(), 1);
        assert_eq!(reconciler.accounts()[0].account_id, Some(200));
    }

    #[test]
    fn archived_account_removed() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Account,
            EventType::Created,
            json!({"id": 100, "name": "DEMO100"}),
        ));
        reconciler.apply(event(
            EntityType::Account,
            EventType::Updated,
            json!({"id": 100, "archived": true}),
        ));
        assert!(reconciler.accounts().is_empty());
    }

    #[test]
    fn refresh_entities_do_not_mutate() {
        let mut reconciler = EntityReconciler::new();
        for entity_type in [EntityType::MarginSnapshot, EntityType::AuditUserAction] {
            let outcome = reconciler.apply(event(entity_type, EventType::Updated, json!({"id": 1})));
            assert_eq!(outcome, ReconcileOutcome::Refresh);
        }
        assert!(reconciler.is_empty());
    }

    #[test]
    fn clear_and_snapshot() {
        let mut reconciler = EntityReconciler::new();
        reconciler.apply(event(
            EntityType::Position,
            EventType::Created,
            json!({"id": 1, "accountId": 1, "contractId": 1, "netPos": 1}),
        ));
        reconciler.apply(event(
            EntityType::Order,
            EventType::Created,
            json!({"id": 2, "ordStatus": "Working"}),
        ));
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.orders.len(), 1);

        reconciler.clear();
        assert!(reconciler.is_empty());
        assert_eq!(snapshot.positions.len(), 1);
    }

    #[test]
    fn entity_type_wire_names() {
        for entity_type in [
            EntityType::Position,
            EntityType::Order,
            EntityType::Account,
            EntityType::CashBalance,
            EntityType::MarginSnapshot,
            EntityType::AuditUserAction,
        ] {
            assert_eq!(EntityType::from_wire(entity_type.as_str()), Some(entity_type));
        }
        assert_eq!(EntityType::from_wire("fill"), None);
        assert_eq!(EventType::from_wire("Deleted"), Some(EventType::Deleted));
        assert_eq!(EventType::from_wire("deleted"), None);
    }

    // =========================================================================
    // Property tests
    // =========================================================================

    const STATUSES: [&str; 6] = ["Working", "PendingNew", "Filled", "Canceled", "Rejected", "Expired"];

    fn order_event() -> impl Strategy<Value = SyncEvent> {
        (
            0i64..6,
            prop_oneof![
                Just(EventType::Created),
                Just(EventType::Updated),
                Just(EventType::Deleted)
            ],
            proptest::option::of(0usize..STATUSES.len()),
            proptest::option::of(any::<bool>()),
        )
            .prop_map(|(id, event_type, status, archived)| {
                let mut entity = json!({"id": id});
                if let Some(status) = status {
                    entity["ordStatus"] = json!(STATUSES[status]);
                }
                if let Some(archived) = archived {
                    entity["archived"] = json!(archived);
                }
                event(EntityType::Order, event_type, entity)
            })
    }

    #[derive(Default, Clone, Copy)]
    struct ModelOrder {
        status: Option<OrderStatus>,
        archived: Option<bool>,
    }

    proptest! {
        #[test]
        fn live_orders_are_unique_and_non_terminal(events in proptest::collection::vec(order_event(), 0..60)) {
            let mut reconciler = EntityReconciler::new();
            let mut model: HashMap<i64, ModelOrder> = HashMap::new();

            for event in events {
                let id = event.entity["id"].as_i64().unwrap();
                let status = event
                    .entity
                    .get("ordStatus")
                    .map(|v| serde_json::from_value::<OrderStatus>(v.clone()).unwrap());
                let archived = event.entity.get("archived").and_then(Value::as_bool);

                if event.event_type == EventType::Deleted {
                    model.remove(&id);
                } else {
                    let entry = model.entry(id).or_default();
                    if status.is_some() {
                        entry.status = status;
                    }
                    if archived.is_some() {
                        entry.archived = archived;
                    }
                    let live = !entry.archived.unwrap_or(false)
                        && !entry.status.is_some_and(OrderStatus::is_terminal);
                    if !live {
                        model.remove(&id);
                    }
                }

                reconciler.apply(event);
            }

            let mut ids: Vec<i64> = reconciler.orders().iter().filter_map(|o| o.id).collect();
            let total = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);

            for order in reconciler.orders() {
                prop_assert!(order.is_live());
            }

            let mut expected: Vec<i64> = model.keys().copied().collect();
            expected.sort_unstable();
            prop_assert_eq!(ids, expected);
        }
    }
}
