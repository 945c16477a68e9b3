//! `TransactWriteItems` / `TransactGetItems`: all-or-nothing multi-item
//! operations, built on the same [`crate::storage`] primitives the plain
//! item-CRUD handlers in [`crate::provider`] use.
//!
//! Writes lock every target row up front, in a fixed `(table_name, key)`
//! order, before evaluating a single condition. This avoids the deadlocks
//! that locking in request order would risk when two concurrent
//! transactions name the same items in different orders.

use std::collections::HashMap;

use pretender_dynamodb_model::AttributeValue;
use pretender_dynamodb_model::error::{CancellationReason, DynamoDBError};
use pretender_dynamodb_model::input::{TransactGetItemsInput, TransactWriteItemsInput};
use pretender_dynamodb_model::output::{ItemResponse, TransactGetItemsOutput, TransactWriteItemsOutput};

use crate::error::{expression_error_to_dynamodb, storage_error_to_dynamodb};
use crate::expression::{EvalContext, parse_condition, parse_projection, parse_update};
use crate::provider::{MAX_ITEM_SIZE_BYTES, PretenderDynamoDB, evaluate_condition};
use crate::storage::{self, PrimaryKey, calculate_item_size};

/// One normalized write-transaction entry, after resolving which of
/// `Put`/`Update`/`Delete`/`ConditionCheck` was populated.
enum Action<'a> {
    Put {
        item: &'a HashMap<String, AttributeValue>,
        condition: &'a Option<String>,
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
    },
    Update {
        key: &'a HashMap<String, AttributeValue>,
        update_expression: &'a str,
        condition: &'a Option<String>,
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
    },
    Delete {
        key: &'a HashMap<String, AttributeValue>,
        condition: &'a Option<String>,
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
    },
    ConditionCheck {
        key: &'a HashMap<String, AttributeValue>,
        condition: &'a str,
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
    },
}

fn resolve_action(
    item: &pretender_dynamodb_model::input::TransactWriteItem,
) -> Result<(String, Action<'_>), DynamoDBError> {
    let populated = [
        item.put.is_some(),
        item.update.is_some(),
        item.delete.is_some(),
        item.condition_check.is_some(),
    ]
    .into_iter()
    .filter(|p| *p)
    .count();
    if populated != 1 {
        return Err(DynamoDBError::validation(
            "TransactItems entry must populate exactly one of Put, Update, Delete, ConditionCheck",
        ));
    }

    if let Some(put) = &item.put {
        return Ok((
            put.table_name.clone(),
            Action::Put {
                item: &put.item,
                condition: &put.condition_expression,
                names: &put.expression_attribute_names,
                values: &put.expression_attribute_values,
            },
        ));
    }
    if let Some(update) = &item.update {
        return Ok((
            update.table_name.clone(),
            Action::Update {
                key: &update.key,
                update_expression: &update.update_expression,
                condition: &update.condition_expression,
                names: &update.expression_attribute_names,
                values: &update.expression_attribute_values,
            },
        ));
    }
    if let Some(delete) = &item.delete {
        return Ok((
            delete.table_name.clone(),
            Action::Delete {
                key: &delete.key,
                condition: &delete.condition_expression,
                names: &delete.expression_attribute_names,
                values: &delete.expression_attribute_values,
            },
        ));
    }
    let check = item.condition_check.as_ref().expect("checked above");
    Ok((
        check.table_name.clone(),
        Action::ConditionCheck {
            key: &check.key,
            condition: &check.condition_expression,
            names: &check.expression_attribute_names,
            values: &check.expression_attribute_values,
        },
    ))
}

fn action_key<'a>(
    action: &Action<'a>,
) -> Option<&'a HashMap<String, AttributeValue>> {
    match action {
        Action::Put { item, .. } => Some(item),
        Action::Update { key, .. } | Action::Delete { key, .. } | Action::ConditionCheck { key, .. } => {
            Some(key)
        }
    }
}

/// A canonical byte encoding of a primary key, used only to order lock
/// acquisition deterministically; unrelated to the storage layer's own key
/// encoding.
fn lock_sort_bytes(pk: &PrimaryKey) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(&pk.partition_key).unwrap_or_default();
    if let Some(sort) = &pk.sort_key {
        bytes.extend(serde_json::to_vec(sort).unwrap_or_default());
    }
    bytes
}

impl PretenderDynamoDB {
    /// Handle `TransactWriteItems`.
    pub async fn handle_transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, DynamoDBError> {
        if input.transact_items.is_empty() || input.transact_items.len() > 100 {
            return Err(DynamoDBError::validation(
                "TransactItems must contain between 1 and 100 entries",
            ));
        }

        let mut resolved = Vec::with_capacity(input.transact_items.len());
        for entry in &input.transact_items {
            let (table_name, action) = resolve_action(entry)?;
            let table = self.state.require_table(&table_name).await?;
            let raw_key = action_key(&action).ok_or_else(|| {
                DynamoDBError::validation("TransactItems entry is missing a primary key")
            })?;
            let pk = storage::extract_primary_key(&table.key_schema, raw_key)
                .map_err(storage_error_to_dynamodb)?;
            resolved.push((table_name, table, pk, action));
        }

        // Reject a transaction that names the same item more than once, the
        // same way BatchWriteItem does.
        let mut seen = std::collections::HashSet::new();
        for (table_name, _, pk, _) in &resolved {
            if !seen.insert((table_name.clone(), lock_sort_bytes(pk))) {
                return Err(DynamoDBError::validation(
                    "Transaction request cannot include multiple operations on one item",
                ));
            }
        }

        let mut lock_order: Vec<usize> = (0..resolved.len()).collect();
        lock_order.sort_by(|&a, &b| {
            let (ta, _, ka, _) = &resolved[a];
            let (tb, _, kb, _) = &resolved[b];
            (ta, lock_sort_bytes(ka)).cmp(&(tb, lock_sort_bytes(kb)))
        });

        let mut tx = self
            .state
            .pool()
            .begin()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let mut existing: Vec<Option<storage::Item>> = vec![None; resolved.len()];
        for &idx in &lock_order {
            let (table_name, _, pk, _) = &resolved[idx];
            existing[idx] = storage::lock_item(&mut tx, table_name, pk)
                .await
                .map_err(storage_error_to_dynamodb)?;
        }

        // Evaluate every condition/applicability check before any write is
        // applied; on the first failure abort with a per-item reason list.
        let mut new_items: Vec<Option<storage::Item>> = vec![None; resolved.len()];
        let mut reasons = vec![CancellationReason::None; resolved.len()];
        let mut failure = false;

        for (idx, (_, _, _, action)) in resolved.iter().enumerate() {
            let result = check_action(action, existing[idx].as_ref());
            match result {
                Ok(computed) => new_items[idx] = computed,
                Err(reason) => {
                    reasons[idx] = reason;
                    failure = true;
                }
            }
        }

        if failure {
            return Err(DynamoDBError::transaction_canceled(reasons));
        }

        for idx in 0..resolved.len() {
            let (table_name, table, pk, action) = &resolved[idx];
            match action {
                Action::ConditionCheck { .. } => {}
                Action::Put { .. } => {
                    let item = new_items[idx].as_ref().expect("computed above");
                    storage::write_item(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        item,
                        table.ttl_attribute_name.as_deref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    storage::maintain_gsi_projections(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        &table.attribute_definitions,
                        &table.gsi_definitions,
                        pk,
                        Some(item),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    crate::streams::record_mutation(
                        &mut tx,
                        table,
                        existing[idx].as_ref(),
                        Some(item),
                        self.clock.as_ref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                }
                Action::Update { .. } => {
                    let item = new_items[idx].as_ref().expect("computed above");
                    storage::write_item(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        item,
                        table.ttl_attribute_name.as_deref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    storage::maintain_gsi_projections(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        &table.attribute_definitions,
                        &table.gsi_definitions,
                        pk,
                        Some(item),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    crate::streams::record_mutation(
                        &mut tx,
                        table,
                        existing[idx].as_ref(),
                        Some(item),
                        self.clock.as_ref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                }
                Action::Delete { .. } => {
                    if existing[idx].is_none() {
                        continue;
                    }
                    storage::delete_item(&mut tx, table_name, pk)
                        .await
                        .map_err(storage_error_to_dynamodb)?;
                    storage::maintain_gsi_projections(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        &table.attribute_definitions,
                        &table.gsi_definitions,
                        pk,
                        None,
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    crate::streams::record_mutation(
                        &mut tx,
                        table,
                        existing[idx].as_ref(),
                        None,
                        self.clock.as_ref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        Ok(TransactWriteItemsOutput {
            consumed_capacity: Vec::new(),
            item_collection_metrics: HashMap::new(),
        })
    }

    /// Handle `TransactGetItems`: a consistent snapshot read of up to 100
    /// items, in request order, with no conditions.
    pub async fn handle_transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> Result<TransactGetItemsOutput, DynamoDBError> {
        if input.transact_items.is_empty() || input.transact_items.len() > 100 {
            return Err(DynamoDBError::validation(
                "TransactItems must contain between 1 and 100 entries",
            ));
        }

        let mut tx = self
            .state
            .pool()
            .begin()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let mut responses = Vec::with_capacity(input.transact_items.len());
        for entry in &input.transact_items {
            let table = self.state.require_table(&entry.table_name).await?;
            let pk = storage::extract_primary_key(&table.key_schema, &entry.key)
                .map_err(storage_error_to_dynamodb)?;
            let item = storage::get_item(&mut tx, &entry.table_name, &pk)
                .await
                .map_err(storage_error_to_dynamodb)?;

            let item = match item {
                Some(item) => {
                    let item = if let Some(ref proj) = entry.projection_expression {
                        let paths = parse_projection(proj).map_err(expression_error_to_dynamodb)?;
                        let ctx = EvalContext {
                            item: &item,
                            names: &entry.expression_attribute_names,
                            values: &HashMap::new(),
                        };
                        ctx.apply_projection(&paths)
                    } else {
                        item
                    };
                    Some(item)
                }
                None => None,
            };
            responses.push(ItemResponse { item });
        }

        tx.commit()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        Ok(TransactGetItemsOutput {
            responses,
            consumed_capacity: Vec::new(),
        })
    }
}

/// Evaluate one action's condition/update against the row already locked
/// under `existing`, without touching storage. Returns the computed new item
/// image for `Put`/`Update` (`None` for `Delete`/`ConditionCheck`), or the
/// cancellation reason this item is responsible for.
fn check_action(
    action: &Action<'_>,
    existing: Option<&storage::Item>,
) -> Result<Option<storage::Item>, CancellationReason> {
    match action {
        Action::Put {
            item,
            condition,
            names,
            values,
        } => {
            if let Some(cond) = condition {
                evaluate_condition(cond, existing, names, values)
                    .map_err(|_| CancellationReason::ConditionalCheckFailed)?;
            }
            if calculate_item_size(item) > MAX_ITEM_SIZE_BYTES {
                return Err(CancellationReason::ValidationError);
            }
            Ok(Some((*item).clone()))
        }
        Action::Update {
            key,
            update_expression,
            condition,
            names,
            values,
        } => {
            if let Some(cond) = condition {
                evaluate_condition(cond, existing, names, values)
                    .map_err(|_| CancellationReason::ConditionalCheckFailed)?;
            }
            let base = existing.cloned().unwrap_or_else(|| (*key).clone());
            let parsed =
                parse_update(update_expression).map_err(|_| CancellationReason::ValidationError)?;
            let ctx = EvalContext {
                item: &base,
                names,
                values,
            };
            let updated = ctx
                .apply_update(&parsed)
                .map_err(|_| CancellationReason::ValidationError)?;
            if calculate_item_size(&updated) > MAX_ITEM_SIZE_BYTES {
                return Err(CancellationReason::ValidationError);
            }
            Ok(Some(updated))
        }
        Action::Delete {
            condition,
            names,
            values,
            ..
        } => {
            if let Some(cond) = condition {
                evaluate_condition(cond, existing, names, values)
                    .map_err(|_| CancellationReason::ConditionalCheckFailed)?;
            }
            Ok(None)
        }
        Action::ConditionCheck {
            condition,
            names,
            values,
            ..
        } => {
            let parsed = parse_condition(condition).map_err(|_| CancellationReason::ValidationError)?;
            let empty = HashMap::new();
            let item_ref = existing.unwrap_or(&empty);
            let ctx = EvalContext {
                item: item_ref,
                names,
                values,
            };
            let ok = ctx
                .evaluate(&parsed)
                .map_err(|_| CancellationReason::ValidationError)?;
            if ok {
                Ok(None)
            } else {
                Err(CancellationReason::ConditionalCheckFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_reject_empty_transact_items() {
        let input = TransactWriteItemsInput {
            transact_items: vec![],
            ..Default::default()
        };
        assert!(input.transact_items.is_empty());
    }
}
