//! Background TTL sweeper: periodically removes items whose TTL attribute
//! names an epoch in the past.
//!
//! This is a best-effort convenience matching real DynamoDB's behavior:
//! nothing stops an item from being read or written between the moment it
//! expires and the moment the sweep gets to it, and if the worker isn't
//! running expired items simply remain queryable until it next runs.

use std::sync::Arc;
use std::time::Duration;

use pretender_dynamodb_model::error::DynamoDBError;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::storage_error_to_dynamodb;
use crate::state::DynamoDBServiceState;
use crate::storage;

/// Spawns the periodic TTL sweep, honoring `shutdown` so an in-flight batch
/// finishes before exit.
pub fn spawn_ttl_sweeper(
    state: Arc<DynamoDBServiceState>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: i64,
    principal: String,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_all_tables(&state, clock.as_ref(), batch_size, &principal).await {
                        tracing::warn!(error = %e, "TTL sweep pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn sweep_all_tables(
    state: &DynamoDBServiceState,
    clock: &dyn Clock,
    batch_size: i64,
    principal: &str,
) -> Result<(), DynamoDBError> {
    let names = state.list_table_names().await?;
    for name in names {
        let Some(table) = state.get_table(&name).await? else {
            continue;
        };
        if !table.ttl_enabled {
            continue;
        }
        let Some(ttl_attr) = table.ttl_attribute_name.as_deref() else {
            continue;
        };

        let cutoff = clock.now().timestamp();
        let candidates = storage::select_expired(state.pool(), &table.name, cutoff, batch_size)
            .await
            .map_err(storage_error_to_dynamodb)?;

        for candidate in candidates {
            let Some(pk) = storage::extract_primary_key_lossy(&table.key_schema, &candidate) else {
                continue;
            };

            let mut tx = state
                .pool()
                .begin()
                .await
                .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

            // Re-check under lock: the item may have been updated (TTL
            // attribute cleared or pushed forward) since `select_expired` ran.
            let locked = storage::lock_item(&mut tx, &table.name, &pk)
                .await
                .map_err(storage_error_to_dynamodb)?;
            let Some(locked) = locked else {
                tx.commit()
                    .await
                    .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
                continue;
            };
            if !is_still_expired(&locked, ttl_attr, clock.now().timestamp()) {
                tx.commit()
                    .await
                    .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
                continue;
            }

            storage::delete_item(&mut tx, &table.name, &pk)
                .await
                .map_err(storage_error_to_dynamodb)?;
            storage::maintain_gsi_projections(
                &mut tx,
                &table.name,
                &table.key_schema,
                &table.attribute_definitions,
                &table.gsi_definitions,
                &pk,
                None,
            )
            .await
            .map_err(storage_error_to_dynamodb)?;
            crate::streams::record_ttl_expiry(&mut tx, &table, &locked, clock, principal)
                .await
                .map_err(storage_error_to_dynamodb)?;

            tx.commit()
                .await
                .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        }
    }
    Ok(())
}

fn is_still_expired(item: &storage::Item, ttl_attr: &str, now_epoch: i64) -> bool {
    use pretender_dynamodb_model::AttributeValue;
    match item.get(ttl_attr) {
        Some(AttributeValue::N(n)) => n.parse::<i64>().is_ok_and(|epoch| epoch <= now_epoch),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretender_dynamodb_model::AttributeValue;

    #[test]
    fn test_should_treat_non_numeric_ttl_as_not_expired() {
        let mut item = storage::Item::new();
        item.insert("expires".to_owned(), AttributeValue::S("soon".to_owned()));
        assert!(!is_still_expired(&item, "expires", 1_000));
    }

    #[test]
    fn test_should_treat_future_epoch_as_not_expired() {
        let mut item = storage::Item::new();
        item.insert("expires".to_owned(), AttributeValue::N("9999999999".to_owned()));
        assert!(!is_still_expired(&item, "expires", 1_000));
    }

    #[test]
    fn test_should_treat_past_epoch_as_expired() {
        let mut item = storage::Item::new();
        item.insert("expires".to_owned(), AttributeValue::N("1".to_owned()));
        assert!(is_still_expired(&item, "expires", 1_000));
    }
}
