//! DynamoDB provider implementing table management, item CRUD, Query/Scan,
//! and batch operations against the SQL-backed item store.
//!
//! `TransactWriteItems`/`TransactGetItems` live in [`crate::transact`] and the
//! Streams API lives in [`crate::streams`]; both are built on top of the same
//! [`crate::storage`] functions used here.

use std::collections::HashMap;
use std::sync::Arc;

use pretender_dynamodb_model::AttributeValue;
use pretender_dynamodb_model::error::DynamoDBError;
use pretender_dynamodb_model::input::{
    BatchGetItemInput, BatchWriteItemInput, CreateTableInput, DeleteItemInput, DeleteTableInput,
    DescribeTableInput, DescribeTimeToLiveInput, GetItemInput, ListTablesInput, PutItemInput,
    QueryInput, ScanInput, UpdateItemInput, UpdateTableInput, UpdateTimeToLiveInput,
};
use pretender_dynamodb_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, CreateTableOutput, DeleteItemOutput,
    DeleteTableOutput, DescribeTableOutput, DescribeTimeToLiveOutput, GetItemOutput,
    ListTablesOutput, PutItemOutput, QueryOutput, ScanOutput, UpdateItemOutput, UpdateTableOutput,
    UpdateTimeToLiveOutput,
};
use pretender_dynamodb_model::types::{
    AttributeDefinition, BillingMode, ReturnValue, TableStatus, TimeToLiveStatus,
};

use crate::clock::Clock;
use crate::config::DynamoDBConfig;
use crate::error::{expression_error_to_dynamodb, storage_error_to_dynamodb};
use crate::expression::{EvalContext, parse_condition, parse_projection, parse_update};
use crate::state::{DynamoDBServiceState, DynamoDBTable};
use crate::storage::{self, KeySchema, PrimaryKey, SortCondition, calculate_item_size};

/// Maximum item size in bytes (400 KB).
pub(crate) const MAX_ITEM_SIZE_BYTES: u64 = 400 * 1024;

/// Main DynamoDB provider implementing all operations.
#[derive(Debug)]
pub struct PretenderDynamoDB {
    /// Service state owning table metadata and the connection pool.
    pub state: Arc<DynamoDBServiceState>,
    /// Configuration.
    pub config: Arc<DynamoDBConfig>,
    /// Injectable clock, used for TTL sweeps and deterministic testing.
    pub clock: Arc<dyn Clock>,
}

impl PretenderDynamoDB {
    /// Create a new DynamoDB provider over `state`.
    #[must_use]
    pub fn new(state: Arc<DynamoDBServiceState>, config: DynamoDBConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            config: Arc::new(config),
            clock,
        }
    }

    /// Count items and total item-size bytes for a table, for
    /// `TableDescription.ItemCount`/`TableSizeBytes`.
    async fn table_counters(&self, table_name: &str) -> Result<(u64, u64), DynamoDBError> {
        let rows: Vec<(sqlx::types::Json<storage::Item>,)> =
            sqlx::query_as("SELECT payload FROM items WHERE table_name = $1")
                .bind(table_name)
                .fetch_all(self.state.pool())
                .await
                .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        let count = rows.len() as u64;
        let bytes = rows.iter().map(|(j,)| calculate_item_size(&j.0)).sum();
        Ok((count, bytes))
    }
}

// ---------------------------------------------------------------------------
// Table management
// ---------------------------------------------------------------------------

impl PretenderDynamoDB {
    /// Handle `CreateTable`.
    pub async fn handle_create_table(
        &self,
        input: CreateTableInput,
    ) -> Result<CreateTableOutput, DynamoDBError> {
        let key_schema = storage::parse_key_schema(&input.key_schema, &input.attribute_definitions)
            .map_err(storage_error_to_dynamodb)?;

        let table_name = input.table_name.clone();
        let arn = format!(
            "arn:aws:dynamodb:{}:000000000000:table/{}",
            self.config.default_region, table_name,
        );

        let billing = input.billing_mode.unwrap_or(BillingMode::PayPerRequest);

        let table = DynamoDBTable {
            name: table_name,
            status: TableStatus::Active,
            key_schema_elements: input.key_schema,
            key_schema,
            attribute_definitions: input.attribute_definitions,
            billing_mode: billing,
            provisioned_throughput: input.provisioned_throughput,
            gsi_definitions: input.global_secondary_indexes,
            lsi_definitions: input.local_secondary_indexes,
            stream_specification: input.stream_specification,
            sse_specification: input.sse_specification,
            tags: parking_lot::RwLock::new(input.tags),
            arn,
            table_id: uuid::Uuid::new_v4().to_string(),
            created_at: self.clock.now(),
            ttl_enabled: false,
            ttl_attribute_name: None,
            ttl_status: None,
        };

        let table = self.state.create_table(table).await?;
        Ok(CreateTableOutput {
            table_description: Some(table.to_description(0, 0)),
        })
    }

    /// Handle `DeleteTable`.
    pub async fn handle_delete_table(
        &self,
        input: DeleteTableInput,
    ) -> Result<DeleteTableOutput, DynamoDBError> {
        let (item_count, table_size_bytes) = self.table_counters(&input.table_name).await?;
        let table = self.state.delete_table(&input.table_name).await?;
        sqlx::query("DELETE FROM items WHERE table_name = $1")
            .bind(&input.table_name)
            .execute(self.state.pool())
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        sqlx::query("DELETE FROM gsi_projections WHERE table_name = $1")
            .bind(&input.table_name)
            .execute(self.state.pool())
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        sqlx::query("DELETE FROM stream_records WHERE stream_id = $1")
            .bind(&table.table_id)
            .execute(self.state.pool())
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        Ok(DeleteTableOutput {
            table_description: Some(table.to_delete_description(item_count, table_size_bytes)),
        })
    }

    /// Handle `DescribeTable`.
    pub async fn handle_describe_table(
        &self,
        input: DescribeTableInput,
    ) -> Result<DescribeTableOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;
        let (item_count, table_size_bytes) = self.table_counters(&input.table_name).await?;
        Ok(DescribeTableOutput {
            table: Some(table.to_description(item_count, table_size_bytes)),
        })
    }

    /// Handle `ListTables`.
    pub async fn handle_list_tables(
        &self,
        input: ListTablesInput,
    ) -> Result<ListTablesOutput, DynamoDBError> {
        let all_names = self.state.list_table_names().await?;
        let limit = usize::try_from(input.limit.unwrap_or(100).clamp(1, 100)).unwrap_or(100);

        let start_idx = if let Some(ref start) = input.exclusive_start_table_name {
            all_names
                .iter()
                .position(|n| n.as_str() > start.as_str())
                .unwrap_or(all_names.len())
        } else {
            0
        };

        let page: Vec<String> = all_names
            .into_iter()
            .skip(start_idx)
            .take(limit + 1)
            .collect();

        let (table_names, last) = if page.len() > limit {
            let last = page[limit - 1].clone();
            (page[..limit].to_vec(), Some(last))
        } else {
            (page, None)
        };

        Ok(ListTablesOutput {
            table_names,
            last_evaluated_table_name: last,
        })
    }

    /// Handle `UpdateTable`. Limited to stream-specification and
    /// provisioned-throughput/billing-mode round-tripping; key schema and
    /// indexes cannot be changed after creation.
    pub async fn handle_update_table(
        &self,
        input: UpdateTableInput,
    ) -> Result<UpdateTableOutput, DynamoDBError> {
        let existing = self.state.require_table(&input.table_name).await?;
        let mut table = clone_table(&existing);

        if let Some(stream_spec) = input.stream_specification {
            table.stream_specification = Some(stream_spec);
        }
        if let Some(throughput) = input.provisioned_throughput {
            table.provisioned_throughput = Some(throughput);
        }
        if let Some(billing) = input.billing_mode {
            table.billing_mode = billing;
        }

        let table = self.state.update_table(table).await?;
        let (item_count, table_size_bytes) = self.table_counters(&input.table_name).await?;
        Ok(UpdateTableOutput {
            table_description: Some(table.to_description(item_count, table_size_bytes)),
        })
    }

    /// Handle `UpdateTimeToLive`.
    pub async fn handle_update_time_to_live(
        &self,
        input: UpdateTimeToLiveInput,
    ) -> Result<UpdateTimeToLiveOutput, DynamoDBError> {
        let existing = self.state.require_table(&input.table_name).await?;
        let spec = input.time_to_live_specification;
        let attr_exists = existing
            .attribute_definitions
            .iter()
            .any(|_| true); // attribute_name need not be a key attribute; no lookup required.
        let _ = attr_exists;

        let mut table = clone_table(&existing);
        table.ttl_enabled = spec.enabled;
        table.ttl_attribute_name = Some(spec.attribute_name.clone());
        table.ttl_status = Some(if spec.enabled {
            TimeToLiveStatus::Enabled
        } else {
            TimeToLiveStatus::Disabled
        });

        let table = self.state.update_table(table).await?;
        Ok(UpdateTimeToLiveOutput {
            time_to_live_specification: Some(pretender_dynamodb_model::types::TimeToLiveSpecification {
                enabled: table.ttl_enabled,
                attribute_name: table.ttl_attribute_name.clone().unwrap_or_default(),
            }),
        })
    }

    /// Handle `DescribeTimeToLive`.
    pub async fn handle_describe_time_to_live(
        &self,
        input: DescribeTimeToLiveInput,
    ) -> Result<DescribeTimeToLiveOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;
        Ok(DescribeTimeToLiveOutput {
            time_to_live_description: Some(table.to_ttl_description()),
        })
    }
}

/// Build a fresh owned [`DynamoDBTable`] from a cached `Arc`, for use as the
/// basis of an `UPDATE`. `tags` is re-wrapped in a new lock since
/// `parking_lot::RwLock` is not `Clone`.
fn clone_table(table: &DynamoDBTable) -> DynamoDBTable {
    DynamoDBTable {
        name: table.name.clone(),
        status: table.status.clone(),
        key_schema_elements: table.key_schema_elements.clone(),
        key_schema: table.key_schema.clone(),
        attribute_definitions: table.attribute_definitions.clone(),
        billing_mode: table.billing_mode.clone(),
        provisioned_throughput: table.provisioned_throughput.clone(),
        gsi_definitions: table.gsi_definitions.clone(),
        lsi_definitions: table.lsi_definitions.clone(),
        stream_specification: table.stream_specification.clone(),
        sse_specification: table.sse_specification.clone(),
        tags: parking_lot::RwLock::new(table.tags.read().clone()),
        arn: table.arn.clone(),
        table_id: table.table_id.clone(),
        created_at: table.created_at,
        ttl_enabled: table.ttl_enabled,
        ttl_attribute_name: table.ttl_attribute_name.clone(),
        ttl_status: table.ttl_status.clone(),
    }
}

// ---------------------------------------------------------------------------
// Item CRUD
// ---------------------------------------------------------------------------

impl PretenderDynamoDB {
    /// Handle `PutItem`.
    pub async fn handle_put_item(&self, input: PutItemInput) -> Result<PutItemOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;

        let size = calculate_item_size(&input.item);
        if size > MAX_ITEM_SIZE_BYTES {
            return Err(DynamoDBError::validation(format!(
                "Item size has exceeded the maximum allowed size of {MAX_ITEM_SIZE_BYTES} bytes"
            )));
        }

        let pk = storage::extract_primary_key(&table.key_schema, &input.item)
            .map_err(storage_error_to_dynamodb)?;

        let mut tx = self
            .state
            .pool()
            .begin()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let existing = storage::lock_item(&mut tx, &input.table_name, &pk)
            .await
            .map_err(storage_error_to_dynamodb)?;

        if let Some(ref condition) = input.condition_expression {
            evaluate_condition(
                condition,
                existing.as_ref(),
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            )?;
        }

        storage::write_item(
            &mut tx,
            &input.table_name,
            &table.key_schema,
            &input.item,
            table.ttl_attribute_name.as_deref(),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        storage::maintain_gsi_projections(
            &mut tx,
            &input.table_name,
            &table.key_schema,
            &table.attribute_definitions,
            &table.gsi_definitions,
            &pk,
            Some(&input.item),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        crate::streams::record_mutation(
            &mut tx,
            &table,
            existing.as_ref(),
            Some(&input.item),
            self.clock.as_ref(),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        tx.commit()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let attributes = match input.return_values {
            Some(ReturnValue::AllOld) => existing.unwrap_or_default(),
            _ => HashMap::new(),
        };

        Ok(PutItemOutput {
            attributes,
            consumed_capacity: None,
            item_collection_metrics: None,
        })
    }

    /// Handle `GetItem`.
    pub async fn handle_get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;
        let pk = storage::extract_primary_key(&table.key_schema, &input.key)
            .map_err(storage_error_to_dynamodb)?;

        let item = storage::get_item(self.state.pool(), &input.table_name, &pk)
            .await
            .map_err(storage_error_to_dynamodb)?;

        let item = match (item, &input.projection_expression) {
            (Some(item), Some(proj_expr)) => {
                let paths = parse_projection(proj_expr).map_err(expression_error_to_dynamodb)?;
                let ctx = EvalContext {
                    item: &item,
                    names: &input.expression_attribute_names,
                    values: &HashMap::new(),
                };
                Some(ctx.apply_projection(&paths))
            }
            (item, _) => item,
        };

        Ok(GetItemOutput {
            item,
            consumed_capacity: None,
        })
    }

    /// Handle `DeleteItem`.
    pub async fn handle_delete_item(
        &self,
        input: DeleteItemInput,
    ) -> Result<DeleteItemOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;
        let pk = storage::extract_primary_key(&table.key_schema, &input.key)
            .map_err(storage_error_to_dynamodb)?;

        let mut tx = self
            .state
            .pool()
            .begin()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let existing = storage::lock_item(&mut tx, &input.table_name, &pk)
            .await
            .map_err(storage_error_to_dynamodb)?;

        if let Some(ref condition) = input.condition_expression {
            evaluate_condition(
                condition,
                existing.as_ref(),
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            )?;
        }

        storage::delete_item(&mut tx, &input.table_name, &pk)
            .await
            .map_err(storage_error_to_dynamodb)?;

        storage::maintain_gsi_projections(
            &mut tx,
            &input.table_name,
            &table.key_schema,
            &table.attribute_definitions,
            &table.gsi_definitions,
            &pk,
            None,
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        crate::streams::record_mutation(
            &mut tx,
            &table,
            existing.as_ref(),
            None,
            self.clock.as_ref(),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        tx.commit()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let attributes = match input.return_values {
            Some(ReturnValue::AllOld) => existing.unwrap_or_default(),
            _ => HashMap::new(),
        };

        Ok(DeleteItemOutput {
            attributes,
            consumed_capacity: None,
            item_collection_metrics: None,
        })
    }

    /// Handle `UpdateItem`.
    pub async fn handle_update_item(
        &self,
        input: UpdateItemInput,
    ) -> Result<UpdateItemOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;
        let pk = storage::extract_primary_key(&table.key_schema, &input.key)
            .map_err(storage_error_to_dynamodb)?;

        let mut tx = self
            .state
            .pool()
            .begin()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let existing = storage::lock_item(&mut tx, &input.table_name, &pk)
            .await
            .map_err(storage_error_to_dynamodb)?;

        if let Some(ref condition) = input.condition_expression {
            evaluate_condition(
                condition,
                existing.as_ref(),
                &input.expression_attribute_names,
                &input.expression_attribute_values,
            )?;
        }

        let mut item = existing.clone().unwrap_or_else(|| input.key.clone());
        if let Some(ref update_expr) = input.update_expression {
            let parsed = parse_update(update_expr).map_err(expression_error_to_dynamodb)?;
            let ctx = EvalContext {
                item: &item,
                names: &input.expression_attribute_names,
                values: &input.expression_attribute_values,
            };
            item = ctx
                .apply_update(&parsed)
                .map_err(expression_error_to_dynamodb)?;
        }

        let size = calculate_item_size(&item);
        if size > MAX_ITEM_SIZE_BYTES {
            return Err(DynamoDBError::validation(format!(
                "Item size has exceeded the maximum allowed size of {MAX_ITEM_SIZE_BYTES} bytes"
            )));
        }

        storage::write_item(
            &mut tx,
            &input.table_name,
            &table.key_schema,
            &item,
            table.ttl_attribute_name.as_deref(),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        storage::maintain_gsi_projections(
            &mut tx,
            &input.table_name,
            &table.key_schema,
            &table.attribute_definitions,
            &table.gsi_definitions,
            &pk,
            Some(&item),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        crate::streams::record_mutation(
            &mut tx,
            &table,
            existing.as_ref(),
            Some(&item),
            self.clock.as_ref(),
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        tx.commit()
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let attributes = match input.return_values {
            Some(ReturnValue::AllOld) => existing.unwrap_or_default(),
            Some(ReturnValue::AllNew) => item,
            Some(ReturnValue::UpdatedOld) => {
                let empty = HashMap::new();
                changed_attributes(existing.as_ref().unwrap_or(&empty), &item).0
            }
            Some(ReturnValue::UpdatedNew) => {
                let empty = HashMap::new();
                changed_attributes(existing.as_ref().unwrap_or(&empty), &item).1
            }
            _ => HashMap::new(),
        };

        Ok(UpdateItemOutput {
            attributes,
            consumed_capacity: None,
            item_collection_metrics: None,
        })
    }
}

/// Restrict pre/post images to the attributes that actually changed between
/// them, for `UPDATED_OLD`/`UPDATED_NEW` return-value modes: an attribute
/// that is present with the same value in both images did not change, and
/// is omitted from both results.
fn changed_attributes(old: &storage::Item, new: &storage::Item) -> (storage::Item, storage::Item) {
    let mut old_changed = HashMap::new();
    let mut new_changed = HashMap::new();
    let mut names: std::collections::HashSet<&String> = old.keys().collect();
    names.extend(new.keys());
    for name in names {
        let old_value = old.get(name);
        let new_value = new.get(name);
        if old_value != new_value {
            if let Some(value) = old_value {
                old_changed.insert(name.clone(), value.clone());
            }
            if let Some(value) = new_value {
                new_changed.insert(name.clone(), value.clone());
            }
        }
    }
    (old_changed, new_changed)
}

/// Evaluate a condition expression against a possibly-absent existing item,
/// returning `ConditionalCheckFailedException` on failure.
pub(crate) fn evaluate_condition(
    condition: &str,
    existing: Option<&storage::Item>,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(), DynamoDBError> {
    let empty = HashMap::new();
    let item_ref = existing.unwrap_or(&empty);
    let expr = parse_condition(condition).map_err(expression_error_to_dynamodb)?;
    let ctx = EvalContext {
        item: item_ref,
        names,
        values,
    };
    let result = ctx.evaluate(&expr).map_err(expression_error_to_dynamodb)?;
    if result {
        Ok(())
    } else {
        Err(DynamoDBError::conditional_check_failed(
            "The conditional request failed",
        ))
    }
}

// ---------------------------------------------------------------------------
// Query & Scan
// ---------------------------------------------------------------------------

impl PretenderDynamoDB {
    /// Handle `Query`.
    pub async fn handle_query(&self, input: QueryInput) -> Result<QueryOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;

        let key_condition = input.key_condition_expression.as_deref().ok_or_else(|| {
            DynamoDBError::validation("KeyConditionExpression is required for Query")
        })?;
        let expr = parse_condition(key_condition).map_err(expression_error_to_dynamodb)?;

        let index_schema = match &input.index_name {
            Some(name) => Some(gsi_key_schema(&table, name)?),
            None => None,
        };
        let key_schema = index_schema.as_ref().unwrap_or(&table.key_schema);

        let (partition_value, sort_condition) = extract_key_condition(
            &expr,
            key_schema,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let scan_forward = input.scan_index_forward.unwrap_or(true);
        let limit = input
            .limit
            .map(|l| usize::try_from(l.max(0)).unwrap_or(usize::MAX));

        let exclusive_start_sort = if input.exclusive_start_key.is_empty() {
            None
        } else {
            let validated = crate::pagination::validate_start_key(key_schema, &input.exclusive_start_key)?;
            validated.1
        };

        let (mut items, last_key) = match &input.index_name {
            Some(index_name) => {
                storage::query_gsi(
                    self.state.pool(),
                    &input.table_name,
                    index_name,
                    key_schema,
                    &partition_value,
                    sort_condition.as_ref(),
                    scan_forward,
                    limit,
                    exclusive_start_sort.as_ref(),
                )
                .await
                .map_err(storage_error_to_dynamodb)?
            }
            None => {
                storage::query(
                    self.state.pool(),
                    &input.table_name,
                    key_schema,
                    &partition_value,
                    sort_condition.as_ref(),
                    scan_forward,
                    limit,
                    exclusive_start_sort.as_ref(),
                )
                .await
                .map_err(storage_error_to_dynamodb)?
            }
        };

        let scanned_count = i32::try_from(items.len()).unwrap_or(i32::MAX);

        if let Some(ref filter) = input.filter_expression {
            let filter_expr = parse_condition(filter).map_err(expression_error_to_dynamodb)?;
            items.retain(|item| {
                let ctx = EvalContext {
                    item,
                    names: &input.expression_attribute_names,
                    values: &input.expression_attribute_values,
                };
                ctx.evaluate(&filter_expr).unwrap_or(false)
            });
        }

        if let Some(ref proj) = input.projection_expression {
            let paths = parse_projection(proj).map_err(expression_error_to_dynamodb)?;
            items = items
                .into_iter()
                .map(|item| {
                    let ctx = EvalContext {
                        item: &item,
                        names: &input.expression_attribute_names,
                        values: &HashMap::new(),
                    };
                    ctx.apply_projection(&paths)
                })
                .collect();
        }

        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);

        let last_evaluated_key = last_key.map(|pk| {
            storage::build_last_evaluated_key(key_schema, &pk.partition_key, pk.sort_key.as_ref())
        });

        Ok(QueryOutput {
            items,
            count,
            scanned_count,
            last_evaluated_key: last_evaluated_key.unwrap_or_default(),
            consumed_capacity: None,
        })
    }

    /// Handle `Scan`.
    pub async fn handle_scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoDBError> {
        let table = self.state.require_table(&input.table_name).await?;

        let limit = input
            .limit
            .map(|l| usize::try_from(l.max(0)).unwrap_or(usize::MAX));
        let exclusive_start = if input.exclusive_start_key.is_empty() {
            None
        } else {
            let (partition, sort) =
                crate::pagination::validate_start_key(&table.key_schema, &input.exclusive_start_key)?;
            Some(PrimaryKey {
                partition_key: partition,
                sort_key: sort,
            })
        };

        let (mut items, last_key) = storage::scan(
            self.state.pool(),
            &input.table_name,
            &table.key_schema,
            limit,
            exclusive_start.as_ref(),
            input.segment,
            input.total_segments,
        )
        .await
        .map_err(storage_error_to_dynamodb)?;

        let scanned_count = i32::try_from(items.len()).unwrap_or(i32::MAX);

        if let Some(ref filter) = input.filter_expression {
            let filter_expr = parse_condition(filter).map_err(expression_error_to_dynamodb)?;
            items.retain(|item| {
                let ctx = EvalContext {
                    item,
                    names: &input.expression_attribute_names,
                    values: &input.expression_attribute_values,
                };
                ctx.evaluate(&filter_expr).unwrap_or(false)
            });
        }

        if let Some(ref proj) = input.projection_expression {
            let paths = parse_projection(proj).map_err(expression_error_to_dynamodb)?;
            items = items
                .into_iter()
                .map(|item| {
                    let ctx = EvalContext {
                        item: &item,
                        names: &input.expression_attribute_names,
                        values: &HashMap::new(),
                    };
                    ctx.apply_projection(&paths)
                })
                .collect();
        }

        let count = i32::try_from(items.len()).unwrap_or(i32::MAX);

        let last_evaluated_key = last_key.map(|pk| {
            storage::build_last_evaluated_key(&table.key_schema, &pk.partition_key, pk.sort_key.as_ref())
        });

        Ok(ScanOutput {
            items,
            count,
            scanned_count,
            last_evaluated_key: last_evaluated_key.unwrap_or_default(),
            consumed_capacity: None,
        })
    }
}

/// Resolve a GSI's key schema by name, for `Query`'s `IndexName` parameter.
fn gsi_key_schema(table: &DynamoDBTable, index_name: &str) -> Result<KeySchema, DynamoDBError> {
    let gsi = table
        .gsi_definitions
        .iter()
        .find(|g| g.index_name == index_name)
        .ok_or_else(|| {
            DynamoDBError::validation(format!("Index {index_name} not found on table"))
        })?;
    storage::parse_key_schema(&gsi.key_schema, &table.attribute_definitions)
        .map_err(storage_error_to_dynamodb)
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

impl PretenderDynamoDB {
    /// Handle `BatchGetItem`.
    pub async fn handle_batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, DynamoDBError> {
        let mut responses: HashMap<String, Vec<HashMap<String, AttributeValue>>> = HashMap::new();

        for (table_name, keys_and_attrs) in &input.request_items {
            let table = self.state.require_table(table_name).await?;
            let mut table_items = Vec::new();

            for key in &keys_and_attrs.keys {
                let pk = storage::extract_primary_key(&table.key_schema, key)
                    .map_err(storage_error_to_dynamodb)?;
                if let Some(item) = storage::get_item(self.state.pool(), table_name, &pk)
                    .await
                    .map_err(storage_error_to_dynamodb)?
                {
                    let item = if let Some(ref proj) = keys_and_attrs.projection_expression {
                        let paths = parse_projection(proj).map_err(expression_error_to_dynamodb)?;
                        let names = keys_and_attrs
                            .expression_attribute_names
                            .clone()
                            .unwrap_or_default();
                        let ctx = EvalContext {
                            item: &item,
                            names: &names,
                            values: &HashMap::new(),
                        };
                        ctx.apply_projection(&paths)
                    } else {
                        item
                    };
                    table_items.push(item);
                }
            }

            if !table_items.is_empty() {
                responses.insert(table_name.clone(), table_items);
            }
        }

        Ok(BatchGetItemOutput {
            responses,
            unprocessed_keys: HashMap::new(),
            consumed_capacity: Vec::new(),
        })
    }

    /// Handle `BatchWriteItem`.
    ///
    /// DynamoDB rejects a batch that addresses the same primary key more than
    /// once across its write requests (whether via two puts, two deletes, or
    /// one of each) with a `ValidationException`, rather than silently
    /// applying them in request order.
    pub async fn handle_batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoDBError> {
        let mut seen_keys: std::collections::HashSet<(String, Vec<u8>, Vec<u8>)> =
            std::collections::HashSet::new();

        for (table_name, write_requests) in &input.request_items {
            let table = self.state.require_table(table_name).await?;

            for wr in write_requests {
                let key_item = if let Some(ref put) = wr.put_request {
                    &put.item
                } else if let Some(ref del) = wr.delete_request {
                    &del.key
                } else {
                    continue;
                };
                let pk = storage::extract_primary_key(&table.key_schema, key_item)
                    .map_err(storage_error_to_dynamodb)?;
                let dedup_key = (
                    table_name.clone(),
                    encode_dedup(&pk.partition_key),
                    pk.sort_key.as_ref().map(encode_dedup).unwrap_or_default(),
                );
                if !seen_keys.insert(dedup_key) {
                    return Err(DynamoDBError::validation(
                        "Provided list of item keys contains duplicates",
                    ));
                }
            }
        }

        for (table_name, write_requests) in &input.request_items {
            let table = self.state.require_table(table_name).await?;

            for wr in write_requests {
                let mut tx = self
                    .state
                    .pool()
                    .begin()
                    .await
                    .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

                if let Some(ref put) = wr.put_request {
                    let size = calculate_item_size(&put.item);
                    if size > MAX_ITEM_SIZE_BYTES {
                        return Err(DynamoDBError::validation(format!(
                            "Item size has exceeded the maximum allowed size of {MAX_ITEM_SIZE_BYTES} bytes"
                        )));
                    }
                    let pk = storage::extract_primary_key(&table.key_schema, &put.item)
                        .map_err(storage_error_to_dynamodb)?;
                    let existing = storage::lock_item(&mut tx, table_name, &pk)
                        .await
                        .map_err(storage_error_to_dynamodb)?;
                    storage::write_item(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        &put.item,
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
                        &pk,
                        Some(&put.item),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    crate::streams::record_mutation(
                        &mut tx,
                        &table,
                        existing.as_ref(),
                        Some(&put.item),
                        self.clock.as_ref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                } else if let Some(ref del) = wr.delete_request {
                    let pk = storage::extract_primary_key(&table.key_schema, &del.key)
                        .map_err(storage_error_to_dynamodb)?;
                    let existing = storage::lock_item(&mut tx, table_name, &pk)
                        .await
                        .map_err(storage_error_to_dynamodb)?;
                    storage::delete_item(&mut tx, table_name, &pk)
                        .await
                        .map_err(storage_error_to_dynamodb)?;
                    storage::maintain_gsi_projections(
                        &mut tx,
                        table_name,
                        &table.key_schema,
                        &table.attribute_definitions,
                        &table.gsi_definitions,
                        &pk,
                        None,
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                    crate::streams::record_mutation(
                        &mut tx,
                        &table,
                        existing.as_ref(),
                        None,
                        self.clock.as_ref(),
                    )
                    .await
                    .map_err(storage_error_to_dynamodb)?;
                }

                tx.commit()
                    .await
                    .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
            }
        }

        Ok(BatchWriteItemOutput {
            unprocessed_items: HashMap::new(),
            item_collection_metrics: HashMap::new(),
            consumed_capacity: Vec::new(),
        })
    }
}

/// Encode an attribute value for in-memory duplicate-key detection within a
/// single `BatchWriteItem` request. Only needs to distinguish values, not to
/// order them, so this reuses the same byte encoding as `hash_key`/`range_key`.
fn encode_dedup(value: &AttributeValue) -> Vec<u8> {
    match value {
        AttributeValue::S(s) => s.as_bytes().to_vec(),
        AttributeValue::N(n) => n.as_bytes().to_vec(),
        AttributeValue::B(b) => b.to_vec(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Key condition extraction
// ---------------------------------------------------------------------------

/// Extract partition key value and optional sort key condition from a parsed
/// key condition expression. Handles the common patterns: `pk = :val` and
/// `pk = :val AND sk <op> :val2`.
pub(crate) fn extract_key_condition(
    expr: &crate::expression::Expr,
    key_schema: &KeySchema,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(AttributeValue, Option<SortCondition>), DynamoDBError> {
    use crate::expression::ast::{CompareOp, Expr, LogicalOp};

    match expr {
        Expr::Compare {
            left,
            op: CompareOp::Eq,
            right,
        } => {
            let pk_val =
                resolve_key_value(left, right, &key_schema.partition_key.name, names, values)?;
            Ok((pk_val, None))
        }
        Expr::Logical {
            op: LogicalOp::And,
            left,
            right,
        } => {
            if let Ok((pk_val, _)) = extract_key_condition(left, key_schema, names, values) {
                let sort_cond = extract_sort_condition(right, key_schema, names, values)?;
                return Ok((pk_val, sort_cond));
            }
            if let Ok((pk_val, _)) = extract_key_condition(right, key_schema, names, values) {
                let sort_cond = extract_sort_condition(left, key_schema, names, values)?;
                return Ok((pk_val, sort_cond));
            }
            Err(DynamoDBError::validation(
                "KeyConditionExpression must contain an equality condition on the partition key",
            ))
        }
        _ => Err(DynamoDBError::validation(
            "KeyConditionExpression must contain an equality condition on the partition key",
        )),
    }
}

/// Extract a sort key condition from an expression node.
fn extract_sort_condition(
    expr: &crate::expression::Expr,
    key_schema: &KeySchema,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<Option<SortCondition>, DynamoDBError> {
    use crate::expression::ast::{CompareOp, Expr, FunctionName};

    if key_schema.sort_key.is_none() {
        return Ok(None);
    }
    let sk_name = &key_schema.sort_key.as_ref().expect("checked above").name;

    match expr {
        Expr::Compare { left, op, right } => {
            let val = resolve_sort_value(left, right, sk_name, names, values)?;
            let cond = match op {
                CompareOp::Eq => SortCondition::Eq(val),
                CompareOp::Lt => SortCondition::Lt(val),
                CompareOp::Le => SortCondition::Le(val),
                CompareOp::Gt => SortCondition::Gt(val),
                CompareOp::Ge => SortCondition::Ge(val),
                CompareOp::Ne => {
                    return Err(DynamoDBError::validation(
                        "Sort key condition does not support <> operator",
                    ));
                }
            };
            Ok(Some(cond))
        }
        Expr::Between {
            value: _,
            low,
            high,
        } => {
            let low_val = resolve_operand_value(low, values)?;
            let high_val = resolve_operand_value(high, values)?;
            Ok(Some(SortCondition::Between(low_val, high_val)))
        }
        Expr::Function {
            name: FunctionName::BeginsWith,
            args,
        } if args.len() == 2 => {
            let prefix_val = resolve_operand_value(&args[1], values)?;
            match prefix_val {
                AttributeValue::S(s) => Ok(Some(SortCondition::BeginsWith(s))),
                _ => Err(DynamoDBError::validation(
                    "begins_with requires a string argument",
                )),
            }
        }
        _ => Ok(None),
    }
}

/// Resolve an operand to an `AttributeValue`. Key conditions may only
/// reference expression attribute values, never nested paths.
fn resolve_operand_value(
    operand: &crate::expression::ast::Operand,
    values: &HashMap<String, AttributeValue>,
) -> Result<AttributeValue, DynamoDBError> {
    use crate::expression::ast::Operand;
    match operand {
        Operand::Value(name) => values.get(name).cloned().ok_or_else(|| {
            DynamoDBError::validation(format!(
                "Value {name} not found in ExpressionAttributeValues"
            ))
        }),
        _ => Err(DynamoDBError::validation(
            "Expected a value reference (:value) in key condition",
        )),
    }
}

/// Resolve a key equality condition: one side should be the key path, the
/// other a value reference.
fn resolve_key_value(
    left: &crate::expression::ast::Operand,
    right: &crate::expression::ast::Operand,
    key_name: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<AttributeValue, DynamoDBError> {
    use crate::expression::ast::Operand;

    let is_key_path = |op: &Operand| -> bool {
        if let Operand::Path(path) = op {
            if path.elements.len() == 1 {
                if let crate::expression::ast::PathElement::Attribute(name) = &path.elements[0] {
                    let resolved = if name.starts_with('#') {
                        names
                            .get(name.as_str())
                            .map_or(name.as_str(), String::as_str)
                    } else {
                        name.as_str()
                    };
                    return resolved == key_name;
                }
            }
        }
        false
    };

    if is_key_path(left) {
        resolve_operand_value(right, values)
    } else if is_key_path(right) {
        resolve_operand_value(left, values)
    } else {
        Err(DynamoDBError::validation(format!(
            "KeyConditionExpression must reference key attribute '{key_name}'"
        )))
    }
}

/// Same as `resolve_key_value` but for the sort key.
fn resolve_sort_value(
    left: &crate::expression::ast::Operand,
    right: &crate::expression::ast::Operand,
    key_name: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<AttributeValue, DynamoDBError> {
    resolve_key_value(left, right, key_name, names, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_restrict_changed_attributes_to_touched_paths() {
        let mut old = HashMap::new();
        old.insert("id".to_string(), AttributeValue::S("x".to_string()));
        old.insert("counter".to_string(), AttributeValue::N("10".to_string()));
        old.insert("unused".to_string(), AttributeValue::S("gone".to_string()));

        let mut new = HashMap::new();
        new.insert("id".to_string(), AttributeValue::S("x".to_string()));
        new.insert("counter".to_string(), AttributeValue::N("15".to_string()));
        new.insert("added".to_string(), AttributeValue::Bool(true));

        let (old_changed, new_changed) = changed_attributes(&old, &new);

        assert_eq!(old_changed.len(), 2);
        assert_eq!(old_changed.get("counter"), Some(&AttributeValue::N("10".to_string())));
        assert_eq!(old_changed.get("unused"), Some(&AttributeValue::S("gone".to_string())));
        assert!(!old_changed.contains_key("id"));

        assert_eq!(new_changed.len(), 2);
        assert_eq!(new_changed.get("counter"), Some(&AttributeValue::N("15".to_string())));
        assert_eq!(new_changed.get("added"), Some(&AttributeValue::Bool(true)));
        assert!(!new_changed.contains_key("id"));
    }

    #[test]
    fn test_should_return_empty_diff_when_update_is_a_no_op() {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S("x".to_string()));

        let (old_changed, new_changed) = changed_attributes(&item, &item.clone());

        assert!(old_changed.is_empty());
        assert!(new_changed.is_empty());
    }
}
