//! DynamoDB table metadata catalog.
//!
//! `tables` in Postgres is the system of record; [`DynamoDBServiceState`] is a
//! read-through cache in front of it, keyed by table name. Every write path
//! (`CreateTable`/`UpdateTable`/`DeleteTable`) updates SQL first and then
//! repopulates or evicts the cache entry, so a cache miss (e.g. after a
//! restart, or from a second server instance) always falls back to SQL
//! rather than reporting a false `ResourceNotFoundException`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;

use pretender_dynamodb_model::error::DynamoDBError;
use pretender_dynamodb_model::types::{
    AttributeDefinition, BillingMode, BillingModeSummary, GlobalSecondaryIndex,
    GlobalSecondaryIndexDescription, IndexStatus, KeySchemaElement, LocalSecondaryIndex,
    LocalSecondaryIndexDescription, ProvisionedThroughput, ProvisionedThroughputDescription,
    SSEDescription, SSESpecification, SseStatus, SseType, StreamSpecification, TableDescription,
    TableStatus, Tag, TimeToLiveDescription, TimeToLiveStatus,
};

use crate::storage::{self, KeySchema, StorageError};

/// The durable shape of a table's metadata, as stored in `tables.schema_json`.
/// Everything a [`DynamoDBTable`] needs besides its derived [`KeySchema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableRecord {
    status: TableStatus,
    key_schema_elements: Vec<KeySchemaElement>,
    attribute_definitions: Vec<AttributeDefinition>,
    billing_mode: BillingMode,
    provisioned_throughput: Option<ProvisionedThroughput>,
    gsi_definitions: Vec<GlobalSecondaryIndex>,
    lsi_definitions: Vec<LocalSecondaryIndex>,
    stream_specification: Option<StreamSpecification>,
    sse_specification: Option<SSESpecification>,
    tags: Vec<Tag>,
    arn: String,
    table_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    ttl_enabled: bool,
    ttl_attribute_name: Option<String>,
    #[serde(default)]
    ttl_status: Option<TimeToLiveStatus>,
}

/// Top-level DynamoDB service state: a SQL connection pool plus an in-memory
/// read-through cache of table metadata.
#[derive(Debug)]
pub struct DynamoDBServiceState {
    pool: PgPool,
    cache: DashMap<String, Arc<DynamoDBTable>>,
}

impl DynamoDBServiceState {
    /// Create a new service state backed by `pool`, with an empty cache.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
        }
    }

    /// The underlying connection pool, for callers (e.g. `provider`) that
    /// need to open their own transactions against the item store.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a table by name, consulting the cache before falling back to SQL.
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::InternalServerError` on a SQL failure.
    pub async fn get_table(&self, name: &str) -> Result<Option<Arc<DynamoDBTable>>, DynamoDBError> {
        if let Some(table) = self.cache.get(name) {
            return Ok(Some(Arc::clone(table.value())));
        }
        let row: Option<(Json<TableRecord>,)> =
            sqlx::query_as("SELECT schema_json FROM tables WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        let Some((Json(record),)) = row else {
            return Ok(None);
        };
        let table = Arc::new(DynamoDBTable::from_record(name.to_owned(), record)?);
        self.cache.insert(name.to_owned(), Arc::clone(&table));
        Ok(Some(table))
    }

    /// Get a table or return `ResourceNotFoundException`.
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::ResourceNotFoundException` if no such table
    /// exists, or `DynamoDBError::InternalServerError` on a SQL failure.
    pub async fn require_table(&self, name: &str) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        self.get_table(name).await?.ok_or_else(|| {
            DynamoDBError::resource_not_found(format!(
                "Requested resource not found: Table: {name} not found"
            ))
        })
    }

    /// Insert a new table's metadata row. Returns `ResourceInUseException`
    /// if a table by that name already exists.
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::ResourceInUseException` on a duplicate name,
    /// or `DynamoDBError::InternalServerError` on any other SQL failure.
    pub async fn create_table(
        &self,
        table: DynamoDBTable,
    ) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let name = table.name.clone();
        let record = table.to_record();
        let result = sqlx::query("INSERT INTO tables (name, schema_json) VALUES ($1, $2)")
            .bind(&name)
            .bind(Json(&record))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                let table = Arc::new(table);
                self.cache.insert(name, Arc::clone(&table));
                Ok(table)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                DynamoDBError::resource_in_use(format!("Table already exists: {name}")),
            ),
            Err(e) => Err(DynamoDBError::internal_error(e.to_string())),
        }
    }

    /// Persist changes to an existing table's metadata (used by `UpdateTable`
    /// and `UpdateTimeToLive`), then refresh the cache entry.
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::InternalServerError` on any SQL failure.
    pub async fn update_table(
        &self,
        table: DynamoDBTable,
    ) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let name = table.name.clone();
        let record = table.to_record();
        sqlx::query("UPDATE tables SET schema_json = $2 WHERE name = $1")
            .bind(&name)
            .bind(Json(&record))
            .execute(&self.pool)
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        let table = Arc::new(table);
        self.cache.insert(name, Arc::clone(&table));
        Ok(table)
    }

    /// Remove a table's metadata row. Returns the removed table's last known
    /// metadata (the caller is responsible for dropping its item rows).
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::ResourceNotFoundException` if no such table
    /// exists, or `DynamoDBError::InternalServerError` on any other SQL
    /// failure.
    pub async fn delete_table(&self, name: &str) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let table = self.require_table(name).await?;
        sqlx::query("DELETE FROM tables WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        self.cache.remove(name);
        Ok(table)
    }

    /// List all table names (sorted), reading straight from SQL so the
    /// result reflects every server instance, not just this one's cache.
    ///
    /// # Errors
    ///
    /// Returns `DynamoDBError::InternalServerError` on a SQL failure.
    pub async fn list_table_names(&self) -> Result<Vec<String>, DynamoDBError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM tables ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Evict every cached entry without touching SQL. Used by tests that
    /// reuse a single state across table lifecycles.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// A single DynamoDB table's metadata (key schema, indexes, stream/TTL
/// configuration). Item storage lives entirely in SQL; this struct carries
/// nothing but the description needed to answer `DescribeTable`-shaped
/// questions and to drive query/write routing.
#[derive(Debug)]
pub struct DynamoDBTable {
    /// Table name.
    pub name: String,
    /// Table status.
    pub status: TableStatus,
    /// Key schema elements.
    pub key_schema_elements: Vec<KeySchemaElement>,
    /// Parsed key schema for storage operations.
    pub key_schema: KeySchema,
    /// Attribute definitions.
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Billing mode.
    pub billing_mode: BillingMode,
    /// Provisioned throughput (accepted but not enforced).
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    /// Global secondary index definitions.
    pub gsi_definitions: Vec<GlobalSecondaryIndex>,
    /// Local secondary index definitions.
    pub lsi_definitions: Vec<LocalSecondaryIndex>,
    /// Stream specification.
    pub stream_specification: Option<StreamSpecification>,
    /// SSE specification.
    pub sse_specification: Option<SSESpecification>,
    /// Tags.
    pub tags: parking_lot::RwLock<Vec<Tag>>,
    /// Table ARN.
    pub arn: String,
    /// Stable table ID (UUID v4), assigned at creation time.
    pub table_id: String,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Whether TTL expiry is currently enabled.
    pub ttl_enabled: bool,
    /// The TTL attribute name, once one has ever been configured (kept even
    /// after disabling, matching DynamoDB's `DescribeTimeToLive` behavior).
    pub ttl_attribute_name: Option<String>,
    /// The TTL status shown by `DescribeTimeToLive`, absent until
    /// `UpdateTimeToLive` has been called at least once.
    pub ttl_status: Option<TimeToLiveStatus>,
}

impl DynamoDBTable {
    fn to_record(&self) -> TableRecord {
        TableRecord {
            status: self.status.clone(),
            key_schema_elements: self.key_schema_elements.clone(),
            attribute_definitions: self.attribute_definitions.clone(),
            billing_mode: self.billing_mode.clone(),
            provisioned_throughput: self.provisioned_throughput.clone(),
            gsi_definitions: self.gsi_definitions.clone(),
            lsi_definitions: self.lsi_definitions.clone(),
            stream_specification: self.stream_specification.clone(),
            sse_specification: self.sse_specification.clone(),
            tags: self.tags.read().clone(),
            arn: self.arn.clone(),
            table_id: self.table_id.clone(),
            created_at: self.created_at,
            ttl_enabled: self.ttl_enabled,
            ttl_attribute_name: self.ttl_attribute_name.clone(),
            ttl_status: self.ttl_status.clone(),
        }
    }

    fn from_record(name: String, record: TableRecord) -> Result<Self, DynamoDBError> {
        let key_schema =
            storage::parse_key_schema(&record.key_schema_elements, &record.attribute_definitions)
                .map_err(storage_error_to_validation)?;
        Ok(Self {
            name,
            status: record.status,
            key_schema_elements: record.key_schema_elements,
            key_schema,
            attribute_definitions: record.attribute_definitions,
            billing_mode: record.billing_mode,
            provisioned_throughput: record.provisioned_throughput,
            gsi_definitions: record.gsi_definitions,
            lsi_definitions: record.lsi_definitions,
            stream_specification: record.stream_specification,
            sse_specification: record.sse_specification,
            tags: parking_lot::RwLock::new(record.tags),
            arn: record.arn,
            table_id: record.table_id,
            created_at: record.created_at,
            ttl_enabled: record.ttl_enabled,
            ttl_attribute_name: record.ttl_attribute_name,
            ttl_status: record.ttl_status,
        })
    }

    /// Build a `TableDescription` from this table's metadata and the item
    /// counters supplied by the caller (computed from the `items` table, not
    /// tracked here).
    #[must_use]
    pub fn to_description(&self, item_count: u64, table_size_bytes: u64) -> TableDescription {
        #[allow(clippy::cast_precision_loss)] // Acceptable: DynamoDB returns epoch seconds as f64
        let creation_time = self.created_at.timestamp() as f64;
        TableDescription {
            table_name: Some(self.name.clone()),
            table_status: Some(self.status.clone()),
            key_schema: self.key_schema_elements.clone(),
            attribute_definitions: self.attribute_definitions.clone(),
            table_arn: Some(self.arn.clone()),
            table_id: Some(self.table_id.clone()),
            creation_date_time: Some(creation_time),
            item_count: Some(i64::try_from(item_count).unwrap_or(i64::MAX)),
            table_size_bytes: Some(i64::try_from(table_size_bytes).unwrap_or(i64::MAX)),
            billing_mode_summary: Some(BillingModeSummary {
                billing_mode: Some(self.billing_mode.clone()),
                last_update_to_pay_per_request_date_time: Some(creation_time),
            }),
            provisioned_throughput: Some(self.provisioned_throughput_description()),
            global_secondary_indexes: self
                .gsi_definitions
                .iter()
                .map(|gsi| GlobalSecondaryIndexDescription {
                    index_name: Some(gsi.index_name.clone()),
                    key_schema: gsi.key_schema.clone(),
                    projection: Some(gsi.projection.clone()),
                    index_status: Some(IndexStatus::Active),
                    provisioned_throughput: gsi.provisioned_throughput.as_ref().map(|pt| {
                        ProvisionedThroughputDescription {
                            read_capacity_units: pt.read_capacity_units,
                            write_capacity_units: pt.write_capacity_units,
                            ..Default::default()
                        }
                    }),
                    index_size_bytes: Some(0),
                    item_count: Some(0),
                    index_arn: Some(format!("{}/index/{}", self.arn, gsi.index_name)),
                    ..Default::default()
                })
                .collect(),
            local_secondary_indexes: self
                .lsi_definitions
                .iter()
                .map(|lsi| LocalSecondaryIndexDescription {
                    index_name: Some(lsi.index_name.clone()),
                    key_schema: lsi.key_schema.clone(),
                    projection: Some(lsi.projection.clone()),
                    index_size_bytes: Some(0),
                    item_count: Some(0),
                    index_arn: Some(format!("{}/index/{}", self.arn, lsi.index_name)),
                })
                .collect(),
            stream_specification: self.stream_specification.clone(),
            sse_description: self.sse_specification.as_ref().map(|_| SSEDescription {
                status: Some(SseStatus::Enabled),
                sse_type: Some(SseType::Aes256),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build a stripped `TableDescription` for the `DeleteTable` response.
    ///
    /// Per DynamoDB specification, `DeleteTable` does not include `KeySchema`,
    /// `AttributeDefinitions`, `CreationDateTime`, `GlobalSecondaryIndexes`,
    /// or `LocalSecondaryIndexes` in its response.
    #[must_use]
    pub fn to_delete_description(&self, item_count: u64, table_size_bytes: u64) -> TableDescription {
        #[allow(clippy::cast_precision_loss)]
        let creation_time = self.created_at.timestamp() as f64;
        TableDescription {
            table_name: Some(self.name.clone()),
            table_status: Some(TableStatus::Deleting),
            table_arn: Some(self.arn.clone()),
            table_id: Some(self.table_id.clone()),
            item_count: Some(i64::try_from(item_count).unwrap_or(i64::MAX)),
            table_size_bytes: Some(i64::try_from(table_size_bytes).unwrap_or(i64::MAX)),
            billing_mode_summary: Some(BillingModeSummary {
                billing_mode: Some(self.billing_mode.clone()),
                last_update_to_pay_per_request_date_time: Some(creation_time),
            }),
            provisioned_throughput: Some(self.provisioned_throughput_description()),
            ..Default::default()
        }
    }

    /// Build this table's current `TimeToLiveDescription`.
    #[must_use]
    pub fn to_ttl_description(&self) -> TimeToLiveDescription {
        TimeToLiveDescription {
            time_to_live_status: self.ttl_status.clone(),
            attribute_name: self.ttl_attribute_name.clone(),
        }
    }

    /// Build the `ProvisionedThroughputDescription` for this table.
    fn provisioned_throughput_description(&self) -> ProvisionedThroughputDescription {
        self.provisioned_throughput.as_ref().map_or_else(
            || ProvisionedThroughputDescription {
                read_capacity_units: 0,
                write_capacity_units: 0,
                number_of_decreases_today: Some(0),
                ..Default::default()
            },
            |pt| ProvisionedThroughputDescription {
                read_capacity_units: pt.read_capacity_units,
                write_capacity_units: pt.write_capacity_units,
                number_of_decreases_today: Some(0),
                ..Default::default()
            },
        )
    }
}

fn storage_error_to_validation(e: StorageError) -> DynamoDBError {
    DynamoDBError::internal_error(format!("corrupt table metadata: {e}"))
}
