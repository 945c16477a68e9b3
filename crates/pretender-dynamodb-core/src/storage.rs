//! Postgres-backed item store.
//!
//! The SQL backend is the single source of truth for every item, GSI
//! projection row, and stream record; nothing here is cached in memory.
//! Key values are stored in two forms: a raw byte encoding (`hash_key`,
//! `range_key`) used for equality and for ordering string/binary sort keys,
//! and a `NUMERIC` shadow column (`range_key_n`) used to order number sort
//! keys exactly, without floating-point rounding.
//!
//! Row-level locking for conditional writes goes through [`lock_item`],
//! which callers run inside a transaction before evaluating a condition
//! expression; see the `provider` and `transact` modules.

use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use thiserror::Error;

use pretender_dynamodb_model::AttributeValue;
use pretender_dynamodb_model::types::{
    AttributeDefinition, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType,
};

/// A DynamoDB item: the full set of attributes, including key attributes.
pub type Item = HashMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required key attribute was not found in the item.
    #[error("missing required key attribute: {attr}")]
    MissingKeyAttribute {
        /// The name of the missing attribute.
        attr: String,
    },
    /// A key attribute has the wrong type.
    #[error("key attribute '{attr}' has wrong type: expected {expected}, got {actual}")]
    InvalidKeyType {
        /// The name of the attribute.
        attr: String,
        /// The expected type descriptor.
        expected: String,
        /// The actual type descriptor.
        actual: String,
    },
    /// The backing SQL executor returned an error.
    #[error("backend I/O error: {0}")]
    Backend(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Key types
// ---------------------------------------------------------------------------

/// Parsed key schema for a table or index, containing the partition key
/// definition and an optional sort key definition.
#[derive(Debug, Clone)]
pub struct KeySchema {
    /// Partition (HASH) key name and type.
    pub partition_key: KeyAttribute,
    /// Optional sort (RANGE) key name and type.
    pub sort_key: Option<KeyAttribute>,
}

/// A single key attribute definition with its name and scalar type.
#[derive(Debug, Clone)]
pub struct KeyAttribute {
    /// The attribute name.
    pub name: String,
    /// The scalar type (S, N, or B).
    pub attr_type: ScalarAttributeType,
}

/// A primary key consisting of a partition key and an optional sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// The partition (HASH) key value.
    pub partition_key: AttributeValue,
    /// The optional sort (RANGE) key value.
    pub sort_key: Option<AttributeValue>,
}

/// A condition on a sort key, as extracted from a `KeyConditionExpression`.
#[derive(Debug, Clone)]
pub enum SortCondition {
    /// Sort key equals the given value.
    Eq(AttributeValue),
    /// Sort key is less than the given value.
    Lt(AttributeValue),
    /// Sort key is less than or equal to the given value.
    Le(AttributeValue),
    /// Sort key is greater than the given value.
    Gt(AttributeValue),
    /// Sort key is greater than or equal to the given value.
    Ge(AttributeValue),
    /// Sort key is between the two given values (inclusive).
    Between(AttributeValue, AttributeValue),
    /// Sort key (string) begins with the given prefix.
    BeginsWith(String),
}

// ---------------------------------------------------------------------------
// Key schema parsing
// ---------------------------------------------------------------------------

/// Parse key schema elements and attribute definitions into a [`KeySchema`].
///
/// # Errors
///
/// Returns `StorageError::MissingKeyAttribute` if no HASH element is present,
/// or an attribute referenced by the key schema has no matching definition.
pub fn parse_key_schema(
    elements: &[KeySchemaElement],
    definitions: &[AttributeDefinition],
) -> Result<KeySchema, StorageError> {
    let mut partition_key = None;
    let mut sort_key = None;

    for elem in elements {
        match elem.key_type {
            KeyType::Hash => partition_key = Some(elem.attribute_name.clone()),
            KeyType::Range => sort_key = Some(elem.attribute_name.clone()),
        }
    }

    let pk_name = partition_key.ok_or_else(|| StorageError::MissingKeyAttribute {
        attr: "<HASH key>".to_owned(),
    })?;
    let pk_type = find_attribute_type(definitions, &pk_name)?;

    let sk_attr = match sort_key {
        Some(sk) => {
            let sk_type = find_attribute_type(definitions, &sk)?;
            Some(KeyAttribute {
                name: sk,
                attr_type: sk_type,
            })
        }
        None => None,
    };

    Ok(KeySchema {
        partition_key: KeyAttribute {
            name: pk_name,
            attr_type: pk_type,
        },
        sort_key: sk_attr,
    })
}

fn find_attribute_type(
    definitions: &[AttributeDefinition],
    name: &str,
) -> Result<ScalarAttributeType, StorageError> {
    definitions
        .iter()
        .find(|d| d.attribute_name == name)
        .map(|d| d.attribute_type.clone())
        .ok_or_else(|| StorageError::MissingKeyAttribute {
            attr: name.to_owned(),
        })
}

/// Extracts the primary key from an item according to the key schema.
///
/// # Errors
///
/// Returns `StorageError::MissingKeyAttribute` if a required key attribute
/// is missing, or `StorageError::InvalidKeyType` if a key attribute has
/// the wrong type.
pub fn extract_primary_key(
    key_schema: &KeySchema,
    item: &Item,
) -> Result<PrimaryKey, StorageError> {
    let pk_value = item.get(&key_schema.partition_key.name).ok_or_else(|| {
        StorageError::MissingKeyAttribute {
            attr: key_schema.partition_key.name.clone(),
        }
    })?;
    validate_key_type(
        &key_schema.partition_key.name,
        &key_schema.partition_key.attr_type,
        pk_value,
    )?;

    let sort_key = match &key_schema.sort_key {
        Some(sk_def) => {
            let sk_value =
                item.get(&sk_def.name)
                    .ok_or_else(|| StorageError::MissingKeyAttribute {
                        attr: sk_def.name.clone(),
                    })?;
            validate_key_type(&sk_def.name, &sk_def.attr_type, sk_value)?;
            Some(sk_value.clone())
        }
        None => None,
    };

    Ok(PrimaryKey {
        partition_key: pk_value.clone(),
        sort_key,
    })
}

/// Same as [`extract_primary_key`] but returns `None` on any error, for use
/// against rows already known to be well-formed (read back from storage).
#[must_use]
pub fn extract_primary_key_lossy(key_schema: &KeySchema, item: &Item) -> Option<PrimaryKey> {
    extract_primary_key(key_schema, item).ok()
}

fn validate_key_type(
    attr_name: &str,
    expected: &ScalarAttributeType,
    value: &AttributeValue,
) -> Result<(), StorageError> {
    if matches!(
        (expected, value),
        (ScalarAttributeType::S, AttributeValue::S(_))
            | (ScalarAttributeType::N, AttributeValue::N(_))
            | (ScalarAttributeType::B, AttributeValue::B(_))
    ) {
        Ok(())
    } else {
        Err(StorageError::InvalidKeyType {
            attr: attr_name.to_owned(),
            expected: expected.as_str().to_owned(),
            actual: value.type_descriptor().to_owned(),
        })
    }
}

/// Builds the `LastEvaluatedKey`/`ExclusiveStartKey` wire map from a key
/// schema and the resolved partition/sort values.
#[must_use]
pub fn build_last_evaluated_key(
    key_schema: &KeySchema,
    partition: &AttributeValue,
    sort: Option<&AttributeValue>,
) -> Item {
    let mut key = HashMap::new();
    key.insert(key_schema.partition_key.name.clone(), partition.clone());
    if let (Some(sk), Some(sv)) = (&key_schema.sort_key, sort) {
        key.insert(sk.name.clone(), sv.clone());
    }
    key
}

// ---------------------------------------------------------------------------
// Item size calculation
// ---------------------------------------------------------------------------

/// Calculates the size of a DynamoDB item in bytes, following DynamoDB's
/// item size calculation rules.
#[must_use]
pub fn calculate_item_size(item: &Item) -> u64 {
    item.iter()
        .map(|(name, value)| name.len() as u64 + calculate_value_size(value))
        .sum()
}

#[must_use]
fn calculate_value_size(value: &AttributeValue) -> u64 {
    match value {
        AttributeValue::S(s) => s.len() as u64,
        AttributeValue::N(n) => (n.len().div_ceil(2) + 1) as u64,
        AttributeValue::B(b) => b.len() as u64,
        AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
        AttributeValue::Ss(v) => v.iter().map(|s| s.len() as u64).sum(),
        AttributeValue::Ns(v) => v.iter().map(|n| (n.len().div_ceil(2) + 1) as u64).sum(),
        AttributeValue::Bs(v) => v.iter().map(|b| b.len() as u64).sum(),
        AttributeValue::L(list) => {
            3 + list
                .iter()
                .map(|elem| 1 + calculate_value_size(elem))
                .sum::<u64>()
        }
        AttributeValue::M(map) => {
            3 + map
                .iter()
                .map(|(k, v)| k.len() as u64 + 1 + calculate_value_size(v))
                .sum::<u64>()
        }
    }
}

// ---------------------------------------------------------------------------
// SQL key encoding
// ---------------------------------------------------------------------------

/// Encodes a key-eligible attribute value as raw bytes for the `hash_key` /
/// `range_key` columns. Strings use their UTF-8 bytes (so byte ordering
/// matches DynamoDB's string ordering); binary values use their raw bytes;
/// numbers use their decimal text bytes, which is only used for equality
/// (numeric ordering goes through `range_key_n` instead).
fn encode_key_bytes(value: &AttributeValue) -> Vec<u8> {
    match value {
        AttributeValue::S(s) => s.as_bytes().to_vec(),
        AttributeValue::N(n) => n.as_bytes().to_vec(),
        AttributeValue::B(b) => b.to_vec(),
        _ => Vec::new(),
    }
}

/// Parses a number attribute value into an exact `BigDecimal` for binding
/// to the `NUMERIC` shadow column. Non-number values yield `None`.
fn key_numeric(value: &AttributeValue) -> Option<BigDecimal> {
    match value {
        AttributeValue::N(n) => BigDecimal::from_str(n).ok(),
        _ => None,
    }
}

fn sentinel_range_bytes() -> Vec<u8> {
    Vec::new()
}

/// Returns the exclusive upper bound of a byte-string prefix range, or
/// `None` if the prefix has no upper bound (empty, or all `0xFF` bytes).
fn prefix_upper_bound(prefix: &str) -> Option<Vec<u8>> {
    let mut bytes = prefix.as_bytes().to_vec();
    while bytes.last() == Some(&0xFF) {
        bytes.pop();
    }
    let last = bytes.last_mut()?;
    *last += 1;
    Some(bytes)
}

// ---------------------------------------------------------------------------
// Row-level locking and writes
// ---------------------------------------------------------------------------

/// Locks and fetches an item row within a transaction, for use before
/// evaluating a condition expression.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn lock_item(
    conn: &mut PgConnection,
    table_name: &str,
    key: &PrimaryKey,
) -> Result<Option<Item>, StorageError> {
    let range_bytes = key
        .sort_key
        .as_ref()
        .map_or_else(sentinel_range_bytes, encode_key_bytes);
    let row: Option<(Json<Item>,)> = sqlx::query_as(
        "SELECT payload FROM items WHERE table_name = $1 AND hash_key = $2 AND range_key = $3 \
         FOR UPDATE",
    )
    .bind(table_name)
    .bind(encode_key_bytes(&key.partition_key))
    .bind(range_bytes)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(j,)| j.0))
}

/// Reads an item without locking, for plain `GetItem`/`BatchGetItem` reads.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn get_item<'e, E>(
    executor: E,
    table_name: &str,
    key: &PrimaryKey,
) -> Result<Option<Item>, StorageError>
where
    E: sqlx::PgExecutor<'e>,
{
    let range_bytes = key
        .sort_key
        .as_ref()
        .map_or_else(sentinel_range_bytes, encode_key_bytes);
    let row: Option<(Json<Item>,)> = sqlx::query_as(
        "SELECT payload FROM items WHERE table_name = $1 AND hash_key = $2 AND range_key = $3",
    )
    .bind(table_name)
    .bind(encode_key_bytes(&key.partition_key))
    .bind(range_bytes)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(j,)| j.0))
}

/// Inserts or replaces an item row, along with its TTL epoch if the table
/// has a TTL attribute configured.
///
/// # Errors
///
/// Returns `StorageError` if the item has no valid primary key, or on any
/// SQL failure.
pub async fn write_item(
    conn: &mut PgConnection,
    table_name: &str,
    key_schema: &KeySchema,
    item: &Item,
    ttl_attribute: Option<&str>,
) -> Result<(), StorageError> {
    let pk = extract_primary_key(key_schema, item)?;
    let range_bytes = pk
        .sort_key
        .as_ref()
        .map_or_else(sentinel_range_bytes, encode_key_bytes);
    let range_n = pk.sort_key.as_ref().and_then(key_numeric);
    let ttl_epoch = ttl_attribute.and_then(|attr| match item.get(attr) {
        Some(AttributeValue::N(n)) => n.parse::<i64>().ok(),
        _ => None,
    });

    sqlx::query(
        "INSERT INTO items (table_name, hash_key, range_key, range_key_n, payload, ttl_epoch) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (table_name, hash_key, range_key) \
         DO UPDATE SET range_key_n = EXCLUDED.range_key_n, payload = EXCLUDED.payload, \
                        ttl_epoch = EXCLUDED.ttl_epoch",
    )
    .bind(table_name)
    .bind(encode_key_bytes(&pk.partition_key))
    .bind(range_bytes)
    .bind(range_n)
    .bind(Json(item))
    .bind(ttl_epoch)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deletes an item row by primary key.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn delete_item(
    conn: &mut PgConnection,
    table_name: &str,
    key: &PrimaryKey,
) -> Result<(), StorageError> {
    let range_bytes = key
        .sort_key
        .as_ref()
        .map_or_else(sentinel_range_bytes, encode_key_bytes);
    sqlx::query("DELETE FROM items WHERE table_name = $1 AND hash_key = $2 AND range_key = $3")
        .bind(table_name)
        .bind(encode_key_bytes(&key.partition_key))
        .bind(range_bytes)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Selects up to `limit` items whose TTL epoch has passed, for the TTL sweep.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn select_expired<'e, E>(
    executor: E,
    table_name: &str,
    cutoff_epoch: i64,
    limit: i64,
) -> Result<Vec<Item>, StorageError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows: Vec<(Json<Item>,)> = sqlx::query_as(
        "SELECT payload FROM items \
         WHERE table_name = $1 AND ttl_epoch IS NOT NULL AND ttl_epoch <= $2 \
         ORDER BY ttl_epoch ASC LIMIT $3",
    )
    .bind(table_name)
    .bind(cutoff_epoch)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(j,)| j.0).collect())
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Queries items in a single partition of the base table, with an optional
/// sort key condition.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn query<'e, E>(
    executor: E,
    table_name: &str,
    key_schema: &KeySchema,
    partition_value: &AttributeValue,
    sort_condition: Option<&SortCondition>,
    scan_forward: bool,
    limit: Option<usize>,
    exclusive_start_sort: Option<&AttributeValue>,
) -> Result<(Vec<Item>, Option<PrimaryKey>), StorageError>
where
    E: sqlx::PgExecutor<'e>,
{
    let numeric = is_numeric_sort(key_schema);
    let order_col = sort_column(numeric);

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT payload FROM items WHERE table_name = ");
    qb.push_bind(table_name.to_owned());
    qb.push(" AND hash_key = ");
    qb.push_bind(encode_key_bytes(partition_value));

    if let Some(cond) = sort_condition {
        push_sort_condition(&mut qb, cond, numeric);
    }
    if let Some(start) = exclusive_start_sort {
        qb.push(format!(
            " AND {order_col} {} ",
            if scan_forward { ">" } else { "<" }
        ));
        push_sort_bind(&mut qb, start, numeric);
    }

    qb.push(format!(
        " ORDER BY {order_col} {}",
        if scan_forward { "ASC" } else { "DESC" }
    ));

    let effective_limit = limit.unwrap_or(usize::MAX);
    if let Some(l) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(l + 1).unwrap_or(i64::MAX));
    }

    let mut rows: Vec<(Json<Item>,)> = qb.build_query_as().fetch_all(executor).await?;
    let has_more = limit.is_some() && rows.len() > effective_limit;
    if has_more {
        rows.truncate(effective_limit);
    }

    let last_key = if has_more {
        rows.last().map(|(j,)| {
            let sort = key_schema
                .sort_key
                .as_ref()
                .and_then(|sk| j.0.get(&sk.name).cloned());
            PrimaryKey {
                partition_key: partition_value.clone(),
                sort_key: sort,
            }
        })
    } else {
        None
    };

    Ok((rows.into_iter().map(|(j,)| j.0).collect(), last_key))
}

/// Queries a GSI's projection rows in a single partition.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
#[allow(clippy::too_many_arguments)]
pub async fn query_gsi<'e, E>(
    executor: E,
    table_name: &str,
    index_name: &str,
    gsi_schema: &KeySchema,
    partition_value: &AttributeValue,
    sort_condition: Option<&SortCondition>,
    scan_forward: bool,
    limit: Option<usize>,
    exclusive_start_sort: Option<&AttributeValue>,
) -> Result<(Vec<Item>, Option<PrimaryKey>), StorageError>
where
    E: sqlx::PgExecutor<'e>,
{
    let numeric = is_numeric_sort(gsi_schema);
    let order_col = if numeric { "gsi_range_n" } else { "gsi_range" };

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT payload FROM gsi_projections WHERE table_name = ");
    qb.push_bind(table_name.to_owned());
    qb.push(" AND index_name = ");
    qb.push_bind(index_name.to_owned());
    qb.push(" AND gsi_hash = ");
    qb.push_bind(encode_key_bytes(partition_value));

    if let Some(cond) = sort_condition {
        push_gsi_sort_condition(&mut qb, cond, numeric);
    }
    if let Some(start) = exclusive_start_sort {
        qb.push(format!(
            " AND {order_col} {} ",
            if scan_forward { ">" } else { "<" }
        ));
        push_sort_bind(&mut qb, start, numeric);
    }
    qb.push(format!(
        " ORDER BY {order_col} {}",
        if scan_forward { "ASC" } else { "DESC" }
    ));

    let effective_limit = limit.unwrap_or(usize::MAX);
    if let Some(l) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(l + 1).unwrap_or(i64::MAX));
    }

    let mut rows: Vec<(Json<Item>,)> = qb.build_query_as().fetch_all(executor).await?;
    let has_more = limit.is_some() && rows.len() > effective_limit;
    if has_more {
        rows.truncate(effective_limit);
    }

    let last_key = if has_more {
        rows.last().map(|(j,)| {
            let sort = gsi_schema
                .sort_key
                .as_ref()
                .and_then(|sk| j.0.get(&sk.name).cloned());
            PrimaryKey {
                partition_key: partition_value.clone(),
                sort_key: sort,
            }
        })
    } else {
        None
    };

    Ok((rows.into_iter().map(|(j,)| j.0).collect(), last_key))
}

fn push_sort_condition(qb: &mut QueryBuilder<'_, Postgres>, cond: &SortCondition, numeric: bool) {
    push_sort_condition_on(qb, cond, numeric, sort_column(numeric), "range_key");
}

fn push_gsi_sort_condition(
    qb: &mut QueryBuilder<'_, Postgres>,
    cond: &SortCondition,
    numeric: bool,
) {
    let col = if numeric { "gsi_range_n" } else { "gsi_range" };
    push_sort_condition_on(qb, cond, numeric, col, "gsi_range");
}

fn sort_column(numeric: bool) -> &'static str {
    if numeric { "range_key_n" } else { "range_key" }
}

fn push_sort_condition_on(
    qb: &mut QueryBuilder<'_, Postgres>,
    cond: &SortCondition,
    numeric: bool,
    col: &'static str,
    begins_with_col: &'static str,
) {
    match cond {
        SortCondition::Eq(v) => {
            qb.push(format!(" AND {col} = "));
            push_sort_bind(qb, v, numeric);
        }
        SortCondition::Lt(v) => {
            qb.push(format!(" AND {col} < "));
            push_sort_bind(qb, v, numeric);
        }
        SortCondition::Le(v) => {
            qb.push(format!(" AND {col} <= "));
            push_sort_bind(qb, v, numeric);
        }
        SortCondition::Gt(v) => {
            qb.push(format!(" AND {col} > "));
            push_sort_bind(qb, v, numeric);
        }
        SortCondition::Ge(v) => {
            qb.push(format!(" AND {col} >= "));
            push_sort_bind(qb, v, numeric);
        }
        SortCondition::Between(lo, hi) => {
            qb.push(format!(" AND {col} BETWEEN "));
            push_sort_bind(qb, lo, numeric);
            qb.push(" AND ");
            push_sort_bind(qb, hi, numeric);
        }
        SortCondition::BeginsWith(prefix) => {
            qb.push(format!(" AND {begins_with_col} >= "));
            qb.push_bind(prefix.as_bytes().to_vec());
            if let Some(upper) = prefix_upper_bound(prefix) {
                qb.push(format!(" AND {begins_with_col} < "));
                qb.push_bind(upper);
            }
        }
    }
}

fn push_sort_bind(qb: &mut QueryBuilder<'_, Postgres>, v: &AttributeValue, numeric: bool) {
    if numeric {
        qb.push_bind(key_numeric(v));
    } else {
        qb.push_bind(encode_key_bytes(v));
    }
}

fn is_numeric_sort(key_schema: &KeySchema) -> bool {
    matches!(
        key_schema.sort_key.as_ref().map(|k| &k.attr_type),
        Some(ScalarAttributeType::N)
    )
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Scans the base table, optionally restricted to one segment of a
/// parallel scan.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn scan<'e, E>(
    executor: E,
    table_name: &str,
    key_schema: &KeySchema,
    limit: Option<usize>,
    exclusive_start: Option<&PrimaryKey>,
    segment: Option<i32>,
    total_segments: Option<i32>,
) -> Result<(Vec<Item>, Option<PrimaryKey>), StorageError>
where
    E: sqlx::PgExecutor<'e>,
{
    let numeric = is_numeric_sort(key_schema);
    let order_col = sort_column(numeric);

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT payload FROM items WHERE table_name = ");
    qb.push_bind(table_name.to_owned());

    if let (Some(seg), Some(total)) = (segment, total_segments) {
        if total > 1 {
            qb.push(" AND mod(abs(hashtext(encode(hash_key, 'hex'))), ");
            qb.push_bind(total);
            qb.push(") = ");
            qb.push_bind(seg);
        }
    }

    if let Some(start) = exclusive_start {
        qb.push(format!(" AND (hash_key, {order_col}) > ("));
        qb.push_bind(encode_key_bytes(&start.partition_key));
        qb.push(", ");
        match (&start.sort_key, numeric) {
            (Some(v), true) => {
                qb.push_bind(key_numeric(v));
            }
            (Some(v), false) => {
                qb.push_bind(encode_key_bytes(v));
            }
            (None, _) => {
                qb.push_bind(sentinel_range_bytes());
            }
        }
        qb.push(")");
    }

    qb.push(format!(" ORDER BY hash_key ASC, {order_col} ASC"));

    let effective_limit = limit.unwrap_or(usize::MAX);
    if let Some(l) = limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(l + 1).unwrap_or(i64::MAX));
    }

    let mut rows: Vec<(Json<Item>,)> = qb.build_query_as().fetch_all(executor).await?;
    let has_more = limit.is_some() && rows.len() > effective_limit;
    if has_more {
        rows.truncate(effective_limit);
    }

    let last_key = if has_more {
        rows.last()
            .and_then(|(j,)| extract_primary_key_lossy(key_schema, &j.0))
    } else {
        None
    };

    Ok((rows.into_iter().map(|(j,)| j.0).collect(), last_key))
}

// ---------------------------------------------------------------------------
// GSI maintenance
// ---------------------------------------------------------------------------

/// Re-derives a single GSI's projection row(s) for one base item, deleting
/// the prior projection row first. Runs inline with the base item write, in
/// the same transaction.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure, or `StorageError`
/// variants from resolving the GSI's own key schema.
pub async fn maintain_gsi_projections(
    conn: &mut PgConnection,
    table_name: &str,
    table_key_schema: &KeySchema,
    attribute_definitions: &[AttributeDefinition],
    gsi_definitions: &[GlobalSecondaryIndex],
    base_key: &PrimaryKey,
    new_item: Option<&Item>,
) -> Result<(), StorageError> {
    let base_hash = encode_key_bytes(&base_key.partition_key);
    let base_range = base_key
        .sort_key
        .as_ref()
        .map_or_else(sentinel_range_bytes, encode_key_bytes);

    for gsi in gsi_definitions {
        sqlx::query(
            "DELETE FROM gsi_projections \
             WHERE table_name = $1 AND index_name = $2 AND base_hash = $3 AND base_range = $4",
        )
        .bind(table_name)
        .bind(&gsi.index_name)
        .bind(&base_hash)
        .bind(&base_range)
        .execute(&mut *conn)
        .await?;

        let Some(item) = new_item else { continue };
        let gsi_schema = parse_key_schema(&gsi.key_schema, attribute_definitions)?;
        let Some(gsi_pk) = item.get(&gsi_schema.partition_key.name) else {
            continue; // sparse index: item lacks the GSI's hash attribute
        };
        let gsi_sk = gsi_schema
            .sort_key
            .as_ref()
            .and_then(|sk| item.get(&sk.name));
        if gsi_schema.sort_key.is_some() && gsi_sk.is_none() {
            continue; // sparse index: item lacks the GSI's range attribute
        }

        let payload = project_item(item, &gsi.projection, table_key_schema, &gsi_schema);
        let gsi_range_n = gsi_sk.and_then(key_numeric);
        let gsi_range_bytes = gsi_sk.map_or_else(sentinel_range_bytes, encode_key_bytes);

        sqlx::query(
            "INSERT INTO gsi_projections \
             (table_name, index_name, gsi_hash, gsi_range, gsi_range_n, base_hash, base_range, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(table_name)
        .bind(&gsi.index_name)
        .bind(encode_key_bytes(gsi_pk))
        .bind(gsi_range_bytes)
        .bind(gsi_range_n)
        .bind(&base_hash)
        .bind(&base_range)
        .bind(Json(payload))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Projects an item's attributes per a GSI's `ProjectionType`. The base
/// table's key attributes and the index's own key attributes are always
/// included, regardless of projection type (matching DynamoDB).
fn project_item(
    item: &Item,
    projection: &Projection,
    table_schema: &KeySchema,
    gsi_schema: &KeySchema,
) -> Item {
    let projection_type = projection
        .projection_type
        .clone()
        .unwrap_or(ProjectionType::KeysOnly);

    let mut result = match projection_type {
        ProjectionType::All => item.clone(),
        ProjectionType::KeysOnly => Item::new(),
        ProjectionType::Include => {
            let mut m = Item::new();
            for name in &projection.non_key_attributes {
                if let Some(v) = item.get(name) {
                    m.insert(name.clone(), v.clone());
                }
            }
            m
        }
    };

    for schema in [table_schema, gsi_schema] {
        for key in [Some(&schema.partition_key), schema.sort_key.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Some(v) = item.get(&key.name) {
                result.entry(key.name.clone()).or_insert_with(|| v.clone());
            }
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn string_key_schema() -> KeySchema {
        KeySchema {
            partition_key: KeyAttribute {
                name: "pk".to_owned(),
                attr_type: ScalarAttributeType::S,
            },
            sort_key: None,
        }
    }

    fn composite_key_schema() -> KeySchema {
        KeySchema {
            partition_key: KeyAttribute {
                name: "pk".to_owned(),
                attr_type: ScalarAttributeType::S,
            },
            sort_key: Some(KeyAttribute {
                name: "sk".to_owned(),
                attr_type: ScalarAttributeType::N,
            }),
        }
    }

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn test_should_extract_primary_key() {
        let schema = composite_key_schema();
        let item = make_item(&[
            ("pk", AttributeValue::S("user1".to_owned())),
            ("sk", AttributeValue::N("5".to_owned())),
        ]);
        let pk = extract_primary_key(&schema, &item).unwrap();
        assert_eq!(pk.partition_key, AttributeValue::S("user1".to_owned()));
        assert_eq!(pk.sort_key, Some(AttributeValue::N("5".to_owned())));
    }

    #[test]
    fn test_should_error_on_missing_key() {
        let schema = string_key_schema();
        let item = make_item(&[("name", AttributeValue::S("Alice".to_owned()))]);
        let err = extract_primary_key(&schema, &item).unwrap_err();
        assert!(matches!(err, StorageError::MissingKeyAttribute { attr } if attr == "pk"));
    }

    #[test]
    fn test_should_error_on_invalid_key_type() {
        let schema = string_key_schema();
        let item = make_item(&[("pk", AttributeValue::N("123".to_owned()))]);
        let err = extract_primary_key(&schema, &item).unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidKeyType { attr, expected, actual }
                if attr == "pk" && expected == "S" && actual == "N"
        ));
    }

    #[test]
    fn test_should_calculate_item_size() {
        let item = make_item(&[
            ("pk", AttributeValue::S("hello".to_owned())),
            ("age", AttributeValue::N("25".to_owned())),
        ]);
        assert_eq!(calculate_item_size(&item), 12);
    }

    #[test]
    fn test_should_encode_numeric_key_exactly() {
        // "1" and "1.00" are numerically equal; BigDecimal must agree.
        assert_eq!(
            key_numeric(&AttributeValue::N("1".to_owned())),
            key_numeric(&AttributeValue::N("1.00".to_owned()))
        );
    }

    #[test]
    fn test_should_compute_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(""), None);
    }

    #[test]
    fn test_should_project_keys_only() {
        let table_schema = composite_key_schema();
        let gsi_schema = KeySchema {
            partition_key: KeyAttribute {
                name: "gsi_pk".to_owned(),
                attr_type: ScalarAttributeType::S,
            },
            sort_key: None,
        };
        let item = make_item(&[
            ("pk", AttributeValue::S("u1".to_owned())),
            ("sk", AttributeValue::N("1".to_owned())),
            ("gsi_pk", AttributeValue::S("g1".to_owned())),
            ("extra", AttributeValue::S("hidden".to_owned())),
        ]);
        let projection = Projection {
            projection_type: Some(ProjectionType::KeysOnly),
            non_key_attributes: Vec::new(),
        };
        let projected = project_item(&item, &projection, &table_schema, &gsi_schema);
        assert!(!projected.contains_key("extra"));
        assert!(projected.contains_key("pk"));
        assert!(projected.contains_key("sk"));
        assert!(projected.contains_key("gsi_pk"));
    }
}
