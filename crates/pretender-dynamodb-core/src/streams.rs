//! DynamoDB Streams: mutation capture and the shard/iterator consumer API.
//!
//! Every table that has ever had a stream enabled gets exactly one logical
//! shard, identified by the table's stable `table_id`. Capture happens inline
//! with the item write (see [`record_mutation`]), in the same transaction, so
//! a committed write and its stream record are never observed apart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tokio::sync::watch;

use pretender_dynamodb_model::AttributeValue;
use pretender_dynamodb_model::error::DynamoDBError;
use pretender_dynamodb_model::input::{
    DescribeStreamInput, GetRecordsInput, GetShardIteratorInput, ListStreamsInput,
};
use pretender_dynamodb_model::output::{
    DescribeStreamOutput, GetRecordsOutput, GetShardIteratorOutput, ListStreamsOutput,
};
use pretender_dynamodb_model::types::{
    Identity, OperationType, SequenceNumberRange, Shard, ShardIteratorType, StreamDescription,
    StreamDescriptionSummary, StreamRecord, StreamRecordBody, StreamStatus, StreamViewType,
};

use crate::clock::Clock;
use crate::provider::PretenderDynamoDB;
use crate::state::DynamoDBTable;
use crate::storage::{self, StorageError};

/// The single shard identifier every stream in this implementation exposes.
const SHARD_ID: &str = "shardId-00000000000000000000000000000000000000-0000";

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Appends one stream record for a client-originated mutation, gated by the
/// table's current `StreamSpecification`. A no-op if streaming is disabled.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn record_mutation(
    conn: &mut PgConnection,
    table: &DynamoDBTable,
    old_item: Option<&storage::Item>,
    new_item: Option<&storage::Item>,
    clock: &dyn Clock,
) -> Result<(), StorageError> {
    capture(conn, table, old_item, new_item, clock, None).await
}

/// Appends one `REMOVE` stream record for a TTL-originated delete, tagged
/// with a `userIdentity` marker so consumers can distinguish it from a
/// client-originated delete.
///
/// # Errors
///
/// Returns `StorageError::Backend` on any SQL failure.
pub async fn record_ttl_expiry(
    conn: &mut PgConnection,
    table: &DynamoDBTable,
    old_item: &storage::Item,
    clock: &dyn Clock,
    principal: &str,
) -> Result<(), StorageError> {
    let identity = Identity {
        principal_id: Some(principal.to_owned()),
        r#type: Some("Service".to_owned()),
    };
    capture(conn, table, Some(old_item), None, clock, Some(identity)).await
}

async fn capture(
    conn: &mut PgConnection,
    table: &DynamoDBTable,
    old_item: Option<&storage::Item>,
    new_item: Option<&storage::Item>,
    clock: &dyn Clock,
    identity: Option<Identity>,
) -> Result<(), StorageError> {
    let Some(spec) = &table.stream_specification else {
        return Ok(());
    };
    if !spec.stream_enabled {
        return Ok(());
    }
    let view_type = spec.stream_view_type.unwrap_or(StreamViewType::NewAndOldImages);

    let event_name = match (old_item, new_item) {
        (None, Some(_)) => OperationType::Insert,
        (Some(_), Some(_)) => OperationType::Modify,
        (Some(_), None) => OperationType::Remove,
        (None, None) => return Ok(()),
    };

    let source_item = new_item.or(old_item).expect("checked above");
    let keys = extract_key_attributes(table, source_item);

    let new_image = match view_type {
        StreamViewType::NewImage | StreamViewType::NewAndOldImages => new_item.cloned(),
        StreamViewType::KeysOnly | StreamViewType::OldImage => None,
    };
    let old_image = match view_type {
        StreamViewType::OldImage | StreamViewType::NewAndOldImages => old_item.cloned(),
        StreamViewType::KeysOnly | StreamViewType::NewImage => None,
    };

    sqlx::query(
        "INSERT INTO stream_records \
         (stream_id, event_name, keys_json, old_image_json, new_image_json, user_identity_json, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&table.table_id)
    .bind(event_name_str(event_name))
    .bind(Json(&keys))
    .bind(old_image.as_ref().map(Json))
    .bind(new_image.as_ref().map(Json))
    .bind(identity.as_ref().map(Json))
    .bind(clock.now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn extract_key_attributes(table: &DynamoDBTable, item: &storage::Item) -> storage::Item {
    let mut keys = HashMap::new();
    if let Some(v) = item.get(&table.key_schema.partition_key.name) {
        keys.insert(table.key_schema.partition_key.name.clone(), v.clone());
    }
    if let Some(sk) = &table.key_schema.sort_key {
        if let Some(v) = item.get(&sk.name) {
            keys.insert(sk.name.clone(), v.clone());
        }
    }
    keys
}

fn event_name_str(op: OperationType) -> &'static str {
    match op {
        OperationType::Insert => "INSERT",
        OperationType::Modify => "MODIFY",
        OperationType::Remove => "REMOVE",
    }
}

fn event_name_from_str(s: &str) -> Option<OperationType> {
    match s {
        "INSERT" => Some(OperationType::Insert),
        "MODIFY" => Some(OperationType::Modify),
        "REMOVE" => Some(OperationType::Remove),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ARN / label helpers
// ---------------------------------------------------------------------------

/// The stream label is derived from the table's creation time, since this
/// implementation does not separately track the time a stream was last
/// (re-)enabled; a table's stream ARN is therefore stable for its lifetime.
fn stream_label(table: &DynamoDBTable) -> String {
    table.created_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

fn stream_arn(table: &DynamoDBTable) -> String {
    format!("{}/stream/{}", table.arn, stream_label(table))
}

/// Recovers the table name embedded in a stream ARN of the form
/// `arn:aws:dynamodb:<region>:<account>:table/<name>/stream/<label>`.
fn table_name_from_stream_arn(arn: &str) -> Option<&str> {
    arn.split("table/").nth(1)?.split("/stream/").next()
}

fn encode_iterator(table_id: &str, next_sequence: i64) -> String {
    BASE64.encode(format!("{table_id}:{next_sequence}"))
}

fn decode_iterator(token: &str) -> Result<(String, i64), DynamoDBError> {
    let decoded = BASE64
        .decode(token)
        .map_err(|_| invalid_iterator())?;
    let text = String::from_utf8(decoded).map_err(|_| invalid_iterator())?;
    let (table_id, seq) = text.split_once(':').ok_or_else(invalid_iterator)?;
    let seq: i64 = seq.parse().map_err(|_| invalid_iterator())?;
    Ok((table_id.to_owned(), seq))
}

fn invalid_iterator() -> DynamoDBError {
    DynamoDBError::validation("Invalid ShardIterator")
}

// ---------------------------------------------------------------------------
// Consumer API
// ---------------------------------------------------------------------------

impl PretenderDynamoDB {
    /// Handle `ListStreams`.
    pub async fn handle_list_streams(
        &self,
        input: ListStreamsInput,
    ) -> Result<ListStreamsOutput, DynamoDBError> {
        let all_names = self.state.list_table_names().await?;
        let mut summaries = Vec::new();
        for name in &all_names {
            if let Some(ref filter) = input.table_name {
                if filter != name {
                    continue;
                }
            }
            let Some(table) = self.state.get_table(name).await? else {
                continue;
            };
            if !table
                .stream_specification
                .as_ref()
                .is_some_and(|s| s.stream_enabled)
            {
                continue;
            }
            summaries.push(stream_summary(&table));
        }
        summaries.sort_by(|a, b| a.stream_arn.cmp(&b.stream_arn));

        let limit = usize::try_from(input.limit.unwrap_or(100).clamp(1, 100)).unwrap_or(100);
        let start_idx = match &input.exclusive_start_stream_arn {
            Some(start) => summaries
                .iter()
                .position(|s| s.stream_arn.as_deref() > Some(start.as_str()))
                .unwrap_or(summaries.len()),
            None => 0,
        };
        let page: Vec<_> = summaries.into_iter().skip(start_idx).take(limit + 1).collect();
        let (streams, last) = if page.len() > limit {
            let last = page[limit - 1].stream_arn.clone();
            (page[..limit].to_vec(), last)
        } else {
            (page, None)
        };

        Ok(ListStreamsOutput {
            streams,
            last_evaluated_stream_arn: last,
        })
    }

    /// Handle `DescribeStream`.
    pub async fn handle_describe_stream(
        &self,
        input: DescribeStreamInput,
    ) -> Result<DescribeStreamOutput, DynamoDBError> {
        let table = self.resolve_stream(&input.stream_arn).await?;

        let range: Option<(i64,)> = sqlx::query_as(
            "SELECT MIN(sequence_no) FROM stream_records WHERE stream_id = $1",
        )
        .bind(&table.table_id)
        .fetch_optional(self.state.pool())
        .await
        .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let starting = range.map(|(n,)| n.to_string());

        let shard = Shard {
            shard_id: SHARD_ID.to_owned(),
            sequence_number_range: Some(SequenceNumberRange {
                starting_sequence_number: starting,
                ending_sequence_number: None,
            }),
        };

        Ok(DescribeStreamOutput {
            stream_description: Some(StreamDescription {
                stream_arn: Some(stream_arn(&table)),
                stream_label: Some(stream_label(&table)),
                stream_status: Some(StreamStatus::Enabled),
                stream_view_type: table.stream_specification.as_ref().and_then(|s| s.stream_view_type),
                creation_request_date_time: Some(table.created_at.timestamp() as f64),
                table_name: Some(table.name.clone()),
                key_schema: table.key_schema_elements.clone(),
                shards: vec![shard],
                last_evaluated_shard_id: None,
            }),
        })
    }

    /// Handle `GetShardIterator`.
    pub async fn handle_get_shard_iterator(
        &self,
        input: GetShardIteratorInput,
    ) -> Result<GetShardIteratorOutput, DynamoDBError> {
        let table = self.resolve_stream(&input.stream_arn).await?;
        if input.shard_id != SHARD_ID {
            return Err(DynamoDBError::resource_not_found("Shard not found"));
        }

        let next_sequence = match input.shard_iterator_type {
            ShardIteratorType::TrimHorizon => 0,
            ShardIteratorType::Latest => {
                let (max,): (Option<i64>,) = sqlx::query_as(
                    "SELECT MAX(sequence_no) FROM stream_records WHERE stream_id = $1",
                )
                .bind(&table.table_id)
                .fetch_one(self.state.pool())
                .await
                .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;
                max.unwrap_or(0) + 1
            }
            ShardIteratorType::AtSequenceNumber => parse_sequence_number(&input.sequence_number)?,
            ShardIteratorType::AfterSequenceNumber => {
                parse_sequence_number(&input.sequence_number)? + 1
            }
        };

        Ok(GetShardIteratorOutput {
            shard_iterator: Some(encode_iterator(&table.table_id, next_sequence)),
        })
    }

    /// Handle `GetRecords`.
    pub async fn handle_get_records(
        &self,
        input: GetRecordsInput,
    ) -> Result<GetRecordsOutput, DynamoDBError> {
        let (table_id, next_sequence) = decode_iterator(&input.shard_iterator)?;
        let limit = i64::from(input.limit.unwrap_or(1000).clamp(1, 1000));

        let rows: Vec<StreamRecordRow> = sqlx::query_as(
            "SELECT sequence_no, event_name, keys_json, old_image_json, new_image_json, \
                    user_identity_json, created_at \
             FROM stream_records WHERE stream_id = $1 AND sequence_no >= $2 \
             ORDER BY sequence_no ASC LIMIT $3",
        )
        .bind(&table_id)
        .bind(next_sequence)
        .bind(limit)
        .fetch_all(self.state.pool())
        .await
        .map_err(|e| DynamoDBError::internal_error(e.to_string()))?;

        let advanced = rows.last().map(|r| r.sequence_no + 1);
        let records = rows.into_iter().map(StreamRecordRow::into_wire).collect();

        Ok(GetRecordsOutput {
            records,
            next_shard_iterator: Some(encode_iterator(
                &table_id,
                advanced.unwrap_or(next_sequence),
            )),
        })
    }

    /// Resolve a stream ARN to its owning table, verifying the ARN is the
    /// table's current one (stale after e.g. a table recreation).
    async fn resolve_stream(&self, arn: &str) -> Result<Arc<DynamoDBTable>, DynamoDBError> {
        let name = table_name_from_stream_arn(arn)
            .ok_or_else(|| DynamoDBError::resource_not_found("Stream not found"))?;
        let table = self.state.require_table(name).await?;
        if stream_arn(&table) != arn
            || !table
                .stream_specification
                .as_ref()
                .is_some_and(|s| s.stream_enabled)
        {
            return Err(DynamoDBError::resource_not_found("Stream not found"));
        }
        Ok(table)
    }
}

fn stream_summary(table: &DynamoDBTable) -> StreamDescriptionSummary {
    StreamDescriptionSummary {
        stream_arn: Some(stream_arn(table)),
        stream_label: Some(stream_label(table)),
        table_name: Some(table.name.clone()),
        stream_status: Some(StreamStatus::Enabled),
        stream_view_type: table.stream_specification.as_ref().and_then(|s| s.stream_view_type),
        creation_request_date_time: Some(table.created_at.timestamp() as f64),
    }
}

fn parse_sequence_number(raw: &Option<String>) -> Result<i64, DynamoDBError> {
    raw.as_deref()
        .ok_or_else(|| {
            DynamoDBError::validation("SequenceNumber is required for this ShardIteratorType")
        })?
        .parse()
        .map_err(|_| DynamoDBError::validation("Malformed SequenceNumber"))
}

#[derive(sqlx::FromRow)]
struct StreamRecordRow {
    sequence_no: i64,
    event_name: String,
    keys_json: Json<HashMap<String, AttributeValue>>,
    old_image_json: Option<Json<HashMap<String, AttributeValue>>>,
    new_image_json: Option<Json<HashMap<String, AttributeValue>>>,
    user_identity_json: Option<Json<Identity>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl StreamRecordRow {
    fn into_wire(self) -> StreamRecord {
        StreamRecord {
            event_name: event_name_from_str(&self.event_name),
            dynamodb: StreamRecordBody {
                approximate_creation_date_time: Some(self.created_at.timestamp() as f64),
                keys: self.keys_json.0,
                new_image: self.new_image_json.map(|j| j.0),
                old_image: self.old_image_json.map(|j| j.0),
                sequence_number: Some(self.sequence_no.to_string()),
                stream_view_type: None,
            },
            user_identity: self.user_identity_json.map(|j| j.0),
            event_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Retention pruning
// ---------------------------------------------------------------------------

/// Spawns the background worker that prunes stream records older than
/// `retention`, honoring `shutdown` so in-flight sweeps finish before exit.
pub fn spawn_retention_pruner(
    pool: PgPool,
    retention: Duration,
    prune_interval: Duration,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = prune_once(&pool, retention, clock.as_ref()).await {
                        tracing::warn!(error = %e, "stream retention pruning pass failed");
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

async fn prune_once(pool: &PgPool, retention: Duration, clock: &dyn Clock) -> Result<u64, sqlx::Error> {
    let cutoff = clock.now() - chrono::Duration::from_std(retention).unwrap_or_default();
    let result = sqlx::query("DELETE FROM stream_records WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_roundtrip_shard_iterator() {
        let token = encode_iterator("table-123", 42);
        let (table_id, seq) = decode_iterator(&token).unwrap();
        assert_eq!(table_id, "table-123");
        assert_eq!(seq, 42);
    }

    #[test]
    fn test_should_reject_malformed_iterator() {
        assert!(decode_iterator("not-base64!!!").is_err());
    }

    #[test]
    fn test_should_extract_table_name_from_stream_arn() {
        let arn = "arn:aws:dynamodb:us-east-1:000000000000:table/Orders/stream/2024-01-01T00:00:00.000";
        assert_eq!(table_name_from_stream_arn(arn), Some("Orders"));
    }
}
