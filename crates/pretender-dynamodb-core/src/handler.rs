//! DynamoDB handler implementation bridging HTTP to business logic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use pretender_dynamodb_http::body::DynamoDBResponseBody;
use pretender_dynamodb_http::dispatch::DynamoDBHandler;
use pretender_dynamodb_http::response::json_response;
use pretender_dynamodb_model::error::DynamoDBError;
use pretender_dynamodb_model::operations::DynamoDBOperation;

use crate::provider::PretenderDynamoDB;

/// Handler that bridges the HTTP layer to the DynamoDB provider.
#[derive(Debug)]
pub struct PretenderDynamoDBHandler {
    provider: Arc<PretenderDynamoDB>,
}

impl PretenderDynamoDBHandler {
    /// Create a new handler wrapping a provider.
    #[must_use]
    pub fn new(provider: Arc<PretenderDynamoDB>) -> Self {
        Self { provider }
    }
}

impl DynamoDBHandler for PretenderDynamoDBHandler {
    fn handle_operation(
        &self,
        op: DynamoDBOperation,
        body: Bytes,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<http::Response<DynamoDBResponseBody>, DynamoDBError>> + Send,
        >,
    > {
        let provider = Arc::clone(&self.provider);
        Box::pin(async move { dispatch(provider.as_ref(), op, &body).await })
    }
}

/// Dispatch a DynamoDB operation to the appropriate handler method.
async fn dispatch(
    provider: &PretenderDynamoDB,
    op: DynamoDBOperation,
    body: &[u8],
) -> Result<http::Response<DynamoDBResponseBody>, DynamoDBError> {
    // Generate a request ID for responses.
    let request_id = uuid::Uuid::new_v4().to_string();

    match op {
        DynamoDBOperation::CreateTable => {
            let input = deserialize(body)?;
            let output = provider.handle_create_table(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::DeleteTable => {
            let input = deserialize(body)?;
            let output = provider.handle_delete_table(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::DescribeTable => {
            let input = deserialize(body)?;
            let output = provider.handle_describe_table(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::ListTables => {
            let input = deserialize(body)?;
            let output = provider.handle_list_tables(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::UpdateTable => {
            let input = deserialize(body)?;
            let output = provider.handle_update_table(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::UpdateTimeToLive => {
            let input = deserialize(body)?;
            let output = provider.handle_update_time_to_live(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::DescribeTimeToLive => {
            let input = deserialize(body)?;
            let output = provider.handle_describe_time_to_live(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::PutItem => {
            let input = deserialize(body)?;
            let output = provider.handle_put_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::GetItem => {
            let input = deserialize(body)?;
            let output = provider.handle_get_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::UpdateItem => {
            let input = deserialize(body)?;
            let output = provider.handle_update_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::DeleteItem => {
            let input = deserialize(body)?;
            let output = provider.handle_delete_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::Query => {
            let input = deserialize(body)?;
            let output = provider.handle_query(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::Scan => {
            let input = deserialize(body)?;
            let output = provider.handle_scan(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::BatchGetItem => {
            let input = deserialize(body)?;
            let output = provider.handle_batch_get_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::BatchWriteItem => {
            let input = deserialize(body)?;
            let output = provider.handle_batch_write_item(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::TransactWriteItems => {
            let input = deserialize(body)?;
            let output = provider.handle_transact_write_items(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::TransactGetItems => {
            let input = deserialize(body)?;
            let output = provider.handle_transact_get_items(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::ListStreams => {
            let input = deserialize(body)?;
            let output = provider.handle_list_streams(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::DescribeStream => {
            let input = deserialize(body)?;
            let output = provider.handle_describe_stream(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::GetShardIterator => {
            let input = deserialize(body)?;
            let output = provider.handle_get_shard_iterator(input).await?;
            serialize(&output, &request_id)
        }
        DynamoDBOperation::GetRecords => {
            let input = deserialize(body)?;
            let output = provider.handle_get_records(input).await?;
            serialize(&output, &request_id)
        }
    }
}

/// Deserialize a JSON request body into the input type.
fn deserialize<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, DynamoDBError> {
    serde_json::from_slice(body).map_err(|e| {
        DynamoDBError::serialization_exception(format!("Failed to deserialize request body: {e}"))
    })
}

/// Serialize an output type into a JSON HTTP response.
fn serialize<T: serde::Serialize>(
    output: &T,
    request_id: &str,
) -> Result<http::Response<DynamoDBResponseBody>, DynamoDBError> {
    let json = serde_json::to_vec(output)
        .map_err(|e| DynamoDBError::internal_error(format!("Failed to serialize response: {e}")))?;
    Ok(json_response(json, request_id))
}
