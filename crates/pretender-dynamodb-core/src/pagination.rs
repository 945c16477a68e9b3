//! `ExclusiveStartKey` / `LastEvaluatedKey` validation.
//!
//! DynamoDB treats the start key of a paginated `Query`/`Scan` as an opaque
//! token to the caller, but it is really just the raw key attribute map of
//! the last item returned. A request replaying a stale or hand-crafted
//! token must be rejected with a `ValidationException` rather than silently
//! misbehaving, so every shape/type check DynamoDB itself performs is
//! reproduced here.

use std::collections::HashMap;

use pretender_dynamodb_model::AttributeValue;
use pretender_dynamodb_model::error::{DynamoDBError, DynamoDBErrorCode};

use crate::storage::KeySchema;

/// Validates an `ExclusiveStartKey` against a table or index key schema,
/// returning the partition and (optional) sort key values on success.
///
/// # Errors
///
/// Returns a `ValidationException` if the key map is missing a required
/// key attribute, has an extra attribute, or a key attribute has the
/// wrong type.
pub fn validate_start_key(
    key_schema: &KeySchema,
    start_key: &HashMap<String, AttributeValue>,
) -> Result<(AttributeValue, Option<AttributeValue>), DynamoDBError> {
    let expected_attrs = 1 + usize::from(key_schema.sort_key.is_some());
    if start_key.len() != expected_attrs {
        return Err(validation_error(
            "The provided starting key is not valid for this table/index",
        ));
    }

    let partition = require_typed(
        start_key,
        &key_schema.partition_key.name,
        &key_schema.partition_key.attr_type,
    )?;

    let sort = match &key_schema.sort_key {
        Some(sk) => Some(require_typed(start_key, &sk.name, &sk.attr_type)?),
        None => None,
    };

    Ok((partition, sort))
}

fn require_typed(
    map: &HashMap<String, AttributeValue>,
    name: &str,
    expected: &pretender_dynamodb_model::types::ScalarAttributeType,
) -> Result<AttributeValue, DynamoDBError> {
    let value = map.get(name).ok_or_else(|| {
        validation_error(format!(
            "The provided starting key is missing required key attribute: {name}"
        ))
    })?;

    let matches = matches!(
        (expected, value),
        (pretender_dynamodb_model::types::ScalarAttributeType::S, AttributeValue::S(_))
            | (pretender_dynamodb_model::types::ScalarAttributeType::N, AttributeValue::N(_))
            | (pretender_dynamodb_model::types::ScalarAttributeType::B, AttributeValue::B(_))
    );
    if !matches {
        return Err(validation_error(format!(
            "The provided starting key has an invalid type for key attribute: {name}"
        )));
    }

    Ok(value.clone())
}

fn validation_error(msg: impl Into<String>) -> DynamoDBError {
    DynamoDBError::with_message(DynamoDBErrorCode::ValidationException, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyAttribute;
    use pretender_dynamodb_model::types::ScalarAttributeType;

    fn schema() -> KeySchema {
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

    #[test]
    fn test_should_validate_well_formed_start_key() {
        let mut key = HashMap::new();
        key.insert("pk".to_owned(), AttributeValue::S("a".to_owned()));
        key.insert("sk".to_owned(), AttributeValue::N("1".to_owned()));
        let (pk, sk) = validate_start_key(&schema(), &key).unwrap();
        assert_eq!(pk, AttributeValue::S("a".to_owned()));
        assert_eq!(sk, Some(AttributeValue::N("1".to_owned())));
    }

    #[test]
    fn test_should_reject_missing_sort_key() {
        let mut key = HashMap::new();
        key.insert("pk".to_owned(), AttributeValue::S("a".to_owned()));
        assert!(validate_start_key(&schema(), &key).is_err());
    }

    #[test]
    fn test_should_reject_wrong_type() {
        let mut key = HashMap::new();
        key.insert("pk".to_owned(), AttributeValue::N("1".to_owned()));
        key.insert("sk".to_owned(), AttributeValue::N("1".to_owned()));
        assert!(validate_start_key(&schema(), &key).is_err());
    }

    #[test]
    fn test_should_reject_extra_attribute() {
        let mut key = HashMap::new();
        key.insert("pk".to_owned(), AttributeValue::S("a".to_owned()));
        key.insert("sk".to_owned(), AttributeValue::N("1".to_owned()));
        key.insert("extra".to_owned(), AttributeValue::S("x".to_owned()));
        assert!(validate_start_key(&schema(), &key).is_err());
    }
}
