use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::{Document, Value};

/// Catalog options of a collection.
///
/// Parsing is strict about the fields it knows (a wrong type is an error)
/// and ignores fields it does not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionOptions {
    pub capped: bool,
    pub size: Option<i64>,
    pub max: Option<i64>,
    pub temp: bool,
    pub validator: Option<Document>,
    pub validation_level: Option<String>,
    pub validation_action: Option<String>,
    pub collation: Option<Document>,
}

impl CollectionOptions {
    pub fn parse(doc: &Document) -> Result<Self, CoreError> {
        let mut options = CollectionOptions::default();
        for (key, value) in doc.iter() {
            match key {
                "capped" => options.capped = expect_bool(key, value)?,
                "temp" => options.temp = expect_bool(key, value)?,
                "size" => options.size = Some(expect_number(key, value)?),
                "max" => options.max = Some(expect_number(key, value)?),
                "validator" => options.validator = Some(expect_document(key, value)?),
                "collation" => options.collation = Some(expect_document(key, value)?),
                "validationLevel" => {
                    let level = expect_str(key, value)?;
                    if !matches!(level, "off" | "moderate" | "strict") {
                        return Err(CoreError::InvalidData(format!("invalid validationLevel: {level}")));
                    }
                    options.validation_level = Some(level.to_string());
                }
                "validationAction" => {
                    let action = expect_str(key, value)?;
                    if !matches!(action, "warn" | "error") {
                        return Err(CoreError::InvalidData(format!("invalid validationAction: {action}")));
                    }
                    options.validation_action = Some(action.to_string());
                }
                _ => {}
            }
        }
        Ok(options)
    }
}

fn wrong_type(key: &str, expected: &str, value: &Value) -> CoreError {
    CoreError::InvalidData(format!(
        "option '{key}' must be {expected}, got {}",
        value.type_name()
    ))
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, CoreError> {
    value.as_bool().ok_or_else(|| wrong_type(key, "a bool", value))
}

fn expect_number(key: &str, value: &Value) -> Result<i64, CoreError> {
    value.as_i64().ok_or_else(|| wrong_type(key, "a number", value))
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, CoreError> {
    value.as_str().ok_or_else(|| wrong_type(key, "a string", value))
}

fn expect_document(key: &str, value: &Value) -> Result<Document, CoreError> {
    value
        .as_document()
        .cloned()
        .ok_or_else(|| wrong_type(key, "an object", value))
}
