use serde::Serialize;

use crate::buffer::OutputBuffer;
use crate::errors::WriteResult;
use crate::response::Response;

use super::ResultValue;

/// Envelope for handler data sent back as JSON.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ActionResult {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: serde_json::Value,
    pub url: String,
    pub id: String,
}

impl ActionResult {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn error(code: i32, error: &str) -> Self {
        Self {
            code,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Serializes straight into the output buffer, so the length is measured.
pub struct JsonResult<T> {
    value: T,
}

impl<T: Serialize> JsonResult<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> ResultValue for JsonResult<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn length(&self) -> Option<usize> {
        None
    }

    fn write(&self, out: &mut OutputBuffer, _response: &Response) -> WriteResult {
        serde_json::to_writer(out, &self.value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_action_result_json() {
        let action = ActionResult {
            url: "/users".to_string(),
            id: "abc".to_string(),
            ..ActionResult::new(json!([1, 2]))
        };

        assert_eq!(
            serde_json::to_string(&action).unwrap(),
            r#"{"code":0,"data":[1,2],"url":"/users","id":"abc"}"#
        );
    }

    #[test]
    fn test_action_result_error_json() {
        let action = ActionResult::error(17, "no such user");

        assert_eq!(
            serde_json::to_string(&action).unwrap(),
            r#"{"code":17,"error":"no such user","data":null,"url":"","id":""}"#
        );
    }
}
