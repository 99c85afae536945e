use crate::error::StoryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Length caps in UTF-16 code units, the unit browsers report for
/// `String.length`. An emoji outside the BMP counts as two.
pub const MAX_TRAINING_DETAILS_CHARS: usize = 2000;
pub const MAX_PERSONAL_STATEMENT_CHARS: usize = 1000;

const TRAINING_DETAILS_FIELD: &str = "trainingDetails";
const PERSONAL_STATEMENT_FIELD: &str = "personalStatement";
const STRIPPED_CHARS: [char; 5] = ['<', '>', '"', '\'', '&'];

/// The unvalidated request body exactly as clients send it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryFields {
    pub training_details: String,
    pub personal_statement: String,
}

/// Successful handler reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryResponse {
    pub story: String,
}

/// A validated story request. Both fields are non-blank, within their length
/// caps, and free of `< > " ' &`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRequest {
    training_details: String,
    personal_statement: String,
}

impl StoryRequest {
    /// Validates a raw request body.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, StoryError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| StoryError::InvalidFormat)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, StoryError> {
        let Some(object) = value.as_object() else {
            return Err(StoryError::MissingField);
        };
        let training = object.get(TRAINING_DETAILS_FIELD);
        let personal = object.get(PERSONAL_STATEMENT_FIELD);

        if is_blank(training) || is_blank(personal) {
            return Err(StoryError::MissingField);
        }
        let (Some(Value::String(training)), Some(Value::String(personal))) = (training, personal)
        else {
            return Err(StoryError::InvalidFormat);
        };
        if utf16_len(training) > MAX_TRAINING_DETAILS_CHARS
            || utf16_len(personal) > MAX_PERSONAL_STATEMENT_CHARS
        {
            return Err(StoryError::TooLong);
        }

        let training_details = strip_markup_chars(training);
        let personal_statement = strip_markup_chars(personal);
        if training_details.trim().is_empty() || personal_statement.trim().is_empty() {
            return Err(StoryError::MissingField);
        }
        Ok(Self {
            training_details,
            personal_statement,
        })
    }

    pub fn training_details(&self) -> &str {
        &self.training_details
    }

    pub fn personal_statement(&self) -> &str {
        &self.personal_statement
    }
}

impl TryFrom<&StoryFields> for StoryRequest {
    type Error = StoryError;

    fn try_from(fields: &StoryFields) -> Result<Self, Self::Error> {
        let value = serde_json::to_value(fields).map_err(|_| StoryError::InvalidFormat)?;
        Self::from_value(&value)
    }
}

/// Removes the characters `< > " ' &`. This is plain character removal, not
/// HTML escaping.
pub fn strip_markup_chars(input: &str) -> String {
    input.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect()
}

pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

// Absent, null, false, zero and whitespace-only strings all count as missing.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(Value::Number(number)) => number.as_f64() == Some(0.0),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(value: Value) -> Result<StoryRequest, StoryError> {
        StoryRequest::from_value(&value)
    }

    #[test]
    fn accepts_plain_fields() {
        let request = validate(json!({
            "trainingDetails": "Conflict resolution for new managers",
            "personalStatement": "I keep bees on weekends"
        }))
        .unwrap();
        assert_eq!(request.training_details(), "Conflict resolution for new managers");
        assert_eq!(request.personal_statement(), "I keep bees on weekends");
    }

    #[test]
    fn missing_or_blank_fields_are_rejected() {
        let cases = [
            json!({ "personalStatement": "bees" }),
            json!({ "trainingDetails": "sales", "personalStatement": "" }),
            json!({ "trainingDetails": "   \n", "personalStatement": "bees" }),
            json!({ "trainingDetails": null, "personalStatement": "bees" }),
            json!({ "trainingDetails": "sales", "personalStatement": 0 }),
            json!({ "trainingDetails": false, "personalStatement": "bees" }),
            json!(["trainingDetails", "personalStatement"]),
        ];
        for case in cases {
            assert!(
                matches!(validate(case.clone()), Err(StoryError::MissingField)),
                "expected MissingField for {case}"
            );
        }
    }

    #[test]
    fn non_string_fields_are_invalid_format() {
        let cases = [
            json!({ "trainingDetails": 42, "personalStatement": "bees" }),
            json!({ "trainingDetails": "sales", "personalStatement": { "text": "bees" } }),
            json!({ "trainingDetails": ["sales"], "personalStatement": "bees" }),
            json!({ "trainingDetails": true, "personalStatement": "bees" }),
        ];
        for case in cases {
            assert!(
                matches!(validate(case.clone()), Err(StoryError::InvalidFormat)),
                "expected InvalidFormat for {case}"
            );
        }
    }

    #[test]
    fn malformed_json_is_invalid_format() {
        let err = StoryRequest::from_json_slice(b"{\"trainingDetails\": ").unwrap_err();
        assert!(matches!(err, StoryError::InvalidFormat));
    }

    #[test]
    fn length_caps_count_characters_before_stripping() {
        let at_cap = "é".repeat(MAX_TRAINING_DETAILS_CHARS);
        assert!(
            validate(json!({ "trainingDetails": at_cap, "personalStatement": "bees" })).is_ok()
        );

        let over = "a".repeat(MAX_TRAINING_DETAILS_CHARS + 1);
        assert!(matches!(
            validate(json!({ "trainingDetails": over, "personalStatement": "bees" })),
            Err(StoryError::TooLong)
        ));

        // Stripped characters still count toward the cap.
        let personal = "<".repeat(MAX_PERSONAL_STATEMENT_CHARS) + "x";
        assert!(matches!(
            validate(json!({ "trainingDetails": "sales", "personalStatement": personal })),
            Err(StoryError::TooLong)
        ));
    }

    #[test]
    fn astral_characters_count_as_two_units() {
        let half = "🎉".repeat(MAX_PERSONAL_STATEMENT_CHARS / 2);
        assert_eq!(utf16_len(&half), MAX_PERSONAL_STATEMENT_CHARS);
        assert!(validate(json!({ "trainingDetails": "sales", "personalStatement": half })).is_ok());

        let full = "🎉".repeat(MAX_PERSONAL_STATEMENT_CHARS);
        assert!(matches!(
            validate(json!({ "trainingDetails": "sales", "personalStatement": full })),
            Err(StoryError::TooLong)
        ));
    }

    #[test]
    fn strips_markup_characters_from_both_fields() {
        let request = validate(json!({
            "trainingDetails": "<b>Sales</b> & \"closing\"",
            "personalStatement": "I'm a <script>alert('x')</script> fan"
        }))
        .unwrap();
        for field in [request.training_details(), request.personal_statement()] {
            assert!(!field.contains(STRIPPED_CHARS));
        }
        assert_eq!(request.training_details(), "bSales/b  closing");
        assert_eq!(request.personal_statement(), "Im a scriptalert(x)/script fan");
    }

    #[test]
    fn field_made_only_of_markup_characters_is_missing() {
        assert!(matches!(
            validate(json!({ "trainingDetails": "<<>>", "personalStatement": "bees" })),
            Err(StoryError::MissingField)
        ));
    }

    #[test]
    fn story_fields_round_through_validation() {
        let fields = StoryFields {
            training_details: "Time management".into(),
            personal_statement: "I juggle".into(),
        };
        let wire = serde_json::to_value(&fields).unwrap();
        assert_eq!(wire["trainingDetails"], "Time management");
        let request = StoryRequest::try_from(&fields).unwrap();
        assert_eq!(request.personal_statement(), "I juggle");
    }
}
