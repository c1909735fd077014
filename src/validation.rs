//! Declarative validation for request payloads.
//!
//! Payload types describe their fields through [`Validate`]; a [`Validator`]
//! built once at startup walks those descriptions, normalising strings and
//! collecting per-field error codes keyed by each field's public name.

use serde::Deserialize;

use crate::error::{AppError, AppResult, ErrorCode, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Strip surrounding whitespace before the remaining rules run.
    Trim,
    Required,
    /// The value, when present, must be a finite number.
    Number,
}

/// A number that may arrive as a JSON number or as multipart text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberInput {
    Float(f64),
    Text(String),
}

impl NumberInput {
    pub fn value(&self) -> Option<f64> {
        let parsed = match self {
            NumberInput::Float(value) => Some(*value),
            NumberInput::Text(text) => text.trim().parse::<f64>().ok(),
        };
        parsed.filter(|value| value.is_finite())
    }
}

pub enum FieldValue<'a> {
    Text(&'a mut String),
    Number(&'a Option<NumberInput>),
}

pub struct Field<'a> {
    pub name: &'static str,
    pub value: FieldValue<'a>,
    pub rules: &'static [Rule],
}

impl<'a> Field<'a> {
    pub fn text(name: &'static str, value: &'a mut String, rules: &'static [Rule]) -> Self {
        Self {
            name,
            value: FieldValue::Text(value),
            rules,
        }
    }

    pub fn number(
        name: &'static str,
        value: &'a Option<NumberInput>,
        rules: &'static [Rule],
    ) -> Self {
        Self {
            name,
            value: FieldValue::Number(value),
            rules,
        }
    }
}

pub trait Validate {
    fn fields(&mut self) -> Vec<Field<'_>>;
}

/// Held by `AppState`; the home for rule configuration once any is needed.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    _private: (),
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an empty map when every field passes.
    pub fn check<T: Validate>(&self, payload: &mut T) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for field in payload.fields() {
            if !self.field_passes(field.value, field.rules) {
                errors.insert(field.name.to_string(), ErrorCode::Invalid);
            }
        }
        errors
    }

    pub fn validate<T: Validate>(&self, payload: &mut T) -> AppResult<()> {
        let errors = self.check(payload);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Fields(errors))
        }
    }

    fn field_passes(&self, value: FieldValue<'_>, rules: &[Rule]) -> bool {
        match value {
            FieldValue::Text(text) => {
                if rules.contains(&Rule::Trim) {
                    let trimmed = text.trim();
                    if trimmed.len() != text.len() {
                        *text = trimmed.to_string();
                    }
                }
                if rules.contains(&Rule::Number) && text.trim().parse::<f64>().is_err() {
                    return false;
                }
                !(rules.contains(&Rule::Required) && text.is_empty())
            }
            FieldValue::Number(number) => match number {
                None => !rules.contains(&Rule::Required),
                Some(input) => !rules.contains(&Rule::Number) || input.value().is_some(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample {
        text: String,
        note: String,
        w: Option<NumberInput>,
    }

    impl Validate for Sample {
        fn fields(&mut self) -> Vec<Field<'_>> {
            vec![
                Field::text("text", &mut self.text, &[Rule::Trim, Rule::Required]),
                Field::text("note", &mut self.note, &[Rule::Trim]),
                Field::number("w", &self.w, &[Rule::Required, Rule::Number]),
            ]
        }
    }

    #[test]
    fn trims_before_checking_required() {
        let validator = Validator::new();
        let mut sample = Sample {
            text: "  hello ".into(),
            note: " n ".into(),
            w: Some(NumberInput::Float(1080.0)),
        };
        assert!(validator.check(&mut sample).is_empty());
        assert_eq!(sample.text, "hello");
        assert_eq!(sample.note, "n");
    }

    #[test]
    fn whitespace_only_text_is_invalid() {
        let validator = Validator::new();
        let mut sample = Sample {
            text: "   ".into(),
            w: Some(NumberInput::Float(1.0)),
            ..Default::default()
        };
        let errors = validator.check(&mut sample);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("text"), Some(&ErrorCode::Invalid));
    }

    #[test]
    fn numbers_accept_numeric_text() {
        let validator = Validator::new();
        let mut sample = Sample {
            text: "t".into(),
            w: Some(NumberInput::Text(" 100.5 ".into())),
            ..Default::default()
        };
        assert!(validator.validate(&mut sample).is_ok());
        assert_eq!(sample.w.as_ref().and_then(NumberInput::value), Some(100.5));
    }

    #[test]
    fn missing_or_non_numeric_numbers_are_invalid() {
        let validator = Validator::new();
        let mut missing = Sample {
            text: "t".into(),
            ..Default::default()
        };
        assert_eq!(
            validator.check(&mut missing).get("w"),
            Some(&ErrorCode::Invalid)
        );

        let mut garbage = Sample {
            text: "t".into(),
            w: Some(NumberInput::Text("wide".into())),
            ..Default::default()
        };
        match validator.validate(&mut garbage) {
            Err(AppError::Fields(fields)) => {
                assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["w"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn number_input_deserializes_from_json_and_text() {
        let from_number: NumberInput = serde_json::from_str("12").unwrap();
        let from_text: NumberInput = serde_json::from_str("\"12\"").unwrap();
        assert_eq!(from_number.value(), Some(12.0));
        assert_eq!(from_text.value(), Some(12.0));
    }
}
