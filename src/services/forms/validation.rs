use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::{error::ConfigurationError, models::form::FlowStep};

const DEFAULT_SCALE_MIN: f64 = 0.0;
const DEFAULT_SCALE_MAX: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    fn invalid(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Text,
    Number,
    Scale,
    Boolean,
    Choice,
}

impl QuestionKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "scale" => Some(Self::Scale),
            "boolean" => Some(Self::Boolean),
            "choice" => Some(Self::Choice),
            _ => None,
        }
    }
}

/// A step's rules after checking: the question kind and its compiled pattern.
#[derive(Debug, Clone)]
pub struct CheckedRules {
    pub kind: QuestionKind,
    pub pattern: Option<Regex>,
}

/// Check a step's rules are internally consistent.
pub fn check_rules(step: &FlowStep) -> Result<CheckedRules, ConfigurationError> {
    let kind = QuestionKind::parse(&step.kind).ok_or_else(|| {
        ConfigurationError(format!(
            "question '{}' has unknown type '{}'",
            step.question_id, step.kind
        ))
    })?;
    let rules = &step.validation;

    if let (Some(min), Some(max)) = (rules.min, rules.max) {
        if min > max {
            return Err(ConfigurationError(format!(
                "question '{}' has min {min} > max {max}",
                step.question_id
            )));
        }
    }
    if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
        if min > max {
            return Err(ConfigurationError(format!(
                "question '{}' has minLength {min} > maxLength {max}",
                step.question_id
            )));
        }
    }
    let pattern = rules
        .pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| {
            ConfigurationError(format!("question '{}' has invalid pattern: {e}", step.question_id))
        })?;
    if kind == QuestionKind::Choice && rules.options.as_ref().map_or(true, Vec::is_empty) {
        return Err(ConfigurationError(format!(
            "choice question '{}' has no options",
            step.question_id
        )));
    }
    Ok(CheckedRules { kind, pattern })
}

/// Validate one answer against its question.
///
/// `Ok` with `is_valid == false` is the patient's mistake and carries a
/// message meant for them. `Err` means the question itself is broken.
pub fn validate(step: &FlowStep, value: &Value) -> Result<ValidationOutcome, ConfigurationError> {
    let CheckedRules { kind, pattern } = check_rules(step)?;

    if is_empty(value) {
        return Ok(if step.required {
            ValidationOutcome::invalid("This question requires an answer")
        } else {
            ValidationOutcome::ok()
        });
    }

    let rules = &step.validation;
    let outcome = match kind {
        QuestionKind::Text => {
            let Some(text) = as_text(value) else {
                return Ok(ValidationOutcome::invalid("Please answer with text"));
            };
            let len = text.chars().count();
            if rules.min_length.is_some_and(|min| len < min) {
                ValidationOutcome::invalid(format!(
                    "Please enter at least {} characters",
                    rules.min_length.unwrap_or_default()
                ))
            } else if rules.max_length.is_some_and(|max| len > max) {
                ValidationOutcome::invalid(format!(
                    "Please keep your answer under {} characters",
                    rules.max_length.unwrap_or_default()
                ))
            } else if let Some(re) = &pattern {
                if re.is_match(&text) {
                    ValidationOutcome::ok()
                } else {
                    ValidationOutcome::invalid("That answer is not in the expected format")
                }
            } else {
                ValidationOutcome::ok()
            }
        }
        QuestionKind::Number => match numeric(value) {
            None => ValidationOutcome::invalid("Please enter a number"),
            Some(n) => range_check(n, rules.min, rules.max),
        },
        QuestionKind::Scale => match numeric(value) {
            None => ValidationOutcome::invalid("Please choose a number on the scale"),
            Some(n) if n.fract() != 0.0 => ValidationOutcome::invalid("Please choose a whole number"),
            Some(n) => range_check(
                n,
                Some(rules.min.unwrap_or(DEFAULT_SCALE_MIN)),
                Some(rules.max.unwrap_or(DEFAULT_SCALE_MAX)),
            ),
        },
        QuestionKind::Boolean => match boolean(value) {
            Some(_) => ValidationOutcome::ok(),
            None => ValidationOutcome::invalid("Please answer yes or no"),
        },
        QuestionKind::Choice => {
            let options = rules.options.as_deref().unwrap_or_default();
            let picked: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) if rules.multiple => {
                    let strings: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                    if strings.len() != items.len() {
                        return Ok(ValidationOutcome::invalid("Please pick from the listed options"));
                    }
                    strings
                }
                Value::Array(_) => {
                    return Ok(ValidationOutcome::invalid("Please pick a single option"));
                }
                _ => return Ok(ValidationOutcome::invalid("Please pick from the listed options")),
            };
            match picked.iter().find(|p| !options.iter().any(|o| o.as_str() == **p)) {
                Some(bad) => ValidationOutcome::invalid(format!("'{bad}' is not one of the options")),
                None => ValidationOutcome::ok(),
            }
        }
    };
    Ok(outcome)
}

fn range_check(n: f64, min: Option<f64>, max: Option<f64>) -> ValidationOutcome {
    match (min, max) {
        (Some(min), _) if n < min => ValidationOutcome::invalid(format!("Please enter a value of at least {min}")),
        (_, Some(max)) if n > max => ValidationOutcome::invalid(format!("Please enter a value of at most {max}")),
        _ => ValidationOutcome::ok(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric reading of an answer. Chat answers often arrive as strings.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

pub fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" => Some(true),
            "no" | "n" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::form::ValidationRules;
    use serde_json::json;

    fn step(kind: &str, required: bool, validation: ValidationRules) -> FlowStep {
        FlowStep {
            index: 0,
            section_id: "s".into(),
            section_title: "Section".into(),
            question_id: "q".into(),
            text: "Question?".into(),
            kind: kind.into(),
            required,
            validation,
            tag: None,
        }
    }

    fn valid(step: &FlowStep, value: Value) -> bool {
        validate(step, &value).unwrap().is_valid
    }

    #[test]
    fn required_rejects_empty_answers() {
        let s = step("text", true, ValidationRules::default());
        for empty in [Value::Null, json!(""), json!("   "), json!([])] {
            let outcome = validate(&s, &empty).unwrap();
            assert!(!outcome.is_valid);
            assert!(outcome.error.is_some());
        }
        let optional = step("number", false, ValidationRules::default());
        assert!(valid(&optional, Value::Null));
    }

    #[test]
    fn scale_defaults_to_zero_through_ten() {
        let s = step("scale", true, ValidationRules::default());
        assert!(valid(&s, json!(0)));
        assert!(valid(&s, json!(10)));
        assert!(valid(&s, json!("7")));
        assert!(!valid(&s, json!(11)));
        assert!(!valid(&s, json!(-1)));
        assert!(!valid(&s, json!(4.5)));
        assert!(!valid(&s, json!("a lot")));
    }

    #[test]
    fn number_respects_bounds() {
        let s = step(
            "number",
            true,
            ValidationRules { min: Some(0.0), max: Some(24.0), ..Default::default() },
        );
        assert!(valid(&s, json!(7.5)));
        assert!(!valid(&s, json!(25)));
        assert!(!valid(&s, json!(true)));
    }

    #[test]
    fn text_length_and_pattern() {
        let s = step(
            "text",
            true,
            ValidationRules {
                min_length: Some(2),
                max_length: Some(5),
                pattern: Some(r"^[a-z]+$".into()),
                ..Default::default()
            },
        );
        assert!(valid(&s, json!("knee")));
        assert!(!valid(&s, json!("k")));
        assert!(!valid(&s, json!("kneecap")));
        assert!(!valid(&s, json!("KNEE")));
    }

    #[test]
    fn boolean_accepts_yes_no_words() {
        let s = step("boolean", true, ValidationRules::default());
        assert!(valid(&s, json!(true)));
        assert!(valid(&s, json!("Yes")));
        assert!(valid(&s, json!("n")));
        assert!(!valid(&s, json!("maybe")));
    }

    #[test]
    fn choice_single_and_multiple() {
        let options = Some(vec!["swelling".to_string(), "redness".to_string(), "none".to_string()]);
        let single = step("choice", true, ValidationRules { options: options.clone(), ..Default::default() });
        assert!(valid(&single, json!("redness")));
        assert!(!valid(&single, json!("fever")));
        assert!(!valid(&single, json!(["redness"])));

        let multi = step(
            "choice",
            true,
            ValidationRules { options, multiple: true, ..Default::default() },
        );
        assert!(valid(&multi, json!(["swelling", "redness"])));
        assert!(!valid(&multi, json!(["swelling", "fever"])));
        assert!(!valid(&multi, json!(["swelling", 3])));
    }

    #[test]
    fn checked_rules_carry_the_compiled_pattern() {
        let zip = step(
            "text",
            false,
            ValidationRules { pattern: Some(r"^\d{5}$".into()), ..Default::default() },
        );
        let checked = check_rules(&zip).unwrap();
        assert_eq!(checked.kind, QuestionKind::Text);
        let re = checked.pattern.expect("pattern compiled");
        assert!(re.is_match("94110"));
        assert!(valid(&zip, json!("94110")));
        assert!(!valid(&zip, json!("9411")));

        let plain = check_rules(&step("number", false, ValidationRules::default())).unwrap();
        assert!(plain.pattern.is_none());
    }

    #[test]
    fn broken_rules_are_configuration_errors() {
        let unknown = step("slider", false, ValidationRules::default());
        assert!(validate(&unknown, &json!(1)).is_err());

        let inverted = step(
            "number",
            false,
            ValidationRules { min: Some(10.0), max: Some(1.0), ..Default::default() },
        );
        assert!(validate(&inverted, &json!(5)).is_err());

        let bad_regex = step(
            "text",
            false,
            ValidationRules { pattern: Some("([".into()), ..Default::default() },
        );
        assert!(validate(&bad_regex, &json!("x")).is_err());

        let no_options = step("choice", false, ValidationRules::default());
        assert!(validate(&no_options, &json!("x")).is_err());
    }
}
