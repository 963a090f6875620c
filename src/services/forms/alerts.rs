use serde_json::Value;

use crate::{
    models::form::{Alert, AlertSeverity, FlowStep},
    services::forms::validation,
};

pub const PAIN_TAG: &str = "pain_score";

/// A clinical check run against every accepted answer.
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, step: &FlowStep, value: &Value) -> Option<Alert>;
}

/// Pain at or above the threshold on a pain-scale question.
pub struct PainThresholdRule {
    pub threshold: f64,
}

impl PainThresholdRule {
    fn applies(step: &FlowStep) -> bool {
        if step.tag.as_deref() == Some(PAIN_TAG) {
            return true;
        }
        step.kind.eq_ignore_ascii_case("scale") && step.text.to_lowercase().contains("pain")
    }
}

impl AlertRule for PainThresholdRule {
    fn name(&self) -> &'static str {
        "pain_threshold"
    }

    fn evaluate(&self, step: &FlowStep, value: &Value) -> Option<Alert> {
        if !Self::applies(step) {
            return None;
        }
        let score = validation::numeric(value)?;
        if score < self.threshold {
            return None;
        }
        let severity = if score >= self.threshold + 2.0 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        };
        Some(Alert {
            rule: self.name().to_string(),
            severity,
            question_id: step.question_id.clone(),
            message: format!("Patient reported pain {score} (threshold {})", self.threshold),
            value: value.clone(),
        })
    }
}

/// Answers the template author marked as needing follow-up.
pub struct FlaggedAnswerRule;

fn matches_flag(flag: &Value, value: &Value) -> bool {
    match (flag, value) {
        (Value::String(f), Value::String(v)) => f.trim().eq_ignore_ascii_case(v.trim()),
        (f, Value::Array(items)) => items.iter().any(|v| matches_flag(f, v)),
        (Value::Bool(f), v) => validation::boolean(v) == Some(*f),
        (Value::Number(_), v) => validation::numeric(flag) == validation::numeric(v),
        (f, v) => f == v,
    }
}

impl AlertRule for FlaggedAnswerRule {
    fn name(&self) -> &'static str {
        "flagged_answer"
    }

    fn evaluate(&self, step: &FlowStep, value: &Value) -> Option<Alert> {
        let flags = step.validation.alert_values.as_ref()?;
        flags.iter().find(|f| matches_flag(f, value))?;
        Some(Alert {
            rule: self.name().to_string(),
            severity: AlertSeverity::Medium,
            question_id: step.question_id.clone(),
            message: format!("Flagged answer to \"{}\"", step.text),
            value: value.clone(),
        })
    }
}

pub struct AlertEngine {
    rules: Vec<Box<dyn AlertRule>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<Box<dyn AlertRule>>) -> Self {
        Self { rules }
    }

    pub fn with_defaults(pain_threshold: f64) -> Self {
        Self::new(vec![
            Box::new(PainThresholdRule { threshold: pain_threshold }),
            Box::new(FlaggedAnswerRule),
        ])
    }

    pub fn evaluate(&self, step: &FlowStep, value: &Value) -> Vec<Alert> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(step, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::form::ValidationRules;
    use serde_json::json;

    fn step(kind: &str, text: &str, tag: Option<&str>, validation: ValidationRules) -> FlowStep {
        FlowStep {
            index: 0,
            section_id: "s".into(),
            section_title: String::new(),
            question_id: "q1".into(),
            text: text.into(),
            kind: kind.into(),
            required: true,
            validation,
            tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn pain_at_threshold_raises_alert() {
        let engine = AlertEngine::with_defaults(7.0);
        let s = step("scale", "Rate your knee pain", None, ValidationRules::default());
        assert!(engine.evaluate(&s, &json!(6)).is_empty());

        let alerts = engine.evaluate(&s, &json!(7));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, "pain_threshold");
        assert_eq!(alerts[0].severity, AlertSeverity::High);

        let alerts = engine.evaluate(&s, &json!("10"));
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn pain_tag_applies_regardless_of_wording() {
        let rule = PainThresholdRule { threshold: 7.0 };
        let tagged = step("number", "How are you today?", Some(PAIN_TAG), ValidationRules::default());
        assert!(rule.evaluate(&tagged, &json!(8)).is_some());

        let unrelated = step("scale", "How well did you sleep?", None, ValidationRules::default());
        assert!(rule.evaluate(&unrelated, &json!(9)).is_none());
    }

    #[test]
    fn flagged_answers_match_loosely() {
        let rules = ValidationRules {
            alert_values: Some(vec![json!("Redness"), json!(true)]),
            ..Default::default()
        };
        let s = step("choice", "Any wound changes?", None, rules);
        let rule = FlaggedAnswerRule;
        assert!(rule.evaluate(&s, &json!("redness")).is_some());
        assert!(rule.evaluate(&s, &json!(["none", "redness"])).is_some());
        assert!(rule.evaluate(&s, &json!("yes")).is_some());
        assert!(rule.evaluate(&s, &json!("none")).is_none());
    }
}
