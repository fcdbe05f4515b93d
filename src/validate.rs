//! Request precondition checks.
//!
//! Validation is pure and reports only the first unmet precondition, matching the single
//! blocking notification the dashboards show for a rejected form.

use crate::error::ValidationError;
use crate::model::TaskRequest;

/// Inclusive numeric range a parameter must fall in when present.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericBound {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl NumericBound {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }
}

/// Preconditions declared by an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationRules {
    pub steps_required: bool,
    /// Empty means any step name is accepted.
    pub allowed_steps: Vec<String>,
    pub required_fields: Vec<String>,
    pub bounds: Vec<NumericBound>,
}

impl ValidationRules {
    pub fn require_steps(mut self) -> Self {
        self.steps_required = true;
        self
    }

    pub fn allow_only<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn require_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    pub fn bound(mut self, bound: NumericBound) -> Self {
        self.bounds.push(bound);
        self
    }
}

/// A request that passed validation. Only [`validate_request`] constructs one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    request: TaskRequest,
}

impl ValidatedRequest {
    pub fn request(&self) -> &TaskRequest {
        &self.request
    }

    pub fn step_count(&self) -> usize {
        self.request.step_count()
    }

    pub fn has_steps(&self) -> bool {
        !self.request.steps.is_empty()
    }
}

/// Check `request` against `rules`, failing on the first unmet precondition.
pub fn validate_request(
    request: &TaskRequest,
    rules: &ValidationRules,
) -> Result<ValidatedRequest, ValidationError> {
    if request.target.trim().is_empty() {
        return Err(ValidationError::new("target is required"));
    }

    if rules.steps_required && request.steps.is_empty() {
        return Err(ValidationError::new("at least one step required"));
    }

    if !rules.allowed_steps.is_empty() {
        if let Some(unknown) = request
            .steps
            .iter()
            .find(|s| !rules.allowed_steps.contains(s))
        {
            return Err(ValidationError::new(format!("unknown step: {unknown}")));
        }
    }

    for field in &rules.required_fields {
        match request.params.get(field) {
            Some(v) if !v.is_blank() => {}
            _ => {
                return Err(ValidationError::new(format!(
                    "required field empty: {field}"
                )))
            }
        }
    }

    for bound in &rules.bounds {
        let Some(value) = request.params.get(&bound.field) else {
            continue;
        };
        let Some(n) = value.as_number() else {
            return Err(ValidationError::new(format!(
                "{} must be a number",
                bound.field
            )));
        };
        if n < bound.min || n > bound.max {
            return Err(ValidationError::new(format!(
                "{} must be between {} and {}",
                bound.field, bound.min, bound.max
            )));
        }
    }

    Ok(ValidatedRequest {
        request: request.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use crate::model::ParamValue;

    fn rules() -> ValidationRules {
        ValidationRules::default()
            .require_steps()
            .require_field("environment")
            .bound(NumericBound::new("replicas", 1.0, 50.0))
    }

    fn request() -> TaskRequest {
        TaskRequest::new(ActionKind::DeployModel, "defect-detector-v3")
            .with_steps(["package", "rollout"])
            .with_param("environment", ParamValue::Text("staging".into()))
    }

    #[test]
    fn accepts_complete_request() {
        let validated = validate_request(&request(), &rules()).unwrap();
        assert_eq!(validated.step_count(), 2);
        assert_eq!(validated.request().target, "defect-detector-v3");
    }

    #[test]
    fn empty_selection_is_rejected_when_steps_required() {
        let req = request().with_steps(Vec::<String>::new());
        let err = validate_request(&req, &rules()).unwrap_err();
        assert_eq!(err.reason, "at least one step required");
    }

    #[test]
    fn empty_selection_is_fine_for_atomic_actions() {
        let req = TaskRequest::new(ActionKind::RestartService, "inventory-api")
            .with_param("reason", ParamValue::Text("hotfix".into()));
        let validated = validate_request(&req, &ActionKind::RestartService.rules()).unwrap();
        assert_eq!(validated.step_count(), 1);
        assert!(!validated.has_steps());
    }

    #[test]
    fn reports_only_the_first_failure() {
        // Blank target, no steps and no environment: only the target is reported.
        let req = TaskRequest::new(ActionKind::DeployModel, "  ");
        let err = validate_request(&req, &rules()).unwrap_err();
        assert_eq!(err.reason, "target is required");
    }

    #[test]
    fn blank_text_counts_as_missing() {
        let req = request().with_param("environment", ParamValue::Text("   ".into()));
        let err = validate_request(&req, &rules()).unwrap_err();
        assert_eq!(err.reason, "required field empty: environment");
    }

    #[test]
    fn numeric_bounds_are_inclusive() {
        let ok = request().with_param("replicas", ParamValue::Number(50.0));
        assert!(validate_request(&ok, &rules()).is_ok());

        let too_many = request().with_param("replicas", ParamValue::Number(51.0));
        let err = validate_request(&too_many, &rules()).unwrap_err();
        assert_eq!(err.reason, "replicas must be between 1 and 50");

        let text = request().with_param("replicas", ParamValue::Text("lots".into()));
        let err = validate_request(&text, &rules()).unwrap_err();
        assert_eq!(err.reason, "replicas must be a number");
    }

    #[test]
    fn unknown_steps_are_rejected_when_restricted() {
        let req = TaskRequest::new(ActionKind::CalibrateMachine, "CNC-Mill-04")
            .with_steps(["sensors", "coolant"]);
        let err = validate_request(&req, &ActionKind::CalibrateMachine.rules()).unwrap_err();
        assert_eq!(err.reason, "unknown step: coolant");
    }
}
