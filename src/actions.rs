//! Catalog of dashboard actions.
//!
//! Each action modal on the operations dashboards maps to one [`ActionKind`]. The catalog
//! carries what the modal needs to drive the shared task controller: default steps,
//! validation rules, a sample request and the simulated driver cadence.

use crate::model::{DriverSettings, ParamValue, TaskRequest};
use crate::validate::{NumericBound, ValidationRules};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    DeployModel,
    RetrainModel,
    RestartService,
    CalibrateMachine,
    ScaleService,
    ExportReport,
    RestartPipeline,
}

/// Dashboard persona that owns an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    MlEngineering,
    FactoryManagement,
    DevOps,
}

impl Persona {
    pub fn label(self) -> &'static str {
        match self {
            Persona::MlEngineering => "AI/ML engineering",
            Persona::FactoryManagement => "Factory management",
            Persona::DevOps => "IT/DevOps",
        }
    }
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::DeployModel,
        ActionKind::RetrainModel,
        ActionKind::CalibrateMachine,
        ActionKind::ExportReport,
        ActionKind::RestartService,
        ActionKind::ScaleService,
        ActionKind::RestartPipeline,
    ];

    /// Identifier used on the command line and in config files.
    pub fn slug(self) -> &'static str {
        match self {
            ActionKind::DeployModel => "deploy-model",
            ActionKind::RetrainModel => "retrain-model",
            ActionKind::RestartService => "restart-service",
            ActionKind::CalibrateMachine => "calibrate-machine",
            ActionKind::ScaleService => "scale-service",
            ActionKind::ExportReport => "export-report",
            ActionKind::RestartPipeline => "restart-pipeline",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ActionKind::DeployModel => "Deploy model",
            ActionKind::RetrainModel => "Retrain model",
            ActionKind::RestartService => "Restart service",
            ActionKind::CalibrateMachine => "Calibrate machine",
            ActionKind::ScaleService => "Scale service",
            ActionKind::ExportReport => "Export report",
            ActionKind::RestartPipeline => "Restart pipeline",
        }
    }

    pub fn persona(self) -> Persona {
        match self {
            ActionKind::DeployModel | ActionKind::RetrainModel => Persona::MlEngineering,
            ActionKind::CalibrateMachine | ActionKind::ExportReport => {
                Persona::FactoryManagement
            }
            ActionKind::RestartService
            | ActionKind::ScaleService
            | ActionKind::RestartPipeline => Persona::DevOps,
        }
    }

    /// Steps offered by the modal, all selected by default.
    pub fn default_steps(self) -> &'static [&'static str] {
        match self {
            ActionKind::DeployModel => &["validate", "package", "rollout", "verify"],
            ActionKind::RetrainModel => &["prepare-data", "train", "evaluate"],
            ActionKind::CalibrateMachine => &["sensors", "axes", "spindle", "verification"],
            ActionKind::ExportReport => &["collect", "render", "write"],
            ActionKind::RestartPipeline => &["drain", "restart", "backfill"],
            ActionKind::RestartService | ActionKind::ScaleService => &[],
        }
    }

    pub fn default_target(self) -> &'static str {
        match self {
            ActionKind::DeployModel => "defect-detector-v3",
            ActionKind::RetrainModel => "demand-forecast-v7",
            ActionKind::RestartService => "inventory-api",
            ActionKind::CalibrateMachine => "CNC-Mill-04",
            ActionKind::ScaleService => "checkout-service",
            ActionKind::ExportReport => "weekly-oee",
            ActionKind::RestartPipeline => "telemetry-ingest",
        }
    }

    pub fn rules(self) -> ValidationRules {
        let rules = ValidationRules::default();
        match self {
            ActionKind::DeployModel => rules.require_steps().require_field("environment"),
            ActionKind::RetrainModel => rules
                .require_steps()
                .require_field("epochs")
                .bound(NumericBound::new("epochs", 1.0, 500.0)),
            ActionKind::RestartService => rules.require_field("reason"),
            ActionKind::CalibrateMachine => rules
                .require_steps()
                .allow_only(self.default_steps().iter().copied()),
            ActionKind::ScaleService => rules
                .require_field("replicas")
                .bound(NumericBound::new("replicas", 1.0, 50.0)),
            ActionKind::ExportReport => rules.require_steps().require_field("format"),
            ActionKind::RestartPipeline => rules.require_steps(),
        }
    }

    /// Built-in cadence of the simulated progress driver.
    pub fn driver(self) -> DriverSettings {
        let (increment, interval_ms) = match self {
            ActionKind::DeployModel => (10, 300),
            ActionKind::RetrainModel => (10, 500),
            ActionKind::RestartService => (20, 200),
            ActionKind::CalibrateMachine => (10, 400),
            ActionKind::ScaleService => (20, 300),
            ActionKind::ExportReport => (20, 250),
            ActionKind::RestartPipeline => (10, 600),
        };
        DriverSettings {
            increment,
            tick_interval: Duration::from_millis(interval_ms),
        }
    }

    /// Request pre-filled the way the modal opens: default target, all steps, sample params.
    pub fn sample_request(self) -> TaskRequest {
        let request = TaskRequest::new(self, self.default_target())
            .with_steps(self.default_steps().iter().copied());
        match self {
            ActionKind::DeployModel => {
                request.with_param("environment", ParamValue::Text("production".into()))
            }
            ActionKind::RetrainModel => request.with_param("epochs", ParamValue::Number(50.0)),
            ActionKind::RestartService => request.with_param(
                "reason",
                ParamValue::Text("scheduled maintenance".into()),
            ),
            ActionKind::ScaleService => request.with_param("replicas", ParamValue::Number(6.0)),
            ActionKind::ExportReport => {
                request.with_param("format", ParamValue::Text("pdf".into()))
            }
            ActionKind::CalibrateMachine | ActionKind::RestartPipeline => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_request;

    #[test]
    fn sample_requests_pass_their_own_rules() {
        for kind in ActionKind::ALL {
            let request = kind.sample_request();
            assert!(
                validate_request(&request, &kind.rules()).is_ok(),
                "{} sample request should validate",
                kind.slug()
            );
        }
    }

    #[test]
    fn driver_cadence_stays_in_dashboard_range() {
        for kind in ActionKind::ALL {
            let d = kind.driver();
            assert!((10..=20).contains(&d.increment), "{}", kind.slug());
            assert!(d.tick_interval >= Duration::from_millis(200));
            assert!(d.tick_interval <= Duration::from_millis(600));
        }
    }

    #[test]
    fn slugs_match_cli_names() {
        use clap::ValueEnum;
        for kind in ActionKind::ALL {
            let value = kind.to_possible_value().map(|v| v.get_name().to_string());
            assert_eq!(value.as_deref(), Some(kind.slug()));
        }
    }
}
