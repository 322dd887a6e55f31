//! Local structural check for CloudFormation templates.
//!
//! Accepts YAML or JSON. Short-form intrinsic tags (`!Ref`, `!Sub`,
//! `!GetAtt`, ...) parse as tagged values and are not interpreted.

use anyhow::Result;
use async_trait::async_trait;
use serde_yaml::Value;

use super::{TemplateValidator, ValidationOutcome};

pub struct StructuralValidator;

impl StructuralValidator {
    pub fn check(content: &str) -> ValidationOutcome {
        if content.trim().is_empty() {
            return ValidationOutcome::invalid("Template format error: template is empty");
        }

        let document: Value = match serde_yaml::from_str(content) {
            Ok(document) => document,
            Err(e) => {
                return ValidationOutcome::invalid(format!(
                    "Template format error: YAML not well-formed. {}",
                    e
                ))
            }
        };

        let Value::Mapping(root) = document else {
            return ValidationOutcome::invalid("Template format error: template is not a mapping");
        };

        let resources = match root.get("Resources") {
            Some(Value::Mapping(resources)) if !resources.is_empty() => resources,
            _ => return ValidationOutcome::invalid("Template format error: Missing Resources"),
        };

        for (name, resource) in resources {
            let name = name.as_str().unwrap_or("?");
            let has_type = resource
                .as_mapping()
                .and_then(|r| r.get("Type"))
                .and_then(Value::as_str)
                .is_some_and(|t| !t.is_empty());
            if !has_type {
                return ValidationOutcome::invalid(format!(
                    "Template format error: [/Resources/{}] Every Resources object must contain a Type member.",
                    name
                ));
            }
        }

        ValidationOutcome::valid()
    }
}

#[async_trait]
impl TemplateValidator for StructuralValidator {
    async fn validate(&self, content: &str) -> Result<ValidationOutcome> {
        Ok(Self::check(content))
    }
}
