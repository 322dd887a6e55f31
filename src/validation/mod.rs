//! Validation Gateway.
//!
//! Submits a template to a structural validator. Transport or parse failures
//! count as invalid, with the failure as the diagnostic; nothing is ever
//! reported valid unless the validator said so.

pub mod http;
pub mod structural;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpTemplateValidator;
pub use structural::StructuralValidator;

/// Verdict for one template. An invalid outcome is an expected result, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub diagnostic: String,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            diagnostic: String::new(),
        }
    }

    pub fn invalid(diagnostic: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            diagnostic: diagnostic.into(),
        }
    }
}

#[async_trait]
pub trait TemplateValidator: Send + Sync {
    async fn validate(&self, content: &str) -> Result<ValidationOutcome>;
}

pub struct ValidationGateway {
    validator: Arc<dyn TemplateValidator>,
}

impl ValidationGateway {
    pub fn new(validator: Arc<dyn TemplateValidator>) -> Self {
        Self { validator }
    }

    pub async fn validate(&self, content: &str) -> ValidationOutcome {
        match self.validator.validate(content).await {
            Ok(outcome) => {
                if outcome.is_valid {
                    tracing::info!("[validation] template valid");
                } else {
                    tracing::info!("[validation] template invalid: {}", outcome.diagnostic);
                }
                outcome
            }
            Err(e) => {
                tracing::warn!("[validation] validator failed, treating as invalid: {:#}", e);
                ValidationOutcome::invalid(format!("Template validation failed: {:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenValidator;

    #[async_trait]
    impl TemplateValidator for BrokenValidator {
        async fn validate(&self, _content: &str) -> Result<ValidationOutcome> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_validator_failure_is_invalid() {
        let gateway = ValidationGateway::new(Arc::new(BrokenValidator));
        let outcome = gateway.validate("Resources: {}").await;
        assert!(!outcome.is_valid);
        assert!(outcome.diagnostic.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_outcome_passes_through() {
        let gateway = ValidationGateway::new(Arc::new(StructuralValidator));
        let outcome = gateway
            .validate("Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n")
            .await;
        assert_eq!(outcome, ValidationOutcome::valid());
    }
}
