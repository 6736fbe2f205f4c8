use crate::error::{AppError, AppResult, QueryError};
use crate::models::{Lead, LeadInput};
use crate::query::{QueryCoordinator, Resource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

/// Resources a successful lead write makes stale
const LEAD_RESOURCES: &[Resource] = &[Resource::Leads, Resource::LeadStats];

/// Upstream collaborator that persists lead edits
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeadWriter: Send + Sync {
    async fn create_lead(&self, input: &LeadInput) -> Result<Lead, QueryError>;
    async fn update_lead(&self, id: &str, input: &LeadInput) -> Result<Lead, QueryError>;
}

/// Lead mutations with targeted cache invalidation.
///
/// Only lead listings and lead stats are invalidated; webhook queries keep
/// their cached results.
#[derive(Clone)]
pub struct LeadService {
    writer: Arc<dyn LeadWriter>,
    coordinator: QueryCoordinator,
}

impl LeadService {
    pub fn new(writer: Arc<dyn LeadWriter>, coordinator: QueryCoordinator) -> Self {
        Self {
            writer,
            coordinator,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_lead(&self, input: LeadInput) -> AppResult<Lead> {
        let has_name = input.name.as_deref().is_some_and(|n| !n.trim().is_empty());
        if !has_name {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if input.email.is_none() {
            return Err(AppError::Validation("email is required".to_string()));
        }
        validate_email(&input)?;

        let lead = self.writer.create_lead(&input).await?;
        info!(lead_id = %lead.id, "Lead created");
        self.coordinator.invalidate(LEAD_RESOURCES);
        Ok(lead)
    }

    #[instrument(skip(self, input))]
    pub async fn update_lead(&self, id: &str, input: LeadInput) -> AppResult<Lead> {
        validate_email(&input)?;

        let lead = self.writer.update_lead(id, &input).await?;
        info!(lead_id = %lead.id, "Lead updated");
        self.coordinator.invalidate(LEAD_RESOURCES);
        Ok(lead)
    }
}

fn validate_email(input: &LeadInput) -> AppResult<()> {
    match input.email.as_deref() {
        Some(email) if !email.contains('@') => Err(AppError::Validation(format!(
            "'{}' is not a valid email address",
            email
        ))),
        _ => Ok(()),
    }
}
