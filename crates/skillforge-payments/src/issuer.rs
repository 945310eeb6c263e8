use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use skillforge_core::{CheckoutBinding, CheckoutStore, CourseCatalog, receipt_id, to_minor_units};

use crate::error::{PipelineError, Result};
use crate::gateway::{CreateGatewayOrder, OrderNotes, PaymentGateway};

// Identity verified by the upstream auth layer. This service never
// authenticates anyone itself.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub course_title: String,
}

pub struct OrderIssuer {
    catalog: Arc<dyn CourseCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    checkout: Arc<dyn CheckoutStore>,
}

impl OrderIssuer {
    pub fn new(
        catalog: Arc<dyn CourseCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        checkout: Arc<dyn CheckoutStore>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            checkout,
        }
    }

    pub async fn create_order(
        &self,
        course_slug: &str,
        user: &AuthenticatedUser,
    ) -> Result<CheckoutOrder> {
        if user.id.trim().is_empty() {
            return Err(PipelineError::Unauthenticated);
        }

        let slug = course_slug.trim();
        if slug.is_empty() {
            return Err(PipelineError::Validation("course_slug is required".to_string()));
        }

        let course = self
            .catalog
            .find_by_slug(slug)
            .await?
            .filter(|course| course.active)
            .ok_or(PipelineError::NotFound("course"))?;

        let amount = to_minor_units(course.price, &course.currency)
            .map_err(|err| PipelineError::Validation(err.to_string()))?;
        let receipt = receipt_id(&course.id.to_string(), Utc::now());

        let order = self
            .gateway
            .create_order(&CreateGatewayOrder {
                amount,
                currency: course.currency.clone(),
                receipt,
                notes: OrderNotes {
                    course_id: Some(course.id.to_string()),
                    user_id: Some(user.id.clone()),
                },
            })
            .await?;

        // The binding must be durable before the order id leaves this
        // function; a confirmation can arrive as soon as the caller sees it.
        let binding = CheckoutBinding {
            course_id: course.id,
            user_id: user.id.clone(),
            user_email: user.email.clone(),
        };
        self.checkout.put(&order.id, &binding).await?;

        Ok(CheckoutOrder {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            course_title: course.title,
        })
    }
}
