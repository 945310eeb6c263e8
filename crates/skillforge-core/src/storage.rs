use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{CheckoutBinding, Course, Enrollment, PaymentRecord};

#[derive(Debug, Clone)]
pub struct PaymentUpsert {
    pub user_id: String,
    pub course_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: String,
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Course>>;
    async fn list_active(&self) -> anyhow::Result<Vec<Course>>;
}

// Holds the order-id -> (course, user) binding between order creation and
// checkout completion. `take` must be an atomic remove-and-return so two
// concurrent confirmations cannot both consume the same binding.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn put(&self, order_id: &str, binding: &CheckoutBinding) -> anyhow::Result<()>;
    async fn get(&self, order_id: &str) -> anyhow::Result<Option<CheckoutBinding>>;
    async fn take(&self, order_id: &str) -> anyhow::Result<Option<CheckoutBinding>>;
    async fn delete(&self, order_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn upsert_payment(&self, payment: &PaymentUpsert) -> anyhow::Result<PaymentRecord>;
    async fn enroll_if_absent(&self, user_id: &str, course_id: Uuid) -> anyhow::Result<bool>;
    async fn enrollments_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Enrollment>>;
}
