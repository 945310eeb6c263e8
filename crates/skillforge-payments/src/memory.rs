//! In-memory implementations of the pipeline's storage and collaborator
//! seams. Single-process only; used by tests and local experimentation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use skillforge_core::{
    CheckoutBinding, CheckoutStore, Course, CourseCatalog, Enrollment, LedgerStore, PaymentRecord,
    PaymentUpsert,
};

use crate::error::{PipelineError, Result};
use crate::gateway::{CreateGatewayOrder, GatewayOrder, GatewayPayment, PaymentGateway};
use crate::notify::{Notifier, PurchaseNote};

const UNKNOWN_USER: &str = "unknown";

#[derive(Default)]
pub struct InMemoryCheckoutStore {
    bindings: RwLock<HashMap<String, CheckoutBinding>>,
}

impl InMemoryCheckoutStore {
    pub async fn is_empty(&self) -> bool {
        self.bindings.read().await.is_empty()
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn put(&self, order_id: &str, binding: &CheckoutBinding) -> anyhow::Result<()> {
        self.bindings
            .write()
            .await
            .insert(order_id.to_string(), binding.clone());
        Ok(())
    }

    async fn get(&self, order_id: &str) -> anyhow::Result<Option<CheckoutBinding>> {
        Ok(self.bindings.read().await.get(order_id).cloned())
    }

    async fn take(&self, order_id: &str) -> anyhow::Result<Option<CheckoutBinding>> {
        Ok(self.bindings.write().await.remove(order_id))
    }

    async fn delete(&self, order_id: &str) -> anyhow::Result<()> {
        self.bindings.write().await.remove(order_id);
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    payments: HashMap<String, PaymentRecord>,
    enrollments: Vec<Enrollment>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.read().await.payments.values().cloned().collect()
    }

    pub async fn enrollments(&self) -> Vec<Enrollment> {
        self.state.read().await.enrollments.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn upsert_payment(&self, payment: &PaymentUpsert) -> anyhow::Result<PaymentRecord> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let record = state
            .payments
            .entry(payment.gateway_payment_id.clone())
            .and_modify(|existing| {
                existing.status = payment.status.clone();
                if existing.user_id == UNKNOWN_USER {
                    existing.user_id = payment.user_id.clone();
                }
                if existing.course_id.is_none() {
                    existing.course_id = payment.course_id;
                }
                if existing.gateway_order_id.is_none() {
                    existing.gateway_order_id = payment.gateway_order_id.clone();
                }
                existing.updated_at = now;
            })
            .or_insert_with(|| PaymentRecord {
                id: Uuid::new_v4(),
                user_id: payment.user_id.clone(),
                course_id: payment.course_id,
                amount: payment.amount,
                currency: payment.currency.clone(),
                status: payment.status.clone(),
                gateway_order_id: payment.gateway_order_id.clone(),
                gateway_payment_id: payment.gateway_payment_id.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn enroll_if_absent(&self, user_id: &str, course_id: Uuid) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let exists = state
            .enrollments
            .iter()
            .any(|enrollment| enrollment.user_id == user_id && enrollment.course_id == course_id);
        if exists {
            return Ok(false);
        }

        state.enrollments.push(Enrollment {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            course_id,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn enrollments_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Enrollment>> {
        Ok(self
            .state
            .read()
            .await
            .enrollments
            .iter()
            .filter(|enrollment| enrollment.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryCourseCatalog {
    courses: Vec<Course>,
}

impl InMemoryCourseCatalog {
    pub fn with_courses(courses: Vec<Course>) -> Self {
        Self { courses }
    }
}

#[async_trait]
impl CourseCatalog for InMemoryCourseCatalog {
    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Course>> {
        Ok(self
            .courses
            .iter()
            .find(|course| course.slug == slug)
            .cloned())
    }

    async fn list_active(&self) -> anyhow::Result<Vec<Course>> {
        Ok(self
            .courses
            .iter()
            .filter(|course| course.active)
            .cloned()
            .collect())
    }
}

// Gateway stand-in: orders are acknowledged with sequential ids and payments
// are served from a pre-installed map.
pub struct StubGateway {
    orders: RwLock<Vec<CreateGatewayOrder>>,
    payments: RwLock<HashMap<String, GatewayPayment>>,
    fail_orders: bool,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            payments: RwLock::new(HashMap::new()),
            fail_orders: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_orders: true,
            ..Self::new()
        }
    }

    pub async fn install_payment(&self, payment: GatewayPayment) {
        self.payments
            .write()
            .await
            .insert(payment.id.clone(), payment);
    }

    pub async fn created_orders(&self) -> Vec<CreateGatewayOrder> {
        self.orders.read().await.clone()
    }
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(&self, order: &CreateGatewayOrder) -> Result<GatewayOrder> {
        if self.fail_orders {
            return Err(PipelineError::Upstream(anyhow::anyhow!(
                "stub gateway is down"
            )));
        }

        let mut orders = self.orders.write().await;
        let id = format!("order_{}", orders.len() + 1);
        orders.push(order.clone());
        Ok(GatewayOrder {
            id,
            amount: order.amount,
            currency: order.currency.clone(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment> {
        self.payments
            .read()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Upstream(anyhow::anyhow!("unknown payment {payment_id}"))
            })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notes: RwLock<Vec<PurchaseNote>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<PurchaseNote> {
        self.notes.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_confirmed(&self, note: &PurchaseNote) -> anyhow::Result<()> {
        self.notes.write().await.push(note.clone());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn payment_confirmed(&self, _note: &PurchaseNote) -> anyhow::Result<()> {
        anyhow::bail!("mail relay unavailable")
    }
}
