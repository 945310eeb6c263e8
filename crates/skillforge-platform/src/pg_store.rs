use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use skillforge_core::{Course, CourseCatalog, Enrollment, LedgerStore, PaymentRecord, PaymentUpsert};

const UNKNOWN_USER: &str = "unknown";

#[derive(Clone)]
pub struct PgCourseCatalog {
    pool: PgPool,
}

impl PgCourseCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseCatalog for PgCourseCatalog {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Course>> {
        let row = sqlx::query(
            r#"
            SELECT id, slug, title, description, price, currency, active, created_at, updated_at
            FROM courses
            WHERE slug = $1
            LIMIT 1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| course_from_row(&row)).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slug, title, description, price, currency, active, created_at, updated_at
            FROM courses
            WHERE active
            ORDER BY title ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(course_from_row).collect()
    }
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    // The unique constraint on gateway_payment_id plus ON CONFLICT makes this
    // upsert the single point of idempotency for both confirmation paths.
    // Status is last-write-wins; user/course are only filled in when the
    // existing row does not know them yet.
    async fn upsert_payment(&self, payment: &PaymentUpsert) -> Result<PaymentRecord> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO payment_records (
                id,
                user_id,
                course_id,
                amount,
                currency,
                status,
                gateway_order_id,
                gateway_payment_id,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (gateway_payment_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                user_id = CASE
                    WHEN payment_records.user_id = $10 THEN EXCLUDED.user_id
                    ELSE payment_records.user_id
                END,
                course_id = COALESCE(payment_records.course_id, EXCLUDED.course_id),
                gateway_order_id = COALESCE(payment_records.gateway_order_id, EXCLUDED.gateway_order_id),
                updated_at = EXCLUDED.updated_at
            RETURNING
                id,
                user_id,
                course_id,
                amount,
                currency,
                status,
                gateway_order_id,
                gateway_payment_id,
                created_at,
                updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&payment.user_id)
        .bind(payment.course_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.status)
        .bind(payment.gateway_order_id.as_deref())
        .bind(&payment.gateway_payment_id)
        .bind(now)
        .bind(UNKNOWN_USER)
        .fetch_one(&self.pool)
        .await?;

        payment_from_row(&row)
    }

    async fn enroll_if_absent(&self, user_id: &str, course_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO enrollments (id, user_id, course_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, course_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn enrollments_for_user(&self, user_id: &str) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, course_id, created_at
            FROM enrollments
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Enrollment {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    course_id: row.try_get("course_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn course_from_row(row: &PgRow) -> Result<Course> {
    Ok(Course {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        course_id: row.try_get("course_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: row.try_get("status")?,
        gateway_order_id: row.try_get("gateway_order_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
