use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use skillforge_core::{CheckoutStore, CourseCatalog, LedgerStore};
use skillforge_payments::{
    AuthenticatedUser, ClientConfirmation, EmailNotifier, HttpPaymentGateway, LogNotifier,
    Notifier, OrderIssuer, PaymentGateway, PipelineError, Reconciler, SignatureVerifier,
};
use skillforge_platform::{
    CourseListResponse, CourseView, CreateLeadRequest, CreateLeadResponse, CreateOrderRequest,
    CreateOrderResponse, EnrollmentListResponse, EnrollmentView, PgCourseCatalog, PgLedgerStore,
    RedisCheckoutStore, ServiceConfig, VerifyPaymentRequest, connect_database,
};

const SIGNATURE_HEADER: &str = "x-gateway-signature";
const USER_ID_HEADER: &str = "x-user-id";
const USER_EMAIL_HEADER: &str = "x-user-email";

const LEAD_KINDS: [&str; 3] = ["CONTACT", "CORPORATE_TRAINING", "TRAINER_APPLICATION"];

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    catalog: Arc<dyn CourseCatalog>,
    ledger: Arc<dyn LedgerStore>,
    issuer: Arc<OrderIssuer>,
    reconciler: Arc<Reconciler>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "skillforge_gateway=info,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let checkout: Arc<dyn CheckoutStore> = Arc::new(RedisCheckoutStore::connect(
        &config.redis_url,
        config.checkout_ttl_seconds,
    )?);
    let catalog: Arc<dyn CourseCatalog> = Arc::new(PgCourseCatalog::new(pool.clone()));
    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
        &config.gateway.base_url,
        &config.gateway.key_id,
        &config.gateway.key_secret,
    )?);
    let notifier: Arc<dyn Notifier> = match &config.mail {
        Some(mail) => Arc::new(EmailNotifier::new(
            &mail.host,
            mail.port,
            &mail.username,
            &mail.password,
            &mail.from_address,
        )?),
        None => Arc::new(LogNotifier),
    };
    let verifier = SignatureVerifier::new(
        &config.gateway.key_secret,
        &config.gateway.webhook_secret,
    )?;

    let issuer = Arc::new(OrderIssuer::new(
        catalog.clone(),
        gateway.clone(),
        checkout.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        verifier,
        checkout,
        ledger.clone(),
        gateway,
        notifier,
    ));

    let state = AppState {
        pool,
        catalog,
        ledger,
        issuer,
        reconciler,
    };
    let router = build_router(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/courses", get(list_courses))
        .route("/courses/{slug}", get(get_course))
        .route("/leads", post(create_lead))
        .route("/enrollments/{user_id}", get(list_enrollments))
        .route("/payments/orders", post(create_payment_order))
        .route("/payments/verify", post(verify_payment))
        .route("/payments/webhook", post(handle_webhook))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_payment_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, (StatusCode, Json<Value>)> {
    let user = authenticated_user(&headers).map_err(error_response)?;

    let order = state
        .issuer
        .create_order(&payload.course_slug, &user)
        .await
        .map_err(error_response)?;

    Ok(Json(CreateOrderResponse {
        order_id: order.order_id,
        amount: order.amount,
        currency: order.currency,
        course_title: order.course_title,
    }))
}

async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let confirmation = ClientConfirmation {
        order_id: required_field(payload.order_id, "order_id")?,
        payment_id: required_field(payload.payment_id, "payment_id")?,
        signature: required_field(payload.signature, "signature")?,
    };

    match state.reconciler.confirm(&confirmation).await {
        Ok(purchase) => Ok(Json(json!({
            "success": true,
            "course_id": purchase.course_id,
            "user_id": purchase.user_id,
        }))),
        Err(err) => {
            let (status, Json(mut body)) = error_response(err);
            if let Some(object) = body.as_object_mut() {
                object.insert("success".to_string(), Value::Bool(false));
            }
            Err((status, Json(body)))
        }
    }
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| error_response(PipelineError::Signature))?
        .to_string();

    // `body` is the raw delivery; it is passed to verification untouched.
    let receipt = state
        .reconciler
        .ingest_webhook(&body, &signature)
        .await
        .map_err(error_response)?;

    info!(applied = receipt.applied, "webhook processed");
    Ok(Json(json!({ "received": true })))
}

async fn list_courses(
    State(state): State<AppState>,
) -> Result<Json<CourseListResponse>, (StatusCode, Json<Value>)> {
    let courses = state.catalog.list_active().await.map_err(internal_error)?;
    Ok(Json(CourseListResponse {
        items: courses.into_iter().map(CourseView::from).collect(),
    }))
}

async fn get_course(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CourseView>, (StatusCode, Json<Value>)> {
    let course = state
        .catalog
        .find_by_slug(slug.trim())
        .await
        .map_err(internal_error)?
        .filter(|course| course.active)
        .ok_or_else(|| error_response(PipelineError::NotFound("course")))?;

    Ok(Json(CourseView::from(course)))
}

async fn create_lead(
    State(state): State<AppState>,
    Json(payload): Json<CreateLeadRequest>,
) -> Result<(StatusCode, Json<CreateLeadResponse>), (StatusCode, Json<Value>)> {
    let kind = normalize_lead_kind(&payload.kind)
        .map_err(|err| error_response(PipelineError::Validation(err.to_string())))?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(error_response(PipelineError::Validation(
            "name is required".to_string(),
        )));
    }
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(error_response(PipelineError::Validation(
            "a valid email is required".to_string(),
        )));
    }

    let lead_id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO leads (id, kind, name, email, organization, message, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'NEW', $7)
        "#,
    )
    .bind(lead_id)
    .bind(&kind)
    .bind(name)
    .bind(email)
    .bind(payload.organization.as_deref().map(str::trim))
    .bind(payload.message.as_deref().map(str::trim))
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLeadResponse {
            lead_id,
            status: "NEW".to_string(),
            created_at: now,
        }),
    ))
}

async fn list_enrollments(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<EnrollmentListResponse>, (StatusCode, Json<Value>)> {
    let enrollments = state
        .ledger
        .enrollments_for_user(user_id.trim())
        .await
        .map_err(internal_error)?;

    Ok(Json(EnrollmentListResponse {
        items: enrollments.into_iter().map(EnrollmentView::from).collect(),
    }))
}

fn authenticated_user(headers: &HeaderMap) -> Result<AuthenticatedUser, PipelineError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(PipelineError::Unauthenticated)?;

    let email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    Ok(AuthenticatedUser {
        id: user_id.to_string(),
        email,
    })
}

fn normalize_lead_kind(value: &str) -> AnyResult<String> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        anyhow::bail!("kind is required");
    }
    if !LEAD_KINDS
        .iter()
        .any(|registered| *registered == normalized.as_str())
    {
        anyhow::bail!("unsupported lead kind: {normalized}");
    }
    Ok(normalized)
}

fn required_field(
    value: Option<String>,
    name: &'static str,
) -> Result<String, (StatusCode, Json<Value>)> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| error_response(PipelineError::Validation(format!("{name} is required"))))
}

// Full detail goes to the log; callers only ever see sanitized messages.
fn error_response(err: PipelineError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        PipelineError::Validation(_)
        | PipelineError::Signature
        | PipelineError::NotCaptured(_) => StatusCode::BAD_REQUEST,
        PipelineError::Unauthenticated => StatusCode::UNAUTHORIZED,
        PipelineError::NotFound(_) | PipelineError::MetadataMissing => StatusCode::NOT_FOUND,
        PipelineError::Upstream(_)
        | PipelineError::Configuration(_)
        | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = match &err {
        PipelineError::Upstream(_) => "payment gateway error".to_string(),
        PipelineError::Configuration(_) | PipelineError::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
    };

    match &err {
        PipelineError::Signature => warn!(error = ?err, "signature verification rejected"),
        _ if status == StatusCode::INTERNAL_SERVER_ERROR => error!(error = ?err, "request failed"),
        _ => {}
    }

    (status, Json(json!({ "error": message })))
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<Value>) {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal::Decimal;
    use tower::ServiceExt;

    use skillforge_core::{CheckoutBinding, Course};
    use skillforge_payments::SignatureKind;
    use skillforge_payments::gateway::GatewayPayment;
    use skillforge_payments::memory::{
        InMemoryCheckoutStore, InMemoryCourseCatalog, InMemoryLedgerStore, RecordingNotifier,
        StubGateway,
    };

    use super::*;

    const KEY_SECRET: &str = "key-secret-test";
    const WEBHOOK_SECRET: &str = "webhook-secret-test";

    struct TestContext {
        router: Router,
        verifier: SignatureVerifier,
        checkout: Arc<InMemoryCheckoutStore>,
        ledger: Arc<InMemoryLedgerStore>,
        gateway: Arc<StubGateway>,
        course_id: Uuid,
    }

    fn test_context() -> TestContext {
        let now = Utc::now();
        let course = Course {
            id: Uuid::new_v4(),
            slug: "aml-specialist".to_string(),
            title: "AML Specialist Certification".to_string(),
            description: Some("Anti-money-laundering compliance training".to_string()),
            price: Decimal::new(299, 0),
            currency: "USD".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let course_id = course.id;

        let verifier = SignatureVerifier::new(KEY_SECRET, WEBHOOK_SECRET).unwrap();
        let checkout = Arc::new(InMemoryCheckoutStore::default());
        let ledger = Arc::new(InMemoryLedgerStore::default());
        let gateway = Arc::new(StubGateway::new());
        let catalog: Arc<dyn CourseCatalog> =
            Arc::new(InMemoryCourseCatalog::with_courses(vec![course]));
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());

        let issuer = Arc::new(OrderIssuer::new(
            catalog.clone(),
            gateway.clone(),
            checkout.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            verifier.clone(),
            checkout.clone(),
            ledger.clone(),
            gateway.clone(),
            notifier,
        ));

        // The pool never connects in these tests; only the lead route uses it.
        let pool = PgPool::connect_lazy("postgres://localhost/skillforge_test")
            .expect("lazy pool construction");

        let state = AppState {
            pool,
            catalog,
            ledger: ledger.clone(),
            issuer,
            reconciler,
        };

        TestContext {
            router: build_router(state),
            verifier,
            checkout,
            ledger,
            gateway,
            course_id,
        }
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let context = test_context();
        let response = context
            .router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn course_catalog_is_browsable() {
        let context = test_context();
        let response = context
            .router
            .clone()
            .oneshot(Request::builder().uri("/courses").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["slug"], "aml-specialist");

        let response = context
            .router
            .oneshot(
                Request::builder()
                    .uri("/courses/no-such-course")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn order_creation_requires_identity() {
        let context = test_context();
        let response = context
            .router
            .oneshot(json_request(
                "/payments/orders",
                json!({ "course_slug": "aml-specialist" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn order_creation_returns_gateway_order() {
        let context = test_context();
        let request = Request::builder()
            .method("POST")
            .uri("/payments/orders")
            .header("content-type", "application/json")
            .header(USER_ID_HEADER, "user_42")
            .header(USER_EMAIL_HEADER, "student@example.com")
            .body(Body::from(
                json!({ "course_slug": "aml-specialist" }).to_string(),
            ))
            .unwrap();

        let response = context.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["amount"], 29900);
        assert_eq!(body["currency"], "USD");
        assert_eq!(body["course_title"], "AML Specialist Certification");

        let order_id = body["order_id"].as_str().unwrap();
        let binding = context.checkout.get(order_id).await.unwrap().unwrap();
        assert_eq!(binding.user_id, "user_42");
        assert_eq!(binding.course_id, context.course_id);
    }

    #[tokio::test]
    async fn order_creation_for_unknown_course_is_not_found() {
        let context = test_context();
        let request = Request::builder()
            .method("POST")
            .uri("/payments/orders")
            .header("content-type", "application/json")
            .header(USER_ID_HEADER, "user_42")
            .body(Body::from(json!({ "course_slug": "missing" }).to_string()))
            .unwrap();

        let response = context.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn verify_rejects_missing_fields() {
        let context = test_context();
        let response = context
            .router
            .oneshot(json_request(
                "/payments/verify",
                json!({ "order_id": "ord_1", "payment_id": "pay_1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "signature is required");
    }

    #[tokio::test]
    async fn verify_confirms_a_settled_payment() {
        let context = test_context();
        let binding = CheckoutBinding {
            course_id: context.course_id,
            user_id: "user_42".to_string(),
            user_email: Some("student@example.com".to_string()),
        };
        context.checkout.put("ord_1", &binding).await.unwrap();
        context
            .gateway
            .install_payment(GatewayPayment {
                id: "pay_1".to_string(),
                order_id: Some("ord_1".to_string()),
                amount: 29900,
                currency: "USD".to_string(),
                status: "captured".to_string(),
            })
            .await;

        let payload = SignatureVerifier::confirmation_payload("ord_1", "pay_1");
        let signature = context
            .verifier
            .sign(SignatureKind::ClientConfirmation, payload.as_bytes());

        let response = context
            .router
            .oneshot(json_request(
                "/payments/verify",
                json!({
                    "order_id": "ord_1",
                    "payment_id": "pay_1",
                    "signature": signature,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user_id"], "user_42");

        assert_eq!(context.ledger.payments().await.len(), 1);
        assert_eq!(context.ledger.enrollments().await.len(), 1);
    }

    #[tokio::test]
    async fn verify_reports_consumed_metadata_distinctly() {
        let context = test_context();
        let payload = SignatureVerifier::confirmation_payload("ord_gone", "pay_1");
        let signature = context
            .verifier
            .sign(SignatureKind::ClientConfirmation, payload.as_bytes());

        let response = context
            .router
            .oneshot(json_request(
                "/payments/verify",
                json!({
                    "order_id": "ord_gone",
                    "payment_id": "pay_1",
                    "signature": signature,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "order metadata not found");
    }

    #[tokio::test]
    async fn webhook_rejects_missing_signature() {
        let context = test_context();
        let response = context
            .router
            .oneshot(json_request("/payments/webhook", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let context = test_context();
        let request = Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, "deadbeef")
            .body(Body::from("{}"))
            .unwrap();

        let response = context.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_accepts_a_signed_capture() {
        let context = test_context();
        let body = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_7",
                "order_id": "ord_7",
                "amount": 4999,
                "currency": "USD",
                "status": "captured",
                "notes": {
                    "course_id": context.course_id,
                    "user_id": "user_7",
                }
            } } }
        })
        .to_string();
        let signature = context
            .verifier
            .sign(SignatureKind::Webhook, body.as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();

        let response = context.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = response_json(response).await;
        assert_eq!(ack["received"], true);

        let payments = context.ledger.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, Decimal::new(4999, 2));
        assert_eq!(context.ledger.enrollments().await.len(), 1);
    }

    #[tokio::test]
    async fn webhook_without_notes_still_acknowledges() {
        let context = test_context();
        let body = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_8",
                "amount": 4999,
                "currency": "USD",
                "status": "captured",
            } } }
        })
        .to_string();
        let signature = context
            .verifier
            .sign(SignatureKind::Webhook, body.as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body))
            .unwrap();

        let response = context.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payments = context.ledger.payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].user_id, "unknown");
        assert_eq!(payments[0].course_id, None);
        assert!(context.ledger.enrollments().await.is_empty());
    }

    #[tokio::test]
    async fn enrollments_are_listed_per_user() {
        let context = test_context();
        context
            .ledger
            .enroll_if_absent("user_42", context.course_id)
            .await
            .unwrap();

        let response = context
            .router
            .oneshot(
                Request::builder()
                    .uri("/enrollments/user_42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["user_id"], "user_42");
    }

    #[tokio::test]
    async fn lead_kinds_are_validated() {
        let context = test_context();
        let response = context
            .router
            .oneshot(json_request(
                "/leads",
                json!({
                    "kind": "SPONSORSHIP",
                    "name": "Dana",
                    "email": "dana@example.com",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
