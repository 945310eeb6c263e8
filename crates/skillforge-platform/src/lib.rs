pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_store;

pub use config::{GatewayCredentials, MailConfig, ServiceConfig};
pub use contracts::{
    CourseListResponse, CourseView, CreateLeadRequest, CreateLeadResponse, CreateOrderRequest,
    CreateOrderResponse, EnrollmentListResponse, EnrollmentView, VerifyPaymentRequest,
};
pub use db::connect_database;
pub use pg_store::{PgCourseCatalog, PgLedgerStore};
pub use redis_store::RedisCheckoutStore;
