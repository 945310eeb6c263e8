pub mod error;
pub mod gateway;
pub mod issuer;
pub mod memory;
pub mod notify;
pub mod reconcile;
pub mod signature;
pub mod webhook;

pub use error::PipelineError;
pub use gateway::{
    CreateGatewayOrder, GatewayOrder, GatewayPayment, HttpPaymentGateway, OrderNotes,
    PaymentGateway,
};
pub use issuer::{AuthenticatedUser, CheckoutOrder, OrderIssuer};
pub use notify::{EmailNotifier, LogNotifier, Notifier, PurchaseNote};
pub use reconcile::{ClientConfirmation, ConfirmedPurchase, Reconciler, WebhookReceipt};
pub use signature::{SignatureKind, SignatureVerifier};
