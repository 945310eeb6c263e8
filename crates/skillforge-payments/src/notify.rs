use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PurchaseNote {
    pub user_id: String,
    pub user_email: Option<String>,
    pub course_id: Uuid,
    pub course_title: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub payment_id: String,
}

// Confirmation delivery is fire-and-forget: the reconciler logs failures and
// never lets them roll back a recorded payment.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_confirmed(&self, note: &PurchaseNote) -> Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_confirmed(&self, note: &PurchaseNote) -> Result<()> {
        info!(
            user_id = %note.user_id,
            course_id = %note.course_id,
            payment_id = %note.payment_id,
            "payment confirmed"
        );
        Ok(())
    }
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from_address: &str,
    ) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("failed to build SMTP transport")?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        let from = from_address
            .parse::<Mailbox>()
            .context("MAIL_FROM is not a valid mailbox")?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn payment_confirmed(&self, note: &PurchaseNote) -> Result<()> {
        let Some(address) = note.user_email.as_deref() else {
            info!(user_id = %note.user_id, "no email on file, skipping purchase confirmation");
            return Ok(());
        };

        let course = note.course_title.as_deref().unwrap_or("your course");
        let message = Message::builder()
            .from(self.from.clone())
            .to(address.parse()?)
            .subject(format!("Your enrollment in {course} is confirmed"))
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Thanks for your purchase!\n\n\
                 Course: {course}\n\
                 Amount: {} {}\n\
                 Payment reference: {}\n\n\
                 Your course access is now active.",
                note.amount, note.currency, note.payment_id
            ))?;

        self.transport.send(message).await?;
        Ok(())
    }
}
