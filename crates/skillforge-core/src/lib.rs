pub mod models;
pub mod money;
pub mod storage;

pub use models::{CheckoutBinding, Course, Enrollment, PaymentRecord};
pub use money::{RECEIPT_MAX_LEN, receipt_id, to_major_units, to_minor_units};
pub use storage::{CheckoutStore, CourseCatalog, LedgerStore, PaymentUpsert};
