pub mod health;
pub mod invoicing;

pub use health::{health_check, metrics_handler, readiness_check};
pub use invoicing::{
    generate_invoices, generate_periodic, get_bill_run, get_invoice, list_bill_run_invoices,
    rerun_bill_run,
};
