//! Terminal UI utilities

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use slashpay_interactive::{NegotiationObserver, PayeeState, PayerState};
use slashpay_lib::{MethodResult, PaymentRequest, Receipt};
use std::sync::Mutex;
use std::time::Duration;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a section header
pub fn header(text: &str) {
    println!("\n{}", text.bold().underline());
}

/// Print a key-value pair
pub fn key_value(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Create a spinner progress indicator
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print a separator line
pub fn separator() {
    println!("{}", "─".repeat(60).dimmed());
}

/// Print a receipt
pub fn receipt(receipt: &Receipt) {
    key_value("sats", &receipt.data.sats.to_string().green().bold().to_string());
    key_value("orderId", &receipt.order_id);
    key_value("id", &receipt.data.id);
    if !receipt.data.description.is_empty() {
        key_value("description", &receipt.data.description);
    }
    key_value("time", &receipt.timestamp);
}

/// Payer progress: a spinner while waiting, offers and receipts in between.
pub struct PayerProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl PayerProgress {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn set_spinner(&self, next: Option<ProgressBar>) {
        if let Ok(mut current) = self.spinner.lock() {
            if let Some(old) = current.take() {
                old.finish_and_clear();
            }
            *current = next;
        }
    }
}

impl NegotiationObserver for PayerProgress {
    fn on_payer_state(&self, state: PayerState) {
        match state {
            PayerState::AwaitingResponse => self.set_spinner(Some(spinner("Waiting for payee..."))),
            _ => self.set_spinner(None),
        }
    }

    fn on_offer(&self, offer: &MethodResult) {
        self.set_spinner(None);
        let method = offer
            .method
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_default();
        header(&format!("Pay with {}", method));
        println!("  {}", offer.data.green().bold());
        println!();
    }

    fn on_receipt(&self, receipt: &Receipt) {
        self.set_spinner(None);
        success("Got a receipt");
        self::receipt(receipt);
    }

    fn on_failure(&self, reason: &str) {
        self.set_spinner(None);
        error(reason);
    }
}

/// Payee progress, one line per event.
pub struct PayeeProgress {
    verbose: bool,
}

impl PayeeProgress {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl NegotiationObserver for PayeeProgress {
    fn on_payee_state(&self, state: PayeeState) {
        if self.verbose {
            info(&format!("state: {}", state));
        }
    }

    fn on_request(&self, request: &PaymentRequest) {
        let methods: Vec<&str> = request.methods.iter().map(|m| m.as_str()).collect();
        info(&format!(
            "Request: pay {} sats over {} ({})",
            request.amount.to_string().green().bold(),
            methods.join(" or ").green().bold(),
            request.description
        ));
    }

    fn on_offer(&self, offer: &MethodResult) {
        info(&format!("Offered {}", offer.data));
    }

    fn on_receipt(&self, receipt: &Receipt) {
        success(&format!(
            "Settled {} sats, receipt {}",
            receipt.data.sats, receipt.order_id
        ));
    }

    fn on_failure(&self, reason: &str) {
        error(reason);
    }
}
