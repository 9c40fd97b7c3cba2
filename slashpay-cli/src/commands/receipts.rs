//! Receipts command - list stored receipts

use anyhow::Result;
use slashpay_lib::receipts::ReceiptStore;
use std::path::Path;

use crate::ui;

pub async fn run(data_dir: &Path) -> Result<()> {
    let store = ReceiptStore::new(data_dir);
    let receipts = store.list().await;

    ui::header("Receipts");
    if receipts.is_empty() {
        ui::info(&format!("No receipts in {}", store.path().display()));
        return Ok(());
    }

    for receipt in &receipts {
        ui::separator();
        ui::receipt(receipt);
    }
    ui::separator();
    ui::info(&format!("{} receipt(s)", receipts.len()));
    Ok(())
}
