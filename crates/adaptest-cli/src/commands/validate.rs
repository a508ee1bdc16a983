//! The `adaptest validate` command.

use std::path::PathBuf;

use anyhow::Result;

use adaptest_core::parser;

pub fn execute(bank_path: PathBuf) -> Result<()> {
    let runs = if bank_path.is_dir() {
        parser::load_bank_directory(&bank_path)?
    } else {
        vec![parser::parse_item_bank(&bank_path)?]
    };

    let mut total_warnings = 0;

    for run in &runs {
        let active = run.items.iter().filter(|i| i.is_active).count();
        println!(
            "Item bank: calibration {} ({} items, {} active, sample size {})",
            run.id,
            run.items.len(),
            active,
            run.sample_size
        );

        let warnings = parser::validate_bank(run);
        for w in &warnings {
            let prefix = w
                .item_id
                .as_ref()
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All item banks valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
