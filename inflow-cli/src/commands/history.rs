//! History command - list previous statement imports

use anyhow::Result;

use super::get_context;
use crate::output;

pub fn run(owner: Option<i64>, limit: usize, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let batches = ctx.import_service.history(owner, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
        return Ok(());
    }

    if batches.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec![
        "Batch", "Imported", "Owner", "File", "Format", "Total", "Created", "Duplicates", "Issues",
    ]);
    for batch in &batches {
        table.add_row(vec![
            batch.batch_id.clone(),
            batch.imported_at.format("%Y-%m-%d %H:%M").to_string(),
            batch.owner_id.to_string(),
            batch.file_name.clone().unwrap_or_else(|| "-".to_string()),
            batch.format.to_string(),
            batch.total.to_string(),
            batch.created.to_string(),
            batch.duplicates.to_string(),
            batch.issue_count.to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}
