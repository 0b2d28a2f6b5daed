use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::commands::AppContext;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_size};

#[derive(Parser)]
pub struct ModelsCommand {}

impl ModelsCommand {
    /// Works without a session; the identity is sent when one is active
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        let status = ctx.gate().validate().await?;
        let client = ctx.client(status.identity())?;
        let models = client.list_models().await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = models
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "name": &m.name,
                            "size": m.size,
                            "modified_at": &m.modified_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if models.is_empty() {
                    println!("No models available.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Name", "Size", "Modified"]);

                for model in &models {
                    table.add_row([
                        model.name.clone(),
                        model.size.map(format_size).unwrap_or_else(|| "-".to_string()),
                        model.modified_at.clone().unwrap_or_else(|| "-".to_string()),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }
}
