use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::commands::AppContext;
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp};
use crate::session::SessionStatus;

#[derive(Parser)]
pub struct LoginCommand {
    #[clap(help = "Identity to log in as (used for history and rate limiting)")]
    pub identity: String,

    #[clap(long, help = "Display name shown by `status`")]
    pub name: Option<String>,

    #[clap(long, short, help = "Remember this session for 24 hours instead of 1 hour")]
    pub remember: bool,
}

impl LoginCommand {
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        let record = ctx
            .gate()
            .login(&self.identity, self.name.clone(), self.remember)
            .await?;
        let expires_at = ctx.gate().policy().expires_at(&record);

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "identity": &record.identity_id,
                    "name": &record.display_name,
                    "remember": record.extended_ttl,
                    "issued_at": record.issued_at.to_rfc3339(),
                    "expires_at": expires_at.to_rfc3339(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!(
                    "Logged in as {} (session valid until {})",
                    record.display_name.as_deref().unwrap_or(&record.identity_id),
                    format_timestamp(&expires_at)
                );
            }
        }

        Ok(())
    }
}

#[derive(Parser)]
pub struct LogoutCommand {}

impl LogoutCommand {
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        ctx.gate().logout().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"logged_out": true}));
            }
            OutputFormat::Table => println!("Logged out."),
        }

        Ok(())
    }
}

#[derive(Parser)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        let status = ctx.gate().validate().await?;
        let client = ctx.client(status.identity())?;
        let server_up = client.health().await;
        let server_url = &ctx.config.client.server_url;

        let (state, identity, expires_at) = match &status {
            SessionStatus::Valid(record) => (
                "active",
                Some(record.identity_id.as_str()),
                Some(ctx.gate().policy().expires_at(record)),
            ),
            SessionStatus::Expired => ("expired", None, None),
            SessionStatus::Absent => ("none", None, None),
        };

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "session": state,
                    "identity": identity,
                    "expires_at": expires_at.map(|t| t.to_rfc3339()),
                    "server_url": server_url,
                    "server_reachable": server_up,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["Session", state]);
                if let Some(identity) = identity {
                    table.add_row(["Identity", identity]);
                }
                if let SessionStatus::Valid(record) = &status {
                    if let Some(name) = &record.display_name {
                        table.add_row(["Name", name.as_str()]);
                    }
                    table.add_row([
                        "Remembered",
                        if record.extended_ttl { "yes" } else { "no" },
                    ]);
                }
                if let Some(expires_at) = expires_at {
                    table.add_row(["Expires".to_string(), format_timestamp(&expires_at)]);
                }
                table.add_row(["Server", server_url.as_str()]);
                table.add_row(["Server reachable", if server_up { "yes" } else { "no" }]);

                println!("{table}");
            }
        }

        Ok(())
    }
}
