use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::commands::AppContext;
use crate::conversation::{ConversationStore, Sender};
use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct HistoryCommand {
    #[clap(subcommand)]
    pub command: HistorySubcommand,
}

#[derive(Subcommand)]
pub enum HistorySubcommand {
    #[clap(about = "List saved conversations, most recent first")]
    List(ListArgs),

    #[clap(about = "Show every turn of a conversation")]
    Show(ShowArgs),

    #[clap(about = "Delete a conversation")]
    Delete(DeleteArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of conversations to display"
    )]
    pub limit: usize,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Conversation ID")]
    pub id: String,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(help = "Conversation ID to delete")]
    pub id: String,
}

impl HistoryCommand {
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        let session = ctx.require_session().await?;
        let store = ctx.conversations(&session.identity_id);

        match &self.command {
            HistorySubcommand::List(args) => Self::list(&store, args, format).await,
            HistorySubcommand::Show(args) => Self::show(&store, args, format).await,
            HistorySubcommand::Delete(args) => Self::delete(&store, args, format).await,
        }
    }

    async fn list(store: &ConversationStore, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let mut conversations = store.list().await?;
        conversations.truncate(args.limit);
        let active = store.active().await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = conversations
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": &c.id,
                            "title": c.display_title(),
                            "turns": c.turns.len(),
                            "last_modified": c.last_modified.to_rfc3339(),
                            "active": active.as_deref() == Some(c.id.as_str()),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if conversations.is_empty() {
                    println!("No conversations yet.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["", "ID", "Title", "Turns", "Last modified"]);

                for conversation in &conversations {
                    let marker = if active.as_deref() == Some(conversation.id.as_str()) {
                        "*"
                    } else {
                        ""
                    };
                    table.add_row([
                        marker.to_string(),
                        conversation.id.clone(),
                        truncate_string(conversation.display_title(), 40),
                        conversation.turns.len().to_string(),
                        format_timestamp(&conversation.last_modified),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} conversations", conversations.len());
            }
        }

        Ok(())
    }

    async fn show(store: &ConversationStore, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let conversation = store
            .load(&args.id)
            .await?
            .ok_or_else(|| format!("Conversation not found: {}", args.id))?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&conversation)?);
            }
            OutputFormat::Table => {
                println!("{} ({})", conversation.display_title(), conversation.id);
                println!("Last modified: {}\n", format_timestamp(&conversation.last_modified));

                for turn in &conversation.turns {
                    let who = match turn.sender {
                        Sender::User => "You",
                        Sender::Assistant => "Assistant",
                    };
                    println!("{who}: {}\n", turn.text);
                }
            }
        }

        Ok(())
    }

    async fn delete(store: &ConversationStore, args: &DeleteArgs, format: OutputFormat) -> CliResult<()> {
        let deleted = store.remove(&args.id).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": args.id,
                    "deleted": deleted,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if deleted {
                    println!("Conversation {} deleted.", args.id);
                } else {
                    println!("Conversation {} not found.", args.id);
                }
            }
        }

        Ok(())
    }
}
