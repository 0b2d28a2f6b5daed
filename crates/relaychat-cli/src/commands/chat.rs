use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::RelayClient;
use crate::commands::AppContext;
use crate::conversation::{ConversationStore, ConversationTurn};
use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ChatCommand {
    #[clap(help = "Message to send; omit to start an interactive chat")]
    pub message: Option<String>,

    #[clap(long, short, help = "Model to use (defaults to the server's model)")]
    pub model: Option<String>,

    #[clap(long, help = "Start a new conversation", conflicts_with = "conversation")]
    pub new: bool,

    #[clap(long, help = "Continue the conversation with this ID")]
    pub conversation: Option<String>,

    #[clap(long, help = "Wait for the complete reply instead of streaming it")]
    pub no_stream: bool,
}

/// What one prompt produced
struct Exchange {
    conversation_id: Option<String>,
    reply: String,
    complete: bool,
    error: Option<String>,
}

impl ChatCommand {
    pub async fn execute(&self, ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
        let session = ctx.require_session().await?;
        let store = ctx.conversations(&session.identity_id);
        let client = ctx.client(Some(&session.identity_id))?;
        let model = self
            .model
            .as_deref()
            .or(ctx.config.client.default_model.as_deref());

        let mut conversation_id = if self.new {
            store.clear_active().await?;
            None
        } else if let Some(id) = &self.conversation {
            if store.load(id).await?.is_none() {
                return Err(format!("Conversation not found: {id}").into());
            }
            Some(id.clone())
        } else {
            store.active().await?
        };

        match &self.message {
            Some(message) => {
                let exchange = self
                    .exchange(&client, &store, &mut conversation_id, message, model, format)
                    .await?;
                report(&exchange, format)?;
                match exchange.error {
                    Some(error) if format == OutputFormat::Table => Err(error.into()),
                    _ => Ok(()),
                }
            }
            None => {
                self.interactive(&client, &store, &mut conversation_id, model, format)
                    .await
            }
        }
    }

    async fn interactive(
        &self,
        client: &RelayClient,
        store: &ConversationStore,
        conversation_id: &mut Option<String>,
        model: Option<&str>,
        format: OutputFormat,
    ) -> CliResult<()> {
        if format == OutputFormat::Table {
            println!("Type a message and press Enter. /new starts a new conversation, /quit exits.");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if format == OutputFormat::Table {
                print!("> ");
                std::io::stdout().flush()?;
            }

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();

            match line {
                "" => continue,
                "/quit" | "/exit" => break,
                "/new" => {
                    store.clear_active().await?;
                    *conversation_id = None;
                    if format == OutputFormat::Table {
                        println!("Started a new conversation.");
                    }
                    continue;
                }
                _ => {}
            }

            match self
                .exchange(client, store, conversation_id, line, model, format)
                .await
            {
                Ok(exchange) => report(&exchange, format)?,
                // One failed prompt does not end the session
                Err(e) => eprintln!("Error: {e}"),
            }
        }

        Ok(())
    }

    /// Send one prompt and persist the turns it produced
    ///
    /// Nothing is saved when the relay produced no text. A reply cut short
    /// by an error is saved as far as it got.
    async fn exchange(
        &self,
        client: &RelayClient,
        store: &ConversationStore,
        conversation_id: &mut Option<String>,
        message: &str,
        model: Option<&str>,
        format: OutputFormat,
    ) -> CliResult<Exchange> {
        let message = message.trim();
        if message.is_empty() {
            return Err("Message must not be empty".into());
        }

        let (reply, complete, error) = if self.no_stream {
            (client.chat(message, model).await?, true, None)
        } else {
            let live = format == OutputFormat::Table;
            let outcome = client
                .stream_chat(message, model, |fragment, _| {
                    if live {
                        print!("{fragment}");
                        let _ = std::io::stdout().flush();
                    }
                })
                .await?;
            if live {
                println!();
            }
            (outcome.text, outcome.complete, outcome.error)
        };

        if reply.is_empty() {
            return Ok(Exchange {
                conversation_id: conversation_id.clone(),
                reply,
                complete,
                error: Some(error.unwrap_or_else(|| "The model returned an empty reply".to_string())),
            });
        }

        let id = store
            .append_turn(conversation_id.as_deref(), ConversationTurn::user(message))
            .await?;
        store
            .append_turn(Some(&id), ConversationTurn::assistant(reply.as_str()))
            .await?;
        store.set_active(&id).await?;
        *conversation_id = Some(id.clone());

        tracing::debug!(conversation = %id, chars = reply.chars().count(), complete, "Saved exchange");

        Ok(Exchange {
            conversation_id: Some(id),
            reply,
            complete,
            error,
        })
    }
}

fn report(exchange: &Exchange, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "conversation_id": &exchange.conversation_id,
                "reply": &exchange.reply,
                "complete": exchange.complete,
                "error": &exchange.error,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Table => {
            if !exchange.reply.is_empty() && !exchange.complete && exchange.error.is_none() {
                eprintln!("(reply ended before the model finished)");
            }
        }
    }
    Ok(())
}
