use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use strata_cache::{InvalidationBus, InvalidationMessage};

use crate::cli::OutputFormat;
use crate::session::Session;

pub async fn listen(session: &Session, format: OutputFormat) -> Result<()> {
    let channel = session.config.cache.invalidation_channel.clone();
    let origin = format!("strata-cli-{}", uuid::Uuid::new_v4());
    let bus = InvalidationBus::new(
        Arc::new(session.redis.clone()),
        channel.clone(),
        origin,
        "cli",
    );

    let subscription = bus
        .subscribe(move |message| print_message(&message, format))
        .await;

    println!(
        "{} {} (Ctrl-C to stop)",
        "Listening on".cyan(),
        channel
    );

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe().await;
    Ok(())
}

fn print_message(message: &InvalidationMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(message) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("{} {e}", "✗".red()),
        },
        OutputFormat::Table => {
            let origin = message.origin().unwrap_or("-");
            match message {
                InvalidationMessage::Key { keys, .. } => {
                    println!("{} {} [{}]", "key".green(), keys.join(", "), origin.dimmed());
                }
                InvalidationMessage::Tag { tag, keys, .. } => {
                    println!(
                        "{} {} → {} [{}]",
                        "tag".yellow(),
                        tag.cyan(),
                        keys.join(", "),
                        origin.dimmed()
                    );
                }
            }
        }
    }
}
