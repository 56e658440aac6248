use anyhow::Result;
use colored::Colorize;

use crate::cli::OutputFormat;
use crate::output::{print_keys, print_success};
use crate::session::Session;

pub async fn key(session: &Session, key: &str) -> Result<()> {
    let cache = session.cache().await?;
    cache.invalidate(key).await;
    print_success(&format!(
        "Invalidated {}",
        session.keys.value_key(key).cyan()
    ));
    Ok(())
}

pub async fn tag(session: &Session, tag: &str, format: OutputFormat) -> Result<()> {
    let cache = session.cache().await?;
    let keys = cache.invalidate_by_tag(tag).await;
    print_success(&format!(
        "Invalidated {} key(s) tagged {}",
        keys.len(),
        tag.cyan()
    ));
    if !keys.is_empty() {
        print_keys("Key", &keys, format);
    }
    Ok(())
}
