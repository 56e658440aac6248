use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use strata_cache::{CachedPayload, RemoteTier};

use crate::cli::OutputFormat;
use crate::output::{print_fields, print_json, print_keys, print_notice};
use crate::session::Session;

pub async fn get(session: &Session, key: &str, format: OutputFormat) -> Result<()> {
    let nkey = session.keys.value_key(key);
    let Some(raw) = session.redis.get(&nkey).await? else {
        print_notice(&format!("{} is not cached", nkey.cyan()));
        return Ok(());
    };

    let payload = match CachedPayload::decode(&raw) {
        Ok(payload) => payload,
        Err(e) => {
            print_notice(&format!("{} holds an unreadable payload: {e}", nkey.cyan()));
            println!("{raw}");
            return Ok(());
        }
    };
    let remaining_ms = payload
        .remaining_ttl()
        .map_or(0, |ttl| ttl.as_millis() as u64);

    match format {
        OutputFormat::Json => print_json(&json!({
            "key": nkey,
            "value": payload.value,
            "tags": payload.tags(),
            "expiresAt": payload.expires_at,
            "remainingMs": remaining_ms,
        })),
        OutputFormat::Table => {
            print_fields(&[
                ("Key", nkey.clone()),
                ("Tags", payload.tags().join(", ")),
                ("Expires in", format!("{:.1}s", remaining_ms as f64 / 1000.0)),
            ]);
            print_json(&payload.value);
        }
    }
    Ok(())
}

pub async fn tag_members(session: &Session, tag: &str, format: OutputFormat) -> Result<()> {
    let tag_key = session.keys.tag_key(tag);
    let members = session.redis.members_of_set(&tag_key).await?;
    print_keys(&format!("Keys tagged {tag}"), &members, format);
    Ok(())
}
