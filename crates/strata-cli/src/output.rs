use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_notice(msg: &str) {
    println!("{} {}", "-".yellow(), msg);
}

/// Print a list of keys as JSON or as a one-column table.
pub fn print_keys(header: &str, keys: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&Value::from(keys.to_vec())),
        OutputFormat::Table => {
            if keys.is_empty() {
                println!("No keys.");
                return;
            }
            let mut builder = Builder::default();
            builder.push_record([header]);
            for key in keys {
                builder.push_record([key.as_str()]);
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
            println!("Total: {}", keys.len());
        }
    }
}

/// Print key/value rows as a two-column table.
pub fn print_fields(rows: &[(&str, String)]) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (field, value) in rows {
        builder.push_record([*field, value.as_str()]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}
