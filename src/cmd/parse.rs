//! `cirun parse` — extract structured data from pasted text.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use cirun::parser::parse_update_text;

/// Read the input (or stdin for `-`), parse it, and print the structured
/// result as JSON for inspection or piping.
pub fn cmd_parse(input: &Path) -> Result<()> {
    let text = read_input(input)?;
    let parsed = parse_update_text(&text);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

pub fn read_input(input: &Path) -> Result<String> {
    if input.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read input file {}", input.display()))
    }
}
