//! The `coverart keys` command: where an artwork URL's variants live.

use clap::Args;
use coverart_core::{Digest, KeyLayout};
use std::path::Path;

/// Arguments for the `keys` command.
#[derive(Args, Debug)]
pub struct KeysArgs {
    /// Source artwork URL, exactly as stored on the record
    pub url: String,
}

/// Execute the keys command.
pub fn execute(args: KeysArgs, explicit_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(explicit_path)?;
    let layout = KeyLayout::from_config(&config);
    for line in key_lines(&layout, &args.url) {
        println!("{line}");
    }
    Ok(())
}

fn key_lines(layout: &KeyLayout, url: &str) -> Vec<String> {
    let digest = Digest::from_source_url(url);
    let mut lines = vec![
        format!("digest: {digest}"),
        format!("ext:    {}", layout.record_extension()),
    ];
    lines.extend(layout.variants(&digest).iter().map(|v| layout.key(v)));
    lines
}
