use anyhow::Result;
use clap::Parser;
use glob_match::glob_match;

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct ListSourcesCommand {
    /// Only show sources whose id matches this glob
    #[arg(long)]
    pub filter: Option<String>,
}

impl ListSourcesCommand {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let sources = global.load_sources()?;

        println!("Available sources:");
        for source in sources
            .iter()
            .filter(|s| self.filter.as_deref().is_none_or(|f| glob_match(f, &s.id)))
        {
            let state = if source.enabled { "" } else { " [disabled]" };
            println!(
                "  - {} ({}, {:?}, v{}){}",
                source.id, source.name, source.kind, source.version, state
            );
        }
        Ok(())
    }
}
