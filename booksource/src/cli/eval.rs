use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use booksource::engine::{Mode, RuleContext, Scope};

use super::GlobalArgs;

#[derive(Parser, Debug)]
pub struct EvalCommand {
    /// HTML or JSON file to evaluate against
    pub file: PathBuf,

    /// Rule expression
    pub expr: String,

    /// Base URL for resolving relative links
    #[arg(long)]
    pub base_url: Option<String>,

    /// Treat the file as a raw fetch response (JSON or text)
    #[arg(long)]
    pub fetch_mode: bool,

    /// Print every value instead of the first
    #[arg(long)]
    pub list: bool,

    /// Source whose variables and script library apply
    #[arg(long)]
    pub source: Option<String>,
}

impl EvalCommand {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let body = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;

        let source = match &self.source {
            Some(id) => global.find_source(id)?,
            None => {
                let sources = global.load_sources()?;
                let first = sources
                    .into_iter()
                    .next()
                    .context("No sources available to provide a context")?;
                Arc::new(first)
            }
        };

        let mode = if self.fetch_mode { Mode::Fetch } else { Mode::LoadUrl };

        let mut ctx = RuleContext::new(source);
        ctx.scope = Scope::from_response(&body, mode);
        if let Some(base) = &self.base_url {
            ctx.base_url = base.clone();
        }

        let runtime = global.runtime()?;
        let result = if self.list {
            runtime
                .engine
                .eval_strings(&self.expr, mode, &mut ctx)
                .await
        } else {
            runtime
                .engine
                .eval_string(&self.expr, mode, &mut ctx)
                .await
                .map(|v| v.into_iter().collect())
        };
        runtime.close().await;

        for value in result? {
            println!("{}", value);
        }
        for (key, value) in &ctx.vars {
            eprintln!("put {} = {}", key, value);
        }

        Ok(())
    }
}
