use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};

use booksource::engine::{
    BrowserFetcher, BrowserOptions, BrowserScriptRuntime, BrowserSession, EngineConfig,
    HttpFetcher, RuleEngine, Source, find_by_id, load_dir, load_embedded,
};

mod eval;
mod list_sources;
mod search;
mod test_source;

pub use eval::EvalCommand;
pub use list_sources::ListSourcesCommand;
pub use search::SearchCommand;
pub use test_source::TestSourceCommand;

#[derive(Parser, Debug)]
#[command(name = "booksource")]
#[command(about = "Rule-driven book, chapter and content extraction from third-party sites")]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GlobalArgs {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run the browser headless (default)
    #[arg(long, global = true, overrides_with = "no_headless")]
    pub headless: bool,

    /// Show the browser window
    #[arg(long, global = true, overrides_with = "headless")]
    pub no_headless: bool,

    /// Proxy for HTTP requests and the browser
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "15")]
    pub timeout: u64,

    /// Extra directory of source files; these shadow embedded sources with the same id
    #[arg(long, global = true)]
    pub sources: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available sources
    ListSources(ListSourcesCommand),
    /// Search one source
    Search(SearchCommand),
    /// Run search, detail, chapters and content against a source
    TestSource(TestSourceCommand),
    /// Evaluate an expression against a local file
    Eval(EvalCommand),
}

impl Args {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::ListSources(cmd) => cmd.run(&self.global).await,
            Command::Search(cmd) => cmd.run(&self.global).await,
            Command::TestSource(cmd) => cmd.run(&self.global).await,
            Command::Eval(cmd) => cmd.run(&self.global).await,
        }
    }
}

impl GlobalArgs {
    pub fn headless(&self) -> bool {
        self.headless || !self.no_headless
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            request_timeout: Duration::from_secs(self.timeout),
            proxy: self.proxy.clone(),
            ..EngineConfig::default()
        }
    }

    /**
        Embedded sources plus those in `--sources`, sorted by id.
    */
    pub fn load_sources(&self) -> Result<Vec<Source>> {
        let mut sources = load_embedded().context("Failed to load embedded sources")?;

        if let Some(dir) = &self.sources {
            let extra = load_dir(dir)
                .with_context(|| format!("Failed to load sources from {}", dir.display()))?;
            sources.retain(|s| !extra.iter().any(|e| e.id == s.id));
            sources.extend(extra);
            sources.sort_by(|a, b| a.id.cmp(&b.id));
        }

        Ok(sources)
    }

    pub fn find_source(&self, id: &str) -> Result<Arc<Source>> {
        let sources = self.load_sources()?;
        let source = find_by_id(&sources, id)?;
        Ok(Arc::new(source.clone()))
    }

    /**
        Build an engine on HTTP with a lazily launched browser behind it for
        `webView` requests and scripts.
    */
    pub fn runtime(&self) -> Result<Runtime> {
        let config = self.engine_config();

        let http = HttpFetcher::new(config.proxy.as_deref(), config.user_agent.as_deref())
            .context("Failed to create HTTP client")?;
        let session = Arc::new(BrowserSession::new(BrowserOptions {
            headless: self.headless(),
            proxy: config.proxy.clone(),
        }));

        let engine = RuleEngine::new(
            Arc::new(BrowserFetcher::new(http, Arc::clone(&session))),
            config,
        )
        .with_scripts(Arc::new(BrowserScriptRuntime::new(Arc::clone(&session))));

        Ok(Runtime { engine, session })
    }
}

pub struct Runtime {
    pub engine: RuleEngine,
    session: Arc<BrowserSession>,
}

impl Runtime {
    pub async fn close(self) {
        self.session.close().await;
    }
}
