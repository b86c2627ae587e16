pub mod browser;
pub mod config;
pub mod context;
pub mod eval;
pub mod expr;
pub mod fetch;
pub mod html;
pub mod interpolate;
pub mod paginate;
pub mod post;
pub mod request;
pub mod scope;
pub mod script;
pub mod select;
pub mod source;

pub use browser::{BrowserFetcher, BrowserOptions, BrowserScriptRuntime, BrowserSession};
pub use config::EngineConfig;
pub use context::RuleContext;
pub use eval::RuleEngine;
pub use expr::Mode;
pub use fetch::{FetchResponse, Fetcher, HttpFetcher};
pub use paginate::{PageParser, PageStrategy, Pagination, StopCondition};
pub use request::{RequestConfig, ResolvedRequest};
pub use scope::{Matched, Scope};
pub use script::{ScriptCall, ScriptRuntime};
pub use source::{Source, find_by_id, load_dir, load_embedded};
