//! Book-level operations built on the rule engine: one function per source module.

mod fields;

pub mod chapter;
pub mod content;
pub mod detail;
pub mod discover;
pub mod purify;
pub mod search;
pub mod types;

pub use chapter::chapter_list;
pub use content::chapter_content;
pub use detail::book_detail;
pub use discover::{discover, discover_categories};
pub use search::search;
pub use types::{Book, Category, Chapter, Content, ContentKind};
