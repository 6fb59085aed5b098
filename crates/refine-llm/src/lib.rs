pub mod anthropic;
pub mod collect;
pub mod converter;
pub mod reliable;
pub mod structured;

pub mod mock;

pub use anthropic::AnthropicProvider;
pub use collect::collect_message;
pub use mock::{MockProvider, MockResponse};
pub use reliable::{ReliableConfig, ReliableProvider};
pub use structured::{corrective_prompt, parse_structured, strip_code_fences, JudgmentParseError};
