//! Evidence extraction.
//!
//! Everything here is pure: text and tool traces in, typed records out.
//! Nothing in this module returns an error.

mod reasoning;
mod signals;

pub use reasoning::{record_reasoning, thinking_sentences, tool_info, ToolInfo};
pub use signals::{extract_signals, mine_tool_calls, parse_signal_text};
