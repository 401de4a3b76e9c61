//! Inline device-control macros embedded in chat text

pub mod parser;
pub mod pipeline;

pub use self::parser::{MacroAction, MacroMatch, MacroParser};
pub use self::pipeline::{MacroPipeline, MessageProjections, PipelineConfig};
