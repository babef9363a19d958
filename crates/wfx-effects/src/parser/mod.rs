//! Source analysis: block lexing, pattern matching and symbol tables.

pub mod blocks;
pub mod matcher;
pub mod patterns;
pub mod symbols;

pub use blocks::{BlockAnalyzer, LexBlock, LexBlockTypes, LexFile};
pub use matcher::SymbolParser;
pub use symbols::{ScopeBuilder, SymbolTypes, TokenTypes};
