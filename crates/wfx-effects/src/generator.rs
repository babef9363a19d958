//! Per-entrypoint HLSL generation.
//!
//! Effect-framework constructs are masked out of the block sequence and the
//! remaining source is re-emitted for a single entrypoint. Loose globals are
//! gathered into an auto-generated constant buffer. `#line` directives are
//! inserted wherever emitted text diverges from the original line positions,
//! so backend diagnostics keep pointing at the author's source.

use std::fmt::Write;

use crate::data::INVALID_ID;
use crate::parser::blocks::{LexBlock, LexBlockTypes};
use crate::parser::symbols::{ScopeBuilder, SymbolTypes, TokenTypes};
use crate::preprocessor::ShaderEntrypoint;
use crate::shader_types::ShaderTypes;

/// Name of the synthesized constant buffer holding loose globals.
pub const GLOBAL_CBUFFER_NAME: &str = "_EffectGlobals";

/// A replacement applied to a range of blocks: empty text deletes the range.
#[derive(Debug, Clone, Default)]
struct SourceMask {
    alt_text: String,
    start_block: i32,
    block_count: i32,
}

impl SourceMask {
    fn new(start_block: i32, block_count: i32) -> Self {
        SourceMask {
            alt_text: String::new(),
            start_block,
            block_count,
        }
    }

    fn last_block(&self) -> i32 {
        self.start_block + self.block_count - 1
    }
}

fn append_line_directive(line: u32, out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "#line {line}");
}

/// Emits masked HLSL for single entrypoints.
#[derive(Default)]
pub struct ShaderGenerator {
    global_vars: Vec<u32>,
    global_def_buf: String,
    masks: Vec<SourceMask>,
}

impl ShaderGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.global_vars.clear();
        self.global_def_buf.clear();
        self.masks.clear();
    }

    /// Emits the translation unit for `main`, masking every other entrypoint
    /// and all effect-framework constructs.
    pub fn get_shader_source(
        &mut self,
        sb: &ScopeBuilder,
        blocks: &[LexBlock],
        source: &str,
        main: &ShaderEntrypoint,
        entrypoints: &[ShaderEntrypoint],
        out: &mut String,
    ) {
        self.clear();
        self.collect_global_variables(sb, main.symbol_id);
        self.build_source_masks(sb, blocks, source, main, entrypoints);
        self.emit_masked_source(blocks, source, out);
    }

    /// Collects non-resource, non-modifier variables visible from `main`'s
    /// scope, sorted by symbol ID for stability.
    fn collect_global_variables(&mut self, sb: &ScopeBuilder, main_symbol: u32) {
        self.global_vars.clear();

        let mut scope = sb
            .symbol(main_symbol)
            .scope()
            .and_then(|scope| scope.parent());

        while let Some(current) = scope {
            for child in current.children() {
                if child.has_flags(SymbolTypes::VARIABLE)
                    && !child.has_flags(SymbolTypes::DEFINITION)
                    && !child.has_flags(SymbolTypes::AMBIGUOUS)
                    && child.has_ident()
                {
                    let (info, modifiers) = child.var_type();
                    let is_resource = info.map_or(false, |i| i.has_flags(ShaderTypes::RESOURCE));

                    if !is_resource && (modifiers & TokenTypes::TYPE_MODIFIER).is_empty() {
                        self.global_vars.push(child.id());
                    }
                }
            }

            scope = current.parent();
        }

        self.global_vars.sort_unstable();
    }

    fn build_source_masks(
        &mut self,
        sb: &ScopeBuilder,
        blocks: &[LexBlock],
        source: &str,
        main: &ShaderEntrypoint,
        entrypoints: &[ShaderEntrypoint],
    ) {
        self.masks.clear();

        // stage attributes never survive into HLSL
        for token_id in 0..sb.token_count() as u32 {
            let token = sb.token(token_id);
            if token.has_flags(TokenTypes::ATTRIB_SHADER_DECL) {
                let mut start = token.block_start as i32;
                let mut count = token.block_count as i32;

                // an attribute at the head of the file loses its opening
                // bracket in the match span
                if start > 0
                    && !blocks[start as usize].has_flags(LexBlockTypes::OPEN_SQUARE_BRACKETS)
                    && blocks[start as usize - 1].has_flags(LexBlockTypes::OPEN_SQUARE_BRACKETS)
                {
                    start -= 1;
                    count += 1;
                }

                self.masks.push(SourceMask::new(start, count));
            }
        }

        // mask other entrypoints; retain the contents of main's shader block
        for ep in entrypoints {
            if ep.symbol_id == INVALID_ID {
                continue;
            }

            let func = sb.symbol(ep.symbol_id);
            let Some(parent) = func.scope().and_then(|s| s.parent()) else {
                continue;
            };
            let is_main = ep.name == main.name;

            if !parent.is_global() {
                // block-declared shader
                self.add_scope_mask(parent.symbol(), !is_main);
            } else if !is_main {
                self.add_scope_mask(func, true);
            }
        }

        // techniques, passes and generic effect blocks disappear entirely
        for symbol_id in 0..sb.symbol_count() as u32 {
            let symbol = sb.symbol(symbol_id);
            if symbol.has_flags(SymbolTypes::FX) && !symbol.has_flags(SymbolTypes::SHADER) {
                self.add_scope_mask(symbol, true);
            }
        }

        if !self.global_vars.is_empty() {
            self.generate_global_cbuffer(sb, blocks, source);
        }
    }

    /// Masks a scoped symbol. When `mask_contents` is false only the block's
    /// open and close markers are removed, keeping the body.
    fn add_scope_mask(&mut self, symbol: crate::parser::symbols::SymbolHandle<'_>, mask_contents: bool) {
        let Some(scope) = symbol.scope() else {
            return;
        };

        let first_block = if symbol.has_ident() {
            symbol.ident().block_start() as i32
        } else {
            scope.block_start() as i32
        };
        let last_block = scope.block_start() as i32 + scope.block_count() as i32 - 1;

        if mask_contents {
            self.masks
                .push(SourceMask::new(first_block, last_block - first_block + 1));
        } else {
            self.masks.push(SourceMask::new(
                first_block,
                scope.block_start() as i32 - first_block + 1,
            ));
            self.masks.push(SourceMask::new(last_block, 1));
        }
    }

    /// Replaces loose global declarations with one `cbuffer` carrying their
    /// original text.
    fn generate_global_cbuffer(&mut self, sb: &ScopeBuilder, blocks: &[LexBlock], source: &str) {
        self.global_def_buf.clear();
        self.global_def_buf
            .push_str(&format!("cbuffer {GLOBAL_CBUFFER_NAME}\n{{\n"));
        let buf_mask_index = self.masks.len();
        // replacement text attaches to the first global's range
        self.masks.push(SourceMask::default());

        for i in 0..self.global_vars.len() {
            let var = sb.symbol(self.global_vars[i]);
            let ident = var.ident();
            let mut first_block = ident.block_start() as i32;
            let mut last_block = first_block;

            // variable bounds include attribute and type children
            for child in ident.children() {
                let block = child.block_start() as i32;
                first_block = first_block.min(block);
                last_block = last_block.max(block);
            }

            for block_id in first_block..=last_block {
                let block = &blocks[block_id as usize];
                let text = &source[block.span.clone()];

                // container contents arrive via their own blocks; only the
                // bounding characters are needed here
                if block.has_flags(LexBlockTypes::START_CONTAINER) {
                    if let Some(first) = text.chars().next() {
                        self.global_def_buf.push(first);
                    }
                } else if block.has_flags(LexBlockTypes::END_CONTAINER) {
                    if let Some(last) = text.chars().last() {
                        self.global_def_buf.push(last);
                    }
                } else {
                    self.global_def_buf.push_str(text);
                }
            }

            self.global_def_buf.push('\n');
            self.masks
                .push(SourceMask::new(first_block, last_block - first_block + 1));
        }

        self.global_def_buf.push('}');
        let replacement = std::mem::take(&mut self.global_def_buf);
        let (start_block, block_count) = {
            let first_global = &self.masks[buf_mask_index + 1];
            (first_global.start_block, first_global.block_count)
        };
        self.masks[buf_mask_index] = SourceMask {
            alt_text: replacement,
            start_block,
            block_count,
        };
    }

    /// Sorts masks, resolves overlaps, then walks blocks emitting unmasked
    /// text verbatim and alt-text bracketed by `#line` directives.
    fn emit_masked_source(&mut self, blocks: &[LexBlock], source: &str, out: &mut String) {
        self.masks.sort_by_key(SourceMask::last_block);

        // walk backwards over adjacent pairs: supersets nullify the earlier
        // mask, partial overlaps truncate it
        for i in (1..self.masks.len()).rev() {
            let (earlier, later) = {
                let (head, tail) = self.masks.split_at_mut(i);
                (&mut head[i - 1], &mut tail[0])
            };
            correct_mask_pair(earlier, later);
        }

        let mut line = 1u32;
        let mut block_index = 0i32;

        let masks = std::mem::take(&mut self.masks);
        for mask in &masks {
            if mask.block_count == 0 {
                continue;
            }

            self.add_block_range(blocks, source, block_index, mask.start_block - 1, out, &mut line);

            if !mask.alt_text.is_empty() {
                let start_line = blocks[mask.start_block as usize].start_line;

                if line != start_line {
                    append_line_directive(start_line, out);
                }

                out.push_str(&mask.alt_text);
                line = start_line + mask.alt_text.matches('\n').count() as u32;
            }

            block_index = mask.start_block + mask.block_count;
        }
        self.masks = masks;

        self.add_block_range(blocks, source, block_index, blocks.len() as i32 - 1, out, &mut line);
    }

    fn add_block_range(
        &self,
        blocks: &[LexBlock],
        source: &str,
        mut start: i32,
        end: i32,
        out: &mut String,
        line: &mut u32,
    ) {
        while start <= end {
            let block = &blocks[start as usize];
            let text = &source[block.span.clone()];

            // retained #line directives re-anchor the running counter
            if start + 1 <= end && block.has_flags(LexBlockTypes::LINE_DIRECTIVE_NAME) {
                let body = &blocks[start as usize + 1];
                debug_assert!(body.has_flags(LexBlockTypes::LINE_DIRECTIVE_BODY));

                *line = body.start_line + 1;

                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(text);
                out.push(' ');
                out.push_str(&source[body.span.clone()]);
                out.push('\n');
                start += 2;
                continue;
            }

            if !block.has_flags(LexBlockTypes::END_CONTAINER) {
                if block.start_line > *line + 3 {
                    append_line_directive(block.start_line, out);
                    *line = block.start_line;
                } else {
                    while *line < block.start_line {
                        out.push('\n');
                        *line += 1;
                    }
                }
            }

            if block.has_flags(LexBlockTypes::START_CONTAINER) {
                if let Some(first) = text.chars().next() {
                    out.push(first);
                }
            } else if block.has_flags(LexBlockTypes::END_CONTAINER) {
                if let Some(last) = text.chars().last() {
                    out.push(last);
                }
            } else if block.has_flags(LexBlockTypes::DIRECTIVE_NAME) {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(text);
                out.push(' ');
                *line += block.line_count;
            } else {
                out.push_str(text);
                *line += block.line_count;
            }

            start += 1;
        }
    }
}

/// Resolves one overlapping mask pair: the superset survives, partial
/// overlaps truncate the earlier mask to end where the later begins.
fn correct_mask_pair(a: &mut SourceMask, b: &mut SourceMask) {
    if a.start_block > b.start_block {
        std::mem::swap(a, b);
    }

    let end_a = a.start_block + a.block_count;
    let end_b = b.start_block + b.block_count;

    if end_a >= end_b {
        // a is a superset of b
        b.start_block = 0;
        b.block_count = 0;
    } else if end_a > b.start_block {
        let max_last = b.start_block - 1;
        let last = (a.start_block + a.block_count - 1).min(max_last);
        a.block_count = (last - a.start_block + 1).max(0);
        a.start_block = a.start_block.min(max_last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ShadeStage;
    use crate::parser::blocks::BlockAnalyzer;
    use crate::parser::matcher::SymbolParser;

    fn generate(src: &str, main_name: &str, declared: &[(&str, ShadeStage)]) -> String {
        let mut analyzer = BlockAnalyzer::new();
        analyzer.analyze("test.wfx", src).unwrap();
        let mut sb = ScopeBuilder::new();
        let mut parser = SymbolParser::new();
        parser.parse(&analyzer, &mut sb).unwrap();

        // resolve entrypoints by function name
        let mut entrypoints = Vec::new();
        for &(name, stage) in declared {
            let symbol = (0..sb.symbol_count() as u32)
                .find(|&i| {
                    let data = sb.symbol_data(i);
                    data.has_flags(SymbolTypes::FUNC_DEFINITION)
                        && data.ident_id != INVALID_ID
                        && sb.token(data.ident_id).value == name
                })
                .expect("entrypoint function");
            let mut ep = ShaderEntrypoint::new(name, stage);
            ep.symbol_id = symbol;
            entrypoints.push(ep);
        }

        let main = entrypoints
            .iter()
            .find(|ep| ep.name == main_name)
            .cloned()
            .unwrap();

        let mut generator = ShaderGenerator::new();
        let mut out = String::new();
        generator.get_shader_source(
            &sb,
            analyzer.blocks(),
            analyzer.source(),
            &main,
            &entrypoints,
            &mut out,
        );
        out
    }

    #[test]
    fn other_entrypoints_are_masked() {
        let src = "void VS_Main() { int a; }\nvoid PS_Main() { int b; }";
        let out = generate(
            src,
            "VS_Main",
            &[("VS_Main", ShadeStage::Vertex), ("PS_Main", ShadeStage::Pixel)],
        );
        assert!(out.contains("VS_Main"), "{out}");
        assert!(!out.contains("PS_Main"), "{out}");
    }

    #[test]
    fn techniques_are_masked() {
        let src = "void VS_Main() { }\ntechnique T { pass P { vertex VS_Main; } }";
        let out = generate(src, "VS_Main", &[("VS_Main", ShadeStage::Vertex)]);
        assert!(out.contains("VS_Main"));
        assert!(!out.contains("technique"), "{out}");
        assert!(!out.contains("pass"), "{out}");
    }

    #[test]
    fn globals_move_into_cbuffer() {
        let src = "float4 gTint;\nfloat gExposure;\nvoid PS_Main() { }";
        let out = generate(src, "PS_Main", &[("PS_Main", ShadeStage::Pixel)]);

        assert!(out.contains("cbuffer _EffectGlobals"), "{out}");
        assert!(out.contains("float4 gTint;"));
        assert!(out.contains("float gExposure;"));

        // declarations must not appear twice
        assert_eq!(out.matches("gTint").count(), 1, "{out}");
    }

    #[test]
    fn static_and_resource_globals_stay() {
        let src = "static const float PI = 3.14;\nTexture2D gTex;\nfloat gReal;\nvoid PS() { }";
        let out = generate(src, "PS", &[("PS", ShadeStage::Pixel)]);

        // only gReal is gathered
        assert!(out.contains("cbuffer _EffectGlobals"));
        assert!(out.contains("Texture2D gTex;"));
        let cbuf_start = out.find(GLOBAL_CBUFFER_NAME).unwrap();
        let cbuf_end = out[cbuf_start..].find('}').unwrap() + cbuf_start;
        let cbuf_body = &out[cbuf_start..cbuf_end];
        assert!(cbuf_body.contains("gReal"));
        assert!(!cbuf_body.contains("gTex"));
        assert!(!cbuf_body.contains("PI"));
    }

    #[test]
    fn stage_attributes_are_stripped() {
        let src = "[compute]\n[numthreads(1, 1, 1)]\nvoid CS(uint3 id : SV_DispatchThreadID) { }";
        let out = generate(src, "CS", &[("CS", ShadeStage::Compute)]);

        assert!(!out.contains("[compute]"), "{out}");
        assert!(out.contains("numthreads"), "{out}");
        assert!(out.contains("CS"));
    }

    #[test]
    fn main_shader_block_keeps_body() {
        let src = "pixel Blur {\n  float4 Blur() : SV_Target { return 0; }\n}\n";
        let mut analyzer = BlockAnalyzer::new();
        analyzer.analyze("test.wfx", src).unwrap();
        let mut sb = ScopeBuilder::new();
        let mut parser = SymbolParser::new();
        parser.parse(&analyzer, &mut sb).unwrap();

        // find the function inside the block scope
        let func = (0..sb.symbol_count() as u32)
            .find(|&i| sb.symbol_data(i).has_flags(SymbolTypes::FUNC_DEFINITION))
            .unwrap();
        let mut ep = ShaderEntrypoint::new("Blur", ShadeStage::Pixel);
        ep.symbol_id = func;

        let mut generator = ShaderGenerator::new();
        let mut out = String::new();
        generator.get_shader_source(
            &sb,
            analyzer.blocks(),
            analyzer.source(),
            &ep,
            std::slice::from_ref(&ep),
            &mut out,
        );

        assert!(out.contains("SV_Target"), "{out}");
        assert!(out.contains("return 0;"));
        // the block wrapper itself is gone: no `pixel` keyword remains
        assert!(!out.contains("pixel"), "{out}");
    }

    #[test]
    fn mask_overlap_resolution() {
        let mut a = SourceMask::new(2, 6);
        let mut b = SourceMask::new(4, 2);
        // b inside a: b is nullified after ordering swap
        correct_mask_pair(&mut a, &mut b);
        assert_eq!((b.start_block, b.block_count), (0, 0));

        let mut a = SourceMask::new(2, 4);
        let mut b = SourceMask::new(4, 5);
        correct_mask_pair(&mut a, &mut b);
        // a truncated to end where b begins
        assert_eq!((a.start_block, a.block_count), (2, 2));
    }
}
