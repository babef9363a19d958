//! Backtracking pattern matcher over lex blocks.
//!
//! Captures are collected into staging buffers and committed atomically when
//! a node succeeds; on failure every buffer touched by the attempt is
//! truncated back to a saved water mark. A tree is built by promoting the
//! capture designated by the node's parent-token type and making the other
//! captures its children, in order.

use crate::data::INVALID_ID;
use crate::error::Result;

use super::blocks::{BlockAnalyzer, LexBlock, LexBlockTypes};
use super::patterns::{
    match_groups, CapturePattern, MatchNode, MatchNodeKind, MatchPattern, MatchQualifiers,
};
use super::symbols::{try_shader_keyword, ScopeBuilder, SymbolTypes, TokenTypes};

/// Characters that split words inside a block, in addition to whitespace.
const WORD_BREAKS: &[char] = &['=', ',', ':', ';', '[', ']', '(', ')', '<', '>', '{', '}'];

fn is_word_break(c: char) -> bool {
    c.is_whitespace() || WORD_BREAKS.contains(&c)
}

/// Iterates whitespace/punctuation-delimited words of a block's text.
struct WordCursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn new(text: &'a str) -> Self {
        WordCursor { text, pos: 0 }
    }

    fn peek(&self) -> Option<&'a str> {
        let rest = &self.text[self.pos..];
        let start = rest.find(|c: char| !is_word_break(c))?;
        let rest = &rest[start..];
        let end = rest.find(is_word_break).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    fn advance(&mut self) {
        let rest = &self.text[self.pos..];
        let Some(start) = rest.find(|c: char| !is_word_break(c)) else {
            self.pos = self.text.len();
            return;
        };
        let word_end = rest[start..]
            .find(is_word_break)
            .map(|e| start + e)
            .unwrap_or(rest.len());
        self.pos += word_end;
    }
}

/// Leading word of a block's text.
pub fn first_word(text: &str) -> Option<&str> {
    WordCursor::new(text).peek()
}

/// One matched block paired with the capture patterns to apply to it.
#[derive(Clone, Copy)]
struct CaptureBlock {
    block_id: i32,
    /// Index into `patterns` of the capture that owns the group, -1 if none.
    main_cap: i32,
    patterns: &'static [CapturePattern],
}

/// A node of the capture tree under construction.
#[derive(Clone, Copy, Default)]
struct CaptureGroup {
    sub_group_start: usize,
    sub_group_count: usize,
    cap_start: usize,
    cap_count: usize,
    src_start: i32,
    src_count: i32,
    parent_cap: i32,
}

/// Staged token definition, committed into the scope builder once a root
/// group resolves.
#[derive(Clone)]
struct TokenNodeDef {
    name: String,
    token_flags: TokenTypes,
    symbol_flags: SymbolTypes,
    block_start: i32,
    block_count: i32,
    child_start: usize,
    child_count: usize,
}

/// Water marks taken at node entry for rollback.
struct MatchState {
    match_start: i32,
    match_end: i32,
    cap_buf_start: usize,
    cap_start: usize,
    group_start: usize,
    sub_group_start: usize,
}

/// Recognizes declarations over a block sequence and populates a
/// [`ScopeBuilder`].
#[derive(Default)]
pub struct SymbolParser {
    captures: Vec<CaptureBlock>,
    capture_buf: Vec<CaptureBlock>,
    cap_groups: Vec<CaptureGroup>,
    cap_sub_groups: Vec<CaptureGroup>,
    token_buf: Vec<TokenNodeDef>,
    token_parent_buf: Vec<TokenNodeDef>,
}

impl SymbolParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.clear_match_buffers();
        self.token_buf.clear();
        self.token_parent_buf.clear();
    }

    fn clear_match_buffers(&mut self) {
        self.captures.clear();
        self.capture_buf.clear();
        self.cap_groups.clear();
        self.cap_sub_groups.clear();
    }

    /// Walks top-level blocks, tracking scopes and attempting catalogue
    /// matches at every non-container block.
    pub fn parse(&mut self, analyzer: &BlockAnalyzer, sb: &mut ScopeBuilder) -> Result<()> {
        self.clear();
        let blocks = analyzer.blocks();
        let mut i = 0usize;

        while i < blocks.len() {
            let block = &blocks[i];

            if block.has_flags(LexBlockTypes::DIRECTIVE) {
                i += 1;
                continue;
            }

            if block.has_flags(LexBlockTypes::START_SCOPE) {
                sb.push_scope(i as u32, block.depth)?;
                i += 1;
                continue;
            }

            if block.has_flags(LexBlockTypes::END_SCOPE) {
                sb.pop_scope(i as u32)
                    .map_err(|e| analyzer.syntax_error(i, e.to_string()))?;
                i += 1;
                continue;
            }

            if !block.has_flags(LexBlockTypes::CONTAINER) {
                let word = first_word(analyzer.block_text(block));

                if let Some(flags) = word.and_then(|w| sb.token_flags(w, None)) {
                    let length = self.try_match_pattern_type(blocks, i as i32, flags);

                    if length > 0 {
                        self.capture_symbols(analyzer, sb)?;
                        i += length as usize - 1;

                        // leave a trailing scope opener for the main loop
                        if blocks[i.min(blocks.len() - 1)].has_flags(LexBlockTypes::START_SCOPE) {
                            i -= 1;
                        }
                    }
                }
            }

            i += 1;
        }

        Ok(())
    }

    /// Tries every catalogue group whose leading flags intersect. Returns the
    /// matched length in blocks, or -1.
    fn try_match_pattern_type(
        &mut self,
        blocks: &[LexBlock],
        start: i32,
        start_flags: TokenTypes,
    ) -> i32 {
        for group in match_groups() {
            if !group.matches_leading(start_flags) {
                continue;
            }

            for root in &group.roots {
                self.clear_match_buffers();
                let next_match = self.try_match_node(blocks, root, start);

                if next_match != -1 {
                    // create a default root group when the pattern did not
                    // define an owning capture
                    if !self.capture_buf.is_empty() {
                        let sub_group_start = self.cap_sub_groups.len();
                        let sub_group_count = self.cap_groups.len();
                        self.cap_sub_groups.append(&mut self.cap_groups);

                        let group = CaptureGroup {
                            sub_group_start,
                            sub_group_count,
                            cap_start: self.captures.len(),
                            cap_count: self.capture_buf.len(),
                            src_start: start,
                            src_count: next_match - start,
                            parent_cap: -1,
                        };
                        self.cap_groups.push(group);
                        self.captures.append(&mut self.capture_buf);
                    }

                    return next_match - start;
                }
            }
        }

        -1
    }

    /// Matches one node recursively. Returns the next unmatched index, or -1.
    fn try_match_node(&mut self, blocks: &[LexBlock], node: &'static MatchNode, mut match_start: i32) -> i32 {
        let is_optional = node.has_quals(MatchQualifiers::OPTIONAL);
        let is_unbounded = node.has_quals(MatchQualifiers::ONE_OR_MORE);
        let is_alternation = node.has_quals(MatchQualifiers::ALTERNATION);
        let mut last_start = match_start;

        loop {
            let mut state = MatchState {
                match_start,
                match_end: match_start,
                cap_buf_start: self.capture_buf.len(),
                cap_start: self.captures.len(),
                group_start: self.cap_groups.len(),
                sub_group_start: self.cap_sub_groups.len(),
            };

            if let MatchNodeKind::Patterns(_) = &node.kind {
                if last_start != -1 {
                    last_start = self.try_match_pattern(blocks, node, match_start, is_alternation);

                    if last_start >= state.match_end {
                        state.match_end = last_start - 1;
                    } else {
                        state.match_start = last_start + 1;
                    }
                }
            }

            if let MatchNodeKind::Nodes(subpatterns) = &node.kind {
                if last_start != -1 {
                    // backward-matching prefixes start one block left of the
                    // pivot
                    last_start = if node.is_forward {
                        (match_start - 1).max(0)
                    } else {
                        match_start
                    };
                    let mut was_reversed = node.is_forward;
                    let last_node = subpatterns.len() - 1;

                    for (i, sub) in subpatterns.iter().enumerate() {
                        if was_reversed && sub.is_forward {
                            was_reversed = false;
                            last_start = match_start;
                        }

                        let next_start = self.try_match_node(blocks, sub, last_start);
                        let is_end = (is_alternation && i != last_node) ^ (next_start == -1);

                        if is_end || next_start != -1 {
                            last_start = next_start;

                            if last_start >= state.match_end {
                                state.match_end = last_start - 1;
                            } else {
                                state.match_start = last_start + 1;
                            }
                        }

                        if is_end {
                            break;
                        }
                    }
                }
            }

            if last_start != -1 {
                match_start = last_start;
                self.finalize_captures(node, &state);
            } else {
                self.rollback(&state);
            }

            if !(is_unbounded && last_start != -1) {
                break;
            }
        }

        if last_start == -1 && is_optional {
            match_start
        } else {
            last_start
        }
    }

    /// Matches the pattern sequence of a patterns-kind node.
    fn try_match_pattern(
        &mut self,
        blocks: &[LexBlock],
        node: &'static MatchNode,
        mut match_start: i32,
        is_alternation: bool,
    ) -> i32 {
        let MatchNodeKind::Patterns(patterns) = &node.kind else {
            return -1;
        };
        let last = patterns.len() as i32 - 1;
        let dir: i32 = if node.is_forward { 1 } else { -1 };

        for (i, pattern) in patterns.iter().enumerate() {
            let is_optional = pattern.has_quals(MatchQualifiers::OPTIONAL)
                || (is_alternation && (i as i32) < last);
            let is_unbounded = pattern.has_quals(MatchQualifiers::ONE_OR_MORE);
            let pattern_start = match_start;

            loop {
                match_start = directive_end(blocks, match_start, dir);
                let next_start = self.try_match_block_pattern(blocks, pattern, match_start, dir);

                if next_start == -1 {
                    if !is_optional && match_start == pattern_start {
                        return -1;
                    }
                } else if next_start != match_start {
                    if pattern.has_captures() {
                        self.capture_buf.push(CaptureBlock {
                            block_id: match_start,
                            main_cap: -1,
                            patterns: &pattern.captures,
                        });
                    }
                    match_start = next_start;
                }

                if !(is_unbounded && next_start != -1) {
                    break;
                }
            }
        }

        match_start
    }

    /// Matches one block-qualifier sequence. Returns the next index, or -1.
    fn try_match_block_pattern(
        &mut self,
        blocks: &[LexBlock],
        pattern: &MatchPattern,
        mut match_start: i32,
        dir: i32,
    ) -> i32 {
        debug_assert!(!pattern.blocks.is_empty(), "empty matching patterns are not allowed");

        let is_alternation = pattern.has_quals(MatchQualifiers::ALTERNATION);
        let last = pattern.blocks.len() as i32 - 1;
        let len = blocks.len() as i32;

        for (i, qualifier) in pattern.blocks.iter().enumerate() {
            let is_wild = qualifier.is_wild();
            let is_optional = qualifier.has_quals(MatchQualifiers::OPTIONAL)
                || (is_alternation && (i as i32) < last);
            let is_unbounded = qualifier.has_quals(MatchQualifiers::ONE_OR_MORE);
            let mut match_end = (match_start + dir).min(len);

            if is_unbounded {
                // bound the greedy match by the next qualifier in sequence
                let bound = &pattern.blocks[i + 1];
                let mut new_end = -1;
                let mut j = match_start;

                while j >= 0 && j < len {
                    if blocks[j as usize].has_flags(bound.ty) {
                        new_end = j;
                        break;
                    }
                    j += dir;
                }

                if new_end == -1 {
                    return -1;
                }
                match_end = new_end;
            }

            let mut next_start = match_start;
            while next_start != match_end {
                let block = &blocks[next_start as usize];
                let can_skip = is_wild
                    || (next_start != match_start && block.has_flags(LexBlockTypes::DIRECTIVE));

                if block.has_flags(qualifier.ty) || can_skip {
                    next_start += dir;
                } else {
                    break;
                }
            }

            if next_start == match_start && !is_optional {
                return -1;
            } else if next_start >= 0 && next_start != match_start {
                match_start = next_start;

                if is_alternation {
                    break;
                }
            }
        }

        match_start
    }

    /// Commits this attempt's captures, promoting the parent capture when the
    /// node designates one.
    fn finalize_captures(&mut self, node: &'static MatchNode, state: &MatchState) {
        if node.parent_token.is_empty() {
            return;
        }

        let sub_group_count = self.cap_groups.len() - state.group_start;
        let cap_count = self.capture_buf.len() - state.cap_buf_start;
        let sub_group_start = self.cap_sub_groups.len();

        if cap_count == 0 && sub_group_count == 0 {
            return;
        }

        // demote children into the sub-group buffer, honoring direction
        let demoted: Vec<_> = self.cap_groups.drain(state.group_start..).collect();
        if node.is_forward {
            self.cap_sub_groups.extend(demoted);
        } else {
            self.cap_sub_groups.extend(demoted.into_iter().rev());
        }

        let mut group = CaptureGroup {
            sub_group_start,
            sub_group_count,
            cap_start: self.captures.len(),
            cap_count,
            src_start: state.match_start,
            src_count: state.match_end - state.match_start + 1,
            parent_cap: -1,
        };

        // move staged captures into the committed buffer, honoring direction
        let staged: Vec<_> = self.capture_buf.drain(state.cap_buf_start..).collect();
        if node.is_forward {
            self.captures.extend(staged);
        } else {
            self.captures.extend(staged.into_iter().rev());
        }

        for i in group.cap_start..self.captures.len() {
            for (j, pattern) in self.captures[i].patterns.iter().enumerate() {
                if pattern.token_type.contains(node.parent_token) && !node.parent_token.is_empty() {
                    group.parent_cap = i as i32;
                    self.captures[i].main_cap = j as i32;
                    break;
                }
            }
        }

        self.cap_groups.push(group);
    }

    fn rollback(&mut self, state: &MatchState) {
        self.capture_buf.truncate(state.cap_buf_start);
        self.captures.truncate(state.cap_start);
        self.cap_sub_groups.truncate(state.sub_group_start);
        self.cap_groups.truncate(state.group_start);
    }

    /// Converts committed capture groups into tokens and symbols.
    fn capture_symbols(&mut self, analyzer: &BlockAnalyzer, sb: &mut ScopeBuilder) -> Result<()> {
        let roots: Vec<CaptureGroup> = self.cap_groups.drain(..).collect();

        for root in roots {
            let token_start = sb.token_count() as u32;

            self.capture_child_nodes(&root, analyzer, sb)?;
            let parents: Vec<_> = self.token_parent_buf.drain(..).collect();
            self.token_buf.extend(parents);

            let defs: Vec<TokenNodeDef> = self.token_buf.drain(..).collect();
            for def in &defs {
                self.commit_token(def, analyzer, sb)?;
            }

            for token_id in token_start..sb.token_count() as u32 {
                let symbol_id = sb.token(token_id).symbol_id;
                if symbol_id != INVALID_ID {
                    self.push_symbol(symbol_id, sb)?;
                }
            }
        }

        self.token_buf.clear();
        self.token_parent_buf.clear();
        Ok(())
    }

    /// Depth-first capture of a group tree. The group's parent capture, if
    /// any, is promoted above the tokens captured beneath it.
    fn capture_child_nodes(
        &mut self,
        node: &CaptureGroup,
        analyzer: &BlockAnalyzer,
        sb: &ScopeBuilder,
    ) -> Result<()> {
        let node_start = self.token_parent_buf.len();

        for i in node.sub_group_start..node.sub_group_start + node.sub_group_count {
            let sub = self.cap_sub_groups[i];
            self.capture_child_nodes(&sub, analyzer, sb)?;
        }

        let child_start = self.token_buf.len();

        for i in node.cap_start..node.cap_start + node.cap_count {
            if node.parent_cap != i as i32 {
                let cap = self.captures[i];
                debug_assert!(cap.main_cap == -1, "only one owner per token group");
                self.capture_tokens(&cap, analyzer, sb)?;
            }
        }

        if node.parent_cap != -1 {
            // move completed sub-parents down into the child buffer
            let moved: Vec<_> = self.token_parent_buf.drain(node_start..).collect();
            self.token_buf.extend(moved);

            let cap = self.captures[node.parent_cap as usize];
            debug_assert!(cap.main_cap != -1, "owner specified but not captured");
            let cap_start = self.token_buf.len();
            self.capture_tokens(&cap, analyzer, sb)?;

            let main_index = cap_start + cap.main_cap as usize;
            let mut owner = self.token_buf.remove(main_index);
            owner.block_start = node.src_start;
            owner.block_count = node.src_count;
            owner.child_start = child_start + sb.token_count();
            owner.child_count = self.token_buf.len() - child_start;
            self.token_parent_buf.push(owner);
        }

        Ok(())
    }

    /// Applies one capture-pattern list to a block's words.
    fn capture_tokens(
        &mut self,
        cap: &CaptureBlock,
        analyzer: &BlockAnalyzer,
        sb: &ScopeBuilder,
    ) -> Result<()> {
        let token_start = self.token_buf.len();
        let block = &analyzer.blocks()[cap.block_id as usize];
        let text = analyzer.block_text(block);
        let mut cursor = WordCursor::new(text);

        for pattern in cap.patterns {
            let mut flags = TokenTypes::empty();

            for qualifier in &pattern.predicates {
                let is_optional = qualifier.quals.contains(MatchQualifiers::OPTIONAL);
                let is_unbounded = qualifier.quals.contains(MatchQualifiers::ONE_OR_MORE);

                loop {
                    let Some(word) = cursor.peek() else {
                        if is_optional {
                            break;
                        }
                        return Err(analyzer
                            .syntax_error(cap.block_id as usize, "expected an identifier"));
                    };

                    match sb.token_flags(word, None) {
                        Some(word_flags) if word_flags.contains(qualifier.ty) => {
                            flags |= word_flags;
                            cursor.advance();
                        }
                        _ if is_optional => break,
                        _ => {
                            return Err(analyzer.syntax_error(
                                cap.block_id as usize,
                                format!("Unexpected expression: {word}"),
                            ));
                        }
                    }

                    if !is_unbounded {
                        break;
                    }
                }
            }

            let Some(name) = cursor.peek() else {
                return Err(
                    analyzer.syntax_error(cap.block_id as usize, "expected an identifier")
                );
            };

            let known = sb.token_flags(name, None).is_some();
            let redefines = known
                && !pattern.symbol_type.is_empty()
                && !pattern.symbol_type.contains(SymbolTypes::FUNC_DEFINITION);

            if redefines {
                return Err(analyzer.syntax_error(
                    cap.block_id as usize,
                    format!("Unexpected expression: {name}"),
                ));
            }

            self.token_buf.push(TokenNodeDef {
                name: name.to_string(),
                token_flags: flags | pattern.token_type,
                symbol_flags: pattern.symbol_type,
                block_start: cap.block_id,
                block_count: 0,
                child_start: 0,
                child_count: 0,
            });
            cursor.advance();
        }

        debug_assert_eq!(
            self.token_buf.len() - token_start,
            cap.patterns.len(),
            "expected one token per capture pattern"
        );
        Ok(())
    }

    /// Materializes one staged token in the scope builder and allocates its
    /// subtype data.
    fn commit_token(
        &self,
        def: &TokenNodeDef,
        analyzer: &BlockAnalyzer,
        sb: &mut ScopeBuilder,
    ) -> Result<u32> {
        let block = &analyzer.blocks()[def.block_start as usize];
        let token_id = sb.new_token(&def.name, def.token_flags, block.depth, def.block_start as u32);

        {
            let token = sb.token_mut(token_id);
            token.block_count = def.block_count.max(1) as u32;
            token.child_start = def.child_start as u32;
            token.child_count = def.child_count as u32;
        }

        let symbol_flags = def.symbol_flags;

        if symbol_flags.contains(SymbolTypes::FUNCTION)
            && !symbol_flags.contains(SymbolTypes::AMBIGUOUS)
        {
            sb.new_func(token_id, symbol_flags);
        } else if symbol_flags.contains(SymbolTypes::TYPE_ALIAS) {
            sb.new_type_alias(token_id);
        } else if symbol_flags.contains(SymbolTypes::STRUCT)
            || symbol_flags.contains(SymbolTypes::CONST_BUF)
        {
            sb.new_user_type(token_id, symbol_flags);
        } else if !symbol_flags.is_empty() {
            sb.new_symbol(token_id, symbol_flags);
        } else if def.token_flags.contains(TokenTypes::TYPE) {
            sb.new_type_specifier(token_id);
        } else if def.token_flags.contains(TokenTypes::ATTRIBUTE)
            || def.token_flags.contains(TokenTypes::SEMANTIC)
        {
            let attrib_id = sb.new_attribute(token_id);

            // attribute names may carry shader keyword flags ([compute] etc.)
            let value = sb.token(token_id).value.clone();
            if let Some(flags) = try_shader_keyword(&value) {
                sb.token_mut(token_id).ty |= flags;
            }

            let (stripped, index) = extract_semantic_index(&value);
            if index >= 0 {
                sb.token_mut(token_id).value = stripped;
                sb.attrib_data_mut(attrib_id).semantic_index = index;
            }
        }

        Ok(token_id)
    }

    /// Registers a symbol, computing overload signatures for function
    /// definitions first.
    fn push_symbol(&self, symbol_id: u32, sb: &mut ScopeBuilder) -> Result<()> {
        let symbol = *sb.symbol_data(symbol_id);

        if symbol.has_flags(SymbolTypes::FUNC_DEFINITION) {
            build_func_signature(sb, symbol.ident_id);
        }

        let deferred = symbol.has_flags(SymbolTypes::PARAMETER);
        sb.push_symbol(symbol_id, deferred)
    }
}

/// Skips directive blocks in the given direction.
fn directive_end(blocks: &[LexBlock], mut start: i32, dir: i32) -> i32 {
    while start > 0
        && (start as usize) < blocks.len()
        && blocks[start as usize].has_flags(LexBlockTypes::DIRECTIVE)
    {
        start += dir;
    }
    start
}

/// Splits a trailing digit run into a semantic index, unless the run is
/// separated from the name by an underscore (`TEXCOORD10` yields
/// (`TEXCOORD`, 10), `MY_ATTR_0` stays intact).
fn extract_semantic_index(value: &str) -> (String, i32) {
    let bytes = value.as_bytes();
    if bytes.is_empty() || !bytes[bytes.len() - 1].is_ascii_digit() {
        return (value.to_string(), -1);
    }

    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }

    if start == 0 || bytes[start - 1] == b'_' {
        return (value.to_string(), -1);
    }

    let index: i32 = value[start..].parse().unwrap_or(-1);
    (value[..start].to_string(), index)
}

/// Builds and stores the canonical `name(t1,t2,…)` signature for a function
/// definition.
fn build_func_signature(sb: &mut ScopeBuilder, ident_id: u32) {
    let ident = sb.token(ident_id);
    let func_slot = ident.subtype_id;
    let mut signature = String::with_capacity(ident.value.len() + 8);
    signature.push_str(&ident.value);
    signature.push('(');

    let child_range = ident.child_start..ident.child_start + ident.child_count;
    let mut param_count = 0;

    for child_id in child_range {
        let child = sb.token(child_id);
        if child.symbol_id == INVALID_ID || !child.has_flags(TokenTypes::PARAMETER) {
            continue;
        }

        let mut type_name: Option<String> = None;
        for param_child in sb.token_children(child_id) {
            if param_child.has_flags(TokenTypes::TYPE) {
                type_name = Some(
                    sb.type_data(param_child.subtype_id)
                        .map(|info| info.name.clone())
                        .unwrap_or_else(|| param_child.value.clone()),
                );
                break;
            }
        }

        if let Some(name) = type_name {
            if param_count > 0 {
                signature.push(',');
            }
            signature.push_str(&name);
            param_count += 1;
        }
    }

    if param_count == 0 {
        signature.push_str("void");
    }
    signature.push(')');

    sb.func_data_mut(func_slot).signature = signature;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::BlockAnalyzer;

    fn parse(src: &str) -> (BlockAnalyzer, ScopeBuilder) {
        let mut analyzer = BlockAnalyzer::new();
        analyzer.analyze("test.wfx", src).unwrap();
        let mut sb = ScopeBuilder::new();
        let mut parser = SymbolParser::new();
        parser.parse(&analyzer, &mut sb).unwrap();
        (analyzer, sb)
    }

    fn symbol_by_name<'a>(sb: &'a ScopeBuilder, name: &str) -> Option<u32> {
        (0..sb.symbol_count() as u32).find(|&i| {
            let data = sb.symbol_data(i);
            data.ident_id != INVALID_ID && sb.token(data.ident_id).value == name
        })
    }

    #[test]
    fn semantic_index_extraction() {
        assert_eq!(extract_semantic_index("TEXCOORD10"), ("TEXCOORD".to_string(), 10));
        assert_eq!(extract_semantic_index("SV_Target0"), ("SV_Target".to_string(), 0));
        assert_eq!(extract_semantic_index("MY_ATTR_0"), ("MY_ATTR_0".to_string(), -1));
        assert_eq!(extract_semantic_index("POSITION"), ("POSITION".to_string(), -1));
    }

    #[test]
    fn global_variable_declaration() {
        let (_, sb) = parse("float4 gTint;");
        let id = symbol_by_name(&sb, "gTint").expect("variable symbol");
        assert!(sb.symbol(id).has_flags(SymbolTypes::VARIABLE_DECL));

        // the type token is a child of the identifier
        let ident = sb.symbol(id).ident();
        let types: Vec<_> = ident.children().map(|c| c.value().to_string()).collect();
        assert!(types.contains(&"float4".to_string()));
    }

    #[test]
    fn variable_with_initializer() {
        let (_, sb) = parse("static const float PI = 3.14159;");
        let id = symbol_by_name(&sb, "PI").expect("variable symbol");
        assert!(sb.symbol(id).has_flags(SymbolTypes::VARIABLE_ASSIGN_DEF));
        let (_, modifiers) = sb.symbol(id).var_type();
        assert!(modifiers.contains(TokenTypes::STATIC));
        assert!(modifiers.contains(TokenTypes::CONST));
    }

    #[test]
    fn function_definition_with_params() {
        let (_, sb) = parse("float4 Shade(float3 normal, float3 light) { return 1; }");
        let id = symbol_by_name(&sb, "Shade").expect("function symbol");
        let symbol = sb.symbol(id);
        assert!(symbol.has_flags(SymbolTypes::FUNC_DEFINITION));
        assert_eq!(symbol.signature(), Some("Shade(float3,float3)"));

        // parameters were deferred into the function scope
        let scope = symbol.scope().expect("function scope");
        let names: Vec<_> = scope.children().map(|c| c.name().to_string()).collect();
        assert!(names.contains(&"normal".to_string()));
        assert!(names.contains(&"light".to_string()));
    }

    #[test]
    fn void_signature() {
        let (_, sb) = parse("void Init() { }");
        let id = symbol_by_name(&sb, "Init").unwrap();
        assert_eq!(sb.symbol(id).signature(), Some("Init(void)"));
    }

    #[test]
    fn attribute_tagged_entrypoint() {
        let (_, sb) = parse(
            "[numthreads(8, 8, 1)]\n[compute]\nvoid CS_Main(uint3 id : SV_DispatchThreadID) { }",
        );
        let id = symbol_by_name(&sb, "CS_Main").expect("function symbol");
        let ident = sb.symbol(id).ident();

        let attribs: Vec<_> = ident
            .children()
            .filter(|c| c.has_flags(TokenTypes::ATTRIBUTE))
            .map(|c| c.value().to_string())
            .collect();
        assert!(attribs.contains(&"numthreads".to_string()), "{attribs:?}");
        assert!(attribs.contains(&"compute".to_string()));

        let stage_attrib = ident
            .children()
            .find(|c| c.has_flags(TokenTypes::ATTRIB_SHADER_DECL))
            .expect("stage attribute");
        assert_eq!(stage_attrib.value(), "compute");

        // numthreads arguments are captured as literal children of the
        // attribute token
        let numthreads = ident
            .children()
            .find(|c| c.value() == "numthreads")
            .unwrap();
        let literals: Vec<_> = numthreads
            .children()
            .filter(|c| c.has_flags(TokenTypes::LITERAL_ARG))
            .map(|c| c.value().to_string())
            .collect();
        assert_eq!(literals, vec!["8", "8", "1"]);
    }

    #[test]
    fn struct_definition() {
        let (_, sb) = parse("struct Light { float3 pos; float intensity; };");
        let id = symbol_by_name(&sb, "Light").expect("struct symbol");
        assert!(sb.symbol(id).has_flags(SymbolTypes::STRUCT_DEF));

        let scope = sb.symbol(id).scope().expect("struct scope");
        assert_eq!(scope.child_count(), 2);
    }

    #[test]
    fn cbuffer_definition() {
        let (_, sb) = parse("cbuffer PerFrame { float4x4 view; float4x4 proj; }");
        let id = symbol_by_name(&sb, "PerFrame").expect("cbuffer symbol");
        assert!(sb.symbol(id).has_flags(SymbolTypes::CONST_BUF_DEF));
    }

    #[test]
    fn technique_with_passes() {
        let src = "technique Lit {\n  pass Base {\n    vertex VS_A;\n    pixel PS_A;\n  }\n}\n\
                   void VS_A() { }\nvoid PS_A() { }";
        // functions first so the references resolve in author sources; here
        // the decl form is anonymous, so order does not matter
        let (_, sb) = parse(src);

        let tech = symbol_by_name(&sb, "Lit").expect("technique symbol");
        assert!(sb.symbol(tech).has_flags(SymbolTypes::TECHNIQUE_DEF));

        let tech_scope = sb.symbol(tech).scope().unwrap();
        assert_eq!(tech_scope.child_count(), 1);

        let pass = tech_scope.child(0);
        assert!(pass.has_flags(SymbolTypes::TECHNIQUE_PASS_DECL));
        assert_eq!(pass.name(), "Base");

        let pass_scope = pass.scope().unwrap();
        let shaders: Vec<_> = pass_scope
            .children()
            .filter(|c| c.has_flags(SymbolTypes::TECHNIQUE_SHADER_DECL))
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(shaders, vec!["VS_A", "PS_A"]);
    }

    #[test]
    fn shader_block_definition() {
        let src = "pixel Blur {\n  float4 Blur(float2 uv : TEXCOORD0) : SV_Target { return 0; }\n}";
        let (_, sb) = parse(src);

        let block = (0..sb.symbol_count() as u32)
            .map(|i| sb.symbol(i))
            .find(|s| s.has_flags(SymbolTypes::PIXEL_SHADER_DEF))
            .expect("shader block symbol");
        assert_eq!(block.name(), "Blur");

        // the block scope holds the entrypoint overload
        let scope = block.scope().unwrap();
        assert!(scope.func_overloads("Blur").is_some());
    }

    #[test]
    fn typedef_alias() {
        let (_, sb) = parse("typedef float2 uv_t;\nuv_t gCoord;");
        let alias = symbol_by_name(&sb, "uv_t").expect("alias symbol");
        assert!(sb.symbol(alias).has_flags(SymbolTypes::TYPEDEF_DECL));

        // the alias resolves as a type for later declarations
        let var = symbol_by_name(&sb, "gCoord").expect("variable symbol");
        let (info, _) = sb.symbol(var).var_type();
        assert_eq!(info.map(|i| i.name.as_str()), Some("float2"));
    }

    #[test]
    fn templated_resource_variable() {
        let (_, sb) = parse("StructuredBuffer<float4> gLights;");
        let id = symbol_by_name(&sb, "gLights").expect("variable symbol");
        let (info, _) = sb.symbol(id).var_type();
        assert_eq!(info.map(|i| i.name.as_str()), Some("StructuredBuffer"));
    }

    #[test]
    fn deterministic_over_reruns() {
        let src = "float4 gColor;\nvoid Fn(float x) { }\ntechnique T { pass P { vertex Fn; } }";
        let (_, sb1) = parse(src);
        let (_, sb2) = parse(src);

        assert_eq!(sb1.token_count(), sb2.token_count());
        assert_eq!(sb1.symbol_count(), sb2.symbol_count());
        assert_eq!(sb1.scope_count(), sb2.scope_count());
        for i in 0..sb1.token_count() as u32 {
            assert_eq!(sb1.token(i).value, sb2.token(i).value);
            assert_eq!(sb1.token(i).ty, sb2.token(i).ty);
        }
    }

    #[test]
    fn duplicate_definition_is_an_error() {
        let mut analyzer = BlockAnalyzer::new();
        analyzer
            .analyze("test.wfx", "float4 gX;\nfloat gX;")
            .unwrap();
        let mut sb = ScopeBuilder::new();
        let mut parser = SymbolParser::new();
        let err = parser.parse(&analyzer, &mut sb).unwrap_err();
        assert!(err.to_string().contains("redefinition"), "{err}");
    }
}
