//! Block analyzer: partitions sanitized source into a flat, depth-annotated
//! sequence of lex blocks.
//!
//! `<` is ambiguous between a template-argument list and a comparison
//! operator. The analyzer opens angle containers speculatively and reverts
//! the container and every later block when an incompatible close (or EOF) is
//! hit. The position of the failed attempt is kept as a backtrack point so
//! the same speculation is not retried until the scan has advanced past it.

use std::ops::Range;

use crate::error::{EffectError, Result};

bitflags::bitflags! {
    /// Lex block classification. Orthogonal dimensions combine: a `{` block
    /// is `SCOPE | START | CONTAINER`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LexBlockTypes: u32 {
        /// Non-whitespace run with no terminating separator.
        const UNTERMINATED = 1 << 0;

        const DIRECTIVE = 1 << 1;
        const SEPARATOR = 1 << 2;
        /// Identifier run ending in an opening delimiter.
        const PREAMBLE = 1 << 3;
        const CONTAINER = 1 << 4;

        const SEMICOLON = 1 << 5;
        const COLON = 1 << 6;
        const ASSIGNMENT = 1 << 7;
        const COMMA = 1 << 8;

        const PARENTHESES = 1 << 9;
        const SQUARE_BRACKETS = 1 << 10;
        const ANGLE_BRACKETS = 1 << 11;
        const SCOPE = 1 << 12;

        const START = 1 << 13;
        const END = 1 << 14;

        const NAME = 1 << 15;
        const BODY = 1 << 16;

        /// Set on `#line` directive blocks.
        const LINE = 1 << 17;

        const START_CONTAINER = Self::START.bits() | Self::CONTAINER.bits();
        const END_CONTAINER = Self::END.bits() | Self::CONTAINER.bits();

        const DIRECTIVE_NAME = Self::NAME.bits() | Self::DIRECTIVE.bits();
        const DIRECTIVE_BODY = Self::BODY.bits() | Self::DIRECTIVE.bits();
        const LINE_DIRECTIVE_NAME = Self::LINE.bits() | Self::DIRECTIVE_NAME.bits();
        const LINE_DIRECTIVE_BODY = Self::LINE.bits() | Self::DIRECTIVE_BODY.bits();

        const SEMICOLON_SEPARATOR = Self::SEMICOLON.bits() | Self::SEPARATOR.bits();
        const COLON_SEPARATOR = Self::COLON.bits() | Self::SEPARATOR.bits();
        const ASSIGNMENT_SEPARATOR = Self::ASSIGNMENT.bits() | Self::SEPARATOR.bits();
        const COMMA_SEPARATOR = Self::COMMA.bits() | Self::SEPARATOR.bits();

        const PARENTHESES_PREAMBLE = Self::PARENTHESES.bits() | Self::PREAMBLE.bits();
        const SQUARE_BRACKETS_PREAMBLE = Self::SQUARE_BRACKETS.bits() | Self::PREAMBLE.bits();
        const ANGLE_BRACKETS_PREAMBLE = Self::ANGLE_BRACKETS.bits() | Self::PREAMBLE.bits();
        const SCOPE_PREAMBLE = Self::SCOPE.bits() | Self::PREAMBLE.bits();

        const START_SCOPE = Self::SCOPE.bits() | Self::START_CONTAINER.bits();
        const END_SCOPE = Self::SCOPE.bits() | Self::END_CONTAINER.bits();

        const OPEN_PARENTHESES = Self::PARENTHESES.bits() | Self::START_CONTAINER.bits();
        const CLOSE_PARENTHESES = Self::PARENTHESES.bits() | Self::END_CONTAINER.bits();

        const OPEN_SQUARE_BRACKETS = Self::SQUARE_BRACKETS.bits() | Self::START_CONTAINER.bits();
        const CLOSE_SQUARE_BRACKETS = Self::SQUARE_BRACKETS.bits() | Self::END_CONTAINER.bits();

        const OPEN_ANGLE_BRACKETS = Self::ANGLE_BRACKETS.bits() | Self::START_CONTAINER.bits();
        const CLOSE_ANGLE_BRACKETS = Self::ANGLE_BRACKETS.bits() | Self::END_CONTAINER.bits();
    }
}

/// A contiguous span of sanitized source classified by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexBlock {
    pub ty: LexBlockTypes,
    pub depth: i32,
    pub span: Range<usize>,
    pub start_line: u32,
    pub line_count: u32,
    pub file: u32,
}

impl LexBlock {
    pub fn has_flags(&self, flags: LexBlockTypes) -> bool {
        self.ty.contains(flags)
    }

    pub fn last_line(&self) -> u32 {
        self.start_line + self.line_count
    }
}

/// A file/line pair introduced by a `#line` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexFile {
    pub path: String,
    pub line: u32,
}

fn delimiter_type(ch: u8) -> LexBlockTypes {
    match ch {
        b'{' => LexBlockTypes::START_SCOPE,
        b'(' => LexBlockTypes::OPEN_PARENTHESES,
        b'[' => LexBlockTypes::OPEN_SQUARE_BRACKETS,
        b'<' => LexBlockTypes::OPEN_ANGLE_BRACKETS,
        b'}' => LexBlockTypes::END_SCOPE,
        b')' => LexBlockTypes::CLOSE_PARENTHESES,
        b']' => LexBlockTypes::CLOSE_SQUARE_BRACKETS,
        b'>' => LexBlockTypes::CLOSE_ANGLE_BRACKETS,
        _ => LexBlockTypes::empty(),
    }
}

// Break filters indexed by template state.
const BREAK_FILTERS: [&[u8]; 3] = [
    b"=,:;{}()[]#",   // 0 - no templates
    b"=,:;{}()[]<#",  // 1 - can start templates
    b"=,:;{}()[]<>#", // 2 - can start or close templates
];

/// Replaces comments and stray control characters with spaces, preserving
/// line breaks so line counts stay correct.
fn sanitize(src: &str) -> Vec<u8> {
    let mut bytes = src.as_bytes().to_vec();
    let len = bytes.len();
    let mut i = 0usize;

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                while i < len && bytes[i] != b'\n' {
                    bytes[i] = b' ';
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                bytes[i] = b' ';
                bytes[i + 1] = b' ';
                i += 2;
                while i < len {
                    if bytes[i] == b'*' && i + 1 < len && bytes[i + 1] == b'/' {
                        bytes[i] = b' ';
                        bytes[i + 1] = b' ';
                        i += 2;
                        break;
                    }
                    if bytes[i] != b'\n' {
                        bytes[i] = b' ';
                    }
                    i += 1;
                }
            }
            c if c < b' ' && c != b'\n' => {
                bytes[i] = b' ';
                i += 1;
            }
            _ => i += 1,
        }
    }

    bytes
}

/// Decomposes preprocessed source into [`LexBlock`]s.
#[derive(Default)]
pub struct BlockAnalyzer {
    src: Vec<u8>,
    blocks: Vec<LexBlock>,
    containers: Vec<usize>,
    files: Vec<LexFile>,
    path: String,
    pos: usize,
    next: usize,
    pos_old: isize,
    depth: i32,
    line: u32,
}

impl BlockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.src.clear();
        self.blocks.clear();
        self.containers.clear();
        self.files.clear();
        self.path.clear();
        self.pos = 0;
        self.next = 0;
        self.pos_old = -1;
        self.depth = 0;
        self.line = 1;
    }

    pub fn blocks(&self) -> &[LexBlock] {
        &self.blocks
    }

    pub fn files(&self) -> &[LexFile] {
        &self.files
    }

    /// Text of the given block within the sanitized source.
    pub fn block_text(&self, block: &LexBlock) -> &str {
        std::str::from_utf8(&self.src[block.span.clone()]).unwrap_or("")
    }

    pub fn source(&self) -> &str {
        std::str::from_utf8(&self.src).unwrap_or("")
    }

    /// Resolves the source file and line of a block for diagnostics.
    pub fn block_location(&self, block_index: usize) -> (String, u32) {
        match self.blocks.get(block_index) {
            Some(block) => {
                let path = self
                    .files
                    .get(block.file as usize)
                    .map(|f| f.path.clone())
                    .unwrap_or_else(|| self.path.clone());
                (path, block.start_line)
            }
            None => (self.path.clone(), 0),
        }
    }

    /// Builds a syntax error citing the given block.
    pub fn syntax_error(&self, block_index: usize, msg: impl Into<String>) -> EffectError {
        let (path, line) = self.block_location(block_index);
        EffectError::syntax(msg, path, line)
    }

    /// Analyzes one preprocessed translation unit. `path` is used solely for
    /// diagnostics; `#line` directives within the source may redirect it.
    pub fn analyze(&mut self, path: &str, src: &str) -> Result<()> {
        self.clear();
        self.path = path.to_string();
        self.src = sanitize(src);
        self.files.push(LexFile {
            path: path.to_string(),
            line: 1,
        });

        loop {
            if self.pos < self.src.len() {
                let ch = self.src[self.pos];
                self.next = self.pos + 1;

                if ch <= b' ' {
                    if ch == b'\n' {
                        self.line += 1;
                    }
                } else {
                    match ch {
                        b'#' => self.add_directive()?,
                        b'{' | b'[' | b'(' => self.start_container()?,
                        b'<' if self.can_close_template() || self.can_open_template() => {
                            self.start_container()?
                        }
                        b'}' | b']' | b')' => self.end_container()?,
                        b'>' if self.can_close_template() => self.end_container()?,
                        _ => self.add_block(),
                    }
                }

                self.pos = self.next;
            } else if self.try_finalize()? {
                break;
            }
        }

        Ok(())
    }

    fn can_open_template(&self) -> bool {
        self.pos as isize > self.pos_old
    }

    fn can_close_template(&self) -> bool {
        self.containers
            .last()
            .map_or(false, |&i| self.blocks[i].has_flags(LexBlockTypes::OPEN_ANGLE_BRACKETS))
    }

    fn break_filter(&self) -> &'static [u8] {
        let index = self.can_close_template() as usize + self.can_open_template() as usize;
        BREAK_FILTERS[index]
    }

    fn file_index(&self) -> u32 {
        self.files.len() as u32 - 1
    }

    fn add_block(&mut self) {
        let filter = self.break_filter();
        let start = self.pos;
        let mut end = start;

        while end < self.src.len() && !filter.contains(&self.src[end]) {
            end += 1;
        }

        let terminator = self.src.get(end).copied();
        let ty = match terminator {
            Some(b'=') => LexBlockTypes::ASSIGNMENT_SEPARATOR,
            Some(b';') => LexBlockTypes::SEMICOLON_SEPARATOR,
            Some(b':') => LexBlockTypes::COLON_SEPARATOR,
            Some(b',') => LexBlockTypes::COMMA_SEPARATOR,
            Some(b'{') => LexBlockTypes::SCOPE_PREAMBLE,
            Some(b'(') => LexBlockTypes::PARENTHESES_PREAMBLE,
            Some(b'[') => LexBlockTypes::SQUARE_BRACKETS_PREAMBLE,
            Some(b'<') => LexBlockTypes::ANGLE_BRACKETS_PREAMBLE,
            _ => LexBlockTypes::UNTERMINATED,
        };

        // separators own their terminating character
        let span = if ty.contains(LexBlockTypes::SEPARATOR) {
            start..end + 1
        } else {
            start..end
        };

        let line_count = count_newlines(&self.src[span.clone()]);
        self.blocks.push(LexBlock {
            ty,
            depth: self.depth,
            span: span.clone(),
            start_line: self.line,
            line_count,
            file: self.file_index(),
        });

        self.line += line_count;
        self.next = span.end;
    }

    fn start_container(&mut self) -> Result<()> {
        let delim = delimiter_type(self.src[self.pos]);

        // A different container type opening on top of an unfinished angle
        // bracket refutes the template interpretation.
        if !delim.contains(LexBlockTypes::OPEN_ANGLE_BRACKETS) {
            if let Some(&top) = self.containers.last() {
                if self.blocks[top].has_flags(LexBlockTypes::OPEN_ANGLE_BRACKETS) {
                    self.revert_container(top);
                    return Ok(());
                }
            }
        }

        self.containers.push(self.blocks.len());
        self.blocks.push(LexBlock {
            ty: delim,
            depth: self.depth,
            span: self.pos..self.pos + 1,
            start_line: self.line,
            line_count: 0,
            file: self.file_index(),
        });
        self.depth += 1;
        Ok(())
    }

    fn end_container(&mut self) -> Result<()> {
        let ch = self.src[self.pos];
        let Some(&top) = self.containers.last() else {
            return Err(EffectError::syntax(
                format!("Unexpected closing '{}' on line {}", ch as char, self.line),
                self.current_path(),
                self.line,
            ));
        };

        // An opening '<' was classified as a potential template, but another
        // container closed before it was ready; revert and reclassify.
        if self.blocks[top].has_flags(LexBlockTypes::OPEN_ANGLE_BRACKETS) && ch != b'>' {
            self.revert_container(top);
            return Ok(());
        }

        let delim = delimiter_type(ch);
        let open = &self.blocks[top];

        let expected = if open.has_flags(LexBlockTypes::SCOPE) {
            LexBlockTypes::END_SCOPE
        } else if open.has_flags(LexBlockTypes::PARENTHESES) {
            LexBlockTypes::CLOSE_PARENTHESES
        } else if open.has_flags(LexBlockTypes::SQUARE_BRACKETS) {
            LexBlockTypes::CLOSE_SQUARE_BRACKETS
        } else {
            LexBlockTypes::CLOSE_ANGLE_BRACKETS
        };

        if !delim.contains(expected) {
            return Err(EffectError::syntax(
                format!("Unexpected closing '{}' on line {}", ch as char, self.line),
                self.current_path(),
                self.line,
            ));
        }

        self.depth -= 1;
        if self.depth < 0 {
            return Err(EffectError::syntax(
                format!("Unexpected closing '{}' on line {}", ch as char, self.line),
                self.current_path(),
                self.line,
            ));
        }

        self.containers.pop();
        let open = &mut self.blocks[top];
        open.span = open.span.start..self.pos + 1;
        open.line_count = self.line - open.start_line;

        // duplicate ending marker with the closing delimiter flags
        let mut end_block = open.clone();
        end_block.ty = delim;
        self.blocks.push(end_block);
        Ok(())
    }

    fn add_directive(&mut self) -> Result<()> {
        let len = self.src.len();
        let name_start = self.pos;
        let mut name_end = name_start + 1;
        while name_end < len && !self.src[name_end].is_ascii_whitespace() {
            name_end += 1;
        }

        let is_line_directive = &self.src[name_start..name_end] == b"#line";
        let name_ty = if is_line_directive {
            LexBlockTypes::LINE_DIRECTIVE_NAME
        } else {
            LexBlockTypes::DIRECTIVE_NAME
        };

        self.blocks.push(LexBlock {
            ty: name_ty,
            depth: self.depth,
            span: name_start..name_end,
            start_line: self.line,
            line_count: 0,
            file: self.file_index(),
        });

        // body runs to end of logical line, honoring `\` continuations
        let mut body_start = name_end;
        while body_start < len && (self.src[body_start] == b' ' || self.src[body_start] == b'\t') {
            body_start += 1;
        }

        let mut cursor = body_start;
        let mut line_count = 0u32;
        let body_end = loop {
            let nl = find_byte(&self.src, cursor, b'\n');
            match nl {
                Some(nl) => {
                    if nl > 0 && self.src[nl - 1] == b'\\' {
                        line_count += 1;
                        cursor = nl + 1;
                        continue;
                    }
                    break nl;
                }
                None => break len,
            }
        };

        let body_ty = if is_line_directive {
            LexBlockTypes::LINE_DIRECTIVE_BODY
        } else {
            LexBlockTypes::DIRECTIVE_BODY
        };

        let body_span = body_start..body_end;
        self.blocks.push(LexBlock {
            ty: body_ty,
            depth: self.depth,
            span: body_span.clone(),
            start_line: self.line,
            line_count,
            file: self.file_index(),
        });

        self.line += line_count;

        if is_line_directive {
            self.process_line_directive(body_span)?;
        }

        // leave the final newline for the main loop
        self.next = if body_end >= len { len } else { body_end };
        Ok(())
    }

    fn process_line_directive(&mut self, body: Range<usize>) -> Result<()> {
        let text = std::str::from_utf8(&self.src[body]).unwrap_or("");
        let trimmed = text.trim_start();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();

        let new_line: u32 = digits.parse().map_err(|_| {
            EffectError::syntax(
                format!("Expected a line number after #line directive on line {}", self.line),
                self.current_path(),
                self.line,
            )
        })?;

        let rest = &trimmed[digits.len()..];
        let path = match rest.find('"') {
            Some(open) => {
                let tail = &rest[open + 1..];
                match tail.find('"') {
                    Some(close) => tail[..close].to_string(),
                    None => self.current_path(),
                }
            }
            None => self.current_path(),
        };

        self.files.push(LexFile {
            path,
            line: new_line,
        });

        // the newline terminating the directive brings the counter up to the
        // redirected line number; the directive blocks themselves sit on the
        // line before it
        self.line = new_line.saturating_sub(1);
        let count = self.blocks.len();
        for block in &mut self.blocks[count.saturating_sub(2)..] {
            if block.has_flags(LexBlockTypes::LINE) {
                block.start_line = self.line;
            }
        }
        Ok(())
    }

    /// Reverts analyzer state to just after `block_index` and disables
    /// template speculation until the previous position is reached again.
    fn set_state(&mut self, block_index: isize) {
        let last = self.pos as isize;

        if block_index < 0 {
            self.blocks.clear();
            self.containers.clear();
            self.files.truncate(1);
            if let Some(first) = self.files.first_mut() {
                first.line = 1;
            }
            self.depth = 0;
            self.line = 1;
            self.next = 0;
        } else {
            let index = block_index as usize;
            let block = self.blocks[index].clone();

            self.next = block.span.end;
            self.depth = block.depth
                + block.has_flags(LexBlockTypes::START_CONTAINER) as i32;
            self.line = block.start_line + block.line_count;

            while matches!(self.containers.last(), Some(&c) if c > index) {
                self.containers.pop();
            }

            self.files.truncate(block.file as usize + 1);
            self.blocks.truncate(index + 1);
        }

        self.pos_old = last;
    }

    fn revert_container(&mut self, block_index: usize) {
        // include the container's preamble in the revert, if present
        if block_index > 0 && self.blocks[block_index - 1].has_flags(LexBlockTypes::PREAMBLE) {
            self.set_state(block_index as isize - 2);
        } else {
            self.set_state(block_index as isize - 1);
        }
    }

    /// Returns true when parsing has completed; raises on unterminated
    /// containers and backtracks misidentified trailing templates.
    fn try_finalize(&mut self) -> Result<bool> {
        if let Some(&top) = self.containers.last() {
            let block = &self.blocks[top];

            if block.has_flags(LexBlockTypes::START_SCOPE) {
                return Err(self.unterminated_error(top, '{', "scope"));
            } else if block.has_flags(LexBlockTypes::OPEN_PARENTHESES) {
                return Err(self.unterminated_error(top, '(', "parentheses"));
            } else if block.has_flags(LexBlockTypes::OPEN_SQUARE_BRACKETS) {
                return Err(self.unterminated_error(top, '[', "square bracket"));
            } else if block.has_flags(LexBlockTypes::OPEN_ANGLE_BRACKETS) {
                self.revert_container(top);
                self.pos = self.next;
                return Ok(false);
            }
        }

        if self.depth != 0 {
            return Err(EffectError::parse("internal container parsing error"));
        }

        Ok(true)
    }

    fn unterminated_error(&self, block_index: usize, delim: char, what: &str) -> EffectError {
        let block = &self.blocks[block_index];
        let path = self
            .files
            .get(block.file as usize)
            .map(|f| f.path.clone())
            .unwrap_or_else(|| self.path.clone());
        EffectError::syntax(
            format!(
                "Unterminated {what} '{delim}' starting on line {}",
                block.start_line
            ),
            path,
            block.start_line,
        )
    }

    fn current_path(&self) -> String {
        self.files
            .last()
            .map(|f| f.path.clone())
            .unwrap_or_else(|| self.path.clone())
    }
}

fn count_newlines(bytes: &[u8]) -> u32 {
    bytes.iter().filter(|&&b| b == b'\n').count() as u32
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(src: &str) -> BlockAnalyzer {
        let mut analyzer = BlockAnalyzer::new();
        analyzer.analyze("test.wfx", src).unwrap();
        analyzer
    }

    fn types(analyzer: &BlockAnalyzer) -> Vec<LexBlockTypes> {
        analyzer.blocks().iter().map(|b| b.ty).collect()
    }

    #[test]
    fn simple_declaration() {
        let analyzer = analyze("float4 color;");
        assert_eq!(types(&analyzer), vec![LexBlockTypes::SEMICOLON_SEPARATOR]);
        assert_eq!(analyzer.block_text(&analyzer.blocks()[0]), "float4 color;");
    }

    #[test]
    fn function_blocks() {
        let analyzer = analyze("void Fn(int a) { return; }");
        let ty = types(&analyzer);
        assert_eq!(
            ty,
            vec![
                LexBlockTypes::PARENTHESES_PREAMBLE,
                LexBlockTypes::OPEN_PARENTHESES,
                LexBlockTypes::UNTERMINATED,
                LexBlockTypes::CLOSE_PARENTHESES,
                LexBlockTypes::START_SCOPE,
                LexBlockTypes::SEMICOLON_SEPARATOR,
                LexBlockTypes::END_SCOPE,
            ]
        );

        // container blocks store the full span
        let open = &analyzer.blocks()[4];
        assert!(analyzer.block_text(open).starts_with('{'));
        assert!(analyzer.block_text(open).ends_with('}'));
    }

    #[test]
    fn depth_is_balanced() {
        let analyzer = analyze("a { b { c; } d; } e;");
        let blocks = analyzer.blocks();

        for block in blocks {
            assert!(block.depth >= 0);
        }

        let starts: Vec<_> = blocks
            .iter()
            .filter(|b| b.has_flags(LexBlockTypes::START_CONTAINER))
            .collect();
        let ends: Vec<_> = blocks
            .iter()
            .filter(|b| b.has_flags(LexBlockTypes::END_CONTAINER))
            .collect();
        assert_eq!(starts.len(), ends.len());

        // end markers share their container's span and depth
        for end in &ends {
            let start = starts
                .iter()
                .find(|s| s.span == end.span)
                .expect("every end has a matching start");
            assert_eq!(start.depth, end.depth);
        }
    }

    #[test]
    fn comments_become_whitespace() {
        let analyzer = analyze("int a; // trailing\n/* multi\nline */ int b;");
        let ty = types(&analyzer);
        assert_eq!(
            ty,
            vec![
                LexBlockTypes::SEMICOLON_SEPARATOR,
                LexBlockTypes::SEMICOLON_SEPARATOR,
            ]
        );
        // the comment's newlines still count
        assert_eq!(analyzer.blocks()[1].start_line, 3);
    }

    #[test]
    fn template_arguments_form_containers() {
        let analyzer = analyze("StructuredBuffer<float4> buf;");
        let ty = types(&analyzer);
        assert_eq!(
            ty,
            vec![
                LexBlockTypes::ANGLE_BRACKETS_PREAMBLE,
                LexBlockTypes::OPEN_ANGLE_BRACKETS,
                LexBlockTypes::UNTERMINATED,
                LexBlockTypes::CLOSE_ANGLE_BRACKETS,
                LexBlockTypes::SEMICOLON_SEPARATOR,
            ]
        );
    }

    #[test]
    fn less_than_backtracks() {
        // `a < b` opens a speculative template that a ';' close refutes
        let analyzer = analyze("x = a < b; y = 2;");
        for block in analyzer.blocks() {
            assert!(
                !block.has_flags(LexBlockTypes::ANGLE_BRACKETS),
                "no angle container should survive: {:?}",
                block
            );
        }
        let text: Vec<&str> = analyzer
            .blocks()
            .iter()
            .map(|b| analyzer.block_text(b))
            .collect();
        assert!(text.iter().any(|t| t.contains("a < b;")));
    }

    #[test]
    fn nested_templates() {
        let analyzer = analyze("Outer<Inner<int>> x;");
        let open_count = analyzer
            .blocks()
            .iter()
            .filter(|b| b.has_flags(LexBlockTypes::OPEN_ANGLE_BRACKETS))
            .count();
        assert_eq!(open_count, 2);
    }

    #[test]
    fn directives_are_retained() {
        let analyzer = analyze("#pragma pack 16\nint x;");
        let ty = types(&analyzer);
        assert_eq!(
            ty,
            vec![
                LexBlockTypes::DIRECTIVE_NAME,
                LexBlockTypes::DIRECTIVE_BODY,
                LexBlockTypes::SEMICOLON_SEPARATOR,
            ]
        );
        assert_eq!(analyzer.block_text(&analyzer.blocks()[0]), "#pragma");
        assert_eq!(analyzer.blocks()[2].start_line, 2);
    }

    #[test]
    fn line_directives_redirect_location() {
        let analyzer = analyze("#line 10 \"inc.wfxh\"\nint x;\nint y;");
        assert_eq!(analyzer.files().len(), 2);
        assert_eq!(analyzer.files()[1].path, "inc.wfxh");
        assert_eq!(analyzer.files()[1].line, 10);

        let blocks = analyzer.blocks();
        assert_eq!(blocks[2].start_line, 10);
        assert_eq!(blocks[3].start_line, 11);
        assert!(blocks[0].has_flags(LexBlockTypes::LINE_DIRECTIVE_NAME));
    }

    #[test]
    fn unterminated_scope_is_an_error() {
        let mut analyzer = BlockAnalyzer::new();
        let err = analyzer.analyze("test.wfx", "void f() {\n  int x;\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unterminated scope '{' starting on line 1"), "{msg}");
    }

    #[test]
    fn mismatched_close_is_an_error() {
        let mut analyzer = BlockAnalyzer::new();
        let err = analyzer.analyze("test.wfx", "void f( ]").unwrap_err();
        assert!(err.to_string().contains("Unexpected closing"));
    }

    #[test]
    fn trailing_template_speculation_reverts_at_eof() {
        // `a < b` with no close reaching EOF must revert, not error
        let analyzer = analyze("x = a < b");
        for block in analyzer.blocks() {
            assert!(!block.has_flags(LexBlockTypes::ANGLE_BRACKETS));
        }
    }

    #[test]
    fn start_lines_accumulate() {
        let analyzer = analyze("int a;\nint b;\n\nint c;");
        let blocks = analyzer.blocks();
        assert_eq!(blocks[0].start_line, 1);
        assert_eq!(blocks[1].start_line, 2);
        assert_eq!(blocks[2].start_line, 4);
    }
}
