//! Variant preprocessor.
//!
//! Evaluates C-style directives over one repository's source and produces a
//! fully expanded translation unit per variant configuration. The reserved
//! pragma vocabulary declares compile flags, mutually exclusive modes and
//! shader entrypoints:
//!
//! ```text
//! #pragma flags FEATURE_A FEATURE_B
//! #pragma modes HIGH_QUALITY LOW_QUALITY
//! #pragma vertex VS_Main
//! #pragma pixel PS_Main
//! ```
//!
//! Flags become macro definitions per set bit of the config index; the
//! selected mode macro is defined when the mode index is non-zero. Include
//! expansion is framed with `#line` directives and consumed directive lines
//! leave blank lines behind, so downstream diagnostics keep pointing at the
//! original file and line.

use logos::Logos;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::data::{ShadeStage, INVALID_ID};
use crate::error::{EffectError, Result};

pub const FLAGS_KEYWORD: &str = "flags";
pub const MODES_KEYWORD: &str = "modes";

pub const FLAG_LIMIT: usize = 8;
pub const MODE_LIMIT: usize = 256;

/// Macro defined for every variant; also the name of the implicit default
/// mode at index 0.
pub const DEFAULT_MODE_MACRO: &str = "__WFX_DEFAULT_MODE__";

const MAX_INCLUDE_DEPTH: usize = 64;

/// A shader entrypoint declared by pragma, attribute or shader block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEntrypoint {
    pub name: String,
    pub stage: ShadeStage,
    /// Symbol index resolved by the library builder after parsing.
    pub symbol_id: u32,
}

impl ShaderEntrypoint {
    pub fn new(name: impl Into<String>, stage: ShadeStage) -> Self {
        ShaderEntrypoint {
            name: name.into(),
            stage,
            symbol_id: INVALID_ID,
        }
    }
}

/// Resolved `#include` payload.
#[derive(Debug, Clone)]
pub struct ResolvedInclude {
    /// Path reported in `#line` directives and diagnostics.
    pub path: String,
    pub source: String,
}

/// Loads `#include`d sources on behalf of the preprocessor. The core never
/// touches the filesystem; the CLI supplies a file-backed implementation.
pub trait IncludeHandler {
    /// Resolves `path` as requested from file `from`. `system` is true for
    /// `<...>` includes. Return an [`std::io::ErrorKind::NotFound`] error to
    /// let the preprocessor try its registered include paths.
    fn resolve(&mut self, path: &str, from: &str, system: bool) -> std::io::Result<ResolvedInclude>;
}

#[derive(Debug, Clone)]
struct MacroDef {
    params: Option<Vec<String>>,
    body: String,
}

/// Flag, mode and entrypoint declarations collected from pragmas. Flag and
/// mode sets freeze once the first variant has been generated.
#[derive(Debug, Default)]
struct PragmaTable {
    flags: Vec<String>,
    modes: Vec<String>,
    define_names: FxHashSet<String>,
    initialized: bool,
}

impl PragmaTable {
    fn reset(&mut self) {
        self.flags.clear();
        self.modes.clear();
        self.define_names.clear();
        self.initialized = false;
        self.modes.push(DEFAULT_MODE_MACRO.to_string());
        self.define_names.insert(DEFAULT_MODE_MACRO.to_string());
    }

    fn add_flag(&mut self, name: &str, path: &str, line: u32) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if self.define_names.contains(name) {
            return Err(EffectError::syntax(
                format!("attempted to redefine pragma flag or mode '{name}'"),
                path,
                line,
            ));
        }
        if self.flags.len() >= FLAG_LIMIT {
            return Err(EffectError::syntax(
                format!("flag pragma limit ({FLAG_LIMIT}) exceeded"),
                path,
                line,
            ));
        }
        self.define_names.insert(name.to_string());
        self.flags.push(name.to_string());
        Ok(())
    }

    fn add_mode(&mut self, name: &str, path: &str, line: u32) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if self.define_names.contains(name) {
            return Err(EffectError::syntax(
                format!("attempted to redefine pragma flag or mode '{name}'"),
                path,
                line,
            ));
        }
        if self.modes.len() >= MODE_LIMIT {
            return Err(EffectError::syntax(
                format!("mode pragma limit ({MODE_LIMIT}) exceeded"),
                path,
                line,
            ));
        }
        self.define_names.insert(name.to_string());
        self.modes.push(name.to_string());
        Ok(())
    }
}

/// Generates preprocessed variants of one repository source.
#[derive(Default)]
pub struct VariantPreprocessor {
    src: String,
    path: String,
    extern_macros: Vec<(String, String)>,
    include_paths: Vec<String>,
    pragmas: PragmaTable,
}

impl VariantPreprocessor {
    pub fn new() -> Self {
        let mut this = VariantPreprocessor::default();
        this.pragmas.reset();
        this
    }

    /// Initializes the preprocessor to the given source, clearing prior state.
    pub fn set_source(&mut self, path: &str, src: &str) {
        self.clear();
        self.path = path.to_string();
        self.src = src.to_string();
    }

    /// True once the first variant has been generated and the flag/mode sets
    /// are frozen.
    pub fn is_initialized(&self) -> bool {
        self.pragmas.initialized
    }

    /// Adds an external macro definition applied to every variant.
    pub fn add_macro(&mut self, name: &str, value: &str) {
        self.extern_macros.push((name.to_string(), value.to_string()));
    }

    /// Adds a search path consulted for includes the handler cannot resolve
    /// directly.
    pub fn add_include_path(&mut self, path: &str) {
        self.include_paths.push(path.to_string());
    }

    /// Resets macros, include paths, flag and mode state and the initialized
    /// flag.
    pub fn clear(&mut self) {
        self.src.clear();
        self.path.clear();
        self.extern_macros.clear();
        self.include_paths.clear();
        self.pragmas.reset();
    }

    /// Number of flag bit combinations, `2 ^ flag count`.
    pub fn flag_variant_count(&self) -> u32 {
        1u32 << self.pragmas.flags.len() as u32
    }

    /// Number of declared modes, including the implicit default.
    pub fn mode_count(&self) -> u32 {
        self.pragmas.modes.len() as u32
    }

    /// Total number of variants. Only final after variant 0 has been
    /// generated, since pragmas register flags and modes during the run.
    pub fn variant_count(&self) -> u32 {
        self.flag_variant_count() * self.mode_count().max(1)
    }

    pub fn variant_flags(&self) -> &[String] {
        &self.pragmas.flags
    }

    pub fn variant_modes(&self) -> &[String] {
        &self.pragmas.modes
    }

    /// Expands the variant selected by `config_id` into `out` and returns the
    /// entrypoints declared by stage pragmas.
    pub fn get_variant(
        &mut self,
        config_id: u32,
        handler: Option<&mut dyn IncludeHandler>,
        out: &mut String,
    ) -> Result<Vec<ShaderEntrypoint>> {
        if config_id >= self.variant_count().max(1) {
            return Err(EffectError::parse(format!(
                "invalid variant config ID {config_id}"
            )));
        }

        let mut macros: FxHashMap<String, MacroDef> = FxHashMap::default();
        for (name, value) in &self.extern_macros {
            macros.insert(
                name.clone(),
                MacroDef { params: None, body: value.clone() },
            );
        }

        let empty = MacroDef { params: None, body: String::new() };
        macros.insert(DEFAULT_MODE_MACRO.to_string(), empty.clone());

        let fv = self.flag_variant_count();
        let flag_bits = config_id % fv;
        for (i, flag) in self.pragmas.flags.iter().enumerate() {
            if (flag_bits >> i) & 1 == 1 {
                macros.insert(flag.clone(), empty.clone());
            }
        }

        let mode = config_id / fv;
        if mode > 0 {
            macros.insert(self.pragmas.modes[mode as usize].clone(), empty.clone());
        }

        let src = std::mem::take(&mut self.src);
        let path = self.path.clone();

        let mut expander = Expander {
            macros,
            cond_stack: Vec::new(),
            entrypoints: Vec::new(),
            pragmas: &mut self.pragmas,
            handler,
            include_paths: &self.include_paths,
            once_files: FxHashSet::default(),
            depth: 0,
        };

        let result = expander.expand_file(&path, &src, out);
        let entrypoints = expander.entrypoints;
        self.src = src;
        result?;

        self.pragmas.initialized = true;
        Ok(entrypoints)
    }
}

/// Tokens of a `#if` controlling expression, lexed after macro expansion.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum ExprToken<'a> {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident(&'a str),

    #[regex(r"0[xX][0-9A-Fa-f]+[uUlL]*")]
    #[regex(r"[0-9]+[uUlL]*")]
    Int(&'a str),

    #[regex(r"[ \t\r]+", logos::skip)]
    Whitespace,

    #[error]
    Error,
}

/// What `expand_file` should emit for a processed directive line.
enum DirectiveAction {
    /// Retain the directive text verbatim.
    Passthrough,
    /// Directive consumed; emit blank lines in its place.
    Consumed,
    /// Directive wrote its own output (includes frame themselves with
    /// `#line`); emit nothing.
    Spliced,
}

#[derive(Debug, Clone, Copy)]
struct CondFrame {
    active: bool,
    taken: bool,
    seen_else: bool,
    parent_active: bool,
}

struct Expander<'a, 'h> {
    macros: FxHashMap<String, MacroDef>,
    cond_stack: Vec<CondFrame>,
    entrypoints: Vec<ShaderEntrypoint>,
    pragmas: &'a mut PragmaTable,
    handler: Option<&'h mut dyn IncludeHandler>,
    include_paths: &'a [String],
    once_files: FxHashSet<String>,
    depth: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn directive_name(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start();
    let rest = rest.strip_prefix('#')?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(rest.len());
    Some((&rest[..end], rest[end..].trim_start()))
}

impl<'a, 'h> Expander<'a, 'h> {
    fn is_active(&self) -> bool {
        self.cond_stack.last().map_or(true, |f| f.active)
    }

    fn expand_file(&mut self, path: &str, src: &str, out: &mut String) -> Result<()> {
        if self.depth > MAX_INCLUDE_DEPTH {
            return Err(EffectError::parse(format!(
                "include depth limit exceeded while processing '{path}'"
            )));
        }

        let frame_depth = self.cond_stack.len();
        let lines: Vec<&str> = src.split('\n').collect();
        let mut i = 0usize;

        while i < lines.len() {
            let line_no = (i + 1) as u32;
            let raw = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
            let last = i + 1 == lines.len();

            if directive_name(raw).is_some() {
                // Join continuation lines before interpreting the directive.
                let mut text = raw.to_string();
                let mut extra = 0usize;

                while text.ends_with('\\') && i + 1 + extra < lines.len() {
                    text.pop();
                    text.push(' ');
                    extra += 1;
                    let cont = lines[i + extra];
                    text.push_str(cont.strip_suffix('\r').unwrap_or(cont));
                }

                match self.directive(&text, path, line_no, extra as u32, out)? {
                    DirectiveAction::Passthrough => {
                        out.push_str(&text);
                        out.push('\n');
                        for _ in 0..extra {
                            out.push('\n');
                        }
                    }
                    DirectiveAction::Consumed => {
                        for _ in 0..=extra {
                            out.push('\n');
                        }
                    }
                    DirectiveAction::Spliced => {}
                }

                i += 1 + extra;
                continue;
            }

            if self.is_active() {
                let mut expanded = String::new();
                let mut in_flight = Vec::new();
                self.expand_text(raw, &mut in_flight, &mut expanded, path, line_no)?;
                out.push_str(&expanded);
            }

            // split('\n') yields one trailing empty item for sources ending in
            // a newline; emitting '\n' for it would add a phantom line
            if !(last && raw.is_empty()) {
                out.push('\n');
            }

            i += 1;
        }

        if self.cond_stack.len() != frame_depth {
            return Err(EffectError::syntax(
                "unterminated conditional directive",
                path,
                lines.len() as u32,
            ));
        }

        Ok(())
    }

    /// Interprets one directive and reports how its line(s) should appear in
    /// the output.
    fn directive(
        &mut self,
        text: &str,
        path: &str,
        line: u32,
        extra_lines: u32,
        out: &mut String,
    ) -> Result<DirectiveAction> {
        let (name, args) = directive_name(text).expect("caller checked directive shape");

        match name {
            "if" => {
                let parent_active = self.is_active();
                let cond = parent_active && self.eval_condition(args, path, line)? != 0;
                self.cond_stack.push(CondFrame {
                    active: cond,
                    taken: cond || !parent_active,
                    seen_else: false,
                    parent_active,
                });
            }
            "ifdef" | "ifndef" => {
                let ident = first_word(args);
                if ident.is_empty() {
                    return Err(EffectError::syntax(
                        format!("expected identifier after #{name}"),
                        path,
                        line,
                    ));
                }
                let parent_active = self.is_active();
                let defined = self.macros.contains_key(ident);
                let cond = parent_active && (defined == (name == "ifdef"));
                self.cond_stack.push(CondFrame {
                    active: cond,
                    taken: cond || !parent_active,
                    seen_else: false,
                    parent_active,
                });
            }
            "elif" => {
                let frame = self.cond_stack.last().copied().ok_or_else(|| {
                    EffectError::syntax("#elif without matching #if", path, line)
                })?;
                if frame.seen_else {
                    return Err(EffectError::syntax("#elif after #else", path, line));
                }
                let cond = if frame.parent_active && !frame.taken {
                    self.eval_condition(args, path, line)? != 0
                } else {
                    false
                };
                let frame = self.cond_stack.last_mut().unwrap();
                frame.active = cond;
                frame.taken |= cond;
            }
            "else" => {
                let frame = self.cond_stack.last_mut().ok_or_else(|| {
                    EffectError::syntax("#else without matching #if", path, line)
                })?;
                if frame.seen_else {
                    return Err(EffectError::syntax("duplicate #else", path, line));
                }
                frame.seen_else = true;
                frame.active = frame.parent_active && !frame.taken;
                frame.taken = true;
            }
            "endif" => {
                self.cond_stack.pop().ok_or_else(|| {
                    EffectError::syntax("#endif without matching #if", path, line)
                })?;
            }
            "define" if self.is_active() => self.define(args, path, line)?,
            "undef" if self.is_active() => {
                self.macros.remove(first_word(args));
            }
            "include" if self.is_active() => {
                self.include(args, path, line + extra_lines, out)?;
                return Ok(DirectiveAction::Spliced);
            }
            "pragma" if self.is_active() => {
                return Ok(if self.pragma(args, path, line)? {
                    DirectiveAction::Passthrough
                } else {
                    DirectiveAction::Consumed
                });
            }
            "error" if self.is_active() => {
                return Err(EffectError::syntax(
                    format!("#error: {args}"),
                    path,
                    line,
                ));
            }
            // inactive block or directive we do not interpret (#line among
            // them); retained verbatim when active
            _ => {
                return Ok(if self.is_active() {
                    DirectiveAction::Passthrough
                } else {
                    DirectiveAction::Consumed
                });
            }
        }

        Ok(DirectiveAction::Consumed)
    }

    fn define(&mut self, args: &str, path: &str, line: u32) -> Result<()> {
        let mut chars = args.char_indices();
        let name_end = loop {
            match chars.next() {
                Some((idx, c)) if !is_ident_char(c) => break idx,
                Some(_) => continue,
                None => break args.len(),
            }
        };
        let name = &args[..name_end];

        if name.is_empty() || !name.starts_with(is_ident_start) {
            return Err(EffectError::syntax(
                "expected identifier after #define",
                path,
                line,
            ));
        }

        let rest = &args[name_end..];
        let (params, body) = if let Some(param_text) = rest.strip_prefix('(') {
            let close = param_text.find(')').ok_or_else(|| {
                EffectError::syntax("unterminated macro parameter list", path, line)
            })?;
            let params: Vec<String> = param_text[..close]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            (Some(params), param_text[close + 1..].trim().to_string())
        } else {
            (None, rest.trim().to_string())
        };

        if self.macros.contains_key(name) {
            debug!(name, "macro redefined");
        }
        self.macros.insert(name.to_string(), MacroDef { params, body });
        Ok(())
    }

    fn include(&mut self, args: &str, path: &str, line: u32, out: &mut String) -> Result<()> {
        let args = args.trim();
        let (target, system) = if let Some(inner) = args.strip_prefix('"') {
            let end = inner.find('"').ok_or_else(|| {
                EffectError::syntax("unterminated include path", path, line)
            })?;
            (&inner[..end], false)
        } else if let Some(inner) = args.strip_prefix('<') {
            let end = inner.find('>').ok_or_else(|| {
                EffectError::syntax("unterminated include path", path, line)
            })?;
            (&inner[..end], true)
        } else {
            return Err(EffectError::syntax(
                "expected \"path\" or <path> after #include",
                path,
                line,
            ));
        };

        let handler = match self.handler.as_deref_mut() {
            Some(handler) => handler,
            None => {
                return Err(EffectError::syntax(
                    format!("#include '{target}' requires an include handler"),
                    path,
                    line,
                ));
            }
        };

        let mut resolved = None;
        let mut candidates = Vec::with_capacity(self.include_paths.len() + 1);
        candidates.push(target.to_string());
        for dir in self.include_paths {
            let dir = dir.trim_end_matches(['/', '\\']);
            candidates.push(format!("{dir}/{target}"));
        }

        for candidate in &candidates {
            match handler.resolve(candidate, path, system) {
                Ok(inc) => {
                    resolved = Some(inc);
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let resolved = resolved.ok_or_else(|| {
            EffectError::syntax(format!("could not resolve include '{target}'"), path, line)
        })?;

        if self.once_files.contains(&resolved.path) {
            // keep the current file's line positions aligned
            out.push('\n');
            return Ok(());
        }

        out.push_str(&format!("#line 1 \"{}\"\n", resolved.path));
        self.depth += 1;
        let result = self.expand_file(&resolved.path, &resolved.source, out);
        self.depth -= 1;
        result?;
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("#line {} \"{}\"\n", line + 1, path));
        Ok(())
    }

    /// Returns true when the pragma is not part of the reserved vocabulary
    /// and should pass through.
    fn pragma(&mut self, args: &str, path: &str, line: u32) -> Result<bool> {
        let mut words = args.split_whitespace();
        let Some(keyword) = words.next() else {
            return Ok(true);
        };

        if keyword == "once" {
            self.once_files.insert(path.to_string());
            return Ok(false);
        }

        if keyword == FLAGS_KEYWORD {
            for word in words {
                self.pragmas.add_flag(word, path, line)?;
            }
            return Ok(false);
        }

        if keyword == MODES_KEYWORD {
            for word in words {
                self.pragmas.add_mode(word, path, line)?;
            }
            return Ok(false);
        }

        if let Some(stage) = ShadeStage::from_keyword(keyword) {
            for word in words {
                self.entrypoints.push(ShaderEntrypoint::new(word, stage));
            }
            return Ok(false);
        }

        Ok(true)
    }

    fn eval_condition(&mut self, expr: &str, path: &str, line: u32) -> Result<i64> {
        let expr = expr.split("//").next().unwrap_or(expr);
        let substituted = self.substitute_defined(expr);
        let mut expanded = String::new();
        let mut in_flight = Vec::new();
        self.expand_text(&substituted, &mut in_flight, &mut expanded, path, line)?;

        let mut tokens = Vec::new();
        for token in ExprToken::lexer(&expanded) {
            if token == ExprToken::Error {
                return Err(EffectError::syntax(
                    format!("malformed conditional expression '{}'", expr.trim()),
                    path,
                    line,
                ));
            }
            tokens.push(token);
        }

        let mut parser = ExprParser { tokens: &tokens, pos: 0, path, line };
        let value = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(EffectError::syntax(
                format!("trailing tokens in conditional expression '{}'", expr.trim()),
                path,
                line,
            ));
        }
        Ok(value)
    }

    /// Replaces `defined(X)` / `defined X` with 1 or 0 before macro
    /// expansion.
    fn substitute_defined(&self, expr: &str) -> String {
        let bytes: Vec<char> = expr.chars().collect();
        let mut out = String::with_capacity(expr.len());
        let mut i = 0usize;

        while i < bytes.len() {
            let c = bytes[i];
            if is_ident_start(c) {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                let word: String = bytes[start..i].iter().collect();

                if word == "defined" {
                    let mut j = i;
                    while j < bytes.len() && bytes[j].is_whitespace() {
                        j += 1;
                    }
                    let parens = j < bytes.len() && bytes[j] == '(';
                    if parens {
                        j += 1;
                        while j < bytes.len() && bytes[j].is_whitespace() {
                            j += 1;
                        }
                    }
                    let name_start = j;
                    while j < bytes.len() && is_ident_char(bytes[j]) {
                        j += 1;
                    }
                    let name: String = bytes[name_start..j].iter().collect();
                    if parens {
                        while j < bytes.len() && bytes[j].is_whitespace() {
                            j += 1;
                        }
                        if j < bytes.len() && bytes[j] == ')' {
                            j += 1;
                        }
                    }
                    out.push(if self.macros.contains_key(&name) { '1' } else { '0' });
                    i = j;
                } else {
                    out.push_str(&word);
                }
            } else {
                out.push(c);
                i += 1;
            }
        }

        out
    }

    /// Macro-expands one line of text. `in_flight` guards against recursive
    /// self-expansion.
    fn expand_text(
        &mut self,
        text: &str,
        in_flight: &mut Vec<String>,
        out: &mut String,
        path: &str,
        line: u32,
    ) -> Result<()> {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0usize;
        let mut in_string = false;

        while i < chars.len() {
            let c = chars[i];

            if in_string {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '"' {
                    in_string = false;
                }
                i += 1;
                continue;
            }

            if c == '"' {
                in_string = true;
                out.push(c);
                i += 1;
                continue;
            }

            if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
                out.extend(&chars[i..]);
                break;
            }

            if c.is_ascii_digit() {
                while i < chars.len() && is_ident_char(chars[i]) {
                    out.push(chars[i]);
                    i += 1;
                }
                continue;
            }

            if is_ident_start(c) {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();

                let expandable = !in_flight.contains(&word) && self.macros.contains_key(&word);
                if !expandable {
                    out.push_str(&word);
                    continue;
                }

                let def = self.macros[&word].clone();
                match def.params {
                    None => {
                        in_flight.push(word);
                        self.expand_text(&def.body, in_flight, out, path, line)?;
                        in_flight.pop();
                    }
                    Some(params) => {
                        let mut j = i;
                        while j < chars.len() && chars[j].is_whitespace() {
                            j += 1;
                        }
                        if j >= chars.len() || chars[j] != '(' {
                            // function-like macro without arguments: verbatim
                            out.push_str(&word);
                            continue;
                        }

                        let (args, next) = parse_macro_args(&chars, j, path, line)?;
                        if args.len() != params.len() && !(params.is_empty() && args.len() == 1 && args[0].trim().is_empty()) {
                            return Err(EffectError::syntax(
                                format!(
                                    "macro '{word}' expects {} argument(s), got {}",
                                    params.len(),
                                    args.len()
                                ),
                                path,
                                line,
                            ));
                        }

                        let substituted = substitute_params(&def.body, &params, &args);
                        in_flight.push(word);
                        self.expand_text(&substituted, in_flight, out, path, line)?;
                        in_flight.pop();
                        i = next;
                    }
                }
                continue;
            }

            out.push(c);
            i += 1;
        }

        Ok(())
    }
}

/// Parses a parenthesized macro argument list starting at `chars[open]`.
/// Returns the raw argument texts and the index past the closing paren.
fn parse_macro_args(
    chars: &[char],
    open: usize,
    path: &str,
    line: u32,
) -> Result<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1usize;
    let mut i = open + 1;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                if c == ')' && depth == 1 {
                    args.push(current.trim().to_string());
                    return Ok((args, i + 1));
                }
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 1 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
        i += 1;
    }

    Err(EffectError::syntax(
        "unterminated macro argument list",
        path,
        line,
    ))
}

/// Token-wise parameter substitution in a macro body.
fn substitute_params(body: &str, params: &[String], args: &[String]) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            match params.iter().position(|p| *p == word) {
                Some(index) if index < args.len() => out.push_str(&args[index]),
                _ => out.push_str(&word),
            }
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

fn first_word(text: &str) -> &str {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(text.len());
    &text[..end]
}

struct ExprParser<'a, 'b> {
    tokens: &'b [ExprToken<'a>],
    pos: usize,
    path: &'b str,
    line: u32,
}

impl<'a, 'b> ExprParser<'a, 'b> {
    fn peek(&self) -> Option<ExprToken<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<ExprToken<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn err(&self, msg: &str) -> EffectError {
        EffectError::syntax(msg.to_string(), self.path, self.line)
    }

    fn parse_or(&mut self) -> Result<i64> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(ExprToken::OrOr) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = ((lhs != 0) || (rhs != 0)) as i64;
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<i64> {
        let mut lhs = self.parse_bit_or()?;
        while self.peek() == Some(ExprToken::AndAnd) {
            self.bump();
            let rhs = self.parse_bit_or()?;
            lhs = ((lhs != 0) && (rhs != 0)) as i64;
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> Result<i64> {
        let mut lhs = self.parse_bit_xor()?;
        while self.peek() == Some(ExprToken::Pipe) {
            self.bump();
            lhs |= self.parse_bit_xor()?;
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<i64> {
        let mut lhs = self.parse_bit_and()?;
        while self.peek() == Some(ExprToken::Caret) {
            self.bump();
            lhs ^= self.parse_bit_and()?;
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<i64> {
        let mut lhs = self.parse_eq()?;
        while self.peek() == Some(ExprToken::Amp) {
            self.bump();
            lhs &= self.parse_eq()?;
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<i64> {
        let mut lhs = self.parse_rel()?;
        loop {
            match self.peek() {
                Some(ExprToken::EqEq) => {
                    self.bump();
                    lhs = (lhs == self.parse_rel()?) as i64;
                }
                Some(ExprToken::Ne) => {
                    self.bump();
                    lhs = (lhs != self.parse_rel()?) as i64;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_rel(&mut self) -> Result<i64> {
        let mut lhs = self.parse_shift()?;
        loop {
            match self.peek() {
                Some(ExprToken::Lt) => {
                    self.bump();
                    lhs = (lhs < self.parse_shift()?) as i64;
                }
                Some(ExprToken::Le) => {
                    self.bump();
                    lhs = (lhs <= self.parse_shift()?) as i64;
                }
                Some(ExprToken::Gt) => {
                    self.bump();
                    lhs = (lhs > self.parse_shift()?) as i64;
                }
                Some(ExprToken::Ge) => {
                    self.bump();
                    lhs = (lhs >= self.parse_shift()?) as i64;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_shift(&mut self) -> Result<i64> {
        let mut lhs = self.parse_add()?;
        loop {
            match self.peek() {
                Some(ExprToken::Shl) => {
                    self.bump();
                    lhs = lhs.wrapping_shl(self.parse_add()? as u32);
                }
                Some(ExprToken::Shr) => {
                    self.bump();
                    lhs = lhs.wrapping_shr(self.parse_add()? as u32);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_add(&mut self) -> Result<i64> {
        let mut lhs = self.parse_mul()?;
        loop {
            match self.peek() {
                Some(ExprToken::Plus) => {
                    self.bump();
                    lhs = lhs.wrapping_add(self.parse_mul()?);
                }
                Some(ExprToken::Minus) => {
                    self.bump();
                    lhs = lhs.wrapping_sub(self.parse_mul()?);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_mul(&mut self) -> Result<i64> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(ExprToken::Star) => {
                    self.bump();
                    lhs = lhs.wrapping_mul(self.parse_unary()?);
                }
                Some(ExprToken::Slash) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err(self.err("division by zero in conditional expression"));
                    }
                    lhs /= rhs;
                }
                Some(ExprToken::Percent) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err(self.err("division by zero in conditional expression"));
                    }
                    lhs %= rhs;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<i64> {
        match self.peek() {
            Some(ExprToken::Bang) => {
                self.bump();
                Ok((self.parse_unary()? == 0) as i64)
            }
            Some(ExprToken::Tilde) => {
                self.bump();
                Ok(!self.parse_unary()?)
            }
            Some(ExprToken::Minus) => {
                self.bump();
                Ok(self.parse_unary()?.wrapping_neg())
            }
            Some(ExprToken::Plus) => {
                self.bump();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<i64> {
        match self.bump() {
            Some(ExprToken::Int(text)) => {
                let text = text.trim_end_matches(['u', 'U', 'l', 'L']);
                let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16)
                } else {
                    text.parse::<i64>()
                };
                value.map_err(|_| self.err("malformed integer literal"))
            }
            // identifiers surviving macro expansion evaluate to 0
            Some(ExprToken::Ident(_)) => Ok(0),
            Some(ExprToken::LParen) => {
                let value = self.parse_or()?;
                match self.bump() {
                    Some(ExprToken::RParen) => Ok(value),
                    _ => Err(self.err("expected ')' in conditional expression")),
                }
            }
            _ => Err(self.err("expected value in conditional expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(pre: &mut VariantPreprocessor, config: u32) -> (String, Vec<ShaderEntrypoint>) {
        let mut out = String::new();
        let eps = pre.get_variant(config, None, &mut out).unwrap();
        (out, eps)
    }

    #[test]
    fn plain_source_passes_through() {
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", "float x;\nfloat y;\n");
        let (out, eps) = variant(&mut pre, 0);
        assert_eq!(out, "float x;\nfloat y;\n");
        assert!(eps.is_empty());
        assert_eq!(pre.variant_count(), 1);
    }

    #[test]
    fn object_macros_expand() {
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", "#define SIZE 16\nfloat data[SIZE];\n");
        let (out, _) = variant(&mut pre, 0);
        assert_eq!(out, "\nfloat data[16];\n");
    }

    #[test]
    fn function_macros_expand() {
        let mut pre = VariantPreprocessor::new();
        pre.set_source(
            "test.wfx",
            "#define LERP(a, b) ((a) + (b))\nfloat v = LERP(x, y * 2);\n",
        );
        let (out, _) = variant(&mut pre, 0);
        assert_eq!(out, "\nfloat v = ((x) + (y * 2));\n");
    }

    #[test]
    fn conditionals_select_branches() {
        let src = "#define A 1\n#if A\nyes\n#else\nno\n#endif\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let (out, _) = variant(&mut pre, 0);
        assert_eq!(out, "\n\nyes\n\n\n\n");
    }

    #[test]
    fn defined_operator() {
        let src = "#if defined(MISSING) || defined __WFX_DEFAULT_MODE__\nkept\n#endif\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let (out, _) = variant(&mut pre, 0);
        assert!(out.contains("kept"));
    }

    #[test]
    fn flag_pragmas_fan_out() {
        let src = "#pragma flags FEATURE_A FEATURE_B\n#ifdef FEATURE_B\nfb\n#endif\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);

        let (out, _) = variant(&mut pre, 0);
        assert!(!out.contains("fb"));
        assert_eq!(pre.flag_variant_count(), 4);
        assert_eq!(pre.variant_count(), 4);
        assert_eq!(pre.variant_flags(), ["FEATURE_A", "FEATURE_B"]);

        let (out, _) = variant(&mut pre, 0b10);
        assert!(out.contains("fb"));
    }

    #[test]
    fn modes_are_exclusive() {
        let src = "#pragma modes HQ LQ\n#ifdef HQ\nhq\n#endif\n#ifdef LQ\nlq\n#endif\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);

        let (out, _) = variant(&mut pre, 0);
        assert!(!out.contains("hq") && !out.contains("lq"));
        // default + HQ + LQ
        assert_eq!(pre.mode_count(), 3);
        assert_eq!(pre.variant_count(), 3);

        let (out, _) = variant(&mut pre, 1);
        assert!(out.contains("hq") && !out.contains("lq"));
        let (out, _) = variant(&mut pre, 2);
        assert!(out.contains("lq") && !out.contains("hq"));
    }

    #[test]
    fn pragma_redefinition_is_an_error() {
        let src = "#pragma flags A\n#pragma modes A\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let mut out = String::new();
        let err = pre.get_variant(0, None, &mut out).unwrap_err();
        assert!(err.to_string().contains("redefine"));
    }

    #[test]
    fn stage_pragmas_declare_entrypoints() {
        let src = "#pragma vertex VS_Main\n#pragma pixel PS_Main PS_Alt\nvoid VS_Main() {}\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let (_, eps) = variant(&mut pre, 0);
        assert_eq!(eps.len(), 3);
        assert_eq!(eps[0].name, "VS_Main");
        assert_eq!(eps[0].stage, ShadeStage::Vertex);
        assert_eq!(eps[2].name, "PS_Alt");
        assert_eq!(eps[2].stage, ShadeStage::Pixel);
    }

    #[test]
    fn unknown_pragmas_pass_through() {
        let src = "#pragma pack_matrix(row_major)\nx\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let (out, _) = variant(&mut pre, 0);
        assert!(out.contains("#pragma pack_matrix(row_major)"));
    }

    #[test]
    fn directives_preserve_line_positions() {
        let src = "#define A\nline2;\n#ifdef B\nhidden;\n#endif\nline6;\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", src);
        let (out, _) = variant(&mut pre, 0);
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines[1], "line2;");
        assert_eq!(lines[5], "line6;");
    }

    struct MapIncludes(FxHashMap<String, String>);

    impl IncludeHandler for MapIncludes {
        fn resolve(
            &mut self,
            path: &str,
            _from: &str,
            _system: bool,
        ) -> std::io::Result<ResolvedInclude> {
            self.0
                .get(path)
                .map(|source| ResolvedInclude {
                    path: path.to_string(),
                    source: source.clone(),
                })
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    #[test]
    fn includes_are_framed_with_line_directives() {
        let mut files = FxHashMap::default();
        files.insert("common.wfxh".to_string(), "float shared_fn();\n".to_string());
        let mut handler = MapIncludes(files);

        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", "#include \"common.wfxh\"\nfloat x;\n");
        let mut out = String::new();
        pre.get_variant(0, Some(&mut handler), &mut out).unwrap();

        assert!(out.contains("#line 1 \"common.wfxh\""));
        assert!(out.contains("float shared_fn();"));
        assert!(out.contains("#line 2 \"test.wfx\""));
        assert!(out.contains("float x;"));
    }

    #[test]
    fn include_search_paths_apply() {
        let mut files = FxHashMap::default();
        files.insert("lib/common.wfxh".to_string(), "ok\n".to_string());
        let mut handler = MapIncludes(files);

        let mut pre = VariantPreprocessor::new();
        pre.set_source("test.wfx", "#include \"common.wfxh\"\n");
        pre.add_include_path("lib");
        let mut out = String::new();
        pre.get_variant(0, Some(&mut handler), &mut out).unwrap();
        assert!(out.contains("ok"));
    }

    #[test]
    fn pragma_once_guards() {
        let mut files = FxHashMap::default();
        files.insert(
            "a.wfxh".to_string(),
            "#pragma once\nonce_body\n".to_string(),
        );
        let mut handler = MapIncludes(files);

        let mut pre = VariantPreprocessor::new();
        pre.set_source("t.wfx", "#include \"a.wfxh\"\n#include \"a.wfxh\"\n");
        let mut out = String::new();
        pre.get_variant(0, Some(&mut handler), &mut out).unwrap();
        assert_eq!(out.matches("once_body").count(), 1);
    }

    #[test]
    fn flags_freeze_after_first_variant() {
        let mut pre = VariantPreprocessor::new();
        pre.set_source("t.wfx", "#pragma flags A\n");
        variant(&mut pre, 0);
        assert!(pre.is_initialized());
        // regenerating does not duplicate the declarations
        variant(&mut pre, 1);
        assert_eq!(pre.variant_flags(), ["A"]);
        assert_eq!(pre.variant_count(), 2);
    }

    #[test]
    fn error_directive_raises() {
        let mut pre = VariantPreprocessor::new();
        pre.set_source("t.wfx", "#error unsupported target\n");
        let mut out = String::new();
        let err = pre.get_variant(0, None, &mut out).unwrap_err();
        assert!(err.to_string().contains("unsupported target"));
    }

    #[test]
    fn elif_chains() {
        let src = "#define V 2\n#if V == 1\na\n#elif V == 2\nb\n#elif V == 3\nc\n#else\nd\n#endif\n";
        let mut pre = VariantPreprocessor::new();
        pre.set_source("t.wfx", src);
        let (out, _) = variant(&mut pre, 0);
        assert!(out.contains('b'));
        assert!(!out.contains('a') && !out.contains('c') && !out.contains('d'));
    }
}
