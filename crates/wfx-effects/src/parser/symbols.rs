//! Token, symbol and scope stores produced by the symbol parser.

use rustc_hash::FxHashMap;

use crate::data::{ShadeStage, INVALID_ID};
use crate::error::{EffectError, Result};
use crate::shader_types::{try_intrinsic_type, ShaderTypeInfo, ShaderTypes};

bitflags::bitflags! {
    /// Token classification. Compound aliases combine the orthogonal
    /// dimensions patterns query by subset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TokenTypes: u32 {
        const INTRINSIC = 1 << 0;
        const USER_DEFINED = 1 << 1;

        const IDENTIFIER = 1 << 2;
        const KEYWORD = 1 << 3;
        const LITERAL = 1 << 4;

        const ALIAS = 1 << 5 | Self::USER_DEFINED.bits();

        const ATTRIBUTE = 1 << 6;
        const SEMANTIC = 1 << 7;
        const ARGUMENT = 1 << 8;
        const PARAMETER = 1 << 9;
        const VARIABLE = 1 << 10;

        const TYPE_MODIFIER = 1 << 11 | Self::KEYWORD.bits();
        const TYPE = 1 << 12;

        const INTRINSIC_TYPE = Self::INTRINSIC.bits() | Self::TYPE.bits();
        const USER_TYPE = 1 << 13 | Self::USER_DEFINED.bits() | Self::TYPE.bits();
        const TYPE_ALIAS = Self::ALIAS.bits() | Self::USER_TYPE.bits();

        const STRUCT = 1 << 14 | Self::KEYWORD.bits();
        const TYPEDEF = 1 << 15 | Self::KEYWORD.bits();
        const FUNCTION = 1 << 16;
        /// Effect-framework construct (shader block, technique, pass).
        const FX = 1 << 17;

        const STATIC = 1 << 18 | Self::TYPE_MODIFIER.bits();
        const CONST = 1 << 19 | Self::TYPE_MODIFIER.bits();
        const GROUP_SHARED = 1 << 20;

        const SHADER = 1 << 21;
        const PASS = 1 << 22;
        const TECHNIQUE = 1 << 23;
        const CONST_BUF = 1 << 24;

        const VERTEX = 1 << 25;
        const HULL = 1 << 26;
        const DOMAIN = 1 << 27;
        const GEOMETRY = 1 << 28;
        const PIXEL = 1 << 29;
        const COMPUTE = 1 << 30;

        const TEMPLATE = 1 << 31;
        const TEMPLATED_TYPE = Self::TYPE.bits() | Self::TEMPLATE.bits();

        const FX_DECL = Self::FX.bits() | Self::KEYWORD.bits();
        const SHADER_DECL = Self::SHADER.bits() | Self::FX_DECL.bits();
        const STRUCT_DECL = Self::STRUCT.bits();
        const TYPEDEF_DECL = Self::TYPEDEF.bits();
        const CONST_BUF_DECL = Self::CONST_BUF.bits() | Self::KEYWORD.bits();

        const ATTRIB_IDENT = Self::ATTRIBUTE.bits() | Self::IDENTIFIER.bits();
        const SEMANTIC_IDENT = Self::SEMANTIC.bits() | Self::IDENTIFIER.bits();
        const PARAM_IDENT = Self::PARAMETER.bits() | Self::IDENTIFIER.bits();
        const VAR_IDENT = Self::VARIABLE.bits() | Self::IDENTIFIER.bits();

        const STRUCT_IDENT = Self::STRUCT.bits() | Self::IDENTIFIER.bits();
        const TYPE_IDENT = Self::TYPEDEF.bits() | Self::IDENTIFIER.bits();
        const FUNC_IDENT = Self::FUNCTION.bits() | Self::IDENTIFIER.bits();
        const FX_IDENT = Self::FX.bits() | Self::IDENTIFIER.bits();

        const SHADER_IDENT = Self::SHADER.bits() | Self::FX_IDENT.bits();
        const CONST_BUF_IDENT = Self::CONST_BUF.bits() | Self::IDENTIFIER.bits();

        const TECHNIQUE_IDENT = Self::TECHNIQUE.bits() | Self::FX_IDENT.bits();
        const TECHNIQUE_DECL = Self::TECHNIQUE.bits() | Self::FX_DECL.bits();

        const PASS_IDENT = Self::PASS.bits() | Self::FX_IDENT.bits();
        const PASS_DECL = Self::PASS.bits() | Self::FX_DECL.bits();

        const TECHNIQUE_SHADER_IDENT = Self::TECHNIQUE.bits() | Self::SHADER_IDENT.bits();

        const VERTEX_SHADER_DECL = Self::VERTEX.bits() | Self::SHADER_DECL.bits();
        const HULL_SHADER_DECL = Self::HULL.bits() | Self::SHADER_DECL.bits();
        const DOMAIN_SHADER_DECL = Self::DOMAIN.bits() | Self::SHADER_DECL.bits();
        const GEOMETRY_SHADER_DECL = Self::GEOMETRY.bits() | Self::SHADER_DECL.bits();
        const PIXEL_SHADER_DECL = Self::PIXEL.bits() | Self::SHADER_DECL.bits();
        const COMPUTE_SHADER_DECL = Self::COMPUTE.bits() | Self::SHADER_DECL.bits();
        const ATTRIB_SHADER_DECL = Self::ATTRIBUTE.bits() | Self::SHADER_DECL.bits();
        const SHADER_MASK = Self::VERTEX.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits()
            | Self::GEOMETRY.bits()
            | Self::PIXEL.bits()
            | Self::COMPUTE.bits();

        const LITERAL_ARG = Self::LITERAL.bits() | Self::ARGUMENT.bits();
        const TYPE_MODIFIER_MASK = Self::STATIC.bits() | Self::CONST.bits();
    }
}

bitflags::bitflags! {
    /// Symbol classification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SymbolTypes: u64 {
        const SCOPE = 1 << 0;
        /// Effect-framework symbol.
        const FX = 1 << 1;
        const SHADER = 1 << 2;
        const PASS = 1 << 3;
        const TECHNIQUE = 1 << 4;

        const VERTEX = 1 << 7;
        const HULL = 1 << 8;
        const DOMAIN = 1 << 9;
        const GEOMETRY = 1 << 10;
        const PIXEL = 1 << 11;
        const COMPUTE = 1 << 12;

        const DECLARATION = 1 << 16;
        const DEFINITION = 1 << 17;

        const USER_DEFINED = 1 << 18;
        const TYPE = 1 << 19;

        const ALIAS = 1 << 20;
        const STRUCT = 1 << 21;
        const FUNCTION = 1 << 22;
        const PARAMETER = 1 << 23;
        const VARIABLE = 1 << 24;
        const CONST_BUF = 1 << 25;

        const AMBIGUOUS = 1 << 26;
        const ARGUMENT = 1 << 27;
        const ANONYMOUS = 1 << 28;

        const ANON_SCOPE = Self::ANONYMOUS.bits() | Self::SCOPE.bits();
        const ANON_VARIABLE = Self::ANONYMOUS.bits() | Self::VARIABLE.bits();
        const AMBIG_FUNC_VAR_DECL = Self::AMBIGUOUS.bits()
            | Self::FUNCTION.bits()
            | Self::VARIABLE.bits()
            | Self::DECLARATION.bits();

        const USER_TYPE = Self::USER_DEFINED.bits() | Self::TYPE.bits();
        const TYPE_ALIAS = Self::ALIAS.bits() | Self::USER_TYPE.bits();
        const USER_STRUCT = Self::STRUCT.bits() | Self::USER_TYPE.bits();
        const USER_CBUF = Self::CONST_BUF.bits() | Self::USER_TYPE.bits();

        const SCOPED_DEFINITION = Self::DEFINITION.bits() | Self::SCOPE.bits();
        const FX_DEFINITION = Self::FX.bits() | Self::SCOPED_DEFINITION.bits();
        const SHADER_DEF = Self::SHADER.bits() | Self::FX_DEFINITION.bits() | Self::ANONYMOUS.bits();

        const TECHNIQUE_DEF = Self::TECHNIQUE.bits() | Self::FX_DEFINITION.bits();
        const TECHNIQUE_PASS_DECL = Self::PASS.bits()
            | Self::FX_DEFINITION.bits()
            | Self::ANONYMOUS.bits();
        const TECHNIQUE_SHADER_DECL = Self::TECHNIQUE.bits()
            | Self::SHADER.bits()
            | Self::FX.bits()
            | Self::DECLARATION.bits()
            | Self::ANON_VARIABLE.bits();

        const VERTEX_SHADER_DEF = Self::VERTEX.bits() | Self::SHADER_DEF.bits();
        const HULL_SHADER_DEF = Self::HULL.bits() | Self::SHADER_DEF.bits();
        const DOMAIN_SHADER_DEF = Self::DOMAIN.bits() | Self::SHADER_DEF.bits();
        const GEOMETRY_SHADER_DEF = Self::GEOMETRY.bits() | Self::SHADER_DEF.bits();
        const PIXEL_SHADER_DEF = Self::PIXEL.bits() | Self::SHADER_DEF.bits();
        const COMPUTE_SHADER_DEF = Self::COMPUTE.bits() | Self::SHADER_DEF.bits();

        const TYPEDEF_DECL = Self::TYPE_ALIAS.bits() | Self::DECLARATION.bits();
        const STRUCT_DECL = Self::USER_STRUCT.bits() | Self::DECLARATION.bits();
        const STRUCT_DEF = Self::USER_STRUCT.bits() | Self::SCOPED_DEFINITION.bits();
        const CONST_BUF_DEF = Self::USER_CBUF.bits() | Self::SCOPED_DEFINITION.bits();

        const VARIABLE_DECL = Self::VARIABLE.bits() | Self::DECLARATION.bits();
        const VARIABLE_ASSIGN_DEF = Self::VARIABLE_DECL.bits() | Self::DEFINITION.bits();

        const FUNC_DECLARATION = Self::FUNCTION.bits() | Self::DECLARATION.bits();
        const FUNC_DEFINITION = Self::FUNCTION.bits() | Self::SCOPED_DEFINITION.bits();

        const SHADER_MASK = Self::VERTEX.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits()
            | Self::GEOMETRY.bits()
            | Self::PIXEL.bits()
            | Self::COMPUTE.bits();
    }
}

/// Extracts the shade stage from token flags.
pub fn stage_from_token_flags(flags: TokenTypes) -> Option<ShadeStage> {
    if flags.contains(TokenTypes::VERTEX) {
        Some(ShadeStage::Vertex)
    } else if flags.contains(TokenTypes::HULL) {
        Some(ShadeStage::Hull)
    } else if flags.contains(TokenTypes::DOMAIN) {
        Some(ShadeStage::Domain)
    } else if flags.contains(TokenTypes::GEOMETRY) {
        Some(ShadeStage::Geometry)
    } else if flags.contains(TokenTypes::PIXEL) {
        Some(ShadeStage::Pixel)
    } else if flags.contains(TokenTypes::COMPUTE) {
        Some(ShadeStage::Compute)
    } else {
        None
    }
}

/// Extracts the shade stage from symbol flags.
pub fn stage_from_symbol_flags(flags: SymbolTypes) -> Option<ShadeStage> {
    if flags.contains(SymbolTypes::VERTEX) {
        Some(ShadeStage::Vertex)
    } else if flags.contains(SymbolTypes::HULL) {
        Some(ShadeStage::Hull)
    } else if flags.contains(SymbolTypes::DOMAIN) {
        Some(ShadeStage::Domain)
    } else if flags.contains(SymbolTypes::GEOMETRY) {
        Some(ShadeStage::Geometry)
    } else if flags.contains(SymbolTypes::PIXEL) {
        Some(ShadeStage::Pixel)
    } else if flags.contains(SymbolTypes::COMPUTE) {
        Some(ShadeStage::Compute)
    } else {
        None
    }
}

/// Maps a reserved keyword to its token flags.
pub fn try_shader_keyword(name: &str) -> Option<TokenTypes> {
    Some(match name {
        "typedef" => TokenTypes::TYPEDEF_DECL,
        "struct" => TokenTypes::STRUCT_DECL,
        "cbuffer" => TokenTypes::CONST_BUF_DECL,
        "static" => TokenTypes::STATIC,
        "const" => TokenTypes::CONST,
        "groupshared" => TokenTypes::GROUP_SHARED,
        "vertex" => TokenTypes::VERTEX_SHADER_DECL,
        "hull" => TokenTypes::HULL_SHADER_DECL,
        "domain" => TokenTypes::DOMAIN_SHADER_DECL,
        "geometry" => TokenTypes::GEOMETRY_SHADER_DECL,
        "pixel" => TokenTypes::PIXEL_SHADER_DECL,
        "compute" => TokenTypes::COMPUTE_SHADER_DECL,
        "technique" => TokenTypes::TECHNIQUE_DECL,
        "pass" => TokenTypes::PASS_DECL,
        "effect" => TokenTypes::FX_DECL,
        _ => return None,
    })
}

/// A semantically classified token tied to a range of lex blocks. Child
/// tokens (types, modifiers, attributes, parameters) are stored contiguously
/// and referenced by range.
#[derive(Debug, Clone)]
pub struct TokenNode {
    pub value: String,
    pub ty: TokenTypes,
    pub depth: i32,
    pub block_start: u32,
    pub block_count: u32,
    pub child_start: u32,
    pub child_count: u32,
    pub subtype_id: u32,
    pub symbol_id: u32,
}

impl TokenNode {
    pub fn has_flags(&self, flags: TokenTypes) -> bool {
        self.ty.contains(flags)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SymbolData {
    /// Token ID of the symbol's identifier; `INVALID_ID` for anonymous scopes.
    pub ident_id: u32,
    /// Scope owned by the symbol, if any.
    pub scope_id: u32,
    pub ty: SymbolTypes,
}

impl SymbolData {
    pub fn has_flags(&self, flags: SymbolTypes) -> bool {
        self.ty.contains(flags)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScopeData {
    /// Symbol declaring this scope.
    pub symbol_id: u32,
    /// `INVALID_ID` for the global scope.
    pub parent_scope: u32,
    /// First block of the scope body, the opening `{`.
    pub block_start: u32,
    pub block_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionData {
    /// Canonical `name(t1,t2,…)` overload key; `name(void)` for no
    /// parameters.
    pub signature: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeData {
    /// Index stripped from a trailing digit run, -1 when absent.
    pub semantic_index: i32,
}

/// Resolved type reference stored per type-specifier token.
#[derive(Debug, Clone, Copy)]
pub enum TypeRef {
    Intrinsic(&'static ShaderTypeInfo),
    User(u32),
    Unknown,
}

/// Token, symbol and scope stores plus per-scope name and overload lookup
/// tables. Scope 0 is the implicit global scope.
pub struct ScopeBuilder {
    scopes: Vec<ScopeData>,
    scope_symbol_maps: Vec<FxHashMap<String, u32>>,
    func_overload_maps: Vec<FxHashMap<String, Vec<u32>>>,
    scope_symbol_lists: Vec<Vec<u32>>,

    tokens: Vec<TokenNode>,
    symbols: Vec<SymbolData>,

    types: Vec<TypeRef>,
    user_types: Vec<ShaderTypeInfo>,
    functions: Vec<FunctionData>,
    attributes: Vec<AttributeData>,

    deferred_symbols: Vec<u32>,
    top_scope: u32,
    pending_scope_symbol: u32,
}

impl Default for ScopeBuilder {
    fn default() -> Self {
        let mut this = ScopeBuilder {
            scopes: Vec::new(),
            scope_symbol_maps: Vec::new(),
            func_overload_maps: Vec::new(),
            scope_symbol_lists: Vec::new(),
            tokens: Vec::new(),
            symbols: Vec::new(),
            types: Vec::new(),
            user_types: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            deferred_symbols: Vec::new(),
            top_scope: 0,
            pending_scope_symbol: INVALID_ID,
        };
        this.init();
        this
    }
}

impl ScopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn init(&mut self) {
        self.top_scope = INVALID_ID;
        self.pending_scope_symbol = INVALID_ID;

        self.symbols.push(SymbolData {
            ident_id: INVALID_ID,
            scope_id: 0,
            ty: SymbolTypes::ANON_SCOPE,
        });
        self.add_scope(0, 0, 0);
    }

    pub fn clear(&mut self) {
        self.scopes.clear();
        self.scope_symbol_maps.clear();
        self.func_overload_maps.clear();
        self.scope_symbol_lists.clear();
        self.tokens.clear();
        self.symbols.clear();
        self.types.clear();
        self.user_types.clear();
        self.functions.clear();
        self.attributes.clear();
        self.deferred_symbols.clear();
        self.init();
    }

    fn add_scope(&mut self, symbol_id: u32, block_start: u32, block_count: u32) {
        let parent = self.top_scope;
        self.top_scope = self.scopes.len() as u32;

        self.symbols[symbol_id as usize].scope_id = self.top_scope;
        self.scopes.push(ScopeData {
            symbol_id,
            parent_scope: parent,
            block_start,
            block_count,
        });

        self.scope_symbol_maps.push(FxHashMap::default());
        self.func_overload_maps.push(FxHashMap::default());
        self.scope_symbol_lists.push(Vec::new());
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn token(&self, token_id: u32) -> &TokenNode {
        &self.tokens[token_id as usize]
    }

    pub fn token_mut(&mut self, token_id: u32) -> &mut TokenNode {
        &mut self.tokens[token_id as usize]
    }

    pub fn token_children(&self, token_id: u32) -> &[TokenNode] {
        let token = &self.tokens[token_id as usize];
        let start = token.child_start as usize;
        &self.tokens[start..start + token.child_count as usize]
    }

    pub fn symbol_data(&self, symbol_id: u32) -> &SymbolData {
        &self.symbols[symbol_id as usize]
    }

    pub fn scope_data(&self, scope_id: u32) -> &ScopeData {
        &self.scopes[scope_id as usize]
    }

    pub fn func_data(&self, func_id: u32) -> &FunctionData {
        &self.functions[func_id as usize]
    }

    pub fn func_data_mut(&mut self, func_id: u32) -> &mut FunctionData {
        &mut self.functions[func_id as usize]
    }

    pub fn attrib_data(&self, attrib_id: u32) -> &AttributeData {
        &self.attributes[attrib_id as usize]
    }

    pub fn attrib_data_mut(&mut self, attrib_id: u32) -> &mut AttributeData {
        &mut self.attributes[attrib_id as usize]
    }

    /// Resolves the type-slot reference of a type-specifier token.
    pub fn type_data(&self, type_slot: u32) -> Option<&ShaderTypeInfo> {
        match self.types.get(type_slot as usize)? {
            TypeRef::Intrinsic(info) => Some(info),
            TypeRef::User(index) => self.user_types.get(*index as usize),
            TypeRef::Unknown => None,
        }
    }

    pub fn scope_child_count(&self, scope_id: u32) -> usize {
        self.scope_symbol_lists[scope_id as usize].len()
    }

    pub fn scope_child(&self, scope_id: u32, index: usize) -> u32 {
        self.scope_symbol_lists[scope_id as usize][index]
    }

    /// Resolves token flags for a word: keywords, intrinsic types, then
    /// visible symbols.
    pub fn token_flags(&self, word: &str, top: Option<u32>) -> Option<TokenTypes> {
        if word.is_empty() {
            return None;
        }

        if let Some(flags) = try_shader_keyword(word) {
            return Some(flags);
        }

        if try_intrinsic_type(word).is_some() {
            return Some(TokenTypes::INTRINSIC_TYPE);
        }

        let symbol_id = self.try_get_symbol(word, top)?;
        let ident_id = self.symbols[symbol_id as usize].ident_id;
        if ident_id == INVALID_ID {
            return None;
        }
        // an FX declaration name reused as an identifier must not re-trigger
        // block matching
        Some(self.tokens[ident_id as usize].ty & !TokenTypes::FX)
    }

    /// Resolves a type by name: intrinsic table first, then visible
    /// user-declared types and aliases.
    pub fn try_get_type(&self, name: &str, top: Option<u32>) -> Option<TypeRef> {
        if name.is_empty() {
            return None;
        }

        if let Some(info) = try_intrinsic_type(name) {
            return Some(TypeRef::Intrinsic(info));
        }

        let symbol_id = self.try_get_symbol(name, top)?;
        let ident = &self.tokens[self.symbols[symbol_id as usize].ident_id as usize];

        if ident.has_flags(TokenTypes::TYPE_ALIAS) {
            self.types.get(ident.subtype_id as usize).copied()
        } else if ident.has_flags(TokenTypes::USER_TYPE) {
            Some(TypeRef::User(ident.subtype_id))
        } else {
            None
        }
    }

    /// Walks the scope chain upward looking for a symbol by name.
    pub fn try_get_symbol(&self, name: &str, top: Option<u32>) -> Option<u32> {
        let mut scope = top.unwrap_or(self.top_scope);

        loop {
            if let Some(&symbol_id) = self.scope_symbol_maps[scope as usize].get(name) {
                return Some(symbol_id);
            }

            let parent = self.scopes[scope as usize].parent_scope;
            if parent == INVALID_ID {
                return None;
            }
            scope = parent;
        }
    }

    /// Walks the scope chain upward looking for function overloads by
    /// identifier.
    pub fn try_get_func_overloads(&self, ident: &str, top: Option<u32>) -> Option<&[u32]> {
        let mut scope = top.unwrap_or(self.top_scope);

        loop {
            if let Some(list) = self.func_overload_maps[scope as usize].get(ident) {
                return Some(list);
            }

            let parent = self.scopes[scope as usize].parent_scope;
            if parent == INVALID_ID {
                return None;
            }
            scope = parent;
        }
    }

    pub fn has_symbol(&self, name: &str, top: Option<u32>) -> bool {
        self.try_get_symbol(name, top).is_some()
    }

    /// Appends a new token and returns its ID.
    pub fn new_token(&mut self, value: &str, flags: TokenTypes, depth: i32, block_id: u32) -> u32 {
        let token_id = self.tokens.len() as u32;
        self.tokens.push(TokenNode {
            value: value.to_string(),
            ty: flags,
            depth,
            block_start: block_id,
            block_count: 1,
            child_start: 0,
            child_count: 0,
            subtype_id: INVALID_ID,
            symbol_id: INVALID_ID,
        });
        token_id
    }

    /// Allocates a type slot for a type-specifier token.
    pub fn new_type_specifier(&mut self, token_id: u32) -> u32 {
        let slot = self.types.len() as u32;
        let name = self.tokens[token_id as usize].value.clone();
        let type_ref = self.try_get_type(&name, None).unwrap_or(TypeRef::Unknown);
        self.types.push(type_ref);
        self.tokens[token_id as usize].subtype_id = slot;
        slot
    }

    /// Allocates attribute data for a semantic or attribute token.
    pub fn new_attribute(&mut self, token_id: u32) -> u32 {
        let slot = self.attributes.len() as u32;
        self.attributes.push(AttributeData { semantic_index: -1 });
        self.tokens[token_id as usize].subtype_id = slot;
        slot
    }

    /// Appends a generic symbol tied to an identifier token.
    pub fn new_symbol(&mut self, token_id: u32, flags: SymbolTypes) -> u32 {
        let symbol_id = self.symbols.len() as u32;
        self.symbols.push(SymbolData {
            ident_id: token_id,
            scope_id: INVALID_ID,
            ty: flags,
        });
        self.tokens[token_id as usize].symbol_id = symbol_id;
        symbol_id
    }

    pub fn new_func(&mut self, token_id: u32, flags: SymbolTypes) -> u32 {
        let symbol_id = self.new_symbol(token_id, flags);
        let func_slot = self.functions.len() as u32;
        self.functions.push(FunctionData::default());
        self.tokens[token_id as usize].subtype_id = func_slot;
        symbol_id
    }

    pub fn new_type_alias(&mut self, token_id: u32) -> u32 {
        let symbol_id = self.new_symbol(token_id, SymbolTypes::TYPEDEF_DECL);

        // resolve the aliased base type from the child type token
        let mut aliased = TypeRef::Unknown;
        for child in self.token_children(token_id) {
            if child.has_flags(TokenTypes::TYPE) {
                if let Some(type_ref) = self.try_get_type(&child.value.clone(), None) {
                    aliased = type_ref;
                }
                break;
            }
        }

        let slot = self.types.len() as u32;
        self.types.push(aliased);
        self.tokens[token_id as usize].subtype_id = slot;
        symbol_id
    }

    pub fn new_user_type(&mut self, token_id: u32, flags: SymbolTypes) -> u32 {
        let symbol_id = self.new_symbol(token_id, flags);
        let token = &mut self.tokens[token_id as usize];
        token.ty |= TokenTypes::USER_TYPE;
        token.subtype_id = self.user_types.len() as u32;

        let name = token.value.clone();
        self.user_types.push(ShaderTypeInfo {
            name,
            flags: ShaderTypes::USER_TYPE,
            size: 0,
        });
        symbol_id
    }

    /// Pushes a new scope associated with the block at `first_block`.
    /// Deferred symbols (function parameters) land in the new scope.
    pub fn push_scope(&mut self, first_block: u32, _depth: i32) -> Result<()> {
        if self.pending_scope_symbol == INVALID_ID {
            let symbol_id = self.symbols.len() as u32;
            self.symbols.push(SymbolData {
                ident_id: INVALID_ID,
                scope_id: INVALID_ID,
                ty: SymbolTypes::ANON_SCOPE,
            });
            self.pending_scope_symbol = symbol_id;
        }

        self.add_scope(self.pending_scope_symbol, first_block, 1);
        self.pending_scope_symbol = INVALID_ID;

        let deferred = std::mem::take(&mut self.deferred_symbols);
        for symbol_id in deferred {
            self.push_symbol(symbol_id, false)?;
        }

        Ok(())
    }

    /// Terminates the top-most unterminated scope at `last_block`.
    pub fn pop_scope(&mut self, last_block: u32) -> Result<()> {
        let scope = &mut self.scopes[self.top_scope as usize];

        if scope.parent_scope == INVALID_ID {
            return Err(EffectError::parse("attempted to terminate global scope"));
        }

        scope.block_count = last_block - scope.block_start + 1;
        self.top_scope = scope.parent_scope;
        Ok(())
    }

    /// Registers a symbol in the top-most scope. Deferred symbols wait for
    /// the next scope push. Anonymous symbols join the child list without a
    /// name-map entry.
    pub fn push_symbol(&mut self, symbol_id: u32, deferred: bool) -> Result<()> {
        let symbol = self.symbols[symbol_id as usize];

        if deferred {
            self.deferred_symbols.push(symbol_id);
        } else if symbol.has_flags(SymbolTypes::ANONYMOUS) {
            self.scope_symbol_lists[self.top_scope as usize].push(symbol_id);
        } else {
            let token = &self.tokens[symbol.ident_id as usize];
            let (name, value) = if token.has_flags(TokenTypes::FUNC_IDENT) {
                let signature = self.functions[token.subtype_id as usize].signature.clone();
                (signature, token.value.clone())
            } else {
                (token.value.clone(), token.value.clone())
            };

            if token.has_flags(TokenTypes::FUNC_IDENT) {
                self.func_overload_maps[self.top_scope as usize]
                    .entry(value)
                    .or_default()
                    .insert(0, symbol_id);
            }

            if let Some(&existing) = self.scope_symbol_maps[self.top_scope as usize].get(&name) {
                // a forward declaration may be closed by its definition
                let prior = self.symbols[existing as usize];
                let closes_forward_decl = prior.has_flags(SymbolTypes::FUNC_DECLARATION)
                    && !prior.has_flags(SymbolTypes::DEFINITION)
                    && symbol.has_flags(SymbolTypes::FUNC_DEFINITION);

                if !closes_forward_decl {
                    return Err(EffectError::parse(format!(
                        "unexpected redefinition of symbol '{name}'"
                    )));
                }
            }

            self.scope_symbol_maps[self.top_scope as usize].insert(name, symbol_id);
            self.scope_symbol_lists[self.top_scope as usize].push(symbol_id);
        }

        if symbol.has_flags(SymbolTypes::SCOPE) {
            if self.pending_scope_symbol != INVALID_ID {
                return Err(EffectError::parse("only one pending scope can be queued"));
            }
            self.pending_scope_symbol = symbol_id;
        }

        Ok(())
    }

    // --- handle constructors -------------------------------------------------

    pub fn symbol(&self, symbol_id: u32) -> SymbolHandle<'_> {
        SymbolHandle {
            sb: self,
            symbol_id,
        }
    }

    pub fn scope(&self, scope_id: u32) -> ScopeHandle<'_> {
        ScopeHandle { sb: self, scope_id }
    }

    pub fn token_handle(&self, token_id: u32) -> TokenHandle<'_> {
        TokenHandle { sb: self, token_id }
    }
}

/// Read accessor for one token and its children.
#[derive(Clone, Copy)]
pub struct TokenHandle<'a> {
    sb: &'a ScopeBuilder,
    token_id: u32,
}

impl<'a> TokenHandle<'a> {
    pub fn id(&self) -> u32 {
        self.token_id
    }

    pub fn node(&self) -> &'a TokenNode {
        self.sb.token(self.token_id)
    }

    pub fn value(&self) -> &'a str {
        &self.node().value
    }

    pub fn flags(&self) -> TokenTypes {
        self.node().ty
    }

    pub fn has_flags(&self, flags: TokenTypes) -> bool {
        self.node().has_flags(flags)
    }

    pub fn block_start(&self) -> u32 {
        self.node().block_start
    }

    pub fn block_count(&self) -> u32 {
        self.node().block_count
    }

    pub fn child_count(&self) -> u32 {
        self.node().child_count
    }

    pub fn child(&self, index: u32) -> TokenHandle<'a> {
        debug_assert!(index < self.node().child_count);
        TokenHandle {
            sb: self.sb,
            token_id: self.node().child_start + index,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = TokenHandle<'a>> + '_ {
        let node = self.node();
        (node.child_start..node.child_start + node.child_count).map(|token_id| TokenHandle {
            sb: self.sb,
            token_id,
        })
    }
}

/// Read accessor for one symbol.
#[derive(Clone, Copy)]
pub struct SymbolHandle<'a> {
    sb: &'a ScopeBuilder,
    symbol_id: u32,
}

impl<'a> SymbolHandle<'a> {
    pub fn id(&self) -> u32 {
        self.symbol_id
    }

    pub fn data(&self) -> &'a SymbolData {
        self.sb.symbol_data(self.symbol_id)
    }

    pub fn flags(&self) -> SymbolTypes {
        self.data().ty
    }

    pub fn has_flags(&self, flags: SymbolTypes) -> bool {
        self.data().has_flags(flags)
    }

    pub fn has_ident(&self) -> bool {
        self.data().ident_id != INVALID_ID
    }

    pub fn ident(&self) -> TokenHandle<'a> {
        debug_assert!(self.has_ident());
        TokenHandle {
            sb: self.sb,
            token_id: self.data().ident_id,
        }
    }

    pub fn name(&self) -> &'a str {
        if self.has_ident() {
            self.ident().value()
        } else {
            ""
        }
    }

    pub fn is_scope(&self) -> bool {
        self.data().scope_id != INVALID_ID
    }

    pub fn scope(&self) -> Option<ScopeHandle<'a>> {
        let scope_id = self.data().scope_id;
        (scope_id != INVALID_ID).then(|| ScopeHandle {
            sb: self.sb,
            scope_id,
        })
    }

    /// Type info and modifier flags of a variable symbol, from its identifier
    /// token's children.
    pub fn var_type(&self) -> (Option<&'a ShaderTypeInfo>, TokenTypes) {
        let mut info = None;
        let mut modifiers = TokenTypes::empty();

        for child in self.ident().children() {
            modifiers |= child.flags() & TokenTypes::TYPE_MODIFIER_MASK;
            if info.is_none() && child.has_flags(TokenTypes::TYPE) {
                info = self.sb.type_data(child.node().subtype_id);
            }
        }

        (info, modifiers)
    }

    /// Signature string of a function symbol.
    pub fn signature(&self) -> Option<&'a str> {
        let ident = self.ident();
        ident
            .has_flags(TokenTypes::FUNC_IDENT)
            .then(|| self.sb.func_data(ident.node().subtype_id).signature.as_str())
    }
}

/// Read accessor for one scope and its member symbols.
#[derive(Clone, Copy)]
pub struct ScopeHandle<'a> {
    sb: &'a ScopeBuilder,
    scope_id: u32,
}

impl<'a> ScopeHandle<'a> {
    pub fn id(&self) -> u32 {
        self.scope_id
    }

    pub fn data(&self) -> &'a ScopeData {
        self.sb.scope_data(self.scope_id)
    }

    pub fn block_start(&self) -> u32 {
        self.data().block_start
    }

    pub fn block_count(&self) -> u32 {
        self.data().block_count
    }

    pub fn is_global(&self) -> bool {
        self.data().parent_scope == INVALID_ID
    }

    pub fn parent(&self) -> Option<ScopeHandle<'a>> {
        let parent = self.data().parent_scope;
        (parent != INVALID_ID).then(|| ScopeHandle {
            sb: self.sb,
            scope_id: parent,
        })
    }

    pub fn symbol(&self) -> SymbolHandle<'a> {
        SymbolHandle {
            sb: self.sb,
            symbol_id: self.data().symbol_id,
        }
    }

    pub fn child_count(&self) -> usize {
        self.sb.scope_child_count(self.scope_id)
    }

    pub fn child(&self, index: usize) -> SymbolHandle<'a> {
        SymbolHandle {
            sb: self.sb,
            symbol_id: self.sb.scope_child(self.scope_id, index),
        }
    }

    pub fn children(&self) -> impl Iterator<Item = SymbolHandle<'a>> + '_ {
        (0..self.child_count()).map(|i| self.child(i))
    }

    /// Function overloads declared under this scope (not ancestors) for the
    /// given identifier.
    pub fn func_overloads(&self, ident: &str) -> Option<&'a [u32]> {
        self.sb.func_overload_maps[self.scope_id as usize]
            .get(ident)
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_flags_compose() {
        let vertex = try_shader_keyword("vertex").unwrap();
        assert!(vertex.contains(TokenTypes::FX_DECL));
        assert!(vertex.contains(TokenTypes::SHADER));
        assert_eq!(stage_from_token_flags(vertex), Some(ShadeStage::Vertex));

        assert!(try_shader_keyword("banana").is_none());
        assert!(try_shader_keyword("technique")
            .unwrap()
            .contains(TokenTypes::TECHNIQUE_DECL));
    }

    #[test]
    fn scope_chain_lookup() {
        let mut sb = ScopeBuilder::new();

        let token = sb.new_token("gValue", TokenTypes::VAR_IDENT, 0, 0);
        let symbol = sb.new_symbol(token, SymbolTypes::VARIABLE_DECL);
        sb.push_symbol(symbol, false).unwrap();

        // nested anonymous scope still sees the global
        sb.push_scope(1, 0).unwrap();
        assert_eq!(sb.try_get_symbol("gValue", None), Some(symbol));
        assert!(sb.token_flags("gValue", None).unwrap().contains(TokenTypes::VARIABLE));
        sb.pop_scope(3).unwrap();

        assert_eq!(sb.try_get_symbol("missing", None), None);
    }

    #[test]
    fn duplicate_symbols_rejected() {
        let mut sb = ScopeBuilder::new();
        let t0 = sb.new_token("x", TokenTypes::VAR_IDENT, 0, 0);
        let s0 = sb.new_symbol(t0, SymbolTypes::VARIABLE_DECL);
        sb.push_symbol(s0, false).unwrap();

        let t1 = sb.new_token("x", TokenTypes::VAR_IDENT, 0, 1);
        let s1 = sb.new_symbol(t1, SymbolTypes::VARIABLE_DECL);
        assert!(sb.push_symbol(s1, false).is_err());
    }

    #[test]
    fn deferred_parameters_enter_next_scope() {
        let mut sb = ScopeBuilder::new();
        let func_token = sb.new_token("Fn", TokenTypes::FUNC_IDENT, 0, 0);
        let func = sb.new_func(func_token, SymbolTypes::FUNC_DEFINITION);
        sb.func_data_mut(0).signature = "Fn(void)".to_string();
        sb.push_symbol(func, false).unwrap();

        let param_token = sb.new_token("arg", TokenTypes::PARAM_IDENT, 0, 1);
        let param = sb.new_symbol(param_token, SymbolTypes::PARAMETER);
        sb.push_symbol(param, true).unwrap();

        // parameter is not visible at global scope
        assert_eq!(sb.try_get_symbol("arg", Some(0)), None);

        sb.push_scope(2, 0).unwrap();
        assert!(sb.try_get_symbol("arg", None).is_some());

        // the function owns the scope that was pushed
        assert!(sb.symbol(func).scope().is_some());
    }

    #[test]
    fn function_overloads_share_a_name() {
        let mut sb = ScopeBuilder::new();

        let t0 = sb.new_token("Fn", TokenTypes::FUNC_IDENT, 0, 0);
        let f0 = sb.new_func(t0, SymbolTypes::FUNC_DEFINITION);
        sb.func_data_mut(sb.token(t0).subtype_id).signature = "Fn(float)".to_string();
        sb.push_symbol(f0, false).unwrap();
        sb.push_scope(1, 0).unwrap();
        sb.pop_scope(2).unwrap();

        let t1 = sb.new_token("Fn", TokenTypes::FUNC_IDENT, 0, 3);
        let f1 = sb.new_func(t1, SymbolTypes::FUNC_DEFINITION);
        sb.func_data_mut(sb.token(t1).subtype_id).signature = "Fn(int)".to_string();
        sb.push_symbol(f1, false).unwrap();

        let overloads = sb.try_get_func_overloads("Fn", Some(0)).unwrap();
        assert_eq!(overloads.len(), 2);
    }

    #[test]
    fn user_types_resolve() {
        let mut sb = ScopeBuilder::new();
        let token = sb.new_token("Light", TokenTypes::STRUCT_IDENT, 0, 0);
        let symbol = sb.new_user_type(token, SymbolTypes::STRUCT_DEF);
        sb.push_symbol(symbol, false).unwrap();
        sb.push_scope(1, 0).unwrap();
        sb.pop_scope(2).unwrap();

        match sb.try_get_type("Light", None) {
            Some(TypeRef::User(index)) => {
                assert_eq!(sb.user_types[index as usize].name, "Light");
            }
            other => panic!("expected user type, got {other:?}"),
        }

        assert!(matches!(
            sb.try_get_type("float2", None),
            Some(TypeRef::Intrinsic(_))
        ));
    }
}
