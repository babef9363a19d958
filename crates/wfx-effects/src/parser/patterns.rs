//! Pattern language driving the symbol parser, and the static catalogue of
//! recognized declaration forms.
//!
//! A [`MatchNode`] either carries a sequence of [`MatchPattern`]s (typed
//! lex-block expectations with capture patterns) or a list of child nodes.
//! One child of a node list may be flagged as the *entrypoint*: siblings
//! before it are reversed at catalogue construction and matched leftward from
//! the entrypoint index, giving the engine mixed forward/backward context
//! around a pivot.

use once_cell::sync::Lazy;
use smallvec::SmallVec;

use super::blocks::LexBlockTypes;
use super::symbols::{SymbolTypes, TokenTypes};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MatchQualifiers: u8 {
        /// Can match 0 or 1 objects.
        const OPTIONAL = 1 << 0;
        /// Matches one or more objects.
        const ONE_OR_MORE = 1 << 1;
        /// Any one member of the containing list can satisfy the match.
        const ALTERNATION = 1 << 2;
        /// Can match any number of objects.
        const ZERO_OR_MORE = Self::OPTIONAL.bits() | Self::ONE_OR_MORE.bits();
    }
}

/// A qualified lex-block expectation. An empty type matches one block of any
/// kind.
#[derive(Debug, Clone, Copy)]
pub struct BlockQualifier {
    pub ty: LexBlockTypes,
    pub quals: MatchQualifiers,
}

impl BlockQualifier {
    /// Matches one block of any type.
    pub const WILD: LexBlockTypes = LexBlockTypes::empty();

    pub fn new(ty: LexBlockTypes) -> Self {
        BlockQualifier {
            ty,
            quals: MatchQualifiers::empty(),
        }
    }

    pub fn with(ty: LexBlockTypes, quals: MatchQualifiers) -> Self {
        BlockQualifier { ty, quals }
    }

    pub fn is_wild(&self) -> bool {
        self.ty.is_empty()
    }

    pub fn has_quals(&self, quals: MatchQualifiers) -> bool {
        self.quals.contains(quals)
    }
}

/// A qualified token expectation inside a capture pattern.
#[derive(Debug, Clone, Copy)]
pub struct TokenQualifier {
    pub ty: TokenTypes,
    pub quals: MatchQualifiers,
}

impl TokenQualifier {
    pub fn new(ty: TokenTypes) -> Self {
        TokenQualifier {
            ty,
            quals: MatchQualifiers::empty(),
        }
    }

    pub fn with(ty: TokenTypes, quals: MatchQualifiers) -> Self {
        TokenQualifier { ty, quals }
    }
}

/// Captures one identifier (and the qualifier words preceding it) out of a
/// matched block. A non-empty `symbol_type` promotes the captured token to a
/// symbol.
#[derive(Debug, Clone)]
pub struct CapturePattern {
    pub predicates: Vec<TokenQualifier>,
    pub token_type: TokenTypes,
    pub symbol_type: SymbolTypes,
}

impl Default for CapturePattern {
    fn default() -> Self {
        CapturePattern {
            predicates: Vec::new(),
            token_type: TokenTypes::empty(),
            symbol_type: SymbolTypes::empty(),
        }
    }
}

impl CapturePattern {
    pub fn token(token_type: TokenTypes) -> Self {
        CapturePattern {
            predicates: Vec::new(),
            token_type,
            symbol_type: SymbolTypes::empty(),
        }
    }

    pub fn symbol(token_type: TokenTypes, symbol_type: SymbolTypes) -> Self {
        CapturePattern {
            predicates: Vec::new(),
            token_type,
            symbol_type,
        }
    }

    pub fn full(
        predicates: Vec<TokenQualifier>,
        token_type: TokenTypes,
        symbol_type: SymbolTypes,
    ) -> Self {
        CapturePattern {
            predicates,
            token_type,
            symbol_type,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.predicates.is_empty() || !self.token_type.is_empty()
    }
}

/// A block-qualifier sequence with the capture patterns applied to the blocks
/// it matches.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub blocks: SmallVec<[BlockQualifier; 4]>,
    pub captures: Vec<CapturePattern>,
    pub quals: MatchQualifiers,
}

impl MatchPattern {
    pub fn new(
        blocks: &[BlockQualifier],
        captures: Vec<CapturePattern>,
        quals: MatchQualifiers,
    ) -> Self {
        MatchPattern {
            blocks: SmallVec::from_slice(blocks),
            captures: captures.into_iter().filter(CapturePattern::is_valid).collect(),
            quals,
        }
    }

    pub fn bare(blocks: &[BlockQualifier]) -> Self {
        Self::new(blocks, Vec::new(), MatchQualifiers::empty())
    }

    pub fn has_quals(&self, quals: MatchQualifiers) -> bool {
        self.quals.contains(quals)
    }

    pub fn has_captures(&self) -> bool {
        !self.captures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum MatchNodeKind {
    Patterns(Vec<MatchPattern>),
    Nodes(Vec<MatchNode>),
}

/// A node in the pattern tree.
#[derive(Debug, Clone)]
pub struct MatchNode {
    pub kind: MatchNodeKind,
    /// Token type that designates the capture owning the node's other
    /// captures as children, usually an identifier.
    pub parent_token: TokenTypes,
    pub quals: MatchQualifiers,
    pub is_entrypoint: bool,
    /// False once the node has been reversed for backward matching.
    pub is_forward: bool,
}

impl From<MatchPattern> for MatchNode {
    fn from(pattern: MatchPattern) -> Self {
        MatchNode::patterns(vec![pattern], MatchQualifiers::empty())
    }
}

impl MatchNode {
    pub fn patterns(patterns: Vec<MatchPattern>, quals: MatchQualifiers) -> Self {
        MatchNode {
            kind: MatchNodeKind::Patterns(patterns),
            parent_token: TokenTypes::empty(),
            quals,
            is_entrypoint: false,
            is_forward: true,
        }
    }

    pub fn nodes(nodes: Vec<MatchNode>, quals: MatchQualifiers) -> Self {
        let mut node = MatchNode {
            kind: MatchNodeKind::Nodes(nodes),
            parent_token: TokenTypes::empty(),
            quals,
            is_entrypoint: false,
            is_forward: true,
        };
        node.presort();
        node
    }

    pub fn parent(mut self, parent_token: TokenTypes) -> Self {
        self.parent_token = parent_token;
        self
    }

    pub fn entrypoint(mut self) -> Self {
        self.is_entrypoint = true;
        self
    }

    pub fn has_quals(&self, quals: MatchQualifiers) -> bool {
        self.quals.contains(quals)
    }

    /// Reverses siblings preceding the entrypoint child so they match
    /// leftward from the pivot. Precomputed here, not at match time.
    fn presort(&mut self) {
        let MatchNodeKind::Nodes(nodes) = &mut self.kind else {
            return;
        };

        let entry = nodes.iter().position(|n| n.is_entrypoint).unwrap_or(0);
        if entry > 0 {
            debug_assert!(!self.is_entrypoint, "nested entrypoints are not allowed");
            for node in &mut nodes[..entry] {
                node.reverse();
            }
            nodes[..entry].reverse();
        }
    }

    fn reverse(&mut self) {
        debug_assert!(self.is_forward, "pattern reversed twice");
        self.is_forward = false;

        match &mut self.kind {
            MatchNodeKind::Patterns(patterns) => patterns.reverse(),
            MatchNodeKind::Nodes(nodes) => {
                nodes.reverse();
                for node in nodes {
                    node.reverse();
                }
            }
        }
    }
}

/// Groups root match nodes by the token flags the leading word of a block may
/// carry.
pub struct MatchNodeGroup {
    pub leading: Vec<TokenTypes>,
    pub roots: Vec<MatchNode>,
}

impl MatchNodeGroup {
    pub fn matches_leading(&self, flags: TokenTypes) -> bool {
        self.leading.iter().any(|&l| flags.contains(l))
    }
}

fn q(ty: LexBlockTypes) -> BlockQualifier {
    BlockQualifier::new(ty)
}

/// Zero-or-more type modifiers followed by a type name.
fn type_cap() -> CapturePattern {
    CapturePattern::full(
        vec![TokenQualifier::with(
            TokenTypes::TYPE_MODIFIER,
            MatchQualifiers::ZERO_OR_MORE,
        )],
        TokenTypes::TYPE,
        SymbolTypes::empty(),
    )
}

/// `[attrib]` / `[attrib(args…)]` bracket groups, zero or more.
fn attribute_pattern() -> MatchNode {
    let with_args = MatchNode::patterns(
        vec![
            MatchPattern::new(
                &[q(LexBlockTypes::PARENTHESES_PREAMBLE)],
                vec![CapturePattern::token(TokenTypes::ATTRIB_IDENT)],
                MatchQualifiers::empty(),
            ),
            MatchPattern::bare(&[q(LexBlockTypes::OPEN_PARENTHESES)]),
            MatchPattern::new(
                &[
                    q(LexBlockTypes::COMMA_SEPARATOR),
                    q(LexBlockTypes::UNTERMINATED),
                ],
                vec![CapturePattern::token(TokenTypes::LITERAL_ARG)],
                MatchQualifiers::ONE_OR_MORE | MatchQualifiers::ALTERNATION,
            ),
            MatchPattern::bare(&[q(LexBlockTypes::CLOSE_PARENTHESES)]),
        ],
        MatchQualifiers::empty(),
    );

    let without_args = MatchNode::patterns(
        vec![MatchPattern::new(
            &[q(LexBlockTypes::UNTERMINATED)],
            vec![CapturePattern::token(TokenTypes::ATTRIB_IDENT)],
            MatchQualifiers::empty(),
        )],
        MatchQualifiers::empty(),
    );

    MatchNode::nodes(
        vec![
            MatchPattern::bare(&[q(LexBlockTypes::OPEN_SQUARE_BRACKETS)]).into(),
            MatchNode::nodes(vec![with_args, without_args], MatchQualifiers::ALTERNATION),
            MatchPattern::bare(&[q(LexBlockTypes::CLOSE_SQUARE_BRACKETS)]).into(),
        ],
        MatchQualifiers::ZERO_OR_MORE,
    )
    .parent(TokenTypes::ATTRIB_IDENT)
}

/// `Type<args…>` template headers, capturing the base type with `cap`.
fn templated_type_pattern(cap: CapturePattern) -> MatchNode {
    MatchNode::patterns(
        vec![
            MatchPattern::new(
                &[q(LexBlockTypes::ANGLE_BRACKETS_PREAMBLE)],
                vec![cap],
                MatchQualifiers::empty(),
            ),
            MatchPattern::bare(&[q(LexBlockTypes::OPEN_ANGLE_BRACKETS)]),
            MatchPattern::new(
                &[
                    q(LexBlockTypes::COMMA_SEPARATOR),
                    q(LexBlockTypes::UNTERMINATED),
                ],
                vec![CapturePattern::token(TokenTypes::LITERAL_ARG)],
                MatchQualifiers::ONE_OR_MORE | MatchQualifiers::ALTERNATION,
            ),
            MatchPattern::bare(&[q(LexBlockTypes::CLOSE_ANGLE_BRACKETS)]),
        ],
        MatchQualifiers::empty(),
    )
    .parent(TokenTypes::TYPE)
}

/// One function parameter, with or without a semantic.
fn param_pattern(cap: CapturePattern) -> MatchNode {
    let without_semantic = MatchNode::patterns(
        vec![MatchPattern::new(
            &[
                q(LexBlockTypes::COMMA_SEPARATOR),
                q(LexBlockTypes::UNTERMINATED),
            ],
            vec![
                cap.clone(),
                CapturePattern::symbol(TokenTypes::PARAM_IDENT, SymbolTypes::PARAMETER),
            ],
            MatchQualifiers::ALTERNATION,
        )],
        MatchQualifiers::empty(),
    );

    let with_semantic = MatchNode::patterns(
        vec![
            MatchPattern::new(
                &[q(LexBlockTypes::COLON_SEPARATOR)],
                vec![
                    cap,
                    CapturePattern::symbol(TokenTypes::PARAM_IDENT, SymbolTypes::PARAMETER),
                ],
                MatchQualifiers::empty(),
            ),
            MatchPattern::new(
                &[
                    q(LexBlockTypes::COMMA_SEPARATOR),
                    q(LexBlockTypes::UNTERMINATED),
                ],
                vec![CapturePattern::token(TokenTypes::SEMANTIC_IDENT)],
                MatchQualifiers::ALTERNATION,
            ),
        ],
        MatchQualifiers::empty(),
    );

    MatchNode::nodes(
        vec![without_semantic, with_semantic],
        MatchQualifiers::ALTERNATION,
    )
}

/// Parameter list body: attributes, then templated or plain parameters, zero
/// or more times.
fn params_pattern() -> MatchNode {
    MatchNode::nodes(
        vec![
            attribute_pattern(),
            MatchNode::nodes(
                vec![
                    MatchNode::nodes(
                        vec![
                            templated_type_pattern(type_cap()),
                            param_pattern(CapturePattern::default()),
                        ],
                        MatchQualifiers::empty(),
                    ),
                    param_pattern(type_cap()),
                ],
                MatchQualifiers::ALTERNATION,
            ),
        ],
        MatchQualifiers::ZERO_OR_MORE,
    )
    .parent(TokenTypes::PARAM_IDENT)
}

/// Optional `: SEMANTIC` between a parameter list and a function body.
fn return_semantic() -> MatchNode {
    MatchNode::patterns(
        vec![
            MatchPattern::bare(&[q(LexBlockTypes::COLON_SEPARATOR)]),
            MatchPattern::new(
                &[q(LexBlockTypes::SCOPE_PREAMBLE)],
                vec![CapturePattern::token(TokenTypes::SEMANTIC_IDENT)],
                MatchQualifiers::empty(),
            ),
        ],
        MatchQualifiers::empty(),
    )
    .quals_or(MatchQualifiers::OPTIONAL)
}

impl MatchNode {
    fn quals_or(mut self, quals: MatchQualifiers) -> Self {
        self.quals |= quals;
        self
    }
}

/// `<keyword> <name> { … }` named scope forms: shader blocks, techniques,
/// passes, structs, cbuffers.
fn named_scope_pattern(
    predicates: Vec<TokenQualifier>,
    ident: TokenTypes,
    symbol: SymbolTypes,
) -> MatchNode {
    MatchNode::nodes(
        vec![
            attribute_pattern(),
            MatchNode::patterns(
                vec![MatchPattern::new(
                    &[q(LexBlockTypes::SCOPE_PREAMBLE)],
                    vec![CapturePattern::full(predicates, ident, symbol)],
                    MatchQualifiers::empty(),
                )],
                MatchQualifiers::empty(),
            )
            .entrypoint(),
        ],
        MatchQualifiers::empty(),
    )
    .parent(ident)
}

/// `<stage-keyword> <name>;` shader reference inside a technique or pass.
fn shader_reference_pattern() -> MatchNode {
    MatchNode::patterns(
        vec![MatchPattern::new(
            &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
            vec![CapturePattern::full(
                vec![TokenQualifier::new(TokenTypes::FX_DECL)],
                TokenTypes::TECHNIQUE_SHADER_IDENT,
                SymbolTypes::TECHNIQUE_SHADER_DECL,
            )],
            MatchQualifiers::empty(),
        )],
        MatchQualifiers::empty(),
    )
    .parent(TokenTypes::TECHNIQUE_SHADER_IDENT)
}

/// Variable declaration forms: plain, with semantic, array, assignment
/// initializer, and the ambiguous call-or-initializer form.
fn var_patterns(cap: CapturePattern) -> MatchNode {
    let plain = MatchNode::nodes(
        vec![
            MatchPattern::new(
                &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
                vec![
                    cap.clone(),
                    CapturePattern::symbol(TokenTypes::VAR_IDENT, SymbolTypes::VARIABLE_DECL),
                ],
                MatchQualifiers::empty(),
            )
            .into(),
            MatchNode::patterns(
                vec![
                    MatchPattern::new(
                        &[q(LexBlockTypes::COLON_SEPARATOR)],
                        vec![
                            cap.clone(),
                            CapturePattern::symbol(
                                TokenTypes::VAR_IDENT,
                                SymbolTypes::VARIABLE_DECL,
                            ),
                        ],
                        MatchQualifiers::empty(),
                    ),
                    MatchPattern::new(
                        &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
                        vec![CapturePattern::token(TokenTypes::SEMANTIC_IDENT)],
                        MatchQualifiers::empty(),
                    ),
                ],
                MatchQualifiers::empty(),
            ),
        ],
        MatchQualifiers::ALTERNATION,
    );

    let array = MatchNode::nodes(
        vec![
            MatchPattern::new(
                &[
                    q(LexBlockTypes::SQUARE_BRACKETS_PREAMBLE),
                    q(LexBlockTypes::OPEN_SQUARE_BRACKETS),
                    BlockQualifier::with(BlockQualifier::WILD, MatchQualifiers::ZERO_OR_MORE),
                    q(LexBlockTypes::CLOSE_SQUARE_BRACKETS),
                ],
                vec![
                    cap.clone(),
                    CapturePattern::symbol(TokenTypes::VAR_IDENT, SymbolTypes::VARIABLE_DECL),
                ],
                MatchQualifiers::empty(),
            )
            .into(),
            MatchNode::nodes(
                vec![
                    MatchNode::patterns(
                        vec![
                            MatchPattern::bare(&[q(LexBlockTypes::COLON_SEPARATOR)]),
                            MatchPattern::new(
                                &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
                                vec![CapturePattern::token(TokenTypes::SEMANTIC_IDENT)],
                                MatchQualifiers::empty(),
                            ),
                        ],
                        MatchQualifiers::empty(),
                    ),
                    MatchPattern::bare(&[q(LexBlockTypes::SEMICOLON_SEPARATOR)]).into(),
                ],
                MatchQualifiers::ALTERNATION,
            ),
        ],
        MatchQualifiers::empty(),
    );

    let assign = MatchNode::patterns(
        vec![MatchPattern::new(
            &[
                q(LexBlockTypes::ASSIGNMENT_SEPARATOR),
                // scalar initializers share the terminating semicolon block
                BlockQualifier::with(BlockQualifier::WILD, MatchQualifiers::ZERO_OR_MORE),
                q(LexBlockTypes::SEMICOLON_SEPARATOR),
            ],
            vec![
                cap.clone(),
                CapturePattern::symbol(TokenTypes::VAR_IDENT, SymbolTypes::VARIABLE_ASSIGN_DEF),
            ],
            MatchQualifiers::empty(),
        )],
        MatchQualifiers::empty(),
    );

    let ambiguous = MatchNode::patterns(
        vec![MatchPattern::new(
            &[
                q(LexBlockTypes::PARENTHESES_PREAMBLE),
                q(LexBlockTypes::OPEN_PARENTHESES),
                BlockQualifier::with(BlockQualifier::WILD, MatchQualifiers::ZERO_OR_MORE),
                q(LexBlockTypes::CLOSE_PARENTHESES),
                q(LexBlockTypes::SEMICOLON_SEPARATOR),
            ],
            vec![
                cap,
                CapturePattern::symbol(TokenTypes::VAR_IDENT, SymbolTypes::AMBIG_FUNC_VAR_DECL),
            ],
            MatchQualifiers::empty(),
        )],
        MatchQualifiers::empty(),
    );

    MatchNode::nodes(
        vec![plain, array, assign, ambiguous],
        MatchQualifiers::ALTERNATION,
    )
}

fn typedef_group() -> MatchNodeGroup {
    let plain = MatchNode::patterns(
        vec![MatchPattern::new(
            &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
            vec![
                CapturePattern::full(
                    vec![
                        TokenQualifier::new(TokenTypes::TYPEDEF_DECL),
                        TokenQualifier::with(
                            TokenTypes::TYPE_MODIFIER,
                            MatchQualifiers::ZERO_OR_MORE,
                        ),
                    ],
                    TokenTypes::TYPE,
                    SymbolTypes::empty(),
                ),
                CapturePattern::symbol(TokenTypes::TYPE_ALIAS, SymbolTypes::TYPEDEF_DECL),
            ],
            MatchQualifiers::empty(),
        )],
        MatchQualifiers::empty(),
    )
    .parent(TokenTypes::TYPE_ALIAS);

    let templated = MatchNode::nodes(
        vec![
            templated_type_pattern(CapturePattern::full(
                vec![
                    TokenQualifier::new(TokenTypes::TYPEDEF_DECL),
                    TokenQualifier::with(TokenTypes::TYPE_MODIFIER, MatchQualifiers::ZERO_OR_MORE),
                ],
                TokenTypes::TYPE,
                SymbolTypes::empty(),
            )),
            MatchNode::patterns(
                vec![MatchPattern::new(
                    &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
                    vec![CapturePattern::symbol(
                        TokenTypes::TYPE_ALIAS,
                        SymbolTypes::TYPEDEF_DECL,
                    )],
                    MatchQualifiers::empty(),
                )],
                MatchQualifiers::empty(),
            ),
        ],
        MatchQualifiers::empty(),
    )
    .parent(TokenTypes::TYPE_ALIAS);

    MatchNodeGroup {
        leading: vec![TokenTypes::TYPEDEF_DECL],
        roots: vec![plain, templated],
    }
}

fn shader_block_group(keyword: TokenTypes, def: SymbolTypes) -> MatchNodeGroup {
    MatchNodeGroup {
        leading: vec![keyword],
        roots: vec![
            named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::FX_DECL)],
                TokenTypes::SHADER_IDENT,
                def,
            ),
            shader_reference_pattern(),
        ],
    }
}

fn function_or_variable_group() -> MatchNodeGroup {
    let variable = MatchNode::nodes(
        vec![
            attribute_pattern(),
            MatchNode::nodes(
                vec![
                    MatchNode::nodes(
                        vec![
                            templated_type_pattern(type_cap()),
                            var_patterns(CapturePattern::default()),
                        ],
                        MatchQualifiers::empty(),
                    ),
                    var_patterns(type_cap()),
                ],
                MatchQualifiers::ALTERNATION,
            )
            .entrypoint(),
        ],
        MatchQualifiers::empty(),
    )
    .parent(TokenTypes::VAR_IDENT);

    let func_ident = MatchNode::nodes(
        vec![
            MatchNode::patterns(
                vec![MatchPattern::new(
                    &[q(LexBlockTypes::PARENTHESES_PREAMBLE)],
                    vec![
                        type_cap(),
                        CapturePattern::symbol(
                            TokenTypes::FUNC_IDENT,
                            SymbolTypes::FUNC_DEFINITION,
                        ),
                    ],
                    MatchQualifiers::empty(),
                )],
                MatchQualifiers::empty(),
            ),
            MatchNode::nodes(
                vec![
                    templated_type_pattern(type_cap()),
                    MatchNode::patterns(
                        vec![MatchPattern::new(
                            &[q(LexBlockTypes::PARENTHESES_PREAMBLE)],
                            vec![CapturePattern::symbol(
                                TokenTypes::FUNC_IDENT,
                                SymbolTypes::FUNC_DEFINITION,
                            )],
                            MatchQualifiers::empty(),
                        )],
                        MatchQualifiers::empty(),
                    ),
                ],
                MatchQualifiers::empty(),
            ),
        ],
        MatchQualifiers::ALTERNATION,
    )
    .entrypoint();

    let function = MatchNode::nodes(
        vec![
            MatchNode::nodes(
                vec![
                    attribute_pattern(),
                    func_ident,
                    MatchPattern::bare(&[q(LexBlockTypes::OPEN_PARENTHESES)]).into(),
                    params_pattern(),
                    MatchPattern::bare(&[q(LexBlockTypes::CLOSE_PARENTHESES)]).into(),
                    return_semantic(),
                ],
                MatchQualifiers::empty(),
            )
            .parent(TokenTypes::FUNC_IDENT),
            MatchPattern::bare(&[q(LexBlockTypes::START_SCOPE)]).into(),
        ],
        MatchQualifiers::empty(),
    );

    MatchNodeGroup {
        leading: vec![TokenTypes::TYPE, TokenTypes::TYPE_MODIFIER],
        roots: vec![variable, function],
    }
}

static MATCH_GROUPS: Lazy<Vec<MatchNodeGroup>> = Lazy::new(|| {
    vec![
        typedef_group(),
        MatchNodeGroup {
            leading: vec![TokenTypes::STRUCT_DECL],
            roots: vec![named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::STRUCT_DECL)],
                TokenTypes::STRUCT_IDENT,
                SymbolTypes::STRUCT_DEF,
            )],
        },
        MatchNodeGroup {
            leading: vec![TokenTypes::CONST_BUF_DECL],
            roots: vec![named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::CONST_BUF_DECL)],
                TokenTypes::CONST_BUF_IDENT,
                SymbolTypes::CONST_BUF_DEF,
            )],
        },
        shader_block_group(
            TokenTypes::VERTEX_SHADER_DECL,
            SymbolTypes::VERTEX_SHADER_DEF,
        ),
        shader_block_group(TokenTypes::HULL_SHADER_DECL, SymbolTypes::HULL_SHADER_DEF),
        shader_block_group(
            TokenTypes::DOMAIN_SHADER_DECL,
            SymbolTypes::DOMAIN_SHADER_DEF,
        ),
        shader_block_group(
            TokenTypes::GEOMETRY_SHADER_DECL,
            SymbolTypes::GEOMETRY_SHADER_DEF,
        ),
        shader_block_group(TokenTypes::PIXEL_SHADER_DECL, SymbolTypes::PIXEL_SHADER_DEF),
        shader_block_group(
            TokenTypes::COMPUTE_SHADER_DECL,
            SymbolTypes::COMPUTE_SHADER_DEF,
        ),
        MatchNodeGroup {
            leading: vec![TokenTypes::TECHNIQUE_DECL],
            roots: vec![named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::FX_DECL)],
                TokenTypes::TECHNIQUE_IDENT,
                SymbolTypes::TECHNIQUE_DEF,
            )],
        },
        MatchNodeGroup {
            leading: vec![TokenTypes::PASS_DECL],
            roots: vec![named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::FX_DECL)],
                TokenTypes::PASS_IDENT,
                SymbolTypes::TECHNIQUE_PASS_DECL,
            )],
        },
        MatchNodeGroup {
            leading: vec![TokenTypes::FX_DECL],
            roots: vec![named_scope_pattern(
                vec![TokenQualifier::new(TokenTypes::FX_DECL)],
                TokenTypes::FX_IDENT,
                SymbolTypes::FX_DEFINITION,
            )],
        },
        function_or_variable_group(),
    ]
});

/// The static catalogue of recognized declaration forms.
pub fn match_groups() -> &'static [MatchNodeGroup] {
    &MATCH_GROUPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_builds() {
        let groups = match_groups();
        assert!(groups.len() >= 12);
    }

    #[test]
    fn leading_flags_select_groups() {
        let groups = match_groups();

        let technique = groups
            .iter()
            .position(|g| g.matches_leading(TokenTypes::TECHNIQUE_DECL))
            .unwrap();
        let generic = groups
            .iter()
            .position(|g| {
                g.leading == vec![TokenTypes::FX_DECL]
            })
            .unwrap();
        // specific groups come before the generic effect-block group
        assert!(technique < generic);

        assert!(groups
            .iter()
            .any(|g| g.matches_leading(TokenTypes::INTRINSIC_TYPE)));
        assert!(!groups[0].matches_leading(TokenTypes::VAR_IDENT));
    }

    #[test]
    fn backward_prefixes_are_reversed() {
        // named scope patterns put the attribute node before the entrypoint;
        // presorting must flip it to backward
        let node = named_scope_pattern(
            vec![TokenQualifier::new(TokenTypes::FX_DECL)],
            TokenTypes::TECHNIQUE_IDENT,
            SymbolTypes::TECHNIQUE_DEF,
        );
        let MatchNodeKind::Nodes(children) = &node.kind else {
            panic!("expected node list");
        };
        assert!(!children[0].is_forward, "attribute prefix must be reversed");
        assert!(children.iter().any(|c| c.is_entrypoint && c.is_forward));
    }

    #[test]
    fn invalid_captures_are_filtered() {
        let pattern = MatchPattern::new(
            &[q(LexBlockTypes::SEMICOLON_SEPARATOR)],
            vec![
                CapturePattern::default(),
                CapturePattern::token(TokenTypes::VAR_IDENT),
            ],
            MatchQualifiers::empty(),
        );
        assert_eq!(pattern.captures.len(), 1);
    }
}
