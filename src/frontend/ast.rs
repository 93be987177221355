#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn at(line: usize, column: usize) -> Self {
        Self {
            start: 0,
            end: 0,
            line,
            column,
        }
    }
}

pub type ExprId = usize;

pub const DEFAULT_MODULE_NAME: &str = "objc3_module";

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub module_name: String,
    pub modules: Vec<ModuleDecl>,
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<FunctionDecl>,
    pub interfaces: Vec<InterfaceDecl>,
    pub implementations: Vec<ImplementationDecl>,
    pub protocols: Vec<ProtocolDecl>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            module_name: DEFAULT_MODULE_NAME.to_string(),
            modules: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            interfaces: Vec::new(),
            implementations: Vec::new(),
            protocols: Vec::new(),
        }
    }
}

impl Program {
    /// Every method body in declaration order, paired with its owner.
    pub fn method_bodies(&self) -> impl Iterator<Item = (&ImplementationDecl, &MethodDecl, &Block)> {
        self.implementations.iter().flat_map(|imp| {
            imp.methods
                .iter()
                .filter_map(move |m| m.body.as_ref().map(|body| (imp, m, body)))
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDecl {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalDecl {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeAnnotation,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeAnnotation,
    pub is_pure: bool,
    pub is_extern: bool,
    pub is_async: bool,
    pub is_throws: bool,
    pub body: Option<Block>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn is_prototype(&self) -> bool {
        self.body.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    I32,
    Bool,
    Void,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::Bool => "bool",
            ValueType::Void => "void",
        }
    }

    pub fn llvm(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::Bool => "i1",
            ValueType::Void => "void",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeBase {
    I32,
    Bool,
    ObjcBool,
    NSInteger,
    NSUInteger,
    Void,
    Id,
    Class,
    Sel,
    Protocol,
    Instancetype,
    Named(String),
}

impl TypeBase {
    pub fn spelling(&self) -> &str {
        match self {
            TypeBase::I32 => "i32",
            TypeBase::Bool => "bool",
            TypeBase::ObjcBool => "BOOL",
            TypeBase::NSInteger => "NSInteger",
            TypeBase::NSUInteger => "NSUInteger",
            TypeBase::Void => "void",
            TypeBase::Id => "id",
            TypeBase::Class => "Class",
            TypeBase::Sel => "SEL",
            TypeBase::Protocol => "Protocol",
            TypeBase::Instancetype => "instancetype",
            TypeBase::Named(name) => name,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            TypeBase::Bool | TypeBase::ObjcBool => ValueType::Bool,
            TypeBase::Void => ValueType::Void,
            _ => ValueType::I32,
        }
    }

    /// `id`, `Class` and `instancetype` accept suffixes without a pointer declarator.
    pub fn is_dynamic_object(&self) -> bool {
        matches!(self, TypeBase::Id | TypeBase::Class | TypeBase::Instancetype)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenericSuffix {
    pub text: String,
    pub terminated: bool,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nullability {
    Nullable,
    Nonnull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipKind {
    Strong,
    Weak,
    UnsafeUnretained,
    Autoreleasing,
}

impl OwnershipKind {
    pub const SPELLINGS: [&'static str; 4] = [
        "__strong",
        "__weak",
        "__unsafe_unretained",
        "__autoreleasing",
    ];

    pub fn from_spelling(spelling: &str) -> Option<Self> {
        match spelling {
            "__strong" => Some(OwnershipKind::Strong),
            "__weak" => Some(OwnershipKind::Weak),
            "__unsafe_unretained" => Some(OwnershipKind::UnsafeUnretained),
            "__autoreleasing" => Some(OwnershipKind::Autoreleasing),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OwnershipQualifier {
    pub spelling: String,
    pub kind: Option<OwnershipKind>,
    pub span: Span,
}

/// Classification computed once by the parser; sema turns `false` flags into diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeShape {
    pub is_object_type: bool,
    pub protocol_composition: bool,
    pub lightweight_generic: bool,
    pub generic_well_formed: bool,
    pub pointer_well_formed: bool,
    pub nullability_well_formed: bool,
    pub ownership_well_formed: bool,
    pub multi_level_pointer: bool,
    pub ns_error_out_parameter: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAnnotation {
    pub base: TypeBase,
    pub implicit: bool,
    pub generic: Option<GenericSuffix>,
    pub pointer_depth: usize,
    pub nullability: Vec<(Nullability, Span)>,
    pub ownership: Option<OwnershipQualifier>,
    pub shape: TypeShape,
    pub span: Span,
}

impl TypeAnnotation {
    pub fn implicit_i32(span: Span) -> Self {
        let mut ty = Self {
            base: TypeBase::I32,
            implicit: true,
            generic: None,
            pointer_depth: 0,
            nullability: Vec::new(),
            ownership: None,
            shape: TypeShape::default(),
            span,
        };
        ty.shape = ty.classify();
        ty
    }

    pub fn value_type(&self) -> ValueType {
        if self.pointer_depth > 0 {
            return ValueType::I32;
        }
        self.base.value_type()
    }

    pub fn has_suffix(&self) -> bool {
        self.generic.is_some() || self.pointer_depth > 0 || !self.nullability.is_empty()
    }

    /// Canonical spelling used by conflict symbols and profiles.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(q) = &self.ownership {
            out.push_str(&q.spelling);
            out.push(' ');
        }
        out.push_str(self.base.spelling());
        if let Some(g) = &self.generic {
            out.push('<');
            out.push_str(&g.text);
            if g.terminated {
                out.push('>');
            }
        }
        for _ in 0..self.pointer_depth {
            out.push('*');
        }
        for (n, _) in &self.nullability {
            out.push(match n {
                Nullability::Nullable => '?',
                Nullability::Nonnull => '!',
            });
        }
        out
    }

    pub fn classify(&self) -> TypeShape {
        let named = matches!(self.base, TypeBase::Named(_));
        let is_object_type =
            self.base.is_dynamic_object() || (named && self.pointer_depth > 0);
        let protocol_composition = self.generic.is_some() && self.base.is_dynamic_object();
        let lightweight_generic = self.generic.is_some() && named;
        let generic_well_formed = match &self.generic {
            None => true,
            Some(g) => g.terminated && is_object_type,
        };
        let ns_error_out_parameter = self.base == TypeBase::Named("NSError".to_string())
            && self.pointer_depth == 2;
        let multi_level_pointer = self.pointer_depth > 1;
        let pointer_well_formed = match self.pointer_depth {
            0 => true,
            1 => named || self.base.is_dynamic_object(),
            _ => ns_error_out_parameter,
        };
        let nullability_well_formed =
            self.nullability.is_empty() || (self.nullability.len() == 1 && is_object_type);
        let ownership_well_formed = match &self.ownership {
            None => true,
            Some(q) => q.kind.is_some() && is_object_type,
        };
        TypeShape {
            is_object_type,
            protocol_composition,
            lightweight_generic,
            generic_well_formed,
            pointer_well_formed,
            nullability_well_formed,
            ownership_well_formed,
            multi_level_pointer,
            ns_error_out_parameter,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MethodKind {
    Instance,
    Class,
}

impl MethodKind {
    pub fn label(self) -> &'static str {
        match self {
            MethodKind::Instance => "instance",
            MethodKind::Class => "class",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MethodFamily {
    Init,
    Copy,
    MutableCopy,
    New,
    #[default]
    None,
}

impl MethodFamily {
    pub fn label(self) -> &'static str {
        match self {
            MethodFamily::Init => "init",
            MethodFamily::Copy => "copy",
            MethodFamily::MutableCopy => "mutableCopy",
            MethodFamily::New => "new",
            MethodFamily::None => "none",
        }
    }

    pub fn returns_retained(self) -> bool {
        !matches!(self, MethodFamily::None)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectorPiece {
    pub keyword: String,
    pub param: Option<Param>,
    pub span: Span,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodSymbols {
    pub selector: String,
    pub lookup_symbol: String,
    pub override_symbol: String,
    pub conflict_symbol: String,
    pub ir_symbol: String,
    pub family: MethodFamily,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDecl {
    pub kind: MethodKind,
    pub return_type: TypeAnnotation,
    pub pieces: Vec<SelectorPiece>,
    pub body: Option<Block>,
    pub symbols: MethodSymbols,
    pub span: Span,
}

impl MethodDecl {
    pub fn params(&self) -> impl Iterator<Item = &Param> {
        self.pieces.iter().filter_map(|p| p.param.as_ref())
    }

    pub fn param_count(&self) -> usize {
        self.params().count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyAttribute {
    pub name: String,
    pub value: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertySymbols {
    pub synthesis_symbol: String,
    pub default_ivar: String,
    pub getter: String,
    pub setter: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: TypeAnnotation,
    pub attributes: Vec<PropertyAttribute>,
    pub symbols: PropertySymbols,
    pub span: Span,
}

impl PropertyDecl {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamedRef {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceDecl {
    pub name: String,
    pub super_name: Option<NamedRef>,
    pub category: Option<String>,
    pub protocols: Vec<NamedRef>,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<MethodDecl>,
    pub member_symbols: Vec<String>,
    pub span: Span,
}

impl InterfaceDecl {
    pub fn is_category(&self) -> bool {
        self.category.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SynthesizeEntry {
    pub property: String,
    pub ivar: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImplementationDecl {
    pub name: String,
    pub category: Option<String>,
    pub methods: Vec<MethodDecl>,
    pub synthesizes: Vec<SynthesizeEntry>,
    pub dynamics: Vec<NamedRef>,
    pub member_symbols: Vec<String>,
    pub span: Span,
}

impl ImplementationDecl {
    pub fn is_category(&self) -> bool {
        self.category.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolDecl {
    pub name: String,
    pub inherited: Vec<NamedRef>,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<MethodDecl>,
    pub member_symbols: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AssignOp {
    Set,
    Compound(BinaryOp),
    Increment,
    Decrement,
}

impl AssignOp {
    pub fn spelling(&self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Compound(op) => op.compound_spelling(),
            AssignOp::Increment => "++",
            AssignOp::Decrement => "--",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub op: AssignOp,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ForClause {
    None,
    Let { name: String, value: Expr, span: Span },
    Assign(Assignment),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub label: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        span: Span,
    },
    Assign(Assignment),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Expr {
        expr: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_body: Block,
        else_body: Option<Block>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    DoWhile {
        body: Block,
        cond: Expr,
        span: Span,
    },
    For {
        init: ForClause,
        cond: Option<Expr>,
        step: ForClause,
        body: Block,
        span: Span,
    },
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Empty {
        span: Span,
    },
    Block(Block),
    AutoreleasePool {
        body: Block,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::DoWhile { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Empty { span }
            | Stmt::AutoreleasePool { span, .. } => span,
            Stmt::Assign(a) => &a.span,
            Stmt::Block(b) => &b.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Number(i32),
    Bool(bool),
    Nil,
    Ident(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    MessageSend(Box<MessageSend>),
    BlockLiteral(Box<BlockLiteral>),
    Await(Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorForm {
    Unary,
    Keyword,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverKind {
    NilLiteral,
    Super,
    SelfRef,
    Identifier,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSlots {
    pub receiver: usize,
    pub selector: usize,
    pub argument_values: usize,
    pub argument_padding: usize,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageSend {
    pub receiver: Expr,
    pub keywords: Vec<String>,
    pub args: Vec<Expr>,
    pub form: SelectorForm,
    pub selector: String,
    pub receiver_kind: ReceiverKind,
    pub family: MethodFamily,
    pub slots: DispatchSlots,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockLiteral {
    pub params: Vec<Param>,
    pub body: Block,
    pub captures: Vec<String>,
    pub mutable_captures: Vec<String>,
    pub body_statement_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// LLVM opcode for arithmetic/bitwise ops; comparisons map to their `icmp` predicate.
    pub fn opcode(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "sdiv",
            BinaryOp::Rem => "srem",
            BinaryOp::BitAnd => "and",
            BinaryOp::BitOr => "or",
            BinaryOp::BitXor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "ashr",
            BinaryOp::Eq => "eq",
            BinaryOp::NotEq => "ne",
            BinaryOp::Lt => "slt",
            BinaryOp::Lte => "sle",
            BinaryOp::Gt => "sgt",
            BinaryOp::Gte => "sge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn spelling(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    pub fn compound_spelling(self) -> &'static str {
        match self {
            BinaryOp::Add => "+=",
            BinaryOp::Sub => "-=",
            BinaryOp::Mul => "*=",
            BinaryOp::Div => "/=",
            BinaryOp::Rem => "%=",
            BinaryOp::BitAnd => "&=",
            BinaryOp::BitOr => "|=",
            BinaryOp::BitXor => "^=",
            BinaryOp::Shl => "<<=",
            BinaryOp::Shr => ">>=",
            _ => "=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryOp, Nullability, Span, TypeAnnotation, TypeBase};

    fn annotation(base: TypeBase, pointer_depth: usize) -> TypeAnnotation {
        let mut ty = TypeAnnotation::implicit_i32(Span::at(1, 1));
        ty.implicit = false;
        ty.base = base;
        ty.pointer_depth = pointer_depth;
        ty.shape = ty.classify();
        ty
    }

    #[test]
    fn compound_opcodes_share_the_binary_table() {
        assert_eq!(BinaryOp::Shr.opcode(), "ashr");
        assert_eq!(BinaryOp::Rem.opcode(), "srem");
        assert_eq!(BinaryOp::Shl.compound_spelling(), "<<=");
    }

    #[test]
    fn named_pointer_is_object_type() {
        let ty = annotation(TypeBase::Named("NSString".to_string()), 1);
        assert!(ty.shape.is_object_type);
        assert!(ty.shape.pointer_well_formed);
        let bare = annotation(TypeBase::I32, 1);
        assert!(!bare.shape.pointer_well_formed);
    }

    #[test]
    fn ns_error_double_pointer_is_out_parameter() {
        let ty = annotation(TypeBase::Named("NSError".to_string()), 2);
        assert!(ty.shape.ns_error_out_parameter);
        assert!(ty.shape.pointer_well_formed);
        let other = annotation(TypeBase::Named("NSString".to_string()), 2);
        assert!(!other.shape.pointer_well_formed);
    }

    #[test]
    fn nullability_requires_object_type() {
        let mut ty = annotation(TypeBase::I32, 0);
        ty.nullability.push((Nullability::Nullable, Span::at(1, 4)));
        assert!(!ty.classify().nullability_well_formed);
        let mut obj = annotation(TypeBase::Id, 0);
        obj.nullability.push((Nullability::Nonnull, Span::at(1, 3)));
        assert!(obj.classify().nullability_well_formed);
        assert_eq!(obj.canonical(), "id!");
    }
}
