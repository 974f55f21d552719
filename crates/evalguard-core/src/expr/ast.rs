//! Expression syntax tree.

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::In => "in",
        }
    }
}

/// Collection operators applied with `.?[`, `.![`, `.^[` and `.$[`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOp {
    Select,
    Project,
    First,
    Last,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A bare identifier; resolves to a binding (or a member of `#this`).
    Binding(String),
    /// `#this`, the current element inside a collection operator.
    This,
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Member {
        target: Box<Expr>,
        name: String,
        safe: bool,
    },
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        safe: bool,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Elvis {
        value: Box<Expr>,
        fallback: Box<Expr>,
    },
    Collection {
        op: CollectionOp,
        target: Box<Expr>,
        body: Box<Expr>,
    },
}

impl Expr {
    /// Height of the tree; a single literal has depth 1.
    pub fn depth(&self) -> usize {
        let children = match self {
            Expr::Literal(_) | Expr::Binding(_) | Expr::This => 0,
            Expr::List(items) => items.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.depth().max(v.depth()))
                .max()
                .unwrap_or(0),
            Expr::Member { target, .. } => target.depth(),
            Expr::Call { target, args, .. } => args
                .iter()
                .map(Expr::depth)
                .max()
                .unwrap_or(0)
                .max(target.depth()),
            Expr::Index { target, index } => target.depth().max(index.depth()),
            Expr::Unary { operand, .. } => operand.depth(),
            Expr::Binary { left, right, .. } => left.depth().max(right.depth()),
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => condition.depth().max(then.depth()).max(otherwise.depth()),
            Expr::Elvis { value, fallback } => value.depth().max(fallback.depth()),
            Expr::Collection { target, body, .. } => target.depth().max(body.depth()),
        };
        children + 1
    }
}
