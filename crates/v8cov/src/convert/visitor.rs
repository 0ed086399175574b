//! AST walk collecting instrumentable constructs.

use super::SourceSyntax;
use crate::istanbul::BranchType;
use swc_core::common::{BytePos, Span, Spanned};
use swc_core::ecma::ast::{
    ArrowExpr, BinExpr, BinaryOp, BlockStmtOrExpr, ClassMethod, CondExpr, Constructor, Decl,
    EsVersion, ExportDecl, ExportDefaultExpr, Expr, FnDecl, FnExpr, Function, IfStmt, MethodProp, Pat, Program,
    PropName, Stmt, SwitchStmt, VarDeclarator,
};
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use swc_core::ecma::visit::{Visit, VisitWith};

/// Span positions start here; `BytePos(0)` is reserved for dummy spans
const BASE: u32 = 1;

/// Half-open byte range into the parsed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteSpan {
    pub lo: usize,
    pub hi: usize,
}

impl ByteSpan {
    fn from_span(span: Span) -> Self {
        Self {
            lo: span.lo.0.saturating_sub(BASE) as usize,
            hi: span.hi.0.saturating_sub(BASE) as usize,
        }
    }

    fn between(lo: Span, hi: Span) -> Self {
        Self {
            lo: Self::from_span(lo).lo,
            hi: Self::from_span(hi).lo,
        }
    }
}

/// One alternative of a branch point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    /// Alternative with its own code
    Explicit(ByteSpan),
    /// Fall-through of an `if` without `else`
    Implicit,
}

/// An instrumentable construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    Statement(ByteSpan),
    Function {
        name: Option<String>,
        decl: ByteSpan,
        span: ByteSpan,
    },
    Branch {
        kind: BranchType,
        span: ByteSpan,
        arms: Vec<Arm>,
    },
}

fn swc_syntax(syntax: SourceSyntax) -> Syntax {
    match syntax {
        SourceSyntax::JavaScript => Syntax::Es(EsSyntax {
            jsx: true,
            ..Default::default()
        }),
        SourceSyntax::TypeScript => Syntax::Typescript(TsSyntax::default()),
        SourceSyntax::Tsx => Syntax::Typescript(TsSyntax {
            tsx: true,
            ..Default::default()
        }),
    }
}

/// Parse `code` as a script or module
pub fn parse(code: &str, syntax: SourceSyntax) -> Result<Program, String> {
    let end = BytePos(BASE + code.len() as u32);
    let input = StringInput::new(code, BytePos(BASE), end);
    let lexer = Lexer::new(swc_syntax(syntax), EsVersion::latest(), input, None);
    let mut parser = Parser::new_from(lexer);
    parser.parse_program().map_err(|e| {
        format!(
            "{} at byte {}",
            e.kind().msg(),
            e.span().lo.0.saturating_sub(BASE)
        )
    })
}

/// Constructs of a parsed program in source order
pub fn collect(program: &Program) -> Vec<Construct> {
    let mut collector = Collector::default();
    program.visit_with(&mut collector);
    collector.constructs
}

#[derive(Default)]
struct Collector {
    constructs: Vec<Construct>,
    /// Binding name for the next anonymous function expression
    name_hint: Option<String>,
}

impl Collector {
    fn function(&mut self, name: Option<String>, decl: ByteSpan, span: Span) {
        self.constructs.push(Construct::Function {
            name,
            decl,
            span: ByteSpan::from_span(span),
        });
    }

    fn anonymous_decl(function: &Function) -> ByteSpan {
        match &function.body {
            Some(body) => ByteSpan::between(function.span, body.span),
            None => ByteSpan::from_span(function.span),
        }
    }

    fn branch(&mut self, kind: BranchType, span: Span, arms: Vec<Arm>) {
        self.constructs.push(Construct::Branch {
            kind,
            span: ByteSpan::from_span(span),
            arms,
        });
    }
}

fn prop_name(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(ident) => Some(ident.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        _ => None,
    }
}

fn is_logical(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullishCoalescing
    )
}

/// Operands of a `&&`/`||`/`??` chain, looking through parentheses
fn logical_leaves(root: &BinExpr) -> Vec<&Expr> {
    let mut leaves = Vec::new();
    let mut pending: Vec<&Expr> = vec![&*root.right, &*root.left];
    while let Some(expr) = pending.pop() {
        match expr {
            Expr::Bin(bin) if is_logical(bin.op) => {
                pending.push(&*bin.right);
                pending.push(&*bin.left);
            }
            Expr::Paren(paren) if matches!(&*paren.expr, Expr::Bin(b) if is_logical(b.op)) => {
                pending.push(&*paren.expr);
            }
            _ => leaves.push(expr),
        }
    }
    leaves
}

/// Upper bound on how deeply `code` nests: open brackets plus the longest
/// run of prefix operators at that point. Brackets inside strings and
/// comments are counted too.
pub fn nesting_estimate(code: &str) -> usize {
    let mut depth = 0usize;
    let mut prefix_run = 0usize;
    let mut deepest = 0usize;
    for byte in code.bytes() {
        match byte {
            b'(' | b'[' | b'{' => {
                depth += 1;
                prefix_run = 0;
            }
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                prefix_run = 0;
            }
            b'!' | b'~' | b'-' | b'+' => prefix_run += 1,
            b' ' | b'\t' | b'\r' | b'\n' => {}
            _ => prefix_run = 0,
        }
        deepest = deepest.max(depth + prefix_run);
    }
    deepest
}

impl Visit for Collector {
    fn visit_stmt(&mut self, n: &Stmt) {
        let counted = !matches!(
            n,
            Stmt::Block(_)
                | Stmt::Empty(_)
                | Stmt::Decl(
                    Decl::Fn(_) | Decl::TsInterface(_) | Decl::TsTypeAlias(_) | Decl::TsModule(_)
                )
        );
        if counted {
            self.constructs
                .push(Construct::Statement(ByteSpan::from_span(n.span())));
        }
        n.visit_children_with(self);
    }

    fn visit_export_decl(&mut self, n: &ExportDecl) {
        if matches!(n.decl, Decl::Var(_) | Decl::Class(_)) {
            self.constructs
                .push(Construct::Statement(ByteSpan::from_span(n.decl.span())));
        }
        n.visit_children_with(self);
    }

    fn visit_export_default_expr(&mut self, n: &ExportDefaultExpr) {
        self.constructs
            .push(Construct::Statement(ByteSpan::from_span(n.expr.span())));
        n.visit_children_with(self);
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        self.name_hint = None;
        self.function(
            Some(n.ident.sym.to_string()),
            ByteSpan::from_span(n.ident.span),
            n.function.span,
        );
        n.function.visit_with(self);
    }

    fn visit_fn_expr(&mut self, n: &FnExpr) {
        let hint = self.name_hint.take();
        let (name, decl) = match &n.ident {
            Some(ident) => (Some(ident.sym.to_string()), ByteSpan::from_span(ident.span)),
            None => (hint, Self::anonymous_decl(&n.function)),
        };
        self.function(name, decl, n.function.span);
        n.function.visit_with(self);
    }

    fn visit_arrow_expr(&mut self, n: &ArrowExpr) {
        let name = self.name_hint.take();
        let decl = ByteSpan::between(n.span, n.body.span());
        self.function(name, decl, n.span);
        if let BlockStmtOrExpr::Expr(body) = &*n.body {
            self.constructs
                .push(Construct::Statement(ByteSpan::from_span(body.span())));
        }
        n.visit_children_with(self);
    }

    fn visit_class_method(&mut self, n: &ClassMethod) {
        self.name_hint = None;
        let decl = ByteSpan::from_span(n.key.span());
        self.function(prop_name(&n.key), decl, n.span);
        n.function.visit_with(self);
    }

    fn visit_method_prop(&mut self, n: &MethodProp) {
        self.name_hint = None;
        let decl = ByteSpan::from_span(n.key.span());
        self.function(prop_name(&n.key), decl, n.function.span);
        n.function.visit_with(self);
    }

    fn visit_constructor(&mut self, n: &Constructor) {
        self.name_hint = None;
        self.function(
            Some("constructor".to_string()),
            ByteSpan::from_span(n.key.span()),
            n.span,
        );
        n.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, n: &VarDeclarator) {
        let named_fn = matches!(
            n.init.as_deref(),
            Some(Expr::Arrow(_)) | Some(Expr::Fn(FnExpr { ident: None, .. }))
        );
        self.name_hint = match (&n.name, named_fn) {
            (Pat::Ident(binding), true) => Some(binding.id.sym.to_string()),
            _ => None,
        };
        n.visit_children_with(self);
        self.name_hint = None;
    }

    fn visit_if_stmt(&mut self, n: &IfStmt) {
        let alternate = match &n.alt {
            Some(alt) => Arm::Explicit(ByteSpan::from_span(alt.span())),
            None => Arm::Implicit,
        };
        self.branch(
            BranchType::If,
            n.span,
            vec![Arm::Explicit(ByteSpan::from_span(n.cons.span())), alternate],
        );
        n.visit_children_with(self);
    }

    fn visit_cond_expr(&mut self, n: &CondExpr) {
        self.branch(
            BranchType::CondExpr,
            n.span,
            vec![
                Arm::Explicit(ByteSpan::from_span(n.cons.span())),
                Arm::Explicit(ByteSpan::from_span(n.alt.span())),
            ],
        );
        n.visit_children_with(self);
    }

    fn visit_bin_expr(&mut self, n: &BinExpr) {
        if !is_logical(n.op) {
            n.visit_children_with(self);
            return;
        }
        let leaves = logical_leaves(n);
        let arms = leaves
            .iter()
            .map(|leaf| Arm::Explicit(ByteSpan::from_span(leaf.span())))
            .collect();
        self.branch(BranchType::BinaryExpr, n.span, arms);
        for leaf in leaves {
            leaf.visit_with(self);
        }
    }

    fn visit_switch_stmt(&mut self, n: &SwitchStmt) {
        let arms = n
            .cases
            .iter()
            .map(|case| Arm::Explicit(ByteSpan::from_span(case.span)))
            .collect();
        self.branch(BranchType::Switch, n.span, arms);
        n.visit_children_with(self);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn constructs(code: &str) -> Vec<Construct> {
        collect(&parse(code, SourceSyntax::JavaScript).unwrap())
    }

    fn statements(code: &str) -> Vec<&str> {
        let list = constructs(code);
        list.iter()
            .filter_map(|c| match c {
                Construct::Statement(span) => Some(code[span.lo..span.hi].trim_end_matches(';')),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_statements_skip_blocks_and_function_declarations() {
        let code = "function f() { return 1; }\nconst a = f();\n{ a; }";
        assert_eq!(statements(code), vec!["return 1", "const a = f()", "a"]);
    }

    #[test]
    fn test_function_names() {
        let code = "function named() {}\nconst arrow = () => 1;\nconst anon = function () {};\nconst o = { m() {} };\nclass C { constructor() {} run() {} }\n[1].map(x => x);";
        let names: Vec<_> = constructs(code)
            .into_iter()
            .filter_map(|c| match c {
                Construct::Function { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                Some("named".to_string()),
                Some("arrow".to_string()),
                Some("anon".to_string()),
                Some("m".to_string()),
                Some("constructor".to_string()),
                Some("run".to_string()),
                None,
            ]
        );
    }

    #[test]
    fn test_expression_arrow_body_is_a_statement() {
        let code = "const f = () => g();";
        assert_eq!(statements(code), vec!["const f = () => g()", "g()"]);
    }

    #[test]
    fn test_export_default_expression_is_a_statement() {
        let code = "const a = 1;\nexport default a + 1;";
        assert_eq!(statements(code), vec!["const a = 1", "a + 1"]);
    }

    #[test]
    fn test_long_logical_chain_keeps_leaf_order() {
        let code = format!("x = {}z;", "a || ".repeat(3000));
        let list = constructs(&code);
        let arms = list.iter().find_map(|c| match c {
            Construct::Branch { arms, .. } => Some(arms.clone()),
            _ => None,
        });
        let arms = arms.unwrap();
        assert_eq!(arms.len(), 3001);
        let Arm::Explicit(last) = arms[3000] else {
            panic!("expected an explicit arm");
        };
        assert_eq!(&code[last.lo..last.hi], "z");
    }

    #[test]
    fn test_nesting_estimate() {
        assert_eq!(nesting_estimate("a(); b[c];"), 1);
        assert_eq!(nesting_estimate("f(g(h({})))"), 4);
        assert_eq!(nesting_estimate("x = !!!- -y;"), 5);
        assert_eq!(nesting_estimate(&"(".repeat(50)), 50);
        assert_eq!(nesting_estimate(") ) ) (x)"), 1);
    }

    #[test]
    fn test_if_without_else_has_implicit_arm() {
        let list = constructs("if (a) { b(); }");
        let arms = list.iter().find_map(|c| match c {
            Construct::Branch { kind: BranchType::If, arms, .. } => Some(arms.clone()),
            _ => None,
        });
        let arms = arms.unwrap();
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[1], Arm::Implicit);
    }

    #[test]
    fn test_logical_chain_is_flattened() {
        let code = "x = a && (b || c) || d;";
        let list = constructs(code);
        let branches: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Construct::Branch { kind, arms, .. } => Some((*kind, arms.len())),
                _ => None,
            })
            .collect();
        assert_eq!(branches, vec![(BranchType::BinaryExpr, 4)]);
    }

    #[test]
    fn test_parenthesized_nullish_chain() {
        let code = "x = (a && b) ?? c;";
        let list = constructs(code);
        let arms = list.iter().find_map(|c| match c {
            Construct::Branch { arms, .. } => Some(arms.len()),
            _ => None,
        });
        assert_eq!(arms, Some(3));
    }

    #[test]
    fn test_ternary_and_switch() {
        let code = "y = a ? 1 : 2;\nswitch (y) { case 1: f(); break; default: g(); }";
        let kinds: Vec<_> = constructs(code)
            .into_iter()
            .filter_map(|c| match c {
                Construct::Branch { kind, arms, .. } => Some((kind, arms.len())),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![(BranchType::CondExpr, 2), (BranchType::Switch, 2)]);
    }

    #[test]
    fn test_typescript_and_jsx() {
        let ts = "interface P { a: number }\nexport const f = (p: P): number => p.a;";
        let program = parse(ts, SourceSyntax::TypeScript).unwrap();
        let list = collect(&program);
        assert!(list
            .iter()
            .any(|c| matches!(c, Construct::Function { name: Some(n), .. } if n == "f")));
        assert!(list.iter().any(|c| matches!(c, Construct::Statement(_))));

        let tsx = "export default function App() { return <div>{ok ? 1 : 2}</div>; }";
        assert!(parse(tsx, SourceSyntax::Tsx).is_ok());
        assert!(parse("const a = <b/>;", SourceSyntax::JavaScript).is_ok());
    }

    #[test]
    fn test_parse_error_message() {
        let err = parse("function (", SourceSyntax::JavaScript).unwrap_err();
        assert!(err.contains("at byte"));
    }
}
