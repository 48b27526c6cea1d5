use indoc::indoc;
use pretty_assertions::assert_eq;

use crate::parser::{
    CompileErrorKind, Expr, ExprKind, Item, MemoryLoader, ParsedUnit, StmtKind, TypeName, parse,
    parse_with_max_depth,
};

fn unit(source: &str) -> ParsedUnit {
    parse(source, &mut MemoryLoader::new())
        .unwrap_or_else(|e| panic!("Parsing failed: {}\n{}", source, e))
}

fn error(source: &str) -> CompileErrorKind {
    parse(source, &mut MemoryLoader::new()).unwrap_err().kind
}

// Parses `void f() { <expr>; }` and renders the expression fully
// parenthesized, so that precedence can be compared without spans.
fn shape(expr_source: &str) -> String {
    let source = format!("void f() {{ {}; }}", expr_source);
    let parsed = unit(&source);
    let Item::Function(function) = &parsed.script.items[0] else {
        panic!("expected a function");
    };
    let body = function.body.as_ref().unwrap();
    let StmtKind::Expr(expr) = &body.stmts[0].kind else {
        panic!("expected an expression statement");
    };
    render(expr)
}

fn render(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Int(v) => v.to_string(),
        ExprKind::Float(v) => format!("{:?}", v),
        ExprKind::Str(s) => format!("{:?}", s),
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Vector(parts) => format!(
            "[{}, {}, {}]",
            render(&parts[0]),
            render(&parts[1]),
            render(&parts[2])
        ),
        ExprKind::Call { name, args } => format!(
            "{}({})",
            name,
            args.iter().map(render).collect::<Vec<_>>().join(", ")
        ),
        ExprKind::Member { base, member } => format!("{}.{}", render(base), member),
        ExprKind::Unary { op, operand } => format!("({}{})", op.symbol(), render(operand)),
        ExprKind::Binary { op, left, right } => {
            format!("({} {} {})", render(left), op.symbol(), render(right))
        }
        ExprKind::Assign { op, target, value } => {
            format!("({} {} {})", render(target), op.symbol(), render(value))
        }
        ExprKind::IncDec { op, prefix, target } => {
            if *prefix {
                format!("({}{})", op.symbol(), render(target))
            } else {
                format!("({}{})", render(target), op.symbol())
            }
        }
    }
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(shape("a + b * c"), "(a + (b * c))");
    assert_eq!(shape("a - b + c"), "((a - b) + c)");
    assert_eq!(shape("a * b % c"), "((a * b) % c)");
}

#[test]
fn test_logical_and_bitwise_precedence() {
    assert_eq!(shape("a || b && c"), "(a || (b && c))");
    assert_eq!(shape("a | b ^ c & d"), "(a | (b ^ (c & d)))");
    assert_eq!(shape("a == b < c"), "(a == (b < c))");
    assert_eq!(shape("a << 1 + 2"), "(a << (1 + 2))");
}

#[test]
fn test_assignment_is_right_associative() {
    assert_eq!(shape("a = b = 3"), "(a = (b = 3))");
    assert_eq!(shape("a += b * 2"), "(a += (b * 2))");
    assert_eq!(shape("a >>>= 1"), "(a >>>= 1)");
}

#[test]
fn test_unary_and_postfix() {
    assert_eq!(shape("-a + b"), "((-a) + b)");
    assert_eq!(shape("!a && ~b"), "((!a) && (~b))");
    assert_eq!(shape("i++ + ++j"), "((i++) + (++j))");
    assert_eq!(shape("s.v.x--"), "(s.v.x--)");
}

#[test]
fn test_calls_and_vectors() {
    assert_eq!(
        shape("DelayCommand(1.0, PrintInteger(x + 1))"),
        "DelayCommand(1.0, PrintInteger((x + 1)))"
    );
    assert_eq!(shape("v = [1.0, 2.0, -3.0]"), "(v = [1.0, 2.0, (-3.0)])");
}

#[test]
fn test_items() {
    let parsed = unit(indoc! {r#"
        struct Pair { int a, b; float c; };
        const int LIMIT = 10;
        int g1, g2 = 4;
        int Add(int x, int y = 1);
        void main() { PrintInteger(Add(1)); }
        int Add(int x, int y = 1) { return x + y; }
    "#});
    let items = &parsed.script.items;
    assert_eq!(items.len(), 6);

    let Item::Struct(pair) = &items[0] else {
        panic!("expected struct");
    };
    let members: Vec<&str> = pair.members.iter().map(|(_, n, _)| n.as_str()).collect();
    assert_eq!(members, vec!["a", "b", "c"]);

    let Item::Global(limit) = &items[1] else {
        panic!("expected global");
    };
    assert!(limit.is_const);

    let Item::Global(globals) = &items[2] else {
        panic!("expected global");
    };
    assert_eq!(globals.declarators.len(), 2);
    assert!(globals.declarators[1].init.is_some());

    let Item::Function(proto) = &items[3] else {
        panic!("expected prototype");
    };
    assert!(proto.body.is_none());
    assert!(proto.params[1].default.is_some());
}

#[test]
fn test_statements() {
    let parsed = unit(indoc! {r#"
        void main() {
            int i;
            for (i = 0; i < 3; i++) { if (i == 1) continue; else break; }
            do { i--; } while (i > 0);
            switch (i) { case 0: break; case -1: default: i = 2; }
            while (TRUE) ;
            return;
        }
    "#});
    let Item::Function(main) = &parsed.script.items[0] else {
        panic!("expected function");
    };
    let kinds: Vec<&str> = main
        .body
        .as_ref()
        .unwrap()
        .stmts
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Decl(_) => "decl",
            StmtKind::For { .. } => "for",
            StmtKind::DoWhile { .. } => "do",
            StmtKind::Switch { .. } => "switch",
            StmtKind::While { .. } => "while",
            StmtKind::Return(None) => "return",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["decl", "for", "do", "switch", "while", "return"]);
}

#[test]
fn test_struct_typed_declarations() {
    let parsed = unit("struct S { int a; }; struct S Make() { struct S s; return s; }");
    let Item::Function(make) = &parsed.script.items[1] else {
        panic!("expected function");
    };
    assert_eq!(make.ret.name, TypeName::Struct("S".to_string()));
}

#[test]
fn test_includes_are_spliced_once() {
    let mut loader = MemoryLoader::new()
        .with("lib_a", "#include \"lib_b\"\nint A() { return 1; }")
        .with("lib_b", "int B() { return 2; }");
    let parsed = parse(
        "#include \"lib_a\"\n#include \"lib_b\"\nvoid main() { A(); B(); }",
        &mut loader,
    )
    .unwrap();
    assert_eq!(parsed.files.len(), 3);
    let names: Vec<&str> = parsed
        .script
        .items
        .iter()
        .map(|item| match item {
            Item::Function(f) => f.name.as_str(),
            _ => "",
        })
        .collect();
    assert_eq!(names, vec!["B", "A", "main"]);
}

#[test]
fn test_missing_include() {
    let err = parse("#include \"nowhere\"", &mut MemoryLoader::new()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::MissingInclude("nowhere".to_string()));
    assert_eq!(err.span.line, 1);
}

#[test]
fn test_error_in_include_names_file() {
    let mut loader = MemoryLoader::new().with("broken", "int x = ;");
    let err = parse("#include \"broken\"", &mut loader).unwrap_err();
    assert_eq!(err.file, "broken");
    assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));
}

#[test]
fn test_syntax_errors() {
    assert!(matches!(
        error("void main() { int x = 1 }"),
        CompileErrorKind::UnexpectedToken { .. }
    ));
    assert_eq!(error("void main() { 1 = 2; }"), CompileErrorKind::NotAssignable);
    assert!(matches!(
        error("void main() { string s = \"open; }"),
        CompileErrorKind::Lex(_)
    ));
}

#[test]
fn test_max_depth() {
    let source = format!("void main() {{ int x = {}1{}; }}", "(".repeat(50), ")".repeat(50));
    let err = parse_with_max_depth(&source, &mut MemoryLoader::new(), 20).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::MaxDepthExceeded { max_depth: 20 });
}
