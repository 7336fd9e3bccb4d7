use pretty_assertions::assert_eq;

use cruxc::ast::build::*;
use cruxc::ast::{DeclarationList, Item, Operation, Stmt};
use cruxc::cctx::CCtx;
use cruxc::ir::InstKind;
use cruxc::types::Type;
use cruxc::CompileError;

fn diagnostics_of(mut ast: DeclarationList) -> Vec<String> {
    match cruxc::compile(&mut ast, &mut String::new()) {
        Err(CompileError::Diagnostics(diagnostics)) => {
            diagnostics.iter().map(ToString::to_string).collect()
        }
        Err(e) => panic!("unexpected internal error: {}", e),
        Ok(()) => vec![],
    }
}

fn sum_array() -> DeclarationList {
    // int data[4];
    // func fill(): void {
    //   int i;
    //   for (i = 0; i < 4; i = i + 1) { data[i] = i * i; }
    // }
    // func total(): int {
    //   int i; int acc;
    //   acc = 0;
    //   for (i = 0; i < 4; i = i + 1) {
    //     if (acc > 100) { break; } else { }
    //     acc = acc + data[i];
    //   }
    //   return acc;
    // }
    // func main(): void { fill(); printInt(total()); println(); }
    let counted = |body: Vec<Stmt>| {
        for_(
            assignment(var("i"), int(0)),
            binary(Operation::Lt, var("i"), int(4)),
            assignment(var("i"), binary(Operation::Add, var("i"), int(1))),
            body,
        )
    };
    program(vec![
        global("data", Type::array(4, Type::int())),
        Item::Function(function(
            "fill",
            &[],
            Type::void(),
            vec![
                declare("i", Type::int()),
                counted(vec![assign(
                    index("data", var("i")),
                    binary(Operation::Mul, var("i"), var("i")),
                )]),
            ],
        )),
        Item::Function(function(
            "total",
            &[],
            Type::int(),
            vec![
                declare("i", Type::int()),
                declare("acc", Type::int()),
                assign(var("acc"), int(0)),
                counted(vec![
                    if_else(
                        binary(Operation::Gt, var("acc"), int(100)),
                        vec![break_()],
                        vec![],
                    ),
                    assign(
                        var("acc"),
                        binary(Operation::Add, var("acc"), index("data", var("i"))),
                    ),
                ]),
                return_(var("acc")),
            ],
        )),
        Item::Function(function(
            "main",
            &[],
            Type::void(),
            vec![
                call_stmt("fill", vec![]),
                call_stmt("printInt", vec![call("total", vec![])]),
                call_stmt("println", vec![]),
            ],
        )),
    ])
}

#[test]
fn test_compile_program_with_globals_and_loops() {
    let mut out = String::new();
    cruxc::compile(&mut sum_array(), &mut out).unwrap();
    let lines = out.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "    .comm data, 32, 8");
    for name in ["fill", "total", "main"] {
        assert!(lines.contains(&format!("{}:", name).as_str()));
        assert!(lines.contains(&format!("    .globl {}", name).as_str()));
    }
    assert!(lines.contains(&"    call total"));
    assert!(lines.contains(&"    movq data@GOTPCREL(%rip), %r11"));

    // every referenced label is defined exactly once
    for line in &lines {
        let target = line
            .strip_prefix("    je ")
            .or_else(|| line.strip_prefix("    jmp "));
        if let Some(target) = target {
            let definition = format!("{}:", target);
            assert_eq!(lines.iter().filter(|&&l| l == definition).count(), 1);
        }
    }
}

#[test]
fn test_lowered_program_shape() {
    let cctx = CCtx::new();
    let program = cruxc::lower_checked(&cctx, &mut sum_array()).unwrap();
    assert_eq!(program.globals.len(), 1);
    assert_eq!(
        program
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>(),
        vec!["fill", "total", "main"]
    );

    let total = program.function("total").unwrap();
    let jumps = total
        .reachable()
        .into_iter()
        .filter(|&id| total.inst(id).kind.is_jump())
        .count();
    // loop condition and the if statement
    assert_eq!(jumps, 2);
    let returns = total
        .reachable()
        .into_iter()
        .filter(|&id| total.inst(id).kind.is_return())
        .count();
    assert_eq!(returns, 1);

    let main = program.function("main").unwrap();
    let calls = main
        .reachable()
        .into_iter()
        .filter_map(|id| match &main.inst(id).kind {
            InstKind::Call { callee, dst, .. } => Some((callee.name.clone(), dst.is_some())),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(calls.len(), 4);
    assert!(calls.contains(&("total".to_owned(), true)));
    assert!(calls.contains(&("println".to_owned(), false)));
}

#[test]
fn test_diagnostics_are_collected() {
    let diagnostics = diagnostics_of(program(vec![
        Item::Decl(decl("x", Type::int()).at(1, 1)),
        Item::Decl(decl("x", Type::bool()).at(2, 1)),
        Item::Function(
            function(
                "f",
                &[],
                Type::int(),
                vec![if_else(
                    var("x").at(4, 9),
                    vec![return_(int(1))],
                    vec![],
                )
                .at(4, 5)],
            )
            .at(3, 1),
        ),
        Item::Function(
            function("main", &[("argc", Type::int())], Type::void(), vec![]).at(7, 1),
        ),
    ]));
    assert_eq!(
        diagnostics,
        vec![
            "DeclareSymbolError[2,1][Already defined in this scope x.]",
            "TypeError[4,5][condition of if must be bool, found int]",
            "TypeError[3,1][function f does not return on all paths]",
            "TypeError[7,1][main function must take no parameters]",
        ]
    );
}

#[test]
fn test_valid_program_has_no_diagnostics() {
    assert_eq!(diagnostics_of(sum_array()), Vec::<String>::new());
}
