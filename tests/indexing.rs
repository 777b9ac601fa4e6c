mod common;

use clangscope::location::Location;
use clangscope::model::{CursorKind, DependencyMode, QueryFlags};
use clangscope::parse::EntityKind;
use common::*;
use std::collections::BTreeSet;

const USR_N: &str = "c:@N@N";
const USR_S: &str = "c:@N@N@S@S";
const USR_F: &str = "c:@N@N@S@S@F@f#";

/// namespace N { struct S { void f(); }; void N::S::f(){} }
fn script_nsf(fx: &Fixture, path: &std::path::Path) {
    fx.parser.script(
        path,
        UnitScript {
            decls: vec![
                decl(USR_N, "N", EntityKind::Namespace, true, pos(path, 1, 11, 10)),
                scoped(
                    decl(USR_S, "S", EntityKind::Struct, true, pos(path, 1, 22, 21)),
                    &["N"],
                ),
                scoped(
                    decl(
                        USR_F,
                        "f",
                        EntityKind::InstanceMethod,
                        false,
                        pos(path, 1, 31, 30),
                    ),
                    &["S", "N"],
                ),
                scoped(
                    decl(
                        USR_F,
                        "f",
                        EntityKind::InstanceMethod,
                        true,
                        pos(path, 2, 14, 52),
                    ),
                    &["S", "N"],
                ),
            ],
            ..Default::default()
        },
    );
}

#[test]
fn fresh_index_records_name_permutations() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    script_nsf(&fx, &a_cpp);

    fx.index(&a_cpp);
    fx.wait();

    for name in ["f", "S::f", "N::S::f"] {
        let cursors = fx.project.find_cursors(name, &[]);
        assert_eq!(cursors.len(), 2, "expected decl and def under {name:?}");
    }

    let cursors = fx.project.find_cursors("N::S::f", &[]);
    let decl_cursor = cursors
        .iter()
        .find(|c| c.kind == Some(CursorKind::MemberFunctionDecl))
        .expect("declaration cursor");
    let def_cursor = cursors
        .iter()
        .find(|c| c.kind == Some(CursorKind::MemberFunctionDef))
        .expect("definition cursor");
    assert_eq!(decl_cursor.location.line, 1);
    assert_eq!(def_cursor.location.line, 2);
    assert_eq!(decl_cursor.target, Some(def_cursor.location));
    assert_eq!(def_cursor.target, Some(decl_cursor.location));

    let symbols = fx.project.list_symbols("N::", &[]);
    assert!(symbols.contains("N::S"));
    assert!(symbols.contains("N::S::f"));
    assert!(!fx.project.is_indexing());
}

#[test]
fn cursor_on_a_call_targets_the_definition() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    let b_cpp = fx.file("b.cpp");
    script_nsf(&fx, &a_cpp);
    fx.parser.script(
        &b_cpp,
        UnitScript {
            refs: vec![entity_ref(USR_F, "f", pos(&b_cpp, 3, 5, 40))],
            ..Default::default()
        },
    );

    fx.index(&a_cpp);
    fx.wait();
    fx.index(&b_cpp);
    fx.wait();

    let b_id = fx.services.paths.file_id(&b_cpp).unwrap();
    let cursor = fx.project.cursor(Location::new(b_id, 3, 5));
    assert_eq!(cursor.kind, Some(CursorKind::Reference));
    let target = cursor.target.expect("call should resolve");
    let a_id = fx.services.paths.file_id(&a_cpp).unwrap();
    assert_eq!(target.file_id, a_id);
    assert_eq!(target.line, 2, "target should be the out-of-class definition");
}

#[test]
fn header_symbols_are_deduplicated_across_units() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    let b_cpp = fx.file("b.cpp");
    let h_h = fx.file("h.h");
    let usr_t = "c:@S@T";

    for source in [&a_cpp, &b_cpp] {
        fx.parser.script(
            source,
            UnitScript {
                includes: vec![(source.clone(), 1, h_h.clone())],
                decls: vec![decl(usr_t, "T", EntityKind::Struct, true, pos(&h_h, 1, 8, 7))],
                ..Default::default()
            },
        );
    }

    fx.index(&a_cpp);
    fx.wait();
    fx.index(&b_cpp);
    fx.wait();

    let cursors = fx.project.find_cursors("T", &[]);
    assert_eq!(cursors.len(), 1, "one definition, not one per unit");
    let h_id = fx.services.paths.file_id(&h_h).unwrap();
    assert_eq!(cursors.iter().next().unwrap().location.file_id, h_id);

    let a_deps = fx.project.dependencies(&a_cpp, DependencyMode::ArgDependsOn);
    assert!(a_deps.contains(&h_h));
    let h_dependents = fx.project.dependencies(&h_h, DependencyMode::DependsOnArg);
    assert_eq!(
        h_dependents,
        BTreeSet::from([a_cpp.clone(), b_cpp.clone(), h_h.clone()])
    );

    assert!(fx.project.is_indexed(&h_h));
    assert!(fx.project.validate().is_empty());
}

#[test]
fn virtual_overrides_are_symmetric() {
    let fx = fixture();
    let a_cpp = fx.file("virt.cpp");
    let usr_bm = "c:@S@B@F@m#";
    let usr_dm = "c:@S@D@F@m#";

    let mut base = scoped(
        decl(
            usr_bm,
            "m",
            EntityKind::InstanceMethod,
            false,
            pos(&a_cpp, 1, 25, 24),
        ),
        &["B"],
    );
    base.is_virtual = true;
    let mut derived = scoped(
        decl(
            usr_dm,
            "m",
            EntityKind::InstanceMethod,
            false,
            pos(&a_cpp, 2, 21, 60),
        ),
        &["D"],
    );
    derived.is_virtual = true;
    derived.overridden = vec![usr_bm.to_string()];

    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![
                decl(
                    "c:@S@B",
                    "B",
                    EntityKind::Struct,
                    true,
                    pos(&a_cpp, 1, 8, 7),
                ),
                base,
                scoped(
                    decl(
                        "c:@S@D",
                        "D",
                        EntityKind::Struct,
                        true,
                        pos(&a_cpp, 2, 8, 43),
                    ),
                    &[],
                ),
                derived,
            ],
            ..Default::default()
        },
    );

    fx.index(&a_cpp);
    fx.wait();

    let a_id = fx.services.paths.file_id(&a_cpp).unwrap();
    let mut out: Vec<String> = Vec::new();
    fx.project.references(
        Location::new(a_id, 1, 25),
        QueryFlags {
            find_virtuals: true,
            all_references: false,
        },
        &[],
        &mut out,
    );

    assert_eq!(out.last().map(String::as_str), Some("`"));
    let body = out[..out.len() - 1].join("");
    assert!(
        body.contains(":1:25 r"),
        "base declaration missing from {body:?}"
    );
    assert!(
        body.contains(":2:21 r"),
        "override declaration missing from {body:?}"
    );
}

#[test]
fn cursor_lookup_respects_symbol_spans() {
    let fx = fixture();
    let a_cpp = fx.file("span.cpp");
    // int foo_bar = 0; foo_bar spans columns 5..11
    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![decl(
                "c:span.cpp@foo_bar",
                "foo_bar",
                EntityKind::Variable,
                true,
                pos(&a_cpp, 3, 5, 24),
            )],
            ..Default::default()
        },
    );

    fx.index(&a_cpp);
    fx.wait();

    let a_id = fx.services.paths.file_id(&a_cpp).unwrap();
    let hit = fx.project.cursor(Location::new(a_id, 3, 8));
    assert_eq!(hit.kind, Some(CursorKind::Variable));
    assert_eq!(hit.location, Location::new(a_id, 3, 5));

    let past_end = fx.project.cursor(Location::new(a_id, 3, 12));
    assert!(past_end.is_empty());

    let other_line = fx.project.cursor(Location::new(a_id, 4, 5));
    assert!(other_line.is_empty());
}

#[test]
fn type_refs_of_members_become_references() {
    let fx = fixture();
    let a_cpp = fx.file("members.cpp");
    let usr_t = "c:@S@T";
    let usr_holder = "c:@S@Holder";

    let mut holder = decl(
        usr_holder,
        "Holder",
        EntityKind::Struct,
        true,
        pos(&a_cpp, 2, 8, 30),
    );
    holder.type_refs = vec![entity_ref(usr_t, "T", pos(&a_cpp, 3, 3, 45))];

    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![
                decl(usr_t, "T", EntityKind::Struct, true, pos(&a_cpp, 1, 8, 7)),
                holder,
            ],
            ..Default::default()
        },
    );

    fx.index(&a_cpp);
    fx.wait();

    let a_id = fx.services.paths.file_id(&a_cpp).unwrap();
    let cursor = fx.project.cursor(Location::new(a_id, 3, 3));
    assert_eq!(cursor.kind, Some(CursorKind::Reference));
    assert_eq!(cursor.target, Some(Location::new(a_id, 1, 8)));
}

#[test]
fn typedefs_bypass_the_seen_gate() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    let b_cpp = fx.file("b.cpp");
    let h_h = fx.file("h.h");

    for source in [&a_cpp, &b_cpp] {
        fx.parser.script(
            source,
            UnitScript {
                includes: vec![(source.clone(), 1, h_h.clone())],
                decls: vec![
                    decl(
                        "c:@S@Plain",
                        "Plain",
                        EntityKind::Struct,
                        true,
                        pos(&h_h, 1, 8, 7),
                    ),
                    decl(
                        "c:h.h@T@Alias",
                        "Alias",
                        EntityKind::Typedef,
                        true,
                        pos(&h_h, 2, 9, 20),
                    ),
                ],
                ..Default::default()
            },
        );
    }

    fx.index(&a_cpp);
    fx.wait();

    // second unit must not lose the typedef to the gate
    fx.index(&b_cpp);
    fx.wait();

    assert_eq!(fx.project.find_cursors("Plain", &[]).len(), 1);
    assert_eq!(fx.project.find_cursors("Alias", &[]).len(), 1);
}

#[test]
fn queries_honor_path_filters() {
    let fx = fixture();
    let a_cpp = fx.file("a.cpp");
    let b_cpp = fx.file("b.cpp");
    fx.parser.script(
        &a_cpp,
        UnitScript {
            decls: vec![decl(
                "c:a@one",
                "one",
                EntityKind::Function,
                true,
                pos(&a_cpp, 1, 5, 4),
            )],
            ..Default::default()
        },
    );
    fx.parser.script(
        &b_cpp,
        UnitScript {
            decls: vec![decl(
                "c:b@two",
                "two",
                EntityKind::Function,
                true,
                pos(&b_cpp, 1, 5, 4),
            )],
            ..Default::default()
        },
    );

    fx.index(&a_cpp);
    fx.wait();
    fx.index(&b_cpp);
    fx.wait();

    let filter = vec![a_cpp.clone()];
    let symbols = fx.project.list_symbols("", &filter);
    assert!(symbols.contains("one"));
    assert!(!symbols.contains("two"));
    assert!(fx.project.find_cursors("two", &filter).is_empty());
}
