//! Control flow and statement semantics.

use crate::ir::Stmt;
use crate::value::from_native;
use crate::vm::EvalOptions;

use super::helpers::*;

#[test]
fn simple_allow_produces_a_singleton_result_set() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::AssignVar {
                source: konst(true),
                target: 3,
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!([true]));
    assert!(out.builtin_errors.is_empty());
}

#[test]
fn scan_iterates_arrays_in_index_order() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::MakeArray {
                capacity: 3,
                target: 3,
            },
            Stmt::Scan {
                source: 0,
                key: 4,
                value: 5,
                block: block(vec![Stmt::ArrayAppend {
                    array: 3,
                    value: local(5),
                }]),
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let opts = EvalOptions {
        input: Some(serde_json::json!([10, 20, 30])),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!([[10, 20, 30]]));
}

#[test]
fn scan_over_undefined_aborts_the_block() {
    let policy = plan_policy(
        statics(&["fallback"], &[]),
        vec![
            block(vec![
                Stmt::Scan {
                    source: 9,
                    key: 4,
                    value: 5,
                    block: block(vec![Stmt::Nop]),
                },
                Stmt::AssignVar {
                    source: konst(true),
                    target: 3,
                },
                Stmt::ResultSetAdd {
                    value: 3,
                },
            ]),
            block(vec![
                Stmt::AssignVar {
                    source: sidx(0),
                    target: 6,
                },
                Stmt::ResultSetAdd {
                    value: 6,
                },
            ]),
        ],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!(["fallback"]));
}

#[test]
fn break_unwinds_the_named_number_of_frames() {
    let policy = plan_policy(
        statics(&["after"], &[]),
        vec![
            block(vec![
                Stmt::Block {
                    blocks: vec![block(vec![
                        Stmt::Break {
                            index: 1,
                        },
                        Stmt::AssignVar {
                            source: konst(true),
                            target: 3,
                        },
                        Stmt::ResultSetAdd {
                            value: 3,
                        },
                    ])],
                },
                Stmt::AssignVar {
                    source: konst(false),
                    target: 4,
                },
                Stmt::ResultSetAdd {
                    value: 4,
                },
            ]),
            block(vec![
                Stmt::AssignVar {
                    source: sidx(0),
                    target: 5,
                },
                Stmt::ResultSetAdd {
                    value: 5,
                },
            ]),
        ],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    // The break skipped both result adds of the first plan block.
    assert_eq!(out.value, serde_json::json!(["after"]));
}

#[test]
fn not_succeeds_when_its_body_aborts() {
    // not(is_defined(9)) over an unset local.
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::Not {
                block: block(vec![Stmt::IsDefined {
                    source: 9,
                }]),
            },
            Stmt::AssignVar {
                source: konst(true),
                target: 3,
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!([true]));
}

#[test]
fn not_discards_inner_assignments() {
    // The body assigns local 7, then aborts; the assignment must not leak.
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::Not {
                block: block(vec![
                    Stmt::AssignVar {
                        source: konst(true),
                        target: 7,
                    },
                    Stmt::Break {
                        index: 0,
                    },
                ]),
            },
            Stmt::IsUndefined {
                source: 7,
            },
            Stmt::AssignVar {
                source: konst(true),
                target: 3,
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!([true]));
}

#[test]
fn not_fails_when_its_body_completes() {
    let policy = plan_policy(
        statics(&["reached"], &[]),
        vec![
            block(vec![
                Stmt::Not {
                    block: block(vec![Stmt::Nop]),
                },
                Stmt::AssignVar {
                    source: konst(true),
                    target: 3,
                },
                Stmt::ResultSetAdd {
                    value: 3,
                },
            ]),
            block(vec![
                Stmt::AssignVar {
                    source: sidx(0),
                    target: 4,
                },
                Stmt::ResultSetAdd {
                    value: 4,
                },
            ]),
        ],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!(["reached"]));
}

#[test]
fn with_overlays_and_restores_the_register() {
    // Strings: 0 = "a".
    // Inside with: input.a is true and lands in the result set; after the
    // with, input.a is gone again and the dot aborts into the second block.
    let policy = plan_policy(
        statics(&["a", "restored"], &[]),
        vec![
            block(vec![
                Stmt::With {
                    local: 0,
                    path: vec![0],
                    value: konst(true),
                    block: block(vec![
                        Stmt::Dot {
                            source: local(0),
                            key: sidx(0),
                            target: 3,
                        },
                        Stmt::ResultSetAdd {
                            value: 3,
                        },
                    ]),
                },
                Stmt::Dot {
                    source: local(0),
                    key: sidx(0),
                    target: 4,
                },
                Stmt::ResultSetAdd {
                    value: 4,
                },
            ]),
            block(vec![
                Stmt::AssignVar {
                    source: sidx(1),
                    target: 5,
                },
                Stmt::ResultSetAdd {
                    value: 5,
                },
            ]),
        ],
    );
    let opts = EvalOptions {
        input: Some(serde_json::json!({})),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!([true, "restored"]));
}

#[test]
fn dot_falls_through_to_string_keys_on_the_data_path() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::AssignInt {
                value: 0,
                target: 3,
            },
            Stmt::Dot {
                source: local(1),
                key: local(3),
                target: 4,
            },
            Stmt::ResultSetAdd {
                value: 4,
            },
        ])],
    );
    let opts = EvalOptions {
        data: Some(from_native(&serde_json::json!({"0": "alice"}))),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!(["alice"]));

    // The same subscription against the input local misses: the
    // fallthrough is a data-path behavior.
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::AssignInt {
                value: 0,
                target: 3,
            },
            Stmt::Dot {
                source: local(0),
                key: local(3),
                target: 4,
            },
            Stmt::ResultSetAdd {
                value: 4,
            },
        ])],
    );
    let opts = EvalOptions {
        input: Some(serde_json::json!({"0": "alice"})),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!([]));
}

#[test]
fn object_literals_assemble_and_merge() {
    // {"k": true} merged with {"m": 1} via object-merge.
    let policy = plan_policy(
        statics(&["k", "m"], &[]),
        vec![block(vec![
            Stmt::MakeObject {
                target: 3,
            },
            Stmt::ObjectInsert {
                key: sidx(0),
                value: konst(true),
                object: 3,
            },
            Stmt::MakeObject {
                target: 4,
            },
            Stmt::AssignInt {
                value: 1,
                target: 5,
            },
            Stmt::ObjectInsert {
                key: sidx(1),
                value: local(5),
                object: 4,
            },
            Stmt::ObjectMerge {
                a: 3,
                b: 4,
                target: 6,
            },
            Stmt::ResultSetAdd {
                value: 6,
            },
        ])],
    );
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    assert_eq!(out.value, serde_json::json!([{"k": true, "m": 1}]));
}

#[test]
fn sets_deduplicate_results() {
    // Adding two equal values yields a single result.
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::MakeSet {
                target: 3,
            },
            Stmt::AssignInt {
                value: 1,
                target: 4,
            },
            Stmt::SetAdd {
                value: local(4),
                set: 3,
            },
            Stmt::MakeNumberRef {
                index: 0,
                target: 5,
            },
            Stmt::SetAdd {
                value: local(5),
                set: 3,
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let policy = crate::ir::Policy {
        static_: statics(&["1.0"], &[]),
        ..policy
    };
    let out = vm(&policy).eval("test", &EvalOptions::default()).unwrap();
    // 1 and 1.0 are one equality class.
    assert_eq!(out.value, serde_json::json!([[1]]));
}

#[test]
fn len_and_equal_guard_blocks() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::Len {
                source: local(0),
                target: 3,
            },
            Stmt::AssignInt {
                value: 2,
                target: 4,
            },
            Stmt::Equal {
                a: local(3),
                b: local(4),
            },
            Stmt::ResultSetAdd {
                value: 3,
            },
        ])],
    );
    let opts = EvalOptions {
        input: Some(serde_json::json!(["x", "y"])),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!([2]));

    let opts = EvalOptions {
        input: Some(serde_json::json!(["x"])),
        ..Default::default()
    };
    let out = vm(&policy).eval("test", &opts).unwrap();
    assert_eq!(out.value, serde_json::json!([]));
}
