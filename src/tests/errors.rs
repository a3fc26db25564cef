//! Fatal error paths: conflicts, limits, lookup failures and validation.

use crate::consts::{HEADER_SIZE, MAGIC};
use crate::error::EvalError;
use crate::ir::Stmt;
use crate::vm::{EvalOptions, Limits, Vm};

use super::helpers::*;

#[test]
fn var_assign_once_conflicts_are_fatal() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::AssignVarOnce {
                source: konst(true),
                target: 3,
            },
            Stmt::AssignVarOnce {
                source: konst(false),
                target: 3,
            },
        ])],
    );
    let err = vm(&policy).eval("test", &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, EvalError::VarAssignConflict));
}

#[test]
fn var_assign_once_tolerates_equal_values() {
    let policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![
            Stmt::AssignVarOnce {
                source: konst(true),
                target: 3,
            },
            Stmt::AssignVarOnce {
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
fn object_insert_once_conflicts_are_fatal() {
    let policy = plan_policy(
        statics(&["k"], &[]),
        vec![block(vec![
            Stmt::MakeObject {
                target: 3,
            },
            Stmt::ObjectInsertOnce {
                key: sidx(0),
                value: konst(true),
                object: 3,
            },
            Stmt::ObjectInsertOnce {
                key: sidx(0),
                value: konst(false),
                object: 3,
            },
        ])],
    );
    let err = vm(&policy).eval("test", &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, EvalError::ObjectInsertConflict));
}

#[test]
fn runaway_recursion_exhausts_the_meter() {
    let mut policy = plan_policy(
        statics(&[], &[]),
        vec![block(vec![Stmt::Call {
            func: "g0.data.spin".to_string(),
            args: vec![local(0), local(1)],
            result: 2,
        }])],
    );
    policy.funcs.push(func(
        "g0.data.spin",
        vec![2, 3],
        4,
        vec![block(vec![
            Stmt::Call {
                func: "g0.data.spin".to_string(),
                args: vec![local(2), local(3)],
                result: 4,
            },
            Stmt::ReturnLocal {
                source: 4,
            },
        ])],
    ));
    let opts = EvalOptions {
        limits: Limits {
            instructions: 1_000,
        },
        ..Default::default()
    };
    let err = vm(&policy).eval("test", &opts).unwrap_err();
    assert!(matches!(err, EvalError::InstructionsLimitExceeded(1_000)));
}

#[test]
fn unknown_plans_are_query_not_found() {
    let policy = plan_policy(statics(&[], &[]), vec![block(vec![Stmt::Nop])]);
    let err = vm(&policy).eval("nope", &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, EvalError::QueryNotFound(name) if name == "nope"));
}

#[test]
fn unknown_function_paths_are_function_not_found() {
    let policy = plan_policy(statics(&[], &[]), vec![block(vec![Stmt::Nop])]);
    let err = vm(&policy)
        .function("does.not.exist", &EvalOptions::default())
        .unwrap_err();
    assert!(matches!(err, EvalError::FunctionNotFound(p) if p == "does.not.exist"));
}

#[test]
fn executable_validation_rejects_bad_buffers() {
    // Too short.
    assert!(matches!(
        Vm::from_executable(vec![0; 4], Vec::new()),
        Err(EvalError::InvalidExecutable(_))
    ));

    // Wrong magic.
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(b"nope");
    assert!(matches!(
        Vm::from_executable(bytes, Vec::new()),
        Err(EvalError::InvalidExecutable(_))
    ));

    // Wrong version.
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(&MAGIC);
    bytes[4..8].copy_from_slice(&7u32.to_be_bytes());
    assert!(matches!(
        Vm::from_executable(bytes, Vec::new()),
        Err(EvalError::InvalidExecutable(_))
    ));

    // Declared length larger than the buffer.
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(&MAGIC);
    bytes[8..12].copy_from_slice(&(HEADER_SIZE as u32 + 100).to_be_bytes());
    assert!(matches!(
        Vm::from_executable(bytes, Vec::new()),
        Err(EvalError::InvalidExecutable(_))
    ));
}

#[test]
fn compiled_executables_validate_and_intern_strings() {
    let policy = plan_policy(
        statics(&["interned"], &[]),
        vec![block(vec![Stmt::Nop])],
    );
    let vm = vm(&policy);
    let exe = vm.executable();
    let a = exe.string(0).unwrap();
    let b = exe.string(0).unwrap();
    // One allocation per pool index per VM instance.
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}
