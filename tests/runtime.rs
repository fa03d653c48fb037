//! Runtime services seen from running code: tracing, breakpoints,
//! safepoints, finalizer registration and the instruction budget.

use tosca::{Bytecode, InterpreterConfig, Machine, Outcome, Program, TosState, Value};

fn machine_with(config: InterpreterConfig, source: &str) -> Machine {
    let program = Program::from_toml(source).unwrap();
    Machine::new(config, &program).unwrap()
}

fn machine(source: &str) -> Machine {
    machine_with(InterpreterConfig::default(), source)
}

fn int(out: Outcome) -> i32 {
    match out {
        Outcome::Returned(Value::Int(v)) => v,
        other => panic!("expected an int, got {:?}", other),
    }
}

const CALLS: &str = r#"
[[class]]
name = "T"

[[class.method]]
name = "f"
descriptor = "()I"
flags = ["static"]
code = """
    iconst_1
    iconst_2
    invokestatic T.g(II)I
    ireturn
"""

[[class.method]]
name = "g"
descriptor = "(II)I"
flags = ["static"]
code = """
    iload_0
    iload_1
    iadd
    ireturn
"""

[[class.method]]
name = "loop"
descriptor = "(I)I"
flags = ["static"]
code = """
    iconst_0
    istore_1
top:
    iload_1
    iload_0
    if_icmpge done
    iinc 1 1
    goto top
done:
    iload_1
    ireturn
"""

[[class.method]]
name = "spin"
descriptor = "()V"
flags = ["static"]
code = """
top:
    goto top
"""
"#;

// ==================== Tracing ====================

#[test]
fn test_trace_follows_calls() {
    let config = InterpreterConfig {
        trace_bytecodes: true,
        rewrite_bytecodes: false,
        ..Default::default()
    };
    let mut vm = machine_with(config, CALLS);
    assert_eq!(int(vm.invoke("T.f()I", &[]).unwrap()), 3);

    let steps: Vec<_> = vm
        .trace()
        .iter()
        .map(|e| (e.method.as_str(), e.bci, e.bytecode, e.depth))
        .collect();
    assert_eq!(
        steps,
        vec![
            ("T.f()I", 0, "iconst_1", 0),
            ("T.f()I", 1, "iconst_2", 1),
            ("T.f()I", 2, "invokestatic", 2),
            ("T.g(II)I", 0, "iload_0", 0),
            ("T.g(II)I", 1, "iload_1", 1),
            ("T.g(II)I", 2, "iadd", 2),
            ("T.g(II)I", 3, "ireturn", 1),
            ("T.f()I", 5, "ireturn", 1),
        ]
    );
    assert_eq!(vm.trace()[0].state, TosState::Vtos);
    assert_eq!(vm.trace()[5].state, TosState::Itos);

    vm.clear_trace();
    assert!(vm.trace().is_empty());
}

#[test]
fn test_no_trace_by_default() {
    let mut vm = machine(CALLS);
    assert_eq!(int(vm.invoke("T.f()I", &[]).unwrap()), 3);
    assert!(vm.trace().is_empty());
}

// ==================== Breakpoints ====================

#[test]
fn test_breakpoint_runs_the_original_bytecode() {
    let mut vm = machine(CALLS);
    vm.set_breakpoint("T.g(II)I", 2).unwrap();
    assert_eq!(vm.bytecode_at("T.g(II)I", 2).unwrap(), Some(Bytecode::Iadd));

    assert_eq!(int(vm.invoke("T.f()I", &[]).unwrap()), 3);
    assert_eq!(int(vm.invoke("T.g(II)I", &[Value::Int(4), Value::Int(5)]).unwrap()), 9);
    let hits = vm.breakpoint_hits();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].method, "T.g(II)I");
    assert_eq!(hits[0].bci, 2);

    assert!(vm.clear_breakpoint("T.g(II)I", 2).unwrap());
    assert!(!vm.clear_breakpoint("T.g(II)I", 2).unwrap());
    assert_eq!(int(vm.invoke("T.f()I", &[]).unwrap()), 3);
    assert_eq!(vm.breakpoint_hits().len(), 2);
}

#[test]
fn test_breakpoint_in_a_loop() {
    let mut vm = machine(CALLS);
    // `if_icmpge` at bci 4.
    vm.set_breakpoint("T.loop(I)I", 4).unwrap();
    assert_eq!(int(vm.invoke("T.loop(I)I", &[Value::Int(5)]).unwrap()), 5);
    assert_eq!(vm.breakpoint_hits().len(), 6);
}

#[test]
fn test_breakpoint_outside_the_code() {
    let mut vm = machine(CALLS);
    assert!(vm.set_breakpoint("T.g(II)I", 40).is_err());
    assert!(vm.set_breakpoint("T.missing()V", 0).is_err());
}

// ==================== Safepoints ====================

#[test]
fn test_safepoint_on_backward_branch() {
    let mut vm = machine(CALLS);
    assert_eq!(int(vm.invoke("T.loop(I)I", &[Value::Int(100)]).unwrap()), 100);
    assert_eq!(vm.safepoints(), 0);

    vm.request_safepoint().unwrap();
    assert_eq!(int(vm.invoke("T.loop(I)I", &[Value::Int(100)]).unwrap()), 100);
    assert_eq!(vm.safepoints(), 1);
}

#[test]
fn test_safepoint_on_return() {
    let mut vm = machine(CALLS);
    vm.request_safepoint().unwrap();
    assert_eq!(int(vm.invoke("T.g(II)I", &[Value::Int(1), Value::Int(1)]).unwrap()), 2);
    assert_eq!(vm.safepoints(), 1);
}

// ==================== Instruction budget ====================

#[test]
fn test_instruction_limit_stops_a_runaway_method() {
    let config = InterpreterConfig {
        instruction_limit: 50_000,
        ..Default::default()
    };
    let mut vm = machine_with(config, CALLS);
    assert!(vm.invoke("T.spin()V", &[]).is_err());

    // The budget is per invocation.
    assert_eq!(int(vm.invoke("T.loop(I)I", &[Value::Int(10)]).unwrap()), 10);
    assert!(vm.instructions() > 0);
}

// ==================== Finalizers ====================

#[test]
fn test_finalizable_objects_are_registered() {
    let source = r#"
[[class]]
name = "Resource"

[[class.method]]
name = "<init>"
descriptor = "()V"
code = """
    aload_0
    invokespecial java/lang/Object.<init>()V
    return
"""

[[class.method]]
name = "finalize"
descriptor = "()V"
code = "return"

[[class]]
name = "File"
super = "Resource"

[[class]]
name = "Plain"

[[class]]
name = "Make"

[[class.method]]
name = "resource"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Resource
    dup
    invokespecial Resource.<init>()V
    areturn
"""

[[class.method]]
name = "file"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new File
    dup
    invokespecial Resource.<init>()V
    areturn
"""

[[class.method]]
name = "plain"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Plain
    dup
    invokespecial java/lang/Object.<init>()V
    areturn
"""
"#;
    let mut vm = machine(source);
    let plain = vm.invoke("Make.plain()Ljava/lang/Object;", &[]).unwrap();
    assert!(matches!(plain, Outcome::Returned(Value::Reference(_))));
    assert!(vm.finalizable().is_empty());

    let Outcome::Returned(Value::Reference(resource)) = vm.invoke("Make.resource()Ljava/lang/Object;", &[]).unwrap()
    else {
        panic!("expected a reference");
    };
    let Outcome::Returned(Value::Reference(file)) = vm.invoke("Make.file()Ljava/lang/Object;", &[]).unwrap() else {
        panic!("expected a reference");
    };
    assert_eq!(vm.finalizable(), &[resource, file]);
}
