//! Method invocation: static, virtual, special, interface and the adapter
//! call sites.

use tosca::{Bytecode, InterpreterConfig, Machine, Outcome, Program, Value};

fn machine_with(config: InterpreterConfig) -> Machine {
    let program = Program::from_toml(PROGRAM).unwrap();
    Machine::new(config, &program).unwrap()
}

fn machine() -> Machine {
    machine_with(InterpreterConfig::default())
}

fn int(out: Outcome) -> i32 {
    match out {
        Outcome::Returned(Value::Int(v)) => v,
        other => panic!("expected an int, got {:?}", other),
    }
}

fn threw(out: Outcome) -> (String, Option<String>) {
    match out {
        Outcome::Threw { class, message, .. } => (class, message),
        other => panic!("expected an exception, got {:?}", other),
    }
}

fn object(vm: &mut Machine, target: &str, args: &[Value]) -> Value {
    match vm.invoke(target, args).unwrap() {
        Outcome::Returned(v @ Value::Reference(_)) => v,
        other => panic!("expected a reference, got {:?}", other),
    }
}

const PROGRAM: &str = r#"
[[class]]
name = "Shape"
flags = ["interface", "abstract"]

[[class.method]]
name = "area"
descriptor = "()I"
flags = ["public", "abstract"]

[[class.method]]
name = "scaled"
descriptor = "(I)I"
flags = ["public"]
code = """
    aload_0
    invokeinterface Shape.area()I
    iload_1
    imul
    ireturn
"""

[[class]]
name = "Rect"
interfaces = ["Shape"]

[[class.field]]
name = "w"
descriptor = "I"

[[class.field]]
name = "h"
descriptor = "I"

[[class.method]]
name = "<init>"
descriptor = "(II)V"
code = """
    aload_0
    invokespecial java/lang/Object.<init>()V
    aload_0
    iload_1
    putfield Rect.w:I
    aload_0
    iload_2
    putfield Rect.h:I
    return
"""

[[class.method]]
name = "area"
descriptor = "()I"
flags = ["public"]
code = """
    aload_0
    getfield Rect.w:I
    aload_0
    getfield Rect.h:I
    imul
    ireturn
"""

[[class.method]]
name = "describe"
descriptor = "()I"
code = """
    iconst_2
    ireturn
"""

[[class.method]]
name = "sides"
descriptor = "()I"
flags = ["final"]
code = """
    iconst_4
    ireturn
"""

[[class.method]]
name = "twice"
descriptor = "(I)I"
flags = ["private"]
code = """
    iload_1
    iload_1
    iadd
    ireturn
"""

[[class.method]]
name = "doubleArea"
descriptor = "()I"
code = """
    aload_0
    aload_0
    invokevirtual Rect.area()I
    invokevirtual Rect.twice(I)I
    ireturn
"""

[[class]]
name = "Square"
super = "Rect"

[[class.method]]
name = "<init>"
descriptor = "(I)V"
code = """
    aload_0
    iload_1
    iload_1
    invokespecial Rect.<init>(II)V
    return
"""

[[class.method]]
name = "describe"
descriptor = "()I"
code = """
    iconst_4
    ireturn
"""

[[class.method]]
name = "superDescribe"
descriptor = "()I"
code = """
    aload_0
    invokespecial Rect.describe()I
    ireturn
"""

[[class]]
name = "Base"
flags = ["abstract"]

[[class.method]]
name = "value"
descriptor = "()I"
flags = ["abstract"]

[[class]]
name = "Half"
super = "Base"

[[class]]
name = "Calls"

[[class.method]]
name = "fib"
descriptor = "(I)I"
flags = ["static"]
code = """
    iload_0
    iconst_2
    if_icmpge recurse
    iload_0
    ireturn
recurse:
    iload_0
    iconst_1
    isub
    invokestatic Calls.fib(I)I
    iload_0
    iconst_2
    isub
    invokestatic Calls.fib(I)I
    iadd
    ireturn
"""

[[class.method]]
name = "mix"
descriptor = "(JDI)D"
flags = ["static"]
code = """
    lload_0
    l2d
    dload_2
    dadd
    iload 4
    i2d
    dadd
    dreturn
"""

[[class.method]]
name = "callMix"
descriptor = "()D"
flags = ["static"]
code = """
    ldc2_w 10L
    ldc2_w 2.5
    bipush 7
    invokestatic Calls.mix(JDI)D
    dreturn
"""

[[class.method]]
name = "rect"
descriptor = "(II)Ljava/lang/Object;"
flags = ["static"]
code = """
    new Rect
    dup
    iload_0
    iload_1
    invokespecial Rect.<init>(II)V
    areturn
"""

[[class.method]]
name = "square"
descriptor = "(I)Ljava/lang/Object;"
flags = ["static"]
code = """
    new Square
    dup
    iload_0
    invokespecial Square.<init>(I)V
    areturn
"""

[[class.method]]
name = "plain"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new java/lang/Object
    dup
    invokespecial java/lang/Object.<init>()V
    areturn
"""

[[class.method]]
name = "half"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Half
    areturn
"""

[[class.method]]
name = "describe"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokevirtual Rect.describe()I
    ireturn
"""

[[class.method]]
name = "superDescribe"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokevirtual Square.superDescribe()I
    ireturn
"""

[[class.method]]
name = "sides"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokevirtual Rect.sides()I
    ireturn
"""

[[class.method]]
name = "doubleArea"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokevirtual Rect.doubleArea()I
    ireturn
"""

[[class.method]]
name = "area"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokeinterface Shape.area()I
    ireturn
"""

[[class.method]]
name = "scaled"
descriptor = "(Ljava/lang/Object;I)I"
flags = ["static"]
code = """
    aload_0
    iload_1
    invokeinterface Shape.scaled(I)I
    ireturn
"""

[[class.method]]
name = "same"
descriptor = "(Ljava/lang/Object;Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    aload_1
    invokeinterface Shape.equals(Ljava/lang/Object;)Z
    ireturn
"""

[[class.method]]
name = "value"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    invokevirtual Base.value()I
    ireturn
"""

[[class.method]]
name = "tagged"
descriptor = "(I)I"
flags = ["static"]
code = """
    iload_0
    invokedynamic tag(I)I
    ireturn
"""

[[class.method]]
name = "withTag"
descriptor = "(ILjava/lang/String;)I"
flags = ["static"]
code = """
    aload_1
    invokevirtual java/lang/String.length()I
    iload_0
    iadd
    ireturn
"""

[[class.method]]
name = "doubled"
descriptor = "(J)J"
flags = ["static"]
code = """
    lload_0
    invokedynamic twice(J)J
    lreturn
"""

[[class.method]]
name = "twiceLong"
descriptor = "(J)J"
flags = ["static"]
code = """
    lload_0
    lload_0
    ladd
    lreturn
"""

[[class.method]]
name = "handled"
descriptor = "(I)I"
flags = ["static"]
code = """
    new java/lang/invoke/MethodHandle
    dup
    invokespecial java/lang/invoke/MethodHandle.<init>()V
    iload_0
    invokevirtual java/lang/invoke/MethodHandle.invokeExact(I)I
    ireturn
"""

[[class.method]]
name = "viaHandle"
descriptor = "(Ljava/lang/invoke/MethodHandle;I)I"
flags = ["static"]
code = """
    aload_0
    ifnull missing
    iload_1
    iconst_3
    imul
    ireturn
missing:
    iconst_m1
    ireturn
"""

[[callsite]]
class = "Calls"
name = "tag"
descriptor = "(I)I"
target = "Calls.withTag(ILjava/lang/String;)I"
appendix = "hello"

[[callsite]]
class = "Calls"
name = "twice"
descriptor = "(J)J"
target = "Calls.twiceLong(J)J"

[[callsite]]
class = "Calls"
name = "invokeExact"
descriptor = "(I)I"
target = "Calls.viaHandle(Ljava/lang/invoke/MethodHandle;I)I"
"#;

// ==================== Static ====================

#[test]
fn test_recursive_static_calls() {
    let mut vm = machine();
    assert_eq!(int(vm.invoke("Calls.fib(I)I", &[Value::Int(20)]).unwrap()), 6765);
    assert_eq!(int(vm.invoke("Calls.fib(I)I", &[Value::Int(1)]).unwrap()), 1);
}

#[test]
fn test_wide_arguments_are_laid_out_in_slots() {
    let mut vm = machine();
    assert_eq!(vm.invoke("Calls.callMix()D", &[]).unwrap(), Outcome::Returned(Value::Double(19.5)));
    let args = [Value::Long(-1), Value::Double(0.25), Value::Int(2)];
    assert_eq!(vm.invoke("Calls.mix(JDI)D", &args).unwrap(), Outcome::Returned(Value::Double(1.25)));
}

// ==================== Virtual and special ====================

#[test]
fn test_virtual_dispatch() {
    let mut vm = machine();
    let rect = object(&mut vm, "Calls.rect(II)Ljava/lang/Object;", &[Value::Int(2), Value::Int(3)]);
    let square = object(&mut vm, "Calls.square(I)Ljava/lang/Object;", &[Value::Int(5)]);
    let describe = "Calls.describe(Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(describe, &[rect]).unwrap()), 2);
    assert_eq!(int(vm.invoke(describe, &[square]).unwrap()), 4);
    assert_eq!(int(vm.invoke(describe, &[rect]).unwrap()), 2);
}

#[test]
fn test_super_call() {
    let mut vm = machine();
    let square = object(&mut vm, "Calls.square(I)Ljava/lang/Object;", &[Value::Int(5)]);
    assert_eq!(int(vm.invoke("Calls.superDescribe(Ljava/lang/Object;)I", &[square]).unwrap()), 2);
}

#[test]
fn test_final_and_private_methods() {
    let mut vm = machine();
    let square = object(&mut vm, "Calls.square(I)Ljava/lang/Object;", &[Value::Int(3)]);
    let sides = "Calls.sides(Ljava/lang/Object;)I";
    assert_eq!(vm.bytecode_at(sides, 1).unwrap(), Some(Bytecode::Invokevirtual));
    assert_eq!(int(vm.invoke(sides, &[square]).unwrap()), 4);
    assert_eq!(vm.bytecode_at(sides, 1).unwrap(), Some(Bytecode::FastInvokevfinal));
    assert_eq!(int(vm.invoke(sides, &[square]).unwrap()), 4);

    assert_eq!(int(vm.invoke("Calls.doubleArea(Ljava/lang/Object;)I", &[square]).unwrap()), 18);
}

#[test]
fn test_final_method_without_rewriting() {
    let config = InterpreterConfig {
        rewrite_bytecodes: false,
        ..Default::default()
    };
    let mut vm = machine_with(config);
    let rect = object(&mut vm, "Calls.rect(II)Ljava/lang/Object;", &[Value::Int(2), Value::Int(3)]);
    let sides = "Calls.sides(Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(sides, &[rect]).unwrap()), 4);
    assert_eq!(vm.bytecode_at(sides, 1).unwrap(), Some(Bytecode::Invokevirtual));
}

#[test]
fn test_virtual_call_on_null() {
    let mut vm = machine();
    let (class, _) = threw(vm.invoke("Calls.describe(Ljava/lang/Object;)I", &[Value::NULL]).unwrap());
    assert_eq!(class, "java/lang/NullPointerException");
}

#[test]
fn test_abstract_method() {
    let mut vm = machine();
    let half = object(&mut vm, "Calls.half()Ljava/lang/Object;", &[]);
    let (class, message) = threw(vm.invoke("Calls.value(Ljava/lang/Object;)I", &[half]).unwrap());
    assert_eq!(class, "java/lang/AbstractMethodError");
    assert!(message.unwrap_or_default().contains("value"));

    let (class, _) = threw(vm.invoke("Base.value()I", &[half]).unwrap());
    assert_eq!(class, "java/lang/AbstractMethodError");
}

// ==================== Interface ====================

#[test]
fn test_interface_calls() {
    let mut vm = machine();
    let rect = object(&mut vm, "Calls.rect(II)Ljava/lang/Object;", &[Value::Int(2), Value::Int(3)]);
    let square = object(&mut vm, "Calls.square(I)Ljava/lang/Object;", &[Value::Int(5)]);
    let area = "Calls.area(Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(area, &[rect]).unwrap()), 6);
    assert_eq!(int(vm.invoke(area, &[square]).unwrap()), 25);

    let scaled = "Calls.scaled(Ljava/lang/Object;I)I";
    assert_eq!(int(vm.invoke(scaled, &[rect, Value::Int(10)]).unwrap()), 60);
    assert_eq!(int(vm.invoke(scaled, &[square, Value::Int(2)]).unwrap()), 50);
}

#[test]
fn test_interface_not_implemented() {
    let mut vm = machine();
    let plain = object(&mut vm, "Calls.plain()Ljava/lang/Object;", &[]);
    let (class, message) = threw(vm.invoke("Calls.area(Ljava/lang/Object;)I", &[plain]).unwrap());
    assert_eq!(class, "java/lang/IncompatibleClassChangeError");
    assert_eq!(
        message.as_deref(),
        Some("class java/lang/Object does not implement the requested interface Shape")
    );
}

#[test]
fn test_object_method_through_interface() {
    let mut vm = machine();
    let a = object(&mut vm, "Calls.rect(II)Ljava/lang/Object;", &[Value::Int(1), Value::Int(1)]);
    let b = object(&mut vm, "Calls.rect(II)Ljava/lang/Object;", &[Value::Int(1), Value::Int(1)]);
    let same = "Calls.same(Ljava/lang/Object;Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(same, &[a, a]).unwrap()), 1);
    assert_eq!(int(vm.invoke(same, &[a, b]).unwrap()), 0);
}

#[test]
fn test_class_implementing_a_single_interface_method() {
    let source = r#"
[[class]]
name = "I"
flags = ["interface"]

[[class.method]]
name = "f"
descriptor = "()I"
flags = ["public", "abstract"]

[[class]]
name = "C"
interfaces = ["I"]

[[class.method]]
name = "f"
descriptor = "()I"
flags = ["public"]
code = """
    bipush 7
    ireturn
"""

[[class.method]]
name = "call"
descriptor = "()I"
flags = ["static"]
code = """
    new C
    dup
    invokespecial java/lang/Object.<init>()V
    invokeinterface I.f()I
    ireturn
"""
"#;
    let program = Program::from_toml(source).unwrap();
    let mut vm = Machine::new(InterpreterConfig::default(), &program).unwrap();
    assert_eq!(int(vm.invoke("C.call()I", &[]).unwrap()), 7);
}

// ==================== Call sites ====================

#[test]
fn test_invokedynamic_with_appendix() {
    let mut vm = machine();
    assert_eq!(int(vm.invoke("Calls.tagged(I)I", &[Value::Int(10)]).unwrap()), 15);
    assert_eq!(int(vm.invoke("Calls.tagged(I)I", &[Value::Int(-5)]).unwrap()), 0);
}

#[test]
fn test_invokedynamic_without_appendix() {
    let mut vm = machine();
    let out = vm.invoke("Calls.doubled(J)J", &[Value::Long(1 << 40)]).unwrap();
    assert_eq!(out, Outcome::Returned(Value::Long(1 << 41)));
}

#[test]
fn test_invokehandle_passes_the_handle() {
    let mut vm = machine();
    assert_eq!(vm.bytecode_at("Calls.handled(I)I", 8).unwrap(), Some(Bytecode::Invokehandle));
    assert_eq!(int(vm.invoke("Calls.handled(I)I", &[Value::Int(7)]).unwrap()), 21);
    assert_eq!(int(vm.invoke("Calls.handled(I)I", &[Value::Int(8)]).unwrap()), 24);
}

#[test]
fn test_unbound_call_site_is_an_error() {
    let source = r#"
[[class]]
name = "Lonely"

[[class.method]]
name = "f"
descriptor = "()I"
flags = ["static"]
code = """
    invokedynamic nothing()I
    ireturn
"""
"#;
    let program = Program::from_toml(source).unwrap();
    let mut vm = Machine::new(InterpreterConfig::default(), &program).unwrap();
    assert!(vm.invoke("Lonely.f()I", &[]).is_err());
}
