//! Objects: fields, statics and class initialization, allocation, type
//! checks, exceptions and monitors.

use tosca::runtime::NarrowOopMode;
use tosca::{InterpreterConfig, Machine, Outcome, Program, Value};

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

fn threw(out: Outcome) -> (String, Option<String>) {
    match out {
        Outcome::Threw { class, message, .. } => (class, message),
        other => panic!("expected an exception, got {:?}", other),
    }
}

const POINT: &str = r#"
[[class]]
name = "Point"

[[class.field]]
name = "x"
descriptor = "I"

[[class.field]]
name = "y"
descriptor = "J"

[[class.field]]
name = "next"
descriptor = "LPoint;"

[[class.method]]
name = "<init>"
descriptor = "(IJ)V"
code = """
    aload_0
    invokespecial java/lang/Object.<init>()V
    aload_0
    iload_1
    putfield Point.x:I
    aload_0
    lload_2
    putfield Point.y:J
    return
"""

[[class.method]]
name = "sum"
descriptor = "()J"
code = """
    aload_0
    getfield Point.x:I
    i2l
    aload_0
    getfield Point.y:J
    ladd
    lreturn
"""

[[class.method]]
name = "make"
descriptor = "(IJ)J"
flags = ["static"]
code = """
    new Point
    dup
    iload_0
    lload_1
    invokespecial Point.<init>(IJ)V
    invokevirtual Point.sum()J
    lreturn
"""

[[class.method]]
name = "blank"
descriptor = "()I"
flags = ["static"]
code = """
    new Point
    astore_0
    aload_0
    getfield Point.x:I
    aload_0
    getfield Point.y:J
    l2i
    ior
    aload_0
    getfield Point.next:LPoint;
    ifnull zero
    iconst_1
    ior
zero:
    ireturn
"""

[[class.method]]
name = "chain"
descriptor = "()I"
flags = ["static"]
code = """
    new Point
    dup
    iconst_1
    lconst_0
    invokespecial Point.<init>(IJ)V
    astore_0
    new Point
    dup
    iconst_2
    lconst_0
    invokespecial Point.<init>(IJ)V
    astore_1
    aload_0
    aload_1
    putfield Point.next:LPoint;
    aload_0
    getfield Point.next:LPoint;
    aload_1
    if_acmpne different
    aload_0
    getfield Point.next:LPoint;
    getfield Point.x:I
    ireturn
different:
    iconst_m1
    ireturn
"""

[[class.method]]
name = "nullX"
descriptor = "()I"
flags = ["static"]
code = """
    aconst_null
    checkcast Point
    getfield Point.x:I
    ireturn
"""
"#;

// ==================== Fields ====================

#[test]
fn test_instance_fields() {
    let mut vm = machine(POINT);
    let out = vm.invoke("Point.make(IJ)J", &[Value::Int(-4), Value::Long(1 << 33)]).unwrap();
    assert_eq!(out, Outcome::Returned(Value::Long((1 << 33) - 4)));
    // Second run goes through the quickened field accessors.
    let out = vm.invoke("Point.make(IJ)J", &[Value::Int(3), Value::Long(4)]).unwrap();
    assert_eq!(out, Outcome::Returned(Value::Long(7)));
}

#[test]
fn test_new_object_is_zeroed_over_garbage() {
    for (use_tlab, zero_tlab) in [(true, false), (true, true), (false, false)] {
        let config = InterpreterConfig {
            use_tlab,
            zero_tlab,
            ..Default::default()
        };
        let mut vm = machine_with(config, POINT);
        for _ in 0..3 {
            assert_eq!(int(vm.invoke("Point.blank()I", &[]).unwrap()), 0, "use_tlab={use_tlab} zero_tlab={zero_tlab}");
        }
    }
}

#[test]
fn test_reference_fields_in_every_oop_mode() {
    let modes = [
        None,
        Some(NarrowOopMode::Unscaled),
        Some(NarrowOopMode::ZeroBased),
        Some(NarrowOopMode::HeapBased),
        Some(NarrowOopMode::Disjoint),
    ];
    for mode in modes {
        let config = InterpreterConfig {
            compressed_oops: mode,
            ..Default::default()
        };
        let mut vm = machine_with(config, POINT);
        assert_eq!(int(vm.invoke("Point.chain()I", &[]).unwrap()), 2, "{mode:?}");
        assert_eq!(int(vm.invoke("Point.chain()I", &[]).unwrap()), 2, "{mode:?}");
    }
}

#[test]
fn test_field_access_on_null() {
    for (implicit, trap) in [(true, false), (false, false), (false, true)] {
        let config = InterpreterConfig {
            implicit_null_checks: implicit,
            trap_based_null_checks: trap,
            ..Default::default()
        };
        let mut vm = machine_with(config, POINT);
        let (class, _) = threw(vm.invoke("Point.nullX()I", &[]).unwrap());
        assert_eq!(class, "java/lang/NullPointerException");
    }
}

const COUNTER: &str = r#"
[[class]]
name = "Counter"

[[class.field]]
name = "count"
descriptor = "I"
flags = ["static"]

[[class.field]]
name = "inits"
descriptor = "I"
flags = ["static"]

[[class.field]]
name = "total"
descriptor = "J"
flags = ["static", "volatile"]

[[class.field]]
name = "LIMIT"
descriptor = "I"
flags = ["static", "final"]

[[class.method]]
name = "<clinit>"
descriptor = "()V"
flags = ["static"]
code = """
    getstatic Counter.inits:I
    iconst_1
    iadd
    putstatic Counter.inits:I
    bipush 100
    putstatic Counter.count:I
    bipush 7
    putstatic Counter.LIMIT:I
    return
"""

[[class.method]]
name = "bump"
descriptor = "()I"
flags = ["static"]
code = """
    getstatic Counter.count:I
    iconst_1
    iadd
    dup
    putstatic Counter.count:I
    dup
    i2l
    getstatic Counter.total:J
    ladd
    putstatic Counter.total:J
    ireturn
"""

[[class]]
name = "Other"

[[class.method]]
name = "limit"
descriptor = "()I"
flags = ["static"]
code = """
    getstatic Counter.LIMIT:I
    ireturn
"""

[[class.method]]
name = "tamper"
descriptor = "()V"
flags = ["static"]
code = """
    iconst_0
    putstatic Counter.LIMIT:I
    return
"""
"#;

#[test]
fn test_static_fields_and_initializer() {
    let mut vm = machine(COUNTER);
    assert_eq!(int(vm.invoke("Counter.bump()I", &[]).unwrap()), 101);
    assert_eq!(int(vm.invoke("Counter.bump()I", &[]).unwrap()), 102);
    assert_eq!(vm.get_static("Counter", "inits").unwrap(), Value::Int(1));
    assert_eq!(vm.get_static("Counter", "total").unwrap(), Value::Long(203));
    assert_eq!(int(vm.invoke("Other.limit()I", &[]).unwrap()), 7);
}

#[test]
fn test_final_static_written_from_another_class() {
    let mut vm = machine(COUNTER);
    assert_eq!(int(vm.invoke("Other.limit()I", &[]).unwrap()), 7);
    let (class, _) = threw(vm.invoke("Other.tamper()V", &[]).unwrap());
    assert_eq!(class, "java/lang/IllegalAccessError");
    assert_eq!(vm.get_static("Counter", "LIMIT").unwrap(), Value::Int(7));
}

#[test]
fn test_failing_initializer() {
    let source = r#"
[[class]]
name = "Broken"

[[class.field]]
name = "value"
descriptor = "I"
flags = ["static"]

[[class.method]]
name = "<clinit>"
descriptor = "()V"
flags = ["static"]
code = """
    iconst_1
    iconst_0
    idiv
    putstatic Broken.value:I
    return
"""

[[class.method]]
name = "get"
descriptor = "()I"
flags = ["static"]
code = """
    getstatic Broken.value:I
    ireturn
"""
"#;
    let mut vm = machine(source);
    let (class, message) = threw(vm.invoke("Broken.get()I", &[]).unwrap());
    assert_eq!(class, "java/lang/ExceptionInInitializerError");
    assert_eq!(message.as_deref(), Some("java/lang/ArithmeticException: / by zero"));

    let (class, message) = threw(vm.invoke("Broken.get()I", &[]).unwrap());
    assert_eq!(class, "java/lang/NoClassDefFoundError");
    assert_eq!(message.as_deref(), Some("Could not initialize class Broken"));
}

#[test]
fn test_unresolvable_members() {
    let source = r#"
[[class]]
name = "A"

[[class.field]]
name = "f"
descriptor = "I"

[[class.method]]
name = "missingField"
descriptor = "()I"
flags = ["static"]
code = """
    new A
    getfield A.g:I
    ireturn
"""

[[class.method]]
name = "missingMethod"
descriptor = "()V"
flags = ["static"]
code = """
    invokestatic A.nothing()V
    return
"""

[[class.method]]
name = "staticMismatch"
descriptor = "()I"
flags = ["static"]
code = """
    getstatic A.f:I
    ireturn
"""
"#;
    let mut vm = machine(source);
    let (class, message) = threw(vm.invoke("A.missingField()I", &[]).unwrap());
    assert_eq!(class, "java/lang/NoSuchFieldError");
    assert_eq!(message.as_deref(), Some("g"));

    let (class, _) = threw(vm.invoke("A.missingMethod()V", &[]).unwrap());
    assert_eq!(class, "java/lang/NoSuchMethodError");

    let (class, _) = threw(vm.invoke("A.staticMismatch()I", &[]).unwrap());
    assert_eq!(class, "java/lang/IncompatibleClassChangeError");
}

// ==================== Type checks ====================

const SHAPES: &str = r#"
[[class]]
name = "Shape"
flags = ["abstract"]

[[class]]
name = "Square"
super = "Shape"

[[class]]
name = "Circle"
super = "Shape"

[[class]]
name = "Check"

[[class.method]]
name = "isShape"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    instanceof Shape
    ireturn
"""

[[class.method]]
name = "asSquare"
descriptor = "(Ljava/lang/Object;)Ljava/lang/Object;"
flags = ["static"]
code = """
    aload_0
    checkcast Square
    areturn
"""

[[class.method]]
name = "square"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Square
    areturn
"""

[[class.method]]
name = "circle"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Circle
    areturn
"""

[[class.method]]
name = "abstractShape"
descriptor = "()Ljava/lang/Object;"
flags = ["static"]
code = """
    new Shape
    areturn
"""

[[class.method]]
name = "storeIntoSquares"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    iconst_2
    anewarray Square
    astore_1
    aload_1
    checkcast [Ljava/lang/Object;
    iconst_0
    aload_0
    aastore
    aload_1
    arraylength
    ireturn
"""

[[class.method]]
name = "squaresAreShapes"
descriptor = "()I"
flags = ["static"]
code = """
    iconst_1
    anewarray Square
    instanceof [LShape;
    ireturn
"""
"#;

fn object(vm: &mut Machine, target: &str) -> Value {
    vm.invoke(target, &[]).unwrap().value().unwrap()
}

#[test]
fn test_instanceof_and_checkcast() {
    let mut vm = machine(SHAPES);
    let square = object(&mut vm, "Check.square()Ljava/lang/Object;");
    let circle = object(&mut vm, "Check.circle()Ljava/lang/Object;");
    let is_shape = "Check.isShape(Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(is_shape, &[square]).unwrap()), 1);
    assert_eq!(int(vm.invoke(is_shape, &[circle]).unwrap()), 1);
    assert_eq!(int(vm.invoke(is_shape, &[Value::NULL]).unwrap()), 0);
    let string = vm.new_string("s").unwrap();
    assert_eq!(int(vm.invoke(is_shape, &[string]).unwrap()), 0);

    let as_square = "Check.asSquare(Ljava/lang/Object;)Ljava/lang/Object;";
    assert_eq!(vm.invoke(as_square, &[square]).unwrap(), Outcome::Returned(square));
    assert_eq!(vm.invoke(as_square, &[Value::NULL]).unwrap(), Outcome::Returned(Value::NULL));
    let (class, message) = threw(vm.invoke(as_square, &[circle]).unwrap());
    assert_eq!(class, "java/lang/ClassCastException");
    assert_eq!(message.as_deref(), Some("class Circle cannot be cast to class Square"));

    assert_eq!(int(vm.invoke("Check.squaresAreShapes()I", &[]).unwrap()), 1);
}

#[test]
fn test_array_store_check() {
    let mut vm = machine(SHAPES);
    let square = object(&mut vm, "Check.square()Ljava/lang/Object;");
    let circle = object(&mut vm, "Check.circle()Ljava/lang/Object;");
    let store = "Check.storeIntoSquares(Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(store, &[square]).unwrap()), 2);
    assert_eq!(int(vm.invoke(store, &[Value::NULL]).unwrap()), 2);
    let (class, message) = threw(vm.invoke(store, &[circle]).unwrap());
    assert_eq!(class, "java/lang/ArrayStoreException");
    assert_eq!(message.as_deref(), Some("Circle"));
}

#[test]
fn test_new_abstract_class() {
    let mut vm = machine(SHAPES);
    let (class, message) = threw(vm.invoke("Check.abstractShape()Ljava/lang/Object;", &[]).unwrap());
    assert_eq!(class, "java/lang/InstantiationError");
    assert_eq!(message.as_deref(), Some("Shape"));
}

// ==================== Exceptions ====================

#[test]
fn test_athrow() {
    let source = r#"
[[class]]
name = "Thrower"

[[class.method]]
name = "boom"
descriptor = "()I"
flags = ["static"]
code = """
    new java/lang/RuntimeException
    dup
    ldc "boom"
    invokespecial java/lang/RuntimeException.<init>(Ljava/lang/String;)V
    athrow
"""

[[class.method]]
name = "deep"
descriptor = "(I)I"
flags = ["static"]
code = """
    iload_0
    ifeq bottom
    iload_0
    iconst_1
    isub
    invokestatic Thrower.deep(I)I
    ireturn
bottom:
    invokestatic Thrower.boom()I
    ireturn
"""

[[class.method]]
name = "throwNull"
descriptor = "()V"
flags = ["static"]
code = """
    aconst_null
    athrow
"""
"#;
    let mut vm = machine(source);
    let (class, message) = threw(vm.invoke("Thrower.boom()I", &[]).unwrap());
    assert_eq!(class, "java/lang/RuntimeException");
    assert_eq!(message.as_deref(), Some("boom"));

    let (class, _) = threw(vm.invoke("Thrower.deep(I)I", &[Value::Int(20)]).unwrap());
    assert_eq!(class, "java/lang/RuntimeException");

    let (class, _) = threw(vm.invoke("Thrower.throwNull()V", &[]).unwrap());
    assert_eq!(class, "java/lang/NullPointerException");
}

// ==================== Monitors ====================

const LOCKS: &str = r#"
[[class]]
name = "Locks"

[[class.method]]
name = "twice"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    monitorenter
    aload_0
    monitorenter
    aload_0
    monitorexit
    aload_0
    monitorexit
    iconst_1
    ireturn
"""

[[class.method]]
name = "nested"
descriptor = "(Ljava/lang/Object;Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    monitorenter
    iconst_1
    iconst_2
    aload_1
    monitorenter
    iadd
    aload_1
    monitorexit
    aload_0
    monitorexit
    ireturn
"""

[[class.method]]
name = "exitUnowned"
descriptor = "(Ljava/lang/Object;)V"
flags = ["static"]
code = """
    aload_0
    monitorexit
    return
"""

[[class.method]]
name = "leak"
descriptor = "(Ljava/lang/Object;)V"
flags = ["static"]
code = """
    aload_0
    monitorenter
    return
"""

[[class.method]]
name = "count"
descriptor = "(I)I"
flags = ["static", "synchronized"]
code = """
    iload_0
    ifle done
    iload_0
    iconst_1
    isub
    invokestatic Locks.count(I)I
    iconst_1
    iadd
    ireturn
done:
    iconst_0
    ireturn
"""

[[class.method]]
name = "fail"
descriptor = "(Ljava/lang/Object;)I"
flags = ["static"]
code = """
    aload_0
    monitorenter
    iconst_1
    iconst_0
    idiv
    ireturn
"""
"#;

fn new_object(vm: &mut Machine) -> Value {
    vm.new_string("lock").unwrap()
}

#[test]
fn test_recursive_monitor() {
    let mut vm = machine(LOCKS);
    let obj = new_object(&mut vm);
    assert_eq!(int(vm.invoke("Locks.twice(Ljava/lang/Object;)I", &[obj]).unwrap()), 1);
    assert_eq!(vm.held_monitors(), 0);
}

#[test]
fn test_monitor_moves_expression_stack() {
    let mut vm = machine(LOCKS);
    let a = new_object(&mut vm);
    let b = new_object(&mut vm);
    let nested = "Locks.nested(Ljava/lang/Object;Ljava/lang/Object;)I";
    assert_eq!(int(vm.invoke(nested, &[a, b]).unwrap()), 3);
    assert_eq!(vm.held_monitors(), 0);
}

#[test]
fn test_illegal_monitor_state() {
    let mut vm = machine(LOCKS);
    let obj = new_object(&mut vm);
    let (class, _) = threw(vm.invoke("Locks.exitUnowned(Ljava/lang/Object;)V", &[obj]).unwrap());
    assert_eq!(class, "java/lang/IllegalMonitorStateException");

    let (class, _) = threw(vm.invoke("Locks.leak(Ljava/lang/Object;)V", &[obj]).unwrap());
    assert_eq!(class, "java/lang/IllegalMonitorStateException");
    assert_eq!(vm.held_monitors(), 0);

    let (class, _) = threw(vm.invoke("Locks.exitUnowned(Ljava/lang/Object;)V", &[Value::NULL]).unwrap());
    assert_eq!(class, "java/lang/NullPointerException");
}

#[test]
fn test_synchronized_method() {
    let mut vm = machine(LOCKS);
    assert_eq!(int(vm.invoke("Locks.count(I)I", &[Value::Int(10)]).unwrap()), 10);
    assert_eq!(vm.held_monitors(), 0);
}

#[test]
fn test_exception_releases_monitors() {
    let mut vm = machine(LOCKS);
    let obj = new_object(&mut vm);
    let (class, _) = threw(vm.invoke("Locks.fail(Ljava/lang/Object;)I", &[obj]).unwrap());
    assert_eq!(class, "java/lang/ArithmeticException");
    assert_eq!(vm.held_monitors(), 0);
}
