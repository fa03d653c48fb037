//! Straight-line bytecode semantics, run through the generated templates.

use tosca::{InterpreterConfig, Machine, Outcome, Program, Value};

fn machine_with(config: InterpreterConfig, source: &str) -> Machine {
    let program = Program::from_toml(source).unwrap();
    Machine::new(config, &program).unwrap()
}

fn machine(source: &str) -> Machine {
    machine_with(InterpreterConfig::default(), source)
}

/// A program with one static method `T.f` of `descriptor`.
fn single(descriptor: &str, code: &str) -> String {
    format!(
        r#"
[[class]]
name = "T"

[[class.method]]
name = "f"
descriptor = "{descriptor}"
flags = ["static"]
code = """
{code}
"""
"#
    )
}

fn call(source: &str, descriptor: &str, args: &[Value]) -> Outcome {
    let mut vm = machine(source);
    vm.invoke(&format!("T.f{descriptor}"), args).unwrap()
}

fn int(out: Outcome) -> i32 {
    match out {
        Outcome::Returned(Value::Int(v)) => v,
        other => panic!("expected an int, got {:?}", other),
    }
}

fn long(out: Outcome) -> i64 {
    match out {
        Outcome::Returned(Value::Long(v)) => v,
        other => panic!("expected a long, got {:?}", other),
    }
}

fn threw(out: Outcome) -> (String, Option<String>) {
    match out {
        Outcome::Threw { class, message, .. } => (class, message),
        other => panic!("expected an exception, got {:?}", other),
    }
}

// ==================== Constants and arithmetic ====================

#[test]
fn test_add_two_constants() {
    let source = single("()I", "iconst_2\niconst_3\niadd\nistore_0\niload_0\nireturn");
    assert_eq!(int(call(&source, "()I", &[])), 5);
}

#[test]
fn test_add_two_constants_in_every_null_check_mode() {
    let source = single("()I", "iconst_2\niconst_3\niadd\nistore_0\niload_0\nireturn");
    for (implicit, trap) in [(true, false), (false, false), (false, true)] {
        let config = InterpreterConfig {
            implicit_null_checks: implicit,
            trap_based_null_checks: trap,
            ..Default::default()
        };
        let mut vm = machine_with(config, &source);
        assert_eq!(vm.invoke("T.f()I", &[]).unwrap(), Outcome::Returned(Value::Int(5)));
    }
}

#[test]
fn test_integer_arithmetic() {
    let source = single(
        "(II)I",
        "iload_0\niload_1\nimul\niconst_2\nisub\niconst_3\nidiv\niconst_5\nirem\nireturn",
    );
    assert_eq!(int(call(&source, "(II)I", &[Value::Int(7), Value::Int(6)])), 3);
    assert_eq!(int(call(&source, "(II)I", &[Value::Int(-7), Value::Int(6)])), -4);
}

#[test]
fn test_division_by_zero() {
    let source = single("(II)I", "iload_0\niload_1\nidiv\nireturn");
    let (class, message) = threw(call(&source, "(II)I", &[Value::Int(1), Value::Int(0)]));
    assert_eq!(class, "java/lang/ArithmeticException");
    assert_eq!(message.as_deref(), Some("/ by zero"));

    let source = single("(JJ)J", "lload_0\nlload_2\nlrem\nlreturn");
    let (class, _) = threw(call(&source, "(JJ)J", &[Value::Long(1), Value::Long(0)]));
    assert_eq!(class, "java/lang/ArithmeticException");
}

#[test]
fn test_min_value_divided_by_minus_one() {
    let source = single("(II)I", "iload_0\niload_1\nidiv\nireturn");
    let args = [Value::Int(i32::MIN), Value::Int(-1)];
    assert_eq!(int(call(&source, "(II)I", &args)), i32::MIN);

    let source = single("(II)I", "iload_0\niload_1\nirem\nireturn");
    assert_eq!(int(call(&source, "(II)I", &args)), 0);
}

#[test]
fn test_shifts_mask_their_count() {
    let source = single("(II)I", "iload_0\niload_1\nishl\nireturn");
    assert_eq!(int(call(&source, "(II)I", &[Value::Int(1), Value::Int(33)])), 2);

    let source = single("(JI)J", "lload_0\niload_2\nlushr\nlreturn");
    assert_eq!(long(call(&source, "(JI)J", &[Value::Long(-1), Value::Int(60)])), 0xF);

    let source = single("(II)I", "iload_0\niload_1\niushr\nireturn");
    assert_eq!(int(call(&source, "(II)I", &[Value::Int(-16), Value::Int(28)])), 0xF);
}

#[test]
fn test_long_arithmetic_and_compare() {
    let source = single("(JJ)I", "lload_0\nlload_2\nlcmp\nireturn");
    for (a, b, expected) in [(1i64, 2i64, -1), (2, 1, 1), (5, 5, 0), (i64::MIN, i64::MAX, -1)] {
        assert_eq!(int(call(&source, "(JJ)I", &[Value::Long(a), Value::Long(b)])), expected);
    }

    let source = single("()J", "ldc2_w 4000000000L\nldc2_w 3L\nlmul\nlneg\nlreturn");
    assert_eq!(long(call(&source, "()J", &[])), -12_000_000_000);
}

#[test]
fn test_float_arithmetic() {
    let source = single("(FF)F", "fload_0\nfload_1\nfrem\nfreturn");
    assert_eq!(
        call(&source, "(FF)F", &[Value::Float(7.5), Value::Float(2.0)]),
        Outcome::Returned(Value::Float(1.5))
    );

    let source = single("(DD)D", "dload_0\ndload_2\ndmul\ndload_2\ndrem\ndreturn");
    assert_eq!(
        call(&source, "(DD)D", &[Value::Double(2.5), Value::Double(4.0)]),
        Outcome::Returned(Value::Double(2.0))
    );
}

#[test]
fn test_float_compare_with_nan() {
    let cmpl = single("(FF)I", "fload_0\nfload_1\nfcmpl\nireturn");
    let cmpg = single("(FF)I", "fload_0\nfload_1\nfcmpg\nireturn");
    let nan = [Value::Float(f32::NAN), Value::Float(1.0)];
    assert_eq!(int(call(&cmpl, "(FF)I", &nan)), -1);
    assert_eq!(int(call(&cmpg, "(FF)I", &nan)), 1);
    assert_eq!(int(call(&cmpl, "(FF)I", &[Value::Float(2.0), Value::Float(1.0)])), 1);
    assert_eq!(int(call(&cmpg, "(FF)I", &[Value::Float(1.0), Value::Float(2.0)])), -1);
    assert_eq!(int(call(&cmpg, "(FF)I", &[Value::Float(1.0), Value::Float(1.0)])), 0);
}

// ==================== Conversions ====================

#[test]
fn test_float_to_int_saturates() {
    let d2i = single("(D)I", "dload_0\nd2i\nireturn");
    for (input, expected) in [
        (f64::NAN, 0),
        (1e20, i32::MAX),
        (-1e20, i32::MIN),
        (3.9, 3),
        (-3.9, -3),
    ] {
        assert_eq!(int(call(&d2i, "(D)I", &[Value::Double(input)])), expected, "d2i({input})");
    }

    let f2l = single("(F)J", "fload_0\nf2l\nlreturn");
    assert_eq!(long(call(&f2l, "(F)J", &[Value::Float(f32::NAN)])), 0);
    assert_eq!(long(call(&f2l, "(F)J", &[Value::Float(f32::INFINITY)])), i64::MAX);
}

#[test]
fn test_narrowing_conversions() {
    let i2b = single("(I)I", "iload_0\ni2b\nireturn");
    let i2c = single("(I)I", "iload_0\ni2c\nireturn");
    let i2s = single("(I)I", "iload_0\ni2s\nireturn");
    assert_eq!(int(call(&i2b, "(I)I", &[Value::Int(200)])), -56);
    assert_eq!(int(call(&i2c, "(I)I", &[Value::Int(-1)])), 65535);
    assert_eq!(int(call(&i2s, "(I)I", &[Value::Int(70000)])), 4464);

    let l2i = single("(J)I", "lload_0\nl2i\nireturn");
    assert_eq!(int(call(&l2i, "(J)I", &[Value::Long(0x1_8000_0000)])), i32::MIN);

    let i2d = single("(I)D", "iload_0\ni2d\nldc2_w 0.5\ndadd\ndreturn");
    assert_eq!(
        call(&i2d, "(I)D", &[Value::Int(-3)]),
        Outcome::Returned(Value::Double(-2.5))
    );
}

// ==================== Control flow ====================

#[test]
fn test_counting_loop() {
    let source = single(
        "(I)I",
        r#"
    iconst_0
    istore_1
    iconst_1
    istore_2
loop:
    iload_2
    iload_0
    if_icmpgt done
    iload_1
    iload_2
    iadd
    istore_1
    iinc 2 1
    goto loop
done:
    iload_1
    ireturn"#,
    );
    assert_eq!(int(call(&source, "(I)I", &[Value::Int(100)])), 5050);
    assert_eq!(int(call(&source, "(I)I", &[Value::Int(0)])), 0);
}

#[test]
fn test_wide_iinc() {
    let source = single("(I)I", "wide iinc 0 1000\nwide iinc 0 -3\niload_0\nireturn");
    assert_eq!(int(call(&source, "(I)I", &[Value::Int(1)])), 998);
}

#[test]
fn test_tableswitch() {
    let source = single(
        "(I)I",
        r#"
    iload_0
    tableswitch 0 default=other zero one two
zero:
    bipush 10
    ireturn
one:
    bipush 20
    ireturn
two:
    bipush 30
    ireturn
other:
    iconst_m1
    ireturn"#,
    );
    for (key, expected) in [(-1, -1), (0, 10), (1, 20), (2, 30), (3, -1), (i32::MIN, -1)] {
        assert_eq!(int(call(&source, "(I)I", &[Value::Int(key)])), expected, "key {key}");
    }
}

fn lookupswitch(keys: &[i32]) -> String {
    let pairs: Vec<String> = keys.iter().map(|k| format!("{k}:hit")).collect();
    single(
        "(I)I",
        &format!(
            r#"
    iload_0
    lookupswitch default=miss {}
hit:
    iload_0
    ireturn
miss:
    iconst_m1
    ireturn"#,
            pairs.join(" ")
        ),
    )
}

#[test]
fn test_linear_lookupswitch() {
    let source = lookupswitch(&[-5, 7]);
    let mut vm = machine(&source);
    for (key, expected) in [(-5, -5), (7, 7), (0, -1), (8, -1)] {
        assert_eq!(int(vm.invoke("T.f(I)I", &[Value::Int(key)]).unwrap()), expected);
    }
}

#[test]
fn test_binary_lookupswitch() {
    let keys = [-1000, -3, 0, 4, 99, 100_000, i32::MAX];
    let source = lookupswitch(&keys);
    let mut vm = machine(&source);
    for key in keys {
        assert_eq!(int(vm.invoke("T.f(I)I", &[Value::Int(key)]).unwrap()), key);
    }
    for key in [i32::MIN, -999, 1, 98, 100_001] {
        assert_eq!(int(vm.invoke("T.f(I)I", &[Value::Int(key)]).unwrap()), -1);
    }
}

// ==================== Arrays ====================

#[test]
fn test_int_array() {
    let source = single(
        "(I)I",
        r#"
    iload_0
    newarray int
    astore_1
    iconst_0
    istore_2
fill:
    iload_2
    aload_1
    arraylength
    if_icmpge sum
    aload_1
    iload_2
    iload_2
    iload_2
    imul
    iastore
    iinc 2 1
    goto fill
sum:
    iconst_0
    istore_3
    iconst_0
    istore_2
next:
    iload_2
    aload_1
    arraylength
    if_icmpge done
    iload_3
    aload_1
    iload_2
    iaload
    iadd
    istore_3
    iinc 2 1
    goto next
done:
    iload_3
    ireturn"#,
    );
    assert_eq!(int(call(&source, "(I)I", &[Value::Int(5)])), 30);
    assert_eq!(int(call(&source, "(I)I", &[Value::Int(0)])), 0);
}

#[test]
fn test_array_bounds() {
    let source = single("(I)I", "iconst_5\nnewarray int\niload_0\niaload\nireturn");
    let (class, message) = threw(call(&source, "(I)I", &[Value::Int(5)]));
    assert_eq!(class, "java/lang/ArrayIndexOutOfBoundsException");
    assert_eq!(message.as_deref(), Some("Index 5 out of bounds for length 5"));

    let (_, message) = threw(call(&source, "(I)I", &[Value::Int(-1)]));
    assert_eq!(message.as_deref(), Some("Index -1 out of bounds for length 5"));

    let source = single("(I)I", "iload_0\nnewarray long\narraylength\nireturn");
    let (class, message) = threw(call(&source, "(I)I", &[Value::Int(-2)]));
    assert_eq!(class, "java/lang/NegativeArraySizeException");
    assert_eq!(message.as_deref(), Some("-2"));
}

#[test]
fn test_sub_word_array_elements() {
    let bytes = single("()I", "iconst_1\nnewarray byte\ndup\niconst_0\niconst_m1\nbastore\niconst_0\nbaload\nireturn");
    assert_eq!(int(call(&bytes, "()I", &[])), -1);

    let booleans = single("()I", "iconst_1\nnewarray boolean\ndup\niconst_0\niconst_3\nbastore\niconst_0\nbaload\nireturn");
    assert_eq!(int(call(&booleans, "()I", &[])), 1);

    let chars = single("()I", "iconst_1\nnewarray char\ndup\niconst_0\niconst_m1\ncastore\niconst_0\ncaload\nireturn");
    assert_eq!(int(call(&chars, "()I", &[])), 65535);

    let shorts = single("()I", "iconst_1\nnewarray short\ndup\niconst_0\nldc 40000\nsastore\niconst_0\nsaload\nireturn");
    assert_eq!(int(call(&shorts, "()I", &[])), -25536);
}

#[test]
fn test_multianewarray() {
    let source = single(
        "()I",
        r#"
    iconst_3
    iconst_4
    multianewarray [[I 2
    dup
    arraylength
    istore_0
    iconst_2
    aaload
    arraylength
    iload_0
    bipush 10
    imul
    iadd
    ireturn"#,
    );
    assert_eq!(int(call(&source, "()I", &[])), 34);
}

// ==================== Constants ====================

#[test]
fn test_ldc_string_is_interned() {
    let source = single("()Ljava/lang/String;", "ldc \"hello\"\nareturn");
    let mut vm = machine(&source);
    let first = vm.invoke("T.f()Ljava/lang/String;", &[]).unwrap().value().unwrap();
    let second = vm.invoke("T.f()Ljava/lang/String;", &[]).unwrap().value().unwrap();
    assert_eq!(vm.string_value(&first).unwrap().as_deref(), Some("hello"));
    assert_eq!(first, second);
}

#[test]
fn test_string_methods() {
    let source = single(
        "()I",
        r#"
    ldc "tosca"
    dup
    invokevirtual java/lang/String.length()I
    istore_0
    iconst_1
    invokevirtual java/lang/String.charAt(I)C
    iload_0
    bipush 100
    imul
    iadd
    ireturn"#,
    );
    assert_eq!(int(call(&source, "()I", &[])), 500 + 'o' as i32);
}

#[test]
fn test_ldc_numbers_and_classes() {
    let source = single("()I", "ldc 123456\nldc -7\niadd\nireturn");
    assert_eq!(int(call(&source, "()I", &[])), 123449);

    let source = single("()F", "ldc 1.5\nldc 2.25\nfadd\nfreturn");
    assert_eq!(call(&source, "()F", &[]), Outcome::Returned(Value::Float(3.75)));

    let source = single("()Z", "ldc class T\nldc class T\nif_acmpne no\niconst_1\nireturn\nno:\niconst_0\nireturn");
    assert_eq!(call(&source, "()Z", &[]), Outcome::Returned(Value::Int(1)));
}

#[test]
fn test_bytecodes_without_rewriting() {
    let config = InterpreterConfig {
        rewrite_bytecodes: false,
        ..Default::default()
    };
    let source = lookupswitch(&[1, 2, 3, 4, 5, 6]);
    let mut vm = machine_with(config, &source);
    for _ in 0..2 {
        assert_eq!(int(vm.invoke("T.f(I)I", &[Value::Int(4)]).unwrap()), 4);
        assert_eq!(int(vm.invoke("T.f(I)I", &[Value::Int(7)]).unwrap()), -1);
    }
}
