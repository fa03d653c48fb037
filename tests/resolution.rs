//! Constant pool cache entries of a linked program, resolved by the
//! runtime and by racing host threads.

use std::thread;

use tosca::interp::cp_cache::{CacheEntryRef, EntryFlags};
use tosca::{Bytecode, InterpreterConfig, Machine, Outcome, Program, TosState, Value};

const SOURCE: &str = r#"
[[class]]
name = "Box"

[[class.field]]
name = "v"
descriptor = "I"

[[class.method]]
name = "get"
descriptor = "(LBox;)I"
flags = ["static"]
code = """
    aload_0
    getfield Box.v:I
    ireturn
"""

[[class.method]]
name = "put"
descriptor = "(LBox;I)V"
flags = ["static"]
code = """
    aload_0
    iload_1
    putfield Box.v:I
    return
"""

[[class.method]]
name = "make"
descriptor = "()LBox;"
flags = ["static"]
code = """
    new Box
    areturn
"""

[[class.method]]
name = "square"
descriptor = "(I)I"
flags = ["static"]
code = """
    iload_0
    iload_0
    imul
    ireturn
"""

[[class.method]]
name = "f"
descriptor = "(I)I"
flags = ["static"]
code = """
    iload_0
    invokestatic Box.square(I)I
    iconst_1
    iadd
    ireturn
"""
"#;

fn machine() -> Machine {
    let program = Program::from_toml(SOURCE).unwrap();
    Machine::new(InterpreterConfig::default(), &program).unwrap()
}

/// Cache entry of `Box` whose member reference names `name`.
fn entry_for(vm: &Machine, name: &str) -> CacheEntryRef {
    let universe = vm.universe();
    let k = universe.klass_id("Box").unwrap();
    let info = universe.klass(k);
    let index = info
        .cache_slots
        .iter()
        .position(|slot| info.pool.member_ref(slot.cp_index).is_some_and(|m| m.name == name))
        .unwrap();
    CacheEntryRef::at(info.cache, index as u16)
}

#[test]
fn test_entries_start_unresolved() {
    let vm = machine();
    let mem = vm.memory();
    let call = entry_for(&vm, "square");
    assert!(!call.is_resolved(&mem, Bytecode::Invokestatic).unwrap());
    let field = entry_for(&vm, "v");
    assert!(!field.is_resolved(&mem, Bytecode::Getfield).unwrap());
    assert!(!field.is_resolved(&mem, Bytecode::Putfield).unwrap());
}

#[test]
fn test_runtime_resolves_a_field_entry() {
    let mut vm = machine();
    let Outcome::Returned(obj) = vm.invoke("Box.make()LBox;", &[]).unwrap() else {
        panic!("expected an object");
    };
    let field = entry_for(&vm, "v");
    let mem = vm.memory();

    vm.invoke("Box.put(LBox;I)V", &[obj, Value::Int(41)]).unwrap();
    // Either access resolves both halves of a non-final field.
    assert!(field.is_resolved(&mem, Bytecode::Putfield).unwrap());
    assert!(field.is_resolved(&mem, Bytecode::Getfield).unwrap());

    assert_eq!(vm.invoke("Box.get(LBox;)I", &[obj]).unwrap(), Outcome::Returned(Value::Int(41)));
    let entry = field.load(&mem).unwrap();
    assert_eq!(entry.flags.tos_state(), Some(TosState::Itos));
    assert!(entry.flags.is_field_entry());
    assert_eq!(vm.bytecode_at("Box.get(LBox;)I", 1).unwrap(), Some(Bytecode::FastIgetfield));
}

#[test]
fn test_racing_resolution_of_one_entry() {
    let mut vm = machine();
    let (method, flags) = {
        let universe = vm.universe();
        let k = universe.klass_id("Box").unwrap();
        let m = universe.find_method(k, "square", "(I)I").unwrap();
        (universe.method(m).addr, EntryFlags::method(TosState::Itos, 1))
    };
    let call = entry_for(&vm, "square");
    let mem = vm.memory();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mem = mem.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    call.set_direct_call(&mem, Bytecode::Invokestatic, method, flags).unwrap();
                    let entry = call.load(&mem).unwrap();
                    if call.is_resolved(&mem, Bytecode::Invokestatic).unwrap() {
                        assert_eq!(entry.f1, method);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entry = call.load(&mem).unwrap();
    assert_eq!(entry.bytecode_1(), Bytecode::Invokestatic as u8);
    assert_eq!(entry.flags.parameter_size(), 1);
    assert_eq!(vm.invoke("Box.f(I)I", &[Value::Int(9)]).unwrap(), Outcome::Returned(Value::Int(82)));
}
