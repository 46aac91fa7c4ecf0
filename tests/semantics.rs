use wasm_vm::{Executor, Imports, Module, ModuleAddr, Store, Trap, Value};

struct Instance {
    store: Store,
    executor: Executor,
    addr: ModuleAddr,
}

impl Instance {
    fn new(wat: &str) -> Self {
        let bytes = wat::parse_str(wat).unwrap();
        let module = Module::new(&bytes).unwrap();

        let mut store = Store::new();
        let executor = Executor::default();
        let addr = executor
            .instantiate(&mut store, &module, &Imports::new())
            .unwrap();

        Self {
            store,
            executor,
            addr,
        }
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Vec<Value> {
        self.executor
            .invoke_export(&mut self.store, self.addr, name, args)
            .unwrap()
    }

    fn trap(&mut self, name: &str, args: &[Value]) -> Option<Trap> {
        self.executor
            .invoke_export(&mut self.store, self.addr, name, args)
            .unwrap_err()
            .trap()
    }
}

#[test]
fn structured_control_flow() {
    let mut inst = Instance::new(
        r#"
        (module
          (func (export "sum") (param $n i32) (result i32) (local $acc i32)
            (block $done
              (loop $top
                (br_if $done (i32.eqz (local.get $n)))
                (local.set $acc (i32.add (local.get $acc) (local.get $n)))
                (local.set $n (i32.sub (local.get $n) (i32.const 1)))
                (br $top)))
            (local.get $acc))

          (func (export "classify") (param i32) (result i32)
            (block $c
              (block $b
                (block $a
                  (br_table $a $b $c (local.get 0)))
                (return (i32.const 10)))
              (return (i32.const 20)))
            (i32.const 30))

          (func (export "early") (param i32) (result i32)
            (if (local.get 0) (then (return (i32.const 1))))
            (i32.const 0))

          (func (export "select") (param i32) (result i32)
            (select (i32.const 1) (i32.const 2) (local.get 0)))

          (func (export "branch_value") (param i32) (result i32)
            (i32.add
              (i32.const 100)
              (block $out (result i32)
                (drop (br_if $out (i32.const 5) (local.get 0)))
                (i32.const 7)))))
        "#,
    );

    assert_eq!(inst.call("sum", &[Value::I32(10)]), [Value::I32(55)]);
    assert_eq!(inst.call("sum", &[Value::I32(0)]), [Value::I32(0)]);

    assert_eq!(inst.call("classify", &[Value::I32(0)]), [Value::I32(10)]);
    assert_eq!(inst.call("classify", &[Value::I32(1)]), [Value::I32(20)]);
    assert_eq!(inst.call("classify", &[Value::I32(2)]), [Value::I32(30)]);
    assert_eq!(inst.call("classify", &[Value::I32(-1)]), [Value::I32(30)]);

    assert_eq!(inst.call("early", &[Value::I32(1)]), [Value::I32(1)]);
    assert_eq!(inst.call("early", &[Value::I32(0)]), [Value::I32(0)]);

    assert_eq!(inst.call("select", &[Value::I32(1)]), [Value::I32(1)]);
    assert_eq!(inst.call("select", &[Value::I32(0)]), [Value::I32(2)]);

    assert_eq!(inst.call("branch_value", &[Value::I32(1)]), [Value::I32(105)]);
    assert_eq!(inst.call("branch_value", &[Value::I32(0)]), [Value::I32(107)]);
}

#[test]
fn multi_value() {
    let mut inst = Instance::new(
        r#"
        (module
          (func $swap (export "swap") (param i32 i32) (result i32 i32)
            (local.get 1) (local.get 0))
          (func (export "block_params") (result i32)
            (i32.const 6) (i32.const 7)
            (block (param i32 i32) (result i32) (i32.mul)))
          (func (export "sub_swapped") (param i32 i32) (result i32)
            (call $swap (local.get 0) (local.get 1))
            (i32.sub))
          (func (export "loop_params") (param i32) (result i32)
            (i32.const 0)
            (loop $l (param i32) (result i32)
              (i32.add (i32.const 1))
              (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
              (br_if $l (local.get 0))))
          (func (export "if_params") (param i32) (result i32)
            (i32.const 10)
            (if (param i32) (result i32) (local.get 0)
              (then (i32.const 1) (i32.add))
              (else (i32.const 1) (i32.sub)))))
        "#,
    );

    assert_eq!(
        inst.call("swap", &[Value::I32(1), Value::I32(2)]),
        [Value::I32(2), Value::I32(1)]
    );
    assert_eq!(inst.call("block_params", &[]), [Value::I32(42)]);
    assert_eq!(
        inst.call("sub_swapped", &[Value::I32(3), Value::I32(10)]),
        [Value::I32(7)]
    );
    assert_eq!(inst.call("loop_params", &[Value::I32(5)]), [Value::I32(5)]);
    assert_eq!(inst.call("if_params", &[Value::I32(1)]), [Value::I32(11)]);
    assert_eq!(inst.call("if_params", &[Value::I32(0)]), [Value::I32(9)]);
}

#[test]
fn integer_arithmetic() {
    let mut inst = Instance::new(
        r#"
        (module
          (func (export "div_s") (param i32 i32) (result i32) (i32.div_s (local.get 0) (local.get 1)))
          (func (export "div_u") (param i32 i32) (result i32) (i32.div_u (local.get 0) (local.get 1)))
          (func (export "rem_s") (param i32 i32) (result i32) (i32.rem_s (local.get 0) (local.get 1)))
          (func (export "add") (param i32 i32) (result i32) (i32.add (local.get 0) (local.get 1)))
          (func (export "shr_u") (param i32 i32) (result i32) (i32.shr_u (local.get 0) (local.get 1)))
          (func (export "rotl") (param i64 i64) (result i64) (i64.rotl (local.get 0) (local.get 1)))
          (func (export "clz") (param i32) (result i32) (i32.clz (local.get 0)))
          (func (export "popcnt") (param i64) (result i64) (i64.popcnt (local.get 0)))
          (func (export "extend8") (param i32) (result i32) (i32.extend8_s (local.get 0)))
          (func (export "extend_u") (param i32) (result i64) (i64.extend_i32_u (local.get 0)))
          (func (export "wrap") (param i64) (result i32) (i32.wrap_i64 (local.get 0)))
          (func (export "lt_u") (param i32 i32) (result i32) (i32.lt_u (local.get 0) (local.get 1))))
        "#,
    );

    let i32s = |a: i32, b: i32| [Value::I32(a), Value::I32(b)];

    assert_eq!(inst.call("div_s", &i32s(7, -2)), [Value::I32(-3)]);
    assert_eq!(inst.call("div_u", &i32s(-1, 2)), [Value::I32(i32::MAX)]);
    assert_eq!(inst.call("rem_s", &i32s(-7, 2)), [Value::I32(-1)]);
    assert_eq!(inst.call("rem_s", &i32s(i32::MIN, -1)), [Value::I32(0)]);
    assert_eq!(inst.call("add", &i32s(i32::MAX, 1)), [Value::I32(i32::MIN)]);
    assert_eq!(inst.call("shr_u", &i32s(-1, 33)), [Value::I32(i32::MAX)]);
    assert_eq!(inst.call("lt_u", &i32s(1, -1)), [Value::I32(1)]);

    assert_eq!(inst.trap("div_s", &i32s(1, 0)), Some(Trap::DivideByZero));
    assert_eq!(inst.trap("div_s", &i32s(i32::MIN, -1)), Some(Trap::IntegerOverflow));
    assert_eq!(inst.trap("rem_s", &i32s(1, 0)), Some(Trap::DivideByZero));

    assert_eq!(
        inst.call("rotl", &[Value::I64(1), Value::I64(65)]),
        [Value::I64(2)]
    );
    assert_eq!(inst.call("clz", &[Value::I32(1)]), [Value::I32(31)]);
    assert_eq!(inst.call("clz", &[Value::I32(0)]), [Value::I32(32)]);
    assert_eq!(inst.call("popcnt", &[Value::I64(-1)]), [Value::I64(64)]);
    assert_eq!(inst.call("extend8", &[Value::I32(0x80)]), [Value::I32(-128)]);
    assert_eq!(
        inst.call("extend_u", &[Value::I32(-1)]),
        [Value::I64(0xffff_ffff)]
    );
    assert_eq!(
        inst.call("wrap", &[Value::I64(0x1_0000_0005)]),
        [Value::I32(5)]
    );
}

#[test]
fn float_semantics() {
    let mut inst = Instance::new(
        r#"
        (module
          (func (export "min") (param f32 f32) (result f32) (f32.min (local.get 0) (local.get 1)))
          (func (export "max") (param f64 f64) (result f64) (f64.max (local.get 0) (local.get 1)))
          (func (export "nearest") (param f64) (result f64) (f64.nearest (local.get 0)))
          (func (export "neg") (param f32) (result f32) (f32.neg (local.get 0)))
          (func (export "copysign") (param f64 f64) (result f64)
            (f64.copysign (local.get 0) (local.get 1)))
          (func (export "div") (param f64 f64) (result f64) (f64.div (local.get 0) (local.get 1)))
          (func (export "demote") (param f64) (result f32) (f32.demote_f64 (local.get 0)))
          (func (export "convert_u") (param i32) (result f64) (f64.convert_i32_u (local.get 0)))
          (func (export "bits") (param f32) (result i32) (i32.reinterpret_f32 (local.get 0)))
          (func (export "from_bits") (param i64) (result f64) (f64.reinterpret_i64 (local.get 0))))
        "#,
    );

    let [Value::F32(min)] = inst.call("min", &[Value::F32(-0.0), Value::F32(0.0)])[..] else {
        panic!("expected f32");
    };
    assert!(min == 0.0 && min.is_sign_negative());

    let [Value::F32(min)] = inst.call("min", &[Value::F32(f32::NAN), Value::F32(1.0)])[..] else {
        panic!("expected f32");
    };
    assert!(min.is_nan());

    let [Value::F64(max)] = inst.call("max", &[Value::F64(-0.0), Value::F64(0.0)])[..] else {
        panic!("expected f64");
    };
    assert!(max == 0.0 && max.is_sign_positive());

    assert_eq!(inst.call("nearest", &[Value::F64(2.5)]), [Value::F64(2.0)]);
    assert_eq!(inst.call("nearest", &[Value::F64(3.5)]), [Value::F64(4.0)]);
    assert_eq!(inst.call("nearest", &[Value::F64(-0.5)]), [Value::F64(-0.0)]);

    let [Value::F32(neg)] = inst.call("neg", &[Value::F32(f32::NAN)])[..] else {
        panic!("expected f32");
    };
    assert_eq!(neg.to_bits(), f32::NAN.to_bits() ^ 0x8000_0000);

    assert_eq!(
        inst.call("copysign", &[Value::F64(3.0), Value::F64(-0.0)]),
        [Value::F64(-3.0)]
    );
    assert_eq!(
        inst.call("div", &[Value::F64(1.0), Value::F64(0.0)]),
        [Value::F64(f64::INFINITY)]
    );
    assert_eq!(inst.call("demote", &[Value::F64(1.5)]), [Value::F32(1.5)]);
    assert_eq!(
        inst.call("convert_u", &[Value::I32(-1)]),
        [Value::F64(4294967295.0)]
    );
    assert_eq!(inst.call("bits", &[Value::F32(1.0)]), [Value::I32(0x3f80_0000)]);
    assert_eq!(
        inst.call("from_bits", &[Value::I64(0x4000_0000_0000_0000)]),
        [Value::F64(2.0)]
    );
}

#[test]
fn float_to_int_conversions() {
    let mut inst = Instance::new(
        r#"
        (module
          (func (export "trunc") (param f64) (result i32) (i32.trunc_f64_s (local.get 0)))
          (func (export "trunc_u") (param f32) (result i64) (i64.trunc_f32_u (local.get 0)))
          (func (export "sat") (param f64) (result i32) (i32.trunc_sat_f64_s (local.get 0)))
          (func (export "sat_u") (param f32) (result i32) (i32.trunc_sat_f32_u (local.get 0))))
        "#,
    );

    assert_eq!(inst.call("trunc", &[Value::F64(-3.9)]), [Value::I32(-3)]);
    assert_eq!(
        inst.call("trunc", &[Value::F64(-2147483648.9)]),
        [Value::I32(i32::MIN)]
    );
    assert_eq!(
        inst.trap("trunc", &[Value::F64(f64::NAN)]),
        Some(Trap::InvalidConversionToInteger)
    );
    assert_eq!(
        inst.trap("trunc", &[Value::F64(3e9)]),
        Some(Trap::IntegerOverflow)
    );
    assert_eq!(
        inst.trap("trunc_u", &[Value::F32(-1.0)]),
        Some(Trap::IntegerOverflow)
    );
    assert_eq!(inst.call("trunc_u", &[Value::F32(-0.5)]), [Value::I64(0)]);

    assert_eq!(inst.call("sat", &[Value::F64(3e9)]), [Value::I32(i32::MAX)]);
    assert_eq!(inst.call("sat", &[Value::F64(-3e9)]), [Value::I32(i32::MIN)]);
    assert_eq!(inst.call("sat", &[Value::F64(f64::NAN)]), [Value::I32(0)]);
    assert_eq!(inst.call("sat_u", &[Value::F32(-5.0)]), [Value::I32(0)]);
    assert_eq!(inst.call("sat_u", &[Value::F32(5e9)]), [Value::I32(-1)]);
}

fn assert_bits(actual: &[Value], expected: &[Value]) {
    assert_eq!(actual.len(), expected.len());

    for (a, b) in actual.iter().zip(expected) {
        assert!(a.bit_eq(b), "{a:?} and {b:?} differ in their bits");
    }
}

#[test]
fn nan_payloads_are_preserved() {
    let mut inst = Instance::new(
        r#"
        (module
          (memory 1)
          (func (export "store_load_f32") (result f32)
            (f32.store (i32.const 8) (f32.const nan:0x200001))
            (f32.load (i32.const 8)))
          (func (export "store_load_f64") (result f64)
            (f64.store (i32.const 16) (f64.const -nan:0x4000000000001))
            (f64.load (i32.const 16)))
          (func (export "raw_f32") (result i32) (i32.load (i32.const 8)))
          (func (export "f32_bits") (param f32) (result i32) (i32.reinterpret_f32 (local.get 0)))
          (func (export "f32_from_bits") (param i32) (result f32) (f32.reinterpret_i32 (local.get 0)))
          (func (export "f64_round_trip") (param f64) (result f64)
            (f64.reinterpret_i64 (i64.reinterpret_f64 (local.get 0))))
          (func (export "swap") (param f32 f64) (result f64 f32) (local.get 1) (local.get 0)))
        "#,
    );

    let f32_nan = f32::from_bits(0x7fa0_0001);
    let f64_nan = f64::from_bits(0xfff4_0000_0000_0001);

    assert_bits(&inst.call("store_load_f32", &[]), &[Value::F32(f32_nan)]);
    assert_bits(&inst.call("store_load_f64", &[]), &[Value::F64(f64_nan)]);
    assert_eq!(inst.call("raw_f32", &[]), [Value::I32(0x7fa0_0001)]);

    assert_eq!(
        inst.call("f32_bits", &[Value::F32(f32_nan)]),
        [Value::I32(0x7fa0_0001)]
    );
    assert_bits(
        &inst.call("f32_from_bits", &[Value::I32(0xffc0_1234_u32 as i32)]),
        &[Value::F32(f32::from_bits(0xffc0_1234))],
    );
    assert_bits(
        &inst.call("f64_round_trip", &[Value::F64(f64_nan)]),
        &[Value::F64(f64_nan)],
    );
    assert_bits(
        &inst.call("swap", &[Value::F32(f32_nan), Value::F64(f64_nan)]),
        &[Value::F64(f64_nan), Value::F32(f32_nan)],
    );

    assert!(!Value::F64(f64_nan).bit_eq(&Value::F64(f64::NAN)));
    assert!(!Value::F32(0.0).bit_eq(&Value::F32(-0.0)));
}

#[test]
fn loads_and_stores() {
    let mut inst = Instance::new(
        r#"
        (module
          (memory 1)
          (data (i32.const 0) "\ff\80\01\02")
          (func (export "load8_s") (param i32) (result i32) (i32.load8_s (local.get 0)))
          (func (export "load8_u") (param i32) (result i32) (i32.load8_u (local.get 0)))
          (func (export "load16_s") (param i32) (result i64) (i64.load16_s (local.get 0)))
          (func (export "load") (param i32) (result i32) (i32.load (local.get 0)))
          (func (export "store32") (param i32 i64) (i64.store32 (local.get 0) (local.get 1)))
          (func (export "roundtrip_f64") (param f64) (result f64)
            (f64.store (i32.const 64) (local.get 0))
            (f64.load (i32.const 64))))
        "#,
    );

    assert_eq!(inst.call("load8_s", &[Value::I32(0)]), [Value::I32(-1)]);
    assert_eq!(inst.call("load8_u", &[Value::I32(0)]), [Value::I32(255)]);
    assert_eq!(inst.call("load16_s", &[Value::I32(0)]), [Value::I64(-32513)]);
    assert_eq!(inst.call("load", &[Value::I32(0)]), [Value::I32(0x0201_80ff)]);

    inst.call("store32", &[Value::I32(8), Value::I64(0x1_2345_6789)]);
    assert_eq!(inst.call("load", &[Value::I32(8)]), [Value::I32(0x2345_6789)]);
    assert_eq!(inst.call("load", &[Value::I32(12)]), [Value::I32(0)]);

    assert_eq!(
        inst.call("roundtrip_f64", &[Value::F64(-1.25)]),
        [Value::F64(-1.25)]
    );
}

#[test]
fn bulk_memory() {
    let mut inst = Instance::new(
        r#"
        (module
          (memory 1)
          (data $hello "hello")
          (func (export "init") (param i32 i32 i32) (memory.init $hello (local.get 0) (local.get 1) (local.get 2)))
          (func (export "drop") (data.drop $hello))
          (func (export "fill") (param i32 i32 i32) (memory.fill (local.get 0) (local.get 1) (local.get 2)))
          (func (export "copy") (param i32 i32 i32) (memory.copy (local.get 0) (local.get 1) (local.get 2)))
          (func (export "byte") (param i32) (result i32) (i32.load8_u (local.get 0))))
        "#,
    );

    let args = |a: i32, b: i32, c: i32| [Value::I32(a), Value::I32(b), Value::I32(c)];
    let byte = |inst: &mut Instance, at: i32| match inst.call("byte", &[Value::I32(at)])[..] {
        [Value::I32(b)] => b as u8,
        _ => panic!("expected i32"),
    };

    inst.call("init", &args(10, 1, 4));
    assert_eq!(byte(&mut inst, 10), b'e');
    assert_eq!(byte(&mut inst, 13), b'o');

    inst.call("copy", &args(11, 10, 4));
    assert_eq!(byte(&mut inst, 11), b'e');
    assert_eq!(byte(&mut inst, 14), b'o');

    inst.call("fill", &args(100, 0x41, 3));
    assert_eq!(byte(&mut inst, 102), b'A');
    assert_eq!(byte(&mut inst, 103), 0);

    assert_eq!(
        inst.trap("fill", &args(65535, 0, 2)),
        Some(Trap::MemoryOutOfBounds)
    );
    assert_eq!(
        inst.trap("init", &args(0, 3, 3)),
        Some(Trap::MemoryOutOfBounds)
    );

    inst.call("drop", &[]);
    inst.call("init", &args(0, 0, 0));
    assert_eq!(
        inst.trap("init", &args(0, 0, 1)),
        Some(Trap::MemoryOutOfBounds)
    );
}

#[test]
fn table_bulk_operations() {
    let mut inst = Instance::new(
        r#"
        (module
          (table $t 4 funcref)
          (table $u 4 funcref)
          (func $one (result i32) (i32.const 1))
          (func $two (result i32) (i32.const 2))
          (elem $pair func $one $two)
          (func (export "init") (param i32 i32 i32)
            (table.init $t $pair (local.get 0) (local.get 1) (local.get 2)))
          (func (export "copy") (param i32 i32 i32)
            (table.copy $u $t (local.get 0) (local.get 1) (local.get 2)))
          (func (export "fill") (param i32 i32)
            (table.fill $t (local.get 0) (ref.null func) (local.get 1)))
          (func (export "drop") (elem.drop $pair))
          (func (export "call_t") (param i32) (result i32)
            (call_indirect $t (result i32) (local.get 0)))
          (func (export "call_u") (param i32) (result i32)
            (call_indirect $u (result i32) (local.get 0))))
        "#,
    );

    let args = |a: i32, b: i32, c: i32| [Value::I32(a), Value::I32(b), Value::I32(c)];

    inst.call("init", &args(1, 0, 2));
    assert_eq!(inst.call("call_t", &[Value::I32(1)]), [Value::I32(1)]);
    assert_eq!(inst.call("call_t", &[Value::I32(2)]), [Value::I32(2)]);

    inst.call("copy", &args(0, 1, 3));
    assert_eq!(inst.call("call_u", &[Value::I32(1)]), [Value::I32(2)]);
    assert_eq!(
        inst.trap("call_u", &[Value::I32(2)]),
        Some(Trap::UninitializedElement)
    );

    inst.call("fill", &[Value::I32(1), Value::I32(1)]);
    assert_eq!(
        inst.trap("call_t", &[Value::I32(1)]),
        Some(Trap::UninitializedElement)
    );

    assert_eq!(
        inst.trap("init", &args(3, 0, 2)),
        Some(Trap::TableOutOfBounds)
    );

    inst.call("drop", &[]);
    assert_eq!(
        inst.trap("init", &args(0, 0, 1)),
        Some(Trap::TableOutOfBounds)
    );
}

#[test]
fn globals_and_references() {
    let mut inst = Instance::new(
        r#"
        (module
          (global $base i32 (i32.const 40))
          (global $counter (mut i32) (global.get $base))
          (global $nothing (mut externref) (ref.null extern))
          (func (export "bump") (result i32)
            (global.set $counter (i32.add (global.get $counter) (i32.const 1)))
            (global.get $counter))
          (func (export "set_ref") (param externref) (global.set $nothing (local.get 0)))
          (func (export "ref_is_null") (result i32) (ref.is_null (global.get $nothing))))
        "#,
    );

    assert_eq!(inst.call("bump", &[]), [Value::I32(41)]);
    assert_eq!(inst.call("bump", &[]), [Value::I32(42)]);

    assert_eq!(inst.call("ref_is_null", &[]), [Value::I32(1)]);

    let object = inst.store.alloc_extern("host object");
    inst.call("set_ref", &[Value::ExternRef(Some(object))]);
    assert_eq!(inst.call("ref_is_null", &[]), [Value::I32(0)]);
    assert_eq!(
        inst.store.extern_object(object).downcast_ref::<&str>(),
        Some(&"host object")
    );
}

#[test]
fn unreachable_traps() {
    let mut inst = Instance::new(r#"(module (func (export "boom") unreachable))"#);

    assert_eq!(inst.trap("boom", &[]), Some(Trap::Unreachable));
}
