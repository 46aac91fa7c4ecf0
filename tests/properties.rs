use proptest::prelude::*;
use wasm_vm::{
    Executor, Imports, InvokeError, Limit, MemInst, MemoryType, Module, RefType, Store, TableInst,
    TableType, Trap, Value, PAGE_SIZE,
};

const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

const ARITHMETIC: &str = r#"
    (module
      (func (export "add") (param i32 i32) (result i32)
        (i32.add (local.get 0) (local.get 1)))
      (func (export "mul") (param i64 i64) (result i64)
        (i64.mul (local.get 0) (local.get 1)))
      (func (export "div_s") (param i32 i32) (result i32)
        (i32.div_s (local.get 0) (local.get 1)))
      (func (export "rotl") (param i32 i32) (result i32)
        (i32.rotl (local.get 0) (local.get 1))))
"#;

fn call(export: &str, args: &[Value]) -> Result<Vec<Value>, InvokeError> {
    let module = Module::new(&wat::parse_str(ARITHMETIC).unwrap()).unwrap();

    let mut store = Store::new();
    let executor = Executor::default();
    let addr = executor
        .instantiate(&mut store, &module, &Imports::new())
        .unwrap();

    executor.invoke_export(&mut store, addr, export, args)
}

fn limit() -> impl Strategy<Value = Limit> {
    (0u32..8, proptest::option::of(0u32..8)).prop_map(|(min, extra)| {
        Limit::new(min, extra.map(|extra| min + extra))
    })
}

proptest! {
    #[test]
    fn decoding_arbitrary_sections_is_deterministic(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let bytes: Vec<u8> = HEADER.iter().copied().chain(body).collect();

        prop_assert_eq!(Module::new(&bytes), Module::new(&bytes));
    }

    #[test]
    fn decoding_corrupted_modules_is_deterministic(
        edits in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..4),
    ) {
        let mut bytes = wat::parse_str(ARITHMETIC).unwrap();

        // keep the header intact so the sections are what gets exercised
        for (idx, byte) in edits {
            let at = HEADER.len() + idx.index(bytes.len() - HEADER.len());
            bytes[at] = byte;
        }

        let module = Module::new(&bytes);
        prop_assert_eq!(&module, &Module::new(&bytes));

        if let Ok(module) = module {
            let _ = wasm_vm::validate(&module);
        }
    }

    #[test]
    fn decoded_modules_validate_without_panicking(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let bytes: Vec<u8> = HEADER.iter().copied().chain(body).collect();

        if let Ok(module) = Module::new(&bytes) {
            let _ = wasm_vm::validate(&module);
        }
    }

    #[test]
    fn memory_growth_stays_within_limits(
        limit in limit(),
        ceiling in 0u32..16,
        steps in prop::collection::vec(0u32..4, 1..8),
    ) {
        let mut mem = MemInst::new(MemoryType::new(limit));

        for n in steps {
            let before = mem.size();

            match mem.grow(n, ceiling) {
                Some(old) => {
                    prop_assert_eq!(old, before);
                    prop_assert_eq!(mem.size(), before + n);
                    prop_assert!(limit.max.map_or(true, |max| mem.size() <= max));
                    prop_assert!(mem.size() <= ceiling.max(limit.min));
                }
                None => prop_assert_eq!(mem.size(), before),
            }

            prop_assert_eq!(mem.data().len(), mem.size() as usize * PAGE_SIZE);
        }
    }

    #[test]
    fn table_growth_stays_within_limits(
        limit in limit(),
        ceiling in 0u32..16,
        steps in prop::collection::vec(0u32..4, 1..8),
    ) {
        let mut table = TableInst::new(TableType::new(RefType::FuncRef, limit));

        for n in steps {
            let before = table.size();

            match table.grow(n, Value::FuncRef(None), ceiling) {
                Some(old) => {
                    prop_assert_eq!(old, before);
                    prop_assert_eq!(table.size(), before + n);
                }
                None => {
                    prop_assert_eq!(table.size(), before);
                    prop_assert!(before + n > limit.max.unwrap_or(u32::MAX).min(ceiling));
                }
            }

            prop_assert!(limit.max.map_or(true, |max| table.size() <= max));
            prop_assert!(table.size() <= ceiling.max(limit.min));
            prop_assert_eq!(table.get(table.size()), Err(Trap::TableOutOfBounds));
        }
    }

    #[test]
    fn limits_match_themselves(limit in limit()) {
        prop_assert!(limit.matches(&limit));
    }

    #[test]
    fn tighter_limits_match_looser_ones(actual in limit(), expected in limit()) {
        let tighter = actual.min >= expected.min
            && match (actual.max, expected.max) {
                (_, None) => true,
                (Some(actual), Some(expected)) => actual <= expected,
                (None, Some(_)) => false,
            };

        prop_assert_eq!(actual.matches(&expected), tighter);
    }

    #[test]
    fn integer_arithmetic_wraps(a in any::<i32>(), b in any::<i32>(), x in any::<i64>(), y in any::<i64>()) {
        prop_assert_eq!(
            call("add", &[Value::I32(a), Value::I32(b)]).unwrap(),
            vec![Value::I32(a.wrapping_add(b))]
        );
        prop_assert_eq!(
            call("mul", &[Value::I64(x), Value::I64(y)]).unwrap(),
            vec![Value::I64(x.wrapping_mul(y))]
        );
        prop_assert_eq!(
            call("rotl", &[Value::I32(a), Value::I32(b)]).unwrap(),
            vec![Value::I32(a.rotate_left(b as u32 % 32))]
        );
    }

    #[test]
    fn signed_division_traps_exactly_when_undefined(a in any::<i32>(), b in prop_oneof![Just(0), Just(-1), any::<i32>()]) {
        let result = call("div_s", &[Value::I32(a), Value::I32(b)]);

        match a.checked_div(b) {
            Some(quotient) => prop_assert_eq!(result.unwrap(), vec![Value::I32(quotient)]),
            None if b == 0 => prop_assert_eq!(result.unwrap_err().trap(), Some(Trap::DivideByZero)),
            None => prop_assert_eq!(result.unwrap_err().trap(), Some(Trap::IntegerOverflow)),
        }
    }

    #[test]
    fn wrong_arity_is_rejected(args in prop::collection::vec(any::<i32>().prop_map(Value::I32), 0..5)) {
        prop_assume!(args.len() != 2);

        let err = call("add", &args).unwrap_err();
        prop_assert!(matches!(err, InvokeError::ArgumentMismatch { .. }), "got {:?}", err);
    }
}
