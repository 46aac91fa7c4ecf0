use std::fs;

use wasm_vm::{
    Config, DecodeError, FuncType, HostModule, InvokeError, StatisticsConfig, Trap, Value,
    ValueType, Vm, VmError, VmStage,
};

const FIB: &str = r#"
    (module
      (func $fib (export "fib") (param i32) (result i32)
        (if (result i32) (i32.lt_s (local.get 0) (i32.const 2))
          (then (local.get 0))
          (else
            (i32.add
              (call $fib (i32.sub (local.get 0) (i32.const 1)))
              (call $fib (i32.sub (local.get 0) (i32.const 2)))))))
      (memory (export "mem") 1))
"#;

fn fib_bytes() -> Vec<u8> {
    wat::parse_str(FIB).unwrap()
}

#[test]
fn staged_workflow() {
    let mut vm = Vm::default();
    assert_eq!(vm.stage(), VmStage::Inited);

    assert!(matches!(
        vm.validate(),
        Err(VmError::WrongWorkflow {
            required: VmStage::Loaded,
            current: VmStage::Inited,
            ..
        })
    ));

    vm.load_bytes(&fib_bytes()).unwrap();
    assert_eq!(vm.stage(), VmStage::Loaded);
    assert!(vm.function_list().is_empty());

    assert!(matches!(
        vm.execute("fib", &[Value::I32(3)]),
        Err(VmError::WrongWorkflow { .. })
    ));

    vm.validate().unwrap();
    assert_eq!(
        vm.function_list(),
        vec![(
            "fib".to_owned(),
            FuncType::new([ValueType::I32], [ValueType::I32])
        )]
    );

    vm.instantiate().unwrap();
    assert_eq!(vm.stage(), VmStage::Instantiated);
    assert!(vm.active_module().is_some());

    let result = vm.execute("fib", &[Value::I32(18)]).unwrap();
    assert_eq!(result, vec![Value::I32(2584)]);
}

#[test]
fn run_bytes_in_one_step() {
    let mut vm = Vm::default();

    let result = vm
        .run_bytes(&fib_bytes(), "fib", &[Value::I32(10)])
        .unwrap();
    assert_eq!(result, vec![Value::I32(55)]);

    let err = vm.execute("fib", &[]).unwrap_err();
    assert!(matches!(
        err,
        VmError::Invoke(InvokeError::ArgumentMismatch { .. })
    ));
}

#[test]
fn load_errors_are_reported() {
    let mut vm = Vm::default();

    assert!(matches!(
        vm.load_bytes(b"not wasm"),
        Err(VmError::Decode(DecodeError::BadMagic))
    ));
    assert_eq!(vm.stage(), VmStage::Inited);

    assert!(matches!(
        vm.load_file("/nonexistent/module.wasm"),
        Err(VmError::Io { .. })
    ));
}

#[test]
fn load_from_file() {
    let path = std::env::temp_dir().join(format!("wasm-vm-fib-{}.wasm", std::process::id()));
    fs::write(&path, fib_bytes()).unwrap();

    let mut vm = Vm::default();
    let result = vm.run_file(&path, "fib", &[Value::I32(7)]);

    fs::remove_file(&path).unwrap();

    assert_eq!(result.unwrap(), vec![Value::I32(13)]);
}

#[test]
fn registered_modules() {
    let mut vm = Vm::default();

    vm.register_host_module(HostModule::new("env").with_func(
        "square",
        FuncType::new([ValueType::I64], [ValueType::I64]),
        |_, args| match args {
            [Value::I64(n)] => Ok(vec![Value::I64(n * n)]),
            _ => Ok(vec![Value::I64(0)]),
        },
    ))
    .unwrap();

    vm.register_module_bytes("fib", &fib_bytes()).unwrap();

    let bytes = wat::parse_str(
        r#"
        (module
          (import "env" "square" (func $square (param i64) (result i64)))
          (import "fib" "fib" (func $fib (param i32) (result i32)))
          (func (export "run") (param i32) (result i64)
            (call $square (i64.extend_i32_s (call $fib (local.get 0))))))
        "#,
    )
    .unwrap();

    let result = vm.run_bytes(&bytes, "run", &[Value::I32(10)]).unwrap();
    assert_eq!(result, vec![Value::I64(3025)]);

    let result = vm
        .execute_registered("fib", "fib", &[Value::I32(12)])
        .unwrap();
    assert_eq!(result, vec![Value::I32(144)]);

    assert!(matches!(
        vm.execute_registered("missing", "fib", &[]),
        Err(VmError::Store(..))
    ));

    // registering drops an instantiated module back to validated
    vm.register_module_bytes("other", &wat::parse_str("(module)").unwrap())
        .unwrap();
    assert_eq!(vm.stage(), VmStage::Validated);
    assert!(vm.active_module().is_none());

    vm.instantiate().unwrap();
    assert_eq!(
        vm.execute("run", &[Value::I32(3)]).unwrap(),
        vec![Value::I64(4)]
    );

    assert_eq!(
        vm.store().list_modules().collect::<Vec<_>>(),
        ["env", "fib", "other"]
    );
}

#[test]
fn statistics_and_cleanup() {
    let mut vm = Vm::new(Config::new().statistics(StatisticsConfig::all()));

    vm.run_bytes(&fib_bytes(), "fib", &[Value::I32(10)]).unwrap();
    assert!(vm.statistics().instr_count() > 100);
    assert_eq!(vm.statistics().instr_count(), vm.statistics().total_cost());

    vm.cleanup();
    assert_eq!(vm.stage(), VmStage::Inited);
    assert_eq!(vm.statistics().instr_count(), 0);
    assert!(vm.active_module().is_none());
    assert_eq!(vm.store().list_modules().count(), 0);
}

#[test]
fn gas_limit_through_the_vm() {
    let mut vm = Vm::new(Config::new().cost_limit(50));

    let err = vm
        .run_bytes(&fib_bytes(), "fib", &[Value::I32(20)])
        .unwrap_err();
    assert!(matches!(
        err,
        VmError::Invoke(InvokeError::Trap(Trap::CostLimitExceeded))
    ));
}
