use std::time::Instant;

use tracing::trace;

use crate::{
    error::{InvokeError, Trap},
    executor::Executor,
    host::HostContext,
    instance::{checked_range, FuncInst, MemInst, ModuleInst},
    num::{self, Float, Int, Num},
    opcode::{BlockLabel, Instruction, MemoryOperand},
    stack::{Frame, Label, Stack},
    store::{FuncAddr, Store},
    types::BlockType,
    value::Value,
};

/// What to do after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Call(FuncAddr),
    Return,
}

/// Executes one invocation. Guest calls push frames on an explicit stack
/// instead of recursing; only host functions calling back into the runtime
/// start a nested interpreter.
pub(crate) struct Interpreter<'a> {
    store: &'a mut Store,
    executor: &'a Executor,
    /// Frames held by enclosing invocations.
    depth: usize,
    /// Enclosing invocations started by host functions.
    reentrance: usize,
    stack: Stack,
    labels: Vec<Label>,
    frames: Vec<Frame>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        store: &'a mut Store,
        executor: &'a Executor,
        depth: usize,
        reentrance: usize,
    ) -> Self {
        Self {
            store,
            executor,
            depth,
            reentrance,
            stack: Stack::new(),
            labels: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Runs `addr` with arguments that have already been type checked.
    pub fn invoke(mut self, addr: FuncAddr, args: &[Value]) -> Result<Vec<Value>, InvokeError> {
        let arity = self.store.func(addr).ty().results().len();

        self.stack.extend(args.iter().copied());

        if self.call(addr)? {
            self.run()?;
        }

        Ok(self.stack.pop_n(arity)?)
    }

    fn frame(&self) -> Result<&Frame, Trap> {
        self.frames.last().ok_or(Trap::InstrTypeMismatch)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, Trap> {
        self.frames.last_mut().ok_or(Trap::InstrTypeMismatch)
    }

    fn module(&self) -> Result<&ModuleInst, Trap> {
        Ok(self.store.module(self.frame()?.module))
    }

    fn memory(&mut self) -> Result<&mut MemInst, Trap> {
        let addr = self.frame()?.memory.ok_or(Trap::MemoryOutOfBounds)?;
        Ok(self.store.memory_mut(addr))
    }

    /// Starts a call to `addr` whose arguments are on the operand stack.
    /// Returns `true` if a wasm frame was pushed, `false` if a host function
    /// already ran to completion.
    fn call(&mut self, addr: FuncAddr) -> Result<bool, InvokeError> {
        if self.depth + self.frames.len() >= self.executor.config().max_call_depth {
            return Err(Trap::CallStackExhausted.into());
        }

        match self.store.func(addr) {
            FuncInst::Host { ty, func } => {
                let func = func.clone();
                let params = ty.params().len();
                let results = ty.results().to_vec();

                let args = self.stack.pop_n(params)?;
                let caller = self.frames.last().map(|frame| frame.module);

                let mut ctx = HostContext {
                    store: &mut *self.store,
                    executor: self.executor,
                    caller,
                    depth: self.depth + self.frames.len() + 1,
                    reentrance: self.reentrance,
                };

                let start = Instant::now();
                let values = func(&mut ctx, &args);
                self.executor
                    .statistics()
                    .add_host_time(start.elapsed());

                let values = values?;

                if values.len() != results.len()
                    || values.iter().zip(&results).any(|(val, ty)| val.ty() != *ty)
                {
                    return Err(Trap::HostResultMismatch.into());
                }

                self.stack.extend(values);

                Ok(false)
            }
            FuncInst::Local { ty, module, code } => {
                let params = ty.params().len();
                let arity = ty.results().len();
                let module = *module;
                let body = code.expr.0.clone();
                let local_types = code.locals.clone();

                let mut locals = self.stack.pop_n(params)?;
                locals.extend(local_types.into_iter().map(Value::default_for));

                let memory = self.store.module(module).memory(0);
                let stack_base = self.stack.len();

                trace!(func = addr.0, depth = self.depth + self.frames.len(), "call");

                self.frames.push(Frame {
                    module,
                    memory,
                    pc: 0,
                    locals,
                    stack_base,
                    label_base: self.labels.len(),
                    arity,
                    code: body.clone(),
                });

                self.labels.push(Label {
                    arity,
                    height: stack_base,
                    continuation: body.len(),
                    is_loop: false,
                });

                Ok(true)
            }
        }
    }

    fn run(&mut self) -> Result<(), InvokeError> {
        let mut code = self.frame()?.code.clone();
        let mut pc = 0;

        loop {
            if pc >= code.len() {
                let frame = self.frames.pop().ok_or(Trap::InstrTypeMismatch)?;

                self.stack.unwind(frame.stack_base, frame.arity);
                self.labels.truncate(frame.label_base);

                match self.frames.last() {
                    Some(caller) => {
                        code = caller.code.clone();
                        pc = caller.pc;
                        continue;
                    }
                    None => return Ok(()),
                }
            }

            self.executor.check_interrupt()?;
            self.executor.statistics().tick()?;

            match self.execute(&code[pc], pc)? {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Return => pc = code.len(),
                Flow::Call(addr) => {
                    self.frame_mut()?.pc = pc + 1;

                    if self.call(addr)? {
                        code = self.frame()?.code.clone();
                        pc = 0;
                    } else {
                        pc += 1;
                    }
                }
            }
        }
    }

    fn execute(&mut self, inst: &Instruction, pc: usize) -> Result<Flow, Trap> {
        match inst {
            Instruction::Unreachable => return Err(Trap::Unreachable),
            Instruction::Nop => {}
            Instruction::Block(label) => self.block(label, pc, false)?,
            Instruction::Loop(label) => self.block(label, pc, true)?,
            Instruction::If(label) => return self.if_else(label, pc),
            Instruction::Else(end) => {
                self.labels.pop();
                return Ok(Flow::Jump(end + 1));
            }
            Instruction::End => {
                self.labels.pop();
            }
            Instruction::Branch(depth) => return self.branch(*depth),
            Instruction::BranchIf(depth) => {
                if self.stack.pop_i32()? != 0 {
                    return self.branch(*depth);
                }
            }
            Instruction::BranchTable(depths, default) => {
                let idx = self.stack.pop_u32()? as usize;
                return self.branch(depths.get(idx).copied().unwrap_or(*default));
            }
            Instruction::Return => return Ok(Flow::Return),
            Instruction::Call(idx) => {
                let addr = self.module()?.func_addrs[*idx as usize];
                return Ok(Flow::Call(addr));
            }
            Instruction::CallIndirect(type_idx, table_idx) => {
                return self.call_indirect(*type_idx, *table_idx);
            }

            Instruction::Drop => {
                self.stack.pop_value()?;
            }
            Instruction::Select | Instruction::SelectT(..) => {
                let c = self.stack.pop_i32()?;
                let b = self.stack.pop_value()?;
                let a = self.stack.pop_value()?;
                self.stack.push_value(if c != 0 { a } else { b });
            }

            Instruction::LocalGet(idx) => {
                let val = self.frame()?.locals[*idx as usize];
                self.stack.push_value(val);
            }
            Instruction::LocalSet(idx) => {
                let val = self.stack.pop_value()?;
                self.frame_mut()?.locals[*idx as usize] = val;
            }
            Instruction::LocalTee(idx) => {
                let val = self.stack.pop_value()?;
                self.stack.push_value(val);
                self.frame_mut()?.locals[*idx as usize] = val;
            }
            Instruction::GlobalGet(idx) => {
                let addr = self.module()?.global_addrs[*idx as usize];
                let val = self.store.global(addr).value;
                self.stack.push_value(val);
            }
            Instruction::GlobalSet(idx) => {
                let val = self.stack.pop_value()?;
                let addr = self.module()?.global_addrs[*idx as usize];
                self.store.global_mut(addr).value = val;
            }

            Instruction::TableGet(idx) => {
                let i = self.stack.pop_u32()?;
                let addr = self.module()?.table_addrs[*idx as usize];
                let val = self.store.table(addr).get(i)?;
                self.stack.push_value(val);
            }
            Instruction::TableSet(idx) => {
                let val = self.stack.pop_ref()?;
                let i = self.stack.pop_u32()?;
                let addr = self.module()?.table_addrs[*idx as usize];
                self.store.table_mut(addr).set(i, val)?;
            }
            Instruction::TableInit(elem_idx, table_idx) => self.table_init(*elem_idx, *table_idx)?,
            Instruction::ElemDrop(idx) => {
                let addr = self.module()?.elem_addrs[*idx as usize];
                self.store.elems[addr].elem = Vec::new();
            }
            Instruction::TableCopy(dst, src) => self.table_copy(*dst, *src)?,
            Instruction::TableGrow(idx) => {
                let n = self.stack.pop_u32()?;
                let init = self.stack.pop_ref()?;
                let addr = self.module()?.table_addrs[*idx as usize];
                let max = self.executor.config().max_table_elements;
                let old = self.store.table_mut(addr).grow(n, init, max);
                self.stack.push(old.map_or(-1, |old| old as i32));
            }
            Instruction::TableSize(idx) => {
                let addr = self.module()?.table_addrs[*idx as usize];
                let size = self.store.table(addr).size();
                self.stack.push(size);
            }
            Instruction::TableFill(idx) => {
                let n = self.stack.pop_u32()?;
                let val = self.stack.pop_ref()?;
                let i = self.stack.pop_u32()?;
                let addr = self.module()?.table_addrs[*idx as usize];
                self.store.table_mut(addr).fill(i, val, n)?;
            }

            Instruction::i32Load(m) => self.load::<i32, _>(*m, Value::I32)?,
            Instruction::i64Load(m) => self.load::<i64, _>(*m, Value::I64)?,
            Instruction::f32Load(m) => self.load::<f32, _>(*m, Value::F32)?,
            Instruction::f64Load(m) => self.load::<f64, _>(*m, Value::F64)?,
            Instruction::i32Load8Signed(m) => self.load::<i8, _>(*m, |n| Value::I32(n.into()))?,
            Instruction::i32Load8Unsigned(m) => self.load::<u8, _>(*m, |n| Value::I32(n.into()))?,
            Instruction::i32Load16Signed(m) => self.load::<i16, _>(*m, |n| Value::I32(n.into()))?,
            Instruction::i32Load16Unsigned(m) => {
                self.load::<u16, _>(*m, |n| Value::I32(n.into()))?
            }
            Instruction::i64Load8Signed(m) => self.load::<i8, _>(*m, |n| Value::I64(n.into()))?,
            Instruction::i64Load8Unsigned(m) => self.load::<u8, _>(*m, |n| Value::I64(n.into()))?,
            Instruction::i64Load16Signed(m) => self.load::<i16, _>(*m, |n| Value::I64(n.into()))?,
            Instruction::i64Load16Unsigned(m) => {
                self.load::<u16, _>(*m, |n| Value::I64(n.into()))?
            }
            Instruction::i64Load32Signed(m) => self.load::<i32, _>(*m, |n| Value::I64(n.into()))?,
            Instruction::i64Load32Unsigned(m) => {
                self.load::<u32, _>(*m, |n| Value::I64(n.into()))?
            }

            Instruction::i32Store(m) => self.store_value::<i32>(*m)?,
            Instruction::i64Store(m) => self.store_value::<i64>(*m)?,
            Instruction::f32Store(m) => self.store_value::<f32>(*m)?,
            Instruction::f64Store(m) => self.store_value::<f64>(*m)?,
            Instruction::i32Store8(m) => self.store_value::<u8>(*m)?,
            Instruction::i32Store16(m) => self.store_value::<u16>(*m)?,
            Instruction::i64Store8(m) => self.store_wrapped::<u8>(*m)?,
            Instruction::i64Store16(m) => self.store_wrapped::<u16>(*m)?,
            Instruction::i64Store32(m) => self.store_wrapped::<u32>(*m)?,

            Instruction::MemorySize => {
                let size = self.memory()?.size();
                self.stack.push(size);
            }
            Instruction::MemoryGrow => {
                let n = self.stack.pop_u32()?;
                let max = self.executor.config().max_memory_pages;
                let old = self.memory()?.grow(n, max);
                self.stack.push(old.map_or(-1, |old| old as i32));
            }
            Instruction::MemoryInit(idx) => self.memory_init(*idx)?,
            Instruction::DataDrop(idx) => {
                let addr = self.module()?.data_addrs[*idx as usize];
                self.store.datas[addr].data = Vec::new();
            }
            Instruction::MemoryCopy => {
                let n = self.stack.pop_u32()?;
                let src = self.stack.pop_u32()?;
                let dst = self.stack.pop_u32()?;

                let mem = self.memory()?;
                let len = mem.data.len();
                let src = checked_range(src, n, len).ok_or(Trap::MemoryOutOfBounds)?;
                let dst = checked_range(dst, n, len).ok_or(Trap::MemoryOutOfBounds)?;

                mem.data.copy_within(src, dst.start);
            }
            Instruction::MemoryFill => {
                let n = self.stack.pop_u32()?;
                let val = self.stack.pop_i32()? as u8;
                let dst = self.stack.pop_u32()?;

                let mem = self.memory()?;
                let dst = checked_range(dst, n, mem.data.len()).ok_or(Trap::MemoryOutOfBounds)?;

                mem.data[dst].fill(val);
            }

            Instruction::i32Const(n) => self.stack.push(*n),
            Instruction::i64Const(n) => self.stack.push(*n),
            Instruction::f32Const(n) => self.stack.push(*n),
            Instruction::f64Const(n) => self.stack.push(*n),

            Instruction::i32EqZero => self.test_op::<i32>(|a| a == 0)?,
            Instruction::i32Eq => self.rel_op::<i32>(|a, b| a == b)?,
            Instruction::i32Ne => self.rel_op::<i32>(|a, b| a != b)?,
            Instruction::i32LtSigned => self.rel_op::<i32>(|a, b| a < b)?,
            Instruction::i32LtUnsigned => self.rel_op::<u32>(|a, b| a < b)?,
            Instruction::i32GtSigned => self.rel_op::<i32>(|a, b| a > b)?,
            Instruction::i32GtUnsigned => self.rel_op::<u32>(|a, b| a > b)?,
            Instruction::i32LeSigned => self.rel_op::<i32>(|a, b| a <= b)?,
            Instruction::i32LeUnsigned => self.rel_op::<u32>(|a, b| a <= b)?,
            Instruction::i32GeSigned => self.rel_op::<i32>(|a, b| a >= b)?,
            Instruction::i32GeUnsigned => self.rel_op::<u32>(|a, b| a >= b)?,

            Instruction::i64EqZero => self.test_op::<i64>(|a| a == 0)?,
            Instruction::i64Eq => self.rel_op::<i64>(|a, b| a == b)?,
            Instruction::i64Ne => self.rel_op::<i64>(|a, b| a != b)?,
            Instruction::i64LtSigned => self.rel_op::<i64>(|a, b| a < b)?,
            Instruction::i64LtUnsigned => self.rel_op::<u64>(|a, b| a < b)?,
            Instruction::i64GtSigned => self.rel_op::<i64>(|a, b| a > b)?,
            Instruction::i64GtUnsigned => self.rel_op::<u64>(|a, b| a > b)?,
            Instruction::i64LeSigned => self.rel_op::<i64>(|a, b| a <= b)?,
            Instruction::i64LeUnsigned => self.rel_op::<u64>(|a, b| a <= b)?,
            Instruction::i64GeSigned => self.rel_op::<i64>(|a, b| a >= b)?,
            Instruction::i64GeUnsigned => self.rel_op::<u64>(|a, b| a >= b)?,

            Instruction::f32Eq => self.rel_op::<f32>(|a, b| a == b)?,
            Instruction::f32Ne => self.rel_op::<f32>(|a, b| a != b)?,
            Instruction::f32Lt => self.rel_op::<f32>(|a, b| a < b)?,
            Instruction::f32Gt => self.rel_op::<f32>(|a, b| a > b)?,
            Instruction::f32Le => self.rel_op::<f32>(|a, b| a <= b)?,
            Instruction::f32Ge => self.rel_op::<f32>(|a, b| a >= b)?,

            Instruction::f64Eq => self.rel_op::<f64>(|a, b| a == b)?,
            Instruction::f64Ne => self.rel_op::<f64>(|a, b| a != b)?,
            Instruction::f64Lt => self.rel_op::<f64>(|a, b| a < b)?,
            Instruction::f64Gt => self.rel_op::<f64>(|a, b| a > b)?,
            Instruction::f64Le => self.rel_op::<f64>(|a, b| a <= b)?,
            Instruction::f64Ge => self.rel_op::<f64>(|a, b| a >= b)?,

            Instruction::i32CountLeadingZeros => self.un_op::<i32>(Int::clz)?,
            Instruction::i32CountTrailingZeros => self.un_op::<i32>(Int::ctz)?,
            Instruction::i32PopulationCount => self.un_op::<i32>(Int::popcnt)?,
            Instruction::i32Add => self.bin_op::<i32>(i32::wrapping_add)?,
            Instruction::i32Sub => self.bin_op::<i32>(i32::wrapping_sub)?,
            Instruction::i32Mul => self.bin_op::<i32>(i32::wrapping_mul)?,
            Instruction::i32SignedDiv => self.checked_bin_op::<i32>(Int::checked_div_signed)?,
            Instruction::i32UnsignedDiv => self.checked_bin_op::<i32>(Int::checked_div_unsigned)?,
            Instruction::i32SignedRem => self.checked_bin_op::<i32>(Int::checked_rem_signed)?,
            Instruction::i32UnsignedRem => self.checked_bin_op::<i32>(Int::checked_rem_unsigned)?,
            Instruction::i32BitwiseAnd => self.bin_op::<i32>(|a, b| a & b)?,
            Instruction::i32BitwiseOr => self.bin_op::<i32>(|a, b| a | b)?,
            Instruction::i32BitwiseXor => self.bin_op::<i32>(|a, b| a ^ b)?,
            Instruction::i32BitwiseShiftLeft => self.bin_op::<i32>(Int::shl)?,
            Instruction::i32SignedBitwiseShiftRight => self.bin_op::<i32>(Int::shr_signed)?,
            Instruction::i32UnsignedBitwiseShiftRight => self.bin_op::<i32>(Int::shr_unsigned)?,
            Instruction::i32RotateLeft => self.bin_op::<i32>(Int::rotl)?,
            Instruction::i32RotateRight => self.bin_op::<i32>(Int::rotr)?,

            Instruction::i64CountLeadingZeros => self.un_op::<i64>(Int::clz)?,
            Instruction::i64CountTrailingZeros => self.un_op::<i64>(Int::ctz)?,
            Instruction::i64PopulationCount => self.un_op::<i64>(Int::popcnt)?,
            Instruction::i64Add => self.bin_op::<i64>(i64::wrapping_add)?,
            Instruction::i64Sub => self.bin_op::<i64>(i64::wrapping_sub)?,
            Instruction::i64Mul => self.bin_op::<i64>(i64::wrapping_mul)?,
            Instruction::i64SignedDiv => self.checked_bin_op::<i64>(Int::checked_div_signed)?,
            Instruction::i64UnsignedDiv => self.checked_bin_op::<i64>(Int::checked_div_unsigned)?,
            Instruction::i64SignedRem => self.checked_bin_op::<i64>(Int::checked_rem_signed)?,
            Instruction::i64UnsignedRem => self.checked_bin_op::<i64>(Int::checked_rem_unsigned)?,
            Instruction::i64BitwiseAnd => self.bin_op::<i64>(|a, b| a & b)?,
            Instruction::i64BitwiseOr => self.bin_op::<i64>(|a, b| a | b)?,
            Instruction::i64BitwiseXor => self.bin_op::<i64>(|a, b| a ^ b)?,
            Instruction::i64BitwiseShiftLeft => self.bin_op::<i64>(Int::shl)?,
            Instruction::i64SignedBitwiseShiftRight => self.bin_op::<i64>(Int::shr_signed)?,
            Instruction::i64UnsignedBitwiseShiftRight => self.bin_op::<i64>(Int::shr_unsigned)?,
            Instruction::i64RotateLeft => self.bin_op::<i64>(Int::rotl)?,
            Instruction::i64RotateRight => self.bin_op::<i64>(Int::rotr)?,

            Instruction::f32Abs => self.un_op::<f32>(Float::wasm_abs)?,
            Instruction::f32Neg => self.un_op::<f32>(Float::wasm_neg)?,
            Instruction::f32Ceil => self.un_op::<f32>(Float::wasm_ceil)?,
            Instruction::f32Floor => self.un_op::<f32>(Float::wasm_floor)?,
            Instruction::f32Trunc => self.un_op::<f32>(Float::wasm_trunc)?,
            Instruction::f32Nearest => self.un_op::<f32>(Float::wasm_nearest)?,
            Instruction::f32Sqrt => self.un_op::<f32>(Float::wasm_sqrt)?,
            Instruction::f32Add => self.bin_op::<f32>(|a, b| a + b)?,
            Instruction::f32Sub => self.bin_op::<f32>(|a, b| a - b)?,
            Instruction::f32Mul => self.bin_op::<f32>(|a, b| a * b)?,
            Instruction::f32Div => self.bin_op::<f32>(|a, b| a / b)?,
            Instruction::f32Min => self.bin_op::<f32>(Float::wasm_min)?,
            Instruction::f32Max => self.bin_op::<f32>(Float::wasm_max)?,
            Instruction::f32CopySign => self.bin_op::<f32>(Float::wasm_copysign)?,

            Instruction::f64Abs => self.un_op::<f64>(Float::wasm_abs)?,
            Instruction::f64Neg => self.un_op::<f64>(Float::wasm_neg)?,
            Instruction::f64Ceil => self.un_op::<f64>(Float::wasm_ceil)?,
            Instruction::f64Floor => self.un_op::<f64>(Float::wasm_floor)?,
            Instruction::f64Trunc => self.un_op::<f64>(Float::wasm_trunc)?,
            Instruction::f64Nearest => self.un_op::<f64>(Float::wasm_nearest)?,
            Instruction::f64Sqrt => self.un_op::<f64>(Float::wasm_sqrt)?,
            Instruction::f64Add => self.bin_op::<f64>(|a, b| a + b)?,
            Instruction::f64Sub => self.bin_op::<f64>(|a, b| a - b)?,
            Instruction::f64Mul => self.bin_op::<f64>(|a, b| a * b)?,
            Instruction::f64Div => self.bin_op::<f64>(|a, b| a / b)?,
            Instruction::f64Min => self.bin_op::<f64>(Float::wasm_min)?,
            Instruction::f64Max => self.bin_op::<f64>(Float::wasm_max)?,
            Instruction::f64CopySign => self.bin_op::<f64>(Float::wasm_copysign)?,

            Instruction::i32WrapI64 => self.convert::<i64, i32>(|a| a as i32)?,
            Instruction::i32TruncF32Signed => self.try_convert::<f32, i32>(num::i32_trunc_f32)?,
            Instruction::i32TruncF32Unsigned => self.try_convert::<f32, u32>(num::u32_trunc_f32)?,
            Instruction::i32TruncF64Signed => self.try_convert::<f64, i32>(num::i32_trunc_f64)?,
            Instruction::i32TruncF64Unsigned => self.try_convert::<f64, u32>(num::u32_trunc_f64)?,
            Instruction::i64Extendi32Signed => self.convert::<i32, i64>(i64::from)?,
            Instruction::i64Extendi32Unsigned => self.convert::<u32, i64>(i64::from)?,
            Instruction::i64TruncF32Signed => self.try_convert::<f32, i64>(num::i64_trunc_f32)?,
            Instruction::i64TruncF32Unsigned => self.try_convert::<f32, u64>(num::u64_trunc_f32)?,
            Instruction::i64TruncF64Signed => self.try_convert::<f64, i64>(num::i64_trunc_f64)?,
            Instruction::i64TruncF64Unsigned => self.try_convert::<f64, u64>(num::u64_trunc_f64)?,
            Instruction::f32SignedConvertI32 => self.convert::<i32, f32>(|a| a as f32)?,
            Instruction::f32UnsignedConvertI32 => self.convert::<u32, f32>(|a| a as f32)?,
            Instruction::f32SignedConvertI64 => self.convert::<i64, f32>(|a| a as f32)?,
            Instruction::f32UnsignedConvertI64 => self.convert::<u64, f32>(|a| a as f32)?,
            Instruction::f32DemoteF64 => self.convert::<f64, f32>(|a| a as f32)?,
            Instruction::f64SignedConvertI32 => self.convert::<i32, f64>(f64::from)?,
            Instruction::f64UnsignedConvertI32 => self.convert::<u32, f64>(f64::from)?,
            Instruction::f64SignedConvertI64 => self.convert::<i64, f64>(|a| a as f64)?,
            Instruction::f64UnsignedConvertI64 => self.convert::<u64, f64>(|a| a as f64)?,
            Instruction::f64PromoteF32 => self.convert::<f32, f64>(f64::from)?,
            Instruction::i32ReinterpretF32 => self.convert::<f32, u32>(f32::to_bits)?,
            Instruction::i64ReinterpretF64 => self.convert::<f64, u64>(f64::to_bits)?,
            Instruction::f32ReinterpretI32 => self.convert::<u32, f32>(f32::from_bits)?,
            Instruction::f64ReinterpretI64 => self.convert::<u64, f64>(f64::from_bits)?,

            Instruction::i32Extend8Signed => self.un_op::<i32>(|a| a as i8 as i32)?,
            Instruction::i32Extend16Signed => self.un_op::<i32>(|a| a as i16 as i32)?,
            Instruction::i64Extend8Signed => self.un_op::<i64>(|a| a as i8 as i64)?,
            Instruction::i64Extend16Signed => self.un_op::<i64>(|a| a as i16 as i64)?,
            Instruction::i64Extend32Signed => self.un_op::<i64>(|a| a as i32 as i64)?,

            // `as` from float to int saturates and maps NaN to zero
            Instruction::i32TruncSatf32Signed => self.convert::<f32, i32>(|a| a as i32)?,
            Instruction::i32TruncSatf32Unsigned => self.convert::<f32, u32>(|a| a as u32)?,
            Instruction::i32TruncSatf64Signed => self.convert::<f64, i32>(|a| a as i32)?,
            Instruction::i32TruncSatf64Unsigned => self.convert::<f64, u32>(|a| a as u32)?,
            Instruction::i64TruncSatf32Signed => self.convert::<f32, i64>(|a| a as i64)?,
            Instruction::i64TruncSatf32Unsigned => self.convert::<f32, u64>(|a| a as u64)?,
            Instruction::i64TruncSatf64Signed => self.convert::<f64, i64>(|a| a as i64)?,
            Instruction::i64TruncSatf64Unsigned => self.convert::<f64, u64>(|a| a as u64)?,

            Instruction::RefNull(ty) => self.stack.push_value(ty.null()),
            Instruction::RefIsNull => {
                let val = self.stack.pop_ref()?;
                self.stack.push(i32::from(val.is_null()));
            }
            Instruction::RefFunc(idx) => {
                let addr = self.module()?.func_addrs[*idx as usize];
                self.stack.push_value(Value::FuncRef(Some(addr)));
            }
        }

        Ok(Flow::Next)
    }
}

impl<'a> Interpreter<'a> {
    /// Parameter and result counts of a block.
    fn block_arity(&self, block_type: BlockType) -> Result<(usize, usize), Trap> {
        Ok(match block_type {
            BlockType::Empty => (0, 0),
            BlockType::ValType(..) => (0, 1),
            BlockType::TypeIndex(idx) => {
                let ty = &self.module()?.types[idx as usize];
                (ty.params().len(), ty.results().len())
            }
        })
    }

    fn block(&mut self, label: &BlockLabel, pc: usize, is_loop: bool) -> Result<(), Trap> {
        let (params, results) = self.block_arity(label.block_type)?;

        self.labels.push(Label {
            arity: if is_loop { params } else { results },
            height: self.stack.len() - params,
            continuation: if is_loop { pc + 1 } else { label.end + 1 },
            is_loop,
        });

        Ok(())
    }

    fn if_else(&mut self, label: &BlockLabel, pc: usize) -> Result<Flow, Trap> {
        let cond = self.stack.pop_i32()?;

        if cond == 0 {
            return match label.else_ {
                Some(else_) => {
                    self.block(label, pc, false)?;
                    Ok(Flow::Jump(else_ + 1))
                }
                // no label to pop, so skip the `end` as well
                None => Ok(Flow::Jump(label.end + 1)),
            };
        }

        self.block(label, pc, false)?;

        Ok(Flow::Next)
    }

    fn branch(&mut self, depth: u32) -> Result<Flow, Trap> {
        let idx = self
            .labels
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or(Trap::InstrTypeMismatch)?;

        let label = self.labels[idx];

        self.stack.unwind(label.height, label.arity);

        if label.is_loop {
            self.labels.truncate(idx + 1);
        } else {
            self.labels.truncate(idx);
        }

        Ok(Flow::Jump(label.continuation))
    }

    fn call_indirect(&mut self, type_idx: u32, table_idx: u32) -> Result<Flow, Trap> {
        let i = self.stack.pop_u32()?;

        let module = self.module()?;
        let table = self.store.table(module.table_addrs[table_idx as usize]);
        let expected = &module.types[type_idx as usize];

        let addr = match table.elem.get(i as usize) {
            None => return Err(Trap::UndefinedElement),
            Some(Value::FuncRef(Some(addr))) => *addr,
            Some(_) => return Err(Trap::UninitializedElement),
        };

        if self.store.func(addr).ty() != expected {
            return Err(Trap::IndirectCallTypeMismatch);
        }

        Ok(Flow::Call(addr))
    }

    fn table_init(&mut self, elem_idx: u32, table_idx: u32) -> Result<(), Trap> {
        let n = self.stack.pop_u32()?;
        let src = self.stack.pop_u32()?;
        let dst = self.stack.pop_u32()?;

        let module = self.module()?;
        let elem_addr = module.elem_addrs[elem_idx as usize];
        let table_addr = module.table_addrs[table_idx as usize];

        let elem = &self.store.elems[elem_addr].elem;
        let src = checked_range(src, n, elem.len()).ok_or(Trap::TableOutOfBounds)?;
        let values = elem[src].to_vec();

        let table = self.store.table_mut(table_addr);
        let dst = checked_range(dst, n, table.elem.len()).ok_or(Trap::TableOutOfBounds)?;

        table.elem[dst].copy_from_slice(&values);

        Ok(())
    }

    fn table_copy(&mut self, dst_idx: u32, src_idx: u32) -> Result<(), Trap> {
        let n = self.stack.pop_u32()?;
        let src = self.stack.pop_u32()?;
        let dst = self.stack.pop_u32()?;

        let module = self.module()?;
        let dst_addr = module.table_addrs[dst_idx as usize];
        let src_addr = module.table_addrs[src_idx as usize];

        if dst_addr == src_addr {
            let table = self.store.table_mut(dst_addr);
            let len = table.elem.len();
            let src = checked_range(src, n, len).ok_or(Trap::TableOutOfBounds)?;
            let dst = checked_range(dst, n, len).ok_or(Trap::TableOutOfBounds)?;

            table.elem.copy_within(src, dst.start);
        } else {
            let (dst_table, src_table) = self.store.tables_pair_mut(dst_addr, src_addr);
            let src = checked_range(src, n, src_table.elem.len()).ok_or(Trap::TableOutOfBounds)?;
            let dst = checked_range(dst, n, dst_table.elem.len()).ok_or(Trap::TableOutOfBounds)?;

            dst_table.elem[dst].copy_from_slice(&src_table.elem[src]);
        }

        Ok(())
    }

    fn memory_init(&mut self, data_idx: u32) -> Result<(), Trap> {
        let n = self.stack.pop_u32()?;
        let src = self.stack.pop_u32()?;
        let dst = self.stack.pop_u32()?;

        let addr = self.module()?.data_addrs[data_idx as usize];
        let data = &self.store.datas[addr].data;
        let src = checked_range(src, n, data.len()).ok_or(Trap::MemoryOutOfBounds)?;
        let bytes = data[src].to_vec();

        let mem = self.memory()?;
        let dst = checked_range(dst, n, mem.data.len()).ok_or(Trap::MemoryOutOfBounds)?;

        mem.data[dst].copy_from_slice(&bytes);

        Ok(())
    }

    fn effective_address(&mut self, mem_arg: MemoryOperand) -> Result<usize, Trap> {
        let base = self.stack.pop_u32()?;
        let ea = u64::from(base) + u64::from(mem_arg.offset);
        usize::try_from(ea).map_err(|_| Trap::MemoryOutOfBounds)
    }

    fn load<N: Num, F>(&mut self, mem_arg: MemoryOperand, extend: F) -> Result<(), Trap>
    where
        F: Fn(N) -> Value,
    {
        let ea = self.effective_address(mem_arg)?;
        let bytes = self.memory()?.read(ea, N::BYTES)?;
        let val = extend(N::from_le_slice(bytes));

        self.stack.push_value(val);

        Ok(())
    }

    /// Stores the low `N::BYTES` bytes of an `i32`, or all of a value whose
    /// type matches `N`.
    fn store_value<N: Num>(&mut self, mem_arg: MemoryOperand) -> Result<(), Trap> {
        let val = self.stack.pop::<N>()?;
        self.write(mem_arg, val)
    }

    /// Stores the low `N::BYTES` bytes of an `i64`.
    fn store_wrapped<N: Num>(&mut self, mem_arg: MemoryOperand) -> Result<(), Trap> {
        let val = self.stack.pop::<u64>()?;
        let mut bytes = [0; 8];
        val.write_le(&mut bytes);

        let ea = self.effective_address(mem_arg)?;
        self.memory()?.write(ea, &bytes[..N::BYTES])
    }

    fn write<N: Num>(&mut self, mem_arg: MemoryOperand, val: N) -> Result<(), Trap> {
        let mut bytes = [0; 8];
        val.write_le(&mut bytes[..N::BYTES]);

        let ea = self.effective_address(mem_arg)?;
        self.memory()?.write(ea, &bytes[..N::BYTES])
    }

    fn un_op<N: Num>(&mut self, op: impl Fn(N) -> N) -> Result<(), Trap> {
        let a = self.stack.pop::<N>()?;
        self.stack.push(op(a));
        Ok(())
    }

    fn bin_op<N: Num>(&mut self, op: impl Fn(N, N) -> N) -> Result<(), Trap> {
        let b = self.stack.pop::<N>()?;
        let a = self.stack.pop::<N>()?;
        self.stack.push(op(a, b));
        Ok(())
    }

    fn checked_bin_op<N: Num>(&mut self, op: impl Fn(N, N) -> Result<N, Trap>) -> Result<(), Trap> {
        let b = self.stack.pop::<N>()?;
        let a = self.stack.pop::<N>()?;
        self.stack.push(op(a, b)?);
        Ok(())
    }

    fn test_op<N: Num>(&mut self, op: impl Fn(N) -> bool) -> Result<(), Trap> {
        let a = self.stack.pop::<N>()?;
        self.stack.push(i32::from(op(a)));
        Ok(())
    }

    fn rel_op<N: Num>(&mut self, op: impl Fn(N, N) -> bool) -> Result<(), Trap> {
        let b = self.stack.pop::<N>()?;
        let a = self.stack.pop::<N>()?;
        self.stack.push(i32::from(op(a, b)));
        Ok(())
    }

    fn convert<A: Num, B: Num>(&mut self, op: impl Fn(A) -> B) -> Result<(), Trap> {
        let a = self.stack.pop::<A>()?;
        self.stack.push(op(a));
        Ok(())
    }

    fn try_convert<A: Num, B: Num>(&mut self, op: impl Fn(A) -> Result<B, Trap>) -> Result<(), Trap> {
        let a = self.stack.pop::<A>()?;
        self.stack.push(op(a)?);
        Ok(())
    }
}
