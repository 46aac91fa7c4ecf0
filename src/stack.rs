use std::sync::Arc;

use crate::{
    error::Trap,
    num::Num,
    opcode::Instruction,
    store::{MemAddr, ModuleAddr},
    value::Value,
};

/// Operand stack shared by every frame of one invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Stack(Vec<Value>);

impl Stack {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push_value(&mut self, value: Value) {
        self.0.push(value);
    }

    pub fn push<N: Num>(&mut self, n: N) {
        self.push_value(n.as_value());
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.0.extend(values);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn pop_value(&mut self) -> Result<Value, Trap> {
        self.0.pop().ok_or(Trap::InstrTypeMismatch)
    }

    pub fn pop<N: Num>(&mut self) -> Result<N, Trap> {
        N::from_value(self.pop_value()?)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        self.pop_value()?.assert_i32()
    }

    /// Pops an `i32` operand used as an address, length or index.
    pub fn pop_u32(&mut self) -> Result<u32, Trap> {
        Ok(self.pop_i32()? as u32)
    }

    pub fn pop_ref(&mut self) -> Result<Value, Trap> {
        self.pop_value()?.assert_ref()
    }

    /// Removes the top `n` values, oldest first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        let at = self.len().checked_sub(n).ok_or(Trap::InstrTypeMismatch)?;
        Ok(self.0.split_off(at))
    }

    /// Drops everything above `height` except the top `keep` values.
    pub fn unwind(&mut self, height: usize, keep: usize) {
        let len = self.len();

        if len > height + keep {
            self.0.drain(height..len - keep);
        }
    }
}

/// A structured control instruction that is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label {
    /// Values carried by a branch to this label.
    pub arity: usize,
    /// Operand stack height below the block's parameters.
    pub height: usize,
    /// Where a branch to this label continues.
    pub continuation: usize,
    pub is_loop: bool,
}

/// Activation of a wasm function.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) module: ModuleAddr,
    pub(crate) memory: Option<MemAddr>,
    pub(crate) code: Arc<[Instruction]>,
    /// Resume position while a callee runs.
    pub(crate) pc: usize,
    pub(crate) locals: Vec<Value>,
    pub(crate) stack_base: usize,
    pub(crate) label_base: usize,
    pub(crate) arity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_keeps_branch_values() {
        let mut stack = Stack::new();
        stack.extend([1, 2, 3, 4, 5].map(Value::I32));

        stack.unwind(1, 2);

        assert_eq!(stack.pop_n(3).unwrap(), [1, 4, 5].map(Value::I32));
        assert!(stack.pop_value().is_err());
    }

    #[test]
    fn typed_pops() {
        let mut stack = Stack::new();
        stack.push(-1i32);
        stack.push(2.5f64);

        assert_eq!(stack.pop::<i32>(), Err(Trap::InstrTypeMismatch));
        assert_eq!(stack.pop_u32(), Ok(u32::MAX));
    }
}
