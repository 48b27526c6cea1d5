use core::fmt;

use crate::vm::{FaultKind, Value};

/// Size in bytes of one stack slot.
pub const SLOT: i32 = 4;

/// The byte-addressed value stack of the virtual machine.
///
/// Storage is kept separate from the stack pointer: moving the pointer down
/// does not destroy the slots above it, so a later positive move exposes them
/// again. Every offset taken by the public API is a negative byte offset from
/// the current top.
///
/// # Examples
///
/// ```ignore
/// use nwscript_core::vm::{Stack, Value};
///
/// let mut stack = Stack::new(1024);
/// stack.push(Value::Float(1.0))?;
/// stack.push_vector([2.0, 3.0, 4.0])?;
/// stack.push(Value::Float(5.0))?;
/// assert_eq!(stack.peek(-20)?, &Value::Float(1.0));
/// ```
pub struct Stack {
    /// Slot storage. Only `slots[..sp]` is live.
    slots: Vec<Value>,
    /// Stack pointer, in slots.
    sp: usize,
    /// Maximum size in bytes.
    max_bytes: usize,
}

impl Stack {
    /// Creates an empty stack that faults once it would exceed `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            slots: Vec::with_capacity((max_bytes / SLOT as usize).min(256)),
            sp: 0,
            max_bytes,
        }
    }

    /// Stack pointer in bytes.
    #[inline]
    pub fn sp(&self) -> usize {
        self.sp * SLOT as usize
    }

    /// Number of live slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.sp
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sp == 0
    }

    /// Pushes one scalar, advancing the stack pointer by four bytes.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut stack = Stack::new(64);
    /// stack.push(Value::Int(42))?;
    /// assert_eq!(stack.sp(), 4);
    /// ```
    pub fn push(&mut self, value: Value) -> Result<(), FaultKind> {
        if self.sp() + SLOT as usize > self.max_bytes {
            return Err(FaultKind::StackOverflow {
                limit: self.max_bytes,
            });
        }
        if self.sp < self.slots.len() {
            self.slots[self.sp] = value;
        } else {
            self.slots.push(value);
        }
        self.sp += 1;
        Ok(())
    }

    /// Pushes the three components of a vector, `x` deepest.
    pub fn push_vector(&mut self, [x, y, z]: [f32; 3]) -> Result<(), FaultKind> {
        self.push(Value::Float(x))?;
        self.push(Value::Float(y))?;
        self.push(Value::Float(z))
    }

    pub fn pop(&mut self) -> Result<Value, FaultKind> {
        if self.sp == 0 {
            return Err(FaultKind::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.slots[self.sp].clone())
    }

    pub fn pop_int(&mut self) -> Result<i32, FaultKind> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            other => Err(mismatch("int", &other)),
        }
    }

    pub fn pop_float(&mut self) -> Result<f32, FaultKind> {
        match self.pop()? {
            Value::Float(value) => Ok(value),
            other => Err(mismatch("float", &other)),
        }
    }

    /// Pops a vector pushed with [`Stack::push_vector`].
    pub fn pop_vector(&mut self) -> Result<[f32; 3], FaultKind> {
        let z = self.pop_float()?;
        let y = self.pop_float()?;
        let x = self.pop_float()?;
        Ok([x, y, z])
    }

    /// Reads the slot whose byte offset from the top equals `offset`.
    ///
    /// `-4` is the top slot, `-8` the one below it and so on.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut stack = Stack::new(64);
    /// stack.push(Value::Int(1))?;
    /// stack.push(Value::Int(2))?;
    /// assert_eq!(stack.peek(-8)?, &Value::Int(1));
    /// ```
    pub fn peek(&self, offset: i32) -> Result<&Value, FaultKind> {
        let index = self.index_of(offset)?;
        Ok(&self.slots[index])
    }

    pub fn peek_mut(&mut self, offset: i32) -> Result<&mut Value, FaultKind> {
        let index = self.index_of(offset)?;
        Ok(&mut self.slots[index])
    }

    /// Shifts the stack pointer by `delta` bytes without copying.
    ///
    /// A negative delta discards slots, a positive one exposes slots left
    /// above the pointer by an earlier move (or fresh zeroed ints).
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut stack = Stack::new(64);
    /// for v in 1..=6 {
    ///     stack.push(Value::Float(v as f32))?;
    /// }
    /// stack.move_sp(-12)?;
    /// assert_eq!(stack.len(), 3);
    /// ```
    pub fn move_sp(&mut self, delta: i32) -> Result<(), FaultKind> {
        if delta % SLOT != 0 {
            return Err(FaultKind::Misaligned(delta));
        }
        let slots = (delta / SLOT).unsigned_abs() as usize;
        if delta < 0 {
            if slots > self.sp {
                return Err(FaultKind::StackUnderflow);
            }
            self.sp -= slots;
        } else {
            if self.sp() + slots * SLOT as usize > self.max_bytes {
                return Err(FaultKind::StackOverflow {
                    limit: self.max_bytes,
                });
            }
            self.sp += slots;
            if self.slots.len() < self.sp {
                self.slots.resize(self.sp, Value::Int(0));
            }
        }
        Ok(())
    }

    /// Copies the top `byte_count` bytes down to `target_offset`.
    ///
    /// The stack pointer does not change; the copied values stay on top.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // stack (bottom to top): 1 2 3 4 5 6
    /// stack.copy_down(-24, 12)?;
    /// // stack (bottom to top): 4 5 6 4 5 6
    /// ```
    pub fn copy_down(&mut self, target_offset: i32, byte_count: usize) -> Result<(), FaultKind> {
        let count = slot_count(byte_count)?;
        let target = self.index_of(target_offset)?;
        if count > self.sp || target + count > self.sp {
            return Err(FaultKind::StackUnderflow);
        }
        let source = self.sp - count;
        let copied: Vec<Value> = self.slots[source..self.sp].to_vec();
        self.slots[target..target + count].clone_from_slice(&copied);
        Ok(())
    }

    /// Pushes a copy of the `byte_count` bytes starting at `source_offset`.
    pub fn copy_top(&mut self, source_offset: i32, byte_count: usize) -> Result<(), FaultKind> {
        let count = slot_count(byte_count)?;
        let source = self.index_of(source_offset)?;
        if source + count > self.sp {
            return Err(FaultKind::StackUnderflow);
        }
        for i in 0..count {
            let value = self.slots[source + i].clone();
            self.push(value)?;
        }
        Ok(())
    }

    /// Slot at an absolute byte position from the bottom of the stack.
    pub fn get_absolute(&self, position: usize) -> Result<&Value, FaultKind> {
        let index = position / SLOT as usize;
        if position % SLOT as usize != 0 || index >= self.sp {
            return Err(FaultKind::StackUnderflow);
        }
        Ok(&self.slots[index])
    }

    pub fn set_absolute(&mut self, position: usize, value: Value) -> Result<(), FaultKind> {
        let index = position / SLOT as usize;
        if position % SLOT as usize != 0 || index >= self.sp {
            return Err(FaultKind::StackUnderflow);
        }
        self.slots[index] = value;
        Ok(())
    }

    /// Live values from the top of the stack downwards.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &Value> {
        self.slots[..self.sp].iter().rev()
    }

    fn index_of(&self, offset: i32) -> Result<usize, FaultKind> {
        if offset >= 0 || offset % SLOT != 0 {
            return Err(FaultKind::Misaligned(offset));
        }
        let depth = (offset.unsigned_abs() / SLOT as u32) as usize;
        if depth > self.sp {
            return Err(FaultKind::StackUnderflow);
        }
        Ok(self.sp - depth)
    }
}

fn slot_count(byte_count: usize) -> Result<usize, FaultKind> {
    if byte_count % SLOT as usize != 0 {
        return Err(FaultKind::Misaligned(byte_count as i32));
    }
    Ok(byte_count / SLOT as usize)
}

fn mismatch(expected: &'static str, found: &Value) -> FaultKind {
    FaultKind::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.slots[..self.sp]).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn six_floats() -> Stack {
        let mut stack = Stack::new(1024);
        for v in 1..=6 {
            stack.push(Value::Float(v as f32)).unwrap();
        }
        stack
    }

    fn top_down(stack: &Stack) -> Vec<Value> {
        stack.iter_top_down().cloned().collect()
    }

    #[test]
    fn test_peek_through_vector() {
        let mut stack = Stack::new(1024);
        stack.push(Value::Float(1.0)).unwrap();
        stack.push_vector([2.0, 3.0, 4.0]).unwrap();
        stack.push(Value::Float(5.0)).unwrap();
        assert_eq!(stack.peek(-20).unwrap(), &Value::Float(1.0));
        assert_eq!(stack.peek(-8).unwrap(), &Value::Float(4.0));
    }

    #[test]
    fn test_move_discards() {
        let mut stack = six_floats();
        stack.move_sp(-12).unwrap();
        assert_eq!(
            top_down(&stack),
            vec![Value::Float(3.0), Value::Float(2.0), Value::Float(1.0)]
        );
    }

    #[test]
    fn test_move_exposes_old_slots() {
        let mut stack = six_floats();
        stack.move_sp(-8).unwrap();
        stack.move_sp(4).unwrap();
        assert_eq!(stack.peek(-4).unwrap(), &Value::Float(5.0));
    }

    #[test]
    fn test_copy_down_single() {
        let mut stack = six_floats();
        stack.copy_down(-12, 4).unwrap();
        assert_eq!(stack.peek(-12).unwrap(), &Value::Float(6.0));
        assert_eq!(stack.len(), 6);
    }

    #[test]
    fn test_copy_down_multi() {
        let mut stack = six_floats();
        stack.copy_down(-24, 12).unwrap();
        assert_eq!(stack.peek(-24).unwrap(), &Value::Float(4.0));
        assert_eq!(stack.peek(-20).unwrap(), &Value::Float(5.0));
        assert_eq!(stack.peek(-16).unwrap(), &Value::Float(6.0));
    }

    #[test]
    fn test_copy_top() {
        let mut stack = six_floats();
        stack.copy_top(-24, 8).unwrap();
        assert_eq!(stack.len(), 8);
        assert_eq!(stack.peek(-8).unwrap(), &Value::Float(1.0));
        assert_eq!(stack.peek(-4).unwrap(), &Value::Float(2.0));
    }

    #[test]
    fn test_underflow_and_alignment() {
        let mut stack = Stack::new(64);
        assert_eq!(stack.pop(), Err(FaultKind::StackUnderflow));
        stack.push(Value::Int(1)).unwrap();
        assert_eq!(stack.peek(-8), Err(FaultKind::StackUnderflow));
        assert_eq!(stack.peek(-3), Err(FaultKind::Misaligned(-3)));
        assert_eq!(stack.move_sp(-8), Err(FaultKind::StackUnderflow));
    }

    #[test]
    fn test_most_negative_offset_underflows() {
        let mut stack = six_floats();
        assert_eq!(stack.peek(i32::MIN), Err(FaultKind::StackUnderflow));
        assert_eq!(stack.copy_top(i32::MIN, 4), Err(FaultKind::StackUnderflow));
        assert_eq!(stack.copy_down(i32::MIN, 4), Err(FaultKind::StackUnderflow));
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::new(8);
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        assert_eq!(
            stack.push(Value::Int(3)),
            Err(FaultKind::StackOverflow { limit: 8 })
        );
    }

    #[test]
    fn test_pop_type_mismatch() {
        let mut stack = Stack::new(64);
        stack.push(Value::String("x".into())).unwrap();
        assert_eq!(
            stack.pop_int(),
            Err(FaultKind::TypeMismatch {
                expected: "int",
                found: "string"
            })
        );
    }
}
