// Call frames: a unit of in-progress evaluation with its own operand
// stack and a program pointer into a pair chain.
//
// The untyped stack primitives live here together with the typed
// accessor families the host primitives are written against. The stack
// grows like the heap registry: doubling, starting from the configured
// initial capacity.

use enumflags2::BitFlags;

use crate::error::{copy_str, Result, Unwind};
use crate::heap::{EnvRef, FrameRef, Heap, ValRef};
use crate::interp::Interp;
use crate::value::{mismatch, Builtin, Pair, TypeTag, Value};

pub struct FrameData {
    // Previous frame in the current call stack; none for the collector
    // frame at the bottom.
    pub caller: Option<FrameRef>,
    // Frame from which this evaluation was entered, when a value needs to
    // flow back to a chain this frame is not part of.
    pub resumer: Option<FrameRef>,
    pub env: EnvRef,
    // Pair chain still to be consumed; none once all operands exist.
    pub program: Option<ValRef>,
    pub stack: Vec<ValRef>,
}

pub(crate) fn create(heap: &mut Heap, env: EnvRef) -> Result<FrameRef> {
    let mut stack = Vec::new();
    stack
        .try_reserve(heap.stack_capacity())
        .map_err(|_| Unwind::OutOfMemory)?;
    heap.alloc_frame(FrameData {
        caller: None,
        resumer: None,
        env,
        program: None,
        stack,
    })
}

pub(crate) fn push(heap: &mut Heap, f: FrameRef, v: ValRef) -> Result<()> {
    let frame = heap.frame_mut(f);
    if frame.stack.len() == frame.stack.capacity() {
        let grow = frame.stack.len().max(1);
        frame.stack.try_reserve(grow).map_err(|_| Unwind::OutOfMemory)?;
    }
    frame.stack.push(v);
    Ok(())
}

fn oob(heap: &mut Heap, i: usize, len: usize) -> Unwind {
    heap.throw(format!(
        "attempt to access stack out of bounds: i={}, len={}",
        i, len
    ))
}

// Typed accessors for variants whose payload is copied off the cell.
macro_rules! stack_scalar {
    ($get:ident, $is:ident, $push:ident, $pop:ident, $tag:ident, $t:ty) => {
        pub fn $get(&mut self, f: FrameRef, i: usize) -> Result<$t> {
            let v = self.stack_get_type(f, i, TypeTag::$tag)?;
            match self.heap.value(v) {
                Value::$tag(x) => Ok(*x),
                _ => unreachable!(),
            }
        }

        pub fn $is(&mut self, f: FrameRef, i: usize) -> Result<bool> {
            let v = self.stack_get(f, i)?;
            Ok(self.heap.value(v).type_tag() == TypeTag::$tag)
        }

        pub fn $push(&mut self, f: FrameRef, x: $t) -> Result<()> {
            let v = self.heap.alloc_value(Value::$tag(x))?;
            push(&mut self.heap, f, v)
        }

        pub fn $pop(&mut self, f: FrameRef) -> Result<$t> {
            let v = self.pop_checked(f, TypeTag::$tag)?;
            match self.heap.value(v) {
                Value::$tag(x) => Ok(*x),
                _ => unreachable!(),
            }
        }
    };
}

// Typed accessors for variants handled by reference.
macro_rules! stack_ref {
    ($get:ident, $is:ident, $pop:ident, $tag:ident) => {
        pub fn $get(&mut self, f: FrameRef, i: usize) -> Result<ValRef> {
            self.stack_get_type(f, i, TypeTag::$tag)
        }

        pub fn $is(&mut self, f: FrameRef, i: usize) -> Result<bool> {
            let v = self.stack_get(f, i)?;
            Ok(self.heap.value(v).type_tag() == TypeTag::$tag)
        }

        pub fn $pop(&mut self, f: FrameRef) -> Result<ValRef> {
            self.pop_checked(f, TypeTag::$tag)
        }
    };
}

// Push variants that copy a byte string onto the heap.
macro_rules! stack_str {
    ($push:ident, $tag:ident) => {
        pub fn $push(&mut self, f: FrameRef, s: &str) -> Result<()> {
            let owned = copy_str(s)?;
            let v = self.heap.alloc_value(Value::$tag(owned))?;
            push(&mut self.heap, f, v)
        }
    };
}

impl Interp {
    pub fn new_frame(&mut self, env: EnvRef) -> Result<FrameRef> {
        create(&mut self.heap, env)
    }

    pub fn frame_env(&self, f: FrameRef) -> EnvRef {
        self.heap.frame(f).env
    }

    pub fn frame_caller(&self, f: FrameRef) -> Option<FrameRef> {
        self.heap.frame(f).caller
    }

    pub fn stack_size(&self, f: FrameRef) -> usize {
        self.heap.frame(f).stack.len()
    }

    pub fn stack_push(&mut self, f: FrameRef, v: ValRef) -> Result<()> {
        push(&mut self.heap, f, v)
    }

    // Remove and return the top of the stack. Popping an empty stack
    // produces an Error value, not an unwind.
    pub fn stack_pop(&mut self, f: FrameRef) -> Result<ValRef> {
        match self.heap.frame_mut(f).stack.pop() {
            Some(v) => Ok(v),
            None => self
                .heap
                .alloc_value(Value::Error("cannot pop from an empty stack".to_string())),
        }
    }

    pub fn stack_peek(&mut self, f: FrameRef) -> Result<ValRef> {
        match self.heap.frame(f).stack.last() {
            Some(v) => Ok(*v),
            None => self
                .heap
                .alloc_value(Value::Error("cannot peek at an empty stack".to_string())),
        }
    }

    // Indexed access beyond the stack fails with an unwind.
    pub fn stack_get(&mut self, f: FrameRef, i: usize) -> Result<ValRef> {
        let len = self.heap.frame(f).stack.len();
        if i >= len {
            return Err(oob(&mut self.heap, i, len));
        }
        Ok(self.heap.frame(f).stack[i])
    }

    pub fn stack_get_type(&mut self, f: FrameRef, i: usize, t: TypeTag) -> Result<ValRef> {
        let v = self.stack_get(f, i)?;
        let got = self.heap.value(v).type_tag();
        if got != t {
            return Err(self.heap.throw(mismatch(BitFlags::from_flag(t), got)));
        }
        Ok(v)
    }

    // Type-check the top of the stack, then pop it. The check happens
    // first so a mismatch leaves the stack intact.
    fn pop_checked(&mut self, f: FrameRef, t: TypeTag) -> Result<ValRef> {
        let len = self.stack_size(f);
        let i = match len.checked_sub(1) {
            Some(i) => i,
            None => return Err(oob(&mut self.heap, 0, 0)),
        };
        let v = self.stack_get_type(f, i, t)?;
        self.heap.frame_mut(f).stack.pop();
        Ok(v)
    }

    stack_scalar!(get_number, is_number, push_number, pop_number, Number, i32);
    stack_scalar!(get_builtin, is_builtin, push_builtin, pop_builtin, Builtin, Builtin);

    stack_ref!(get_error, is_error, pop_error, Error);
    stack_ref!(get_symbol, is_symbol, pop_symbol, Symbol);
    stack_ref!(get_string, is_string, pop_string, Str);
    stack_ref!(get_sexpr, is_sexpr, pop_sexpr, Sexpr);
    stack_ref!(get_qexpr, is_qexpr, pop_qexpr, Qexpr);
    stack_ref!(get_lambda, is_lambda, pop_lambda, Lambda);
    stack_ref!(get_envval, is_envval, pop_envval, Env);
    stack_ref!(get_frameval, is_frameval, pop_frameval, Frame);

    stack_str!(push_error, Error);
    stack_str!(push_symbol, Symbol);
    stack_str!(push_string, Str);

    pub fn push_sexpr(
        &mut self,
        f: FrameRef,
        head: Option<ValRef>,
        tail: Option<ValRef>,
    ) -> Result<()> {
        let v = self.heap.alloc_value(Value::Sexpr(Pair { head, tail }))?;
        push(&mut self.heap, f, v)
    }

    pub fn push_qexpr(
        &mut self,
        f: FrameRef,
        head: Option<ValRef>,
        tail: Option<ValRef>,
    ) -> Result<()> {
        let v = self.heap.alloc_value(Value::Qexpr(Pair { head, tail }))?;
        push(&mut self.heap, f, v)
    }

    pub fn push_lambda(
        &mut self,
        f: FrameRef,
        params: Option<ValRef>,
        body: Option<ValRef>,
    ) -> Result<()> {
        let v = self.heap.alloc_value(Value::Lambda { params, body })?;
        push(&mut self.heap, f, v)
    }

    pub fn push_envval(&mut self, f: FrameRef, e: EnvRef) -> Result<()> {
        let v = self.heap.alloc_value(Value::Env(e))?;
        push(&mut self.heap, f, v)
    }

    pub fn push_frameval(&mut self, f: FrameRef, fv: FrameRef) -> Result<()> {
        let v = self.heap.alloc_value(Value::Frame(fv))?;
        push(&mut self.heap, f, v)
    }
}
