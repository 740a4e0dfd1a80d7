// (C) 2020 Brandon Lewis
//
// The interpreter state and the evaluator.
//
// Evaluation drives a chain of call frames. Each frame consumes its
// program one cell at a time, pushing operands: atoms push themselves,
// symbols push their binding, a nested s-expression opens a child frame,
// and a q-expression is converted to an s-expression value without being
// entered. When a frame runs out of program, operand 0 is applied:
// primitives run in place and hand their results to the caller; closures
// substitute the current frame with one running their body, so recursion
// in tail position cannot grow the chain.

use crate::builtins;
use crate::config::Tunables;
use crate::env;
use crate::error::{copy_str, Result, Unwind, OUT_OF_MEMORY};
use crate::frame;
use crate::heap::{EnvRef, FrameRef, Heap, ObjKind, ValRef};
use crate::parser;
use crate::value::{self, Builtin, Pair, TypeTag, Value};

pub struct Interp {
    pub(crate) heap: Heap,
    root_env: EnvRef,
    // The active frame chain; the second GC root besides the root env.
    frame: Option<FrameRef>,
    peak_frames: usize,
}

/// ## Construction
impl Interp {
    pub fn new() -> Result<Interp> {
        Interp::with_tunables(Tunables::default())
    }

    pub fn with_tunables(t: Tunables) -> Result<Interp> {
        let mut heap = Heap::with_capacities(t.registry_capacity, t.stack_capacity)?;
        let root_env = env::root(&mut heap)?;
        let mut it = Interp {
            heap,
            root_env,
            frame: None,
            peak_frames: 0,
        };
        for (name, func) in builtins::BASELINE {
            let k = it.symbol(name)?;
            let v = it.builtin(*func)?;
            env::put(&mut it.heap, root_env, k, v)?;
        }
        Ok(it)
    }

    pub fn root_env(&self) -> EnvRef {
        self.root_env
    }

    pub fn active_frame(&self) -> Option<FrameRef> {
        self.frame
    }

    // Peak frame-chain length of the most recent evaluation.
    pub fn peak_frames(&self) -> usize {
        self.peak_frames
    }

    pub fn live(&self) -> usize {
        self.heap.live()
    }

    pub fn live_kind(&self, kind: ObjKind) -> usize {
        self.heap.live_kind(kind)
    }
}

/// ## Value constructors
impl Interp {
    pub fn number(&mut self, n: i32) -> Result<ValRef> {
        self.heap.alloc_value(Value::Number(n))
    }

    pub fn symbol(&mut self, name: &str) -> Result<ValRef> {
        let owned = copy_str(name)?;
        self.heap.alloc_value(Value::Symbol(owned))
    }

    pub fn string(&mut self, s: &str) -> Result<ValRef> {
        let owned = copy_str(s)?;
        self.heap.alloc_value(Value::Str(owned))
    }

    pub fn error(&mut self, message: &str) -> Result<ValRef> {
        let owned = copy_str(message)?;
        self.heap.alloc_value(Value::Error(owned))
    }

    pub fn sexpr(&mut self, head: Option<ValRef>, tail: Option<ValRef>) -> Result<ValRef> {
        self.heap.alloc_value(Value::Sexpr(Pair { head, tail }))
    }

    pub fn qexpr(&mut self, head: Option<ValRef>, tail: Option<ValRef>) -> Result<ValRef> {
        self.heap.alloc_value(Value::Qexpr(Pair { head, tail }))
    }

    pub fn lambda(&mut self, params: Option<ValRef>, body: Option<ValRef>) -> Result<ValRef> {
        self.heap.alloc_value(Value::Lambda { params, body })
    }

    pub fn builtin(&mut self, func: Builtin) -> Result<ValRef> {
        self.heap.alloc_value(Value::Builtin(func))
    }

    pub fn env_value(&mut self, e: EnvRef) -> Result<ValRef> {
        self.heap.alloc_value(Value::Env(e))
    }

    pub fn frame_value(&mut self, f: FrameRef) -> Result<ValRef> {
        self.heap.alloc_value(Value::Frame(f))
    }

    // The pair of an s- or q-expression cell; none for other variants.
    pub fn pair(&self, v: ValRef) -> Option<Pair> {
        match self.heap.value(v) {
            Value::Sexpr(p) | Value::Qexpr(p) => Some(*p),
            _ => None,
        }
    }

    pub fn type_of(&self, v: ValRef) -> TypeTag {
        self.heap.value(v).type_tag()
    }

    pub fn render(&self, v: Option<ValRef>) -> String {
        value::render(&self.heap, v)
    }

    pub fn error_message(&self, u: Unwind) -> String {
        match u {
            Unwind::Error(v) => match self.heap.value(v) {
                Value::Error(msg) => msg.clone(),
                _ => value::render(&self.heap, Some(v)),
            },
            Unwind::OutOfMemory => OUT_OF_MEMORY.to_string(),
        }
    }

    // Format-and-throw surface for primitives: allocates an Error value
    // and hands it to the unwind channel.
    pub fn fail<T>(&mut self, message: String) -> Result<T> {
        Err(self.heap.throw(message))
    }
}

/// ## Environment surface
impl Interp {
    pub fn env_chain(&mut self, parent: EnvRef) -> Result<EnvRef> {
        env::chain(&mut self.heap, parent)
    }

    pub fn env_get(&mut self, e: EnvRef, key: ValRef) -> Result<ValRef> {
        env::get(&mut self.heap, e, key)
    }

    pub fn env_get_pair(&mut self, e: EnvRef, key: ValRef) -> Result<Option<ValRef>> {
        env::get_pair(&mut self.heap, e, key)
    }

    pub fn env_set(&mut self, e: EnvRef, key: ValRef, v: ValRef) -> Result<ValRef> {
        env::set(&mut self.heap, e, key, v)
    }

    pub fn env_put(&mut self, e: EnvRef, key: ValRef, v: ValRef) -> Result<ValRef> {
        env::put(&mut self.heap, e, key, v)
    }
}

/// ## Reading, evaluation, collection
impl Interp {
    // Parse the first form of `input` into a fresh frame whose program is
    // a one-element chain holding the form. The frame becomes the active
    // chain so a collection between read and eval cannot reclaim it.
    pub fn read(&mut self, input: &str) -> Result<FrameRef> {
        let f = frame::create(&mut self.heap, self.root_env)?;
        let form = {
            let mut reader = parser::Reader::new(input);
            reader.parse(&mut self.heap)?
        };
        if let Some(v) = form {
            let program = self.sexpr(Some(v), None)?;
            self.heap.frame_mut(f).program = Some(program);
        }
        self.frame = Some(f);
        Ok(f)
    }

    // Run the frame chain to completion. On success the results are on
    // the stack of `root`, which stays the active frame until the next
    // read; on an unwind the error value is handed back and the work in
    // progress becomes garbage for the next collection.
    pub fn eval(&mut self, root: FrameRef) -> Result<()> {
        match self.run(root) {
            Ok(()) => {
                self.frame = Some(root);
                Ok(())
            }
            Err(u) => {
                self.frame = None;
                Err(u)
            }
        }
    }

    pub fn gc(&mut self) -> Result<usize> {
        self.heap.collect(Some(self.root_env), self.frame)
    }

    fn run(&mut self, root: FrameRef) -> Result<()> {
        let mut depth = 1;
        let mut walk = self.heap.frame(root).caller;
        while let Some(up) = walk {
            depth += 1;
            walk = self.heap.frame(up).caller;
        }
        self.peak_frames = depth;

        let mut current = Some(root);
        'frames: while let Some(fr) = current {
            self.frame = Some(fr);

            // Produce operands until the program is exhausted.
            loop {
                let ip = match self.heap.frame(fr).program {
                    Some(ip) => ip,
                    None => break,
                };
                let cell = match self.heap.value(ip) {
                    Value::Sexpr(p) | Value::Qexpr(p) => *p,
                    other => {
                        let t = other.type_tag();
                        return Err(self.heap.throw(format!("illegal type: {}", t)));
                    }
                };
                let v = match cell.head {
                    Some(v) => v,
                    None => {
                        // The empty-list cell carries no operands.
                        self.heap.frame_mut(fr).program = None;
                        break;
                    }
                };

                trace!("evaluating: {}", value::render(&self.heap, Some(v)));

                match self.heap.value(v).type_tag() {
                    TypeTag::Error => return Err(Unwind::Error(v)),
                    TypeTag::Number | TypeTag::Str | TypeTag::Builtin | TypeTag::Lambda => {
                        self.stack_push(fr, v)?;
                    }
                    TypeTag::Symbol => {
                        let e = self.heap.frame(fr).env;
                        let bound = env::get(&mut self.heap, e, v)?;
                        if self.heap.value(bound).type_tag() == TypeTag::Error {
                            return Err(Unwind::Error(bound));
                        }
                        self.stack_push(fr, bound)?;
                    }
                    TypeTag::Sexpr => {
                        // Go one frame deeper.
                        let e = self.heap.frame(fr).env;
                        let child = frame::create(&mut self.heap, e)?;
                        {
                            let c = self.heap.frame_mut(child);
                            c.caller = Some(fr);
                            c.program = Some(v);
                        }
                        self.heap.frame_mut(fr).program = cell.tail;
                        depth += 1;
                        if depth > self.peak_frames {
                            self.peak_frames = depth;
                        }
                        current = Some(child);
                        continue 'frames;
                    }
                    TypeTag::Qexpr => {
                        let code = self.quote_to_code(v)?;
                        self.stack_push(fr, code)?;
                    }
                    other => {
                        return Err(self.heap.throw(format!("illegal type: {}", other)));
                    }
                }

                self.heap.frame_mut(fr).program = cell.tail;
            }

            // Apply operand 0, or finish the frame.
            let caller = self.heap.frame(fr).caller;
            let fn0 = match self.heap.frame(fr).stack.first().copied() {
                Some(v) => v,
                None => {
                    // Empty invocation: the result is the empty list.
                    let empty = self.sexpr(None, None)?;
                    match caller {
                        Some(up) => self.stack_push(up, empty)?,
                        None => self.stack_push(fr, empty)?,
                    }
                    depth = depth.saturating_sub(1);
                    current = caller;
                    continue 'frames;
                }
            };

            if caller.is_none() {
                // The bottom frame only collects; whatever it accumulated
                // is the final result set, observed in place by the host.
                current = None;
                continue 'frames;
            }

            match self.heap.value(fn0).type_tag() {
                TypeTag::Builtin => {
                    let func = match self.heap.value(fn0) {
                        Value::Builtin(b) => *b,
                        _ => unreachable!(),
                    };
                    let count = func(self, fr)?;
                    let size = self.stack_size(fr);
                    if size < count {
                        return Err(self.heap.throw(format!(
                            "builtin wants to return {} values, but there are only {} values on the stack",
                            count, size
                        )));
                    }
                    let up = caller.expect("applied frames have a caller");
                    let results: Vec<ValRef> = self.heap.frame(fr).stack[size - count..].to_vec();
                    for v in results {
                        self.stack_push(up, v)?;
                    }
                    depth -= 1;
                    current = caller;
                }
                TypeTag::Lambda => {
                    let (params, body) = match self.heap.value(fn0) {
                        Value::Lambda { params, body } => (*params, *body),
                        _ => unreachable!(),
                    };

                    // Bind arguments under a scope chained to this frame,
                    // stopping at whichever list runs out first.
                    let parent = self.heap.frame(fr).env;
                    let scope = env::chain(&mut self.heap, parent)?;
                    let args: Vec<ValRef> = self.heap.frame(fr).stack[1..].to_vec();
                    let mut par = params;
                    for arg in args {
                        let cell = match par {
                            Some(p) => match self.heap.value(p) {
                                Value::Sexpr(q) | Value::Qexpr(q) => *q,
                                _ => break,
                            },
                            None => break,
                        };
                        let key = match cell.head {
                            Some(k) => k,
                            None => break,
                        };
                        env::put(&mut self.heap, scope, key, arg)?;
                        par = cell.tail;
                    }

                    // Substitute, never extend: the replacement takes over
                    // this frame's caller, so the chain cannot grow.
                    let replacement = frame::create(&mut self.heap, scope)?;
                    {
                        let r = self.heap.frame_mut(replacement);
                        r.caller = caller;
                        r.program = body;
                    }
                    current = Some(replacement);
                }
                other => {
                    return Err(self.heap.throw(format!("not invocable type: {}", other)));
                }
            }
        }

        Ok(())
    }

    // Build a parallel s-expression chain over a q-expression's cells.
    // Heads are shared, so the quoted data becomes live code.
    pub(crate) fn quote_to_code(&mut self, q: ValRef) -> Result<ValRef> {
        let first = match self.heap.value(q) {
            Value::Qexpr(p) => *p,
            other => {
                let t = other.type_tag();
                return Err(self.heap.throw(format!("illegal type: {}", t)));
            }
        };
        let root = self.sexpr(first.head, None)?;
        let mut out = root;
        let mut cursor = first.tail;
        while let Some(cell) = cursor {
            let p = match self.heap.value(cell) {
                Value::Sexpr(p) | Value::Qexpr(p) => *p,
                _ => break,
            };
            let node = self.sexpr(p.head, None)?;
            if let Value::Sexpr(o) = self.heap.value_mut(out) {
                o.tail = Some(node);
            }
            out = node;
            cursor = p.tail;
        }
        Ok(root)
    }
}
