// (C) 2020 Brandon Lewis
//
// The heap: a slab of tagged cells, a registry of the live ones, and a
// mark-and-sweep collector over both.
//
// Every cell carries a one-byte header: the top two bits are the object
// kind, fixed at allocation, and the low six bits are the mark color,
// rewritten on every collection cycle. References are indices into the
// slab; a cell keeps its slot for its whole lifetime, so references stay
// valid across registry reshuffling. The registry is the ordered list of
// live cells the sweep walks; its order is not observable.

use crate::env::EnvData;
use crate::error::{Result, Unwind};
use crate::frame::FrameData;
use crate::value::Value;

const MARK_OFFSET: u8 = 6;
const MARK_COLOR: u8 = 0x3F;

// Default initial capacity for the registry and for operand stacks.
pub const INITIAL_CAPACITY: usize = 8;

// The two kind bits of a cell header. State is only ever the kind of the
// interpreter state itself, which lives outside the slab; finding it on a
// registered cell means the header was corrupted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjKind {
    State = 0b00,
    Env = 0b01,
    Frame = 0b10,
    Value = 0b11,
}

fn header(kind: ObjKind, color: u8) -> u8 {
    ((kind as u8) << MARK_OFFSET) | (color & MARK_COLOR)
}

fn color_bits(mark: u8) -> u8 {
    mark & MARK_COLOR
}

fn kind_bits(mark: u8) -> u8 {
    mark >> MARK_OFFSET
}

fn with_color(mark: u8, color: u8) -> u8 {
    (mark & !MARK_COLOR) | (color & MARK_COLOR)
}

// Reference to any registered cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

// References to cells of a known kind. Comparison is identity, like the
// scheme `eq?`, not structural equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValRef(pub(crate) u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnvRef(pub(crate) u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameRef(pub(crate) u32);

impl ValRef {
    pub(crate) fn obj(self) -> ObjRef {
        ObjRef(self.0)
    }
}

impl EnvRef {
    pub(crate) fn obj(self) -> ObjRef {
        ObjRef(self.0)
    }
}

impl FrameRef {
    pub(crate) fn obj(self) -> ObjRef {
        ObjRef(self.0)
    }
}

pub(crate) enum Body {
    Env(EnvData),
    Frame(FrameData),
    Value(Value),
}

struct Slot {
    mark: u8,
    body: Body,
}

// Ordered list of live cells. Growth doubles starting from the initial
// capacity; when occupancy drops to a quarter the capacity is halved, but
// never below the initial size.
pub(crate) struct Registry {
    refs: Vec<ObjRef>,
    initial: usize,
}

impl Registry {
    fn with_capacity(initial: usize) -> Result<Registry> {
        let mut refs = Vec::new();
        refs.try_reserve(initial).map_err(|_| Unwind::OutOfMemory)?;
        Ok(Registry { refs, initial })
    }

    fn len(&self) -> usize {
        self.refs.len()
    }

    fn capacity(&self) -> usize {
        self.refs.capacity()
    }

    // Make room for one more entry, so the following push cannot fail.
    fn reserve_one(&mut self) -> Result<()> {
        if self.refs.len() == self.refs.capacity() {
            let grow = self.refs.len().max(1);
            self.refs.try_reserve(grow).map_err(|_| Unwind::OutOfMemory)?;
        }
        Ok(())
    }

    fn push(&mut self, r: ObjRef) {
        debug_assert!(self.refs.len() < self.refs.capacity());
        self.refs.push(r);
    }

    fn get(&self, i: usize) -> ObjRef {
        self.refs[i]
    }

    // Swap the last entry into the vacated slot; order is not observable.
    fn swap_remove(&mut self, i: usize) {
        self.refs.swap_remove(i);
        self.maybe_shrink();
    }

    fn maybe_shrink(&mut self) {
        let half = self.refs.capacity() / 2;
        if half >= self.initial && self.refs.len() * 4 <= self.refs.capacity() {
            self.refs.shrink_to(half);
        }
    }

    fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.refs.iter().copied()
    }
}

// The heap proper. Also the state root of the collector: the `mark` field
// is the root's own header byte, whose color names the current cycle.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    registry: Registry,
    mark: u8,
    stack_capacity: usize,
}

impl Heap {
    pub(crate) fn with_capacities(registry: usize, stack: usize) -> Result<Heap> {
        Ok(Heap {
            slots: Vec::new(),
            free: Vec::new(),
            registry: Registry::with_capacity(registry)?,
            mark: header(ObjKind::State, 0),
            stack_capacity: stack,
        })
    }

    // The current cycle color.
    pub(crate) fn color(&self) -> u8 {
        color_bits(self.mark)
    }

    pub(crate) fn stack_capacity(&self) -> usize {
        self.stack_capacity
    }

    // Number of registered cells.
    pub fn live(&self) -> usize {
        self.registry.len()
    }

    pub fn live_kind(&self, kind: ObjKind) -> usize {
        self.registry
            .iter()
            .filter(|r| kind_bits(self.slot(*r).mark) == kind as u8)
            .count()
    }

    fn slot(&self, r: ObjRef) -> &Slot {
        self.slots[r.0 as usize]
            .as_ref()
            .expect("dangling heap reference")
    }

    fn slot_mut(&mut self, r: ObjRef) -> &mut Slot {
        self.slots[r.0 as usize]
            .as_mut()
            .expect("dangling heap reference")
    }

    // Reserve a slot, register it, and stamp the header. Capacity is
    // secured up front so a cell is never left allocated but unregistered.
    fn alloc(&mut self, kind: ObjKind, body: Body) -> Result<ObjRef> {
        self.registry.reserve_one()?;
        if self.free.is_empty() && self.slots.len() == self.slots.capacity() {
            let grow = self.slots.len().max(INITIAL_CAPACITY);
            self.slots.try_reserve(grow).map_err(|_| Unwind::OutOfMemory)?;
        }
        let slot = Slot {
            mark: header(kind, self.color()),
            body,
        };
        let index = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };
        let r = ObjRef(index);
        self.registry.push(r);
        Ok(r)
    }

    pub(crate) fn alloc_value(&mut self, v: Value) -> Result<ValRef> {
        Ok(ValRef(self.alloc(ObjKind::Value, Body::Value(v))?.0))
    }

    pub(crate) fn alloc_env(&mut self, e: EnvData) -> Result<EnvRef> {
        Ok(EnvRef(self.alloc(ObjKind::Env, Body::Env(e))?.0))
    }

    pub(crate) fn alloc_frame(&mut self, f: FrameData) -> Result<FrameRef> {
        Ok(FrameRef(self.alloc(ObjKind::Frame, Body::Frame(f))?.0))
    }

    pub(crate) fn value(&self, v: ValRef) -> &Value {
        match &self.slot(v.obj()).body {
            Body::Value(val) => val,
            _ => panic!("value reference to a non-value cell"),
        }
    }

    pub(crate) fn value_mut(&mut self, v: ValRef) -> &mut Value {
        match &mut self.slot_mut(v.obj()).body {
            Body::Value(val) => val,
            _ => panic!("value reference to a non-value cell"),
        }
    }

    pub(crate) fn env(&self, e: EnvRef) -> &EnvData {
        match &self.slot(e.obj()).body {
            Body::Env(env) => env,
            _ => panic!("env reference to a non-env cell"),
        }
    }

    pub(crate) fn env_mut(&mut self, e: EnvRef) -> &mut EnvData {
        match &mut self.slot_mut(e.obj()).body {
            Body::Env(env) => env,
            _ => panic!("env reference to a non-env cell"),
        }
    }

    pub(crate) fn frame(&self, f: FrameRef) -> &FrameData {
        match &self.slot(f.obj()).body {
            Body::Frame(frame) => frame,
            _ => panic!("frame reference to a non-frame cell"),
        }
    }

    pub(crate) fn frame_mut(&mut self, f: FrameRef) -> &mut FrameData {
        match &mut self.slot_mut(f.obj()).body {
            Body::Frame(frame) => frame,
            _ => panic!("frame reference to a non-frame cell"),
        }
    }

    // Allocate an error value for a throw. If even that fails, degrade to
    // the static out-of-memory report.
    pub(crate) fn throw(&mut self, message: String) -> Unwind {
        match self.alloc_value(Value::Error(message)) {
            Ok(v) => Unwind::Error(v),
            Err(u) => u,
        }
    }

    #[cfg(test)]
    pub(crate) fn color_of(&self, r: ObjRef) -> u8 {
        color_bits(self.slot(r).mark)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_header(&mut self, r: ObjRef) {
        self.slot_mut(r).mark &= MARK_COLOR;
    }

    // Mark everything reachable from the roots with the given color and
    // return the count of newly colored cells, the state root included.
    fn mark_all(&mut self, color: u8, root_env: Option<EnvRef>, frame: Option<FrameRef>) -> usize {
        self.mark = with_color(self.mark, color);
        let mut marked = 1;

        let mut pending: Vec<ObjRef> = Vec::new();
        if let Some(e) = root_env {
            pending.push(e.obj());
        }
        if let Some(f) = frame {
            pending.push(f.obj());
        }

        while let Some(r) = pending.pop() {
            if color_bits(self.slot(r).mark) == color {
                continue;
            }
            {
                let slot = self.slot_mut(r);
                slot.mark = with_color(slot.mark, color);
            }
            marked += 1;

            match &self.slot(r).body {
                Body::Env(env) => {
                    if let Some(parent) = env.parent {
                        pending.push(parent.obj());
                    }
                    if let Some(vars) = env.vars {
                        pending.push(vars.obj());
                    }
                }
                Body::Frame(frame) => {
                    if let Some(caller) = frame.caller {
                        pending.push(caller.obj());
                    }
                    if let Some(resumer) = frame.resumer {
                        pending.push(resumer.obj());
                    }
                    pending.push(frame.env.obj());
                    pending.extend(frame.stack.iter().map(|v| v.obj()));
                }
                Body::Value(value) => match value {
                    Value::Sexpr(p) | Value::Qexpr(p) => {
                        if let Some(head) = p.head {
                            pending.push(head.obj());
                        }
                        if let Some(tail) = p.tail {
                            pending.push(tail.obj());
                        }
                    }
                    Value::Lambda { params, body } => {
                        if let Some(params) = *params {
                            pending.push(params.obj());
                        }
                        if let Some(body) = *body {
                            pending.push(body.obj());
                        }
                    }
                    Value::Env(e) => pending.push(e.obj()),
                    Value::Frame(f) => pending.push(f.obj()),
                    _ => {}
                },
            }
        }

        marked
    }

    // One full collection cycle. Returns the number of cells swept. When
    // marking accounts for every registered cell (plus the state root),
    // nothing is dead and the sweep is skipped.
    pub fn collect(&mut self, root_env: Option<EnvRef>, frame: Option<FrameRef>) -> Result<usize> {
        let color = (self.color() + 1) & MARK_COLOR;
        let marked = self.mark_all(color, root_env, frame);

        if marked == self.registry.len() + 1 {
            trace!("gc: 0");
            return Ok(0);
        }

        let mut swept = 0;
        let mut i = 0;
        while i < self.registry.len() {
            let r = self.registry.get(i);
            let mark = self.slot(r).mark;
            if color_bits(mark) == color {
                i += 1;
                continue;
            }
            let kind = kind_bits(mark);
            if kind == ObjKind::State as u8 {
                return Err(self.throw(format!("bad marker type: {}", kind)));
            }
            self.free.try_reserve(1).map_err(|_| Unwind::OutOfMemory)?;
            self.free.push(r.0);
            self.slots[r.0 as usize] = None;
            self.registry.swap_remove(i);
            swept += 1;
        }

        trace!("gc: {}", swept);
        Ok(swept)
    }

    #[cfg(test)]
    pub(crate) fn registry_capacity(&self) -> usize {
        self.registry.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn heap() -> Heap {
        Heap::with_capacities(INITIAL_CAPACITY, INITIAL_CAPACITY).unwrap()
    }

    fn number(h: &mut Heap, n: i32) -> ValRef {
        h.alloc_value(Value::Number(n)).unwrap()
    }

    #[test]
    fn test_alloc_registers_once() {
        let mut h = heap();
        assert_eq!(h.live(), 0);
        let v = number(&mut h, 42);
        assert_eq!(h.live(), 1);
        assert_eq!(h.live_kind(ObjKind::Value), 1);
        assert_eq!(*h.value(v), Value::Number(42));
    }

    #[test]
    fn test_collect_reclaims_unreachable() {
        let mut h = heap();
        for i in 0..100 {
            number(&mut h, i);
        }
        assert_eq!(h.live(), 100);
        let swept = h.collect(None, None).unwrap();
        assert_eq!(swept, 100);
        assert_eq!(h.live(), 0);
    }

    #[test]
    fn test_collect_skips_sweep_when_all_reachable() {
        let mut h = heap();
        let head = number(&mut h, 1);
        let tail = h
            .alloc_value(Value::Sexpr(crate::value::Pair {
                head: None,
                tail: None,
            }))
            .unwrap();
        let pair = h
            .alloc_value(Value::Sexpr(crate::value::Pair {
                head: Some(head),
                tail: Some(tail),
            }))
            .unwrap();
        let env = h
            .alloc_env(EnvData {
                parent: None,
                vars: Some(pair),
            })
            .unwrap();

        let swept = h.collect(Some(env), None).unwrap();
        assert_eq!(swept, 0);
        assert_eq!(h.live(), 4);
    }

    #[test]
    fn test_marked_cells_carry_cycle_color() {
        let mut h = heap();
        let v = number(&mut h, 7);
        let env = h
            .alloc_env(EnvData {
                parent: None,
                vars: Some(v),
            })
            .unwrap();
        h.collect(Some(env), None).unwrap();
        assert_eq!(h.color_of(v.obj()), h.color());
        assert_eq!(h.color_of(env.obj()), h.color());
    }

    #[test]
    fn test_pair_traversal_marks_contents() {
        let mut h = heap();
        // (1 2) reachable through an env's binding list, plus a loose 3.
        let two = number(&mut h, 2);
        let second = h
            .alloc_value(Value::Sexpr(crate::value::Pair {
                head: Some(two),
                tail: None,
            }))
            .unwrap();
        let one = number(&mut h, 1);
        let first = h
            .alloc_value(Value::Sexpr(crate::value::Pair {
                head: Some(one),
                tail: Some(second),
            }))
            .unwrap();
        let env = h
            .alloc_env(EnvData {
                parent: None,
                vars: Some(first),
            })
            .unwrap();
        number(&mut h, 3);

        assert_eq!(h.collect(Some(env), None).unwrap(), 1);
        assert_eq!(h.live(), 5);
    }

    #[test]
    fn test_frame_roots_keep_stack_values() {
        let mut h = heap();
        let env = h
            .alloc_env(EnvData {
                parent: None,
                vars: None,
            })
            .unwrap();
        let kept = number(&mut h, 10);
        let frame = h
            .alloc_frame(FrameData {
                caller: None,
                resumer: None,
                env,
                program: None,
                stack: vec![kept],
            })
            .unwrap();
        number(&mut h, 11);

        assert_eq!(h.collect(Some(env), Some(frame)).unwrap(), 1);
        assert_eq!(*h.value(kept), Value::Number(10));
    }

    #[test]
    fn test_registry_shrinks_after_mass_sweep() {
        let mut h = heap();
        for i in 0..256 {
            number(&mut h, i);
        }
        let grown = h.registry_capacity();
        assert!(grown >= 256);
        h.collect(None, None).unwrap();
        assert!(h.registry_capacity() < grown);
        assert!(h.registry_capacity() >= INITIAL_CAPACITY);
    }

    #[test]
    fn test_allocate_collect_cycles_restore_count() {
        let mut h = heap();
        let env = h
            .alloc_env(EnvData {
                parent: None,
                vars: None,
            })
            .unwrap();
        h.collect(Some(env), None).unwrap();
        let baseline = h.live();
        for _ in 0..5 {
            for i in 0..50 {
                number(&mut h, i);
            }
            h.collect(Some(env), None).unwrap();
            assert_eq!(h.live(), baseline);
        }
    }

    #[test]
    fn test_corrupted_header_raises_bad_marker() {
        let mut h = heap();
        let v = number(&mut h, 1);
        h.corrupt_header(v.obj());
        match h.collect(None, None) {
            Err(Unwind::Error(e)) => match h.value(e) {
                Value::Error(msg) => assert!(msg.starts_with("bad marker type")),
                other => panic!("expected error value, got {:?}", other),
            },
            other => panic!("expected bad marker unwind, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_slot_reuse_after_sweep() {
        let mut h = heap();
        number(&mut h, 1);
        number(&mut h, 2);
        h.collect(None, None).unwrap();
        let v = number(&mut h, 3);
        assert!(v.0 < 2, "swept slots should be reused");
    }
}
