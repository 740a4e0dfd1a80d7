// The value model: a tagged union over heap cells, plus the type-tag
// machinery the typed stack accessors report mismatches with.

use std::fmt;

use enumflags2::BitFlags;

use crate::error::Result;
use crate::heap::{EnvRef, FrameRef, Heap, ValRef};
use crate::interp::Interp;

// Host primitive: receives the frame under application and returns how
// many values it left on the stack as its results.
pub type Builtin = fn(&mut Interp, FrameRef) -> Result<usize>;

// One linked-list cell. Both fields are optional so the empty list and
// dotted pairs (environment bindings) share the representation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pair {
    pub head: Option<ValRef>,
    pub tail: Option<ValRef>,
}

impl Pair {
    pub fn empty() -> Pair {
        Pair {
            head: None,
            tail: None,
        }
    }
}

// All valid values. The S/Q distinction lives in the tag and never
// changes after construction.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Error(String),
    Number(i32),
    Symbol(String),
    Str(String),
    Sexpr(Pair),
    Qexpr(Pair),
    Builtin(Builtin),
    Lambda {
        params: Option<ValRef>,
        body: Option<ValRef>,
    },
    Env(EnvRef),
    Frame(FrameRef),
}

#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum TypeTag {
    Error   = 0b0000000001,
    Number  = 0b0000000010,
    Symbol  = 0b0000000100,
    Str     = 0b0000001000,
    Sexpr   = 0b0000010000,
    Qexpr   = 0b0000100000,
    Builtin = 0b0001000000,
    Lambda  = 0b0010000000,
    Env     = 0b0100000000,
    Frame   = 0b1000000000,
}

pub type TypeSet = BitFlags<TypeTag>;

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Error => "ERROR",
            TypeTag::Number => "NUMBER",
            TypeTag::Symbol => "SYMBOL",
            TypeTag::Str => "STRING",
            TypeTag::Sexpr => "SEXPR",
            TypeTag::Qexpr => "QEXPR",
            TypeTag::Builtin => "BUILTIN",
            TypeTag::Lambda => "LAMBDA",
            TypeTag::Env => "ENV",
            TypeTag::Frame => "FRAME",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Error(_) => TypeTag::Error,
            Value::Number(_) => TypeTag::Number,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::Str(_) => TypeTag::Str,
            Value::Sexpr(_) => TypeTag::Sexpr,
            Value::Qexpr(_) => TypeTag::Qexpr,
            Value::Builtin(_) => TypeTag::Builtin,
            Value::Lambda { .. } => TypeTag::Lambda,
            Value::Env(_) => TypeTag::Env,
            Value::Frame(_) => TypeTag::Frame,
        }
    }
}

fn set_name(set: TypeSet) -> String {
    let mut out = String::new();
    for tag in set.iter() {
        if !out.is_empty() {
            out.push('|');
        }
        out.push_str(tag.name());
    }
    out
}

// Message for a typed-accessor failure.
pub fn mismatch(expect: TypeSet, got: TypeTag) -> String {
    format!("type mismatch, got {} but expected {}", got, set_name(expect))
}

// Produce the textual form of a value. An absent reference prints as nil.
pub fn render(heap: &Heap, v: Option<ValRef>) -> String {
    let mut out = String::new();
    write_value(heap, v, &mut out);
    out
}

fn write_value(heap: &Heap, v: Option<ValRef>, out: &mut String) {
    let v = match v {
        Some(v) => v,
        None => {
            out.push_str("nil");
            return;
        }
    };

    match heap.value(v) {
        Value::Error(msg) => out.push_str(msg),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Symbol(name) => out.push_str(name),
        Value::Str(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Value::Sexpr(p) => write_chain(heap, *p, '(', ')', out),
        Value::Qexpr(p) => write_chain(heap, *p, '{', '}', out),
        Value::Builtin(_) => out.push_str("<builtin>"),
        Value::Lambda { params, body } => {
            out.push_str("<lambda ");
            write_value(heap, *params, out);
            out.push(' ');
            write_value(heap, *body, out);
            out.push('>');
        }
        Value::Env(_) => out.push_str("<env>"),
        Value::Frame(_) => out.push_str("<frame>"),
    }
}

fn write_chain(heap: &Heap, pair: Pair, open: char, close: char, out: &mut String) {
    out.push(open);
    let mut cur = pair;
    loop {
        if cur.head.is_none() && cur.tail.is_none() {
            break;
        }
        write_value(heap, cur.head, out);
        match cur.tail {
            None => break,
            Some(t) => match heap.value(t) {
                Value::Sexpr(p) | Value::Qexpr(p) => {
                    out.push(' ');
                    cur = *p;
                }
                _ => {
                    // A dotted tail; environments build these.
                    out.push_str(" . ");
                    write_value(heap, Some(t), out);
                    break;
                }
            },
        }
    }
    out.push(close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn heap() -> Heap {
        Heap::with_capacities(8, 8).unwrap()
    }

    #[test]
    fn test_type_names() {
        assert_eq!(TypeTag::Number.to_string(), "NUMBER");
        assert_eq!(TypeTag::Qexpr.to_string(), "QEXPR");
    }

    #[test]
    fn test_mismatch_message() {
        assert_eq!(
            mismatch(BitFlags::from_flag(TypeTag::Number), TypeTag::Str),
            "type mismatch, got STRING but expected NUMBER"
        );
        assert_eq!(
            mismatch(TypeTag::Sexpr | TypeTag::Qexpr, TypeTag::Number),
            "type mismatch, got NUMBER but expected SEXPR|QEXPR"
        );
    }

    #[test]
    fn test_render_atoms() {
        let mut h = heap();
        let n = h.alloc_value(Value::Number(-7)).unwrap();
        let s = h.alloc_value(Value::Str("hi".to_string())).unwrap();
        let y = h.alloc_value(Value::Symbol("car".to_string())).unwrap();
        assert_eq!(render(&h, Some(n)), "-7");
        assert_eq!(render(&h, Some(s)), "\"hi\"");
        assert_eq!(render(&h, Some(y)), "car");
        assert_eq!(render(&h, None), "nil");
    }

    #[test]
    fn test_render_chains() {
        let mut h = heap();
        let two = h.alloc_value(Value::Number(2)).unwrap();
        let second = h
            .alloc_value(Value::Sexpr(Pair {
                head: Some(two),
                tail: None,
            }))
            .unwrap();
        let one = h.alloc_value(Value::Number(1)).unwrap();
        let first = h
            .alloc_value(Value::Qexpr(Pair {
                head: Some(one),
                tail: Some(second),
            }))
            .unwrap();
        let empty = h.alloc_value(Value::Sexpr(Pair::empty())).unwrap();

        assert_eq!(render(&h, Some(first)), "{1 2}");
        assert_eq!(render(&h, Some(empty)), "()");
    }

    #[test]
    fn test_render_dotted_pair() {
        let mut h = heap();
        let k = h.alloc_value(Value::Symbol("x".to_string())).unwrap();
        let v = h.alloc_value(Value::Number(3)).unwrap();
        let kv = h
            .alloc_value(Value::Sexpr(Pair {
                head: Some(k),
                tail: Some(v),
            }))
            .unwrap();
        assert_eq!(render(&h, Some(kv)), "(x . 3)");
    }
}
