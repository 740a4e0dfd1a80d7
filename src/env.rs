// Datastructure to manage lexical scoping.
//
// An environment is a chain of heap cells, each holding an association
// list of (symbol . value) pairs plus a link to its parent. The binding
// list is built from ordinary pairs, so the collector reaches everything
// an environment holds through plain pair traversal.

use crate::error::{copy_str, Result};
use crate::heap::{EnvRef, Heap, ValRef};
use crate::value::{mismatch, Pair, TypeTag, Value};

use enumflags2::BitFlags;

pub struct EnvData {
    pub parent: Option<EnvRef>,
    pub vars: Option<ValRef>,
}

// The global environment; has no parent.
pub fn root(heap: &mut Heap) -> Result<EnvRef> {
    heap.alloc_env(EnvData {
        parent: None,
        vars: None,
    })
}

// A nested scope on top of `parent`.
pub fn chain(heap: &mut Heap, parent: EnvRef) -> Result<EnvRef> {
    heap.alloc_env(EnvData {
        parent: Some(parent),
        vars: None,
    })
}

// Symbol keys compare by name bytes. Anything else is a type error.
fn key_name(heap: &mut Heap, key: ValRef) -> Result<String> {
    match heap.value(key) {
        Value::Symbol(name) => copy_str(name),
        other => {
            let got = other.type_tag();
            Err(heap.throw(mismatch(BitFlags::from_flag(TypeTag::Symbol), got)))
        }
    }
}

// Walk outward and return the binding pair for `name`, if any.
fn lookup(heap: &Heap, env: EnvRef, name: &str) -> Option<ValRef> {
    let mut scope = Some(env);
    while let Some(e) = scope {
        let data = heap.env(e);
        if let Some(found) = lookup_local(heap, data.vars, name) {
            return Some(found);
        }
        scope = data.parent;
    }
    None
}

fn lookup_local(heap: &Heap, vars: Option<ValRef>, name: &str) -> Option<ValRef> {
    let mut cursor = vars;
    while let Some(node) = cursor {
        let p = match heap.value(node) {
            Value::Sexpr(p) => *p,
            _ => break,
        };
        if let Some(kv) = p.head {
            if let Value::Sexpr(binding) = heap.value(kv) {
                if let Some(k) = binding.head {
                    if let Value::Symbol(s) = heap.value(k) {
                        if s == name {
                            return Some(kv);
                        }
                    }
                }
            }
        }
        cursor = p.tail;
    }
    None
}

// Look up an identifier from anywhere in the scope chain. A miss is an
// Error value, not an unwind; the caller decides how to react.
pub fn get(heap: &mut Heap, env: EnvRef, key: ValRef) -> Result<ValRef> {
    let name = key_name(heap, key)?;
    match lookup(heap, env, &name) {
        Some(kv) => match heap.value(kv) {
            Value::Sexpr(p) => Ok(p.tail.expect("binding pair has a value")),
            _ => unreachable!("binding list holds pairs"),
        },
        None => heap.alloc_value(Value::Error(format!("undefined symbol: {}", name))),
    }
}

// As get, but returns the binding pair itself; none on a miss.
pub fn get_pair(heap: &mut Heap, env: EnvRef, key: ValRef) -> Result<Option<ValRef>> {
    let name = key_name(heap, key)?;
    Ok(lookup(heap, env, &name))
}

// Rewrite the first binding found along the chain; define locally if the
// symbol is bound nowhere.
pub fn set(heap: &mut Heap, env: EnvRef, key: ValRef, value: ValRef) -> Result<ValRef> {
    let name = key_name(heap, key)?;
    if let Some(kv) = lookup(heap, env, &name) {
        if let Value::Sexpr(p) = heap.value_mut(kv) {
            p.tail = Some(value);
        }
        return Ok(value);
    }
    put(heap, env, key, value)
}

// Bind in this scope only: overwrite an existing local binding, or
// prepend a fresh pair to the binding list.
pub fn put(heap: &mut Heap, env: EnvRef, key: ValRef, value: ValRef) -> Result<ValRef> {
    let name = key_name(heap, key)?;
    let vars = heap.env(env).vars;
    if let Some(kv) = lookup_local(heap, vars, &name) {
        if let Value::Sexpr(p) = heap.value_mut(kv) {
            p.tail = Some(value);
        }
        return Ok(value);
    }

    let kv = heap.alloc_value(Value::Sexpr(Pair {
        head: Some(key),
        tail: Some(value),
    }))?;
    let node = heap.alloc_value(Value::Sexpr(Pair {
        head: Some(kv),
        tail: vars,
    }))?;
    heap.env_mut(env).vars = Some(node);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unwind;

    fn heap() -> Heap {
        Heap::with_capacities(8, 8).unwrap()
    }

    fn sym(h: &mut Heap, name: &str) -> ValRef {
        h.alloc_value(Value::Symbol(name.to_string())).unwrap()
    }

    fn num(h: &mut Heap, n: i32) -> ValRef {
        h.alloc_value(Value::Number(n)).unwrap()
    }

    fn get_num(h: &mut Heap, e: EnvRef, name: &str) -> Value {
        let k = sym(h, name);
        let v = get(h, e, k).unwrap();
        h.value(v).clone()
    }

    #[test]
    fn test_put_then_get() {
        let mut h = heap();
        let e = root(&mut h).unwrap();
        let k = sym(&mut h, "x");
        let v = num(&mut h, 42);
        put(&mut h, e, k, v).unwrap();
        assert_eq!(get_num(&mut h, e, "x"), Value::Number(42));
    }

    #[test]
    fn test_get_miss_is_error_value() {
        let mut h = heap();
        let e = root(&mut h).unwrap();
        let k = sym(&mut h, "nope");
        let v = get(&mut h, e, k).unwrap();
        match h.value(v) {
            Value::Error(msg) => assert_eq!(msg, "undefined symbol: nope"),
            other => panic!("expected error value, got {:?}", other),
        }
    }

    #[test]
    fn test_put_overwrites_local_binding() {
        let mut h = heap();
        let e = root(&mut h).unwrap();
        let k1 = sym(&mut h, "x");
        let v1 = num(&mut h, 1);
        put(&mut h, e, k1, v1).unwrap();
        let k2 = sym(&mut h, "x");
        let v2 = num(&mut h, 2);
        put(&mut h, e, k2, v2).unwrap();
        assert_eq!(get_num(&mut h, e, "x"), Value::Number(2));
    }

    #[test]
    fn test_child_shadows_parent() {
        let mut h = heap();
        let parent = root(&mut h).unwrap();
        let child = chain(&mut h, parent).unwrap();

        let k = sym(&mut h, "x");
        let v = num(&mut h, 1);
        put(&mut h, parent, k, v).unwrap();

        let k = sym(&mut h, "x");
        let w = num(&mut h, 2);
        put(&mut h, child, k, w).unwrap();

        assert_eq!(get_num(&mut h, child, "x"), Value::Number(2));
        assert_eq!(get_num(&mut h, parent, "x"), Value::Number(1));
    }

    #[test]
    fn test_outer_binding_visible_in_child() {
        let mut h = heap();
        let parent = root(&mut h).unwrap();
        let child = chain(&mut h, parent).unwrap();
        let k = sym(&mut h, "y");
        let v = num(&mut h, 9);
        put(&mut h, parent, k, v).unwrap();
        assert_eq!(get_num(&mut h, child, "y"), Value::Number(9));
    }

    #[test]
    fn test_set_rewrites_outer_binding() {
        let mut h = heap();
        let parent = root(&mut h).unwrap();
        let child = chain(&mut h, parent).unwrap();

        let k = sym(&mut h, "x");
        let v = num(&mut h, 1);
        put(&mut h, parent, k, v).unwrap();

        let k = sym(&mut h, "x");
        let w = num(&mut h, 5);
        set(&mut h, child, k, w).unwrap();

        assert_eq!(get_num(&mut h, parent, "x"), Value::Number(5));
    }

    #[test]
    fn test_set_without_binding_defines_locally() {
        let mut h = heap();
        let parent = root(&mut h).unwrap();
        let child = chain(&mut h, parent).unwrap();

        let k = sym(&mut h, "z");
        let v = num(&mut h, 3);
        set(&mut h, child, k, v).unwrap();

        assert_eq!(get_num(&mut h, child, "z"), Value::Number(3));
        match get_num(&mut h, parent, "z") {
            Value::Error(_) => {}
            other => panic!("z should not leak to the parent, got {:?}", other),
        }
    }

    #[test]
    fn test_non_symbol_key_unwinds() {
        let mut h = heap();
        let e = root(&mut h).unwrap();
        let k = num(&mut h, 1);
        let v = num(&mut h, 2);
        match put(&mut h, e, k, v) {
            Err(Unwind::Error(err)) => match h.value(err) {
                Value::Error(msg) => assert!(msg.starts_with("type mismatch")),
                other => panic!("expected error value, got {:?}", other),
            },
            other => panic!("expected unwind, got {:?}", other),
        }
    }

    #[test]
    fn test_bindings_reachable_through_gc() {
        let mut h = heap();
        let e = root(&mut h).unwrap();
        let k = sym(&mut h, "kept");
        let v = num(&mut h, 7);
        put(&mut h, e, k, v).unwrap();
        num(&mut h, 8);

        // symbol, value, kv pair, list node, env survive; the loose 8 dies.
        assert_eq!(h.collect(Some(e), None).unwrap(), 1);
        assert_eq!(get_num(&mut h, e, "kept"), Value::Number(7));
    }
}
