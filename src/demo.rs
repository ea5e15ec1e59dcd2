//! Demo functions served by the host simulator.

use serde::Serialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tickwire_server::{arg_as, InvocationError, Registry};

#[derive(Debug, Clone, Serialize)]
struct Marker {
    position: f64,
    name: String,
}

/// Builds the registry: a few stateless helpers plus an in-memory marker list
/// shared by the marker functions.
pub fn registry() -> Registry {
    let mut registry = Registry::new();

    registry.register("echo", |args: &[Value]| Ok(Value::Array(args.to_vec())));

    registry.register("add", |args: &[Value]| {
        let a: f64 = arg_as(args, 0)?;
        let b: f64 = arg_as(args, 1)?;
        Ok(number(a + b))
    });

    registry.register("concat", |args: &[Value]| {
        let mut out = String::new();
        for (i, arg) in args.iter().enumerate() {
            match arg {
                Value::String(s) => out.push_str(s),
                other => {
                    return Err(InvocationError::invalid_args(format!(
                        "argument {} is not a string: {}",
                        i, other
                    )))
                }
            }
        }
        Ok(Value::String(out))
    });

    registry.register("fail", |args: &[Value]| {
        let message = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(InvocationError::new(message))
    });

    let markers: Rc<RefCell<Vec<Marker>>> = Rc::default();

    let list = markers.clone();
    registry.register("add_marker", move |args: &[Value]| {
        let position: f64 = arg_as(args, 0)?;
        let name: String = if args.len() > 1 {
            arg_as(args, 1)?
        } else {
            String::new()
        };
        let mut list = list.borrow_mut();
        list.push(Marker { position, name });
        Ok(json!(list.len() - 1))
    });

    let list = markers.clone();
    registry.register("delete_marker", move |args: &[Value]| {
        let index: usize = arg_as(args, 0)?;
        let mut list = list.borrow_mut();
        if index >= list.len() {
            return Ok(json!(false));
        }
        list.remove(index);
        Ok(json!(true))
    });

    let list = markers.clone();
    registry.register("count_markers", move |_: &[Value]| {
        Ok(json!(list.borrow().len()))
    });

    let list = markers;
    registry.register("list_markers", move |_: &[Value]| {
        Ok(serde_json::to_value(&*list.borrow())?)
    });

    registry
}

// Integral sums come back as JSON integers.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwire_server::FunctionRegistry;

    fn call(registry: &mut Registry, name: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
        registry.lookup(name).unwrap().invoke(&args)
    }

    #[test]
    fn test_names() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec![
                "add",
                "add_marker",
                "concat",
                "count_markers",
                "delete_marker",
                "echo",
                "fail",
                "list_markers"
            ]
        );
    }

    #[test]
    fn test_add_and_concat() {
        let mut registry = registry();
        assert_eq!(call(&mut registry, "add", vec![json!(2), json!(3)]).unwrap(), json!(5));
        assert_eq!(
            call(&mut registry, "add", vec![json!(0.5), json!(1)]).unwrap(),
            json!(1.5)
        );
        assert_eq!(
            call(&mut registry, "concat", vec![json!("ab"), json!("cd")]).unwrap(),
            json!("abcd")
        );
        assert!(call(&mut registry, "concat", vec![json!(1)]).is_err());
    }

    #[test]
    fn test_fail() {
        let mut registry = registry();
        let err = call(&mut registry, "fail", vec![json!("custom")]).unwrap_err();
        assert_eq!(err.message(), "custom");
    }

    #[test]
    fn test_markers() {
        let mut registry = registry();
        assert_eq!(
            call(&mut registry, "add_marker", vec![json!(1.0), json!("intro")]).unwrap(),
            json!(0)
        );
        assert_eq!(call(&mut registry, "add_marker", vec![json!(2.5)]).unwrap(), json!(1));
        assert_eq!(call(&mut registry, "count_markers", vec![]).unwrap(), json!(2));

        assert_eq!(call(&mut registry, "delete_marker", vec![json!(0)]).unwrap(), json!(true));
        assert_eq!(call(&mut registry, "delete_marker", vec![json!(5)]).unwrap(), json!(false));
        assert_eq!(call(&mut registry, "count_markers", vec![]).unwrap(), json!(1));
        assert_eq!(
            call(&mut registry, "list_markers", vec![]).unwrap(),
            json!([{"position": 2.5, "name": ""}])
        );
    }
}
