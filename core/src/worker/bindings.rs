//! Script engine setup and the modeling vocabulary exposed to scripts.
//!
//! Scripts run on a raw rhai engine with an explicit package list. There is no
//! module loading, no `eval`, and nothing that reaches the filesystem, network
//! or clock. The only way a script affects the outside world is through the
//! functions registered in [`install`].

use super::protocol::LogLevel;
use super::state::{Session, ShapeId};
use crate::kernel::{GeometryKernel, Placement, Vector3D};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every function a script can call to build or parameterize geometry.
pub const VOCABULARY: &[&str] = &[
    "Box",
    "Sphere",
    "Cylinder",
    "Cone",
    "Translate",
    "Rotate",
    "Scale",
    "Union",
    "Difference",
    "Intersection",
    "Slider",
    "Checkbox",
    "TextInput",
    "Dropdown",
];

/// Vocabulary entries that add a shape to the scene.
pub const SHAPE_FUNCTIONS: &[&str] = &[
    "Box",
    "Sphere",
    "Cylinder",
    "Cone",
    "Translate",
    "Rotate",
    "Scale",
    "Union",
    "Difference",
    "Intersection",
];

/// Vocabulary entries that declare a GUI control; first argument is its name.
pub const GUI_FUNCTIONS: &[&str] = &["Slider", "Checkbox", "TextInput", "Dropdown"];

/// Opaque script-side reference to a shape.
#[derive(Debug, Clone, Copy)]
pub struct ShapeHandle(ShapeId);

/// Value bound to `console` in every script scope.
#[derive(Debug, Clone, Copy)]
pub struct Console;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Engine with the language restrictions and resource limits applied but no
/// modeling functions. Syntax checks use it directly.
pub fn sandbox_engine() -> Engine {
    let mut engine = Engine::new_raw();

    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.set_max_expr_depths(64, 32);
    engine.set_max_call_levels(64);
    engine.set_max_string_size(1 << 20);
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(10_000);

    engine
}

/// Scope every script starts with.
pub fn script_scope() -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push_constant("console", Console);
    scope
}

/// Wire the engine to a session: console output, cancellation, and the
/// modeling vocabulary.
pub fn install<K: GeometryKernel>(
    engine: &mut Engine,
    session: &Rc<RefCell<Session<K>>>,
    cancel: &Arc<AtomicBool>,
) {
    let flag = cancel.clone();
    engine.on_progress(move |_| {
        if flag.load(Ordering::Relaxed) {
            Some(Dynamic::from("terminated"))
        } else {
            None
        }
    });

    install_console(engine, session);
    install_primitives(engine, session);
    install_transforms(engine, session);
    install_booleans(engine, session);
    install_controls(engine, session);
}

fn install_console<K: GeometryKernel>(engine: &mut Engine, session: &Rc<RefCell<Session<K>>>) {
    let s = session.clone();
    engine.on_print(move |text| s.borrow_mut().log(LogLevel::Log, text));

    let s = session.clone();
    engine.on_debug(move |text, _source, pos: Position| {
        let message = if pos.is_none() {
            text.to_string()
        } else {
            format!("{} @ {}", text, pos)
        };
        s.borrow_mut().log(LogLevel::Log, message);
    });

    engine.register_type_with_name::<Console>("Console");
    for (method, level) in [
        ("log", LogLevel::Log),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        let s = session.clone();
        engine.register_fn(method, move |_: &mut Console, value: Dynamic| {
            s.borrow_mut().log(level, value.to_string());
        });
        let s = session.clone();
        engine.register_fn(method, move |_: &mut Console, a: Dynamic, b: Dynamic| {
            s.borrow_mut().log(level, format!("{} {}", a, b));
        });
    }
}

fn install_primitives<K: GeometryKernel>(engine: &mut Engine, session: &Rc<RefCell<Session<K>>>) {
    engine.register_type_with_name::<ShapeHandle>("Shape");
    engine.register_fn("to_string", |h: &mut ShapeHandle| format!("Shape#{}", h.0 .0));
    engine.register_fn("to_debug", |h: &mut ShapeHandle| format!("Shape#{}", h.0 .0));

    let s = session.clone();
    engine.register_fn("Box", move |x: Dynamic, y: Dynamic, z: Dynamic| {
        let (x, y, z) = (number(&x, "Box x")?, number(&y, "Box y")?, number(&z, "Box z")?);
        handle(s.borrow_mut().make_box(x, y, z, false))
    });
    let s = session.clone();
    engine.register_fn(
        "Box",
        move |x: Dynamic, y: Dynamic, z: Dynamic, centered: bool| {
            let (x, y, z) = (number(&x, "Box x")?, number(&y, "Box y")?, number(&z, "Box z")?);
            handle(s.borrow_mut().make_box(x, y, z, centered))
        },
    );

    let s = session.clone();
    engine.register_fn("Sphere", move |r: Dynamic| {
        let r = number(&r, "Sphere radius")?;
        handle(s.borrow_mut().make_sphere(r))
    });

    let s = session.clone();
    engine.register_fn("Cylinder", move |r: Dynamic, h: Dynamic| {
        let (r, h) = (number(&r, "Cylinder radius")?, number(&h, "Cylinder height")?);
        handle(s.borrow_mut().make_cylinder(r, h, false))
    });
    let s = session.clone();
    engine.register_fn("Cylinder", move |r: Dynamic, h: Dynamic, centered: bool| {
        let (r, h) = (number(&r, "Cylinder radius")?, number(&h, "Cylinder height")?);
        handle(s.borrow_mut().make_cylinder(r, h, centered))
    });

    let s = session.clone();
    engine.register_fn("Cone", move |r1: Dynamic, r2: Dynamic, h: Dynamic| {
        let r1 = number(&r1, "Cone bottom radius")?;
        let r2 = number(&r2, "Cone top radius")?;
        let h = number(&h, "Cone height")?;
        handle(s.borrow_mut().make_cone(r1, r2, h))
    });
}

fn install_transforms<K: GeometryKernel>(engine: &mut Engine, session: &Rc<RefCell<Session<K>>>) {
    let s = session.clone();
    engine.register_fn("Translate", move |offset: Dynamic, target: Dynamic| {
        let placement = Placement::Translate(vector(offset, "Translate offset")?);
        apply(&s, "Translate", &placement, target)
    });

    let s = session.clone();
    engine.register_fn(
        "Rotate",
        move |axis: Dynamic, degrees: Dynamic, target: Dynamic| {
            let axis = vector(axis, "Rotate axis")?;
            let angle = number(&degrees, "Rotate angle")?.to_radians();
            apply(&s, "Rotate", &Placement::Rotate { axis, angle }, target)
        },
    );

    let s = session.clone();
    engine.register_fn("Scale", move |factor: Dynamic, target: Dynamic| {
        let placement = Placement::Scale(number(&factor, "Scale factor")?);
        apply(&s, "Scale", &placement, target)
    });
}

/// Place one shape, or each shape of an array.
fn apply<K: GeometryKernel>(
    session: &Rc<RefCell<Session<K>>>,
    op: &str,
    placement: &Placement,
    target: Dynamic,
) -> ScriptResult<Dynamic> {
    if target.is_array() {
        let mut placed = Array::new();
        for id in shapes(target, op)? {
            let id = session.borrow_mut().place(op, id, placement).map_err(fail)?;
            placed.push(Dynamic::from(ShapeHandle(id)));
        }
        return Ok(Dynamic::from_array(placed));
    }
    let id = shape(&target, op)?;
    let id = session.borrow_mut().place(op, id, placement).map_err(fail)?;
    Ok(Dynamic::from(ShapeHandle(id)))
}

fn install_booleans<K: GeometryKernel>(engine: &mut Engine, session: &Rc<RefCell<Session<K>>>) {
    let s = session.clone();
    engine.register_fn("Union", move |list: Dynamic| {
        let ids = shapes(list, "Union")?;
        handle(s.borrow_mut().union(&ids))
    });

    let s = session.clone();
    engine.register_fn("Intersection", move |list: Dynamic| {
        let ids = shapes(list, "Intersection")?;
        handle(s.borrow_mut().intersection(&ids))
    });

    let s = session.clone();
    engine.register_fn("Difference", move |main: Dynamic, tools: Dynamic| {
        let main = shape(&main, "Difference")?;
        let tools = shapes(tools, "Difference")?;
        handle(s.borrow_mut().difference(main, &tools))
    });
}

fn install_controls<K: GeometryKernel>(engine: &mut Engine, session: &Rc<RefCell<Session<K>>>) {
    let s = session.clone();
    engine.register_fn(
        "Slider",
        move |name: ImmutableString, default: Dynamic, min: Dynamic, max: Dynamic| -> ScriptResult<f64> {
            let default = number(&default, "Slider default")?;
            let min = number(&min, "Slider min")?;
            let max = number(&max, "Slider max")?;
            Ok(s.borrow_mut().slider(name.as_str(), default, min, max))
        },
    );

    let s = session.clone();
    engine.register_fn("Checkbox", move |name: ImmutableString, default: bool| {
        s.borrow_mut().checkbox(name.as_str(), default)
    });

    let s = session.clone();
    engine.register_fn(
        "TextInput",
        move |name: ImmutableString, default: ImmutableString| -> String {
            s.borrow_mut().text_input(name.as_str(), default.as_str())
        },
    );

    let s = session.clone();
    engine.register_fn(
        "Dropdown",
        move |name: ImmutableString, default: ImmutableString, options: Array| -> String {
            let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
            s.borrow_mut().dropdown(name.as_str(), default.as_str(), &options)
        },
    );
}

// === Argument conversion ===

fn fail(message: String) -> Box<EvalAltResult> {
    message.into()
}

fn handle(result: Result<ShapeId, String>) -> ScriptResult<ShapeHandle> {
    result.map(ShapeHandle).map_err(fail)
}

fn number(value: &Dynamic, what: &str) -> ScriptResult<f64> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f64);
    }
    Err(fail(format!("{} must be a number, got {}", what, value.type_name())))
}

fn vector(value: Dynamic, what: &str) -> ScriptResult<Vector3D> {
    let type_name = value.type_name();
    let items = value
        .try_cast::<Array>()
        .ok_or_else(|| fail(format!("{} must be an array of 3 numbers, got {}", what, type_name)))?;
    if items.len() != 3 {
        return Err(fail(format!(
            "{} must have 3 components, got {}",
            what,
            items.len()
        )));
    }
    Ok(Vector3D::new(
        number(&items[0], what)?,
        number(&items[1], what)?,
        number(&items[2], what)?,
    ))
}

fn shape(value: &Dynamic, op: &str) -> ScriptResult<ShapeId> {
    value
        .clone()
        .try_cast::<ShapeHandle>()
        .map(|h| h.0)
        .ok_or_else(|| fail(format!("{} expects a shape, got {}", op, value.type_name())))
}

/// A single shape or an array of shapes.
fn shapes(value: Dynamic, op: &str) -> ScriptResult<Vec<ShapeId>> {
    if !value.is_array() {
        return Ok(vec![shape(&value, op)?]);
    }
    let items = value
        .try_cast::<Array>()
        .ok_or_else(|| fail(format!("{} expects an array of shapes", op)))?;
    items.iter().map(|item| shape(item, op)).collect()
}
