//! Per-worker modeling state.
//!
//! A `Session` owns every shape one script creates. It lives inside a single
//! worker thread and is dropped with it; nothing here is shared across
//! workers.

use super::protocol::{GuiState, GuiValue, LogEntry, LogLevel};
use crate::geometry::Mesh;
use crate::kernel::{GeometryKernel, KernelOpError, Placement, Vector3D};

/// Index of a shape in its session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub u32);

/// A kernel solid or an imported triangle mesh.
#[derive(Debug, Clone)]
pub enum Shape<S> {
    Solid(S),
    Mesh(Mesh),
}

/// Every shape ever created, plus the ordered subset still in the scene.
///
/// Operations take shapes out of the scene and append their result, so the
/// scene holds what the script left behind in creation order. Consumed shapes
/// stay in the arena and can be used again.
#[derive(Debug)]
pub struct ShapeSet<S> {
    arena: Vec<Shape<S>>,
    scene: Vec<ShapeId>,
}

impl<S> Default for ShapeSet<S> {
    fn default() -> Self {
        Self {
            arena: Vec::new(),
            scene: Vec::new(),
        }
    }
}

impl<S> ShapeSet<S> {
    pub fn push(&mut self, shape: Shape<S>) -> ShapeId {
        let id = ShapeId(self.arena.len() as u32);
        self.arena.push(shape);
        self.scene.push(id);
        id
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape<S>> {
        self.arena.get(id.0 as usize)
    }

    /// Drop a shape from the scene; it stays addressable.
    pub fn consume(&mut self, id: ShapeId) {
        self.scene.retain(|&s| s != id);
    }

    /// Number of shapes in the scene.
    pub fn len(&self) -> usize {
        self.scene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scene.is_empty()
    }

    /// Scene shapes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Shape<S>> + '_ {
        self.scene.iter().filter_map(move |&id| self.get(id))
    }
}

fn kernel_err(op: &str, e: KernelOpError) -> String {
    format!("{}: {}", op, e)
}

/// Modeling state for one script evaluation.
pub struct Session<K: GeometryKernel> {
    kernel: K,
    pub shapes: ShapeSet<K::Solid>,
    /// Values supplied by the caller; read-only during the run.
    gui_input: GuiState,
    /// Caller values overlaid with what the script's controls resolved to.
    pub gui_state: GuiState,
    pub logs: Vec<LogEntry>,
}

impl<K: GeometryKernel> Session<K> {
    pub fn new(kernel: K, gui_input: GuiState) -> Self {
        Self {
            kernel,
            shapes: ShapeSet::default(),
            gui_state: gui_input.clone(),
            gui_input,
            logs: Vec::new(),
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
    }

    // === Primitives ===

    pub fn make_box(&mut self, x: f64, y: f64, z: f64, centered: bool) -> Result<ShapeId, String> {
        let solid = self.kernel.create_box(x, y, z).map_err(|e| kernel_err("Box", e))?;
        let solid = if centered {
            let offset = Placement::Translate(Vector3D::new(-x / 2.0, -y / 2.0, -z / 2.0));
            self.kernel.place(&solid, &offset).map_err(|e| kernel_err("Box", e))?
        } else {
            solid
        };
        Ok(self.shapes.push(Shape::Solid(solid)))
    }

    pub fn make_sphere(&mut self, radius: f64) -> Result<ShapeId, String> {
        let solid = self.kernel.create_sphere(radius).map_err(|e| kernel_err("Sphere", e))?;
        Ok(self.shapes.push(Shape::Solid(solid)))
    }

    pub fn make_cylinder(&mut self, radius: f64, height: f64, centered: bool) -> Result<ShapeId, String> {
        let solid = self
            .kernel
            .create_cylinder(radius, height)
            .map_err(|e| kernel_err("Cylinder", e))?;
        let solid = if centered {
            let offset = Placement::Translate(Vector3D::new(0.0, 0.0, -height / 2.0));
            self.kernel.place(&solid, &offset).map_err(|e| kernel_err("Cylinder", e))?
        } else {
            solid
        };
        Ok(self.shapes.push(Shape::Solid(solid)))
    }

    pub fn make_cone(&mut self, bottom: f64, top: f64, height: f64) -> Result<ShapeId, String> {
        let solid = self
            .kernel
            .create_cone(bottom, top, height)
            .map_err(|e| kernel_err("Cone", e))?;
        Ok(self.shapes.push(Shape::Solid(solid)))
    }

    // === Operations ===

    pub fn place(&mut self, op: &str, id: ShapeId, placement: &Placement) -> Result<ShapeId, String> {
        let placed = match self.lookup(op, id)? {
            Shape::Solid(solid) => {
                Shape::Solid(self.kernel.place(solid, placement).map_err(|e| kernel_err(op, e))?)
            }
            Shape::Mesh(mesh) => {
                let mut mesh = mesh.clone();
                mesh.transform(&placement.to_matrix());
                Shape::Mesh(mesh)
            }
        };
        self.shapes.consume(id);
        Ok(self.shapes.push(placed))
    }

    pub fn union(&mut self, ids: &[ShapeId]) -> Result<ShapeId, String> {
        self.fold("Union", ids, |k, a, b| k.boolean_union(a, b))
    }

    pub fn intersection(&mut self, ids: &[ShapeId]) -> Result<ShapeId, String> {
        self.fold("Intersection", ids, |k, a, b| k.boolean_intersect(a, b))
    }

    pub fn difference(&mut self, main: ShapeId, tools: &[ShapeId]) -> Result<ShapeId, String> {
        let mut ids = Vec::with_capacity(tools.len() + 1);
        ids.push(main);
        ids.extend_from_slice(tools);
        self.fold("Difference", &ids, |k, a, b| k.boolean_subtract(a, b))
    }

    fn fold<F>(&mut self, op: &str, ids: &[ShapeId], combine: F) -> Result<ShapeId, String>
    where
        F: Fn(&K, &K::Solid, &K::Solid) -> Result<K::Solid, KernelOpError>,
    {
        let (first, rest) = ids
            .split_first()
            .ok_or_else(|| format!("{} needs at least one shape", op))?;

        let mut acc = self.solid(op, *first)?.clone();
        for &id in rest {
            let next = self.solid(op, id)?;
            acc = combine(&self.kernel, &acc, next).map_err(|e| kernel_err(op, e))?;
        }

        for &id in ids {
            self.shapes.consume(id);
        }
        Ok(self.shapes.push(Shape::Solid(acc)))
    }

    fn lookup(&self, op: &str, id: ShapeId) -> Result<&Shape<K::Solid>, String> {
        self.shapes
            .get(id)
            .ok_or_else(|| format!("{}: unknown shape #{}", op, id.0))
    }

    fn solid(&self, op: &str, id: ShapeId) -> Result<&K::Solid, String> {
        match self.lookup(op, id)? {
            Shape::Solid(solid) => Ok(solid),
            Shape::Mesh(_) => Err(format!(
                "{}: shape #{} is an imported mesh and cannot take part in boolean operations",
                op, id.0
            )),
        }
    }

    // === GUI controls ===

    pub fn slider(&mut self, name: &str, default: f64, min: f64, max: f64) -> f64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let value = self
            .gui_input
            .get(name)
            .and_then(GuiValue::as_number)
            .unwrap_or(default);
        if value < lo || value > hi {
            self.log(
                LogLevel::Warn,
                format!("Slider \"{}\": value {} is outside [{}, {}]", name, value, lo, hi),
            );
        }
        self.gui_state.insert(name.to_string(), GuiValue::Number(value));
        value
    }

    pub fn checkbox(&mut self, name: &str, default: bool) -> bool {
        let value = self
            .gui_input
            .get(name)
            .and_then(GuiValue::as_bool)
            .unwrap_or(default);
        self.gui_state.insert(name.to_string(), GuiValue::Bool(value));
        value
    }

    pub fn text_input(&mut self, name: &str, default: &str) -> String {
        let value = self
            .gui_input
            .get(name)
            .and_then(GuiValue::as_text)
            .unwrap_or(default)
            .to_string();
        self.gui_state.insert(name.to_string(), GuiValue::Text(value.clone()));
        value
    }

    pub fn dropdown(&mut self, name: &str, default: &str, options: &[String]) -> String {
        let value = self
            .gui_input
            .get(name)
            .and_then(GuiValue::as_text)
            .unwrap_or(default)
            .to_string();
        if !options.iter().any(|o| *o == value) {
            self.log(
                LogLevel::Warn,
                format!("Dropdown \"{}\": \"{}\" is not one of its options", name, value),
            );
        }
        self.gui_state.insert(name.to_string(), GuiValue::Text(value.clone()));
        value
    }

    // === Output ===

    /// Mesh the scene in order into one buffer.
    pub fn tessellate(&self, max_deviation: f64) -> Result<Mesh, String> {
        let mut combined = Mesh::new();
        for shape in self.shapes.iter() {
            match shape {
                Shape::Solid(solid) => {
                    let mesh = self
                        .kernel
                        .tessellate(solid, max_deviation)
                        .map_err(|e| e.to_string())?;
                    combined.append(&mesh);
                }
                Shape::Mesh(mesh) => combined.append(mesh),
            }
        }
        Ok(combined)
    }

    pub fn export_step(&self) -> Result<String, String> {
        let mut solids = Vec::with_capacity(self.shapes.len());
        for shape in self.shapes.iter() {
            match shape {
                Shape::Solid(solid) => solids.push(solid),
                Shape::Mesh(_) => {
                    return Err("imported meshes cannot be written to STEP".into());
                }
            }
        }
        self.kernel.export_step(&solids).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::TruckKernel;

    fn session(input: GuiState) -> Session<TruckKernel> {
        Session::new(TruckKernel::new(), input)
    }

    #[test]
    fn test_slider_prefers_caller_value() {
        let mut input = GuiState::new();
        input.insert("Size".into(), GuiValue::Number(15.0));
        let mut s = session(input);
        assert_eq!(s.slider("Size", 10.0, 5.0, 20.0), 15.0);
        assert_eq!(s.gui_state["Size"], GuiValue::Number(15.0));
    }

    #[test]
    fn test_slider_default_recorded() {
        let mut s = session(GuiState::new());
        assert_eq!(s.slider("Size", 10.0, 5.0, 20.0), 10.0);
        assert_eq!(s.gui_state["Size"], GuiValue::Number(10.0));
    }

    #[test]
    fn test_slider_keeps_out_of_range_value() {
        let mut input = GuiState::new();
        input.insert("A".into(), GuiValue::Number(99.0));
        input.insert("B".into(), GuiValue::Text("oops".into()));
        let mut s = session(input);
        assert_eq!(s.slider("A", 10.0, 5.0, 20.0), 99.0);
        assert_eq!(s.gui_state["A"], GuiValue::Number(99.0));
        assert_eq!(s.logs.len(), 1);
        assert_eq!(s.logs[0].level, LogLevel::Warn);

        assert_eq!(s.slider("B", 7.0, 5.0, 20.0), 7.0);
        assert_eq!(s.gui_state["B"], GuiValue::Number(7.0));
    }

    #[test]
    fn test_undeclared_caller_keys_survive() {
        let mut input = GuiState::new();
        input.insert("Other".into(), GuiValue::Number(3.0));
        input.insert("Size".into(), GuiValue::Number(15.0));
        let mut s = session(input);
        s.slider("Size", 10.0, 5.0, 20.0);
        s.checkbox("Hollow", true);

        assert_eq!(s.gui_state.len(), 3);
        assert_eq!(s.gui_state["Other"], GuiValue::Number(3.0));
        assert_eq!(s.gui_state["Hollow"], GuiValue::Bool(true));
    }

    #[test]
    fn test_dropdown_warns_on_unknown_option() {
        let mut input = GuiState::new();
        input.insert("Mode".into(), GuiValue::Text("Nope".into()));
        let mut s = session(input);
        let options = vec!["Fast".to_string(), "Slow".to_string()];
        assert_eq!(s.dropdown("Mode", "Fast", &options), "Nope");
        assert_eq!(s.logs[0].level, LogLevel::Warn);

        assert_eq!(s.dropdown("Speed", "Slow", &options), "Slow");
        assert_eq!(s.logs.len(), 1);
    }

    #[test]
    fn test_operations_consume_inputs() {
        let mut s = session(GuiState::new());
        let a = s.make_box(10.0, 10.0, 10.0, false).unwrap();
        let moved = s
            .place("Translate", a, &Placement::Translate(Vector3D::new(1.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(s.shapes.len(), 1);
        assert_ne!(a, moved);

        // Consumed shapes remain usable.
        s.place("Translate", a, &Placement::Scale(2.0)).unwrap();
        assert_eq!(s.shapes.len(), 2);
    }

    #[test]
    fn test_boolean_rejects_meshes() {
        let mut s = session(GuiState::new());
        let a = s.make_box(1.0, 1.0, 1.0, false).unwrap();
        let m = s.shapes.push(Shape::Mesh(Mesh::new()));
        let err = s.union(&[a, m]).unwrap_err();
        assert!(err.contains("imported mesh"));
        assert!(s.union(&[]).is_err());
    }

    #[test]
    fn test_tessellate_in_scene_order() {
        let mut s = session(GuiState::new());
        s.make_box(1.0, 1.0, 1.0, false).unwrap();
        s.make_box(2.0, 2.0, 2.0, true).unwrap();
        let mesh = s.tessellate(0.1).unwrap();
        let n = mesh.vertex_count() as u32;
        assert!(mesh.indices.iter().flatten().all(|&i| i < n));
        assert!(mesh.vertices.iter().any(|v| v[0] < 0.0));
    }
}
