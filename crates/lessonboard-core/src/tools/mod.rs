//! Drawing tools and their mapping onto board operations.

use crate::operation::{MAX_BRUSH_SIZE, Operation};
use crate::predictive::SceneView;
use crate::shapes::{BoardColor, Figure, FigureKind, ImageObject, ObjectId, ObjectSpec, SceneObject, TextBox};
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Pointer samples closer than this to the previous one are skipped.
const MIN_SAMPLE_DISTANCE: f64 = 0.5;
/// Hit tolerance of the select tool, in world units.
const SELECT_TOLERANCE: f64 = 4.0;

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Pen,
    Highlighter,
    Eraser,
    Rectangle,
    Ellipse,
    Line,
    Arrow,
    Text,
    Formula,
    Image,
    Select,
    Laser,
}

impl ToolKind {
    pub fn figure_kind(self) -> Option<FigureKind> {
        match self {
            ToolKind::Rectangle => Some(FigureKind::Rectangle),
            ToolKind::Ellipse => Some(FigureKind::Ellipse),
            ToolKind::Line => Some(FigureKind::Line),
            ToolKind::Arrow => Some(FigureKind::Arrow),
            _ => None,
        }
    }

    /// Whether the tool changes shared board state.
    pub fn edits_board(self) -> bool {
        !matches!(self, ToolKind::Select | ToolKind::Laser)
    }
}

/// Pointer input in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolEvent {
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    Cancel,
}

impl ToolEvent {
    /// Same event with its point mapped, e.g. from screen to world.
    pub fn map(self, f: impl Fn(Point) -> Point) -> Self {
        match self {
            ToolEvent::PointerDown(p) => ToolEvent::PointerDown(f(p)),
            ToolEvent::PointerMove(p) => ToolEvent::PointerMove(f(p)),
            ToolEvent::PointerUp(p) => ToolEvent::PointerUp(f(p)),
            ToolEvent::Cancel => ToolEvent::Cancel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolStyle {
    pub color: BoardColor,
    pub brush_size: f64,
}

impl Default for ToolStyle {
    fn default() -> Self {
        Self {
            color: BoardColor::black(),
            brush_size: crate::operation::DEFAULT_BRUSH_SIZE,
        }
    }
}

/// Image the image tool places on the next click.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub source: String,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum ToolState {
    #[default]
    Idle,
    /// Freehand stroke in progress.
    Drawing { last: Point },
    /// Figure drag in progress.
    Dragging { start: Point, current: Point },
}

/// Result of one tool event.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Unsequenced operations to submit, in order.
    pub operations: Vec<Operation>,
    /// Local-only preview of a figure being dragged.
    pub preview: Option<SceneObject>,
    pub selection: Option<ObjectId>,
    /// Pointer presence to share (laser).
    pub cursor: Option<Point>,
}

/// The current tool, its style and the state of the interaction.
#[derive(Debug, Clone)]
pub struct ToolController {
    pub current_tool: ToolKind,
    pub style: ToolStyle,
    pub state: ToolState,
    pub text_content: String,
    pub formula_source: String,
    pub image: Option<ImagePlacement>,
    selection: Option<ObjectId>,
    extent: f64,
}

impl ToolController {
    pub fn new(extent: f64) -> Self {
        Self {
            current_tool: ToolKind::default(),
            style: ToolStyle::default(),
            state: ToolState::Idle,
            text_content: "Text".to_string(),
            formula_source: r"x^2".to_string(),
            image: None,
            selection: None,
            extent,
        }
    }

    /// Switch tools, abandoning any interaction in progress.
    pub fn set_tool(&mut self, tool: ToolKind) -> ToolOutput {
        let output = self.apply(ToolEvent::Cancel, None);
        self.current_tool = tool;
        output
    }

    pub fn is_active(&self) -> bool {
        self.state != ToolState::Idle
    }

    pub fn selection(&self) -> Option<ObjectId> {
        self.selection
    }

    fn clamp(&self, p: Point) -> Point {
        Point::new(p.x.clamp(0.0, self.extent), p.y.clamp(0.0, self.extent))
    }

    fn styled(&self, op: Operation) -> Operation {
        op.with_style(self.style.color, self.style.brush_size)
    }

    fn highlighter_style(&self) -> (BoardColor, f64) {
        let brush = (self.style.brush_size * 4.0).max(12.0).min(MAX_BRUSH_SIZE);
        (self.style.color.with_alpha(96), brush)
    }

    fn eraser_size(&self) -> f64 {
        (self.style.brush_size * 3.0).max(10.0).min(MAX_BRUSH_SIZE)
    }

    /// Dispatch one pointer event to the current tool.
    pub fn apply_tool(&mut self, event: ToolEvent, view: &SceneView<'_>) -> ToolOutput {
        self.apply(event, Some(view))
    }

    fn apply(&mut self, event: ToolEvent, view: Option<&SceneView<'_>>) -> ToolOutput {
        let event = event.map(|p| self.clamp(p));
        match self.current_tool {
            ToolKind::Pen | ToolKind::Highlighter => self.freehand(event),
            ToolKind::Eraser => self.erase(event),
            ToolKind::Rectangle | ToolKind::Ellipse | ToolKind::Line | ToolKind::Arrow => self.figure(event),
            ToolKind::Text | ToolKind::Formula | ToolKind::Image => self.place(event),
            ToolKind::Select => self.select(event, view),
            ToolKind::Laser => ToolOutput {
                cursor: match event {
                    ToolEvent::PointerDown(p) | ToolEvent::PointerMove(p) => Some(p),
                    _ => None,
                },
                ..ToolOutput::default()
            },
        }
    }

    fn freehand(&mut self, event: ToolEvent) -> ToolOutput {
        let (color, brush) = if self.current_tool == ToolKind::Highlighter {
            self.highlighter_style()
        } else {
            (self.style.color, self.style.brush_size)
        };
        let mut out = ToolOutput::default();
        match (event, self.state) {
            (ToolEvent::PointerDown(p), _) => {
                if let ToolState::Drawing { .. } = self.state {
                    out.operations.push(Operation::end());
                }
                out.operations.push(Operation::start(p).with_style(color, brush));
                self.state = ToolState::Drawing { last: p };
            }
            (ToolEvent::PointerMove(p) | ToolEvent::PointerUp(p), ToolState::Drawing { last }) => {
                if p.distance(last) >= MIN_SAMPLE_DISTANCE {
                    out.operations.push(Operation::draw(p).with_style(color, brush));
                    self.state = ToolState::Drawing { last: p };
                }
                if let ToolEvent::PointerUp(_) = event {
                    out.operations.push(Operation::end().with_style(color, brush));
                    self.state = ToolState::Idle;
                }
            }
            (ToolEvent::Cancel, ToolState::Drawing { .. }) => {
                out.operations.push(Operation::end().with_style(color, brush));
                self.state = ToolState::Idle;
            }
            _ => {}
        }
        out
    }

    fn erase(&mut self, event: ToolEvent) -> ToolOutput {
        let size = self.eraser_size();
        let mut out = ToolOutput::default();
        match event {
            ToolEvent::PointerDown(p) => {
                out.operations.push(Operation::erase(p).with_style(self.style.color, size));
                self.state = ToolState::Drawing { last: p };
            }
            ToolEvent::PointerMove(p) => {
                if let ToolState::Drawing { last } = self.state {
                    if p.distance(last) >= size / 4.0 {
                        out.operations.push(Operation::erase(p).with_style(self.style.color, size));
                        self.state = ToolState::Drawing { last: p };
                    }
                }
            }
            ToolEvent::PointerUp(_) | ToolEvent::Cancel => self.state = ToolState::Idle,
        }
        out
    }

    fn figure(&mut self, event: ToolEvent) -> ToolOutput {
        let Some(kind) = self.current_tool.figure_kind() else {
            return ToolOutput::default();
        };
        let style = self.style;
        let build = |start: Point, end: Point| Figure::new(kind, start, end, style.color, style.brush_size);
        let mut out = ToolOutput::default();
        match (event, self.state) {
            (ToolEvent::PointerDown(p), _) => {
                self.state = ToolState::Dragging { start: p, current: p };
            }
            (ToolEvent::PointerMove(p), ToolState::Dragging { start, .. }) => {
                self.state = ToolState::Dragging { start, current: p };
                out.preview = Some(SceneObject::Figure(build(start, p)));
            }
            (ToolEvent::PointerUp(p), ToolState::Dragging { start, .. }) => {
                self.state = ToolState::Idle;
                let figure = build(start, p);
                if !figure.is_degenerate() {
                    out.operations.push(self.styled(Operation::complete_object(ObjectSpec::Figure(figure))));
                }
            }
            (ToolEvent::Cancel, _) => self.state = ToolState::Idle,
            _ => {}
        }
        out
    }

    fn place(&mut self, event: ToolEvent) -> ToolOutput {
        let ToolEvent::PointerDown(p) = event else {
            return ToolOutput::default();
        };
        let spec = match self.current_tool {
            ToolKind::Text if !self.text_content.trim().is_empty() => {
                let mut text = TextBox::new(p, self.text_content.clone());
                text.color = self.style.color;
                Some(ObjectSpec::Text(text))
            }
            ToolKind::Formula if !self.formula_source.trim().is_empty() => {
                let mut formula = TextBox::formula(p, self.formula_source.clone());
                formula.color = self.style.color;
                Some(ObjectSpec::Text(formula))
            }
            ToolKind::Image => self
                .image
                .as_ref()
                .map(|img| ObjectSpec::Image(ImageObject::new(p, img.width, img.height, img.source.clone()))),
            _ => None,
        };
        ToolOutput {
            operations: spec
                .map(|s| self.styled(Operation::complete_object(s)))
                .into_iter()
                .collect(),
            ..ToolOutput::default()
        }
    }

    fn select(&mut self, event: ToolEvent, view: Option<&SceneView<'_>>) -> ToolOutput {
        if let (ToolEvent::PointerDown(p), Some(view)) = (event, view) {
            self.selection = view.hit_test(p, SELECT_TOLERANCE);
        }
        ToolOutput {
            selection: self.selection,
            ..ToolOutput::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CANVAS_EXTENT, OperationKind};
    use crate::predictive::PredictiveApplier;
    use crate::scene::SceneStore;

    fn kinds(out: &ToolOutput) -> Vec<OperationKind> {
        out.operations.iter().map(|op| op.kind).collect()
    }

    fn with_view<R>(f: impl FnOnce(&SceneView<'_>) -> R) -> R {
        let scene = SceneStore::new(CANVAS_EXTENT);
        let predictive = PredictiveApplier::new(CANVAS_EXTENT);
        f(&SceneView::new(&scene, &predictive))
    }

    #[test]
    fn test_pen_emits_start_draw_end() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            let down = tools.apply_tool(ToolEvent::PointerDown(Point::new(10.0, 10.0)), view);
            let moved = tools.apply_tool(ToolEvent::PointerMove(Point::new(20.0, 20.0)), view);
            let up = tools.apply_tool(ToolEvent::PointerUp(Point::new(20.0, 20.0)), view);
            assert_eq!(kinds(&down), vec![OperationKind::Start]);
            assert_eq!(kinds(&moved), vec![OperationKind::Draw]);
            assert_eq!(kinds(&up), vec![OperationKind::End]);
            assert!(!tools.is_active());
        });
    }

    #[test]
    fn test_highlighter_is_wide_and_translucent() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.set_tool(ToolKind::Highlighter);
            let out = tools.apply_tool(ToolEvent::PointerDown(Point::new(5.0, 5.0)), view);
            assert!(out.operations[0].brush_size >= 12.0);
            assert!(out.operations[0].color.a < 255);
        });
    }

    #[test]
    fn test_rectangle_preview_then_object() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.set_tool(ToolKind::Rectangle);
            tools.apply_tool(ToolEvent::PointerDown(Point::new(0.0, 0.0)), view);
            let moved = tools.apply_tool(ToolEvent::PointerMove(Point::new(50.0, 50.0)), view);
            assert!(moved.preview.is_some());
            assert!(moved.operations.is_empty());
            let up = tools.apply_tool(ToolEvent::PointerUp(Point::new(100.0, 80.0)), view);
            assert_eq!(kinds(&up), vec![OperationKind::CompleteStroke]);
            assert!(matches!(up.operations[0].object, Some(ObjectSpec::Figure(_))));
        });
    }

    #[test]
    fn test_zero_size_drag_produces_nothing() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.set_tool(ToolKind::Ellipse);
            tools.apply_tool(ToolEvent::PointerDown(Point::new(5.0, 5.0)), view);
            let up = tools.apply_tool(ToolEvent::PointerUp(Point::new(5.0, 5.0)), view);
            assert!(up.operations.is_empty());
        });
    }

    #[test]
    fn test_text_and_formula_placed_on_click() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.set_tool(ToolKind::Formula);
            let out = tools.apply_tool(ToolEvent::PointerDown(Point::new(30.0, 40.0)), view);
            match &out.operations[0].object {
                Some(ObjectSpec::Text(t)) => assert!(t.is_formula),
                other => panic!("unexpected {other:?}"),
            }
            tools.set_tool(ToolKind::Image);
            assert!(tools.apply_tool(ToolEvent::PointerDown(Point::new(1.0, 1.0)), view).operations.is_empty());
        });
    }

    #[test]
    fn test_select_and_laser_do_not_edit() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.set_tool(ToolKind::Laser);
            let out = tools.apply_tool(ToolEvent::PointerMove(Point::new(3.0, 4.0)), view);
            assert!(out.operations.is_empty());
            assert_eq!(out.cursor, Some(Point::new(3.0, 4.0)));
            tools.set_tool(ToolKind::Select);
            let out = tools.apply_tool(ToolEvent::PointerDown(Point::new(3.0, 4.0)), view);
            assert!(out.operations.is_empty());
            assert_eq!(out.selection, None);
        });
    }

    #[test]
    fn test_switching_tool_closes_stroke() {
        with_view(|view| {
            let mut tools = ToolController::new(CANVAS_EXTENT);
            tools.apply_tool(ToolEvent::PointerDown(Point::new(1.0, 1.0)), view);
            let out = tools.set_tool(ToolKind::Eraser);
            assert_eq!(kinds(&out), vec![OperationKind::End]);
        });
    }

    #[test]
    fn test_points_clamped_to_canvas() {
        with_view(|view| {
            let mut tools = ToolController::new(100.0);
            let out = tools.apply_tool(ToolEvent::PointerDown(Point::new(-5.0, 150.0)), view);
            assert_eq!(out.operations[0].point, Some(Point::new(0.0, 100.0)));
        });
    }
}
