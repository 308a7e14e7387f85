use std::sync::{Arc, Mutex};

use tracing::info;

use crate::compiler::build_scope;
use crate::costume::{Bounds, Costume, Pose};
use crate::error::HatchResult;
use crate::lock;
use crate::project::{AssetSource, TargetJson};
use crate::scope::Scope;
use crate::value::Value;

pub const STAGE_WIDTH: f64 = 480.0;
pub const STAGE_HEIGHT: f64 = 360.0;

/// Wraps a heading into `(-180, 180]`.
pub fn wrap_direction(direction: f64) -> f64 {
    let wrapped = (direction + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// The part of a target that scripts mutate and the renderer reads each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetState {
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub size: f64,
    pub visible: bool,
    pub costume: usize,
    pub layer: i64,
    pub say: Option<String>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            direction: 90.0,
            size: 100.0,
            visible: true,
            costume: 0,
            layer: 0,
            say: None,
        }
    }
}

impl TargetState {
    pub fn pose(&self) -> Pose {
        Pose {
            x: self.x,
            y: self.y,
            size: self.size,
            direction: self.direction,
        }
    }
}

/// The stage or a sprite. Built once at load and never removed.
#[derive(Debug)]
pub struct Target {
    name: String,
    is_stage: bool,
    state: Mutex<TargetState>,
    costumes: Vec<Costume>,
    scope: Arc<Scope>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        is_stage: bool,
        state: TargetState,
        costumes: Vec<Costume>,
        scope: Arc<Scope>,
    ) -> Self {
        let mut state = state;
        if state.costume >= costumes.len() {
            state.costume = 0;
        }
        Self {
            name: name.into(),
            is_stage,
            state: Mutex::new(state),
            costumes,
            scope,
        }
    }

    /// Builds a target from its serialized record. Costume decode failures are
    /// fatal for the target.
    pub fn from_json(
        json: &TargetJson,
        assets: &dyn AssetSource,
        shared: Option<Arc<Scope>>,
    ) -> HatchResult<Self> {
        let scope = Arc::new(build_scope(json, shared)?);
        let costumes = json
            .costumes
            .iter()
            .map(|c| Costume::load(c, assets))
            .collect::<HatchResult<Vec<_>>>()?;
        let state = TargetState {
            x: json.x,
            y: json.y,
            direction: wrap_direction(json.direction),
            size: json.size,
            visible: json.visible,
            costume: json.current_costume,
            layer: json.layer_order,
            say: None,
        };
        Ok(Self::new(json.name.clone(), json.is_stage, state, costumes, scope))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stage(&self) -> bool {
        self.is_stage
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn costumes(&self) -> &[Costume] {
        &self.costumes
    }

    /// Copy of the current state.
    pub fn state(&self) -> TargetState {
        lock(&self.state).clone()
    }

    /// Runs `f` with the state locked. `f` must not block or await.
    pub fn update<R>(&self, f: impl FnOnce(&mut TargetState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn costume_name(&self) -> Option<String> {
        let index = lock(&self.state).costume;
        self.costumes.get(index).map(|c| c.name.clone())
    }

    fn bounds_of(&self, state: &TargetState) -> Bounds {
        if self.is_stage {
            return stage_bounds();
        }
        match self.costumes.get(state.costume) {
            Some(costume) => costume.bounds(&state.pose()),
            None => Bounds::point(state.x, state.y),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds_of(&lock(&self.state))
    }

    /// Hit test used by click hats and `_mouse_` touching. The stage covers the
    /// whole stage rectangle; sprites test their current costume's pixels.
    pub fn touches_point(&self, x: f64, y: f64) -> bool {
        if self.is_stage {
            let b = stage_bounds();
            return x >= b.left && x <= b.right && y >= b.bottom && y <= b.top;
        }
        let state = lock(&self.state);
        if !state.visible {
            return false;
        }
        self.costumes
            .get(state.costume)
            .is_some_and(|costume| costume.contains(&state.pose(), x, y))
    }

    /// Bounding-box overlap between two visible sprites.
    pub fn touches(&self, other: &Target) -> bool {
        if std::ptr::eq(self, other) || self.is_stage || other.is_stage {
            return false;
        }
        // One lock at a time: two sprites may test each other concurrently.
        match (self.visible_bounds(), other.visible_bounds()) {
            (Some(mine), Some(theirs)) => mine.intersects(&theirs),
            _ => false,
        }
    }

    fn visible_bounds(&self) -> Option<Bounds> {
        let state = lock(&self.state);
        (state.visible && !self.costumes.is_empty()).then(|| self.bounds_of(&state))
    }

    pub fn touches_edge(&self) -> bool {
        if self.is_stage || self.costumes.is_empty() {
            return false;
        }
        let b = self.bounds();
        let stage = stage_bounds();
        b.left < stage.left || b.right > stage.right || b.bottom < stage.bottom || b.top > stage.top
    }

    pub fn go_to(&self, x: f64, y: f64) {
        self.update(|s| {
            s.x = x;
            s.y = y;
        });
    }

    /// Moves along the current heading; direction 90 points along +x.
    pub fn move_steps(&self, steps: f64) {
        self.update(|s| {
            let theta = (90.0 - s.direction).to_radians();
            s.x += steps * theta.cos();
            s.y += steps * theta.sin();
        });
    }

    pub fn point_in_direction(&self, direction: f64) {
        self.update(|s| s.direction = wrap_direction(direction));
    }

    pub fn turn(&self, degrees: f64) {
        self.update(|s| s.direction = wrap_direction(s.direction + degrees));
    }

    /// Reflects the heading off whichever stage edges the costume crosses and
    /// pulls the sprite back inside.
    pub fn if_on_edge_bounce(&self) {
        if self.is_stage {
            return;
        }
        let mut state = lock(&self.state);
        let b = self.bounds_of(&state);
        let stage = stage_bounds();
        let cross_x = b.left < stage.left || b.right > stage.right;
        let cross_y = b.bottom < stage.bottom || b.top > stage.top;
        if cross_x {
            state.direction = wrap_direction(-state.direction);
            if b.left < stage.left {
                state.x += stage.left - b.left;
            } else {
                state.x -= b.right - stage.right;
            }
        }
        if cross_y {
            state.direction = wrap_direction(180.0 - state.direction);
            if b.bottom < stage.bottom {
                state.y += stage.bottom - b.bottom;
            } else {
                state.y -= b.top - stage.top;
            }
        }
    }

    /// Switches by costume name, by `next`/`previous` keyword, or by 1-based
    /// number (wrapping). Returns the new costume name when one was selected.
    pub fn switch_costume(&self, which: &Value) -> Option<String> {
        let count = self.costumes.len();
        if count == 0 {
            return None;
        }
        let label = which.to_string();
        let mut state = lock(&self.state);
        let index = if let Some(i) = self.costumes.iter().position(|c| c.name == label) {
            i
        } else {
            match label.as_str() {
                "next costume" | "next backdrop" => (state.costume + 1) % count,
                "previous costume" | "previous backdrop" => (state.costume + count - 1) % count,
                _ => {
                    let n = which.to_number()?;
                    if !n.is_finite() {
                        return None;
                    }
                    (n.round() as i64 - 1).rem_euclid(count as i64) as usize
                }
            }
        };
        state.costume = index;
        Some(self.costumes[index].name.clone())
    }

    pub fn next_costume(&self) -> Option<String> {
        let count = self.costumes.len();
        if count == 0 {
            return None;
        }
        let mut state = lock(&self.state);
        state.costume = (state.costume + 1) % count;
        Some(self.costumes[state.costume].name.clone())
    }

    pub fn say(&self, text: Option<String>) {
        let text = text.filter(|t| !t.is_empty());
        if let Some(t) = &text {
            info!("[Hatch looks] {}: {t}", self.name);
        }
        self.update(|s| s.say = text);
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(|s| s.visible = visible);
    }

    pub fn set_size(&self, size: f64) {
        self.update(|s| s.size = size.max(0.0));
    }
}

fn stage_bounds() -> Bounds {
    Bounds {
        left: -STAGE_WIDTH / 2.0,
        right: STAGE_WIDTH / 2.0,
        bottom: -STAGE_HEIGHT / 2.0,
        top: STAGE_HEIGHT / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costume::AlphaMask;

    fn sprite(costumes: Vec<Costume>) -> Target {
        Target::new(
            "Cat",
            false,
            TargetState::default(),
            costumes,
            Arc::new(Scope::new(None)),
        )
    }

    fn square(name: &str, side: u32) -> Costume {
        let half = side as f64 / 2.0;
        Costume::new(name, AlphaMask::solid(side, side), (half, half), 1.0)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn direction_wraps_into_half_open_range() {
        assert_eq!(wrap_direction(180.0), 180.0);
        assert_eq!(wrap_direction(-180.0), 180.0);
        assert_eq!(wrap_direction(270.0), -90.0);
        assert_eq!(wrap_direction(-190.0), 170.0);
        assert_eq!(wrap_direction(90.0), 90.0);
    }

    #[test]
    fn move_steps_follows_heading() {
        let cat = sprite(vec![]);
        cat.move_steps(10.0);
        let s = cat.state();
        assert!(approx(s.x, 10.0) && approx(s.y, 0.0));

        cat.point_in_direction(0.0);
        cat.move_steps(5.0);
        let s = cat.state();
        assert!(approx(s.x, 10.0) && approx(s.y, 5.0));

        cat.turn(-90.0);
        assert_eq!(cat.state().direction, -90.0);
    }

    #[test]
    fn edge_bounce_reflects_and_clamps() {
        let cat = sprite(vec![square("c", 20)]);
        cat.go_to(235.0, 0.0);
        cat.if_on_edge_bounce();
        let s = cat.state();
        assert_eq!(s.direction, -90.0);
        assert!(approx(s.x, 230.0));

        cat.go_to(0.0, -175.0);
        cat.point_in_direction(180.0);
        cat.if_on_edge_bounce();
        let s = cat.state();
        assert!(approx(s.direction, 0.0));
        assert!(approx(s.y, -170.0));

        cat.go_to(0.0, 0.0);
        cat.point_in_direction(45.0);
        cat.if_on_edge_bounce();
        assert_eq!(cat.state().direction, 45.0);
    }

    #[test]
    fn costume_switching_by_name_number_and_keyword() {
        let cat = sprite(vec![square("a", 2), square("b", 2), square("c", 2)]);
        assert_eq!(cat.switch_costume(&Value::text("c")).as_deref(), Some("c"));
        assert_eq!(cat.switch_costume(&Value::Int(1)).as_deref(), Some("a"));
        assert_eq!(cat.switch_costume(&Value::Int(5)).as_deref(), Some("b"));
        assert_eq!(
            cat.switch_costume(&Value::text("previous costume")).as_deref(),
            Some("a")
        );
        assert_eq!(cat.next_costume().as_deref(), Some("b"));
        assert_eq!(cat.switch_costume(&Value::text("zzz")), None);
        assert_eq!(cat.costume_name().as_deref(), Some("b"));
    }

    #[test]
    fn hidden_or_costumeless_sprites_never_touch() {
        let bare = sprite(vec![]);
        assert!(!bare.touches_point(0.0, 0.0));

        let cat = sprite(vec![square("c", 10)]);
        assert!(cat.touches_point(2.0, 2.0));
        cat.set_visible(false);
        assert!(!cat.touches_point(2.0, 2.0));
    }

    #[test]
    fn sprites_touch_by_bounding_box() {
        let a = sprite(vec![square("c", 10)]);
        let b = sprite(vec![square("c", 10)]);
        b.go_to(8.0, 0.0);
        assert!(a.touches(&b));
        b.go_to(30.0, 0.0);
        assert!(!a.touches(&b));
        assert!(!a.touches(&a));
    }

    #[test]
    fn stage_hit_test_is_the_stage_rectangle() {
        let stage = Target::new(
            "Stage",
            true,
            TargetState::default(),
            vec![],
            Arc::new(Scope::new(None)),
        );
        assert!(stage.touches_point(-240.0, 180.0));
        assert!(!stage.touches_point(241.0, 0.0));
    }

    #[test]
    fn say_clears_on_empty_text() {
        let cat = sprite(vec![]);
        cat.say(Some("hi".into()));
        assert_eq!(cat.state().say.as_deref(), Some("hi"));
        cat.say(Some(String::new()));
        assert_eq!(cat.state().say, None);
    }
}
