use crate::camera::{ViewSnapshot, Viewport};
use crate::device::ContextHandle;
use crate::interop::InteropBindings;
use crate::time::FrameTime;

use super::{RenderSettings, SceneGeometry};

/// Everything a renderer may read while drawing one frame.
///
/// The camera and settings are per-frame copies; nothing here is shared with
/// producer threads.
pub struct FrameCtx<'a> {
    pub context: &'a ContextHandle,
    pub viewport: Viewport,
    pub view: &'a ViewSnapshot,
    pub scene: &'a SceneGeometry,
    pub settings: &'a RenderSettings,
    pub bindings: Option<&'a InteropBindings>,
    pub time: FrameTime,
}
