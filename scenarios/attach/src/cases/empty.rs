//! 场景 C: 全部为背景的分割结果.

use super::{timed, Outcome};
use irocs::prelude::*;

pub fn empty() -> Outcome {
    timed("degenerate point cloud, no model", || {
        let (state, rx) = ProgressState::with_events();
        let seg = match Segmentation::filled((32, 32, 32), BACKGROUND, [1.0; 3]) {
            Ok(seg) => seg,
            Err(e) => return (Err(e.into()), 0),
        };
        let mut sct = ShellCoordinateTransform::new();
        let result = attach_irocs_to_segmentation(
            &mut sct,
            &seg,
            &SegmentationAttachParams::default(),
            None,
            Some(&state),
        )
        .map(|_| format!("unexpectedly fitted: {}", sct.is_fitted()));
        (result, rx.try_iter().count())
    })
}
