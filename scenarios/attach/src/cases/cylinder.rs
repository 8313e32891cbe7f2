//! 场景 A: 64³ 体数据中半径 10, 长 50 体素的圆柱.

use super::{timed, Outcome};
use irocs::data::synthetic;
use irocs::prelude::*;
use std::path::Path;
use std::time::Duration;

/// 在后台线程中拟合外壳坐标变换, 同时在当前线程中接收进度事件.
pub fn cylinder(debug_dir: Option<&Path>) -> Outcome {
    let debug_path = debug_dir.map(|d| d.join("scenario-a.npz"));
    timed("axis length within 10% of 50 µm", move || {
        let seg = match synthetic::cylinder((64, 64, 64), (32.0, 32.0), 10.0, 7..57, 2, 1, [1.0; 3])
        {
            Ok(seg) => seg,
            Err(e) => return (Err(e.into()), 0),
        };
        let params = SegmentationAttachParams {
            background_label: 1,
            down_sample_ratio: 4,
            segment_length_um: 10.0,
            margin_um: 5.0,
            qc_um: Some(Vec3::new(7.0, 32.0, 32.0)),
            ..Default::default()
        };

        let worker = Worker::spawn(move |p| {
            let mut sct = ShellCoordinateTransform::new();
            attach_irocs_to_segmentation(&mut sct, &seg, &params, debug_path.as_deref(), Some(p))
                .map(|_| sct)
        });

        let mut events = 0;
        while !worker.is_finished() {
            if let Ok(e) = worker.events().recv_timeout(Duration::from_millis(50)) {
                log::debug!("[A] {}", utils::describe_event(&e));
                events += 1;
            }
        }
        events += worker.events().try_iter().count();

        let result = match worker.join() {
            Ok(r) => r.and_then(|sct| {
                sct.axis_length_um()
                    .map(|l| {
                        let angle = sct.opening_angle().unwrap_or(f64::NAN);
                        format!("axis length {l:.2} µm, opening angle {angle:.3} rad")
                    })
                    .ok_or(AttachError::Unexpected("model is not fitted".to_owned()))
            }),
            Err(_) => Err(AttachError::Unexpected("worker panicked".to_owned())),
        };
        (result, events)
    })
}
