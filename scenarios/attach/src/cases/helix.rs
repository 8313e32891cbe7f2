//! 场景 B: 沿 z 轴排列为螺旋的 8 个表皮细胞核.

use super::{timed, Outcome};
use irocs::data::synthetic;
use irocs::prelude::*;
use std::f64::consts::PI;

pub fn helix() -> Outcome {
    timed("axis direction within 0.05 rad of +z", || {
        let (state, rx) = ProgressState::with_events();
        let mut nuclei = synthetic::helix_nuclei(8, 10.0, 10.0, 8.0, 0.75 * PI, EPIDERMIS);
        let params = IrocsParams {
            weights: EnergyWeights {
                kappa: 1.0,
                lambda: 0.0,
                mu: 0.0,
            },
            search_radius_um: 30.0,
            n_iterations: 1000,
            tau: 0.1,
        };
        let mut rct = Irocs::new();
        let qc = Some(Vec3::new(5.0, 0.0, 0.0));
        let result = attach_irocs_to_markers(&mut rct, &mut nuclei, qc, &params, Some(&state))
            .map(|()| match rct.axis_direction(0.0) {
                Some(d) => {
                    let angle = d.normalize().dot(&Vec3::x()).clamp(-1.0, 1.0).acos();
                    let mean_r = nuclei
                        .iter()
                        .filter_map(Nucleus::radial_distance_um)
                        .sum::<f64>()
                        / nuclei.len() as f64;
                    format!("axis tilt {angle:.4} rad, mean radius {mean_r:.2} µm")
                }
                None => "model is not fitted".to_owned(),
            });
        (result, rx.try_iter().count())
    })
}
