//! 基于细胞核标记的编排函数.

use crate::attach::{guarded, AttachState, StateTracker};
use crate::consts::MIN_EPIDERMIS_MARKERS;
use crate::error::{AttachError, ConfigError};
use crate::nucleus::{read_markers, write_back_markers, Marker, Nucleus};
use crate::progress::{Progress, StageList, Ticker};
use crate::rct::{Irocs, IrocsParams};
use crate::Vec3;

const FIT: &str = "Fitting iRoCS axis";
const COORDINATES: &str = "Computing nucleus coordinates";

/// 以表皮细胞核拟合根轴, 并为所有细胞核计算根坐标.
///
/// 流程: 检查参数 (包括 QC 是否给出) → 统计表皮细胞核 → 拟合 → 逐细胞核坐标.
/// 参数非法时不读取任何细胞核.
///
/// # 返回值
///
/// 成功时 `rct` 被替换为新模型, `nuclei` 中每个细胞核都写入 `(l, r, φ)`.
/// 失败或取消时 `rct` 和 `nuclei` 都保持原状.
pub fn attach_irocs_to_markers(
    rct: &mut Irocs,
    nuclei: &mut [Nucleus],
    qc: Option<Vec3>,
    params: &IrocsParams,
    progress: Progress,
) -> Result<(), AttachError> {
    let mut tracker = StateTracker::new();
    guarded(&mut tracker, progress, |t| {
        run(t, rct, nuclei, qc, params, progress)
    })
}

fn run(
    t: &mut StateTracker,
    rct: &mut Irocs,
    nuclei: &mut [Nucleus],
    qc: Option<Vec3>,
    params: &IrocsParams,
    progress: Progress,
) -> Result<(), AttachError> {
    t.enter(AttachState::Validating);
    params.check()?;
    let qc = qc.ok_or(ConfigError::MissingQuiescentCenter)?;

    t.enter(AttachState::ExtractingPoints);
    let epidermis: Vec<Vec3> = nuclei
        .iter()
        .filter(|n| n.is_epidermis())
        .map(Nucleus::position_um)
        .collect();
    log::info!("{} of {} nuclei are epidermis", epidermis.len(), nuclei.len());
    if epidermis.len() < MIN_EPIDERMIS_MARKERS {
        return Err(AttachError::TooFewEpidermisMarkers(
            epidermis.len(),
            MIN_EPIDERMIS_MARKERS,
        ));
    }

    let mut stages = StageList::new();
    stages.push(FIT, 90.0).push(COORDINATES, 10.0);
    let mut schedule = stages.schedule(progress);

    t.enter(AttachState::Fitting);
    let s = schedule.enter(FIT)?;
    let mut fitted = rct.clone();
    fitted.fit(&epidermis, qc, params, s.progress())?;
    s.done()?;

    t.enter(AttachState::ComputingDenseCoordinates);
    let s = schedule.enter(COORDINATES)?;
    let axis = fitted
        .axis()
        .ok_or_else(|| AttachError::Unexpected("fitted model has no axis".to_owned()))?;
    let ticker = Ticker::new(s.progress(), nuclei.len());
    let mut coords = Vec::with_capacity(nuclei.len());
    for n in nuclei.iter() {
        coords.push(axis.coordinates(&n.position_um()));
        ticker.tick(1)?;
    }
    s.done()?;
    schedule.finish()?;

    for (n, c) in nuclei.iter_mut().zip(coords) {
        n.set_coordinates(c.l, c.r, c.phi);
    }
    *rct = fitted;
    Ok(())
}

/// 与 [`attach_irocs_to_markers`] 相同, 但作用于外部标记通道.
///
/// 标记按迭代顺序读取, 成功时按相同顺序写回.
pub fn attach_irocs_to_marker_set<M: Marker>(
    rct: &mut Irocs,
    markers: &mut [M],
    qc: Option<Vec3>,
    params: &IrocsParams,
    progress: Progress,
) -> Result<(), AttachError> {
    let mut nuclei = read_markers(markers.iter());
    attach_irocs_to_markers(rct, &mut nuclei, qc, params, progress)?;
    let n = write_back_markers(&nuclei, markers.iter_mut());
    log::debug!("wrote coordinates back to {n} markers");
    Ok(())
}
