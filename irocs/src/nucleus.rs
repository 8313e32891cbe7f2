//! 细胞核标记.

use crate::consts::label;
use crate::Vec3;

/// 细胞核.
///
/// 位置以微米为单位, 顺序为 `(z, y, x)`. 拟合完成后, 三个输出坐标被写回.
#[derive(Clone, Debug, PartialEq)]
pub struct Nucleus {
    position_um: Vec3,
    label: i32,
    qc_distance_um: Option<f64>,
    radial_distance_um: Option<f64>,
    phi: Option<f64>,
}

impl Nucleus {
    /// 初始化. 输出坐标均为空.
    #[inline]
    pub fn new(position_um: Vec3, label: i32) -> Self {
        Self {
            position_um,
            label,
            qc_distance_um: None,
            radial_distance_um: None,
            phi: None,
        }
    }

    /// 物理位置 (µm).
    #[inline]
    pub fn position_um(&self) -> Vec3 {
        self.position_um
    }

    /// 标签值.
    #[inline]
    pub fn label(&self) -> i32 {
        self.label
    }

    /// 是否是表皮细胞核?
    #[inline]
    pub fn is_epidermis(&self) -> bool {
        label::is_epidermis(self.label)
    }

    /// 沿根轴到 QC 的距离 (µm).
    #[inline]
    pub fn qc_distance_um(&self) -> Option<f64> {
        self.qc_distance_um
    }

    /// 到根轴的距离 (µm).
    #[inline]
    pub fn radial_distance_um(&self) -> Option<f64> {
        self.radial_distance_um
    }

    /// 绕根轴的角度 (弧度, `(-π, π]`).
    #[inline]
    pub fn phi(&self) -> Option<f64> {
        self.phi
    }

    /// 一次性写入三个输出坐标.
    #[inline]
    pub fn set_coordinates(&mut self, qc_distance_um: f64, radial_distance_um: f64, phi: f64) {
        self.qc_distance_um = Some(qc_distance_um);
        self.radial_distance_um = Some(radial_distance_um);
        self.phi = Some(phi);
    }

    /// 清除输出坐标.
    #[inline]
    pub fn clear_coordinates(&mut self) {
        self.qc_distance_um = None;
        self.radial_distance_um = None;
        self.phi = None;
    }
}

/// 外部标记通道中的单个标记.
///
/// 编排函数按迭代顺序读取标记, 拟合完成后按相同顺序写回输出坐标,
/// 因此实现者必须保证两次迭代顺序一致.
pub trait Marker {
    /// 物理位置 (µm), `(z, y, x)`.
    fn position_um(&self) -> Vec3;

    /// 标签值.
    fn label(&self) -> i32;

    /// 写入沿根轴到 QC 的距离.
    fn set_qc_distance_um(&mut self, value: f64);

    /// 写入到根轴的距离.
    fn set_radial_distance_um(&mut self, value: f64);

    /// 写入绕根轴的角度.
    fn set_phi(&mut self, value: f64);
}

impl Marker for Nucleus {
    #[inline]
    fn position_um(&self) -> Vec3 {
        self.position_um
    }

    #[inline]
    fn label(&self) -> i32 {
        self.label
    }

    #[inline]
    fn set_qc_distance_um(&mut self, value: f64) {
        self.qc_distance_um = Some(value);
    }

    #[inline]
    fn set_radial_distance_um(&mut self, value: f64) {
        self.radial_distance_um = Some(value);
    }

    #[inline]
    fn set_phi(&mut self, value: f64) {
        self.phi = Some(value);
    }
}

/// 按迭代顺序把外部标记读取为细胞核.
pub fn read_markers<'a, M, I>(markers: I) -> Vec<Nucleus>
where
    M: Marker + 'a,
    I: IntoIterator<Item = &'a M>,
{
    markers
        .into_iter()
        .map(|m| Nucleus::new(m.position_um(), m.label()))
        .collect()
}

/// 按迭代顺序把细胞核的输出坐标写回外部标记.
///
/// 没有输出坐标的细胞核对应的标记不被修改. 返回写回的标记个数.
pub fn write_back_markers<'a, M, I>(nuclei: &[Nucleus], markers: I) -> usize
where
    M: Marker + 'a,
    I: IntoIterator<Item = &'a mut M>,
{
    let mut written = 0;
    for (n, m) in nuclei.iter().zip(markers) {
        if let (Some(l), Some(r), Some(p)) = (n.qc_distance_um, n.radial_distance_um, n.phi) {
            m.set_qc_distance_um(l);
            m.set_radial_distance_um(r);
            m.set_phi(p);
            written += 1;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 外部标记的最小实现.
    #[derive(Default)]
    struct TestMarker {
        pos: [f64; 3],
        label: i32,
        out: [f64; 3],
    }

    impl Marker for TestMarker {
        fn position_um(&self) -> Vec3 {
            Vec3::from(self.pos)
        }
        fn label(&self) -> i32 {
            self.label
        }
        fn set_qc_distance_um(&mut self, value: f64) {
            self.out[0] = value;
        }
        fn set_radial_distance_um(&mut self, value: f64) {
            self.out[1] = value;
        }
        fn set_phi(&mut self, value: f64) {
            self.out[2] = value;
        }
    }

    #[test]
    fn test_round_trip_keeps_order() {
        let mut markers: Vec<TestMarker> = (0..3)
            .map(|i| TestMarker {
                pos: [i as f64, 0.0, 0.0],
                label: 2 + i,
                ..Default::default()
            })
            .collect();
        let mut nuclei = read_markers(&markers);
        assert_eq!(nuclei[2].label(), 4);
        assert!(nuclei[0].is_epidermis());

        for (i, n) in nuclei.iter_mut().enumerate() {
            if i != 1 {
                n.set_coordinates(10.0 * i as f64, 1.0, 0.5);
            }
        }
        assert_eq!(write_back_markers(&nuclei, &mut markers), 2);
        assert_eq!(markers[2].out, [20.0, 1.0, 0.5]);
        assert_eq!(markers[1].out, [0.0; 3]);
    }
}
